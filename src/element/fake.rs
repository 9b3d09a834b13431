//! In-memory elements for executor and retry tests

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::common::config::{ue_name, FIVEGC_NAME, GNB_NAME};
use crate::common::{Error, Result};
use crate::ipc::protocol::{
    AttachInfo, Definition, PingStats, Role, StartConfig, StopReport,
};

use super::{ElementFactory, ElementSet, HandleStatus, PingSource, RemoteElement, StopFlags, UeControl};

/// Misbehavior a fake element shows for its whole lifetime
#[derive(Debug, Clone, PartialEq)]
pub enum FakeFault {
    StartFails,
    AttachTimesOut,
    /// Drop this many echo replies per ping
    LosePackets(u32),
    /// 5GC pings report that no paging happened
    NoPaging,
    StopErrors(u32),
    StopWarnings(u32),
    /// Every ping raises inside the remote application
    RemoteFault,
}

#[derive(Default)]
struct Shared {
    calls: Vec<String>,
    closed: usize,
}

/// A UE/gNB/5GC set recording every call made to it
#[derive(Clone)]
pub struct FakeNetwork {
    ues: usize,
    faults: HashMap<String, Vec<FakeFault>>,
    shared: Arc<Mutex<Shared>>,
}

impl FakeNetwork {
    pub fn new(ues: usize) -> Self {
        Self {
            ues,
            faults: HashMap::new(),
            shared: Arc::default(),
        }
    }

    pub fn with_fault(mut self, element: &str, fault: FakeFault) -> Self {
        self.faults.entry(element.to_string()).or_default().push(fault);
        self
    }

    /// Fresh handles sharing this network's call log
    pub fn elements(&self) -> ElementSet {
        let ues = (1..=self.ues)
            .map(|i| Box::new(self.element(&ue_name(i), Role::Ue, i as u8)) as Box<dyn UeControl>)
            .collect();
        ElementSet {
            ues,
            gnb: Box::new(self.element(GNB_NAME, Role::Gnb, 0)),
            core: Box::new(self.element(FIVEGC_NAME, Role::FiveGc, 0)),
        }
    }

    /// Calls in order, as "<element> <operation>"
    pub fn calls(&self) -> Vec<String> {
        self.shared.lock().unwrap().calls.clone()
    }

    /// Number of handles closed
    pub fn closed(&self) -> usize {
        self.shared.lock().unwrap().closed
    }

    fn element(&self, name: &str, role: Role, index: u8) -> FakeElement {
        FakeElement {
            name: name.to_string(),
            role,
            index,
            status: HandleStatus::Idle,
            faults: self.faults.get(name).cloned().unwrap_or_default(),
            shared: self.shared.clone(),
        }
    }
}

pub struct FakeElement {
    name: String,
    role: Role,
    index: u8,
    status: HandleStatus,
    faults: Vec<FakeFault>,
    shared: Arc<Mutex<Shared>>,
}

impl FakeElement {
    fn log(&self, operation: &str) {
        self.shared
            .lock()
            .unwrap()
            .calls
            .push(format!("{} {}", self.name, operation));
    }

    fn has(&self, fault: &FakeFault) -> bool {
        self.faults.contains(fault)
    }

    fn ue_address(&self) -> Ipv4Addr {
        Ipv4Addr::new(10, 45, 1, self.index)
    }
}

#[async_trait]
impl RemoteElement for FakeElement {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> Role {
        self.role
    }

    fn status(&self) -> HandleStatus {
        self.status
    }

    async fn definition(&mut self) -> Result<Definition> {
        let (address, imsi) = match self.role {
            Role::Ue => (None, Some(format!("00101{:010}", self.index))),
            Role::Gnb => (Some(IpAddr::V4(Ipv4Addr::new(127, 0, 1, 1))), None),
            Role::FiveGc => (Some(IpAddr::V4(Ipv4Addr::new(10, 45, 0, 1))), None),
        };
        Ok(Definition {
            name: self.name.clone(),
            role: self.role,
            address,
            imsi,
        })
    }

    async fn start(&mut self, _config: &StartConfig) -> Result<()> {
        self.log("start");
        if self.has(&FakeFault::StartFails) {
            self.status = HandleStatus::Failed;
            return Err(Error::start_failed(&self.name, "injected"));
        }
        self.status = HandleStatus::Running;
        Ok(())
    }

    async fn stop(&mut self, _flags: StopFlags) -> Result<StopReport> {
        self.log("stop");
        self.status = HandleStatus::Stopped;
        let mut report = StopReport {
            artifacts: vec![format!("{}.log", self.name)],
            ..StopReport::default()
        };
        for fault in &self.faults {
            match fault {
                FakeFault::StopErrors(n) => report.errors = *n,
                FakeFault::StopWarnings(n) => report.warnings = *n,
                _ => {}
            }
        }
        Ok(report)
    }

    async fn close(&mut self) {
        self.shared.lock().unwrap().closed += 1;
    }
}

#[async_trait]
impl PingSource for FakeElement {
    async fn ping(&mut self, _target: IpAddr, count: u32) -> Result<PingStats> {
        self.log("ping");
        if self.has(&FakeFault::RemoteFault) {
            return Err(Error::RemoteFault {
                element: self.name.clone(),
                message: "ping raised".to_string(),
            });
        }
        let lost = self
            .faults
            .iter()
            .find_map(|f| match f {
                FakeFault::LosePackets(n) => Some(*n),
                _ => None,
            })
            .unwrap_or(0);
        let paged = match self.role {
            Role::FiveGc => Some(!self.has(&FakeFault::NoPaging)),
            _ => None,
        };
        Ok(PingStats {
            sent: count,
            received: count.saturating_sub(lost),
            paged,
        })
    }
}

#[async_trait]
impl UeControl for FakeElement {
    async fn attach(&mut self, timeout: Duration) -> Result<AttachInfo> {
        self.log("attach");
        if self.has(&FakeFault::AttachTimesOut) {
            tokio::time::sleep(timeout).await;
            return Err(Error::AttachTimeout {
                ue: self.name.clone(),
                secs: timeout.as_secs(),
            });
        }
        Ok(AttachInfo {
            imsi: format!("00101{:010}", self.index),
            ipv4: self.ue_address(),
            pdu_session_id: 1,
        })
    }
}

/// Factory handing out one scripted network per attempt
///
/// `None` entries make that attempt's connect fail. Once the script is
/// exhausted every attempt gets a healthy single-UE network.
pub struct FakeFactory {
    script: Mutex<VecDeque<Option<FakeNetwork>>>,
    connects: AtomicUsize,
}

impl FakeFactory {
    pub fn new(script: Vec<Option<FakeNetwork>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            connects: AtomicUsize::new(0),
        }
    }

    /// Number of element sets requested so far
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ElementFactory for FakeFactory {
    fn testbed(&self) -> &str {
        "fake"
    }

    async fn connect(&self) -> Result<ElementSet> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Some(FakeNetwork::new(1)));
        match next {
            Some(network) => Ok(network.elements()),
            None => Err(Error::ElementUnreachable {
                element: GNB_NAME.to_string(),
                endpoint: "local:fake".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            }),
        }
    }
}
