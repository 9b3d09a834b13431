//! Simulated UE/gNB/5GC state
//!
//! Models just enough of the network for scenarios to exercise the
//! orchestrator: start dependencies between elements, subscriber
//! provisioning, RRC inactivity and paging. Every element of one agent
//! shares this state.

use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use crate::common::config::{FIVEGC_NAME, GNB_NAME};
use crate::common::{Error, Result};
use crate::ipc::protocol::{
    AttachInfo, Definition, PingStats, Role, StartConfig, StatusResult, StopReport,
};

/// User-plane gateway address of the simulated 5GC
pub const CORE_ADDRESS: Ipv4Addr = Ipv4Addr::new(10, 45, 0, 1);

/// N2 address of the simulated gNB
pub const GNB_ADDRESS: Ipv4Addr = Ipv4Addr::new(127, 0, 1, 1);

/// Faults to inject, each counting down as it fires
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimFaults {
    /// Fail this many `start` requests
    #[serde(default)]
    pub start_failures: u32,
    /// Report an attach timeout on this many `attach` requests
    #[serde(default)]
    pub attach_timeouts: u32,
    /// Lose half the echo replies on this many `ping` requests
    #[serde(default)]
    pub lossy_pings: u32,
    /// Raise inside the application on this many requests
    #[serde(default)]
    pub remote_faults: u32,
    /// Report a warning on this many `stop` requests
    #[serde(default)]
    pub stop_warnings: u32,
    /// Hold every ping reply back this long (milliseconds)
    #[serde(default)]
    pub ping_delay_ms: u64,
}

fn take(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

/// Lifecycle state of a simulated element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for ElementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

struct SimUe {
    name: String,
    index: u8,
    state: ElementState,
    session: Option<AttachInfo>,
    last_activity: Instant,
}

impl SimUe {
    fn imsi(&self) -> String {
        format!("00101{:010}", self.index)
    }

    fn address(&self) -> Ipv4Addr {
        Ipv4Addr::new(10, 45, 1, self.index)
    }
}

/// Shared state of every simulated element
pub struct SimNetwork {
    ues: Vec<SimUe>,
    gnb: ElementState,
    core: ElementState,
    /// IMSIs provisioned in the 5GC
    subscribers: BTreeSet<String>,
    inactivity: Duration,
    faults: SimFaults,
    pages: u32,
}

impl SimNetwork {
    /// Network with the given UE names, indexed from 1
    ///
    /// The index is the last octet of the UE address, so at most 255 UEs fit.
    pub fn new(ue_names: &[String], faults: SimFaults) -> Result<Self> {
        let now = Instant::now();
        let ues = ue_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let index = u8::try_from(i + 1).map_err(|_| {
                    Error::Config(format!("Too many UEs: {} (at most 255)", ue_names.len()))
                })?;
                Ok(SimUe {
                    name: name.clone(),
                    index,
                    state: ElementState::Idle,
                    session: None,
                    last_activity: now,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            ues,
            gnb: ElementState::Idle,
            core: ElementState::Idle,
            subscribers: BTreeSet::new(),
            inactivity: Duration::from_secs(1),
            faults,
            pages: 0,
        })
    }

    /// Times the 5GC had to page an idle UE
    pub fn pages(&self) -> u32 {
        self.pages
    }

    /// Latency added to every ping reply
    pub fn ping_delay(&self) -> Duration {
        Duration::from_millis(self.faults.ping_delay_ms)
    }

    /// Consume one pending remote fault, if any
    pub fn take_remote_fault(&mut self) -> bool {
        take(&mut self.faults.remote_faults)
    }

    fn role_of(&self, element: &str) -> Result<Role> {
        match element {
            GNB_NAME => Ok(Role::Gnb),
            FIVEGC_NAME => Ok(Role::FiveGc),
            _ if self.ues.iter().any(|ue| ue.name == element) => Ok(Role::Ue),
            _ => Err(Error::Internal(format!("Unknown element '{}'", element))),
        }
    }

    fn ue_mut(&mut self, element: &str) -> Result<&mut SimUe> {
        self.ues
            .iter_mut()
            .find(|ue| ue.name == element)
            .ok_or_else(|| Error::Internal(format!("'{}' is not a UE", element)))
    }

    fn state_of(&self, element: &str) -> Result<ElementState> {
        match self.role_of(element)? {
            Role::Gnb => Ok(self.gnb),
            Role::FiveGc => Ok(self.core),
            Role::Ue => Ok(self
                .ues
                .iter()
                .find(|ue| ue.name == element)
                .map_or(ElementState::Idle, |ue| ue.state)),
        }
    }

    fn ue_is_idle(&self, ue: &SimUe, now: Instant) -> bool {
        ue.session.is_some() && now.duration_since(ue.last_activity) >= self.inactivity
    }

    pub fn definition(&self, element: &str) -> Result<Definition> {
        let role = self.role_of(element)?;
        let (address, imsi) = match role {
            Role::Gnb => (Some(IpAddr::V4(GNB_ADDRESS)), None),
            Role::FiveGc => (Some(IpAddr::V4(CORE_ADDRESS)), None),
            Role::Ue => {
                let ue = self.ues.iter().find(|ue| ue.name == element);
                (
                    ue.and_then(|ue| ue.session.as_ref()).map(|s| IpAddr::V4(s.ipv4)),
                    ue.map(SimUe::imsi),
                )
            }
        };
        Ok(Definition {
            name: element.to_string(),
            role,
            address,
            imsi,
        })
    }

    pub fn start(&mut self, element: &str, config: &StartConfig) -> Result<()> {
        let role = self.role_of(element)?;
        if self.state_of(element)? == ElementState::Running {
            return Err(Error::invalid_state(element, "start", "running"));
        }
        if take(&mut self.faults.start_failures) {
            return Err(Error::start_failed(element, "injected start failure"));
        }

        match role {
            Role::FiveGc => {
                self.subscribers = config
                    .peers
                    .iter()
                    .filter(|peer| peer.role == Role::Ue)
                    .filter_map(|peer| peer.imsi.clone())
                    .collect();
                self.inactivity = Duration::from_secs(u64::from(config.variant.inactivity_timer));
                self.core = ElementState::Running;
                tracing::info!(
                    subscribers = self.subscribers.len(),
                    inactivity_secs = config.variant.inactivity_timer,
                    "5GC started"
                );
            }
            Role::Gnb => {
                if !config.peers.iter().any(|peer| peer.role == Role::FiveGc) {
                    return Err(Error::start_failed(element, "no 5GC given"));
                }
                if self.core != ElementState::Running {
                    return Err(Error::start_failed(element, "NG setup failed, 5GC not running"));
                }
                self.gnb = ElementState::Running;
                tracing::info!(
                    band = config.variant.band,
                    bandwidth = config.variant.bandwidth,
                    sample_rate = config.variant.sample_rate,
                    "gNB started"
                );
            }
            Role::Ue => {
                if self.gnb != ElementState::Running {
                    return Err(Error::start_failed(element, "no cell found"));
                }
                let ue = self.ue_mut(element)?;
                ue.state = ElementState::Running;
                ue.session = None;
                tracing::info!(ue = element, "UE started");
            }
        }
        Ok(())
    }

    pub fn attach(&mut self, element: &str, timeout_secs: u64) -> Result<AttachInfo> {
        if self.role_of(element)? != Role::Ue {
            return Err(Error::invalid_state(element, "attach", "not a UE"));
        }
        let state = self.state_of(element)?;
        if state != ElementState::Running {
            return Err(Error::invalid_state(element, "attach", &state.to_string()));
        }
        if take(&mut self.faults.attach_timeouts) || self.gnb != ElementState::Running {
            return Err(Error::AttachTimeout {
                ue: element.to_string(),
                secs: timeout_secs,
            });
        }

        let core_running = self.core == ElementState::Running;
        let provisioned = self.subscribers.clone();
        let ue = self.ue_mut(element)?;
        let imsi = ue.imsi();
        if !core_running {
            return Err(Error::AttachRejected {
                ue: element.to_string(),
                reason: "5GC not running".to_string(),
            });
        }
        if !provisioned.contains(&imsi) {
            return Err(Error::AttachRejected {
                ue: element.to_string(),
                reason: format!("IMSI {} not provisioned", imsi),
            });
        }

        let info = AttachInfo {
            imsi,
            ipv4: ue.address(),
            pdu_session_id: 1,
        };
        ue.session = Some(info.clone());
        ue.last_activity = Instant::now();
        tracing::info!(ue = element, ip = %info.ipv4, "UE attached");
        Ok(info)
    }

    pub fn ping(&mut self, element: &str, target: IpAddr, count: u32) -> Result<PingStats> {
        let role = self.role_of(element)?;
        let state = self.state_of(element)?;
        if state != ElementState::Running {
            return Err(Error::invalid_state(element, "ping", &state.to_string()));
        }

        let now = Instant::now();
        let radio_up = self.gnb == ElementState::Running && self.core == ElementState::Running;
        let lossy = take(&mut self.faults.lossy_pings);
        let inactivity = self.inactivity;

        let (reachable, paged) = match role {
            Role::Ue => {
                let ue = self.ue_mut(element)?;
                if ue.session.is_none() {
                    return Err(Error::invalid_state(element, "ping", "detached"));
                }
                if now.duration_since(ue.last_activity) >= inactivity {
                    tracing::info!(ue = element, "Service request from idle UE");
                }
                ue.last_activity = now;
                (radio_up && target == IpAddr::V4(CORE_ADDRESS), None)
            }
            Role::FiveGc => {
                let position = self.ues.iter().position(|ue| {
                    ue.session
                        .as_ref()
                        .is_some_and(|s| IpAddr::V4(s.ipv4) == target)
                });
                match position {
                    Some(i) => {
                        let idle = self.ue_is_idle(&self.ues[i], now);
                        if idle {
                            self.pages += 1;
                            tracing::info!(ue = %self.ues[i].name, "Paging idle UE");
                        }
                        self.ues[i].last_activity = now;
                        (radio_up, Some(idle))
                    }
                    None => (false, None),
                }
            }
            Role::Gnb => return Err(Error::invalid_state(element, "ping", "a gNB")),
        };

        let received = match (reachable, lossy) {
            (false, _) => 0,
            (true, true) => count / 2,
            (true, false) => count,
        };

        Ok(PingStats {
            sent: count,
            received,
            paged,
        })
    }

    /// Stop an element; stopping twice is harmless
    pub fn stop(&mut self, element: &str) -> Result<StopReport> {
        let role = self.role_of(element)?;
        let mut report = StopReport {
            artifacts: vec![format!("{}.log", element)],
            ..StopReport::default()
        };
        if take(&mut self.faults.stop_warnings) {
            report.warnings += 1;
        }

        match role {
            Role::Ue => {
                let ue = self.ue_mut(element)?;
                ue.state = ElementState::Stopped;
                ue.session = None;
            }
            Role::Gnb => {
                let attached = self
                    .ues
                    .iter()
                    .filter(|ue| ue.state == ElementState::Running)
                    .count() as u32;
                // UEs still camping lose their cell
                report.warnings += attached;
                self.gnb = ElementState::Stopped;
            }
            Role::FiveGc => {
                if self.gnb == ElementState::Running {
                    report.warnings += 1;
                }
                self.core = ElementState::Stopped;
                self.subscribers.clear();
            }
        }

        tracing::info!(element, warnings = report.warnings, "Element stopped");
        Ok(report)
    }

    pub fn status(&self, element: &str) -> Result<StatusResult> {
        let role = self.role_of(element)?;
        let now = Instant::now();
        let rrc = match role {
            Role::Ue => self
                .ues
                .iter()
                .find(|ue| ue.name == element)
                .filter(|ue| ue.session.is_some())
                .map(|ue| {
                    if self.ue_is_idle(ue, now) {
                        "idle".to_string()
                    } else {
                        "connected".to_string()
                    }
                }),
            _ => None,
        };
        Ok(StatusResult {
            name: element.to_string(),
            role,
            state: self.state_of(element)?.to_string(),
            rrc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Scenario;

    fn network(faults: SimFaults) -> SimNetwork {
        SimNetwork::new(&["ue-1".to_string()], faults).unwrap()
    }

    fn config(net: &SimNetwork, peers: &[&str]) -> StartConfig {
        StartConfig {
            variant: Scenario::paging().variants().unwrap().remove(0),
            peers: peers.iter().map(|p| net.definition(p).unwrap()).collect(),
        }
    }

    fn bring_up(net: &mut SimNetwork) -> AttachInfo {
        let core = config(net, &["ue-1"]);
        net.start(FIVEGC_NAME, &core).unwrap();
        let gnb = config(net, &[FIVEGC_NAME]);
        net.start(GNB_NAME, &gnb).unwrap();
        let ue = config(net, &[GNB_NAME, FIVEGC_NAME]);
        net.start("ue-1", &ue).unwrap();
        net.attach("ue-1", 10).unwrap()
    }

    #[tokio::test]
    async fn test_ue_addresses_fit_one_octet() {
        let names: Vec<String> = (1..=255).map(crate::common::config::ue_name).collect();
        let net = SimNetwork::new(&names, SimFaults::default()).unwrap();
        assert_eq!(net.ues.last().unwrap().address(), Ipv4Addr::new(10, 45, 1, 255));

        let names: Vec<String> = (1..=256).map(crate::common::config::ue_name).collect();
        assert!(SimNetwork::new(&names, SimFaults::default()).is_err());
    }

    #[tokio::test]
    async fn test_start_order_is_enforced() {
        let mut net = network(SimFaults::default());
        let gnb = config(&net, &[FIVEGC_NAME]);
        let err = net.start(GNB_NAME, &gnb).unwrap_err();
        assert!(err.to_string().contains("failed to start"));

        let ue = config(&net, &[GNB_NAME]);
        assert!(net.start("ue-1", &ue).is_err());
    }

    #[tokio::test]
    async fn test_attach_requires_provisioned_imsi() {
        let mut net = network(SimFaults::default());
        let core = config(&net, &[]);
        net.start(FIVEGC_NAME, &core).unwrap();
        let gnb = config(&net, &[FIVEGC_NAME]);
        net.start(GNB_NAME, &gnb).unwrap();
        let ue = config(&net, &[GNB_NAME]);
        net.start("ue-1", &ue).unwrap();

        let err = net.attach("ue-1", 10).unwrap_err();
        assert!(matches!(err, Error::AttachRejected { .. }), "{}", err);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_ue_is_paged_by_core_ping() {
        let mut net = network(SimFaults::default());
        let info = bring_up(&mut net);
        assert_eq!(info.ipv4, Ipv4Addr::new(10, 45, 1, 1));

        let stats = net.ping("ue-1", IpAddr::V4(CORE_ADDRESS), 10).unwrap();
        assert_eq!(stats.received, 10);
        assert_eq!(net.status("ue-1").unwrap().rrc.as_deref(), Some("connected"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(net.status("ue-1").unwrap().rrc.as_deref(), Some("idle"));

        let stats = net.ping(FIVEGC_NAME, IpAddr::V4(info.ipv4), 10).unwrap();
        assert_eq!(stats.received, 10);
        assert_eq!(stats.paged, Some(true));
        assert_eq!(net.pages(), 1);

        // Connected again right after paging
        let stats = net.ping(FIVEGC_NAME, IpAddr::V4(info.ipv4), 10).unwrap();
        assert_eq!(stats.paged, Some(false));
    }

    #[tokio::test]
    async fn test_faults_count_down() {
        let mut net = network(SimFaults {
            lossy_pings: 1,
            ..SimFaults::default()
        });
        bring_up(&mut net);

        let target = IpAddr::V4(CORE_ADDRESS);
        assert_eq!(net.ping("ue-1", target, 10).unwrap().received, 5);
        assert_eq!(net.ping("ue-1", target, 10).unwrap().received, 10);
    }

    #[tokio::test]
    async fn test_injected_attach_timeout() {
        let mut net = network(SimFaults {
            attach_timeouts: 1,
            ..SimFaults::default()
        });
        let core = config(&net, &["ue-1"]);
        net.start(FIVEGC_NAME, &core).unwrap();
        let gnb = config(&net, &[FIVEGC_NAME]);
        net.start(GNB_NAME, &gnb).unwrap();
        let ue = config(&net, &[GNB_NAME, FIVEGC_NAME]);
        net.start("ue-1", &ue).unwrap();

        assert!(matches!(
            net.attach("ue-1", 7).unwrap_err(),
            Error::AttachTimeout { secs: 7, .. }
        ));
        assert!(net.attach("ue-1", 7).is_ok());
    }

    #[tokio::test]
    async fn test_stop_order_affects_warnings() {
        let mut net = network(SimFaults::default());
        bring_up(&mut net);
        assert_eq!(net.stop("ue-1").unwrap().warnings, 0);
        assert_eq!(net.stop(GNB_NAME).unwrap().warnings, 0);
        let report = net.stop(FIVEGC_NAME).unwrap();
        assert_eq!(report.warnings, 0);
        assert_eq!(report.artifacts, vec!["5gc.log"]);

        let mut net = network(SimFaults::default());
        bring_up(&mut net);
        assert_eq!(net.stop(FIVEGC_NAME).unwrap().warnings, 1);
    }
}
