//! Remote element handles
//!
//! A handle is a typed reference to one live UE, gNB or 5GC control agent.
//! Handles are created per scenario execution by an [`ElementFactory`],
//! owned exclusively by the executor that runs with them, and closed when
//! that execution ends. Nothing is shared between executions.

#[cfg(test)]
pub(crate) mod fake;
mod rpc;

pub use rpc::{RpcElement, RpcFactory};

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::common::Result;
use crate::ipc::protocol::{AttachInfo, Definition, PingStats, Role, StartConfig, StopReport};

/// Local view of an element's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    /// Connected, not started yet
    Idle,
    /// Start accepted by the element
    Running,
    /// Stop completed (cleanly or not)
    Stopped,
    /// A lifecycle call failed; the element state is unknown
    Failed,
}

impl fmt::Display for HandleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Flags for stopping an element
#[derive(Debug, Clone, Copy, Default)]
pub struct StopFlags {
    /// Treat warnings reported by the element as teardown errors
    pub warnings_as_errors: bool,
}

/// Lifecycle operations shared by every element
#[async_trait]
pub trait RemoteElement: Send {
    /// Element name (e.g. "ue-1", "gnb", "5gc")
    fn name(&self) -> &str;

    fn role(&self) -> Role;

    fn status(&self) -> HandleStatus;

    /// Fetch the element's definition
    async fn definition(&mut self) -> Result<Definition>;

    /// Bring the element up
    async fn start(&mut self, config: &StartConfig) -> Result<()>;

    /// Tear the element down
    async fn stop(&mut self, flags: StopFlags) -> Result<StopReport>;

    /// Release the control connection; the handle is unusable afterwards
    async fn close(&mut self);
}

/// Elements that can originate echo traffic (UE and 5GC)
#[async_trait]
pub trait PingSource: RemoteElement {
    async fn ping(&mut self, target: IpAddr, count: u32) -> Result<PingStats>;
}

/// UE-specific operations
#[async_trait]
pub trait UeControl: PingSource {
    /// Register with the network, waiting at most `timeout`
    async fn attach(&mut self, timeout: Duration) -> Result<AttachInfo>;
}

/// The full set of handles one scenario execution runs with
pub struct ElementSet {
    pub ues: Vec<Box<dyn UeControl>>,
    pub gnb: Box<dyn RemoteElement>,
    pub core: Box<dyn PingSource>,
}

impl ElementSet {
    /// Names of every element, UEs first
    pub fn names(&self) -> Vec<String> {
        self.ues
            .iter()
            .map(|ue| ue.name().to_string())
            .chain([self.gnb.name().to_string(), self.core.name().to_string()])
            .collect()
    }

    /// Close every control connection
    pub async fn close(&mut self) {
        for ue in &mut self.ues {
            ue.close().await;
        }
        self.gnb.close().await;
        self.core.close().await;
    }
}

/// Creates a fresh [`ElementSet`] for every execution attempt
#[async_trait]
pub trait ElementFactory: Send + Sync {
    /// Testbed name used in logs and reports
    fn testbed(&self) -> &str;

    /// Connect to every element of the testbed
    async fn connect(&self) -> Result<ElementSet>;
}
