//! Element handles backed by the control protocol

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::common::config::{Testbed, Timeouts, FIVEGC_NAME, GNB_NAME};
use crate::common::{Error, Result};
use crate::ipc::protocol::{
    AttachInfo, Command, Definition, PingStats, Role, StartConfig, StopReport,
};
use crate::ipc::{ElementClient, Endpoint};

use super::{ElementFactory, ElementSet, HandleStatus, PingSource, RemoteElement, StopFlags, UeControl};

/// Handle to an element reached through the control protocol
pub struct RpcElement {
    name: String,
    role: Role,
    status: HandleStatus,
    endpoint: Endpoint,
    timeouts: Timeouts,
    client: Option<ElementClient>,
}

impl RpcElement {
    /// Connect to an element control agent
    pub async fn connect(
        name: &str,
        role: Role,
        endpoint: &Endpoint,
        timeouts: &Timeouts,
    ) -> Result<Self> {
        let client =
            ElementClient::connect(name, endpoint, timeouts.connect(), timeouts.request()).await?;
        Ok(Self {
            name: name.to_string(),
            role,
            status: HandleStatus::Idle,
            endpoint: endpoint.clone(),
            timeouts: timeouts.clone(),
            client: Some(client),
        })
    }

    /// Replace a connection whose last request was cut off
    ///
    /// The old stream may still carry an unread reply, so it is dropped
    /// rather than reused.
    async fn redial_if_poisoned(&mut self) -> Result<()> {
        if !self.client.as_ref().is_some_and(ElementClient::is_poisoned) {
            return Ok(());
        }
        tracing::info!(element = %self.name, endpoint = %self.endpoint, "Redialing element after an abandoned request");
        self.client = None;
        let client = ElementClient::connect(
            &self.name,
            &self.endpoint,
            self.timeouts.connect(),
            self.timeouts.request(),
        )
        .await?;
        self.client = Some(client);
        Ok(())
    }

    fn client(&mut self) -> Result<&mut ElementClient> {
        let name = &self.name;
        self.client.as_mut().ok_or_else(|| Error::ConnectionLost {
            element: name.clone(),
            reason: "handle already closed".to_string(),
        })
    }
}

#[async_trait]
impl RemoteElement for RpcElement {
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
        self.client()?.request(Command::GetDefinition).await
    }

    async fn start(&mut self, config: &StartConfig) -> Result<()> {
        let result = self
            .client()?
            .send_command(Command::Start {
                config: config.clone(),
            })
            .await;

        match result {
            Ok(_) => {
                self.status = HandleStatus::Running;
                tracing::debug!(element = %self.name, "Element started");
                Ok(())
            }
            Err(e) => {
                self.status = HandleStatus::Failed;
                Err(e)
            }
        }
    }

    async fn stop(&mut self, flags: StopFlags) -> Result<StopReport> {
        if let Err(e) = self.redial_if_poisoned().await {
            self.status = HandleStatus::Failed;
            return Err(e);
        }
        let result = self
            .client()?
            .request::<StopReport>(Command::Stop {
                warnings_as_errors: flags.warnings_as_errors,
            })
            .await;

        match result {
            Ok(report) => {
                self.status = HandleStatus::Stopped;
                Ok(report)
            }
            Err(e) => {
                self.status = HandleStatus::Failed;
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        if self.client.take().is_some() {
            tracing::trace!(element = %self.name, "Closed control connection");
        }
    }
}

#[async_trait]
impl PingSource for RpcElement {
    async fn ping(&mut self, target: IpAddr, count: u32) -> Result<PingStats> {
        // Each echo may take up to a second on a paged UE
        let timeout = Duration::from_secs(u64::from(count) + 30);
        self.client()?
            .request_with_timeout(Command::Ping { target, count }, timeout)
            .await
    }
}

#[async_trait]
impl UeControl for RpcElement {
    async fn attach(&mut self, timeout: Duration) -> Result<AttachInfo> {
        let secs = timeout.as_secs().max(1);
        let name = self.name.clone();
        // Leave the element room to report its own attach timeout first
        let rpc_timeout = timeout.saturating_add(Duration::from_secs(5));
        let result = self
            .client()?
            .request_with_timeout(Command::Attach { timeout_secs: secs }, rpc_timeout)
            .await;

        match result {
            Err(Error::Timeout { .. }) => Err(Error::AttachTimeout { ue: name, secs }),
            other => other,
        }
    }
}

/// Factory connecting handles to one configured testbed
pub struct RpcFactory {
    testbed: Testbed,
    timeouts: Timeouts,
}

impl RpcFactory {
    pub fn new(testbed: Testbed, timeouts: Timeouts) -> Self {
        Self { testbed, timeouts }
    }
}

#[async_trait]
impl ElementFactory for RpcFactory {
    fn testbed(&self) -> &str {
        &self.testbed.name
    }

    async fn connect(&self) -> Result<ElementSet> {
        let mut ues: Vec<Box<dyn UeControl>> = Vec::with_capacity(self.testbed.ues.len());
        for (name, endpoint) in self.testbed.ue_names().iter().zip(&self.testbed.ues) {
            let ue = RpcElement::connect(name, Role::Ue, endpoint, &self.timeouts).await?;
            ues.push(Box::new(ue));
        }

        let gnb = RpcElement::connect(GNB_NAME, Role::Gnb, &self.testbed.gnb, &self.timeouts).await?;
        let core =
            RpcElement::connect(FIVEGC_NAME, Role::FiveGc, &self.testbed.fivegc, &self.timeouts)
                .await?;

        Ok(ElementSet {
            ues,
            gnb: Box::new(gnb),
            core: Box::new(core),
        })
    }
}
