//! Scenario step library
//!
//! Each step composes handle calls with the checks that make the step pass
//! or fail. Steps stop at the first failing call; the executor attaches the
//! step label to whatever error comes back.

use std::net::IpAddr;
use std::time::Duration;

use crate::common::{Error, Result};
use crate::element::{ElementSet, HandleStatus, RemoteElement, StopFlags};
use crate::ipc::protocol::{PingStats, StartConfig};

use super::config::PingDirection;
use super::report::AttachResult;
use super::variant::Variant;

/// Start the 5GC with every UE provisioned, then the gNB pointing at it
pub async fn start_network(elements: &mut ElementSet, variant: &Variant) -> Result<()> {
    let mut subscribers = Vec::with_capacity(elements.ues.len());
    for ue in &mut elements.ues {
        subscribers.push(ue.definition().await?);
    }

    elements
        .core
        .start(&StartConfig {
            variant: variant.clone(),
            peers: subscribers,
        })
        .await?;

    let core = elements.core.definition().await?;
    elements
        .gnb
        .start(&StartConfig {
            variant: variant.clone(),
            peers: vec![core],
        })
        .await?;

    tracing::info!(variant = %variant.id(), "Network started");
    Ok(())
}

/// Start every UE against the running network and wait for each to attach
pub async fn attach(
    elements: &mut ElementSet,
    variant: &Variant,
    timeout: Duration,
) -> Result<AttachResult> {
    let gnb = elements.gnb.definition().await?;
    let core = elements.core.definition().await?;
    let config = StartConfig {
        variant: variant.clone(),
        peers: vec![gnb, core],
    };

    for ue in &mut elements.ues {
        ue.start(&config).await?;
    }

    let mut result = AttachResult::new();
    for ue in &mut elements.ues {
        let info = ue.attach(timeout).await?;
        tracing::info!(ue = ue.name(), imsi = %info.imsi, ip = %info.ipv4, "UE attached");
        result.insert(ue.name().to_string(), info);
    }

    Ok(result)
}

/// Parameters of a ping step
#[derive(Debug, Clone, Copy)]
pub struct PingCheck {
    pub direction: PingDirection,
    pub packets: u32,
    /// Minimum share of replies, in percent
    pub min_success: u8,
    pub expect_paging: bool,
}

/// Exchange echo traffic between every UE and the 5GC
pub async fn ping(elements: &mut ElementSet, attach: &AttachResult, check: &PingCheck) -> Result<()> {
    match check.direction {
        PingDirection::UeToCore => {
            let core = elements.core.definition().await?;
            let target = core.address.ok_or_else(|| {
                Error::Verification(format!("{} reported no gateway address", core.name))
            })?;
            for ue in &mut elements.ues {
                let stats = ue.ping(target, check.packets).await?;
                verify(check, ue.name(), &core.name, &stats)?;
            }
        }
        PingDirection::CoreToUe => {
            let names: Vec<String> = elements.ues.iter().map(|ue| ue.name().to_string()).collect();
            for name in names {
                let info = attach.get(&name).ok_or_else(|| {
                    Error::Verification(format!("{} has no address, it never attached", name))
                })?;
                let stats = elements
                    .core
                    .ping(IpAddr::V4(info.ipv4), check.packets)
                    .await?;
                verify(check, elements.core.name(), &name, &stats)?;
            }
        }
    }
    Ok(())
}

fn verify(check: &PingCheck, source: &str, target: &str, stats: &PingStats) -> Result<()> {
    tracing::debug!(
        source,
        target,
        sent = stats.sent,
        received = stats.received,
        paged = ?stats.paged,
        "Ping finished"
    );

    if stats.sent == 0 || stats.success_percent() < f64::from(check.min_success) {
        return Err(Error::PacketLoss {
            direction: check.direction.to_string(),
            source_name: source.to_string(),
            target: target.to_string(),
            sent: stats.sent,
            received: stats.received,
            required: check.min_success,
        });
    }

    if check.expect_paging && stats.paged == Some(false) {
        return Err(Error::Verification(format!(
            "{} reached {} without paging it",
            source, target
        )));
    }

    Ok(())
}

/// Fixed sleep
pub async fn wait(seconds: f64) -> Result<()> {
    let duration = Duration::try_from_secs_f64(seconds)
        .map_err(|e| Error::Config(format!("Cannot wait {} seconds: {}", seconds, e)))?;
    tracing::debug!("Waiting {} seconds", seconds);
    tokio::time::sleep(duration).await;
    Ok(())
}

/// What teardown produced
#[derive(Debug, Default)]
pub struct StopSummary {
    pub artifacts: Vec<String>,
    /// First problem met while stopping
    pub error: Option<Error>,
}

/// Stop the UEs, then the gNB, then the 5GC
///
/// Every element that was started gets stopped, even after an earlier stop
/// failed.
pub async fn stop(elements: &mut ElementSet, flags: StopFlags) -> StopSummary {
    let mut summary = StopSummary::default();
    for ue in &mut elements.ues {
        stop_one(ue.as_mut(), flags, &mut summary).await;
    }
    stop_one(elements.gnb.as_mut(), flags, &mut summary).await;
    stop_one(elements.core.as_mut(), flags, &mut summary).await;
    summary
}

async fn stop_one<E>(element: &mut E, flags: StopFlags, summary: &mut StopSummary)
where
    E: RemoteElement + ?Sized,
{
    match element.status() {
        HandleStatus::Idle | HandleStatus::Stopped => {
            tracing::debug!(element = element.name(), status = %element.status(), "Nothing to stop");
            return;
        }
        HandleStatus::Running | HandleStatus::Failed => {}
    }

    let result = match element.stop(flags).await {
        Ok(report) => {
            summary.artifacts.extend(report.artifacts.iter().cloned());
            if report.errors > 0 {
                Err(Error::shutdown(
                    element.name(),
                    format!("{} errors logged", report.errors),
                ))
            } else if flags.warnings_as_errors && report.warnings > 0 {
                Err(Error::shutdown(
                    element.name(),
                    format!("{} warnings logged", report.warnings),
                ))
            } else {
                if report.warnings > 0 {
                    tracing::warn!(element = element.name(), warnings = report.warnings, "Element logged warnings");
                }
                Ok(())
            }
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        tracing::warn!(element = element.name(), "Stop failed: {}", e);
        if summary.error.is_none() {
            summary.error = Some(e);
        }
    }
}
