//! Matrix runner
//!
//! Spreads the variants of a scenario over the configured testbeds. Each
//! testbed gets one worker task that runs its share of variants one after
//! the other; workers share nothing but the read-only scenario and policy.

use std::sync::Arc;

use tokio::task::JoinSet;

use crate::common::{Error, Result};
use crate::element::ElementFactory;

use super::config::Scenario;
use super::executor::ExecutorOptions;
use super::report::ScenarioReport;
use super::retry::{run_variant, RetryPolicy};
use super::variant::Variant;

/// Run every variant, returning reports in matrix order
pub async fn run_matrix(
    scenario: Arc<Scenario>,
    variants: Vec<Variant>,
    factories: Vec<Arc<dyn ElementFactory>>,
    policy: Arc<RetryPolicy>,
    options: ExecutorOptions,
) -> Result<Vec<ScenarioReport>> {
    if factories.is_empty() {
        return Err(Error::Config("No testbed configured".to_string()));
    }

    let workers = factories.len().min(variants.len().max(1));
    let mut shares: Vec<Vec<(usize, Variant)>> = vec![Vec::new(); workers];
    for (index, variant) in variants.into_iter().enumerate() {
        shares[index % workers].push((index, variant));
    }

    tracing::info!(
        scenario = %scenario.name,
        testbeds = workers,
        "Running parameter matrix"
    );

    let mut tasks = JoinSet::new();
    for (factory, share) in factories.into_iter().zip(shares) {
        let scenario = Arc::clone(&scenario);
        let policy = Arc::clone(&policy);
        tasks.spawn(async move {
            let mut reports = Vec::with_capacity(share.len());
            for (index, variant) in share {
                let report =
                    run_variant(&scenario, &variant, factory.as_ref(), &policy, options).await;
                reports.push((index, report));
            }
            reports
        });
    }

    let mut reports = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let finished =
            joined.map_err(|e| Error::Internal(format!("Testbed worker crashed: {}", e)))?;
        reports.extend(finished);
    }

    reports.sort_by_key(|(index, _)| *index);
    Ok(reports.into_iter().map(|(_, report)| report).collect())
}
