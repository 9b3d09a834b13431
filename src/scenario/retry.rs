//! Retry/flake policy
//!
//! Wraps whole executions of one variant. A failed execution is classified
//! by its [`ErrorKind`] (and optionally by message text, for failure
//! wording inherited from older test logs); retryable failures are
//! re-executed from scratch with a fresh element set while budget remains.

use std::collections::BTreeSet;

use tokio::time::Instant;

use crate::common::config::RetryConfig;
use crate::common::error::ErrorKind;
use crate::element::ElementFactory;

use super::config::Scenario;
use super::executor::{ExecutorOptions, ScenarioExecutor};
use super::report::{AttemptReport, FailureInfo, ScenarioReport, Verdict};
use super::variant::Variant;

/// Decides whether a failed execution is worth another attempt
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    budget: u32,
    retry_on: BTreeSet<ErrorKind>,
    retry_on_messages: Vec<String>,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            budget: config.budget,
            retry_on: config.retry_on.iter().copied().collect(),
            retry_on_messages: config.retry_on_messages.clone(),
        }
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            budget: 0,
            retry_on: BTreeSet::new(),
            retry_on_messages: Vec::new(),
        }
    }

    /// Override the number of re-executions
    pub fn with_budget(mut self, budget: u32) -> Self {
        self.budget = budget;
        self
    }

    /// Re-executions allowed after the first attempt
    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn is_retryable(&self, failure: &FailureInfo) -> bool {
        self.retry_on.contains(&failure.kind)
            || self
                .retry_on_messages
                .iter()
                .any(|pattern| failure.message.contains(pattern.as_str()))
    }
}

/// Run one variant under the retry policy
///
/// Every attempt gets its own element set from `factory`; nothing carries
/// over between attempts. The reported failure is the last attempt's,
/// unchanged.
pub async fn run_variant(
    scenario: &Scenario,
    variant: &Variant,
    factory: &dyn ElementFactory,
    policy: &RetryPolicy,
    options: ExecutorOptions,
) -> ScenarioReport {
    let started = Instant::now();
    let variant_id = variant.id();
    let mut attempts: Vec<AttemptReport> = Vec::new();

    loop {
        let number = attempts.len() as u32 + 1;
        let attempt_started = Instant::now();

        let mut attempt = match factory.connect().await {
            Ok(elements) => {
                ScenarioExecutor::new(scenario, variant, elements, options)
                    .run()
                    .await
            }
            Err(e) => {
                tracing::warn!(
                    variant = %variant_id,
                    testbed = factory.testbed(),
                    "Cannot connect to the testbed: {}",
                    e
                );
                AttemptReport::connect_failure(&e, attempt_started.elapsed().as_millis() as u64)
            }
        };
        attempt.attempt = number;

        let retry = match (&attempt.verdict, &attempt.failure) {
            (Verdict::Failed, Some(failure)) => {
                let retries_used = number - 1;
                if !policy.is_retryable(failure) {
                    tracing::info!(
                        variant = %variant_id,
                        kind = %failure.kind,
                        "Failure is not retryable"
                    );
                    false
                } else if retries_used >= policy.budget() {
                    tracing::info!(
                        variant = %variant_id,
                        attempts = number,
                        "Retry budget exhausted"
                    );
                    false
                } else {
                    tracing::warn!(
                        variant = %variant_id,
                        attempt = number,
                        kind = %failure.kind,
                        "Retrying after flaky failure: {}",
                        failure.message
                    );
                    true
                }
            }
            _ => false,
        };

        attempts.push(attempt);
        if !retry {
            break;
        }
    }

    let (verdict, failure) = match attempts.last() {
        Some(last) => (last.verdict, last.failure.clone()),
        None => (Verdict::Failed, None),
    };

    ScenarioReport {
        scenario: scenario.name.clone(),
        variant_id,
        variant: variant.clone(),
        testbed: factory.testbed().to_string(),
        verdict,
        retried: attempts.len() > 1,
        attempts,
        failure,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::fake::{FakeFactory, FakeFault, FakeNetwork};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(&RetryConfig::default())
    }

    async fn run(factory: &FakeFactory, policy: &RetryPolicy) -> ScenarioReport {
        let scenario = Scenario::paging();
        let variant = scenario.variants().unwrap().remove(0);
        run_variant(
            &scenario,
            &variant,
            factory,
            policy,
            ExecutorOptions::default(),
        )
        .await
    }

    fn failure(kind: ErrorKind, message: &str) -> FailureInfo {
        FailureInfo {
            step: "attach".to_string(),
            kind,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_classification_by_kind_and_message() {
        let policy = RetryPolicy::new(&RetryConfig {
            budget: 2,
            retry_on: vec![ErrorKind::Attach],
            retry_on_messages: vec!["Some packages got lost".to_string()],
        });
        assert!(policy.is_retryable(&failure(ErrorKind::Attach, "x")));
        assert!(!policy.is_retryable(&failure(ErrorKind::Shutdown, "x")));
        assert!(policy.is_retryable(&failure(
            ErrorKind::Verification,
            "Some packages got lost: 5gc->ue"
        )));
        assert!(!RetryPolicy::none().is_retryable(&failure(ErrorKind::Attach, "x")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_passing_run_is_not_retried() {
        let factory = FakeFactory::new(vec![]);
        let report = run(&factory, &policy()).await;
        assert!(report.passed());
        assert!(!report.retried);
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(factory.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_timeout_retried_once_then_passes() {
        let flaky = FakeNetwork::new(1).with_fault("ue-1", FakeFault::AttachTimesOut);
        let healthy = FakeNetwork::new(1);
        let factory = FakeFactory::new(vec![Some(flaky.clone()), Some(healthy.clone())]);

        let report = run(&factory, &policy()).await;

        assert!(report.passed());
        assert!(report.retried);
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.attempts[0].failure.as_ref().unwrap().kind, ErrorKind::Attach);
        assert_eq!(report.attempts[1].attempt, 2);
        // The second attempt used its own handles
        assert_eq!(flaky.closed(), 3);
        assert_eq!(healthy.closed(), 3);
        assert!(report.attempts.iter().all(|a| a.teardown_runs() == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_bounds_reexecutions() {
        let flaky = || Some(FakeNetwork::new(1).with_fault("ue-1", FakeFault::AttachTimesOut));
        let factory = FakeFactory::new(vec![flaky(), flaky(), flaky(), flaky()]);

        let report = run(&factory, &policy()).await;

        assert!(!report.passed());
        assert_eq!(report.attempts.len(), 3);
        assert_eq!(factory.connects(), 3);
        let last = report.attempts.last().unwrap().failure.clone();
        assert_eq!(report.failure, last);
        assert_eq!(report.failure.unwrap().kind, ErrorKind::Attach);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_runs_once() {
        let broken = FakeNetwork::new(1).with_fault("5gc", FakeFault::StopErrors(1));
        let factory = FakeFactory::new(vec![Some(broken)]);

        let report = run(&factory, &policy()).await;

        assert!(!report.passed());
        assert!(!report.retried);
        assert_eq!(factory.connects(), 1);
        assert_eq!(report.failure.unwrap().kind, ErrorKind::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_is_retried_with_fresh_connect() {
        let factory = FakeFactory::new(vec![None]);
        let report = run(&factory, &policy()).await;

        assert!(report.passed());
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(
            report.attempts[0].failure.as_ref().unwrap().kind,
            ErrorKind::Connection
        );
        assert_eq!(factory.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_variant_twice_gives_same_outcome_class() {
        let cases: Vec<(&str, Option<(&str, FakeFault)>)> = vec![
            ("healthy", None),
            ("attach timeout", Some(("ue-1", FakeFault::AttachTimesOut))),
            ("packet loss", Some(("5gc", FakeFault::LosePackets(3)))),
        ];

        for (case, fault) in cases {
            let network = || match &fault {
                Some((element, f)) => FakeNetwork::new(1).with_fault(element, f.clone()),
                None => FakeNetwork::new(1),
            };
            let first_net = network();
            let second_net = network();
            let first = run(&FakeFactory::new(vec![Some(first_net.clone())]), &RetryPolicy::none()).await;
            let second = run(&FakeFactory::new(vec![Some(second_net.clone())]), &RetryPolicy::none()).await;

            assert_eq!(first.verdict, second.verdict, "{}", case);
            assert_eq!(
                first.failure.as_ref().map(|f| (f.kind, f.step.clone())),
                second.failure.as_ref().map(|f| (f.kind, f.step.clone())),
                "{}",
                case
            );
            assert_eq!(first.verdict == Verdict::Passed, fault.is_none(), "{}", case);
            // Each run closed only its own handles
            assert_eq!(first_net.closed(), 3, "{}", case);
            assert_eq!(second_net.closed(), 3, "{}", case);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_never_retries() {
        let flaky = FakeNetwork::new(1).with_fault("ue-1", FakeFault::AttachTimesOut);
        let factory = FakeFactory::new(vec![Some(flaky)]);
        let report = run(&factory, &policy().with_budget(0)).await;
        assert_eq!(report.attempts.len(), 1);
        assert!(!report.retried);
    }
}
