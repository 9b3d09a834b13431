//! Scenario executor
//!
//! Runs one variant of a scenario against one set of element handles. Steps
//! run strictly in declared order, the phase trace only ever moves forward,
//! and teardown runs exactly once per execution, also when a step failed or
//! the deadline expired.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::common::config::Timeouts;
use crate::common::{Error, Result};
use crate::element::{ElementSet, StopFlags};

use super::config::{Scenario, Step};
use super::report::{
    AttachResult, AttemptReport, FailureInfo, StepOutcome, StepRecord, Verdict, TEARDOWN_LABEL,
};
use super::steps::{self, PingCheck};
use super::variant::Variant;

/// Execution phase of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Configuring,
    NetworkStarting,
    Attaching,
    Verifying,
    /// Waiting for the UE to go idle so the next transfer pages it
    Paging,
    VerifyingAgain,
    Stopping,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuring => "configuring",
            Self::NetworkStarting => "network_starting",
            Self::Attaching => "attaching",
            Self::Verifying => "verifying",
            Self::Paging => "paging",
            Self::VerifyingAgain => "verifying_again",
            Self::Stopping => "stopping",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Assign a phase to every step, rejecting orderings that cannot run
///
/// A ping before any wait verifies, a wait after verifying lets the UE go
/// idle (paging), and pings after that verify again.
pub fn plan_phases(steps: &[Step]) -> std::result::Result<Vec<Phase>, String> {
    let mut current = Phase::Configuring;
    let mut started = false;
    let mut attached = false;
    let mut plan = Vec::with_capacity(steps.len());

    for (i, step) in steps.iter().enumerate() {
        let position = i + 1;
        let phase = match step {
            Step::StartNetwork => {
                if started {
                    return Err(format!("step {}: the network can only be started once", position));
                }
                started = true;
                Phase::NetworkStarting
            }
            Step::Attach { .. } => {
                if !started {
                    return Err(format!("step {}: attach needs a prior start_network", position));
                }
                if attached {
                    return Err(format!("step {}: UEs can only be attached once", position));
                }
                attached = true;
                Phase::Attaching
            }
            Step::Ping { .. } => {
                if !attached {
                    return Err(format!("step {}: ping needs a prior attach", position));
                }
                match current {
                    Phase::Paging | Phase::VerifyingAgain => Phase::VerifyingAgain,
                    _ => Phase::Verifying,
                }
            }
            Step::Wait { .. } => match current {
                Phase::Verifying => Phase::Paging,
                other => other,
            },
        };
        current = phase;
        plan.push(phase);
    }

    Ok(plan)
}

/// Time limits applied by the executor
#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    /// Attach timeout for steps that do not set one
    pub attach_timeout: Duration,
    /// Deadline for the whole step sequence; teardown is forced when it expires
    pub deadline: Duration,
}

impl ExecutorOptions {
    /// Options for `scenario`, falling back to the configured timeouts
    pub fn new(scenario: &Scenario, timeouts: &Timeouts) -> Self {
        Self {
            attach_timeout: Duration::from_secs(timeouts.attach_secs),
            deadline: Duration::from_secs(scenario.timeout.unwrap_or(timeouts.scenario_secs)),
        }
    }
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        let timeouts = Timeouts::default();
        Self {
            attach_timeout: Duration::from_secs(timeouts.attach_secs),
            deadline: Duration::from_secs(timeouts.scenario_secs),
        }
    }
}

/// State of one execution, kept outside the deadline-bounded future so it
/// survives cancellation
#[derive(Default)]
struct Progress {
    phases: Vec<Phase>,
    steps: Vec<StepRecord>,
    failure: Option<FailureInfo>,
    attach: Option<AttachResult>,
    network_started: bool,
    step_started: Option<Instant>,
}

impl Progress {
    fn enter(&mut self, phase: Phase) {
        if self.phases.last() != Some(&phase) {
            self.phases.push(phase);
        }
    }

    fn begin_step(&mut self) {
        self.step_started = Some(Instant::now());
    }

    fn record(&mut self, label: String, phase: Phase, outcome: StepOutcome) {
        let elapsed_ms = self
            .step_started
            .take()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.steps.push(StepRecord {
            label,
            phase,
            outcome,
            elapsed_ms,
        });
    }

    fn fail(&mut self, label: String, phase: Phase, error: &Error) {
        self.failure = Some(FailureInfo::new(&label, error));
        self.record(
            label,
            phase,
            StepOutcome::Failure {
                kind: error.kind(),
                message: error.to_string(),
            },
        );
    }
}

/// Runs one scenario variant with exclusively owned handles
pub struct ScenarioExecutor<'a> {
    scenario: &'a Scenario,
    variant: &'a Variant,
    elements: ElementSet,
    options: ExecutorOptions,
}

impl<'a> ScenarioExecutor<'a> {
    pub fn new(
        scenario: &'a Scenario,
        variant: &'a Variant,
        elements: ElementSet,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            scenario,
            variant,
            elements,
            options,
        }
    }

    /// Execute every step, tear down, and close the handles
    pub async fn run(mut self) -> AttemptReport {
        let started = Instant::now();
        let scenario = self.scenario;
        let variant_id = self.variant.id();
        let mut progress = Progress::default();
        progress.enter(Phase::Configuring);

        tracing::info!(
            scenario = %scenario.name,
            variant = %variant_id,
            elements = ?self.elements.names(),
            "Executing scenario"
        );

        let plan = match plan_phases(&scenario.steps) {
            Ok(plan) => plan,
            Err(reason) => {
                let error = Error::InvalidScenario {
                    name: scenario.name.clone(),
                    reason,
                };
                progress.failure = Some(FailureInfo::new("configure", &error));
                Vec::new()
            }
        };

        if progress.failure.is_none() {
            let deadline = self.options.deadline;
            let bounded = tokio::time::timeout(deadline, self.run_steps(&plan, &mut progress));
            if bounded.await.is_err() {
                let error = Error::ScenarioTimeout(deadline.as_secs());
                tracing::warn!(variant = %variant_id, "{}", error);

                // The step that was in flight owns the timeout
                let index = progress.steps.len();
                match scenario.steps.get(index) {
                    Some(step) => progress.fail(step.label(), plan[index], &error),
                    None => progress.failure = Some(FailureInfo::new("deadline", &error)),
                }
            }
        }

        for (index, step) in scenario.steps.iter().enumerate().skip(progress.steps.len()) {
            let phase = plan.get(index).copied().unwrap_or(Phase::Configuring);
            progress.step_started = None;
            progress.record(step.label(), phase, StepOutcome::Skipped);
        }

        let artifacts = self.teardown(&mut progress).await;
        self.elements.close().await;

        let verdict = if progress.failure.is_none() {
            progress.enter(Phase::Done);
            Verdict::Passed
        } else {
            progress.enter(Phase::Failed);
            Verdict::Failed
        };

        match &progress.failure {
            None => tracing::info!(variant = %variant_id, "Scenario passed"),
            Some(failure) => tracing::warn!(
                variant = %variant_id,
                step = %failure.step,
                kind = %failure.kind,
                "Scenario failed: {}",
                failure.message
            ),
        }

        AttemptReport {
            attempt: 1,
            verdict,
            steps: progress.steps,
            phases: progress.phases,
            failure: progress.failure,
            attach: progress.attach,
            artifacts,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn run_steps(&mut self, plan: &[Phase], progress: &mut Progress) {
        let scenario = self.scenario;
        for (step, &phase) in scenario.steps.iter().zip(plan) {
            progress.enter(phase);
            progress.begin_step();
            let label = step.label();
            tracing::debug!(step = %label, %phase, "Running step");

            match self.run_step(step, progress).await {
                Ok(()) => progress.record(label, phase, StepOutcome::Success),
                Err(e) => {
                    tracing::warn!(step = %label, kind = %e.kind(), "Step failed: {}", e);
                    progress.fail(label, phase, &e);
                    return;
                }
            }
        }
    }

    async fn run_step(&mut self, step: &Step, progress: &mut Progress) -> Result<()> {
        match step {
            Step::StartNetwork => {
                steps::start_network(&mut self.elements, self.variant).await?;
                progress.network_started = true;
            }
            Step::Attach { timeout } => {
                if !progress.network_started {
                    return Err(Error::invalid_state("UEs", "attach", "network not started"));
                }
                let timeout = timeout
                    .map(Duration::from_secs)
                    .unwrap_or(self.options.attach_timeout);
                let result = steps::attach(&mut self.elements, self.variant, timeout).await?;
                progress.attach = Some(result);
            }
            Step::Ping {
                direction,
                packets,
                min_success,
                expect_paging,
            } => {
                let attach = progress
                    .attach
                    .as_ref()
                    .ok_or_else(|| Error::invalid_state("UEs", "ping", "not attached"))?;
                let check = PingCheck {
                    direction: *direction,
                    packets: *packets,
                    min_success: *min_success,
                    expect_paging: *expect_paging,
                };
                steps::ping(&mut self.elements, attach, &check).await?;
            }
            Step::Wait { seconds } => steps::wait(*seconds).await?,
        }
        Ok(())
    }

    /// Stop every element once; returns the collected artifacts
    async fn teardown(&mut self, progress: &mut Progress) -> Vec<String> {
        progress.enter(Phase::Stopping);
        progress.begin_step();

        let flags = StopFlags {
            warnings_as_errors: self.scenario.teardown.warnings_as_errors,
        };
        let summary = steps::stop(&mut self.elements, flags).await;

        match summary.error {
            None => progress.record(TEARDOWN_LABEL.to_string(), Phase::Stopping, StepOutcome::Success),
            Some(e) => {
                tracing::warn!("Teardown failed: {}", e);
                // An earlier failure stays the reported one
                if progress.failure.is_none() {
                    progress.fail(TEARDOWN_LABEL.to_string(), Phase::Stopping, &e);
                } else {
                    progress.record(
                        TEARDOWN_LABEL.to_string(),
                        Phase::Stopping,
                        StepOutcome::Failure {
                            kind: e.kind(),
                            message: e.to_string(),
                        },
                    );
                }
            }
        }

        summary.artifacts
    }
}
