//! Step outcomes and scenario reports
//!
//! Reports are printed for humans and serialized to JSON for whatever
//! collects test data downstream.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use colored::Colorize;
use serde::Serialize;

use crate::common::error::ErrorKind;
use crate::common::{Error, Result};
use crate::ipc::protocol::AttachInfo;

use super::executor::Phase;
use super::variant::Variant;

/// Label of the implicit teardown step
pub const TEARDOWN_LABEL: &str = "stop";

/// Attach result: UE name to its connection attributes
pub type AttachResult = BTreeMap<String, AttachInfo>;

/// Outcome of one step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failure { kind: ErrorKind, message: String },
    Skipped,
}

/// One executed (or skipped) step
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub label: String,
    pub phase: Phase,
    pub outcome: StepOutcome,
    pub elapsed_ms: u64,
}

/// Classified failure of an attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureInfo {
    /// Label of the failing step ("connect" and "stop" included)
    pub step: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl FailureInfo {
    pub fn new(step: &str, error: &Error) -> Self {
        Self {
            step: step.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Final verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
}

/// Result of one execution attempt of a variant
#[derive(Debug, Clone, Serialize)]
pub struct AttemptReport {
    /// 1-based attempt number
    pub attempt: u32,
    pub verdict: Verdict,
    /// Steps in execution order, teardown last
    pub steps: Vec<StepRecord>,
    /// Phases entered, in order
    pub phases: Vec<Phase>,
    pub failure: Option<FailureInfo>,
    pub attach: Option<AttachResult>,
    pub artifacts: Vec<String>,
    pub duration_ms: u64,
}

impl AttemptReport {
    /// Attempt that failed before any handle existed; teardown has nothing to stop
    pub fn connect_failure(error: &Error, duration_ms: u64) -> Self {
        Self {
            attempt: 0,
            verdict: Verdict::Failed,
            steps: vec![
                StepRecord {
                    label: "connect".to_string(),
                    phase: Phase::Configuring,
                    outcome: StepOutcome::Failure {
                        kind: error.kind(),
                        message: error.to_string(),
                    },
                    elapsed_ms: duration_ms,
                },
                StepRecord {
                    label: TEARDOWN_LABEL.to_string(),
                    phase: Phase::Stopping,
                    outcome: StepOutcome::Skipped,
                    elapsed_ms: 0,
                },
            ],
            phases: vec![Phase::Configuring, Phase::Stopping, Phase::Failed],
            failure: Some(FailureInfo::new("connect", error)),
            attach: None,
            artifacts: Vec::new(),
            duration_ms,
        }
    }

    /// How many times teardown ran in this attempt
    pub fn teardown_runs(&self) -> usize {
        self.phases.iter().filter(|p| **p == Phase::Stopping).count()
    }
}

/// Result of running one variant, retries included
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub variant_id: String,
    pub variant: Variant,
    pub testbed: String,
    pub verdict: Verdict,
    pub attempts: Vec<AttemptReport>,
    /// Whether the variant was executed more than once
    pub retried: bool,
    /// Failure of the last attempt, unchanged
    pub failure: Option<FailureInfo>,
    pub duration_ms: u64,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }

    /// Artifacts collected over every attempt
    pub fn artifacts(&self) -> Vec<&str> {
        self.attempts
            .iter()
            .flat_map(|a| a.artifacts.iter().map(String::as_str))
            .collect()
    }
}

/// Report of a whole run, every variant included
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub scenario: &'a str,
    pub passed: usize,
    pub failed: usize,
    pub variants: &'a [ScenarioReport],
}

impl<'a> RunReport<'a> {
    pub fn new(scenario: &'a str, variants: &'a [ScenarioReport]) -> Self {
        let passed = variants.iter().filter(|r| r.passed()).count();
        Self {
            scenario,
            passed,
            failed: variants.len() - passed,
            variants,
        }
    }

    /// Write the report as pretty JSON; `path` may be a file or a directory
    pub fn write_json(&self, path: &Path) -> Result<PathBuf> {
        let file = if path.is_dir() {
            path.join(format!("{}-report.json", self.scenario))
        } else {
            path.to_path_buf()
        };

        if let Some(parent) = file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(&file, json)?;
        Ok(file)
    }
}

/// Print one variant's report
pub fn print_report(report: &ScenarioReport, verbose: bool) {
    println!(
        "\n{} {} {}",
        "Variant:".blue().bold(),
        report.variant_id.white().bold(),
        format!("[{}]", report.testbed).dimmed()
    );

    let shown: Vec<&AttemptReport> = if verbose {
        report.attempts.iter().collect()
    } else {
        report.attempts.last().into_iter().collect()
    };

    for attempt in shown {
        if report.attempts.len() > 1 {
            println!("  {}", format!("attempt {}", attempt.attempt).cyan());
        }
        for step in &attempt.steps {
            match &step.outcome {
                StepOutcome::Success => println!(
                    "  {} {} {}",
                    "✓".green(),
                    step.label,
                    format!("({} ms)", step.elapsed_ms).dimmed()
                ),
                StepOutcome::Failure { kind, message } => println!(
                    "  {} {} [{}] {}",
                    "✗".red(),
                    step.label,
                    kind.to_string().yellow(),
                    message
                ),
                StepOutcome::Skipped => {
                    println!("  {} {}", "-".dimmed(), step.label.dimmed())
                }
            }
        }
    }

    if verbose {
        for artifact in report.artifacts() {
            println!("  {} {}", "artifact".dimmed(), artifact);
        }
    }

    match (&report.failure, report.passed()) {
        (_, true) if report.retried => println!(
            "  {} {}",
            "✓".green().bold(),
            format!("Passed after {} attempts", report.attempts.len())
                .green()
                .bold()
        ),
        (_, true) => println!("  {} {}", "✓".green().bold(), "Passed".green().bold()),
        (Some(failure), false) => println!(
            "  {} {} at '{}' ({}){}",
            "✗".red().bold(),
            "Failed".red().bold(),
            failure.step,
            failure.kind,
            if report.retried {
                format!(", after {} attempts", report.attempts.len())
            } else {
                String::new()
            }
        ),
        (None, false) => println!("  {} {}", "✗".red().bold(), "Failed".red().bold()),
    }
}

/// Print the closing summary line
pub fn print_summary(run: &RunReport<'_>) {
    let line = format!(
        "{}: {} passed, {} failed",
        run.scenario, run.passed, run.failed
    );
    if run.failed == 0 {
        println!("\n{}\n", line.green().bold());
    } else {
        println!("\n{}\n", line.red().bold());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::variant::{RadioParams, VariantDefaults};

    fn report(verdict: Verdict) -> ScenarioReport {
        let variant = Variant::resolve(
            &RadioParams {
                band: 3,
                common_scs: 15,
                bandwidth: 10,
                sample_rate: None,
            },
            &VariantDefaults::default(),
        )
        .unwrap();
        ScenarioReport {
            scenario: "demo".to_string(),
            variant_id: variant.id(),
            variant,
            testbed: "local".to_string(),
            verdict,
            attempts: vec![AttemptReport::connect_failure(
                &Error::Config("x".to_string()),
                3,
            )],
            retried: false,
            failure: None,
            duration_ms: 3,
        }
    }

    #[test]
    fn test_run_report_counts() {
        let reports = vec![report(Verdict::Passed), report(Verdict::Failed)];
        let run = RunReport::new("demo", &reports);
        assert_eq!(run.passed, 1);
        assert_eq!(run.failed, 1);
    }

    #[test]
    fn test_write_json_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let reports = vec![report(Verdict::Passed)];
        let path = RunReport::new("demo", &reports)
            .write_json(dir.path())
            .unwrap();
        assert_eq!(path, dir.path().join("demo-report.json"));

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["variants"][0]["variant_id"], "band:3-scs:15-bandwidth:10");
        assert_eq!(value["variants"][0]["attempts"][0]["steps"][0]["outcome"]["status"], "failure");
        assert_eq!(value["variants"][0]["attempts"][0]["steps"][0]["outcome"]["kind"], "config");
    }

    #[test]
    fn test_connect_failure_skips_teardown_once() {
        let attempt = AttemptReport::connect_failure(&Error::Config("x".into()), 0);
        assert_eq!(attempt.teardown_runs(), 1);
        assert_eq!(attempt.steps[1].outcome, StepOutcome::Skipped);
        assert_eq!(attempt.verdict, Verdict::Failed);
    }
}
