//! Scenario orchestration
//!
//! Scenarios are YAML step lists run against a UE/gNB/5GC element set for
//! every variant of a parameter matrix, with whole-scenario retries for
//! classified flaky failures.

pub mod config;
pub mod executor;
pub mod report;
pub mod retry;
pub mod runner;
pub mod steps;
pub mod variant;

pub use config::{Scenario, Step};
pub use executor::{ExecutorOptions, Phase, ScenarioExecutor};
pub use report::{print_report, print_summary, RunReport, ScenarioReport, Verdict};
pub use retry::{run_variant, RetryPolicy};
pub use runner::run_matrix;
pub use variant::{Matrix, Variant};
