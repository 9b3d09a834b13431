//! RAN scenario orchestrator
//!
//! Runs multi-element test scenarios (UE, gNB, 5GC) through remote control
//! agents: parameter matrices, ordered steps with forced teardown, and
//! classified whole-scenario retries.

pub mod cli;
pub mod commands;
pub mod common;
pub mod element;
pub mod ipc;
pub mod scenario;
pub mod sim;

// Re-export commonly used types for tests
pub use common::{Error, ErrorKind, Result};
pub use ipc::protocol::Command;
