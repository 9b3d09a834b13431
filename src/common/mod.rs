//! Common utilities shared between the orchestrator and the simulated agent

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, ErrorKind, Result};
