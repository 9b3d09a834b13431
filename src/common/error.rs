//! Error types for the scenario orchestrator
//!
//! Every error maps onto a small closed set of [`ErrorKind`]s. The retry
//! policy classifies failures by kind instead of by message text; messages
//! stay human readable and still mirror the wording test logs are grepped
//! for ("failed to start", "Attach timeout reached", ...).

use std::fmt;
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    // === Connection Errors ===
    #[error("Cannot reach {element} at {endpoint}: {source}")]
    ElementUnreachable {
        element: String,
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection to {element} lost: {reason}")]
    ConnectionLost { element: String, reason: String },

    #[error("{element} failed to start: {reason}")]
    StartFailed { element: String, reason: String },

    // === Timeout Errors ===
    #[error("{element}: '{operation}' timed out after {secs} seconds")]
    Timeout {
        element: String,
        operation: String,
        secs: u64,
    },

    #[error("Scenario exceeded its deadline of {0} seconds, forcing teardown")]
    ScenarioTimeout(u64),

    // === Attach Errors ===
    #[error("Attach timeout reached for {ue} after {secs} seconds")]
    AttachTimeout { ue: String, secs: u64 },

    #[error("{ue} attach rejected: {reason}")]
    AttachRejected { ue: String, reason: String },

    // === Verification Errors ===
    #[error("Some packages got lost: {direction} {source_name} -> {target}: {received}/{sent} received (required {required}%)")]
    PacketLoss {
        direction: String,
        source_name: String,
        target: String,
        sent: u32,
        received: u32,
        required: u8,
    },

    #[error("Verification failed: {0}")]
    Verification(String),

    // === Shutdown Errors ===
    #[error("{element} did not stop cleanly: {reason}")]
    Shutdown { element: String, reason: String },

    // === Remote Application Errors ===
    #[error("Exception calling application on {element}: {message}")]
    RemoteFault { element: String, message: String },

    #[error("Cannot {action} while {element} is {state}")]
    InvalidState {
        element: String,
        action: String,
        state: String,
    },

    #[error("Control protocol error: {0}")]
    Protocol(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Invalid scenario '{name}': {reason}")]
    InvalidScenario { name: String, reason: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Closed classification of failures, used for reporting and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A remote element could not be reached or failed to come up
    Connection,
    /// An operation or the whole scenario exceeded its deadline
    Timeout,
    /// A UE could not attach
    Attach,
    /// Expected connectivity or paging behavior was not observed
    Verification,
    /// Teardown of an element failed
    Shutdown,
    /// The remote application raised while serving a request
    RemoteFault,
    /// Invalid configuration or scenario definition
    Config,
    /// Local bug or unexpected condition
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Attach => "attach",
            Self::Verification => "verification",
            Self::Shutdown => "shutdown",
            Self::RemoteFault => "remote_fault",
            Self::Config => "config",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "connection" => Ok(Self::Connection),
            "timeout" => Ok(Self::Timeout),
            "attach" => Ok(Self::Attach),
            "verification" => Ok(Self::Verification),
            "shutdown" => Ok(Self::Shutdown),
            "remote_fault" => Ok(Self::RemoteFault),
            "config" => Ok(Self::Config),
            "internal" => Ok(Self::Internal),
            other => Err(Error::Config(format!("Unknown error kind '{}'", other))),
        }
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ElementUnreachable { .. }
            | Error::ConnectionLost { .. }
            | Error::StartFailed { .. } => ErrorKind::Connection,
            Error::Timeout { .. } | Error::ScenarioTimeout(_) => ErrorKind::Timeout,
            Error::AttachTimeout { .. } | Error::AttachRejected { .. } => ErrorKind::Attach,
            Error::PacketLoss { .. } | Error::Verification(_) => ErrorKind::Verification,
            Error::Shutdown { .. } => ErrorKind::Shutdown,
            // Remote INVALID_STATE replies arrive as RemoteFault; InvalidState
            // and Protocol are raised on this side
            Error::RemoteFault { .. } => ErrorKind::RemoteFault,
            Error::InvalidState { .. } | Error::Protocol(_) => ErrorKind::Internal,
            Error::Config(_)
            | Error::ConfigParse(_)
            | Error::InvalidScenario { .. }
            | Error::FileRead { .. } => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Connection,
            Error::Json(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(element: &str, action: &str, state: &str) -> Self {
        Self::InvalidState {
            element: element.to_string(),
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Create a start failure error
    pub fn start_failed(element: &str, reason: impl Into<String>) -> Self {
        Self::StartFailed {
            element: element.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a shutdown error
    pub fn shutdown(element: &str, reason: impl Into<String>) -> Self {
        Self::Shutdown {
            element: element.to_string(),
            reason: reason.into(),
        }
    }

    /// Rebuild an error received from a remote element
    ///
    /// The wire form loses the element name, so the caller supplies it.
    pub fn from_remote(element: &str, remote: IpcError) -> Self {
        match remote.code.as_str() {
            "START_FAILED" => Error::start_failed(element, remote.message),
            "ATTACH_TIMEOUT" => Error::AttachTimeout {
                ue: element.to_string(),
                secs: remote.detail.unwrap_or(0),
            },
            "ATTACH_REJECTED" => Error::AttachRejected {
                ue: element.to_string(),
                reason: remote.message,
            },
            "SHUTDOWN_FAILED" => Error::shutdown(element, remote.message),
            "INVALID_STATE" | "REMOTE_FAULT" => Error::RemoteFault {
                element: element.to_string(),
                message: remote.message,
            },
            "TIMEOUT" => Error::Timeout {
                element: element.to_string(),
                operation: "remote operation".to_string(),
                secs: remote.detail.unwrap_or(0),
            },
            _ => Error::RemoteFault {
                element: element.to_string(),
                message: remote.message,
            },
        }
    }
}

/// IPC-serializable error for element responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcError {
    pub code: String,
    pub message: String,
    /// Numeric detail (e.g. timeout seconds) when the code carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<u64>,
}

impl From<&Error> for IpcError {
    fn from(e: &Error) -> Self {
        // The receiving side re-adds the element name, so only the reason travels
        let (code, message, detail) = match e {
            Error::StartFailed { reason, .. } => ("START_FAILED", reason.clone(), None),
            Error::AttachTimeout { secs, .. } => ("ATTACH_TIMEOUT", e.to_string(), Some(*secs)),
            Error::AttachRejected { reason, .. } => ("ATTACH_REJECTED", reason.clone(), None),
            Error::Shutdown { reason, .. } => ("SHUTDOWN_FAILED", reason.clone(), None),
            Error::RemoteFault { message, .. } => ("REMOTE_FAULT", message.clone(), None),
            Error::InvalidState { .. } => ("INVALID_STATE", e.to_string(), None),
            Error::Timeout { secs, .. } => ("TIMEOUT", e.to_string(), Some(*secs)),
            _ => ("INTERNAL_ERROR", e.to_string(), None),
        };

        Self {
            code: code.to_string(),
            message,
            detail,
        }
    }
}
