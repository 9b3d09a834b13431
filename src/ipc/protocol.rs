//! Element control protocol message types
//!
//! Defines the request/response format between the orchestrator and the
//! UE, gNB and 5GC control agents. Uses a simple length-prefixed JSON protocol.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use crate::common::error::IpcError;
use crate::scenario::variant::Variant;

/// Control request sent to an element
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for matching responses
    pub id: u64,
    /// The command to execute
    pub command: Command,
}

/// Control response from an element
#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    /// Request ID this response corresponds to
    pub id: u64,
    /// Whether the command succeeded
    pub success: bool,
    /// Result data on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error information on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcError>,
}

impl Response {
    /// Create a success response
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: u64, error: IpcError) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(error),
        }
    }

    /// Create a success response with no data
    pub fn ok(id: u64) -> Self {
        Self::success(id, serde_json::json!({}))
    }
}

/// Commands understood by element control agents
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Bring the element up with the variant's parameters
    Start { config: StartConfig },

    /// Tear the element down and report problems seen while it ran
    Stop { warnings_as_errors: bool },

    /// Describe the element (identity, addresses, subscriber data)
    GetDefinition,

    /// UE only: register with the network and open a PDU session
    Attach { timeout_secs: u64 },

    /// UE or 5GC: send `count` echo requests to `target`
    Ping { target: IpAddr, count: u32 },

    /// Report the element state
    Status,

    /// Stop serving this endpoint
    Shutdown,
}

impl Command {
    /// Short name used in logs and timeout errors
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Stop { .. } => "stop",
            Self::GetDefinition => "get_definition",
            Self::Attach { .. } => "attach",
            Self::Ping { .. } => "ping",
            Self::Status => "status",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Kind of network element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "ue")]
    Ue,
    #[serde(rename = "gnb")]
    Gnb,
    #[serde(rename = "5gc")]
    FiveGc,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ue => write!(f, "UE"),
            Self::Gnb => write!(f, "gNB"),
            Self::FiveGc => write!(f, "5GC"),
        }
    }
}

/// Parameters handed to an element on start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartConfig {
    /// The scenario variant being executed
    pub variant: Variant,
    /// Definitions of the elements this one must talk to
    #[serde(default)]
    pub peers: Vec<Definition>,
}

/// Element description returned by `get_definition`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    pub role: Role,
    /// Control-plane or user-plane address the peers should use
    pub address: Option<IpAddr>,
    /// Subscriber identity (UE only)
    pub imsi: Option<String>,
}

/// Connection attributes of an attached UE
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachInfo {
    pub imsi: String,
    /// Address assigned by the 5GC
    pub ipv4: Ipv4Addr,
    pub pdu_session_id: u8,
}

/// Echo statistics from a ping command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingStats {
    pub sent: u32,
    pub received: u32,
    /// Whether the transfer had to page an idle UE, when the element can tell
    #[serde(default)]
    pub paged: Option<bool>,
}

impl PingStats {
    /// Percentage of echo requests that got a reply
    pub fn success_percent(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        f64::from(self.received) * 100.0 / f64::from(self.sent)
    }
}

/// Result of stopping an element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReport {
    /// Errors the element logged while running
    pub errors: u32,
    /// Warnings the element logged while running
    pub warnings: u32,
    /// Artifacts (logs, pcaps) the element produced
    #[serde(default)]
    pub artifacts: Vec<String>,
}

/// Status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
    pub name: String,
    pub role: Role,
    pub state: String,
    /// RRC state for UEs ("connected" / "idle")
    pub rrc: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let json = serde_json::to_value(Command::Ping {
            target: "10.45.0.1".parse().unwrap(),
            count: 10,
        })
        .unwrap();
        assert_eq!(json["type"], "ping");
        assert_eq!(json["target"], "10.45.0.1");
        assert_eq!(json["count"], 10);

        let json = serde_json::to_value(Command::GetDefinition).unwrap();
        assert_eq!(json["type"], "get_definition");
    }

    #[test]
    fn test_role_names() {
        assert_eq!(serde_json::to_value(Role::FiveGc).unwrap(), "5gc");
        let role: Role = serde_json::from_str("\"gnb\"").unwrap();
        assert_eq!(role, Role::Gnb);
    }

    #[test]
    fn test_ping_success_percent() {
        let stats = PingStats {
            sent: 10,
            received: 9,
            paged: None,
        };
        assert!((stats.success_percent() - 90.0).abs() < f64::EPSILON);

        let empty = PingStats {
            sent: 0,
            received: 0,
            paged: None,
        };
        assert_eq!(empty.success_percent(), 0.0);
    }

    #[test]
    fn test_ping_stats_without_paged_field() {
        let stats: PingStats = serde_json::from_str(r#"{"sent":4,"received":4}"#).unwrap();
        assert_eq!(stats.paged, None);
    }
}
