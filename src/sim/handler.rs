//! Command handler for the simulated elements
//!
//! Translates control commands into operations on the shared network state.

use serde_json::json;

use crate::common::{error::IpcError, Error, Result};
use crate::ipc::protocol::{Command, Response};

use super::SharedNetwork;

/// Handle a control command addressed to `element`
pub async fn handle_command(
    network: &SharedNetwork,
    element: &str,
    id: u64,
    command: Command,
) -> Response {
    let name = command.name();
    match handle_command_inner(network, element, command).await {
        Ok(result) => Response::success(id, result),
        Err(e) => {
            tracing::warn!(element, command = name, "Command failed: {}", e);
            Response::error(id, IpcError::from(&e))
        }
    }
}

async fn handle_command_inner(
    network: &SharedNetwork,
    element: &str,
    command: Command,
) -> Result<serde_json::Value> {
    let mut net = network.lock().await;

    let faultable = matches!(
        command,
        Command::Start { .. } | Command::Attach { .. } | Command::Ping { .. }
    );
    if faultable && net.take_remote_fault() {
        return Err(Error::RemoteFault {
            element: element.to_string(),
            message: format!("injected fault while handling '{}'", command.name()),
        });
    }

    match command {
        Command::Start { config } => {
            net.start(element, &config)?;
            Ok(json!({ "status": "started" }))
        }

        Command::Stop { warnings_as_errors } => {
            let report = net.stop(element)?;
            if warnings_as_errors && report.warnings > 0 {
                tracing::warn!(element, warnings = report.warnings, "Warnings will fail this run");
            }
            Ok(serde_json::to_value(report)?)
        }

        Command::GetDefinition => Ok(serde_json::to_value(net.definition(element)?)?),

        Command::Attach { timeout_secs } => Ok(serde_json::to_value(net.attach(element, timeout_secs)?)?),

        Command::Ping { target, count } => {
            let stats = net.ping(element, target, count)?;
            let delay = net.ping_delay();
            // Other elements keep answering while this reply is held back
            drop(net);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(serde_json::to_value(stats)?)
        }

        Command::Status => Ok(serde_json::to_value(net.status(element)?)?),

        // Answered by the connection loop before it gets here
        Command::Shutdown => Ok(json!({})),
    }
}
