//! Orchestrator-side control client for one element

use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::io::{ReadHalf, WriteHalf};

use crate::common::error::IpcError;
use crate::common::{Error, Result};

use super::protocol::{Command, Request, Response};
use super::transport::{self, BoxedStream, Endpoint};

/// Client for one element control endpoint
pub struct ElementClient {
    name: String,
    reader: ReadHalf<BoxedStream>,
    writer: WriteHalf<BoxedStream>,
    next_id: u64,
    request_timeout: Duration,
    /// Set when a request was abandoned mid-flight; the stream can no
    /// longer be trusted to be frame aligned
    poisoned: bool,
}

impl ElementClient {
    /// Connect to an element, failing after `connect_timeout`
    pub async fn connect(
        name: &str,
        endpoint: &Endpoint,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let stream = match tokio::time::timeout(connect_timeout, transport::connect(endpoint)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Error::ElementUnreachable {
                    element: name.to_string(),
                    endpoint: endpoint.to_string(),
                    source: e,
                })
            }
            Err(_) => {
                return Err(Error::Timeout {
                    element: name.to_string(),
                    operation: "connect".to_string(),
                    secs: connect_timeout.as_secs(),
                })
            }
        };

        tracing::debug!(element = name, %endpoint, "Connected to element");

        Ok(Self::from_stream(name, stream, request_timeout))
    }

    /// Wrap an already connected control stream
    pub fn from_stream(name: &str, stream: BoxedStream, request_timeout: Duration) -> Self {
        let (reader, writer) = tokio::io::split(stream);

        Self {
            name: name.to_string(),
            reader,
            writer,
            next_id: 1,
            request_timeout,
            poisoned: false,
        }
    }

    /// Element name this client talks to
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a request was cut off mid-flight; the client must be redialed
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Send a command and wait for the response, using the default request timeout
    pub async fn send_command(&mut self, command: Command) -> Result<serde_json::Value> {
        let timeout = self.request_timeout;
        self.send_command_with_timeout(command, timeout).await
    }

    /// Send a command and wait at most `timeout` for the response
    pub async fn send_command_with_timeout(
        &mut self,
        command: Command,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        if self.poisoned {
            return Err(Error::ConnectionLost {
                element: self.name.clone(),
                reason: "an earlier request was abandoned".to_string(),
            });
        }

        let operation = command.name();
        match tokio::time::timeout(timeout, self.round_trip(command)).await {
            Ok(result) => result,
            Err(_) => {
                self.poisoned = true;
                Err(Error::Timeout {
                    element: self.name.clone(),
                    operation: operation.to_string(),
                    secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Send a command and decode its result
    pub async fn request<T: DeserializeOwned>(&mut self, command: Command) -> Result<T> {
        let value = self.send_command(command).await?;
        self.decode(value)
    }

    /// Send a command with an explicit timeout and decode its result
    pub async fn request_with_timeout<T: DeserializeOwned>(
        &mut self,
        command: Command,
        timeout: Duration,
    ) -> Result<T> {
        let value = self.send_command_with_timeout(command, timeout).await?;
        self.decode(value)
    }

    fn decode<T: DeserializeOwned>(&self, value: serde_json::Value) -> Result<T> {
        serde_json::from_value(value).map_err(|e| {
            Error::Protocol(format!("Unexpected result from {}: {}", self.name, e))
        })
    }

    async fn round_trip(&mut self, command: Command) -> Result<serde_json::Value> {
        let id = self.next_id;
        self.next_id += 1;

        let request = Request { id, command };
        let json = serde_json::to_vec(&request)?;

        // Stays set if this future is dropped before the reply is read,
        // e.g. by a scenario deadline
        self.poisoned = true;

        transport::send_message(&mut self.writer, &json)
            .await
            .map_err(|e| self.lost(e))?;

        let response_data = transport::recv_message(&mut self.reader)
            .await
            .map_err(|e| self.lost(e))?;

        let response: Response = serde_json::from_slice(&response_data)?;

        if response.id != id {
            return Err(Error::Protocol(format!(
                "Response ID mismatch from {}: expected {}, got {}",
                self.name, id, response.id
            )));
        }
        self.poisoned = false;

        if response.success {
            Ok(response.result.unwrap_or(serde_json::json!({})))
        } else {
            let error = response.error.unwrap_or_else(|| IpcError {
                code: "UNKNOWN".to_string(),
                message: "Unknown error".to_string(),
                detail: None,
            });
            Err(Error::from_remote(&self.name, error))
        }
    }

    fn lost(&self, e: std::io::Error) -> Error {
        Error::ConnectionLost {
            element: self.name.clone(),
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answer every request on `stream` with an empty success
    async fn echo_agent(stream: tokio::io::DuplexStream) {
        let (mut reader, mut writer) = tokio::io::split(stream);
        while let Ok(data) = transport::recv_message(&mut reader).await {
            let request: Request = serde_json::from_slice(&data).unwrap();
            let json = serde_json::to_vec(&Response::ok(request.id)).unwrap();
            transport::send_message(&mut writer, &json).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_answered_request_keeps_client_usable() {
        let (near, far) = tokio::io::duplex(1024);
        tokio::spawn(echo_agent(far));
        let mut client = ElementClient::from_stream("gnb", Box::new(near), Duration::from_secs(5));

        client.send_command(Command::Status).await.unwrap();
        client.send_command(Command::Status).await.unwrap();
        assert!(!client.is_poisoned());
    }

    #[tokio::test]
    async fn test_request_dropped_from_outside_poisons_client() {
        // Nobody answers on the far end
        let (near, _far) = tokio::io::duplex(1024);
        let mut client = ElementClient::from_stream("ue-1", Box::new(near), Duration::from_secs(60));

        let cut = tokio::time::timeout(Duration::from_millis(50), client.send_command(Command::Status)).await;
        assert!(cut.is_err());
        assert!(client.is_poisoned());

        let err = client.send_command(Command::Status).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost { .. }));
    }

    #[tokio::test]
    async fn test_remote_error_keeps_stream_aligned() {
        let (near, far) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(far);
            let data = transport::recv_message(&mut reader).await.unwrap();
            let request: Request = serde_json::from_slice(&data).unwrap();
            let response = Response::error(
                request.id,
                IpcError {
                    code: "START_FAILED".to_string(),
                    message: "no cell".to_string(),
                    detail: None,
                },
            );
            let json = serde_json::to_vec(&response).unwrap();
            transport::send_message(&mut writer, &json).await.unwrap();
        });
        let mut client = ElementClient::from_stream("ue-1", Box::new(near), Duration::from_secs(5));

        let err = client.send_command(Command::Status).await.unwrap_err();
        assert!(matches!(err, Error::StartFailed { .. }));
        assert!(!client.is_poisoned());
    }
}
