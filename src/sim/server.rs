//! Simulated element agent - control listeners and connection loops

use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};

use crate::common::config::Testbed;
use crate::common::error::IpcError;
use crate::common::{paths, Error, Result};
use crate::ipc::protocol::{Command, Request, Response};
use crate::ipc::transport::{self, BoxedStream, ElementListener};
use crate::ipc::Endpoint;

use super::handler;
use super::{SharedNetwork, SimFaults, SimNetwork};

/// Serves every element of one testbed, each on its own endpoint
pub struct SimAgent {
    network: SharedNetwork,
    listeners: Vec<(String, Endpoint, ElementListener)>,
}

impl SimAgent {
    /// Bind the control endpoints of every element in `testbed`
    pub async fn bind(testbed: &Testbed, faults: SimFaults) -> Result<Self> {
        testbed.validate()?;
        let network = Arc::new(Mutex::new(SimNetwork::new(&testbed.ue_names(), faults)?));

        let mut listeners = Vec::new();
        for (name, endpoint) in testbed.endpoints() {
            let listener = ElementListener::bind(endpoint).await.map_err(|e| {
                Error::Config(format!("Cannot listen on {} for {}: {}", endpoint, name, e))
            })?;
            tracing::info!(element = %name, %endpoint, "Listening");
            listeners.push((name, endpoint.clone(), listener));
        }

        Ok(Self { network, listeners })
    }

    /// Shared state of the simulated elements
    pub fn network(&self) -> SharedNetwork {
        Arc::clone(&self.network)
    }

    /// Serve until `shutdown` resolves or a client sends `shutdown`
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let stop_tx = Arc::new(stop_tx);

        let mut endpoints = Vec::with_capacity(self.listeners.len());
        let mut tasks = JoinSet::new();
        for (name, endpoint, listener) in self.listeners {
            endpoints.push(endpoint);
            tasks.spawn(accept_loop(
                name,
                listener,
                Arc::clone(&self.network),
                Arc::clone(&stop_tx),
                stop_tx.subscribe(),
            ));
        }

        tokio::select! {
            _ = shutdown => tracing::info!("Shutdown signal received"),
            _ = stop_rx.changed() => tracing::info!("Shutdown requested by a client"),
        }

        stop_tx.send_replace(true);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Accept loop ended abnormally: {}", e);
            }
        }

        for endpoint in &endpoints {
            if let Endpoint::Local(name) = endpoint {
                if let Err(e) = paths::remove_socket(Path::new(name)) {
                    tracing::warn!(%endpoint, "Could not remove socket: {}", e);
                }
            }
        }

        tracing::info!("Simulated network shut down");
        Ok(())
    }

    /// Serve in a background task
    pub fn spawn(self) -> SimHandle {
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(self.serve(async move {
            let _ = stopped.await;
        }));
        SimHandle {
            stop: Some(stop),
            task,
        }
    }
}

/// Handle to an agent serving in the background
pub struct SimHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl SimHandle {
    /// Stop serving and wait until every listener is closed
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Simulated network task failed: {}", e)))?
    }
}

/// Resolves on SIGTERM or SIGINT
#[cfg(unix)]
pub async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down gracefully"),
        _ = sigint.recv() => tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully"),
    }
    Ok(())
}

/// Resolves on Ctrl+C
#[cfg(not(unix))]
pub async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl+C, shutting down gracefully");
    Ok(())
}

async fn accept_loop(
    element: String,
    listener: ElementListener,
    network: SharedNetwork,
    stop: Arc<watch::Sender<bool>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(stream) => {
                    tracing::debug!(element = %element, "Control connection accepted");
                    let element = element.clone();
                    let network = Arc::clone(&network);
                    let stop = Arc::clone(&stop);
                    let stop_rx = stop.subscribe();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(&element, stream, &network, &stop, stop_rx).await {
                            tracing::error!(element = %element, "Error handling client: {}", e);
                        }
                    });
                }
                Err(e) => tracing::error!(element = %element, "Accept error: {}", e),
            }
        }
    }
    tracing::debug!(element = %element, "Listener closed");
}

/// Answer requests on one control connection until the client leaves
async fn serve_connection(
    element: &str,
    stream: BoxedStream,
    network: &SharedNetwork,
    stop: &watch::Sender<bool>,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<()> {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    loop {
        let request_data = tokio::select! {
            result = transport::recv_message(&mut reader) => match result {
                Ok(data) => data,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    tracing::debug!(element, "Client disconnected");
                    break;
                }
                Err(e) => {
                    tracing::error!(element, "Error reading request: {}", e);
                    break;
                }
            },
            _ = stop_rx.changed() => break,
        };

        let request: Request = match serde_json::from_slice(&request_data) {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(element, "Invalid request: {}", e);
                let response = Response::error(
                    0,
                    IpcError {
                        code: "INVALID_REQUEST".to_string(),
                        message: e.to_string(),
                        detail: None,
                    },
                );
                let json = serde_json::to_vec(&response)?;
                transport::send_message(&mut writer, &json).await?;
                continue;
            }
        };

        tracing::debug!(element, command = request.command.name(), "Received command");

        if matches!(request.command, Command::Shutdown) {
            let json = serde_json::to_vec(&Response::ok(request.id))?;
            transport::send_message(&mut writer, &json).await?;
            stop.send_replace(true);
            break;
        }

        let response = handler::handle_command(network, element, request.id, request.command).await;
        let json = serde_json::to_vec(&response)?;
        transport::send_message(&mut writer, &json).await?;
    }

    Ok(())
}
