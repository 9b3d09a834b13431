//! Simulated element agent
//!
//! Serves the control protocol for a whole UE/gNB/5GC testbed from one
//! process, backed by an in-memory network model. Used for local runs and
//! by the integration tests; real labs run their own agents.

mod handler;
mod network;
mod server;

pub use network::{ElementState, SimFaults, SimNetwork, CORE_ADDRESS, GNB_ADDRESS};
pub use server::{shutdown_signal, SimAgent, SimHandle};

use std::sync::Arc;
use tokio::sync::Mutex;

/// Network state shared by every element connection
pub type SharedNetwork = Arc<Mutex<SimNetwork>>;
