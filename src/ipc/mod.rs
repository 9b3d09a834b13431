//! Control channel between the orchestrator and network elements
//!
//! Length-prefixed JSON over TCP or local sockets (Unix domain sockets on
//! Unix/macOS, named pipes on Windows via the interprocess crate).

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::ElementClient;
pub use transport::Endpoint;
