//! Control-channel transport layer
//!
//! Elements are reached either over TCP (lab equipment, remote hosts) or
//! over local sockets (Unix domain sockets / Windows named pipes via the
//! interprocess crate). Both carry the same length-prefixed frames.

use std::fmt;
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::common::{paths, Error};

/// Maximum message size (10 MB)
const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

// Platform-specific imports and type aliases
#[cfg(unix)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericFilePath, ListenerOptions};
}

#[cfg(windows)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericNamespaced, ListenerOptions};
}

use platform::*;

/// Any bidirectional byte stream a control channel can run over
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Type-erased control stream
pub type BoxedStream = Box<dyn AsyncStream>;

/// Address of an element control agent
///
/// Written as `tcp://host:port` or `local:<socket path or pipe name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    Tcp(String),
    Local(String),
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = s.strip_prefix("tcp://") {
            if addr.rsplit_once(':').map_or(true, |(host, port)| {
                host.is_empty() || port.parse::<u16>().is_err()
            }) {
                return Err(Error::Config(format!(
                    "Invalid TCP endpoint '{}', expected tcp://host:port",
                    s
                )));
            }
            return Ok(Self::Tcp(addr.to_string()));
        }

        if let Some(name) = s.strip_prefix("local:") {
            if name.is_empty() {
                return Err(Error::Config("Empty local socket name".to_string()));
            }
            return Ok(Self::Local(name.to_string()));
        }

        Err(Error::Config(format!(
            "Unknown endpoint '{}'. Supported forms: tcp://host:port, local:<name>",
            s
        )))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{}", addr),
            Self::Local(name) => write!(f, "local:{}", name),
        }
    }
}

/// Listener for incoming control connections on one endpoint
pub enum ElementListener {
    Tcp(TcpListener),
    Local(Listener),
}

impl ElementListener {
    /// Bind an endpoint, replacing a stale socket file if needed
    pub async fn bind(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => Ok(Self::Tcp(TcpListener::bind(addr.as_str()).await?)),
            Endpoint::Local(name) => {
                #[cfg(unix)]
                let listener = {
                    let path = std::path::Path::new(name);
                    paths::ensure_socket_dir(path)?;
                    paths::remove_socket(path)?;

                    let fs_name = name.as_str().to_fs_name::<GenericFilePath>()?;
                    let listener = ListenerOptions::new().name(fs_name).create_tokio()?;

                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
                    listener
                };

                #[cfg(windows)]
                let listener = {
                    let ns_name = name.as_str().to_ns_name::<GenericNamespaced>()?;
                    ListenerOptions::new().name(ns_name).create_tokio()?
                };

                Ok(Self::Local(listener))
            }
        }
    }

    /// Accept the next control connection
    pub async fn accept(&self) -> io::Result<BoxedStream> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                tracing::debug!(%peer, "Accepted TCP control connection");
                Ok(Box::new(stream))
            }
            Self::Local(listener) => Ok(Box::new(listener.accept().await?)),
        }
    }
}

/// Connect to an element control endpoint
pub async fn connect(endpoint: &Endpoint) -> io::Result<BoxedStream> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr.as_str()).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        Endpoint::Local(name) => {
            #[cfg(unix)]
            let stream = {
                let fs_name = name.as_str().to_fs_name::<GenericFilePath>()?;
                Stream::connect(fs_name).await?
            };

            #[cfg(windows)]
            let stream = {
                let ns_name = name.as_str().to_ns_name::<GenericNamespaced>()?;
                Stream::connect(ns_name).await?
            };

            Ok(Box::new(stream))
        }
    }
}

/// Send a length-prefixed message
pub async fn send_message<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    if data.len() > MAX_MESSAGE_SIZE as usize {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "Message too large"));
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive a length-prefixed message
pub async fn recv_message<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);

    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes", len),
        ));
    }

    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data).await?;
    Ok(data)
}
