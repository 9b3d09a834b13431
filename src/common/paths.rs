//! Runtime, configuration and data paths
//!
//! Unix/macOS: element sockets live under $XDG_RUNTIME_DIR or /tmp
//! Windows: elements use named pipes `ran-orchestrator-<username>-<element>`

use std::io;
use std::path::{Path, PathBuf};

/// Name used for directories and socket prefixes
const APP_NAME: &str = "ran-orchestrator";

/// Directory holding the default element sockets
///
/// - Unix: `$XDG_RUNTIME_DIR/ran-orchestrator` or `/tmp/ran-orchestrator-<uid>`
#[cfg(unix)]
pub fn runtime_dir() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_NAME);
    }

    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/{}-{}", APP_NAME, uid))
}

#[cfg(windows)]
pub fn runtime_dir() -> PathBuf {
    PathBuf::new()
}

/// Default local socket name for an element (e.g. "ue-1", "gnb", "5gc")
#[cfg(unix)]
pub fn element_socket_name(element: &str) -> String {
    runtime_dir()
        .join(format!("{}.sock", element))
        .to_string_lossy()
        .into_owned()
}

#[cfg(windows)]
pub fn element_socket_name(element: &str) -> String {
    let username = std::env::var("USERNAME").unwrap_or_else(|_| "default".to_string());
    format!("{}-{}-{}", APP_NAME, username, element)
}

/// Ensure the directory of a socket path exists with owner-only permissions
#[cfg(unix)]
pub fn ensure_socket_dir(socket: &Path) -> io::Result<()> {
    let dir = socket
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Invalid socket path"))?;

    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}

#[cfg(windows)]
pub fn ensure_socket_dir(_socket: &Path) -> io::Result<()> {
    Ok(())
}

/// Remove a stale socket file if it exists
#[cfg(unix)]
pub fn remove_socket(socket: &Path) -> io::Result<()> {
    if socket.exists() {
        std::fs::remove_file(socket)?;
    }
    Ok(())
}

#[cfg(windows)]
pub fn remove_socket(_socket: &Path) -> io::Result<()> {
    Ok(())
}

/// Get the configuration directory path
///
/// - Linux: `~/.config/ran-orchestrator/`
/// - macOS: `~/Library/Application Support/ran-orchestrator/`
/// - Windows: `%APPDATA%\ran-orchestrator\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

/// Default directory for JSON scenario reports
pub fn reports_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("reports"))
}
