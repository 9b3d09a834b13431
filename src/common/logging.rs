//! Logging and tracing configuration
//!
//! The CLI logs compactly to stdout. The simulated element agent is a
//! long-running process, so it also writes a detailed log file.

use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

/// Initialize tracing for scenario runs (stdout logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate (DEBUG with `verbose`), WARN for dependencies.
pub fn init_cli(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("orchestrator=debug,ran_orchestrator=debug,warn")
        } else {
            EnvFilter::new("orchestrator=info,ran_orchestrator=info,warn")
        }
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(verbose)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init();
}

/// Initialize tracing for the simulated element agent (file + stderr logging)
///
/// Writes to `<data dir>/logs/sim.log` and stderr. Returns the log file path
/// when file logging could be set up.
pub fn init_agent() -> Option<PathBuf> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("orchestrator=debug,info"));

    if let Some(log_file) = agent_log_path() {
        if let Some(dir) = log_file.parent() {
            if std::fs::create_dir_all(dir).is_ok() {
                match std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&log_file)
                {
                    Ok(file) => {
                        let file_layer = fmt::layer()
                            .with_writer(file)
                            .with_ansi(false)
                            .with_target(true)
                            .with_thread_ids(true)
                            .with_file(true)
                            .with_line_number(true);

                        let stderr_layer = fmt::layer()
                            .with_writer(std::io::stderr)
                            .with_target(false)
                            .compact();

                        let _ = tracing_subscriber::registry()
                            .with(filter)
                            .with(file_layer)
                            .with(stderr_layer)
                            .try_init();

                        return Some(log_file);
                    }
                    Err(e) => {
                        eprintln!("Warning: Could not open log file: {}", e);
                    }
                }
            }
        }
    }

    // Fallback: stderr only
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true),
        )
        .try_init();

    None
}

/// Get the path to the agent log file
pub fn agent_log_path() -> Option<PathBuf> {
    paths::log_dir().map(|d| d.join("sim.log"))
}
