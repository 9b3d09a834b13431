//! RAN scenario orchestrator CLI
//!
//! Drives UE, gNB and 5GC control agents through test scenarios such as
//! the paging test, and can serve a simulated testbed for local runs.

use std::path::PathBuf;

use clap::Parser;
use commands::Commands;
use orchestrator::common::logging;
use orchestrator::{cli, commands};

#[derive(Parser)]
#[command(name = "ran-orchestrator", about = "UE/gNB/5GC test scenario orchestrator")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Sim { .. } => {
            if let Some(path) = logging::init_agent() {
                eprintln!("Logging to {}", path.display());
            }
        }
        Commands::Run { verbose, .. } => logging::init_cli(*verbose),
        _ => logging::init_cli(false),
    }

    if let Err(e) = cli::dispatch(cli.command, cli.config.as_deref()).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
