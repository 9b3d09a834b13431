//! CLI command definitions
//!
//! Defines the clap commands for the orchestrator CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a scenario over its parameter matrix
    Run {
        /// Scenario YAML file, or the name of a built-in scenario (paging)
        scenario: String,

        /// Only run these variants (e.g. band:3-scs:15-bandwidth:10)
        /// Can be specified multiple times
        #[arg(long = "variant")]
        variants: Vec<String>,

        /// Only run on this testbed
        #[arg(long)]
        testbed: Option<String>,

        /// Override the retry budget
        #[arg(long)]
        retries: Option<u32>,

        /// Write a JSON report to this file or directory
        #[arg(long)]
        report: Option<PathBuf>,

        /// Verbose output (every attempt, artifacts, debug logs)
        #[arg(long, short)]
        verbose: bool,
    },

    /// List the variants of a scenario
    Variants {
        /// Scenario YAML file, or the name of a built-in scenario
        scenario: String,
    },

    /// Query the status of every element of the configured testbeds
    Check {
        /// Only check this testbed
        #[arg(long)]
        testbed: Option<String>,
    },

    /// Serve a simulated UE/gNB/5GC testbed
    Sim {
        /// Serve this configured testbed (default: the first one)
        #[arg(long)]
        testbed: Option<String>,

        /// Serve this many UEs on the default local sockets instead
        #[arg(long, conflicts_with = "testbed")]
        ues: Option<usize>,

        /// Fail the next N start requests
        #[arg(long, default_value_t = 0)]
        fail_starts: u32,

        /// Time out the next N attach requests
        #[arg(long, default_value_t = 0)]
        attach_timeouts: u32,

        /// Lose half the replies of the next N pings
        #[arg(long, default_value_t = 0)]
        lossy_pings: u32,

        /// Raise an application fault on the next N start/attach/ping requests
        #[arg(long, default_value_t = 0)]
        remote_faults: u32,

        /// Report a warning on the next N stop requests
        #[arg(long, default_value_t = 0)]
        stop_warnings: u32,

        /// Hold every ping reply back this many milliseconds
        #[arg(long, default_value_t = 0)]
        ping_delay_ms: u64,
    },
}
