//! CLI command handling
//!
//! Dispatches CLI commands and formats their output.

use std::path::Path;
use std::sync::Arc;

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::{Config, Testbed};
use crate::common::{Error, Result};
use crate::element::{ElementFactory, RpcFactory};
use crate::ipc::protocol::{Command, StatusResult};
use crate::ipc::{ElementClient, Endpoint};
use crate::scenario::{
    print_report, print_summary, run_matrix, ExecutorOptions, RetryPolicy, RunReport, Scenario,
};
use crate::sim::{shutdown_signal, SimAgent, SimFaults};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;

    match command {
        Commands::Run {
            scenario,
            variants,
            testbed,
            retries,
            report,
            verbose,
        } => {
            let scenario = Scenario::resolve(&scenario)?;
            let mut selected = scenario.variants()?;
            if !variants.is_empty() {
                selected.retain(|v| variants.contains(&v.id()));
                if selected.is_empty() {
                    return Err(Error::Config(format!(
                        "No variant of '{}' matches {}",
                        scenario.name,
                        variants.join(", ")
                    )));
                }
            }

            let retry = scenario.retry.clone().unwrap_or_else(|| config.retry.clone());
            let mut policy = RetryPolicy::new(&retry);
            if let Some(budget) = retries {
                policy = policy.with_budget(budget);
            }
            let options = ExecutorOptions::new(&scenario, &config.timeouts);

            let factories: Vec<Arc<dyn ElementFactory>> = config
                .select_testbeds(testbed.as_deref())?
                .into_iter()
                .map(|t| Arc::new(RpcFactory::new(t, config.timeouts.clone())) as Arc<dyn ElementFactory>)
                .collect();

            println!(
                "\n{} {}",
                "Running Scenario:".blue().bold(),
                scenario.name.white().bold()
            );
            if let Some(desc) = &scenario.description {
                println!("  {}", desc.dimmed());
            }
            println!(
                "  {}",
                format!(
                    "{} variant(s) on {} testbed(s), retry budget {}",
                    selected.len(),
                    factories.len(),
                    policy.budget()
                )
                .dimmed()
            );

            let scenario = Arc::new(scenario);
            let reports = run_matrix(
                Arc::clone(&scenario),
                selected,
                factories,
                Arc::new(policy),
                options,
            )
            .await?;

            for r in &reports {
                print_report(r, verbose);
            }

            let run = RunReport::new(&scenario.name, &reports);
            print_summary(&run);

            if let Some(path) = report.or_else(|| config.reports.directory.clone()) {
                let file = run.write_json(&path)?;
                println!("Report written to {}", file.display());
            }

            if run.failed > 0 {
                return Err(Error::Verification(format!(
                    "{} of {} variants failed",
                    run.failed,
                    reports.len()
                )));
            }
            Ok(())
        }

        Commands::Variants { scenario } => {
            let scenario = Scenario::resolve(&scenario)?;
            let variants = scenario.variants()?;
            println!("{} ({} variants)", scenario.name.bold(), variants.len());
            for variant in variants {
                println!("  {}", variant);
            }
            Ok(())
        }

        Commands::Check { testbed } => {
            let mut unreachable = 0;
            for bed in config.select_testbeds(testbed.as_deref())? {
                println!("{} {}", "Testbed:".blue().bold(), bed.name.white().bold());
                for (name, endpoint) in bed.endpoints() {
                    match element_status(&name, endpoint, &config).await {
                        Ok(status) => println!(
                            "  {} {:<6} {:<4} {}{}",
                            "✓".green(),
                            name,
                            status.role.to_string(),
                            status.state,
                            status
                                .rrc
                                .map(|rrc| format!(" (rrc {})", rrc))
                                .unwrap_or_default()
                        ),
                        Err(e) => {
                            unreachable += 1;
                            println!("  {} {:<6} {}", "✗".red(), name, e.to_string().dimmed());
                        }
                    }
                }
            }

            if unreachable > 0 {
                return Err(Error::Config(format!("{} element(s) unreachable", unreachable)));
            }
            Ok(())
        }

        Commands::Sim {
            testbed,
            ues,
            fail_starts,
            attach_timeouts,
            lossy_pings,
            remote_faults,
            stop_warnings,
            ping_delay_ms,
        } => {
            let bed = match ues {
                Some(count) => Testbed::local(count),
                None => config
                    .select_testbeds(testbed.as_deref())?
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::Config("No testbed configured".to_string()))?,
            };
            let faults = SimFaults {
                start_failures: fail_starts,
                attach_timeouts,
                lossy_pings,
                remote_faults,
                stop_warnings,
                ping_delay_ms,
            };

            tracing::info!(testbed = %bed.name, ?faults, "Starting simulated network");
            let agent = SimAgent::bind(&bed, faults).await?;
            agent
                .serve(async {
                    if let Err(e) = shutdown_signal().await {
                        tracing::error!("Cannot listen for signals: {}", e);
                        std::future::pending::<()>().await;
                    }
                })
                .await
        }
    }
}

async fn element_status(
    name: &str,
    endpoint: &Endpoint,
    config: &Config,
) -> Result<StatusResult> {
    let mut client = ElementClient::connect(
        name,
        endpoint,
        config.timeouts.connect(),
        config.timeouts.request(),
    )
    .await?;
    client.request(Command::Status).await
}
