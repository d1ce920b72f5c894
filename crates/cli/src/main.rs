//! Reputation relay entry point.
//!
//! This binary is the composition root. It:
//!
//! 1. parses the command line and loads [`config::RelayConfig`];
//! 2. installs the tracing subscriber ([`telemetry`]);
//! 3. builds the concrete collaborators and hands them to the runner or the
//!    gateway ([`compose`]).
//!
//! | Command | Behaviour |
//! |---------|-----------|
//! | `serve` | Trigger gateway on `host:port`; one run at a time |
//! | `run`   | One workflow run in the foreground; exit code reports the outcome |

mod compose;
mod config;
mod telemetry;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use listener::{server, TriggerGateway, RUN_ID_ENV};
use pipeline::RunId;
use tracing::{error, info, warn};

use crate::{config::RelayConfig, telemetry::Telemetry};

#[derive(Parser)]
#[command(name = "reputation-relay", version, about = "Attested reputation updates on demand")]
struct Cli {
    /// Configuration file (defaults to ./reputation-relay.toml if present)
    #[arg(long, global = true, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Network name, overriding the configured one
    #[arg(long, global = true)]
    network: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the trigger gateway
    Serve,
    /// Execute one workflow run and exit
    Run {
        /// Correlation id for log lines (random if absent)
        #[arg(long, env = RUN_ID_ENV)]
        run_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = RelayConfig::load(cli.config.as_deref(), cli.network.as_deref())?;
    let telemetry = Telemetry::init(config.otlp_endpoint.as_deref())?;

    let result = match &cli.command {
        Command::Serve => serve(&config, &cli).await,
        Command::Run { run_id } => run_once(&config, run_id.as_deref()).await,
    };

    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "reputation-relay exiting with error");
    }
    telemetry.shutdown();
    result
}

async fn run_once(config: &RelayConfig, run_id: Option<&str>) -> Result<()> {
    let run_id = match run_id {
        Some(raw) => RunId::parse(raw).with_context(|| format!("invalid run id '{raw}'"))?,
        None => RunId::new_random(),
    };
    info!(run_id = %run_id, network = %config.network, "Starting workflow run");

    let runner = compose::build_runner(config)?;
    let report = runner.run(run_id).await.context("Workflow run failed")?;
    compose::log_report(&report);
    Ok(())
}

async fn serve(config: &RelayConfig, cli: &Cli) -> Result<()> {
    config.check_required()?;
    let addr = config.socket_addr()?;
    let launcher = compose::build_launcher(config, cli.config.as_deref())?;
    let gateway = Arc::new(TriggerGateway::new(launcher));

    info!(
        network = %config.network,
        launch_mode = ?config.launch_mode,
        "Starting reputation trigger gateway"
    );
    server::start_server(Arc::clone(&gateway), addr, server::shutdown_signal())
        .await
        .with_context(|| format!("Trigger gateway failed on {addr}"))?;

    if let Some(handle) = gateway.take_run_handle().filter(|h| !h.is_finished()) {
        let grace = config.shutdown_grace();
        warn!(grace_secs = grace.as_secs(), "Waiting for the in-flight run to settle");
        if tokio::time::timeout(grace, handle).await.is_err() {
            warn!("Shutdown grace period expired with a run still in flight");
        }
    }

    info!("Reputation trigger gateway stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_line_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "reputation-relay",
            "run",
            "--network",
            "coston2",
            "--config",
            "relay.toml",
            "--run-id",
            "9f1c6c1e-8a53-4a8e-9b7e-3f0d2c1b4a5e",
        ])
        .unwrap();

        assert_eq!(cli.network.as_deref(), Some("coston2"));
        assert_eq!(cli.config, Some(PathBuf::from("relay.toml")));
        assert!(matches!(cli.command, Command::Run { run_id: Some(_) }));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["reputation-relay"]).is_err());
    }
}
