//! Construction of concrete collaborators and launchers.

use std::{ffi::OsString, path::Path, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ledger::RpcLedger;
use listener::{LaunchError, SubprocessLauncher, WorkflowLauncher};
use pipeline::{RunId, RunReport};
use runner::{Collaborators, WorkflowRunner};
use snapshot::HttpSnapshotSource;
use tracing::{info, warn};
use verifier::{DaLayerClient, VerifierClient};

use crate::config::{LaunchMode, RelayConfig};

/// Wires the HTTP and JSON-RPC adapters into a runner.
pub fn build_runner(config: &RelayConfig) -> Result<WorkflowRunner> {
    let collaborators = Collaborators {
        snapshots: Arc::new(
            HttpSnapshotSource::new(config.snapshot_config()?)
                .context("Failed to build snapshot client")?,
        ),
        verifier: Arc::new(
            VerifierClient::new(config.verifier_config()?)
                .context("Failed to build verifier client")?,
        ),
        proofs: Arc::new(
            DaLayerClient::new(config.da_layer_config()?)
                .context("Failed to build data-availability client")?,
        ),
        ledger: Arc::new(
            RpcLedger::new(config.ledger_config()?).context("Failed to build ledger client")?,
        ),
    };

    Ok(WorkflowRunner::new(config.definition()?, collaborators)
        .with_finalization_poll(config.finalization_policy()?)
        .with_proof_poll(config.proof_policy()?))
}

/// Logs the outcome of a completed run.
pub fn log_report(report: &RunReport) {
    let elapsed = report.finished_at.duration_since(report.started_at);
    if report.acknowledged {
        info!(
            run_id = %report.run_id,
            snapshot_id = %report.snapshot_id,
            round = %report.round,
            transaction = %report.transaction,
            elapsed_secs = elapsed.as_secs(),
            "Reputation update complete"
        );
    } else {
        warn!(
            run_id = %report.run_id,
            snapshot_id = %report.snapshot_id,
            round = %report.round,
            transaction = %report.transaction,
            elapsed_secs = elapsed.as_secs(),
            "Reputation update complete, snapshot not marked processed"
        );
    }
}

/// Runs the workflow on the gateway's runtime.
pub struct InProcessLauncher {
    runner: WorkflowRunner,
}

#[async_trait]
impl WorkflowLauncher for InProcessLauncher {
    async fn launch(&self, run_id: RunId) -> Result<(), LaunchError> {
        let report = self.runner.run(run_id).await?;
        log_report(&report);
        Ok(())
    }
}

/// Selects the launcher for `serve`.
///
/// Subprocess mode re-invokes `program` (this executable unless configured)
/// as `run --network <network>`, forwarding `--config` when one was given.
pub fn build_launcher(
    config: &RelayConfig,
    config_path: Option<&Path>,
) -> Result<Arc<dyn WorkflowLauncher>> {
    match config.launch_mode {
        LaunchMode::InProcess => Ok(Arc::new(InProcessLauncher {
            runner: build_runner(config)?,
        })),
        LaunchMode::Subprocess => {
            let program = match &config.workflow_program {
                Some(program) => program.clone(),
                None => std::env::current_exe()
                    .context("Failed to locate the running executable")?,
            };
            let launcher = SubprocessLauncher::new(program, subprocess_args(config, config_path));
            info!(command = %launcher.command_line(), "Runs will be launched as subprocesses");
            Ok(Arc::new(launcher))
        }
    }
}

fn subprocess_args(config: &RelayConfig, config_path: Option<&Path>) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    if let Some(path) = config_path {
        args.push("--config".into());
        args.push(path.into());
    }
    args.push("--network".into());
    args.push(config.network.clone().into());
    args.push("run".into());
    args
}

#[cfg(test)]
mod tests {
    use figment::{
        providers::{Format, Toml},
        Figment,
    };

    use super::*;

    fn config(toml: &str) -> RelayConfig {
        RelayConfig::from_figment(Figment::new().merge(Toml::string(toml))).unwrap()
    }

    #[test]
    fn subprocess_args_forward_network_and_config() {
        let config = config("network = \"coston2\"");

        let args = subprocess_args(&config, Some(Path::new("/etc/relay.toml")));

        assert_eq!(
            args,
            ["--config", "/etc/relay.toml", "--network", "coston2", "run"]
                .map(OsString::from)
                .to_vec()
        );
    }

    #[test]
    fn subprocess_mode_needs_no_collaborators() {
        let config = config("workflow_program = \"/usr/local/bin/reputation-relay\"");

        assert!(build_launcher(&config, None).is_ok());
    }

    #[test]
    fn in_process_mode_requires_collaborator_config() {
        let config = config("launch_mode = \"in-process\"");

        let err = build_launcher(&config, None).err().unwrap();

        assert!(err.to_string().contains("snapshot_url"));
    }
}
