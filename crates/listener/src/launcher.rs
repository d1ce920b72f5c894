//! Subprocess launcher.

use std::{ffi::OsString, path::PathBuf, process::Stdio};

use async_trait::async_trait;
use pipeline::RunId;
use tokio::process::Command;
use tracing::{info, warn};

use crate::gateway::{LaunchError, WorkflowLauncher};

/// Environment variable carrying the run id into the child process.
pub const RUN_ID_ENV: &str = "RELAY_RUN_ID";

/// Runs a fixed command per trigger and waits for it to exit.
///
/// Standard output, standard error, and the exit status are captured for
/// logging only. The child inherits the gateway's environment plus
/// [`RUN_ID_ENV`].
#[derive(Debug, Clone)]
pub struct SubprocessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl SubprocessLauncher {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The command line, for logging.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl WorkflowLauncher for SubprocessLauncher {
    async fn launch(&self, run_id: RunId) -> Result<(), LaunchError> {
        info!(command = %self.command_line(), "Starting workflow process");

        let output = Command::new(&self.program)
            .args(&self.args)
            .env(RUN_ID_ENV, run_id.to_string())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| LaunchError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            info!(stdout = %stdout.trim_end(), "Workflow process output");
        }
        if !stderr.trim().is_empty() {
            warn!(stderr = %stderr.trim_end(), "Workflow process error output");
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(LaunchError::Exited {
                status: output.status.to_string(),
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_exit_is_ok() {
        let launcher = SubprocessLauncher::new("sh", ["-c", "echo \"run $RELAY_RUN_ID\""]);
        launcher.launch(RunId::new_random()).await.unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let launcher = SubprocessLauncher::new("sh", ["-c", "echo boom >&2; exit 3"]);

        let err = launcher.launch(RunId::new_random()).await.unwrap_err();

        assert!(matches!(err, LaunchError::Exited { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let launcher = SubprocessLauncher::new("/nonexistent/reputation-relay", ["run"]);

        let err = launcher.launch(RunId::new_random()).await.unwrap_err();

        assert!(matches!(err, LaunchError::Spawn { .. }));
    }

    #[test]
    fn command_line_joins_program_and_args() {
        let launcher = SubprocessLauncher::new("reputation-relay", ["run", "--network", "coston2"]);
        assert_eq!(launcher.command_line(), "reputation-relay run --network coston2");
    }
}
