//! Debounced trigger gateway.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use pipeline::{RunId, WorkflowError};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use crate::single_flight::SingleFlight;

// ---------------------------------------------------------------------------
// Launcher port
// ---------------------------------------------------------------------------

/// Failure of one launched run, as seen by the gateway.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Workflow process exited unsuccessfully ({status})")]
    Exited { status: String },

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

/// Starts one workflow run and resolves when it settles.
#[async_trait]
pub trait WorkflowLauncher: Send + Sync {
    async fn launch(&self, run_id: RunId) -> Result<(), LaunchError>;
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Why a trigger was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// A run is already in flight.
    TooManyRequests,
}

/// Outcome of [`TriggerGateway::trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerResult {
    Accepted { run_id: RunId },
    Rejected(RejectReason),
}

/// Admits at most one workflow run at a time.
pub struct TriggerGateway {
    flight: Arc<SingleFlight>,
    launcher: Arc<dyn WorkflowLauncher>,
    current: Mutex<Option<JoinHandle<()>>>,
}

impl TriggerGateway {
    pub fn new(launcher: Arc<dyn WorkflowLauncher>) -> Self {
        Self {
            flight: SingleFlight::new(),
            launcher,
            current: Mutex::new(None),
        }
    }

    /// Starts a run unless one is in flight.
    ///
    /// The busy flag is set before the run is spawned and before this method
    /// returns. The spawned task owns the permit, so the flag clears when the
    /// run settles by any path, including a panic inside the launcher.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn trigger(&self) -> TriggerResult {
        let Some(permit) = self.flight.try_acquire() else {
            info!("Trigger ignored, a run is already in progress");
            return TriggerResult::Rejected(RejectReason::TooManyRequests);
        };

        let run_id = RunId::new_random();
        let launcher = Arc::clone(&self.launcher);
        let span = info_span!("gateway_run", run_id = %run_id);

        let handle = tokio::spawn(
            async move {
                let _permit = permit;
                info!("Workflow run started");
                match launcher.launch(run_id).await {
                    Ok(()) => info!("Workflow run finished"),
                    Err(e) => error!(error = %e, "Workflow run failed"),
                }
            }
            .instrument(span),
        );

        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            if !previous.is_finished() {
                warn!("Previous run handle was still settling when replaced");
            }
        }

        TriggerResult::Accepted { run_id }
    }

    /// Whether a run is in flight.
    pub fn is_busy(&self) -> bool {
        self.flight.is_busy()
    }

    /// Takes the handle of the most recently accepted run, if any.
    ///
    /// The handle resolves after the run has settled and the busy flag has
    /// been cleared. A panic inside the run surfaces here as a `JoinError`.
    pub fn take_run_handle(&self) -> Option<JoinHandle<()>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl std::fmt::Debug for TriggerGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerGateway")
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}
