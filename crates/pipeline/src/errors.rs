//! Error and retry-policy types for the attestation workflow.
//!
//! [`WorkflowError`] covers every condition that ends (or, for
//! acknowledgment, degrades) a workflow run. Adapters map transport failures
//! into it; the runner catches all of them at the run boundary.
//!
//! [`RetryPolicy`] is a cross-cutting concern: the bounded proof poller asks
//! each error whether another attempt is worthwhile.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{RoundId, SnapshotId};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// - `Retryable` errors: timeouts, connection failures, 5xx and 429 responses.
/// - `NonRetryable` errors: 4xx responses, validation failures, invalid
///   configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried; the run ends.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Upstream services
// ---------------------------------------------------------------------------

/// The external collaborator a failed call was addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Upstream {
    /// The HTTP API publishing check-in snapshots.
    SnapshotSource,
    /// The attestation verifier's `prepareRequest` endpoint.
    Verifier,
    /// The ledger JSON-RPC node.
    Ledger,
    /// The data-availability layer serving proofs.
    DataAvailability,
}

impl std::fmt::Display for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SnapshotSource => "snapshot source",
            Self::Verifier => "verifier",
            Self::Ledger => "ledger",
            Self::DataAvailability => "data-availability layer",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Workflow errors
// ---------------------------------------------------------------------------

/// Errors produced while executing one workflow run.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// A call to an external collaborator failed at the transport or HTTP level.
    #[error("{service} request failed: {message}")]
    Upstream {
        /// Which collaborator was being called.
        service: Upstream,
        /// Description of the failure.
        message: String,
        /// Whether repeating the call could succeed.
        retry: RetryPolicy,
    },

    /// A collaborator answered, but the answer is unusable: a required field
    /// is absent, the verifier status is not `VALID`, or a decoded value
    /// disagrees with what was requested.
    #[error("Validation failed: {message}")]
    Validation {
        /// Description of the violated expectation.
        message: String,
    },

    /// The proof for a round did not become available within the poll budget.
    #[error("Proof for round {round} unavailable after {attempts} attempts")]
    ProofUnavailable {
        /// Round whose proof was requested.
        round: RoundId,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The final "mark processed" call failed after the ledger update
    /// succeeded. Never fatal to the run.
    #[error("Failed to acknowledge snapshot '{snapshot_id}': {message}")]
    Acknowledgment {
        /// Snapshot that could not be marked.
        snapshot_id: SnapshotId,
        /// Description of the failure.
        message: String,
    },

    /// Runtime configuration is missing or invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

impl WorkflowError {
    /// Builds an [`WorkflowError::Upstream`] that may be retried.
    pub fn transient(service: Upstream, message: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            message: message.into(),
            retry: RetryPolicy::Retryable { after: None },
        }
    }

    /// Builds an [`WorkflowError::Upstream`] that must not be retried.
    pub fn permanent(service: Upstream, message: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            message: message.into(),
            retry: RetryPolicy::NonRetryable,
        }
    }

    /// Builds a [`WorkflowError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Builds a [`WorkflowError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Classifies an upstream HTTP status code.
    ///
    /// 429 and 5xx are retryable; every other non-success status is not.
    pub fn from_status(service: Upstream, status: u16, body: &str) -> Self {
        let message = format!("HTTP {status}: {body}");
        if status == 429 || (500..600).contains(&status) {
            Self::transient(service, message)
        } else {
            Self::permanent(service, message)
        }
    }

    /// Returns the retry classification of this error.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Upstream { retry, .. } => retry.clone(),
            Self::Validation { .. }
            | Self::ProofUnavailable { .. }
            | Self::Acknowledgment { .. }
            | Self::Configuration { .. } => RetryPolicy::NonRetryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_rate_limits_are_retryable() {
        assert!(WorkflowError::from_status(Upstream::Ledger, 503, "")
            .retry_policy()
            .is_retryable());
        assert!(WorkflowError::from_status(Upstream::Verifier, 429, "")
            .retry_policy()
            .is_retryable());
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let err = WorkflowError::from_status(Upstream::Verifier, 401, "bad key");
        assert_eq!(err.retry_policy(), RetryPolicy::NonRetryable);
        assert_eq!(err.to_string(), "verifier request failed: HTTP 401: bad key");
    }

    #[test]
    fn validation_errors_are_never_retried() {
        let err = WorkflowError::validation("missing snapshotId");
        assert!(!err.retry_policy().is_retryable());
    }
}
