//! Port traits for the external collaborators of a workflow run.
//!
//! Each trait is implemented by one infrastructure crate:
//!
//! | Trait | Implemented in |
//! |-------|----------------|
//! | [`SnapshotSource`] | `snapshot` |
//! | [`Verifier`] | `verifier` |
//! | [`ProofStore`] | `verifier` |
//! | [`Ledger`] | `ledger` |
//!
//! The traits are object-safe (via `async_trait`) so the runner can hold
//! them as `Arc<dyn Trait>` and tests can substitute in-memory fakes.

use async_trait::async_trait;

use crate::{
    AttestationRequestBody, HexBytes, PreparedRequest, Proof, RoundId, Snapshot, SnapshotId,
    TransactionHash, WorkflowError,
};

/// The HTTP API publishing check-in snapshots.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetches the current snapshot.
    ///
    /// Fails with [`WorkflowError::Validation`] if the payload carries no
    /// snapshot identifier.
    async fn fetch_snapshot(&self) -> Result<Snapshot, WorkflowError>;

    /// Marks a snapshot as processed so it is not attested again.
    async fn mark_processed(&self, snapshot_id: &SnapshotId) -> Result<(), WorkflowError>;
}

/// The attestation verifier that validates and encodes requests.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Submits an extraction rule and returns the verifier's verdict.
    ///
    /// A non-`VALID` status is returned as data, not as an error; callers
    /// decide via [`PreparedRequest::into_encoded_request`].
    async fn prepare_request(
        &self,
        body: &AttestationRequestBody,
    ) -> Result<PreparedRequest, WorkflowError>;
}

/// The data-availability layer serving proofs for finalized rounds.
#[async_trait]
pub trait ProofStore: Send + Sync {
    /// Looks up the proof for `request` in `round`.
    ///
    /// Returns `Ok(None)` while the proof is not yet available.
    async fn fetch_proof(
        &self,
        request: &HexBytes,
        round: RoundId,
    ) -> Result<Option<Proof>, WorkflowError>;
}

/// The ledger hosting the attestation hub and the destination contract.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Registers an encoded attestation request and returns the round it was
    /// assigned to.
    async fn submit_attestation_request(
        &self,
        request: &HexBytes,
    ) -> Result<RoundId, WorkflowError>;

    /// Returns `true` once the round's merkle root has been finalized.
    async fn is_round_finalized(&self, round: RoundId) -> Result<bool, WorkflowError>;

    /// Delivers an attested response and its proof to the destination
    /// contract.
    async fn apply_proof(&self, proof: &Proof) -> Result<TransactionHash, WorkflowError>;
}
