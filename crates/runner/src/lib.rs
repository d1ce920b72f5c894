//! Reputation relay workflow runner.
//!
//! [`WorkflowRunner`] drives one attestation run end to end:
//!
//! 1. fetch the current snapshot and its identifier;
//! 2. ask the verifier to validate and encode the extraction rule;
//! 3. register the encoded request on the ledger, obtaining its round;
//! 4. wait for the round to finalize and for its proof to be published;
//! 5. check the proof's header and deliver it to the destination contract;
//! 6. mark the snapshot processed (best effort).
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** The runner sequences calls between the port traits
//! of the [`pipeline`] crate. It contains no transport details and no domain
//! rules of its own. Every failure in steps 1–5 ends the run with a
//! [`WorkflowError`]; the caller decides how to report it.

pub mod poll;

use std::sync::Arc;

use pipeline::{
    AttestationRequestBody, AttestationType, HexBytes, Ledger, PollPolicy, Proof, ProofStore,
    ResponseHeader, RoundId, RunId, RunReport, SnapshotSource, SourceId, Timestamp, Verifier,
    WorkflowError,
};
use tracing::{info, instrument, warn};

use crate::poll::{poll_until, PollOutcome};

/// What to attest: the extraction rule and the protocol names it is filed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowDefinition {
    /// Rule sent to the verifier.
    pub request: AttestationRequestBody,
    /// Attestation type the proof must carry.
    pub attestation_type: AttestationType,
    /// Source id the proof must carry.
    pub source_id: SourceId,
}

/// The external collaborators a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Snapshot API.
    pub snapshots: Arc<dyn SnapshotSource>,
    /// Attestation verifier.
    pub verifier: Arc<dyn Verifier>,
    /// Data-availability layer.
    pub proofs: Arc<dyn ProofStore>,
    /// Ledger node.
    pub ledger: Arc<dyn Ledger>,
}

/// Executes attestation runs against a fixed set of collaborators.
#[derive(Clone)]
pub struct WorkflowRunner {
    definition: WorkflowDefinition,
    collaborators: Collaborators,
    finalization_poll: PollPolicy,
    proof_poll: PollPolicy,
}

impl WorkflowRunner {
    /// Creates a runner with default poll policies.
    pub fn new(definition: WorkflowDefinition, collaborators: Collaborators) -> Self {
        Self {
            definition,
            collaborators,
            finalization_poll: PollPolicy::default(),
            proof_poll: PollPolicy::default(),
        }
    }

    /// Overrides the schedule used while waiting for round finalization.
    pub fn with_finalization_poll(mut self, policy: PollPolicy) -> Self {
        self.finalization_poll = policy;
        self
    }

    /// Overrides the schedule used while waiting for the proof.
    pub fn with_proof_poll(mut self, policy: PollPolicy) -> Self {
        self.proof_poll = policy;
        self
    }

    /// Executes one run.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of steps 1–5. A failed acknowledgment is
    /// not an error; it is reported through [`RunReport::acknowledged`].
    #[instrument(name = "workflow_run", skip_all, fields(run_id = %run_id))]
    pub async fn run(&self, run_id: RunId) -> Result<RunReport, WorkflowError> {
        let started_at = Timestamp::now();
        let c = &self.collaborators;

        info!(url = %self.definition.request.url, "Fetching snapshot");
        let snapshot = c.snapshots.fetch_snapshot().await?;
        info!(snapshot_id = %snapshot.id, "Found snapshot to process");

        let prepared = c.verifier.prepare_request(&self.definition.request).await?;
        let encoded = prepared.into_encoded_request()?;
        info!(request_bytes = encoded.len(), "Verifier accepted attestation request");

        let round = c.ledger.submit_attestation_request(&encoded).await?;
        info!(round = %round, "Attestation request registered");

        self.await_finalization(round).await?;
        let proof = self.await_proof(&encoded, round).await?;

        let header = ResponseHeader::decode(proof.response.as_bytes())?;
        header.ensure_matches(
            &self.definition.attestation_type,
            &self.definition.source_id,
            round,
        )?;
        info!(
            proof_nodes = proof.merkle_proof.len(),
            lowest_used_timestamp = header.lowest_used_timestamp,
            "Proof retrieved"
        );

        let transaction = c.ledger.apply_proof(&proof).await?;
        info!(transaction = %transaction, "Proof delivered to destination contract");

        let acknowledged = match c.snapshots.mark_processed(&snapshot.id).await {
            Ok(()) => {
                info!(snapshot_id = %snapshot.id, "Marked snapshot as processed");
                true
            }
            Err(err) => {
                let err = WorkflowError::Acknowledgment {
                    snapshot_id: snapshot.id.clone(),
                    message: err.to_string(),
                };
                warn!(error = %err, "Ledger updated but snapshot left unacknowledged");
                false
            }
        };

        Ok(RunReport {
            run_id,
            snapshot_id: snapshot.id,
            round,
            transaction,
            acknowledged,
            started_at,
            finished_at: Timestamp::now(),
        })
    }

    async fn await_finalization(&self, round: RoundId) -> Result<(), WorkflowError> {
        let ledger = &self.collaborators.ledger;
        let check = move || async move {
            let finalized = ledger.is_round_finalized(round).await?;
            Ok::<_, WorkflowError>(finalized.then_some(()))
        };
        let outcome = poll_until(self.finalization_poll, "round finalization", check).await?;

        match outcome {
            PollOutcome::Ready(()) => {
                info!(round = %round, "Round finalized");
                Ok(())
            }
            PollOutcome::Exhausted { attempts } => {
                Err(WorkflowError::ProofUnavailable { round, attempts })
            }
        }
    }

    async fn await_proof(&self, encoded: &HexBytes, round: RoundId) -> Result<Proof, WorkflowError> {
        let proofs = &self.collaborators.proofs;
        let outcome =
            poll_until(self.proof_poll, "proof", move || proofs.fetch_proof(encoded, round))
                .await?;

        match outcome {
            PollOutcome::Ready(proof) => Ok(proof),
            PollOutcome::Exhausted { attempts } => {
                Err(WorkflowError::ProofUnavailable { round, attempts })
            }
        }
    }
}

#[cfg(test)]
mod tests;
