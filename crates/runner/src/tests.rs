use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use pipeline::{
    attestation::encode_name, AttestationRequestBody, AttestationType, HexBytes, Ledger,
    PollPolicy, PreparedRequest, Proof, ProofStore, RoundId, RunId, Snapshot, SnapshotId,
    SnapshotSource, SourceId, TransactionHash, Upstream, Verifier, VerifierStatus, WorkflowError,
};
use serde_json::json;

use super::*;

const ROUND: u64 = 1041;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FakeSnapshots {
    payload: serde_json::Value,
    fail_fetch: bool,
    fail_ack: bool,
    acknowledged: Mutex<Vec<SnapshotId>>,
}

impl FakeSnapshots {
    fn with_payload(payload: serde_json::Value) -> Self {
        Self {
            payload,
            fail_fetch: false,
            fail_ack: false,
            acknowledged: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SnapshotSource for FakeSnapshots {
    async fn fetch_snapshot(&self) -> Result<Snapshot, WorkflowError> {
        if self.fail_fetch {
            return Err(WorkflowError::transient(Upstream::SnapshotSource, "connection refused"));
        }
        Snapshot::from_payload(self.payload.clone())
    }

    async fn mark_processed(&self, snapshot_id: &SnapshotId) -> Result<(), WorkflowError> {
        if self.fail_ack {
            return Err(WorkflowError::from_status(Upstream::SnapshotSource, 500, "boom"));
        }
        self.acknowledged.lock().unwrap().push(snapshot_id.clone());
        Ok(())
    }
}

struct FakeVerifier {
    status: &'static str,
    calls: AtomicUsize,
}

#[async_trait]
impl Verifier for FakeVerifier {
    async fn prepare_request(
        &self,
        _body: &AttestationRequestBody,
    ) -> Result<PreparedRequest, WorkflowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(PreparedRequest {
            status: VerifierStatus::from(self.status.to_string()),
            abi_encoded_request: Some(HexBytes::new(vec![0xab; 8])),
        })
    }
}

/// Serves scripted answers, then keeps repeating the last one.
struct ScriptedProofs {
    answers: Mutex<VecDeque<Result<Option<Proof>, WorkflowError>>>,
    calls: AtomicUsize,
}

impl ScriptedProofs {
    fn new(answers: Vec<Result<Option<Proof>, WorkflowError>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProofStore for ScriptedProofs {
    async fn fetch_proof(
        &self,
        _request: &HexBytes,
        _round: RoundId,
    ) -> Result<Option<Proof>, WorkflowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut answers = self.answers.lock().unwrap();
        if answers.len() > 1 {
            answers.pop_front().unwrap()
        } else {
            answers.front().cloned().unwrap_or(Ok(None))
        }
    }
}

#[derive(Default)]
struct FakeLedger {
    submitted: AtomicUsize,
    applied: AtomicUsize,
    finalization_checks: AtomicUsize,
    finalize_after: usize,
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn submit_attestation_request(
        &self,
        _request: &HexBytes,
    ) -> Result<RoundId, WorkflowError> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(RoundId::new(ROUND))
    }

    async fn is_round_finalized(&self, _round: RoundId) -> Result<bool, WorkflowError> {
        let checks = self.finalization_checks.fetch_add(1, Ordering::SeqCst);
        Ok(checks >= self.finalize_after)
    }

    async fn apply_proof(&self, _proof: &Proof) -> Result<TransactionHash, WorkflowError> {
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(TransactionHash::new("0xfeed").unwrap())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn word(value: u64) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[24..].copy_from_slice(&value.to_be_bytes());
    w
}

fn proof_for_round(round: u64) -> Proof {
    let mut response = Vec::new();
    response.extend_from_slice(&word(0x20));
    response.extend_from_slice(&encode_name("IJsonApi").unwrap());
    response.extend_from_slice(&encode_name("WEB2").unwrap());
    response.extend_from_slice(&word(round));
    response.extend_from_slice(&word(1_700_000_000));
    Proof {
        merkle_proof: vec![HexBytes::new(vec![1u8; 32]), HexBytes::new(vec![2u8; 32])],
        response: HexBytes::new(response),
    }
}

fn definition() -> WorkflowDefinition {
    WorkflowDefinition {
        request: AttestationRequestBody {
            url: "https://snapshots.example/latest".to_string(),
            postprocess_jq: ".activities".to_string(),
            abi_signature: "{}".to_string(),
        },
        attestation_type: AttestationType::new("IJsonApi").unwrap(),
        source_id: SourceId::new("WEB2").unwrap(),
    }
}

fn immediate(max_attempts: u32) -> PollPolicy {
    PollPolicy::new(Duration::ZERO, Duration::ZERO, max_attempts).unwrap()
}

struct Harness {
    snapshots: Arc<FakeSnapshots>,
    verifier: Arc<FakeVerifier>,
    proofs: Arc<ScriptedProofs>,
    ledger: Arc<FakeLedger>,
}

impl Harness {
    fn new(snapshots: FakeSnapshots, status: &'static str, proofs: ScriptedProofs) -> Self {
        Self {
            snapshots: Arc::new(snapshots),
            verifier: Arc::new(FakeVerifier {
                status,
                calls: AtomicUsize::new(0),
            }),
            proofs: Arc::new(proofs),
            ledger: Arc::new(FakeLedger::default()),
        }
    }

    fn happy() -> Self {
        Self::new(
            FakeSnapshots::with_payload(json!({"snapshotId": "snap-1", "activities": {}})),
            "VALID",
            ScriptedProofs::new(vec![Ok(Some(proof_for_round(ROUND)))]),
        )
    }

    fn runner(&self) -> WorkflowRunner {
        let collaborators = Collaborators {
            snapshots: self.snapshots.clone(),
            verifier: self.verifier.clone(),
            proofs: self.proofs.clone(),
            ledger: self.ledger.clone(),
        };
        WorkflowRunner::new(definition(), collaborators)
            .with_finalization_poll(immediate(5))
            .with_proof_poll(immediate(5))
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_run_applies_proof_and_acknowledges() {
    let h = Harness::happy();
    let run_id = RunId::new_random();

    let report = h.runner().run(run_id).await.expect("run succeeds");

    assert_eq!(report.run_id, run_id);
    assert_eq!(report.snapshot_id.as_str(), "snap-1");
    assert_eq!(report.round, RoundId::new(ROUND));
    assert_eq!(report.transaction.as_str(), "0xfeed");
    assert!(report.acknowledged);
    assert!(report.finished_at >= report.started_at);
    assert_eq!(h.ledger.applied.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.snapshots.acknowledged.lock().unwrap().as_slice(),
        &[SnapshotId::new("snap-1").unwrap()]
    );
}

#[tokio::test]
async fn missing_snapshot_id_aborts_before_verifier() {
    let h = Harness::new(
        FakeSnapshots::with_payload(json!({"activities": {}})),
        "VALID",
        ScriptedProofs::new(vec![]),
    );

    let err = h.runner().run(RunId::new_random()).await.unwrap_err();

    assert!(matches!(err, WorkflowError::Validation { .. }));
    assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.ledger.submitted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn snapshot_fetch_failure_ends_run() {
    let mut snapshots = FakeSnapshots::with_payload(json!({}));
    snapshots.fail_fetch = true;
    let h = Harness::new(snapshots, "VALID", ScriptedProofs::new(vec![]));

    let err = h.runner().run(RunId::new_random()).await.unwrap_err();

    assert!(matches!(
        err,
        WorkflowError::Upstream {
            service: Upstream::SnapshotSource,
            ..
        }
    ));
    assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalid_verifier_status_never_reaches_ledger() {
    let h = Harness::new(
        FakeSnapshots::with_payload(json!({"snapshotId": "snap-1"})),
        "INVALID",
        ScriptedProofs::new(vec![]),
    );

    let err = h.runner().run(RunId::new_random()).await.unwrap_err();

    assert!(matches!(err, WorkflowError::Validation { .. }));
    assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.ledger.submitted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_acknowledgment_does_not_fail_run() {
    let mut snapshots = FakeSnapshots::with_payload(json!({"snapshotId": "snap-9"}));
    snapshots.fail_ack = true;
    let h = Harness::new(
        snapshots,
        "VALID",
        ScriptedProofs::new(vec![Ok(Some(proof_for_round(ROUND)))]),
    );

    let report = h.runner().run(RunId::new_random()).await.expect("run still succeeds");

    assert!(!report.acknowledged);
    assert_eq!(h.ledger.applied.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn waits_for_finalization_and_proof() {
    let mut h = Harness::new(
        FakeSnapshots::with_payload(json!({"snapshotId": "snap-1"})),
        "VALID",
        ScriptedProofs::new(vec![
            Ok(None),
            Err(WorkflowError::transient(Upstream::DataAvailability, "502")),
            Ok(Some(proof_for_round(ROUND))),
        ]),
    );
    h.ledger = Arc::new(FakeLedger {
        finalize_after: 2,
        ..FakeLedger::default()
    });

    let report = h.runner().run(RunId::new_random()).await.expect("run succeeds");

    assert_eq!(report.round, RoundId::new(ROUND));
    assert_eq!(h.ledger.finalization_checks.load(Ordering::SeqCst), 3);
    assert_eq!(h.proofs.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn proof_polling_is_bounded() {
    let h = Harness::new(
        FakeSnapshots::with_payload(json!({"snapshotId": "snap-1"})),
        "VALID",
        ScriptedProofs::new(vec![Ok(None)]),
    );

    let err = h.runner().run(RunId::new_random()).await.unwrap_err();

    assert!(matches!(
        err,
        WorkflowError::ProofUnavailable { attempts: 5, .. }
    ));
    assert_eq!(h.proofs.calls.load(Ordering::SeqCst), 5);
    assert_eq!(h.ledger.applied.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unfinalized_round_is_bounded() {
    let mut h = Harness::happy();
    h.ledger = Arc::new(FakeLedger {
        finalize_after: usize::MAX,
        ..FakeLedger::default()
    });

    let err = h.runner().run(RunId::new_random()).await.unwrap_err();

    assert!(matches!(err, WorkflowError::ProofUnavailable { .. }));
    assert_eq!(h.proofs.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn proof_from_another_round_is_rejected() {
    let h = Harness::new(
        FakeSnapshots::with_payload(json!({"snapshotId": "snap-1"})),
        "VALID",
        ScriptedProofs::new(vec![Ok(Some(proof_for_round(ROUND + 1)))]),
    );

    let err = h.runner().run(RunId::new_random()).await.unwrap_err();

    assert!(matches!(err, WorkflowError::Validation { .. }));
    assert_eq!(h.ledger.applied.load(Ordering::SeqCst), 0);
    assert!(h.snapshots.acknowledged.lock().unwrap().is_empty());
}
