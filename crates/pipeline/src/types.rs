//! Shared value types for the attestation workflow.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! payloads with invariants (hex byte strings round-trip through `0x` text,
//! poll policies always allow at least one attempt) and form the wire
//! envelopes exchanged with external collaborators.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::{RoundId, RunId, SnapshotId, TransactionHash, WorkflowError};

// ---------------------------------------------------------------------------
// Byte strings
// ---------------------------------------------------------------------------

/// An arbitrary byte string carried as `0x`-prefixed lowercase hex on the wire.
///
/// Used for ABI-encoded requests, attested responses, and merkle proof nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct HexBytes(Vec<u8>);

impl HexBytes {
    /// Wraps raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parses a hex string, with or without the `0x` prefix.
    ///
    /// Returns `None` if the string has odd length or non-hex characters.
    pub fn from_hex(value: &str) -> Option<Self> {
        let digits = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .unwrap_or(value);
        hex::decode(digits).ok().map(Self)
    }

    /// Returns the bytes as a slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the number of bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Renders the bytes as `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }
}

impl std::fmt::Display for HexBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for HexBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_hex(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid hex string: {text}")))
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One check-in snapshot as published by the snapshot source.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Identifier echoed back when the snapshot is acknowledged.
    pub id: SnapshotId,
    /// The full JSON document; attested separately by the verifier.
    pub payload: Value,
}

impl Snapshot {
    /// Name of the payload field carrying the snapshot identifier.
    pub const ID_FIELD: &'static str = "snapshotId";

    /// Extracts the snapshot identifier from a raw payload.
    ///
    /// Strings and non-zero numbers are accepted. A missing, empty, zero, or
    /// differently typed identifier is a [`WorkflowError::Validation`].
    pub fn from_payload(payload: Value) -> Result<Self, WorkflowError> {
        let id = match payload.get(Self::ID_FIELD) {
            Some(Value::String(s)) => SnapshotId::new(s.clone()),
            Some(Value::Number(n)) if n.as_f64() != Some(0.0) => SnapshotId::new(n.to_string()),
            _ => None,
        };
        let id = id.ok_or_else(|| {
            WorkflowError::validation(format!(
                "snapshot response did not contain a '{}' property",
                Self::ID_FIELD
            ))
        })?;
        Ok(Self { id, payload })
    }
}

// ---------------------------------------------------------------------------
// Verifier envelopes
// ---------------------------------------------------------------------------

/// The declarative extraction rule the verifier applies to the source URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationRequestBody {
    /// URL the attestors fetch.
    pub url: String,
    /// jq program that reshapes the fetched document.
    #[serde(rename = "postprocessJq")]
    pub postprocess_jq: String,
    /// JSON ABI fragment describing how the jq output is encoded.
    pub abi_signature: String,
}

/// Status reported by the verifier's `prepareRequest` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VerifierStatus {
    /// The request is well-formed and was encoded.
    Valid,
    /// Any other status string (e.g. `"INVALID"`, `"INVALID: JQ PARSE ERROR"`).
    Other(String),
}

impl From<String> for VerifierStatus {
    fn from(value: String) -> Self {
        if value == "VALID" {
            Self::Valid
        } else {
            Self::Other(value)
        }
    }
}

impl From<VerifierStatus> for String {
    fn from(value: VerifierStatus) -> Self {
        match value {
            VerifierStatus::Valid => "VALID".to_string(),
            VerifierStatus::Other(s) => s,
        }
    }
}

/// Response of the verifier's `prepareRequest` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedRequest {
    /// Whether the verifier accepted the request.
    pub status: VerifierStatus,
    /// The ABI-encoded attestation request; absent when the status is not valid.
    #[serde(default)]
    pub abi_encoded_request: Option<HexBytes>,
}

impl PreparedRequest {
    /// Returns the encoded request if the verifier reported `VALID`.
    pub fn into_encoded_request(self) -> Result<HexBytes, WorkflowError> {
        match (self.status, self.abi_encoded_request) {
            (VerifierStatus::Valid, Some(request)) if !request.is_empty() => Ok(request),
            (VerifierStatus::Valid, _) => Err(WorkflowError::validation(
                "verifier reported VALID without an abiEncodedRequest",
            )),
            (VerifierStatus::Other(status), _) => Err(WorkflowError::validation(format!(
                "verifier returned status '{status}'; check the jq filter and ABI signature"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Proof
// ---------------------------------------------------------------------------

/// An attested response together with its merkle inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Sibling hashes from the response leaf to the round's merkle root.
    #[serde(rename = "proof")]
    pub merkle_proof: Vec<HexBytes>,
    /// The ABI-encoded attestation response.
    #[serde(rename = "response_hex")]
    pub response: HexBytes,
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// A bounded polling schedule: wait, ask, and give up after `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    initial_delay: Duration,
    interval: Duration,
    max_attempts: u32,
}

impl PollPolicy {
    /// Creates a [`PollPolicy`], returning `None` if `max_attempts` is zero.
    #[must_use]
    pub fn new(initial_delay: Duration, interval: Duration, max_attempts: u32) -> Option<Self> {
        if max_attempts == 0 {
            None
        } else {
            Some(Self {
                initial_delay,
                interval,
                max_attempts,
            })
        }
    }

    /// Returns the delay to wait before the zero-based `attempt`.
    pub fn delay_before(self, attempt: u32) -> Duration {
        if attempt == 0 {
            self.initial_delay
        } else {
            self.interval
        }
    }

    /// Returns the maximum number of attempts (always at least one).
    pub fn max_attempts(self) -> u32 {
        self.max_attempts
    }

    /// Returns the pause between attempts after the first.
    pub fn interval(self) -> Duration {
        self.interval
    }

    /// Upper bound on the time a caller waits when every attempt comes back
    /// empty: the initial delay plus one interval per attempt.
    pub fn budget(self) -> Duration {
        self.initial_delay
            .saturating_add(self.interval.saturating_mul(self.max_attempts))
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            interval: Duration::from_secs(10),
            max_attempts: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// Summary of one successful workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Correlation identifier of the run.
    pub run_id: RunId,
    /// Snapshot that was attested.
    pub snapshot_id: SnapshotId,
    /// Round under which the attestation was proven.
    pub round: RoundId,
    /// Transaction that delivered the proof to the destination contract.
    pub transaction: TransactionHash,
    /// Whether the snapshot source accepted the "mark processed" call.
    pub acknowledged: bool,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run finished.
    pub finished_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Time elapsed since `earlier`, or zero if `earlier` is later.
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        (self.0 - earlier.0).to_std().unwrap_or_default()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
