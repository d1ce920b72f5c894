//! Core domain for the reputation relay.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type, and error type used by the attestation workflow. Infrastructure crates
//! implement the port traits defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`SnapshotId`, `RoundId`, `RunId`, etc.) |
//! | [`types`] | Shared value types (`HexBytes`, `Snapshot`, `Proof`, `PollPolicy`, etc.) |
//! | [`attestation`] | Decoding of the attested response header |
//! | [`errors`] | Workflow error and retry-policy types |
//! | [`ports`] | Traits implemented by the snapshot, verifier, and ledger adapters |

pub mod attestation;
pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use attestation::ResponseHeader;
pub use errors::{RetryPolicy, Upstream, WorkflowError};
pub use identifiers::{
    AttestationType, ContractAddress, RoundId, RunId, SnapshotId, SourceId, TransactionHash,
};
pub use ports::{Ledger, ProofStore, SnapshotSource, Verifier};
pub use types::{
    AttestationRequestBody, HexBytes, PollPolicy, PreparedRequest, Proof, RunReport, Snapshot,
    Timestamp, VerifierStatus,
};
