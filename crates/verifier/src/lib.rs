//! Attestation infrastructure adapters.
//!
//! - [`VerifierClient`] implements [`pipeline::Verifier`] against the
//!   verifier's `<base>/<path>/prepareRequest` endpoint.
//! - [`DaLayerClient`] implements [`pipeline::ProofStore`] against the
//!   data-availability layer's `proof-by-request-round-raw` endpoint.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, header handling, request framing, and
//! status classification live here. The [`pipeline`] crate sees only the port
//! traits.

mod da_layer;
pub mod http;
mod prepare;

pub use da_layer::{DaLayerClient, DaLayerConfig};
pub use prepare::{VerifierClient, VerifierConfig};
