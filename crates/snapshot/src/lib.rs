//! Snapshot source adapter.
//!
//! Implements [`pipeline::SnapshotSource`] over two plain HTTP endpoints:
//!
//! - `GET <snapshot_url>` returns the current check-in snapshot as JSON with a
//!   `snapshotId` field;
//! - `POST <mark_processed_url>` with `{"snapshotId": ...}` retires it.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** The [`pipeline`] crate sees only
//! [`pipeline::SnapshotSource`] and [`pipeline::Snapshot`].

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{Snapshot, SnapshotId, SnapshotSource, Upstream, WorkflowError};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info_span, Instrument};
use verifier::http::{build_client, ensure_success, read_json, transport_error};

const SERVICE: Upstream = Upstream::SnapshotSource;

/// Endpoints and timeout of the snapshot API.
#[derive(Debug, Clone)]
pub struct SnapshotSourceConfig {
    /// URL returning the current snapshot.
    pub snapshot_url: String,
    /// URL accepting `{"snapshotId": ...}` to retire a snapshot.
    pub mark_processed_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkProcessed<'a> {
    snapshot_id: &'a SnapshotId,
}

/// HTTP implementation of [`SnapshotSource`].
#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    config: SnapshotSourceConfig,
}

impl HttpSnapshotSource {
    /// Creates a snapshot source client.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if the HTTP client cannot be built.
    pub fn new(config: SnapshotSourceConfig) -> Result<Self, WorkflowError> {
        Ok(Self {
            client: build_client(SERVICE, config.timeout)?,
            config,
        })
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch_snapshot(&self) -> Result<Snapshot, WorkflowError> {
        let span = info_span!("snapshot_fetch", url = %self.config.snapshot_url);
        async move {
            let response = self
                .client
                .get(&self.config.snapshot_url)
                .send()
                .await
                .map_err(|e| transport_error(SERVICE, e))?;
            let payload: Value = read_json(SERVICE, response).await?;
            debug!("Snapshot payload received");
            Snapshot::from_payload(payload)
        }
        .instrument(span)
        .await
    }

    async fn mark_processed(&self, snapshot_id: &SnapshotId) -> Result<(), WorkflowError> {
        let span = info_span!("snapshot_mark_processed", snapshot_id = %snapshot_id);
        async move {
            let response = self
                .client
                .post(&self.config.mark_processed_url)
                .json(&MarkProcessed { snapshot_id })
                .send()
                .await
                .map_err(|e| transport_error(SERVICE, e))?;
            ensure_success(SERVICE, response).await?;
            Ok(())
        }
        .instrument(span)
        .await
    }
}
