//! Shared reqwest plumbing for the relay's HTTP adapters.
//!
//! Used by the verifier and data-availability clients here and by the
//! `snapshot` crate.

use std::time::Duration;

use pipeline::{Upstream, WorkflowError};
use reqwest::Response;
use serde::de::DeserializeOwned;

const USER_AGENT: &str = concat!("reputation-relay/", env!("CARGO_PKG_VERSION"));

pub fn build_client(
    service: Upstream,
    timeout: Duration,
) -> Result<reqwest::Client, WorkflowError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| {
            WorkflowError::configuration(format!("failed to build {service} HTTP client: {e}"))
        })
}

/// Maps a transport failure: timeouts and connection errors are worth retrying.
pub fn transport_error(service: Upstream, err: reqwest::Error) -> WorkflowError {
    if err.is_timeout() || err.is_connect() {
        WorkflowError::transient(service, err.to_string())
    } else {
        WorkflowError::permanent(service, err.to_string())
    }
}

/// Passes a 2xx response through; any other status becomes an upstream error.
pub async fn ensure_success(
    service: Upstream,
    response: Response,
) -> Result<Response, WorkflowError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(WorkflowError::from_status(service, status.as_u16(), &body))
}

/// Checks the status and deserializes a JSON body.
pub async fn read_json<T: DeserializeOwned>(
    service: Upstream,
    response: Response,
) -> Result<T, WorkflowError> {
    ensure_success(service, response)
        .await?
        .json::<T>()
        .await
        .map_err(|e| WorkflowError::permanent(service, format!("malformed response body: {e}")))
}

/// Joins a base URL and a relative path with exactly one slash between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
