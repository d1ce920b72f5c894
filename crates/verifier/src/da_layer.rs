//! Client for the data-availability layer's raw proof endpoint.

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{HexBytes, Proof, ProofStore, RoundId, Upstream, WorkflowError};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, Instrument};

use crate::http::{build_client, join_url, read_json, transport_error};

const SERVICE: Upstream = Upstream::DataAvailability;
const PROOF_PATH: &str = "api/v1/fdc/proof-by-request-round-raw";

/// Connection settings for the data-availability layer.
#[derive(Debug, Clone)]
pub struct DaLayerConfig {
    /// Base URL of the DA layer (e.g. `https://ctn2-data-availability.example/`).
    pub base_url: String,
    /// Optional value of the `X-API-KEY` header.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProofQuery<'a> {
    voting_round_id: u64,
    request_bytes: &'a HexBytes,
}

/// The DA layer answers with an empty body until the round's proof is indexed.
#[derive(Deserialize)]
struct RawProofResponse {
    #[serde(default)]
    proof: Vec<HexBytes>,
    #[serde(default)]
    response_hex: Option<HexBytes>,
}

/// HTTP client for `<base>/api/v1/fdc/proof-by-request-round-raw`.
#[derive(Debug, Clone)]
pub struct DaLayerClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl DaLayerClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if the HTTP client cannot be built.
    pub fn new(config: DaLayerConfig) -> Result<Self, WorkflowError> {
        Ok(Self {
            client: build_client(SERVICE, config.timeout)?,
            url: join_url(&config.base_url, PROOF_PATH),
            api_key: config.api_key,
        })
    }
}

#[async_trait]
impl ProofStore for DaLayerClient {
    async fn fetch_proof(
        &self,
        request: &HexBytes,
        round: RoundId,
    ) -> Result<Option<Proof>, WorkflowError> {
        let query = ProofQuery {
            voting_round_id: round.as_u64(),
            request_bytes: request,
        };

        let span = info_span!("da_layer_fetch_proof", url = %self.url, round = %round);
        async move {
            let mut builder = self.client.post(&self.url).json(&query);
            if let Some(key) = &self.api_key {
                builder = builder.header("X-API-KEY", key);
            }
            let response = builder.send().await.map_err(|e| transport_error(SERVICE, e))?;

            if response.status() == StatusCode::NOT_FOUND {
                debug!("Proof not indexed yet");
                return Ok(None);
            }

            let raw: RawProofResponse = read_json(SERVICE, response).await?;
            match raw.response_hex {
                Some(response) if !response.is_empty() => Ok(Some(Proof {
                    merkle_proof: raw.proof,
                    response,
                })),
                _ => {
                    debug!("Proof response carried no response_hex yet");
                    Ok(None)
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> DaLayerClient {
        DaLayerClient::new(DaLayerConfig {
            base_url: format!("{}/", server.uri()),
            api_key: None,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn returns_proof_when_indexed() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/v1/fdc/proof-by-request-round-raw"))
            .and(matchers::body_json(json!({
                "votingRoundId": 1041,
                "requestBytes": "0xabcd"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response_hex": "0x0102",
                "attestation_type": "0x00",
                "proof": ["0x11", "0x22"]
            })))
            .mount(&server)
            .await;

        let proof = client(&server)
            .fetch_proof(&HexBytes::from_hex("0xabcd").unwrap(), RoundId::new(1041))
            .await
            .unwrap()
            .expect("proof available");

        assert_eq!(proof.response.as_bytes(), &[1, 2]);
        assert_eq!(proof.merkle_proof.len(), 2);
    }

    #[tokio::test]
    async fn missing_response_hex_means_not_ready() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let result = client(&server)
            .fetch_proof(&HexBytes::new(vec![1]), RoundId::new(1))
            .await
            .unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn not_found_means_not_ready() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = client(&server)
            .fetch_proof(&HexBytes::new(vec![1]), RoundId::new(1))
            .await
            .unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_proof(&HexBytes::new(vec![1]), RoundId::new(1))
            .await
            .unwrap_err();

        assert!(err.retry_policy().is_retryable());
    }
}
