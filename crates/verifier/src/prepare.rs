//! Client for the verifier's `prepareRequest` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{
    attestation::encode_name, AttestationRequestBody, AttestationType, PreparedRequest, SourceId,
    Upstream, Verifier, WorkflowError,
};
use serde::Serialize;
use tracing::{debug, info_span, Instrument};

use crate::http::{build_client, join_url, read_json, transport_error};

const SERVICE: Upstream = Upstream::Verifier;

/// Connection settings for the verifier.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Base URL of the verifier (e.g. `https://jq-verifier-test.example/`).
    pub base_url: String,
    /// Path segment naming the attestation type's API (e.g. `"JsonApi"`).
    pub path_segment: String,
    /// Value of the `X-API-KEY` header.
    pub api_key: String,
    /// Attestation type the request is filed under.
    pub attestation_type: AttestationType,
    /// Source class the request is filed under.
    pub source_id: SourceId,
    /// Per-request timeout.
    pub timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrepareRequestEnvelope<'a> {
    attestation_type: String,
    source_id: String,
    request_body: &'a AttestationRequestBody,
}

/// HTTP client for `<base>/<path_segment>/prepareRequest`.
#[derive(Debug, Clone)]
pub struct VerifierClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    attestation_type: String,
    source_id: String,
}

impl VerifierClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if the attestation type or
    /// source id does not fit in 32 bytes, or if the HTTP client cannot be
    /// built.
    pub fn new(config: VerifierConfig) -> Result<Self, WorkflowError> {
        let attestation_type = encoded_name(config.attestation_type.as_str())?;
        let source_id = encoded_name(config.source_id.as_str())?;

        Ok(Self {
            client: build_client(SERVICE, config.timeout)?,
            url: join_url(
                &config.base_url,
                &format!("{}/prepareRequest", config.path_segment),
            ),
            api_key: config.api_key,
            attestation_type,
            source_id,
        })
    }
}

fn encoded_name(name: &str) -> Result<String, WorkflowError> {
    let word = encode_name(name).ok_or_else(|| {
        WorkflowError::configuration(format!("'{name}' does not fit in a 32-byte word"))
    })?;
    Ok(format!("0x{}", hex::encode(word)))
}

#[async_trait]
impl Verifier for VerifierClient {
    async fn prepare_request(
        &self,
        body: &AttestationRequestBody,
    ) -> Result<PreparedRequest, WorkflowError> {
        let envelope = PrepareRequestEnvelope {
            attestation_type: self.attestation_type.clone(),
            source_id: self.source_id.clone(),
            request_body: body,
        };

        let span = info_span!("verifier_prepare_request", url = %self.url);
        async move {
            debug!("Submitting attestation request to verifier");
            let response = self
                .client
                .post(&self.url)
                .header("X-API-KEY", &self.api_key)
                .json(&envelope)
                .send()
                .await
                .map_err(|e| transport_error(SERVICE, e))?;

            let prepared: PreparedRequest = read_json(SERVICE, response).await?;
            debug!(status = ?prepared.status, "Verifier responded");
            Ok(prepared)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use pipeline::VerifierStatus;
    use serde_json::json;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config(base_url: String) -> VerifierConfig {
        VerifierConfig {
            base_url,
            path_segment: "JsonApi".to_string(),
            api_key: "secret".to_string(),
            attestation_type: AttestationType::new("IJsonApi").unwrap(),
            source_id: SourceId::new("WEB2").unwrap(),
            timeout: Duration::from_secs(5),
        }
    }

    fn body() -> AttestationRequestBody {
        AttestationRequestBody {
            url: "https://snapshots.example/latest".to_string(),
            postprocess_jq: ".activities".to_string(),
            abi_signature: "{}".to_string(),
        }
    }

    #[test]
    fn names_are_right_padded_hex() {
        let encoded = encoded_name("WEB2").unwrap();
        assert_eq!(encoded.len(), 2 + 64);
        assert!(encoded.starts_with("0x57454232"));
        assert!(encoded.ends_with("00000000"));
    }

    #[tokio::test]
    async fn posts_envelope_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/JsonApi/prepareRequest"))
            .and(matchers::header("X-API-KEY", "secret"))
            .and(matchers::body_partial_json(json!({
                "requestBody": {
                    "url": "https://snapshots.example/latest",
                    "postprocessJq": ".activities",
                    "abi_signature": "{}"
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "VALID",
                "abiEncodedRequest": "0x0a0b"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = VerifierClient::new(config(format!("{}/", server.uri()))).unwrap();
        let prepared = client.prepare_request(&body()).await.unwrap();

        assert_eq!(prepared.status, VerifierStatus::Valid);
        assert_eq!(prepared.into_encoded_request().unwrap().as_bytes(), &[0x0a, 0x0b]);
    }

    #[tokio::test]
    async fn invalid_status_is_returned_as_data() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "INVALID"})))
            .mount(&server)
            .await;

        let client = VerifierClient::new(config(server.uri())).unwrap();
        let prepared = client.prepare_request(&body()).await.unwrap();

        assert!(matches!(prepared.status, VerifierStatus::Other(ref s) if s == "INVALID"));
    }

    #[tokio::test]
    async fn unauthorized_is_permanent_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let client = VerifierClient::new(config(server.uri())).unwrap();
        let err = client.prepare_request(&body()).await.unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::Upstream {
                service: Upstream::Verifier,
                ..
            }
        ));
        assert!(!err.retry_policy().is_retryable());
    }
}
