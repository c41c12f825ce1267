//! Injected sequence-embedding capability.
//!
//! The encoder is a fixed external model consumed through a narrow
//! interface: a batch of token strings in, one fixed-dimension vector per
//! string out, order-preserving and stateless between calls. The production
//! implementation talks JSON over HTTP to an embedding sidecar; tests
//! inject fakes returning fixed vectors.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("encoder request failed: {0}")]
    Request(String),
    #[error("encoder protocol violation: {0}")]
    Protocol(String),
}

/// `encode(batch) -> vectors`, one vector per input string, same order.
/// Callers keep batches at or below [`cfgemb_core::ENCODE_BATCH_SIZE`].
#[async_trait]
pub trait InstructionEncoder: Send + Sync {
    async fn encode(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EncoderError>;
}

/// HTTP client for the embedding sidecar: `POST {base}/encode` with
/// `{"sequences": [...]}`, expecting `{"vectors": [[...], ...]}`.
pub struct HttpEncoder {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEncoder {
    pub fn new(base_url: &str) -> Self {
        HttpEncoder {
            client: reqwest::Client::new(),
            endpoint: format!("{}/encode", base_url.trim_end_matches('/')),
        }
    }
}

#[derive(Deserialize)]
struct EncodeResponse {
    vectors: Vec<Vec<f32>>,
}

#[async_trait]
impl InstructionEncoder for HttpEncoder {
    async fn encode(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EncoderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "sequences": batch }))
            .send()
            .await
            .map_err(|err| EncoderError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EncoderError::Request(format!(
                "encoder returned {status}: {body}"
            )));
        }

        let parsed: EncodeResponse = response
            .json()
            .await
            .map_err(|err| EncoderError::Protocol(err.to_string()))?;

        if parsed.vectors.len() != batch.len() {
            return Err(EncoderError::Protocol(format!(
                "asked for {} vectors, got {}",
                batch.len(),
                parsed.vectors.len()
            )));
        }
        Ok(parsed.vectors)
    }
}
