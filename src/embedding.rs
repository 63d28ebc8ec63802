//! Embedding provider client.
//!
//! [`Embedder`] is the seam between producers and the external provider.
//! The HTTP implementation talks to an OpenAI-compatible `/embeddings`
//! endpoint and owns everything the producers should never think about:
//!
//! - input ceiling enforcement (truncate within tolerance, otherwise reject),
//! - the shared token-bucket rate limiter,
//! - bounded retry with exponential backoff (1s, 2s, 4s… capped) on
//!   HTTP 429 / 5xx / network errors,
//! - permanent-failure classification (other 4xx → [`PipelineError::ProviderRejected`]).
//!
//! A failed call never yields a placeholder vector; the typed error tells
//! the producer whether the unit is worth retrying.
//!
//! Also home to the vector codecs: vectors are persisted as little-endian
//! f32 BLOBs ([`vec_to_blob`] / [`blob_to_vec`]).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::PipelineError;
use crate::ratelimit::RateLimiter;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier stamped into every record (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Vector dimensionality for this provider/model version.
    fn dims(&self) -> usize;

    /// Turn text into a fixed-length vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError>;
}

/// Client for OpenAI-compatible embedding endpoints.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    max_retries: u32,
    max_input_chars: usize,
    truncate_tolerance: usize,
    limiter: Arc<RateLimiter>,
}

impl HttpEmbedder {
    /// Build a client from config. Reads the API key from `OPENAI_API_KEY`.
    pub fn from_config(
        config: &EmbeddingConfig,
        limiter: Arc<RateLimiter>,
    ) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required"))?;

        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
                .map_err(|_| anyhow::anyhow!("invalid characters in OPENAI_API_KEY"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model,
            dims,
            max_retries: config.max_retries,
            max_input_chars: config.max_input_chars,
            truncate_tolerance: config.truncate_tolerance_chars,
            limiter,
        })
    }

    /// Enforce the provider's input ceiling before spending a request.
    ///
    /// Input within `truncate_tolerance` past the ceiling is cut at the
    /// ceiling; anything longer is rejected so over-length content is a
    /// visible error instead of a silently degraded vector.
    fn enforce_ceiling<'a>(&self, text: &'a str) -> Result<Cow<'a, str>, PipelineError> {
        let char_count = text.chars().count();
        if char_count <= self.max_input_chars {
            return Ok(Cow::Borrowed(text));
        }
        if char_count <= self.max_input_chars + self.truncate_tolerance {
            let cut = text
                .char_indices()
                .nth(self.max_input_chars)
                .map(|(b, _)| b)
                .unwrap_or(text.len());
            debug!(chars = char_count, limit = self.max_input_chars, "truncating input within tolerance");
            return Ok(Cow::Owned(text[..cut].to_string()));
        }
        Err(PipelineError::ProviderRejected(format!(
            "input of {} chars exceeds provider limit of {} (tolerance {})",
            char_count, self.max_input_chars, self.truncate_tolerance
        )))
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        if text.trim().is_empty() {
            return Err(PipelineError::Validation(
                "refusing to embed empty text".to_string(),
            ));
        }

        let text = self.enforce_ceiling(text)?;
        let body = serde_json::json!({
            "model": self.model,
            "input": [text.as_ref()],
        });

        let mut last_err: Option<PipelineError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                warn!(attempt, delay_secs = delay.as_secs(), "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            self.limiter.acquire().await;

            let response = self.client.post(&self.endpoint).json(&body).send().await;

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status.is_success() {
                        let mut parsed: EmbeddingResponse = resp.json().await.map_err(|e| {
                            PipelineError::ProviderRejected(format!(
                                "malformed embedding response: {}",
                                e
                            ))
                        })?;
                        parsed.data.sort_by_key(|entry| entry.index);
                        let vector = parsed
                            .data
                            .into_iter()
                            .next()
                            .map(|entry| entry.embedding)
                            .ok_or_else(|| {
                                PipelineError::ProviderRejected(
                                    "provider returned no embedding".to_string(),
                                )
                            })?;
                        if vector.len() != self.dims {
                            return Err(PipelineError::ProviderRejected(format!(
                                "provider returned {} dims, expected {} — model version mismatch",
                                vector.len(),
                                self.dims
                            )));
                        }
                        return Ok(vector);
                    }

                    let retryable =
                        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    let detail = resp.text().await.unwrap_or_default();

                    if retryable {
                        last_err = Some(PipelineError::ProviderUnavailable(format!(
                            "{}: {}",
                            status, detail
                        )));
                        continue;
                    }

                    return Err(PipelineError::ProviderRejected(format!(
                        "{}: {}",
                        status, detail
                    )));
                }
                Err(e) => {
                    last_err = Some(PipelineError::ProviderUnavailable(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            PipelineError::ProviderUnavailable("retries exhausted".to_string())
        }))
    }
}

/// Provider stub used when embeddings are not configured. Every call fails
/// permanently so producers log and skip instead of retrying.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, PipelineError> {
        Err(PipelineError::ProviderRejected(
            "embedding provider is disabled — set [embedding] provider in config".to_string(),
        ))
    }
}

/// Instantiate the configured provider behind the shared rate limiter.
pub fn create_embedder(
    config: &EmbeddingConfig,
    limiter: Arc<RateLimiter>,
) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(HttpEmbedder::from_config(config, limiter)?)),
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB of little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
