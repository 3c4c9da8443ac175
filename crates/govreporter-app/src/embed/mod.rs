//! Batched dense-vector generation against the OpenAI embeddings API.
//!
//! Batches are retried with exponential backoff on transient failures; a
//! batch that keeps failing is degraded to per-item requests so one bad
//! input cannot poison its neighbors. An item that still fails receives a
//! zero vector and is reported back so the caller can record it for
//! re-embedding instead of silently dropping it.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1/";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_EMBEDDING_DIM: usize = 1536;
pub const DEFAULT_MAX_BATCH: usize = 100;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("missing OPENAI_API_KEY environment variable")]
    MissingApiKey,
    #[error("embedding request failed: {source}")]
    Request {
        #[from]
        source: reqwest::Error,
    },
    #[error("embedding API returned HTTP {0}")]
    HttpStatus(u16),
    #[error("embedding API returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
    #[error("{failed} of {total} inputs could not be embedded")]
    ItemsFailed { failed: usize, total: usize },
}

impl EmbedError {
    fn is_transient(&self) -> bool {
        match self {
            EmbedError::Request { source } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            EmbedError::HttpStatus(status) => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Result of embedding a batch: one vector per input, in input order, plus
/// the indices that fell back to a zero vector.
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub failed: Vec<usize>,
}

/// Capability the pipeline and the MCP server depend on.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    /// Embed a batch, degrading per the module contract instead of failing
    /// outright. Only configuration-class problems surface as errors.
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, EmbedError>;

    /// Embed a single text, failing when no real vector could be produced.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let batch = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        if !batch.failed.is_empty() {
            return Err(EmbedError::ItemsFailed { failed: 1, total: 1 });
        }
        batch
            .vectors
            .into_iter()
            .next()
            .ok_or(EmbedError::CountMismatch {
                expected: 1,
                got: 0,
            })
    }
}

/// OpenAI embeddings client.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    max_batch: usize,
    backoff: ExponentialBuilder,
}

impl OpenAiEmbedder {
    pub fn new(api_key: impl Into<String>) -> Result<Self, EmbedError> {
        Self::with_base_url(api_key, DEFAULT_OPENAI_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, EmbedError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(EmbedError::MissingApiKey);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent("govreporter/0.1")
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: DEFAULT_EMBEDDING_DIM,
            max_batch: DEFAULT_MAX_BATCH,
            backoff: ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(1))
                .with_max_delay(Duration::from_secs(30))
                .with_max_times(4)
                .with_jitter(),
        })
    }

    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    pub fn with_retry_policy(mut self, backoff: ExponentialBuilder) -> Self {
        self.backoff = backoff;
        self
    }

    async fn request_vectors(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });
        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EmbedError::HttpStatus(status.as_u16()));
        }

        let parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.len() != inputs.len() {
            return Err(EmbedError::CountMismatch {
                expected: inputs.len(),
                got: parsed.data.len(),
            });
        }
        let mut data = parsed.data;
        data.sort_by_key(|item| item.index);
        Ok(data.into_iter().map(|item| item.embedding).collect())
    }

    async fn request_with_retry(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let attempt = || self.request_vectors(inputs);
        attempt
            .retry(self.backoff.clone())
            .sleep(sleep)
            .when(EmbedError::is_transient)
            .notify(|err: &EmbedError, delay: Duration| {
                warn!(
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "retrying embedding request"
                );
            })
            .await
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, EmbedError> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch {
                vectors: Vec::new(),
                failed: Vec::new(),
            });
        }

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        let mut failed = Vec::new();

        for (batch_start, batch) in texts.chunks(self.max_batch).enumerate().map(|(i, b)| (i * self.max_batch, b)) {
            match self.request_with_retry(batch).await {
                Ok(batch_vectors) => vectors.extend(batch_vectors),
                Err(batch_err) => {
                    warn!(
                        batch_start,
                        batch_len = batch.len(),
                        error = %batch_err,
                        "batch embedding failed; falling back to per-item requests"
                    );
                    for (offset, text) in batch.iter().enumerate() {
                        match self.request_with_retry(std::slice::from_ref(text)).await {
                            Ok(mut single) => vectors.push(single.remove(0)),
                            Err(item_err) => {
                                warn!(
                                    index = batch_start + offset,
                                    error = %item_err,
                                    "item embedding failed; emitting zero vector"
                                );
                                vectors.push(vec![0.0; self.dimension]);
                                failed.push(batch_start + offset);
                            }
                        }
                    }
                }
            }
        }

        Ok(EmbeddingBatch { vectors, failed })
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}
