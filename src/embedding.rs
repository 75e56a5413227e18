//! Embedding gateway abstraction.
//!
//! The engine treats embedding as an external collaborator: a pure function
//! `text -> fixed-dimension vector` that must be deterministic for identical
//! input, so search over an unchanged index is reproducible.
//!
//! [`HttpEmbedder`] talks to an Ollama-compatible `POST /api/embed`
//! endpoint. Transient failures (429, 5xx, network errors) are retried with
//! exponential backoff up to a bounded budget; non-retryable responses fail
//! immediately. Either way the caller receives a typed
//! [`RetrievalError::Embedding`] rather than a panic or a hung request —
//! the ingestion pipeline downgrades it to a per-document failure.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::{Result, RetrievalError};

/// External embedding gateway: batched `text -> Vec<f32>`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RetrievalError::embedding("empty embedding response"))
    }
}

/// Outcome classification for one gateway attempt.
enum Attempt {
    Done(Vec<Vec<f32>>),
    Retryable(String),
    Terminal(String),
}

/// Embedder backed by an Ollama-compatible HTTP endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RetrievalError::embedding(format!("failed to build client: {e}")))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
        })
    }

    async fn attempt(&self, body: &serde_json::Value) -> Attempt {
        let resp = self
            .client
            .post(format!("{}/api/embed", self.url))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    match response.json::<serde_json::Value>().await {
                        Ok(json) => match parse_embed_response(&json) {
                            Ok(vectors) => Attempt::Done(vectors),
                            Err(e) => Attempt::Terminal(e.to_string()),
                        },
                        Err(e) => Attempt::Retryable(format!("malformed response body: {e}")),
                    }
                } else if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    Attempt::Retryable(format!("gateway error {status}: {body_text}"))
                } else {
                    let body_text = response.text().await.unwrap_or_default();
                    Attempt::Terminal(format!("gateway error {status}: {body_text}"))
                }
            }
            // Timeouts and connection failures are transient.
            Err(e) => Attempt::Retryable(format!(
                "connection error (is the gateway running at {}?): {e}",
                self.url
            )),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, ... capped at 32s.
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, delay_secs = delay.as_secs(), "retrying embed batch");
                tokio::time::sleep(delay).await;
            }

            match self.attempt(&body).await {
                Attempt::Done(vectors) => {
                    return check_response_shape(vectors, texts.len(), self.dims);
                }
                Attempt::Retryable(reason) => {
                    last_err = reason;
                }
                Attempt::Terminal(reason) => {
                    return Err(RetrievalError::embedding(reason));
                }
            }
        }

        Err(RetrievalError::embedding(format!(
            "exhausted {} retries: {last_err}",
            self.max_retries
        )))
    }
}

/// Reject responses whose shape does not match the request.
fn check_response_shape(
    vectors: Vec<Vec<f32>>,
    expected_count: usize,
    dims: usize,
) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected_count {
        return Err(RetrievalError::embedding(format!(
            "requested {expected_count} embeddings, gateway returned {}",
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(RetrievalError::embedding(format!(
            "expected dimension {dims}, gateway returned {}",
            bad.len()
        )));
    }
    Ok(vectors)
}

fn parse_embed_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| RetrievalError::embedding("response missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| RetrievalError::embedding("embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }
    Ok(result)
}

/// Cosine similarity between two vectors; 0.0 for mismatched or zero-length
/// inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        (dot / (mag_a * mag_b)) as f64
    }
}
