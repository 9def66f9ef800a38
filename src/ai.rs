//! Embedding backends: an OpenAI-compatible HTTP client, a deterministic
//! offline hasher, and a timeout + retry wrapper. See AiConfig::from_env().

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::MemoryError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RETRIES: u32 = 3;

/// Turns text into a fixed-width vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;

    /// Width of every vector this embedder returns.
    fn dim(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub embed_url: String,
    pub embed_key: String,
    pub embed_model: String,
    pub timeout: Duration,
    pub retries: u32,
}

impl AiConfig {
    /// Returns `None` if `LEEPA_EMBED_URL` is not set (offline hashing mode).
    pub fn from_env() -> Option<Self> {
        let embed_url = std::env::var("LEEPA_EMBED_URL").ok()?;
        let embed_key = std::env::var("LEEPA_EMBED_KEY").unwrap_or_default();
        let embed_model = std::env::var("LEEPA_EMBED_MODEL")
            .unwrap_or_else(|_| "all-MiniLM-L6-v2".into());
        let timeout = std::env::var("LEEPA_EMBED_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        let retries = std::env::var("LEEPA_EMBED_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RETRIES);
        Some(Self { embed_url, embed_key, embed_model, timeout, retries })
    }
}

/// Pick the backend: HTTP when configured, offline hashing otherwise.
/// Both are wrapped in retry + timeout.
pub fn build_embedder(cfg: Option<AiConfig>, dim: usize) -> Result<Arc<dyn Embedder>, MemoryError> {
    match cfg {
        Some(cfg) => {
            let retry = RetryConfig {
                max_retries: cfg.retries,
                timeout: cfg.timeout,
                ..RetryConfig::default()
            };
            let http = HttpEmbedder::new(cfg, dim)?;
            Ok(Arc::new(RetryingEmbedder::new(http, retry)))
        }
        None => Ok(Arc::new(RetryingEmbedder::new(
            HashEmbedder::new(dim),
            RetryConfig::default(),
        ))),
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` client.
pub struct HttpEmbedder {
    cfg: AiConfig,
    dim: usize,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(cfg: AiConfig, dim: usize) -> Result<Self, MemoryError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| MemoryError::Internal(format!("http client: {e}")))?;
        Ok(Self { cfg, dim, client })
    }
}

fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let req = EmbedRequest { model: &self.cfg.embed_model, input: [text] };
        let mut builder = self.client.post(&self.cfg.embed_url).json(&req);
        if !self.cfg.embed_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.cfg.embed_key));
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                MemoryError::EmbeddingTimeout(self.cfg.timeout)
            } else {
                MemoryError::embedding_transient(format!("embedding request failed: {e}"))
            }
        })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let msg = format!("embedding API returned {status}: {body}");
            return Err(if is_transient_status(status) {
                MemoryError::embedding_transient(msg)
            } else {
                MemoryError::embedding(msg)
            });
        }

        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| MemoryError::embedding(format!("embedding response parse failed: {e}")))?;
        let emb = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| MemoryError::embedding("embedding response had no data"))?;
        if emb.len() != self.dim {
            return Err(MemoryError::embedding(format!(
                "embedding has {} dimensions, expected {}",
                emb.len(),
                self.dim
            )));
        }
        Ok(emb)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// Deterministic bag-of-words feature hashing, L2-normalized.
///
/// Used when no embedding service is configured. Identical text always maps
/// to the identical vector, and shared words raise cosine similarity.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        let lower = text.to_lowercase();
        let mut words = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .peekable();

        if words.peek().is_some() {
            for word in words {
                self.bump(&mut v, word.as_bytes());
            }
        } else {
            // Punctuation or emoji only: bucket each symbol so the text still
            // gets a stable, non-zero vector.
            let mut buf = [0u8; 4];
            for c in lower.chars().filter(|c| !c.is_whitespace()) {
                self.bump(&mut v, c.encode_utf8(&mut buf).as_bytes());
            }
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }

    fn bump(&self, v: &mut [f32], token: &[u8]) {
        let h = fnv1a(token);
        let idx = (h % self.dim as u64) as usize;
        v[idx] += if (h >> 63) == 0 { 1.0 } else { -1.0 };
    }
}

// Stable across builds, unlike std's DefaultHasher; stored vectors depend on it.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        h ^= *b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        Ok(self.embed_sync(text))
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Per-attempt deadline.
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_RETRIES,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RetryConfig {
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(base).min(self.max_delay)
    }
}

/// Wraps an embedder with a per-attempt timeout and bounded exponential
/// backoff. Only transient failures are retried.
pub struct RetryingEmbedder<E: Embedder> {
    inner: E,
    config: RetryConfig,
}

impl<E: Embedder> RetryingEmbedder<E> {
    pub fn new(inner: E, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<E: Embedder> Embedder for RetryingEmbedder<E> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.config.timeout, self.inner.embed(text)).await {
                Ok(r) => r,
                Err(_) => Err(MemoryError::EmbeddingTimeout(self.config.timeout)),
            };
            match result {
                Ok(v) => {
                    if attempt > 0 {
                        debug!(attempt, "embedding succeeded after retry");
                    }
                    return Ok(v);
                }
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.config.delay_for(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "embedding failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }
}
