//! Embedding backends and the shrink-retry policy.
//!
//! The remote backend is treated as a function `embed(text) -> vector` that
//! may fail or time out. The client applies its own bounded retries with
//! backoff for transport-level trouble; on top of that,
//! [`embed_with_shrink`] retries with progressively shorter input, because
//! oversized or markup-heavy chunks are the most common cause of permanent
//! backend rejections. A chunk that still fails is skipped, not fatal; the
//! integrity auditor reports the gap after the run.

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::processing::defang_markup;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Attempts made by the shrink loop before a chunk is skipped.
const SHRINK_ATTEMPTS: usize = 8;
/// Internal transport retries inside the Ollama client.
const OLLAMA_RETRIES: usize = 5;
/// Base backoff between Ollama retries; doubles per attempt.
const OLLAMA_BACKOFF: Duration = Duration::from_secs(1);

/// Errors raised by embedding backends.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The backend rejected the input outright; retrying the same text is
    /// pointless.
    #[error("embedding rejected by backend: {0}")]
    Rejected(String),
    /// Transport or server-side failures that exhausted the client's retries.
    #[error("embedding backend unavailable after {attempts} attempts: {last}")]
    Unavailable {
        /// Retries performed before giving up.
        attempts: usize,
        /// Last observed error.
        last: String,
    },
    /// The backend answered with a payload missing any vector.
    #[error("embedding backend returned no vectors")]
    EmptyResponse,
}

/// A produced embedding vector with its dimensionality.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedVector {
    /// The vector values.
    pub vector: Vec<f32>,
    /// Number of dimensions; always equals `vector.len()`.
    pub dims: usize,
}

/// Outcome of embedding one chunk through the shrink policy.
///
/// Failure is an ordinary value here, never an error: a skipped chunk is
/// recoverable state the auditor detects later.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedOutcome {
    /// The chunk was embedded.
    Embedded(EmbeddedVector),
    /// All attempts failed; the chunk stays without an embedding.
    Skipped,
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for one text.
    async fn embed(&self, text: &str) -> Result<EmbeddedVector, EmbedError>;
}

/// Build the embedding client selected by configuration.
pub fn build_client(config: &EmbeddingConfig) -> Arc<dyn EmbeddingClient> {
    match config.provider {
        EmbeddingProvider::Ollama => Arc::new(OllamaClient::new(config)),
        EmbeddingProvider::Offline => Arc::new(HashEmbedder::new(config.offline_dimension)),
    }
}

/// HTTP client for the Ollama `/api/embed` endpoint.
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct OllamaErrorBody {
    error: Option<String>,
}

impl OllamaClient {
    /// Construct a client for the configured Ollama instance.
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }

    async fn request_once(&self, text: &str) -> Result<EmbeddedVector, RequestFailure> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "input": text,
                "truncate": true,
            }))
            .timeout(Duration::from_secs(180))
            .send()
            .await
            .map_err(|err| RequestFailure::Transient(err.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST {
            let message = match response.json::<OllamaErrorBody>().await {
                Ok(body) => body.error.unwrap_or_else(|| "HTTP 400".to_string()),
                Err(_) => "HTTP 400".to_string(),
            };
            return Err(RequestFailure::Permanent(message));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(300).collect();
            return Err(RequestFailure::Transient(format!("HTTP {status}: {snippet}")));
        }

        let payload: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|err| RequestFailure::Transient(err.to_string()))?;
        let vector = payload
            .embeddings
            .into_iter()
            .next()
            .ok_or(RequestFailure::Empty)?;
        let dims = vector.len();
        Ok(EmbeddedVector { vector, dims })
    }
}

enum RequestFailure {
    Transient(String),
    Permanent(String),
    Empty,
}

#[async_trait]
impl EmbeddingClient for OllamaClient {
    async fn embed(&self, text: &str) -> Result<EmbeddedVector, EmbedError> {
        let mut last_err = String::new();
        for attempt in 0..OLLAMA_RETRIES {
            match self.request_once(text).await {
                Ok(vector) => return Ok(vector),
                Err(RequestFailure::Permanent(message)) => {
                    return Err(EmbedError::Rejected(message));
                }
                Err(RequestFailure::Empty) => return Err(EmbedError::EmptyResponse),
                Err(RequestFailure::Transient(message)) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        retries = OLLAMA_RETRIES,
                        error = %message,
                        "Embed request failed; backing off"
                    );
                    last_err = message;
                    tokio::time::sleep(OLLAMA_BACKOFF * 2u32.pow(attempt as u32)).await;
                }
            }
        }
        Err(EmbedError::Unavailable {
            attempts: OLLAMA_RETRIES,
            last: last_err,
        })
    }
}

/// Deterministic offline embedder.
///
/// Folds input bytes into a fixed-dimension vector and L2-normalizes it.
/// Not semantically meaningful, but stable across runs, which is all tests
/// and dry runs need.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Construct an embedder producing vectors of `dimension` values.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];
        if text.is_empty() {
            return embedding;
        }
        for (idx, byte) in text.bytes().enumerate() {
            embedding[idx % self.dimension] += f32::from(byte) / 255.0;
        }
        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddedVector, EmbedError> {
        if self.dimension == 0 {
            return Err(EmbedError::Rejected(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        let vector = self.encode(text);
        let dims = vector.len();
        Ok(EmbeddedVector { vector, dims })
    }
}

/// Embed one chunk, shrinking the input between failed attempts.
///
/// The text is clipped to `max_chars`, defanged, then submitted up to eight
/// times; each failure shrinks it to `max(min_chars, len / 4)`. Once at the
/// floor, one more failure skips the chunk.
pub async fn embed_with_shrink(
    client: &dyn EmbeddingClient,
    chunk_id: i64,
    text: &str,
    max_chars: usize,
    min_chars: usize,
) -> EmbedOutcome {
    let mut safe = defang_markup(&clip_chars(text, max_chars));
    let mut last_err = None;

    for attempt in 0..SHRINK_ATTEMPTS {
        match client.embed(&safe).await {
            Ok(vector) => return EmbedOutcome::Embedded(vector),
            Err(err) => {
                tracing::warn!(
                    chunk_id,
                    attempt = attempt + 1,
                    attempts = SHRINK_ATTEMPTS,
                    len = safe.chars().count(),
                    error = %err,
                    "Embed attempt failed"
                );
                let len = safe.chars().count();
                last_err = Some(err);
                if len <= min_chars {
                    break;
                }
                safe = clip_chars(&safe, (len / 4).max(min_chars));
            }
        }
    }

    tracing::warn!(
        chunk_id,
        orig_len = text.chars().count(),
        final_len = safe.chars().count(),
        error = %last_err.map(|e| e.to_string()).unwrap_or_default(),
        "Embed failed; skipping chunk"
    );
    EmbedOutcome::Skipped
}

/// Truncate to at most `max_chars` characters on a char boundary.
fn clip_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyClient {
        fail_first: usize,
        calls: AtomicUsize,
        seen_lens: std::sync::Mutex<Vec<usize>>,
    }

    impl FlakyClient {
        fn new(fail_first: usize) -> Self {
            Self {
                fail_first,
                calls: AtomicUsize::new(0),
                seen_lens: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmbeddingClient for FlakyClient {
        async fn embed(&self, text: &str) -> Result<EmbeddedVector, EmbedError> {
            self.seen_lens.lock().unwrap().push(text.chars().count());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(EmbedError::Rejected("too long".to_string()))
            } else {
                Ok(EmbeddedVector {
                    vector: vec![0.5, 0.5],
                    dims: 2,
                })
            }
        }
    }

    #[test]
    fn hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(8);
        let a = embedder.encode("xiangling");
        let b = embedder.encode("xiangling");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_ne!(a, embedder.encode("hu tao"));
    }

    #[test]
    fn clip_chars_respects_boundaries() {
        assert_eq!(clip_chars("abcdef", 3), "abc");
        assert_eq!(clip_chars("abc", 10), "abc");
        assert_eq!(clip_chars("火水土風", 2), "火水");
    }

    #[tokio::test]
    async fn shrink_loop_recovers_after_shrinking() {
        let client = FlakyClient::new(2);
        let text = "x".repeat(4000);
        let outcome = embed_with_shrink(&client, 1, &text, 1800, 100).await;
        assert!(matches!(outcome, EmbedOutcome::Embedded(_)));
        let lens = client.seen_lens.lock().unwrap();
        assert_eq!(lens[0], 1800);
        assert_eq!(lens[1], 450);
        assert_eq!(lens[2], 112);
    }

    #[tokio::test]
    async fn shrink_loop_stops_at_floor_and_skips() {
        let client = FlakyClient::new(usize::MAX);
        let outcome = embed_with_shrink(&client, 2, "short text", 1800, 800).await;
        assert_eq!(outcome, EmbedOutcome::Skipped);
        // Already below the floor: exactly one attempt is made.
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shrink_loop_is_bounded() {
        let client = FlakyClient::new(usize::MAX);
        let text = "x".repeat(100_000);
        let outcome = embed_with_shrink(&client, 3, &text, 1800, 1).await;
        assert_eq!(outcome, EmbedOutcome::Skipped);
        assert!(client.calls.load(Ordering::SeqCst) <= SHRINK_ATTEMPTS);
    }

    mod ollama {
        use super::super::*;
        use httpmock::prelude::*;

        fn config(base_url: &str) -> EmbeddingConfig {
            EmbeddingConfig {
                provider: EmbeddingProvider::Ollama,
                base_url: base_url.to_string(),
                model: "nomic-embed-text".to_string(),
                offline_dimension: 0,
            }
        }

        #[tokio::test]
        async fn parses_embedding_response() {
            let server = MockServer::start_async().await;
            let mock = server
                .mock_async(|when, then| {
                    when.method(POST).path("/api/embed");
                    then.status(200)
                        .json_body(serde_json::json!({ "embeddings": [[0.1, 0.2, 0.3]] }));
                })
                .await;

            let client = OllamaClient::new(&config(&server.base_url()));
            let result = client.embed("xiangling").await.unwrap();
            mock.assert_async().await;
            assert_eq!(result.dims, 3);
            assert_eq!(result.vector.len(), 3);
        }

        #[tokio::test]
        async fn rejects_http_400_without_retry() {
            let server = MockServer::start_async().await;
            let mock = server
                .mock_async(|when, then| {
                    when.method(POST).path("/api/embed");
                    then.status(400)
                        .json_body(serde_json::json!({ "error": "input too large" }));
                })
                .await;

            let client = OllamaClient::new(&config(&server.base_url()));
            let err = client.embed("oversized").await.unwrap_err();
            assert!(matches!(err, EmbedError::Rejected(_)));
            assert_eq!(mock.hits_async().await, 1);
        }
    }
}
