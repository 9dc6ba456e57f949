//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, plus pure helper functions for vector normalization,
//! serialization, and similarity computation.
//!
//! Concrete provider implementations (local fastembed/tract, OpenAI, Voyage,
//! Gemini, Ollama) live in the `memory-engine` app crate.

use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// Outcome of a provider health probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub model: String,
    pub available: bool,
    pub dimensions: usize,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Trait for embedding providers.
///
/// Every vector returned by [`embed`](EmbeddingProvider::embed) is
/// L2-normalized and has one entry per input text, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Registry name (e.g. `"openai"`, `"local"`).
    fn name(&self) -> &str;

    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model(&self) -> &str;

    /// Vector dimensionality. Once a call has returned vectors, this reports
    /// the observed length rather than the configured default.
    fn dimensions(&self) -> usize;

    /// Maximum input size in tokens.
    fn max_tokens(&self) -> usize;

    fn supports_batching(&self) -> bool {
        true
    }

    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed(&[text.to_string()]).await?;
        out.pop().ok_or_else(|| {
            crate::error::MemoryError::provider(self.name(), "empty embedding response")
        })
    }

    /// Cheap readiness check (credentials present, model loadable).
    async fn is_available(&self) -> bool;

    /// Embed a probe string and report latency.
    async fn health_check(&self) -> ProviderHealth {
        let started = Instant::now();
        let outcome = self.embed_single("health check").await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        match outcome {
            Ok(v) => ProviderHealth {
                provider: self.name().to_string(),
                model: self.model().to_string(),
                available: true,
                dimensions: v.len(),
                latency_ms,
                error: None,
            },
            Err(e) => ProviderHealth {
                provider: self.name().to_string(),
                model: self.model().to_string(),
                available: false,
                dimensions: self.dimensions(),
                latency_ms,
                error: Some(e.to_string()),
            },
        }
    }

    /// Rough token count: one token per four bytes.
    fn estimate_tokens(&self, text: &str) -> usize {
        text.len() / 4
    }
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn normalize_l2(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use memory_engine_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Trailing partial words are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different
/// lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
