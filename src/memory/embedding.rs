//! Embedding generation for semantic memory retrieval.
//!
//! Embeddings come from an external HTTP service: `POST {input}` returns a
//! 1536-dim vector. The service sits behind the resilience layer like every
//! other dependency — callers wrap [`Embedder::embed`] in
//! `lark_guard::guarded_call` and degrade when it fails.

use crate::config::EmbeddingConfig;
use crate::error::{CallError, Result};
use crate::memory::types::EMBEDDING_DIM;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Source of embeddings for memory content and query text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text into a unit-length [`EMBEDDING_DIM`] vector.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Embedding`] if the service is unreachable,
    /// returns a non-success status, or produces a wrong-sized vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// HTTP-backed [`Embedder`].
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEmbedder {
    /// Create an embedder for the configured endpoint.
    #[must_use]
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
        }
    }
}

impl std::fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest { input: text })
            .send()
            .await
            .map_err(|e| CallError::Embedding(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CallError::Embedding(format!(
                "embedding endpoint returned {}",
                response.status()
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| CallError::Embedding(format!("embedding response malformed: {e}")))?;

        if body.embedding.len() != EMBEDDING_DIM {
            return Err(CallError::Embedding(format!(
                "embedding dimension mismatch: expected {EMBEDDING_DIM}, got {}",
                body.embedding.len()
            )));
        }

        Ok(l2_normalize(&body.embedding))
    }
}

// ---------------------------------------------------------------------------
// Vector helpers
// ---------------------------------------------------------------------------

/// L2-normalize a vector (returns a new vec; zero vectors pass through).
#[must_use]
pub fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < 1e-12 {
        return vec.to_vec();
    }
    vec.iter().map(|x| x / norm).collect()
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in `[-1.0, 1.0]`. Both vectors should be the same length.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have equal length");
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;
    if denom < 1e-12 {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn embedding_dim_constant() {
        assert_eq!(EMBEDDING_DIM, 1536);
    }

    #[test]
    fn l2_normalize_unit_length() {
        let v = vec![3.0, 4.0];
        let n = l2_normalize(&v);
        let norm: f32 = n.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_zero_vector() {
        let v = vec![0.0; 8];
        let n = l2_normalize(&v);
        assert_eq!(n.len(), 8);
        // Zero vector stays zero (no division by zero).
        assert!(n.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_zero_vector_is_zero() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
