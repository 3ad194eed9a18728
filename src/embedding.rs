//! Embedding generation with a deterministic offline fallback.
//!
//! The primary path delegates to the configured LLM provider's embedding
//! endpoint. When that fails or is unreachable, [`EmbeddingService`] falls
//! back to a hash-seeded pseudo-random embedding: the SHA-256 of the text
//! seeds a ChaCha8 stream, `dims` uniform values in `[-1, 1]` are drawn,
//! and the vector is L2-normalized. Identical text always produces the
//! identical fallback vector, across calls and across processes, so index
//! and query stay comparable even in fully degraded mode.
//!
//! Also provides [`cosine_similarity`], shared by the in-memory vector
//! store's linear scan.

use anyhow::Result;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::llm::LlmProvider;

/// Embeds text into fixed-dimension vectors. The dimension is fixed per
/// deployment and must match between index and query paths.
pub struct EmbeddingService {
    provider: Arc<dyn LlmProvider>,
    model: String,
    dims: usize,
}

impl EmbeddingService {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            dims: config.dims,
        }
    }

    /// Embed a batch of texts, one vector per input in order.
    ///
    /// Provider failure is not an error here: the deterministic fallback
    /// keeps the pipeline running, degraded but consistent.
    pub async fn embed(&self, texts: &[String]) -> Vec<Vec<f32>> {
        match self.provider.embed(texts, &self.model).await {
            Ok(vectors) if vectors.len() == texts.len() => vectors,
            Ok(vectors) => {
                warn!(
                    expected = texts.len(),
                    got = vectors.len(),
                    "embedding provider returned wrong batch size, using fallback"
                );
                texts.iter().map(|t| fallback_embedding(t, self.dims)).collect()
            }
            Err(e) => {
                warn!(error = %e, "embedding provider unavailable, using deterministic fallback");
                texts.iter().map(|t| fallback_embedding(t, self.dims)).collect()
            }
        }
    }

    pub async fn embed_single(&self, text: &str) -> Vec<f32> {
        let batch = [text.to_string()];
        self.embed(&batch)
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| fallback_embedding(text, self.dims))
    }
}

/// Deterministic hash-based embedding.
///
/// Seeded from the leading 8 bytes of the text's SHA-256 digest, so the
/// mapping is stable across platforms and releases.
pub fn fallback_embedding(text: &str, dims: usize) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    let seed = u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ]);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut v: Vec<f32> = (0..dims).map(|_| rng.gen_range(-1.0f32..1.0)).collect();

    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Cosine similarity between two vectors, in `[-1, 1]`.
///
/// Mismatched lengths and empty or zero-magnitude inputs score `0.0`
/// rather than erroring; a degenerate record should never sink a search.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::test_support::StubProvider;
    use crate::llm::Message;
    use async_trait::async_trait;

    struct FailingEmbed;

    #[async_trait]
    impl LlmProvider for FailingEmbed {
        async fn complete(
            &self,
            _messages: &[Message],
            _model: &str,
            _temperature: f32,
        ) -> Result<String> {
            anyhow::bail!("unused")
        }
        async fn embed(&self, _texts: &[String], _model: &str) -> Result<Vec<Vec<f32>>> {
            anyhow::bail!("embedding backend down")
        }
        async fn rerank(
            &self,
            _query: &str,
            _candidates: &[String],
            _model: &str,
        ) -> Result<Vec<usize>> {
            anyhow::bail!("unused")
        }
    }

    #[test]
    fn test_fallback_deterministic_across_calls() {
        let a = fallback_embedding("hello", 768);
        let b = fallback_embedding("hello", 768);
        assert_eq!(a, b);
        assert_eq!(a.len(), 768);
    }

    #[test]
    fn test_fallback_distinct_texts_distinct_vectors() {
        let a = fallback_embedding("hello", 64);
        let b = fallback_embedding("world", 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fallback_is_normalized() {
        let v = fallback_embedding("normalize me", 128);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "norm was {norm}");
    }

    #[test]
    fn test_cosine_identical_vectors() {
        let v = vec![0.5f32, -1.0, 2.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_length_mismatch_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[tokio::test]
    async fn test_service_falls_back_on_provider_error() {
        let service = EmbeddingService::new(
            std::sync::Arc::new(FailingEmbed),
            &EmbeddingConfig {
                model: "m".to_string(),
                dims: 32,
            },
        );
        let out = service.embed(&["alpha".to_string(), "beta".to_string()]).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], fallback_embedding("alpha", 32));
        assert_eq!(out[1], fallback_embedding("beta", 32));
    }

    #[tokio::test]
    async fn test_service_uses_provider_when_healthy() {
        let stub = StubProvider::default().with_embeddings(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let service = EmbeddingService::new(
            std::sync::Arc::new(stub),
            &EmbeddingConfig {
                model: "m".to_string(),
                dims: 2,
            },
        );
        let out = service.embed(&["a".to_string(), "b".to_string()]).await;
        assert_eq!(out, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }
}
