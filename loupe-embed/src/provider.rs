//! The embedding capability trait.
//!
//! Vectors are `f16` throughout: half precision halves index memory and is
//! plenty for cosine ranking. Concrete providers (ONNX runtimes, remote
//! APIs) live outside this workspace; the trait is the seam they plug into.

use crate::error::Result;
use async_trait::async_trait;
use half::f16;

/// Result of embedding generation.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text.
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector.
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Build a result, inferring the dimension from the first vector.
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text.
///
/// Implementations may fail transiently; callers distinguish retryable
/// failures via [`EmbedError::is_transient`](crate::EmbedError::is_transient).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>>;

    /// Generate embeddings for multiple texts (batch processing).
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Dimension of the vectors this provider produces.
    fn embedding_dimension(&self) -> usize;

    /// Name/identifier of this provider.
    fn provider_name(&self) -> &str;
}

/// Cosine similarity between two f16 vectors, computed in f32.
///
/// Returns 0.0 for mismatched or zero-magnitude inputs rather than erroring;
/// ranking code treats those as "no signal".
pub fn cosine_similarity(a: &[f16], b: &[f16]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (x.to_f32(), y.to_f32());
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(values: &[f32]) -> Vec<f16> {
        values.iter().copied().map(f16::from_f32).collect()
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = v(&[0.5, 0.5, 0.1]);
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = v(&[1.0, 0.0]);
        let b = v(&[0.0, 1.0]);
        assert!(cosine_similarity(&a, &b).abs() < 1e-3);
    }

    #[test]
    fn test_cosine_similarity_degenerate_inputs() {
        let a = v(&[1.0, 0.0]);
        assert_eq!(cosine_similarity(&a, &v(&[1.0])), 0.0);
        assert_eq!(cosine_similarity(&a, &v(&[0.0, 0.0])), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_embedding_result_dimension_inference() {
        let result = EmbeddingResult::new(vec![v(&[0.1, 0.2, 0.3])]);
        assert_eq!(result.dimension, 3);
        assert_eq!(result.len(), 1);
        assert!(!result.is_empty());
        assert_eq!(EmbeddingResult::new(vec![]).dimension, 0);
    }
}
