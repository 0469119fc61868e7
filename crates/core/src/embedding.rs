//! Embedder trait, the abstraction over batch embedding services.

use async_trait::async_trait;

use crate::error::EmbeddingError;

/// Turns text into fixed-length vectors.
///
/// `embed` returns exactly one vector per input, in input order, or fails.
/// No retry happens at this layer.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier used for the vectors.
    fn model(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single text through the batch path.
    async fn embed_one(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(EmbeddingError::Empty)
    }
}
