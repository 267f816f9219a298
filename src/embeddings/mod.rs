// Embeddings module
// Request/response contract with the external embedding model

pub mod ollama;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use ollama::OllamaClient;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to reach embedding service: {0}")]
    Transport(String),
    #[error("embedding service returned HTTP {0}")]
    Status(u16),
    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),
    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),
    #[error("embedding task failed: {0}")]
    Task(String),
    #[error("invalid embedding service URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Turns a prompt into a fixed-length vector.
///
/// Implementations make one request per call and do not check the vector
/// length against any store; callers do.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, prompt: &str) -> Result<Vec<f32>, EmbeddingError>;
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Arc<T> {
    #[inline]
    async fn embed(&self, prompt: &str) -> Result<Vec<f32>, EmbeddingError> {
        (**self).embed(prompt).await
    }
}
