// Retrieval module
// Answers "which stored record is closest to this question"

#[cfg(test)]
mod tests;

use std::sync::Arc;
use tracing::debug;

use crate::database::{Neighbor, RecordStore, StoreError};
use crate::embeddings::Embedder;
use crate::record::Record;
use crate::{ChatbotError, Result};

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn RecordStore>,
}

impl Retriever {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn RecordStore>) -> Self {
        Self { embedder, store }
    }

    #[inline]
    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    /// Record whose embedding is closest to the question's.
    ///
    /// Fails with [`ChatbotError::NoMatch`] when nothing has been ingested.
    #[inline]
    pub async fn query(&self, question: &str) -> Result<Record> {
        debug!("Embedding question (length: {})", question.len());
        let vector = self.embedder.embed(question).await?;
        Ok(self.nearest_to(&vector).await?.record)
    }

    #[inline]
    pub async fn nearest_to(&self, vector: &[f32]) -> Result<Neighbor> {
        let expected = self.store.vector_dimension();
        if vector.len() != expected {
            return Err(ChatbotError::Store(StoreError::DimensionMismatch {
                expected,
                actual: vector.len(),
            }));
        }

        let neighbor = self
            .store
            .nearest(vector, 1)
            .await?
            .into_iter()
            .next()
            .ok_or(ChatbotError::NoMatch)?;

        debug!(
            "Nearest entry is row {} at distance {}",
            neighbor.row_id, neighbor.distance
        );
        Ok(neighbor)
    }

    /// Every record whose key column equals `key` exactly, in storage order
    #[inline]
    pub async fn by_exact_key(&self, key: &str) -> Result<Vec<Record>> {
        Ok(self.store.find_by_key(key).await?)
    }
}
