use thiserror::Error;

use crate::database::{LoadError, StoreError};
use crate::embeddings::EmbeddingError;
use crate::record::RecordError;
use crate::record::schema::SchemaError;

pub type Result<T> = std::result::Result<T, ChatbotError>;

#[derive(Error, Debug)]
pub enum ChatbotError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Row {row}: {source}")]
    Tokenize {
        row: usize,
        #[source]
        source: SchemaError,
    },

    #[error("Row {row}: {source}")]
    Record {
        row: usize,
        #[source]
        source: RecordError,
    },

    #[error("Row {row}: embedding has {actual} dimensions, store expects {expected}")]
    DimensionMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Embedding service error: {0}")]
    EmbeddingService(#[from] EmbeddingError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("No stored records to match against")]
    NoMatch,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod ingest;
pub mod record;
pub mod retrieval;
pub mod token;
