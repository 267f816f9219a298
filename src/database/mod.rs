// Database module
// Record stores that keep typed fields and embeddings side by side


pub mod lancedb;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{Config, StoreBackend};
use crate::record::Record;
use crate::record::schema::Schema;

pub use self::lancedb::LanceStore;
pub use self::sqlite::SqliteStore;

/// Candidates fetched per nearest-neighbor query so equidistant entries can be
/// ordered by `row_id`
pub const TIE_WINDOW: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Cosine,
}

impl DistanceMetric {
    /// Distance between two vectors of equal length; lower means closer
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

        match self {
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            DistanceMetric::Cosine => {
                let (dot, norm_a, norm_b) = a.iter().zip(b).fold(
                    (0.0f32, 0.0f32, 0.0f32),
                    |(dot, na, nb), (x, y)| (x.mul_add(*y, dot), x.mul_add(*x, na), y.mul_add(*y, nb)),
                );
                let denom = (norm_a * norm_b).sqrt();
                if denom == 0.0 { 1.0 } else { 1.0 - dot / denom }
            }
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Cosine => "cosine",
        }
    }
}

impl fmt::Display for DistanceMetric {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = StoreError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "cosine" | "cos" => Ok(DistanceMetric::Cosine),
            other => Err(StoreError::SchemaMismatch(format!(
                "unknown distance metric '{}'",
                other
            ))),
        }
    }
}

/// A record paired with its embedding, ready to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedRecord {
    pub record: Record,
    pub embedding: Vec<f32>,
}

/// A stored record returned by a nearest-neighbor query
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    /// Store-assigned, increasing in insertion order
    pub row_id: i64,
    pub record: Record,
    pub distance: f32,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("table does not match the record schema: {0}")]
    SchemaMismatch(String),
    #[error("vector has {actual} dimensions, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("record does not match the schema: {0}")]
    InvalidRecord(String),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("refusing to load an empty batch")]
    EmptyBatch,
    #[error("entry {index} was rejected, nothing was loaded: {source}")]
    Entry {
        index: usize,
        #[source]
        source: StoreError,
    },
    #[error("batch write failed, nothing was loaded: {0}")]
    Batch(#[source] StoreError),
}

impl LoadError {
    /// Index of the entry that caused the batch to fail, if one did
    #[inline]
    pub fn index(&self) -> Option<usize> {
        match self {
            LoadError::Entry { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Persistent home of embedded records.
///
/// `load` is all-or-nothing: either every entry of the batch is stored or
/// none is. Entries are append-only.
#[async_trait]
pub trait RecordStore: Send + Sync {
    fn schema(&self) -> &Schema;

    fn vector_dimension(&self) -> usize;

    fn distance_metric(&self) -> DistanceMetric;

    async fn load(&self, entries: &[EmbeddedRecord]) -> Result<(), LoadError>;

    /// Up to `limit` entries ordered by distance, ties broken by `row_id`
    async fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<Neighbor>, StoreError>;

    /// Every entry whose key column equals `key`, in storage order
    async fn find_by_key(&self, key: &str) -> Result<Vec<Record>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

/// Open the store selected by the configuration
#[inline]
pub async fn open_store(
    config: &Config,
    schema: Arc<Schema>,
) -> Result<Arc<dyn RecordStore>, StoreError> {
    let dimension = config.ollama.embedding_dimension as usize;
    let table = config.store.table_name.as_str();
    let metric = config.store.distance;

    let store: Arc<dyn RecordStore> = match config.store.backend {
        StoreBackend::Lancedb => Arc::new(
            LanceStore::open(
                &config.vector_database_path(),
                table,
                schema,
                dimension,
                metric,
            )
            .await?,
        ),
        StoreBackend::Sqlite => Arc::new(
            SqliteStore::open(&config.database_path(), table, schema, dimension, metric).await?,
        ),
    };
    Ok(store)
}

/// Check that a record's values line up with the schema's kinds
pub(crate) fn validate_record(schema: &Schema, record: &Record) -> Result<(), StoreError> {
    if record.len() != schema.width() {
        return Err(StoreError::InvalidRecord(format!(
            "expected {} values, got {}",
            schema.width(),
            record.len()
        )));
    }

    for (field, value) in schema.fields().iter().zip(record.values()) {
        if value.kind() != field.kind {
            return Err(StoreError::InvalidRecord(format!(
                "column '{}' expects {}, got {}",
                field.column,
                field.kind,
                value.kind()
            )));
        }
    }
    Ok(())
}

/// Order candidates by `(distance, row_id)` and keep the first `limit`
pub(crate) fn rank_neighbors(mut candidates: Vec<Neighbor>, limit: usize) -> Vec<Neighbor> {
    candidates.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.row_id.cmp(&b.row_id))
    });
    candidates.truncate(limit);
    candidates
}

pub(crate) fn compare_candidates(a: &(i64, f32), b: &(i64, f32)) -> Ordering {
    a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0))
}

/// Quote a validated identifier for use in SQL or LanceDB filters
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name)
}

/// Escape a string literal for a SQL-style filter expression
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
