
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use itertools::Itertools;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    DistanceMetric, EmbeddedRecord, LoadError, Neighbor, RecordStore, StoreError,
    compare_candidates, quote_identifier, rank_neighbors, validate_record,
};
use crate::record::schema::{FieldKind, FieldSpec, Schema};
use crate::record::{FieldValue, Record};

pub type DbPool = Pool<Sqlite>;

/// Record store backed by a single SQLite table.
///
/// Embeddings are kept as little-endian `f32` blobs; nearest-neighbor queries
/// scan the whole table.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
    table: String,
    schema: Arc<Schema>,
    dimension: usize,
    metric: DistanceMetric,
}

impl SqliteStore {
    #[inline]
    pub async fn open(
        path: &Path,
        table_name: &str,
        schema: Arc<Schema>,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Database(format!("Failed to create database directory: {}", e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                StoreError::Database(format!("Failed to create database connection pool: {}", e))
            })?;

        let store = Self {
            pool,
            table: table_name.to_string(),
            schema,
            dimension,
            metric,
        };
        store.run_migrations().await?;
        store.ensure_table().await?;

        info!(
            "SQLite table '{}' ready ({} columns, {} dimensions, {})",
            store.table,
            store.schema.width(),
            dimension,
            metric
        );
        Ok(store)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        debug!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to run schema migration: {}", e)))
    }

    /// Create the record table, or check that an existing one matches
    async fn ensure_table(&self) -> Result<(), StoreError> {
        let columns = column_signature(self.schema.fields());

        let existing = sqlx::query(
            "SELECT vector_dimension, distance_metric, columns FROM store_metadata WHERE table_name = ?",
        )
        .bind(&self.table)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        if let Some(row) = existing {
            let stored_dimension: i64 = row.try_get("vector_dimension").map_err(db_error)?;
            let stored_metric: String = row.try_get("distance_metric").map_err(db_error)?;
            let stored_columns: String = row.try_get("columns").map_err(db_error)?;

            if stored_dimension as usize != self.dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: self.dimension,
                    actual: stored_dimension as usize,
                });
            }
            if stored_metric != self.metric.name() {
                return Err(StoreError::SchemaMismatch(format!(
                    "table was created for {} distance, not {}",
                    stored_metric, self.metric
                )));
            }
            if stored_columns != columns {
                return Err(StoreError::SchemaMismatch(format!(
                    "table has columns {}",
                    stored_columns
                )));
            }
            debug!("Table '{}' already exists", self.table);
            return Ok(());
        }

        let unmanaged: Option<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(&self.table)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        if unmanaged.is_some() {
            return Err(StoreError::SchemaMismatch(format!(
                "table '{}' exists but has no recorded layout",
                self.table
            )));
        }

        info!("Creating table '{}'", self.table);
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query(&create_table_sql(&self.table, &self.schema, self.dimension))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        sqlx::query(&format!(
            "CREATE INDEX {} ON {} ({})",
            quote_identifier(&format!("idx_{}_key", self.table)),
            quote_identifier(&self.table),
            quote_identifier(&self.schema.key_field().column)
        ))
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        sqlx::query(
            "INSERT INTO store_metadata (table_name, vector_dimension, distance_metric, columns, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&self.table)
        .bind(self.dimension as i64)
        .bind(self.metric.name())
        .bind(&columns)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)
    }

    fn select_columns(&self) -> String {
        std::iter::once("row_id".to_string())
            .chain(
                self.schema
                    .fields()
                    .iter()
                    .map(|f| quote_identifier(&f.column)),
            )
            .join(", ")
    }

    fn parse_row(&self, row: &SqliteRow) -> Result<(i64, Record), StoreError> {
        let row_id: i64 = row.try_get("row_id").map_err(db_error)?;

        let mut values = Vec::with_capacity(self.schema.width());
        for field in self.schema.fields() {
            let column = field.column.as_str();
            let value = match field.kind {
                FieldKind::Integer => FieldValue::Integer(row.try_get(column).map_err(db_error)?),
                FieldKind::Float => FieldValue::Float(row.try_get(column).map_err(db_error)?),
                FieldKind::OptionalFloat => {
                    FieldValue::OptionalFloat(row.try_get(column).map_err(db_error)?)
                }
                FieldKind::Text => FieldValue::Text(row.try_get(column).map_err(db_error)?),
            };
            values.push(value);
        }

        Ok((row_id, Record::from_values(values)))
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    #[inline]
    fn schema(&self) -> &Schema {
        &self.schema
    }

    #[inline]
    fn vector_dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn distance_metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Inserts every entry inside one transaction; any failure rolls it back
    #[inline]
    async fn load(&self, entries: &[EmbeddedRecord]) -> Result<(), LoadError> {
        if entries.is_empty() {
            return Err(LoadError::EmptyBatch);
        }

        let insert_sql = format!(
            "INSERT INTO {} ({}, embedding) VALUES ({}, ?)",
            quote_identifier(&self.table),
            self.schema
                .fields()
                .iter()
                .map(|f| quote_identifier(&f.column))
                .join(", "),
            std::iter::repeat_n("?", self.schema.width()).join(", ")
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LoadError::Batch(db_error(e)))?;

        for (index, entry) in entries.iter().enumerate() {
            if let Err(source) = validate_record(&self.schema, &entry.record) {
                warn!("Rolling back batch: entry {} is invalid", index);
                return Err(LoadError::Entry { index, source });
            }

            let mut query = sqlx::query(&insert_sql);
            for value in entry.record.values() {
                query = match value {
                    FieldValue::Integer(v) => query.bind(*v),
                    FieldValue::Float(v) => query.bind(*v),
                    FieldValue::OptionalFloat(v) => query.bind(*v),
                    FieldValue::Text(v) => query.bind(v.as_str()),
                };
            }
            query = query.bind(encode_embedding(&entry.embedding));

            if let Err(e) = query.execute(&mut *tx).await {
                warn!("Rolling back batch: entry {} failed to insert", index);
                let source = if entry.embedding.len() == self.dimension {
                    db_error(e)
                } else {
                    StoreError::DimensionMismatch {
                        expected: self.dimension,
                        actual: entry.embedding.len(),
                    }
                };
                return Err(LoadError::Entry { index, source });
            }
        }

        tx.commit()
            .await
            .map_err(|e| LoadError::Batch(db_error(e)))?;

        info!("Stored {} records", entries.len());
        Ok(())
    }

    #[inline]
    async fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<Neighbor>, StoreError> {
        if query.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let scan_sql = format!(
            "SELECT row_id, embedding FROM {}",
            quote_identifier(&self.table)
        );
        let mut rows = sqlx::query(&scan_sql).fetch(&self.pool);

        let mut candidates: Vec<(i64, f32)> = Vec::new();
        while let Some(row) = rows.try_next().await.map_err(db_error)? {
            let row_id: i64 = row.try_get("row_id").map_err(db_error)?;
            let blob: Vec<u8> = row.try_get("embedding").map_err(db_error)?;
            let embedding = decode_embedding(&blob, self.dimension)?;
            candidates.push((row_id, self.metric.distance(query, &embedding)));
        }
        drop(rows);

        candidates.sort_by(compare_candidates);
        candidates.truncate(limit);
        debug!("Scan kept {} candidates", candidates.len());
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let fetch_sql = format!(
            "SELECT {} FROM {} WHERE row_id IN ({})",
            self.select_columns(),
            quote_identifier(&self.table),
            candidates.iter().map(|(row_id, _)| row_id).join(", ")
        );
        let fetched = sqlx::query(&fetch_sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        let mut neighbors = Vec::with_capacity(fetched.len());
        for row in &fetched {
            let (row_id, record) = self.parse_row(row)?;
            let distance = candidates
                .iter()
                .find(|(id, _)| *id == row_id)
                .map_or(f32::INFINITY, |(_, d)| *d);
            neighbors.push(Neighbor {
                row_id,
                record,
                distance,
            });
        }

        Ok(rank_neighbors(neighbors, limit))
    }

    #[inline]
    async fn find_by_key(&self, key: &str) -> Result<Vec<Record>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ? ORDER BY row_id",
            self.select_columns(),
            quote_identifier(&self.table),
            quote_identifier(&self.schema.key_field().column)
        );

        let rows = sqlx::query(&sql)
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter()
            .map(|row| self.parse_row(row).map(|(_, record)| record))
            .collect()
    }

    #[inline]
    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {}",
            quote_identifier(&self.table)
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(count as u64)
    }
}

fn create_table_sql(table: &str, schema: &Schema, dimension: usize) -> String {
    let columns = schema
        .fields()
        .iter()
        .map(|field| {
            let declaration = match field.kind {
                FieldKind::Integer => "INTEGER NOT NULL",
                FieldKind::Float => "REAL NOT NULL",
                FieldKind::OptionalFloat => "REAL",
                FieldKind::Text => "TEXT NOT NULL",
            };
            format!("{} {}", quote_identifier(&field.column), declaration)
        })
        .join(",\n    ");

    format!(
        "CREATE TABLE {} (\n    row_id INTEGER PRIMARY KEY AUTOINCREMENT,\n    {},\n    embedding BLOB NOT NULL CHECK (length(embedding) = {})\n)",
        quote_identifier(table),
        columns,
        dimension * 4
    )
}

/// `column:kind` pairs in schema order, recorded alongside each table
fn column_signature(fields: &[FieldSpec]) -> String {
    fields
        .iter()
        .map(|f| format!("{}:{:?}", f.column, f.kind))
        .join(",")
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8], dimension: usize) -> Result<Vec<f32>, StoreError> {
    if blob.len() != dimension * 4 {
        return Err(StoreError::DimensionMismatch {
            expected: dimension,
            actual: blob.len() / 4,
        });
    }

    Ok(blob
        .chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect())
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}
