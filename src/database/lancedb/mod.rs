// LanceDB record store
// Every schema column becomes a typed Arrow column next to a fixed-size vector column


use arrow::array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, Float64Array, Int64Array,
    RecordBatchIterator, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    DistanceMetric, EmbeddedRecord, LoadError, Neighbor, RecordStore, StoreError, TIE_WINDOW,
    quote_identifier, quote_literal, rank_neighbors, validate_record,
};
use crate::record::schema::{FieldKind, Schema};
use crate::record::{FieldValue, Record};

const ROW_ID_COLUMN: &str = "row_id";
const VECTOR_COLUMN: &str = "vector";
const DISTANCE_COLUMN: &str = "_distance";
const METRIC_METADATA_KEY: &str = "distance_metric";

/// How long a writer waits for another process to finish appending
const LOCK_WAIT: Duration = Duration::from_secs(30);
const LOCK_POLL: Duration = Duration::from_millis(25);
/// Lock files older than this are left over from a crashed writer
const STALE_LOCK_AGE: Duration = Duration::from_secs(600);

/// Record store backed by a LanceDB table
pub struct LanceStore {
    table: Table,
    schema: Arc<Schema>,
    arrow_schema: SchemaRef,
    dimension: usize,
    metric: DistanceMetric,
    /// Serializes row id assignment with the append that uses it
    write_lock: Mutex<()>,
    /// Lock file shared with other processes writing the same table
    lock_path: PathBuf,
}

impl LanceStore {
    /// Open `table_name` under `path`, creating it when missing.
    ///
    /// An existing table must carry exactly the columns the schema describes
    /// and a vector column of `dimension` entries.
    #[inline]
    pub async fn open(
        path: &Path,
        table_name: &str,
        schema: Arc<Schema>,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<Self, StoreError> {
        std::fs::create_dir_all(path).map_err(|e| {
            StoreError::Database(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = path.display().to_string();
        debug!("Opening LanceDB at {}", uri);
        // Every read sees commits made through other handles
        let connection = lancedb::connect(&uri)
            .read_consistency_interval(Duration::ZERO)
            .execute()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect to LanceDB: {}", e)))?;

        let arrow_schema = arrow_schema(&schema, dimension, metric);
        let table = open_or_create_table(&connection, table_name, &arrow_schema).await?;

        let existing = table
            .schema()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to read table schema: {}", e)))?;
        verify_table_schema(&existing, &arrow_schema, dimension, metric)?;

        info!(
            "LanceDB table '{}' ready ({} columns, {} dimensions, {})",
            table_name,
            schema.width(),
            dimension,
            metric
        );

        Ok(Self {
            table,
            schema,
            arrow_schema,
            dimension,
            metric,
            write_lock: Mutex::new(()),
            lock_path: path.join(format!("{}.write.lock", table_name)),
        })
    }

    fn create_record_batch(
        &self,
        entries: &[EmbeddedRecord],
        first_row_id: i64,
    ) -> Result<RecordBatch, StoreError> {
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.schema.width() + 2);

        let row_ids: Vec<i64> = (0..entries.len() as i64).map(|i| first_row_id + i).collect();
        arrays.push(Arc::new(Int64Array::from(row_ids)));

        for (position, field) in self.schema.fields().iter().enumerate() {
            let values = entries.iter().map(|entry| &entry.record.values()[position]);
            let array: ArrayRef = match field.kind {
                FieldKind::Integer => Arc::new(Int64Array::from(
                    values
                        .map(|value| match value {
                            FieldValue::Integer(v) => Some(*v),
                            _ => None,
                        })
                        .collect::<Vec<_>>(),
                )),
                FieldKind::Float | FieldKind::OptionalFloat => Arc::new(Float64Array::from(
                    values
                        .map(|value| match value {
                            FieldValue::Float(v) => Some(*v),
                            FieldValue::OptionalFloat(v) => *v,
                            _ => None,
                        })
                        .collect::<Vec<_>>(),
                )),
                FieldKind::Text => Arc::new(StringArray::from(
                    values.map(FieldValue::as_text).collect::<Vec<_>>(),
                )),
            };
            arrays.push(array);
        }

        let mut flat_values = Vec::with_capacity(entries.len() * self.dimension);
        for entry in entries {
            flat_values.extend_from_slice(&entry.embedding);
        }
        let item = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            item,
            self.dimension as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| StoreError::Database(format!("Failed to create vector array: {}", e)))?;
        arrays.push(Arc::new(vector_array));

        RecordBatch::try_new(Arc::clone(&self.arrow_schema), arrays)
            .map_err(|e| StoreError::Database(format!("Failed to create record batch: {}", e)))
    }

    /// Turn result batches back into `(row_id, record, distance)` triples
    async fn collect_rows(
        &self,
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<Neighbor>, StoreError> {
        let mut rows = Vec::new();

        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to read result stream: {}", e)))?
        {
            rows.extend(self.parse_batch(&batch)?);
        }

        Ok(rows)
    }

    fn parse_batch(&self, batch: &RecordBatch) -> Result<Vec<Neighbor>, StoreError> {
        let row_ids = column_as::<Int64Array>(batch, ROW_ID_COLUMN)?;
        let distances = batch
            .column_by_name(DISTANCE_COLUMN)
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut columns = Vec::with_capacity(self.schema.width());
        for field in self.schema.fields() {
            let array = batch.column_by_name(&field.column).ok_or_else(|| {
                StoreError::SchemaMismatch(format!("missing column '{}'", field.column))
            })?;
            columns.push((field, array));
        }

        let mut rows = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let mut values = Vec::with_capacity(columns.len());
            for (field, array) in &columns {
                values.push(read_value(field.kind, &field.column, array.as_ref(), row)?);
            }

            let raw = distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });
            let distance = match self.metric {
                // LanceDB reports squared L2
                DistanceMetric::Euclidean => raw.max(0.0).sqrt(),
                DistanceMetric::Cosine => raw,
            };

            rows.push(Neighbor {
                row_id: row_ids.value(row),
                record: Record::from_values(values),
                distance,
            });
        }
        Ok(rows)
    }

    /// One past the largest stored `row_id`, or 0 for an empty table
    async fn next_row_id(&self) -> Result<i64, StoreError> {
        let mut results = self
            .table
            .query()
            .select(Select::columns(&[ROW_ID_COLUMN]))
            .execute()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to scan row ids: {}", e)))?;

        let mut max_row_id = None;
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to read result stream: {}", e)))?
        {
            let row_ids = column_as::<Int64Array>(&batch, ROW_ID_COLUMN)?;
            max_row_id = row_ids.iter().flatten().chain(max_row_id).max();
        }
        Ok(max_row_id.map_or(0, |id| id + 1))
    }

    async fn search(
        &self,
        query: &[f32],
        distance_type: DistanceType,
        fetch: usize,
    ) -> Result<Vec<Neighbor>, StoreError> {
        let results = self
            .table
            .vector_search(query)
            .map_err(|e| StoreError::Database(format!("Failed to create vector search: {}", e)))?
            .column(VECTOR_COLUMN)
            .distance_type(distance_type)
            .limit(fetch)
            .execute()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to execute search: {}", e)))?;

        self.collect_rows(results).await
    }

    async fn row_count(&self) -> Result<usize, StoreError> {
        self.table
            .count_rows(None)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to count rows: {}", e)))
    }
}

#[async_trait]
impl RecordStore for LanceStore {
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

    /// Validates every entry first, then appends the whole batch as one commit
    #[inline]
    async fn load(&self, entries: &[EmbeddedRecord]) -> Result<(), LoadError> {
        if entries.is_empty() {
            return Err(LoadError::EmptyBatch);
        }

        for (index, entry) in entries.iter().enumerate() {
            if entry.embedding.len() != self.dimension {
                return Err(LoadError::Entry {
                    index,
                    source: StoreError::DimensionMismatch {
                        expected: self.dimension,
                        actual: entry.embedding.len(),
                    },
                });
            }
            validate_record(&self.schema, &entry.record)
                .map_err(|source| LoadError::Entry { index, source })?;
        }

        let _guard = self.write_lock.lock().await;
        let _file_lock = FileLock::acquire(&self.lock_path, LOCK_WAIT)
            .await
            .map_err(LoadError::Batch)?;
        let first_row_id = self.next_row_id().await.map_err(LoadError::Batch)?;
        let batch = self
            .create_record_batch(entries, first_row_id)
            .map_err(LoadError::Batch)?;

        debug!("Appending {} rows starting at row_id {}", entries.len(), first_row_id);
        let reader =
            RecordBatchIterator::new(std::iter::once(Ok(batch)), Arc::clone(&self.arrow_schema));
        self.table.add(reader).execute().await.map_err(|e| {
            LoadError::Batch(StoreError::Database(format!("Failed to append rows: {}", e)))
        })?;

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
        if limit == 0 || self.row_count().await? == 0 {
            return Ok(Vec::new());
        }

        let distance_type = match self.metric {
            DistanceMetric::Euclidean => DistanceType::L2,
            DistanceMetric::Cosine => DistanceType::Cosine,
        };

        // Grow the window while the tie at the cut-off may extend past it
        let mut fetch = limit + TIE_WINDOW;
        loop {
            let candidates = self.search(query, distance_type, fetch).await?;
            debug!("Vector search returned {} candidates", candidates.len());
            if candidates.len() < fetch || !tie_reaches_window_end(&candidates, limit) {
                return Ok(rank_neighbors(candidates, limit));
            }
            fetch *= 2;
        }
    }

    #[inline]
    async fn find_by_key(&self, key: &str) -> Result<Vec<Record>, StoreError> {
        let predicate = format!(
            "{} = {}",
            quote_identifier(&self.schema.key_field().column),
            quote_literal(key)
        );
        debug!("Looking up records where {}", predicate);

        let results = self
            .table
            .query()
            .only_if(predicate)
            .execute()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to execute lookup: {}", e)))?;

        let mut rows = self.collect_rows(results).await?;
        rows.sort_by_key(|row| row.row_id);
        Ok(rows.into_iter().map(|row| row.record).collect())
    }

    #[inline]
    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.row_count().await? as u64)
    }
}

/// True when the farthest candidate is as close as the `limit`-th nearest,
/// so unseen entries could share that distance with a lower `row_id`
fn tie_reaches_window_end(candidates: &[Neighbor], limit: usize) -> bool {
    let mut distances: Vec<f32> = candidates.iter().map(|c| c.distance).collect();
    distances.sort_by(f32::total_cmp);
    match (distances.get(limit.saturating_sub(1)), distances.last()) {
        (Some(cutoff), Some(farthest)) => farthest <= cutoff,
        _ => false,
    }
}

/// Exclusive lock file, removed on drop
struct FileLock {
    path: PathBuf,
}

impl FileLock {
    async fn acquire(path: &Path, wait: Duration) -> Result<Self, StoreError> {
        let deadline = Instant::now() + wait;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(path) {
                        warn!("Removing stale lock file {}", path.display());
                        let _ = std::fs::remove_file(path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(StoreError::Timeout(wait));
                    }
                    tokio::time::sleep(LOCK_POLL).await;
                }
                Err(e) => {
                    return Err(StoreError::Database(format!(
                        "Failed to create lock file {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove lock file {}: {}", self.path.display(), e);
        }
    }
}

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

fn arrow_schema(schema: &Schema, dimension: usize, metric: DistanceMetric) -> SchemaRef {
    let mut fields = Vec::with_capacity(schema.width() + 2);
    fields.push(Field::new(ROW_ID_COLUMN, DataType::Int64, false));

    for field in schema.fields() {
        let (data_type, nullable) = match field.kind {
            FieldKind::Integer => (DataType::Int64, false),
            FieldKind::Float => (DataType::Float64, false),
            FieldKind::OptionalFloat => (DataType::Float64, true),
            FieldKind::Text => (DataType::Utf8, false),
        };
        fields.push(Field::new(&field.column, data_type, nullable));
    }

    fields.push(Field::new(
        VECTOR_COLUMN,
        DataType::FixedSizeList(
            Arc::new(Field::new("item", DataType::Float32, false)),
            dimension as i32,
        ),
        false,
    ));

    let metadata = HashMap::from([(METRIC_METADATA_KEY.to_string(), metric.name().to_string())]);
    Arc::new(ArrowSchema::new_with_metadata(fields, metadata))
}

async fn open_or_create_table(
    connection: &Connection,
    table_name: &str,
    arrow_schema: &SchemaRef,
) -> Result<Table, StoreError> {
    let table_names = connection
        .table_names()
        .execute()
        .await
        .map_err(|e| StoreError::Database(format!("Failed to list tables: {}", e)))?;

    if table_names.iter().any(|name| name == table_name) {
        debug!("Table '{}' already exists", table_name);
        connection
            .open_table(table_name)
            .execute()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to open table: {}", e)))
    } else {
        info!("Creating table '{}'", table_name);
        connection
            .create_empty_table(table_name, Arc::clone(arrow_schema))
            .execute()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to create table: {}", e)))
    }
}

/// The stored layout must match what this schema would create
fn verify_table_schema(
    existing: &ArrowSchema,
    expected: &ArrowSchema,
    dimension: usize,
    metric: DistanceMetric,
) -> Result<(), StoreError> {
    let stored_dimension = existing
        .fields()
        .iter()
        .find(|f| f.name() == VECTOR_COLUMN)
        .and_then(|f| match f.data_type() {
            DataType::FixedSizeList(_, size) => Some(*size as usize),
            _ => None,
        });
    if let Some(actual) = stored_dimension.filter(|size| *size != dimension) {
        return Err(StoreError::DimensionMismatch {
            expected: dimension,
            actual,
        });
    }

    // Compare list element types but not the element field's name or nullability
    let describe = |schema: &ArrowSchema| -> Vec<(String, String, bool)> {
        schema
            .fields()
            .iter()
            .map(|f| {
                let data_type = match f.data_type() {
                    DataType::FixedSizeList(item, size) => {
                        format!("FixedSizeList({}, {})", item.data_type(), size)
                    }
                    other => other.to_string(),
                };
                (f.name().clone(), data_type, f.is_nullable())
            })
            .collect()
    };
    if describe(existing) != describe(expected) {
        return Err(StoreError::SchemaMismatch(format!(
            "table has columns {:?}",
            existing.fields().iter().map(|f| f.name()).collect::<Vec<_>>()
        )));
    }

    if let Some(stored) = existing
        .metadata()
        .get(METRIC_METADATA_KEY)
        .filter(|stored| stored.as_str() != metric.name())
    {
        return Err(StoreError::SchemaMismatch(format!(
            "table was created for {} distance, not {}",
            stored, metric
        )));
    }

    Ok(())
}

fn column_as<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, StoreError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| StoreError::SchemaMismatch(format!("missing column '{}'", name)))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| StoreError::SchemaMismatch(format!("invalid type for column '{}'", name)))
}

fn read_value(
    kind: FieldKind,
    column: &str,
    array: &dyn Array,
    row: usize,
) -> Result<FieldValue, StoreError> {
    let invalid = || StoreError::SchemaMismatch(format!("invalid type for column '{}'", column));

    let value = match kind {
        FieldKind::Integer => FieldValue::Integer(
            array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(invalid)?
                .value(row),
        ),
        FieldKind::Float => FieldValue::Float(
            array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(invalid)?
                .value(row),
        ),
        FieldKind::OptionalFloat => {
            let floats = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(invalid)?;
            FieldValue::OptionalFloat((!floats.is_null(row)).then(|| floats.value(row)))
        }
        FieldKind::Text => FieldValue::Text(
            array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(invalid)?
                .value(row)
                .to_string(),
        ),
    };
    Ok(value)
}
