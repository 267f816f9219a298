// Ingestion pipeline
// Rows are built and tokenized up front, embedded with bounded concurrency and
// handed to the store in a single load


pub mod source;

use futures::{StreamExt, TryStreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::database::{EmbeddedRecord, LoadError, RecordStore, StoreError};
use crate::embeddings::{Embedder, EmbeddingError};
use crate::record::schema::SchemaError;
use crate::record::{self, Record};
use crate::token;
use crate::{ChatbotError, Result};

pub use source::SourceTable;

pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    /// Embedding calls allowed in flight at once
    pub concurrency: usize,
    pub embed_timeout: Option<Duration>,
    pub store_timeout: Option<Duration>,
    pub show_progress: bool,
}

impl Default for IngestOptions {
    #[inline]
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            embed_timeout: None,
            store_timeout: None,
            show_progress: false,
        }
    }
}

/// A parsed row and the prompt its embedding is requested with
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRow {
    pub record: Record,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub rows: usize,
    pub dimension: usize,
    pub elapsed: Duration,
}

pub struct Ingestor {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn RecordStore>,
    options: IngestOptions,
}

impl Ingestor {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            embedder,
            store,
            options: IngestOptions::default(),
        }
    }

    #[inline]
    pub fn with_options(mut self, options: IngestOptions) -> Self {
        self.options = IngestOptions {
            concurrency: options.concurrency.max(1),
            ..options
        };
        self
    }

    /// Build and tokenize every row. Nothing touches the network or the store
    /// until all rows have passed.
    #[inline]
    pub fn prepare<S: AsRef<str>>(&self, header: &[S], rows: &[Vec<S>]) -> Result<Vec<PreparedRow>> {
        let schema = self.store.schema();
        if header.len() != schema.width() {
            return Err(ChatbotError::Schema(SchemaError::LengthMismatch {
                fields: schema.width(),
                row: header.len(),
            }));
        }

        rows.iter()
            .enumerate()
            .map(|(row, values)| {
                let record = record::build(schema, values)
                    .map_err(|source| ChatbotError::Record { row, source })?;
                let tokens = token::tokenize(header, values)
                    .map_err(|source| ChatbotError::Tokenize { row, source })?;
                Ok(PreparedRow {
                    record,
                    prompt: token::embedding_prompt(&tokens),
                })
            })
            .collect()
    }

    #[inline]
    pub async fn ingest(&self, table: &SourceTable) -> Result<IngestReport> {
        self.ingest_rows(table.header(), table.rows()).await
    }

    #[inline]
    pub async fn ingest_rows<S: AsRef<str>>(
        &self,
        header: &[S],
        rows: &[Vec<S>],
    ) -> Result<IngestReport> {
        let start = Instant::now();
        let dimension = self.store.vector_dimension();

        let prepared = self.prepare(header, rows)?;
        if prepared.is_empty() {
            warn!("Source table has no rows, nothing to ingest");
            return Ok(IngestReport {
                rows: 0,
                dimension,
                elapsed: start.elapsed(),
            });
        }

        info!(
            "Embedding {} rows with up to {} concurrent requests",
            prepared.len(),
            self.options.concurrency
        );
        let entries = self.embed_all(prepared, dimension).await?;

        debug!("Loading {} entries in one batch", entries.len());
        let load = self.store.load(&entries);
        match self.options.store_timeout {
            Some(limit) => tokio::time::timeout(limit, load)
                .await
                .map_err(|_| LoadError::Batch(StoreError::Timeout(limit)))??,
            None => load.await?,
        }

        let report = IngestReport {
            rows: entries.len(),
            dimension,
            elapsed: start.elapsed(),
        };
        info!(
            "Ingested {} rows ({} dimensions) in {:.2?}",
            report.rows, report.dimension, report.elapsed
        );
        Ok(report)
    }

    /// Embed rows in input order; the first failure drops the rest
    async fn embed_all(
        &self,
        prepared: Vec<PreparedRow>,
        dimension: usize,
    ) -> Result<Vec<EmbeddedRecord>> {
        let bar = self.progress_bar(prepared.len());

        let entries = futures::stream::iter(prepared.into_iter().enumerate())
            .map(|(row, PreparedRow { record, prompt })| {
                let embedder = Arc::clone(&self.embedder);
                let embed_timeout = self.options.embed_timeout;
                let bar = bar.clone();
                async move {
                    let embedding = match embed_timeout {
                        Some(limit) => tokio::time::timeout(limit, embedder.embed(&prompt))
                            .await
                            .map_err(|_| EmbeddingError::Timeout(limit))??,
                        None => embedder.embed(&prompt).await?,
                    };

                    if embedding.len() != dimension {
                        return Err(ChatbotError::DimensionMismatch {
                            row,
                            expected: dimension,
                            actual: embedding.len(),
                        });
                    }

                    bar.inc(1);
                    Ok::<_, ChatbotError>(EmbeddedRecord { record, embedding })
                }
            })
            .buffered(self.options.concurrency)
            .try_collect::<Vec<_>>()
            .await;

        match &entries {
            Ok(_) => bar.finish_and_clear(),
            Err(_) => bar.abandon(),
        }
        entries
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if self.options.show_progress && console::user_attended_stderr() {
            let style = ProgressStyle::with_template("{spinner} [{pos}/{len}] Embedding rows {wide_bar}")
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            ProgressBar::new(len as u64).with_style(style)
        } else {
            ProgressBar::hidden()
        }
    }
}
