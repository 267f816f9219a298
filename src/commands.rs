use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::{RecordStore, open_store};
use crate::embeddings::{Embedder, OllamaClient};
use crate::ingest::{IngestOptions, IngestReport, Ingestor, SourceTable};
use crate::record::Record;
use crate::record::schema::Schema;
use crate::retrieval::Retriever;

/// Embedding client and record store described by a configuration
pub struct Services {
    pub client: Arc<OllamaClient>,
    pub store: Arc<dyn RecordStore>,
}

impl Services {
    #[inline]
    pub async fn open(config: &Config) -> Result<Self> {
        let schema = config
            .schema
            .to_schema()
            .context("Configured schema is invalid")?;
        let client = OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?;
        let store = open_store(config, Arc::new(schema))
            .await
            .with_context(|| format!("Failed to open {} store", config.store.backend))?;

        Ok(Self {
            client: Arc::new(client),
            store,
        })
    }

    #[inline]
    pub fn embedder(&self) -> Arc<dyn Embedder> {
        let client: Arc<OllamaClient> = Arc::clone(&self.client);
        client
    }

    #[inline]
    pub fn retriever(&self) -> Retriever {
        Retriever::new(self.embedder(), Arc::clone(&self.store))
    }
}

/// Prompt sent to the generation model for a question about one record
#[inline]
pub fn generation_prompt(schema: &Schema, record: &Record, question: &str) -> String {
    format!(
        "Using these {} statistics: {}. Respond to this prompt: {}",
        schema.label(),
        schema.render(record),
        question
    )
}

/// Read a CSV file and load every row into the configured store
#[inline]
pub async fn ingest_file(config: &Config, path: &Path) -> Result<IngestReport> {
    info!("Ingesting {}", path.display());

    let table = SourceTable::from_path(path, config.ingest.trailing_metadata_columns)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let services = Services::open(config).await?;

    let ingestor = Ingestor::new(services.embedder(), Arc::clone(&services.store))
        .with_options(IngestOptions {
            concurrency: config.ingest.concurrency,
            show_progress: true,
            ..IngestOptions::default()
        });

    let report = ingestor
        .ingest(&table)
        .await
        .with_context(|| format!("Failed to ingest {}", path.display()))?;

    println!(
        "Ingested {} rows into '{}' ({} dimensions) in {:.2?}",
        report.rows, config.store.table_name, report.dimension, report.elapsed
    );
    Ok(report)
}

/// Print the stored record closest to the question
#[inline]
pub async fn query_question(config: &Config, question: &str) -> Result<Record> {
    let services = Services::open(config).await?;
    let record = services
        .retriever()
        .query(question)
        .await
        .context("Query failed")?;

    println!("{}", services.store.schema().render(&record));
    Ok(record)
}

/// Print every record whose key column equals `key`
#[inline]
pub async fn lookup(config: &Config, key: &str) -> Result<Vec<Record>> {
    let services = Services::open(config).await?;
    let records = services
        .retriever()
        .by_exact_key(key)
        .await
        .context("Lookup failed")?;

    if records.is_empty() {
        println!("No records found for '{}'", key);
        return Ok(records);
    }

    let schema = services.store.schema();
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("{}", schema.render(record));
    }
    Ok(records)
}

/// Answer a question with the generation model, grounded on the closest record
#[inline]
pub async fn ask(config: &Config, question: &str) -> Result<String> {
    let services = Services::open(config).await?;
    let record = services
        .retriever()
        .query(question)
        .await
        .context("Failed to find a record for the question")?;

    let prompt = generation_prompt(services.store.schema(), &record, question);
    let client = Arc::clone(&services.client);
    let answer = tokio::task::spawn_blocking(move || client.generate(&prompt))
        .await
        .context("Generation task failed")??;

    println!("{}", answer);
    Ok(answer)
}

/// Print store and Ollama health
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 NBA Chatbot Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🗄️  Store Status:");
    println!("   Backend: {}", config.store.backend);
    println!("   Table: {}", config.store.table_name);
    println!("   Distance: {}", config.store.distance);
    println!("   Dimension: {}", config.ollama.embedding_dimension);
    match Services::open(config).await {
        Ok(services) => match services.store.count().await {
            Ok(count) => println!("   ✅ Stored records: {}", count),
            Err(e) => println!("   ⚠️  Store opened but could not be counted - {}", e),
        },
        Err(e) => {
            warn!("Store status check failed: {:#}", e);
            println!("   ❌ Store: Failed to open - {:#}", e);
        }
    }

    println!();
    println!("🤖 Ollama Status:");
    let health = OllamaClient::new(&config.ollama).map(|client| {
        client
            .with_timeout(Duration::from_secs(5))
            .health_check()
    });
    match health {
        Ok(Ok(())) => {
            println!(
                "   ✅ Ollama: Connected ({}:{})",
                config.ollama.host, config.ollama.port
            );
            println!("   📋 Embedding Model: {}", config.ollama.model);
            println!("   💬 Generation Model: {}", config.ollama.generation_model);
        }
        Ok(Err(e)) => println!("   ⚠️  Ollama: Connected but unhealthy - {}", e),
        Err(e) => println!("   ❌ Ollama: Failed to connect - {}", e),
    }

    Ok(())
}
