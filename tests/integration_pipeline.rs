#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! Ingestion and retrieval against both store backends with a stub embedder
use async_trait::async_trait;
use nba_chatbot::ChatbotError;
use nba_chatbot::config::{Config, StoreBackend};
use nba_chatbot::database::{EmbeddedRecord, LoadError, RecordStore, open_store};
use nba_chatbot::embeddings::{Embedder, EmbeddingError};
use nba_chatbot::ingest::{Ingestor, SourceTable};
use nba_chatbot::record::schema::{FieldKind, Schema};
use nba_chatbot::record::{FieldValue, Record, build};
use nba_chatbot::retrieval::Retriever;
use std::sync::Arc;
use tempfile::TempDir;

const DIMENSION: usize = 4;
const BACKENDS: [StoreBackend; 2] = [StoreBackend::Lancedb, StoreBackend::Sqlite];

/// Maps each known name to its own axis; anything else lands near Alice
struct StubEmbedder;

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, prompt: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vector = if prompt.contains("Alice") {
            vec![1.0, 0.0, 0.0, 0.0]
        } else if prompt.contains("Bob") {
            vec![0.0, 1.0, 0.0, 0.0]
        } else if prompt.contains("Carol") {
            vec![0.0, 0.0, 1.0, 0.0]
        } else {
            vec![0.9, 0.2, 0.0, 0.0]
        };
        Ok(vector)
    }
}

fn schema() -> Schema {
    Schema::from_columns(
        "Scores",
        &[
            ("rank", FieldKind::Integer),
            ("name", FieldKind::Text),
            ("points", FieldKind::Float),
            ("ft_pct", FieldKind::OptionalFloat),
        ],
        "name",
    )
    .expect("test schema should be valid")
}

async fn open(backend: StoreBackend, dir: &TempDir) -> Arc<dyn RecordStore> {
    let mut config = Config {
        base_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    config.store.backend = backend;
    config.store.table_name = "scores".to_string();
    config.ollama.embedding_dimension = DIMENSION as u32;

    open_store(&config, Arc::new(schema()))
        .await
        .expect("store should open")
}

fn table(rows: &[[&str; 4]]) -> SourceTable {
    SourceTable::new(
        ["rank", "name", "points", "ft_pct"]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
        rows.iter()
            .map(|row| row.iter().map(|s| (*s).to_string()).collect())
            .collect(),
    )
}

fn embedded(row: [&str; 4], embedding: Vec<f32>) -> EmbeddedRecord {
    EmbeddedRecord {
        record: build(&schema(), &row).expect("row should build"),
        embedding,
    }
}

#[tokio::test]
async fn two_players_end_to_end() {
    for backend in BACKENDS {
        let dir = TempDir::new().expect("should create temp dir");
        let store = open(backend, &dir).await;
        let embedder: Arc<dyn Embedder> = Arc::new(StubEmbedder);

        let report = Ingestor::new(Arc::clone(&embedder), Arc::clone(&store))
            .ingest(&table(&[
                ["1", "Alice", "30.5", ".850"],
                ["2", "Bob", "22.0", ""],
            ]))
            .await
            .expect("ingestion should succeed");
        assert_eq!(report.rows, 2, "{backend}");
        assert_eq!(store.count().await.expect("count should succeed"), 2);

        let retriever = Retriever::new(embedder, Arc::clone(&store));
        let record = retriever
            .query("who scored the most")
            .await
            .expect("query should match");
        assert_eq!(record.key(store.schema()), Some("Alice"), "{backend}");
        assert_eq!(record.values()[2], FieldValue::Float(30.5));
    }
}

#[tokio::test]
async fn absent_optional_survives_storage() {
    for backend in BACKENDS {
        let dir = TempDir::new().expect("should create temp dir");
        let store = open(backend, &dir).await;
        let embedder: Arc<dyn Embedder> = Arc::new(StubEmbedder);

        Ingestor::new(Arc::clone(&embedder), Arc::clone(&store))
            .ingest(&table(&[
                ["1", "Alice", "30.5", ".850"],
                ["2", "Bob", "22.0", ""],
            ]))
            .await
            .expect("ingestion should succeed");

        let retriever = Retriever::new(embedder, Arc::clone(&store));
        let bob = retriever
            .by_exact_key("Bob")
            .await
            .expect("lookup should succeed");
        assert_eq!(bob.len(), 1, "{backend}");
        assert_eq!(bob[0].values()[3], FieldValue::OptionalFloat(None), "{backend}");

        let alice = retriever
            .nearest_to(&[1.0, 0.0, 0.0, 0.0])
            .await
            .expect("nearest should match");
        assert_eq!(
            alice.record.values()[3],
            FieldValue::OptionalFloat(Some(0.85)),
            "{backend}"
        );
    }
}

#[tokio::test]
async fn failed_batch_leaves_count_unchanged() {
    for backend in BACKENDS {
        let dir = TempDir::new().expect("should create temp dir");
        let store = open(backend, &dir).await;

        store
            .load(&[embedded(["1", "Alice", "30.5", ""], vec![1.0, 0.0, 0.0, 0.0])])
            .await
            .expect("first batch should load");
        let before = store.count().await.expect("count should succeed");

        let result = store
            .load(&[
                embedded(["2", "Bob", "22.0", ""], vec![0.0, 1.0, 0.0, 0.0]),
                embedded(["3", "Carol", "18.0", ""], vec![0.0, 0.0, 1.0, 0.0]),
                embedded(["4", "Dave", "9.0", ""], vec![0.0, 0.0, 1.0]),
            ])
            .await;

        assert!(
            matches!(result, Err(LoadError::Entry { index: 2, .. })),
            "{backend}: {result:?}"
        );
        assert_eq!(store.count().await.expect("count should succeed"), before);
        assert!(
            store
                .find_by_key("Carol")
                .await
                .expect("lookup should succeed")
                .is_empty()
        );
    }
}

#[tokio::test]
async fn exact_key_lookup() {
    for backend in BACKENDS {
        let dir = TempDir::new().expect("should create temp dir");
        let store = open(backend, &dir).await;
        let embedder: Arc<dyn Embedder> = Arc::new(StubEmbedder);

        Ingestor::new(Arc::clone(&embedder), Arc::clone(&store))
            .ingest(&table(&[
                ["1", "Alice", "30.5", ".850"],
                ["2", "Alice", "12.0", ""],
                ["3", "Bob", "22.0", ".700"],
                ["4", "Alice", "18.5", ".910"],
            ]))
            .await
            .expect("ingestion should succeed");

        let retriever = Retriever::new(embedder, Arc::clone(&store));
        let alice = retriever
            .by_exact_key("Alice")
            .await
            .expect("lookup should succeed");
        let ranks: Vec<&FieldValue> = alice.iter().map(|r| &r.values()[0]).collect();
        assert_eq!(
            ranks,
            vec![
                &FieldValue::Integer(1),
                &FieldValue::Integer(2),
                &FieldValue::Integer(4)
            ],
            "{backend}"
        );

        let nobody: Vec<Record> = retriever
            .by_exact_key("Zed")
            .await
            .expect("lookup should succeed");
        assert!(nobody.is_empty(), "{backend}");
    }
}

#[tokio::test]
async fn empty_store_reports_no_match() {
    for backend in BACKENDS {
        let dir = TempDir::new().expect("should create temp dir");
        let store = open(backend, &dir).await;
        let retriever = Retriever::new(Arc::new(StubEmbedder), store);

        let result = retriever.query("who scored the most").await;
        assert!(matches!(result, Err(ChatbotError::NoMatch)), "{backend}");
    }
}

#[tokio::test]
async fn ties_go_to_the_earliest_entry() {
    for backend in BACKENDS {
        let dir = TempDir::new().expect("should create temp dir");
        let store = open(backend, &dir).await;

        store
            .load(&[
                embedded(["1", "Alice", "30.5", ""], vec![1.0, 0.0, 0.0, 0.0]),
                embedded(["2", "Bob", "22.0", ""], vec![0.0, 1.0, 0.0, 0.0]),
            ])
            .await
            .expect("batch should load");
        store
            .load(&[embedded(["3", "Carol", "18.0", ""], vec![0.0, 0.0, 1.0, 0.0])])
            .await
            .expect("batch should load");

        let retriever = Retriever::new(Arc::new(StubEmbedder), Arc::clone(&store));
        let nearest = retriever
            .nearest_to(&[0.0, 0.0, 0.0, 0.0])
            .await
            .expect("nearest should match");
        assert_eq!(nearest.record.key(store.schema()), Some("Alice"), "{backend}");
    }
}

#[tokio::test]
async fn bad_row_is_reported_with_its_index() {
    for backend in BACKENDS {
        let dir = TempDir::new().expect("should create temp dir");
        let store = open(backend, &dir).await;

        let result = Ingestor::new(Arc::new(StubEmbedder), Arc::clone(&store))
            .ingest(&table(&[
                ["1", "Alice", "30.5", ".850"],
                ["2", "Bob", "twenty", ""],
            ]))
            .await;

        assert!(
            matches!(result, Err(ChatbotError::Record { row: 1, .. })),
            "{backend}"
        );
        assert_eq!(store.count().await.expect("count should succeed"), 0);
    }
}

#[tokio::test]
async fn single_entry_answers_every_question() {
    for backend in BACKENDS {
        let dir = TempDir::new().expect("should create temp dir");
        let store = open(backend, &dir).await;
        let only = embedded(["7", "Alice", "30.5", ""], vec![1.0, 0.0, 0.0, 0.0]);
        store
            .load(std::slice::from_ref(&only))
            .await
            .expect("entry should load");

        let retriever = Retriever::new(Arc::new(StubEmbedder), Arc::clone(&store));
        for question in ["tell me about Bob", "who is Carol?", "anything at all"] {
            let record = retriever.query(question).await.expect("query should match");
            assert_eq!(record, only.record, "{backend}: {question}");
        }

        let opposite = retriever
            .nearest_to(&[-1.0, 0.0, 0.0, 0.0])
            .await
            .expect("nearest should match");
        assert_eq!(opposite.record, only.record, "{backend}");
        assert_eq!(
            opposite.record.values()[3],
            FieldValue::OptionalFloat(None),
            "{backend}"
        );
    }
}
