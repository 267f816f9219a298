use super::*;
use crate::database::{DistanceMetric, EmbeddedRecord, SqliteStore};
use crate::embeddings::EmbeddingError;
use crate::record::FieldValue;
use crate::record::schema::{FieldKind, Schema};
use async_trait::async_trait;
use tempfile::TempDir;

struct FixedEmbedder(std::result::Result<Vec<f32>, u16>);

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _prompt: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        self.0.clone().map_err(EmbeddingError::Status)
    }
}

fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::from_columns(
            "Test Stats",
            &[
                ("name", FieldKind::Text),
                ("team", FieldKind::Text),
                ("ft_pct", FieldKind::OptionalFloat),
            ],
            "name",
        )
        .expect("test schema should be valid"),
    )
}

fn entry(name: &str, team: &str, ft_pct: Option<f64>, embedding: Vec<f32>) -> EmbeddedRecord {
    EmbeddedRecord {
        record: Record::from_values(vec![
            FieldValue::Text(name.to_string()),
            FieldValue::Text(team.to_string()),
            FieldValue::OptionalFloat(ft_pct),
        ]),
        embedding,
    }
}

async fn store(dir: &TempDir) -> Arc<dyn RecordStore> {
    Arc::new(
        SqliteStore::open(
            &dir.path().join("records.db"),
            "records",
            schema(),
            2,
            DistanceMetric::Euclidean,
        )
        .await
        .expect("store should open"),
    )
}

#[tokio::test]
async fn empty_store_has_no_match() {
    let dir = TempDir::new().expect("should create temp dir");
    let retriever = Retriever::new(Arc::new(FixedEmbedder(Ok(vec![1.0, 0.0]))), store(&dir).await);

    assert!(matches!(
        retriever.query("who scored the most").await,
        Err(ChatbotError::NoMatch)
    ));
    assert!(
        retriever
            .by_exact_key("Alice")
            .await
            .expect("lookup should succeed")
            .is_empty()
    );
}

#[tokio::test]
async fn embedding_failure_is_not_no_match() {
    let dir = TempDir::new().expect("should create temp dir");
    let store = store(&dir).await;
    store
        .load(&[entry("Alice", "LAL", None, vec![1.0, 0.0])])
        .await
        .expect("load should succeed");

    let retriever = Retriever::new(Arc::new(FixedEmbedder(Err(503))), store);
    assert!(matches!(
        retriever.query("anything").await,
        Err(ChatbotError::EmbeddingService(EmbeddingError::Status(503)))
    ));
}

#[tokio::test]
async fn query_returns_closest_record() {
    let dir = TempDir::new().expect("should create temp dir");
    let store = store(&dir).await;
    store
        .load(&[
            entry("Alice", "LAL", Some(0.9), vec![1.0, 0.0]),
            entry("Bob", "BOS", None, vec![0.0, 1.0]),
        ])
        .await
        .expect("load should succeed");

    let retriever = Retriever::new(Arc::new(FixedEmbedder(Ok(vec![0.1, 0.8]))), store);
    let record = retriever.query("who plays for Boston").await.expect("query should match");

    assert_eq!(record.values()[0], FieldValue::Text("Bob".to_string()));
    assert!(record.values()[2].is_absent());
}

#[tokio::test]
async fn equidistant_entries_return_the_earliest() {
    let dir = TempDir::new().expect("should create temp dir");
    let store = store(&dir).await;
    store
        .load(&[
            entry("First", "LAL", None, vec![1.0, 0.0]),
            entry("Second", "BOS", None, vec![0.0, 1.0]),
        ])
        .await
        .expect("load should succeed");

    let retriever = Retriever::new(Arc::new(FixedEmbedder(Ok(vec![0.5, 0.5]))), store);
    for _ in 0..3 {
        let neighbor = retriever
            .nearest_to(&[0.5, 0.5])
            .await
            .expect("query should match");
        assert_eq!(neighbor.record.values()[0], FieldValue::Text("First".to_string()));
    }
}

#[tokio::test]
async fn question_vector_dimension_is_checked() {
    let dir = TempDir::new().expect("should create temp dir");
    let retriever = Retriever::new(
        Arc::new(FixedEmbedder(Ok(vec![1.0, 0.0, 0.0]))),
        store(&dir).await,
    );

    assert!(matches!(
        retriever.query("anything").await,
        Err(ChatbotError::Store(StoreError::DimensionMismatch {
            expected: 2,
            actual: 3
        }))
    ));
}

#[tokio::test]
async fn exact_key_returns_every_stint() {
    let dir = TempDir::new().expect("should create temp dir");
    let store = store(&dir).await;
    store
        .load(&[
            entry("Alice", "TOT", Some(0.8), vec![1.0, 0.0]),
            entry("Alice", "LAL", None, vec![0.9, 0.1]),
            entry("Bob", "BOS", None, vec![0.0, 1.0]),
            entry("Alice", "BOS", Some(0.7), vec![0.8, 0.2]),
        ])
        .await
        .expect("load should succeed");

    let retriever = Retriever::new(Arc::new(FixedEmbedder(Ok(vec![0.0, 0.0]))), store);
    let stints = retriever.by_exact_key("Alice").await.expect("lookup should succeed");

    let teams: Vec<_> = stints.iter().map(|r| r.values()[1].to_string()).collect();
    assert_eq!(teams, vec!["TOT", "LAL", "BOS"]);
    assert_eq!(stints[1].values()[2], FieldValue::OptionalFloat(None));
    assert_eq!(stints[2].values()[2], FieldValue::OptionalFloat(Some(0.7)));

    assert!(
        retriever
            .by_exact_key("alice")
            .await
            .expect("lookup should succeed")
            .is_empty()
    );
}
