#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! CLI commands against a mocked Ollama server and a temporary SQLite store
use nba_chatbot::commands::{ask, ingest_file, lookup, query_question};
use nba_chatbot::config::{ColumnConfig, Config, SchemaConfig, StoreBackend};
use nba_chatbot::record::FieldValue;
use nba_chatbot::record::schema::FieldKind;
use serde_json::json;
use std::io::Write;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIMENSION: usize = 64;

fn axis(i: usize) -> Vec<f32> {
    let mut vector = vec![0.0; DIMENSION];
    vector[i] = 1.0;
    vector
}

async fn mock_ollama() -> MockServer {
    let server = MockServer::start().await;

    for (name, i) in [("Alice", 0), ("Bob", 1)] {
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .and(body_string_contains(name))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embedding": axis(i) })))
            .with_priority(1)
            .mount(&server)
            .await;
    }

    let mut question = axis(1);
    question[0] = 0.2;
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embedding": question })))
        .with_priority(10)
        .mount(&server)
        .await;

    server
}

fn test_config(dir: &TempDir, server: &MockServer) -> Config {
    let mut config = Config {
        base_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    config.ollama.host = "127.0.0.1".to_string();
    config.ollama.port = server.address().port();
    config.ollama.embedding_dimension = DIMENSION as u32;
    config.store.backend = StoreBackend::Sqlite;
    config.schema = SchemaConfig {
        label: "Scores".to_string(),
        key: "name".to_string(),
        fields: [
            ("rank", FieldKind::Integer),
            ("name", FieldKind::Text),
            ("points", FieldKind::Float),
            ("ft_pct", FieldKind::OptionalFloat),
        ]
        .into_iter()
        .map(|(column, kind)| ColumnConfig {
            column: column.to_string(),
            kind,
        })
        .collect(),
    };
    config.validate().expect("test config should be valid");
    config
}

fn write_csv(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("scores.csv");
    let mut file = std::fs::File::create(&path).expect("should create csv");
    writeln!(
        file,
        "Rk,Player,PTS,FT%,Player-additional\n1,Alice,30.5,.850,alicea01\n2,Bob,22.0,,bobb01"
    )
    .expect("should write csv");
    path
}

#[tokio::test(flavor = "multi_thread")]
async fn ingest_then_query_and_lookup() {
    let server = mock_ollama().await;
    let dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&dir, &server);

    let report = ingest_file(&config, &write_csv(&dir))
        .await
        .expect("ingest should succeed");
    assert_eq!(report.rows, 2);
    assert_eq!(report.dimension, DIMENSION);

    let record = query_question(&config, "who plays like Boston's guard?")
        .await
        .expect("query should succeed");
    assert_eq!(record.values()[1], FieldValue::Text("Bob".to_string()));
    assert_eq!(record.values()[3], FieldValue::OptionalFloat(None));

    let alice = lookup(&config, "Alice").await.expect("lookup should succeed");
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].values()[2], FieldValue::Float(30.5));
}

#[tokio::test(flavor = "multi_thread")]
async fn ask_sends_record_to_generation_model() {
    let server = mock_ollama().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_string_contains("Using these Scores statistics: rank: 2"))
        .and(body_string_contains("Respond to this prompt: how good is he?"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "Bob averages 22 points.",
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&dir, &server);
    ingest_file(&config, &write_csv(&dir))
        .await
        .expect("ingest should succeed");

    let answer = ask(&config, "how good is he?")
        .await
        .expect("ask should succeed");
    assert_eq!(answer, "Bob averages 22 points.");
}

#[tokio::test(flavor = "multi_thread")]
async fn query_before_ingest_is_no_match() {
    let server = mock_ollama().await;
    let dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&dir, &server);

    let error = query_question(&config, "anyone?")
        .await
        .expect_err("empty store should not match");
    assert!(matches!(
        error.downcast_ref::<nba_chatbot::ChatbotError>(),
        Some(nba_chatbot::ChatbotError::NoMatch)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_ollama_loads_nothing() {
    let server = mock_ollama().await;
    let dir = TempDir::new().expect("should create temp dir");
    let mut config = test_config(&dir, &server);
    config.ollama.port = 9;

    assert!(ingest_file(&config, &write_csv(&dir)).await.is_err());

    config.ollama.port = server.address().port();
    let nobody = lookup(&config, "Alice").await.expect("lookup should succeed");
    assert!(nobody.is_empty());
}
