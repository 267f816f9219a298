// Configuration management module
// TOML settings for Ollama, the record store, ingestion and the record schema

pub mod interactive;
pub mod settings;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    ColumnConfig, Config, ConfigError, IngestConfig, OllamaConfig, SchemaConfig, StoreBackend,
    StoreConfig,
};
