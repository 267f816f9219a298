use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nba_chatbot::commands::{ask, ingest_file, lookup, query_question, show_status};
use nba_chatbot::config::{Config, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nba-chatbot")]
#[command(about = "Embed per-game player statistics and answer questions about them")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection, store and schema settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Embed every row of a CSV file and load it into the store
    Ingest {
        /// CSV file with a header row
        file: PathBuf,
    },
    /// Print the stored record closest to a question
    Query {
        question: String,
    },
    /// Print every stored record whose key column matches exactly
    Lookup {
        /// Key value, e.g. a player name
        key: String,
    },
    /// Answer a question using the closest record and the generation model
    Ask {
        question: String,
    },
    /// Show store contents and Ollama health
    Status,
}

fn load_config() -> Result<Config> {
    Config::load_default().context("Failed to load configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Ingest { file } => {
            ingest_file(&load_config()?, &file).await?;
        }
        Commands::Query { question } => {
            query_question(&load_config()?, &question).await?;
        }
        Commands::Lookup { key } => {
            lookup(&load_config()?, &key).await?;
        }
        Commands::Ask { question } => {
            ask(&load_config()?, &question).await?;
        }
        Commands::Status => {
            show_status(&load_config()?).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn status_command() {
        let cli = Cli::try_parse_from(["nba-chatbot", "status"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Status));
        }
    }

    #[test]
    fn ingest_command_with_file() {
        let cli = Cli::try_parse_from(["nba-chatbot", "ingest", "data/player_per_game.csv"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ingest { file } = parsed.command {
                assert_eq!(file, PathBuf::from("data/player_per_game.csv"));
            }
        }
    }

    #[test]
    fn ingest_requires_file() {
        let cli = Cli::try_parse_from(["nba-chatbot", "ingest"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        }
    }

    #[test]
    fn query_and_ask_take_a_question() {
        let cli = Cli::try_parse_from(["nba-chatbot", "query", "who scored the most"]);
        if let Ok(parsed) = cli {
            if let Commands::Query { question } = parsed.command {
                assert_eq!(question, "who scored the most");
            }
        } else {
            panic!("query should parse");
        }

        let cli = Cli::try_parse_from(["nba-chatbot", "ask", "who had the most assists?"]);
        assert!(matches!(
            cli.map(|parsed| parsed.command),
            Ok(Commands::Ask { .. })
        ));
    }

    #[test]
    fn lookup_command() {
        let cli = Cli::try_parse_from(["nba-chatbot", "lookup", "Precious Achiuwa"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Lookup { key } = parsed.command {
                assert_eq!(key, "Precious Achiuwa");
            }
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["nba-chatbot", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["nba-chatbot", "serve"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["nba-chatbot", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
