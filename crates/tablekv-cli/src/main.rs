//! tablekv CLI
//!
//! Command-line interface for tablekv - key-value records over table storage.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use tablekv_core::{Config, KeyValueContainer};

mod commands;
mod logging;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "tablekv")]
#[command(about = "tablekv - Partitioned key-value records over table storage")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new record (fails if the key exists)
    #[command(alias = "add")]
    Create {
        /// Collection (partition) id
        collection: String,
        /// Record key
        key: String,
        /// Payload, or '-' to read from stdin
        data: String,
    },
    /// Show a record
    Get {
        /// Collection (partition) id
        collection: String,
        /// Record key
        key: String,
    },
    /// List all records of a collection
    #[command(alias = "ls")]
    List {
        /// Collection (partition) id
        collection: String,
    },
    /// Insert or replace a record
    #[command(alias = "put")]
    Upsert {
        /// Collection (partition) id
        collection: String,
        /// Record key
        key: String,
        /// Payload, or '-' to read from stdin
        data: String,
        /// Only replace if the stored record still has this ETag
        #[arg(long)]
        etag: Option<String>,
    },
    /// Delete a record
    #[command(alias = "rm")]
    Delete {
        /// Collection (partition) id
        collection: String,
        /// Record key
        key: String,
    },
    /// Check that the storage backend is reachable
    Ping,
    /// Show configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    let config_path = cli.config.clone().unwrap_or_else(Config::config_file_path);
    let config = Config::load_from_path(&config_path).context("Failed to load configuration")?;

    logging::init(&logging::level_for(cli.verbose, config.log_level.as_deref()));
    debug!(config_file = %config_path.display(), "Loaded configuration");

    // Commands that don't need the container
    if let Commands::Config { command } = &cli.command {
        return match command {
            Some(ConfigCommands::Show) | None => commands::config::show(&config, &config_path, &output),
        };
    }

    let container = KeyValueContainer::from_config(&config.services())
        .context("Failed to set up storage")?;

    match cli.command {
        Commands::Create {
            collection,
            key,
            data,
        } => {
            let data = commands::record::read_data(data)?;
            commands::record::create(&container, collection, key, data, &output).await
        }
        Commands::Get { collection, key } => {
            commands::record::get(&container, collection, key, &output).await
        }
        Commands::List { collection } => {
            commands::record::list(&container, collection, &output).await
        }
        Commands::Upsert {
            collection,
            key,
            data,
            etag,
        } => {
            let data = commands::record::read_data(data)?;
            commands::record::upsert(&container, collection, key, data, etag, &output).await
        }
        Commands::Delete { collection, key } => {
            commands::record::delete(&container, collection, key, &output).await
        }
        Commands::Ping => commands::status::ping(&container, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_upsert_with_etag() {
        let cli = Cli::try_parse_from([
            "tablekv", "--json", "upsert", "devices", "d1", "{}", "--etag", "W/\"1\"",
        ])
        .unwrap();

        assert!(cli.json);
        match cli.command {
            Commands::Upsert {
                collection,
                key,
                data,
                etag,
            } => {
                assert_eq!(collection, "devices");
                assert_eq!(key, "d1");
                assert_eq!(data, "{}");
                assert_eq!(etag.as_deref(), Some("W/\"1\""));
            }
            _ => panic!("expected upsert"),
        }
    }

    #[test]
    fn test_parse_aliases_and_globals() {
        let cli = Cli::try_parse_from(["tablekv", "ls", "devices", "-vv", "-q"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(matches!(cli.command, Commands::List { .. }));

        let cli = Cli::try_parse_from(["tablekv", "rm", "devices", "d1"]).unwrap();
        assert!(matches!(cli.command, Commands::Delete { .. }));
    }

    #[test]
    fn test_parse_requires_command() {
        assert!(Cli::try_parse_from(["tablekv"]).is_err());
        assert!(Cli::try_parse_from(["tablekv", "create", "devices"]).is_err());
    }
}
