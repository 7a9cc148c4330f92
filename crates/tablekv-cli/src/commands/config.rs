//! Config command handlers

use std::path::Path;

use anyhow::Result;

use tablekv_core::{sanitize_table_name, Config};

use crate::output::{Output, OutputFormat};

/// Show the effective configuration
pub fn show(config: &Config, config_path: &Path, output: &Output) -> Result<()> {
    let table = sanitize_table_name(&config.storage_collection_name);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "storage_connection_string": config.storage_connection_string,
                    "storage_collection_name": config.storage_collection_name,
                    "table_name": table,
                    "log_level": config.log_level,
                    "config_file": config_path.display().to_string()
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", table);
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  storage_connection_string: {}", config.storage_connection_string);
            println!("  storage_collection_name:   {}", config.storage_collection_name);
            println!("  table name:                {}", table);
            println!(
                "  log_level:                 {}",
                config.log_level.as_deref().unwrap_or("(not set)")
            );
            println!();
            println!("Config file: {}", config_path.display());
        }
    }

    Ok(())
}
