//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde_json::Value;

use tablekv_core::{Record, StatusResult};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print a single record
    pub fn print_record(&self, record: &Record) {
        match self.format {
            OutputFormat::Human => {
                println!("Collection: {}", record.collection_id());
                println!("Key:        {}", record.key());
                println!("ETag:       {}", record.version());
                println!(
                    "Timestamp:  {}",
                    record.timestamp().format("%Y-%m-%d %H:%M:%S%.3f UTC")
                );
                println!();
                println!("{}", record.data());
            }
            OutputFormat::Json => print_json(serde_json::to_value(record)),
            OutputFormat::Quiet => {
                println!("{}", record.version());
            }
        }
    }

    /// Print the records of a collection
    pub fn print_records(&self, collection_id: &str, records: &[Record]) {
        match self.format {
            OutputFormat::Human => {
                if records.is_empty() {
                    println!("No records in '{}'.", collection_id);
                    return;
                }
                for record in records {
                    println!(
                        "{} | {} | {}",
                        truncate(record.key(), 30),
                        record.timestamp().format("%Y-%m-%d %H:%M"),
                        truncate_line(record.data(), 50)
                    );
                }
                println!("\n{} record(s)", records.len());
            }
            OutputFormat::Json => print_json(serde_json::to_value(records)),
            OutputFormat::Quiet => {
                for record in records {
                    println!("{}", record.key());
                }
            }
        }
    }

    /// Print a health check result
    pub fn print_status(&self, status: &StatusResult) {
        match self.format {
            OutputFormat::Human => {
                let label = if status.is_healthy { "healthy" } else { "unhealthy" };
                println!("Storage: {}", label);
                println!("  {}", status.message);
            }
            OutputFormat::Json => print_json(serde_json::to_value(status)),
            OutputFormat::Quiet => {
                println!("{}", status.is_healthy);
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json(value: serde_json::Result<Value>) {
    match value.and_then(|v| serde_json::to_string_pretty(&v)) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Failed to render JSON output: {}", e),
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        // Multi-byte characters are never split
        assert_eq!(truncate("ééééééééééé", 5), "éé...");
    }

    #[test]
    fn test_truncate_line() {
        assert_eq!(truncate_line("{\"a\":1}", 20), "{\"a\":1}");
        assert_eq!(truncate_line("line one\nline two", 20), "line one");
        assert_eq!(truncate_line("", 10), "");
    }
}
