//! Logging setup

use tracing_subscriber::EnvFilter;

/// Default level when neither `--verbose`, `RUST_LOG` nor the config sets one
const DEFAULT_LEVEL: &str = "warn";

/// Pick the log level from the verbosity flag and configured level
pub fn level_for(verbose: u8, configured: Option<&str>) -> String {
    match verbose {
        0 => configured.unwrap_or(DEFAULT_LEVEL).to_string(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Install the stderr subscriber
///
/// `RUST_LOG` takes precedence over `level`.
pub fn init(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("tablekv_core={},tablekv_cli={}", level, level))
    });

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
