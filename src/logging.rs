use crate::{Error, Result, config::Config};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

/// Validates that a log level string is valid
pub fn validate_log_level(level: &str) -> Result<()> {
    level.parse::<LevelFilter>().map_err(|_| {
        Error::config(format!(
            "Invalid log level: '{}'. Valid levels: error, warn, info, debug, trace",
            level
        ))
    })?;
    Ok(())
}

/// Resolves the effective filter directive: `RUST_LOG` wins over the
/// configured level.
pub fn resolve_level(config: &Config, rust_log: Option<String>) -> String {
    rust_log.unwrap_or_else(|| config.server.logs.level.clone())
}

/// Installs the global subscriber. JSON lines in normal operation,
/// compact human-readable lines when `app.debug` is set.
pub fn init(config: &Config) -> Result<String> {
    let level = resolve_level(config, std::env::var("RUST_LOG").ok());

    // RUST_LOG may carry full directives ("cimba=debug,tower_http=info"),
    // only a bare configured level is checked strictly.
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            validate_log_level(&level)?;
            EnvFilter::new(&level)
        }
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if config.app.debug {
        builder.compact().try_init()
    } else {
        builder.json().try_init()
    };
    installed.map_err(|e| Error::config(format!("Failed to install log subscriber: {e}")))?;

    Ok(level)
}
