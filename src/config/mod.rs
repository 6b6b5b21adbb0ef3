mod types;

pub use types::*;

use crate::{Error, Result};
use std::env;
use std::str::FromStr;
use tracing::debug;

/// Loads the configuration file named by `CONFIG_PATH` (default
/// `config.yaml`), then applies environment overrides. A missing file
/// yields the built-in defaults.
pub async fn load() -> Result<Config> {
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

    debug!("Loading configuration from: {}", config_path);

    let mut config = match tokio::fs::read_to_string(&config_path).await {
        Ok(config_str) => parse(&config_str)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No configuration file at {}, using defaults", config_path);
            Config::default()
        }
        Err(e) => return Err(e.into()),
    };

    apply_env_overrides(&mut config, |key| env::var(key).ok())?;
    Ok(config)
}

pub fn parse(config_str: &str) -> Result<Config> {
    // An empty document deserializes to unit, not to an empty mapping.
    if config_str.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(config_str)?)
}

/// Overrides file values with environment variables. `lookup` is
/// injected so tests don't have to touch the process environment.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(name) = lookup("APP_NAME") {
        config.app.name = name;
    }
    if let Some(debug) = lookup("DEBUG") {
        config.app.debug = parse_bool("DEBUG", &debug)?;
    }
    if let Some(level) = lookup("LOG_LEVEL") {
        config.server.logs.level = level.to_lowercase();
    }
    if let Some(host) = lookup("HOST") {
        config.server.host = host;
    }
    if let Some(port) = lookup("PORT") {
        config.server.port = parse_value("PORT", &port)?;
    }
    if let Some(api_key) = lookup("OPENAI_API_KEY") {
        config.llm.api_key = api_key;
    }
    if let Some(base_url) = lookup("OPENAI_BASE_URL") {
        config.llm.base_url = base_url;
    }
    if let Some(model) = lookup("LLM_MODEL") {
        config.llm.model = model;
    }
    if let Some(dir) = lookup("SESSIONS_DIR") {
        config.sessions.dir = dir;
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::config(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("{key} has an invalid value: '{value}'")))
}
