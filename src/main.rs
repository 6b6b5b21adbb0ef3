use anyhow::Result;
use cimba::{config, logging, server};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration comes first so it can pick the log level.
    let config = match config::load().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let log_level = match logging::init(&config) {
        Ok(level) => level,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting {} with log level: {}",
        config.app.name, log_level
    );
    info!("Configuration loaded successfully");

    server::run(config).await?;

    Ok(())
}
