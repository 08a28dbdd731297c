//! Aevo grid trading bot - entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Aevo grid trading bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via AEVO_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any TLS connection is opened.
    aevo_ws::init_crypto();

    let args = Args::parse();

    // Secrets normally come from .env during development.
    let dotenv = dotenvy::dotenv();

    aevo_telemetry::init_logging()?;

    info!("Starting Aevo grid bot v{}", env!("CARGO_PKG_VERSION"));
    match dotenv {
        Ok(path) => info!(path = %path.display(), "Loaded environment file"),
        Err(_) => info!("No .env file found, using process environment"),
    }

    // CLI arg > AEVO_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("AEVO_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = aevo_bot::AppConfig::from_file(&config_path)?;
    info!(env = %config.env, asset = %config.grid.asset, "Configuration loaded");

    let app = aevo_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
