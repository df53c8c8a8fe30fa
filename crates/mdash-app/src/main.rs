//! margin-dash - Entry Point
//!
//! Tracks leveraged positions and market offers for one wallet account.

use anyhow::Result;
use clap::Parser;
use mdash_core::StatusFilter;
use tracing::info;

/// Leveraged position and market offer tracker
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via MDASH_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Account address to track, overriding the config file
    #[arg(short, long)]
    account: Option<String>,

    /// Position status filter: open or closed
    #[arg(short, long)]
    status: Option<StatusFilter>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    mdash_telemetry::init_logging()?;

    info!("Starting margin-dash v{}", env!("CARGO_PKG_VERSION"));

    // Config path: CLI arg > MDASH_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("MDASH_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let mut config = mdash_app::AppConfig::from_file(&config_path)?;
    if let Some(account) = args.account {
        config.account.address = Some(account);
    }
    if let Some(status) = args.status {
        config.account.status = status;
    }
    config.validate()?;
    info!(base_url = %config.api.base_url, chain = %config.chain(), "Configuration loaded");

    let app = mdash_app::Application::new(config)?;
    app.run().await?;

    Ok(())
}
