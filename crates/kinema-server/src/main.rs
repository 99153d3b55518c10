//! # Kinema Server
//!
//! Streaming pose-landmark ingestion and live fan-out server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! kinema
//!
//! # Run with a config file (searched at ./kinema.toml,
//! # /etc/kinema/kinema.toml, ~/.config/kinema/kinema.toml)
//! kinema
//!
//! # Run with environment variables
//! KINEMA_PORT=8080 KINEMA_HOST=0.0.0.0 kinema
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kinema_server=debug,kinema_core=debug,kinema_store=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Kinema server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
