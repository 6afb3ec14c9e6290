//! Cinema booking server
//!
//! Runs the booking pipeline against `PostgreSQL`:
//! - applies migrations
//! - exports Prometheus metrics
//! - sweeps expired seat holds until Ctrl+C or SIGTERM
//!
//! # Usage
//!
//! ```bash
//! TICKET_SIGNING_SECRET=... DATABASE_URL=postgres://... cargo run --bin cinema-server
//! ```

use cinema_booking::{BookingApp, Config, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_new(&config.server.log_level)
                .unwrap_or_else(|_| "info,cinema_booking=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(booking = ?config.booking, "Configuration loaded");

    metrics::install_exporter(config.server.metrics_addr()?)?;

    let app = BookingApp::new(config).await?;
    tracing::info!("Application initialized");

    app.run().await?;
    Ok(())
}
