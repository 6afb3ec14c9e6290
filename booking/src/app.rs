//! Application wiring and process lifecycle.
//!
//! [`BookingServices`] bundles the four components of the pipeline over one
//! shared store and clock. [`BookingApp`] builds them on `PostgreSQL`, runs
//! the hold sweeper and coordinates graceful shutdown.

use crate::config::{BookingConfig, Config, ConfigError};
use crate::error::BookingError;
use crate::ledger::ReservationLedger;
use crate::orders::OrderCoordinator;
use crate::payments::PaymentCoordinator;
use crate::sweeper::ExpiredReservationSweeper;
use crate::tickets::{TicketIntegrityService, TicketSigner};
use cinema_core::environment::{Clock, SystemClock};
use cinema_core::store::{BookingStore, StoreError};
use cinema_postgres::PostgresBookingStore;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Startup and lifecycle failures.
#[derive(Error, Debug)]
pub enum AppError {
    /// Database pool could not be created
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Storage setup failed
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A booking component refused its settings
    #[error("Booking error: {0}")]
    Booking(#[from] BookingError),
}

/// The booking pipeline over one store and clock.
pub struct BookingServices<S, C> {
    /// Seat holds
    pub ledger: ReservationLedger<S, C>,
    /// Orders
    pub orders: OrderCoordinator<S, C>,
    /// Payments
    pub payments: PaymentCoordinator<S, C>,
    /// Scan codes and door checks
    pub tickets: TicketIntegrityService<S, C>,
    store: Arc<S>,
    clock: Arc<C>,
    sweeper_interval: Duration,
}

impl<S, C> BookingServices<S, C>
where
    S: BookingStore + 'static,
    C: Clock + 'static,
{
    /// Wire every component to `store` and `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] for an unusable hold duration or
    /// [`AppError::Booking`] for an unusable signing secret.
    pub fn new(store: Arc<S>, clock: Arc<C>, config: &BookingConfig) -> Result<Self, AppError> {
        let signer = TicketSigner::new(&config.ticket_signing_secret)?;
        let hold_duration = config.hold_duration()?;

        Ok(Self {
            ledger: ReservationLedger::new(Arc::clone(&store), Arc::clone(&clock), hold_duration),
            orders: OrderCoordinator::new(Arc::clone(&store), Arc::clone(&clock)),
            payments: PaymentCoordinator::new(Arc::clone(&store), Arc::clone(&clock)),
            tickets: TicketIntegrityService::new(Arc::clone(&store), Arc::clone(&clock), signer),
            store,
            clock,
            sweeper_interval: config.sweeper_interval(),
        })
    }

    /// A sweeper over the same store and clock
    #[must_use]
    pub fn sweeper(&self) -> ExpiredReservationSweeper<S, C> {
        ExpiredReservationSweeper::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.sweeper_interval,
        )
    }
}

/// Production application on `PostgreSQL`.
pub struct BookingApp {
    services: BookingServices<PostgresBookingStore, SystemClock>,
    shutdown_timeout: Duration,
}

impl BookingApp {
    /// Connect, migrate and wire the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] if the configuration is invalid, the database is
    /// unreachable or a migration fails.
    pub async fn new(config: Config) -> Result<Self, AppError> {
        config.validate()?;

        info!(
            max_connections = config.postgres.max_connections,
            "Connecting to PostgreSQL"
        );
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres.max_connections)
            .min_connections(config.postgres.min_connections)
            .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
            .connect(&config.postgres.url)
            .await?;

        let store = PostgresBookingStore::from_pool(pool);
        store.migrate().await?;
        info!("Migrations applied");

        let services = BookingServices::new(Arc::new(store), Arc::new(SystemClock), &config.booking)?;

        Ok(Self {
            services,
            shutdown_timeout: Duration::from_secs(config.server.shutdown_timeout),
        })
    }

    /// The wired pipeline
    #[must_use]
    pub const fn services(&self) -> &BookingServices<PostgresBookingStore, SystemClock> {
        &self.services
    }

    /// Run the sweeper until Ctrl+C or SIGTERM, then shut down gracefully.
    ///
    /// # Errors
    ///
    /// Does not fail once started.
    pub async fn run(self) -> Result<(), AppError> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let sweeper = self.services.sweeper().spawn(shutdown_rx);
        info!("Booking service running");

        shutdown_signal().await;

        info!("Initiating graceful shutdown...");
        let _ = shutdown_tx.send(());

        match tokio::time::timeout(self.shutdown_timeout, sweeper).await {
            Ok(Ok(())) => info!("Reservation sweeper stopped gracefully"),
            Ok(Err(e)) => warn!(error = %e, "Reservation sweeper task failed"),
            Err(_) => warn!("Reservation sweeper shutdown timed out"),
        }

        info!("Graceful shutdown complete");
        Ok(())
    }
}

/// Wait for Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed the failure is logged and that signal is
/// ignored; the other still works.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
