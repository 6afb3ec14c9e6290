//! Background sweeper that deletes lapsed seat holds.
//!
//! Each tick deletes every Reserved row whose expiry is strictly before the
//! current time. Sold rows and holds with no expiry are never touched. A
//! failed tick is logged and counted; the next tick runs as scheduled.

use crate::error::Result;
use crate::metrics;
use cinema_core::environment::Clock;
use cinema_core::store::{BookingStore, BookingTransaction};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Periodically removes expired holds.
pub struct ExpiredReservationSweeper<S, C> {
    store: Arc<S>,
    clock: Arc<C>,
    interval: Duration,
}

impl<S, C> ExpiredReservationSweeper<S, C>
where
    S: BookingStore + 'static,
    C: Clock + 'static,
{
    /// Create a sweeper ticking every `interval`
    #[must_use]
    pub const fn new(store: Arc<S>, clock: Arc<C>, interval: Duration) -> Self {
        Self {
            store,
            clock,
            interval,
        }
    }

    /// Delete every hold expired as of now, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BookingError::Store`] if the delete or commit fails;
    /// nothing is deleted in that case.
    pub async fn sweep_once(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let deleted = tx.delete_expired_reservations(now).await?;
        tx.commit().await?;

        if deleted > 0 {
            info!(deleted, "Expired reservations swept");
        } else {
            debug!("No expired reservations");
        }
        metrics::record_reservations_swept(deleted);
        Ok(deleted)
    }

    /// Run the sweep loop on a background task until `shutdown` fires.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.interval, "Reservation sweeper started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Reservation sweeper received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            error!(error = %e, "Reservation sweep failed");
                            metrics::record_sweeper_failure();
                        }
                    }
                }
            }

            info!("Reservation sweeper stopped");
        })
    }
}
