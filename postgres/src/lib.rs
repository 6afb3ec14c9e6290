//! `PostgreSQL` storage for the cinema booking pipeline.
//!
//! This crate implements the [`BookingStore`] / [`BookingTransaction`] contract
//! from `cinema-core` on top of sqlx:
//!
//! - Each [`BookingTransaction`] is a real database transaction
//! - `(session_id, seat_id)` uniqueness is a table constraint
//! - Status and method columns hold the fixed storage codes of `cinema-core`
//! - Hall layouts are stored as their 64-byte packed form
//!
//! # Example
//!
//! ```no_run
//! use cinema_postgres::PostgresBookingStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresBookingStore::connect("postgres://localhost/cinema").await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;
mod transaction;

pub use transaction::PostgresTransaction;

use cinema_core::seat_layout::SeatLayout;
use cinema_core::store::{BookingStore, StoreError};
use sqlx::PgPool;

/// Production [`BookingStore`] backed by a `PostgreSQL` connection pool.
#[derive(Clone, Debug)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Connect to `PostgreSQL` with a default pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(rows::database)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the booking tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Store the seat grid of a hall, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the write fails.
    pub async fn save_hall_layout(&self, hall_name: &str, layout: &SeatLayout) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO halls (name, layout) VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET layout = EXCLUDED.layout
            ",
        )
        .bind(hall_name)
        .bind(layout.as_bytes().as_slice())
        .execute(&self.pool)
        .await
        .map_err(rows::database)?;
        Ok(())
    }

    /// Load the seat grid of a hall.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails, or
    /// [`StoreError::Corrupt`] if the stored blob is not a valid layout.
    pub async fn hall_layout(&self, hall_name: &str) -> Result<Option<SeatLayout>, StoreError> {
        let blob: Option<(Vec<u8>,)> = sqlx::query_as("SELECT layout FROM halls WHERE name = $1")
            .bind(hall_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(rows::database)?;

        blob.map(|(bytes,)| {
            SeatLayout::from_bytes(&bytes)
                .map_err(|e| StoreError::Corrupt(format!("hall {hall_name}: {e}")))
        })
        .transpose()
    }
}

impl BookingStore for PostgresBookingStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction, StoreError> {
        let tx = self.pool.begin().await.map_err(rows::database)?;
        Ok(PostgresTransaction::new(tx))
    }
}
