//! # Cinema Core
//!
//! Core types and contracts for the cinema booking pipeline.
//!
//! This crate holds everything the booking services share but that performs no
//! I/O of its own:
//!
//! - **Types**: identifiers, money, statuses and the entities that flow through
//!   the reservation → order → payment → ticket pipeline
//! - **Seat layout**: the fixed 16×16 hall grid and its 64-byte bitmap codec
//! - **Store**: the storage contract (`BookingStore` / `BookingTransaction`)
//!   implemented by `cinema-postgres` for production and `cinema-testing` for tests
//! - **Environment**: injected dependencies such as the [`environment::Clock`]
//!
//! ## Architecture Principles
//!
//! - Closed enums with explicit storage codes, never declaration order
//! - Every storage mutation happens inside a transaction guard
//! - Time is injected, never read from the system inside domain logic
//!
//! ## Example
//!
//! ```
//! use cinema_core::seat_layout::{CellKind, SeatLayout};
//!
//! let mut layout = SeatLayout::new();
//! layout.set(0, 3, CellKind::Vip).unwrap();
//! assert_eq!(layout.get(0, 3).unwrap(), CellKind::Vip);
//! assert_eq!(layout.to_bytes().len(), 64);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod seat_layout;
pub mod store;
pub mod types;

pub use seat_layout::{CellKind, LayoutError, SeatLayout};
pub use store::{BookingStore, BookingTransaction, StoreError};
pub use types::*;

/// Environment module - Dependency injection traits
///
/// All time-dependent decisions (hold freshness, expiry sweeps, scan stamps)
/// read the current instant through [`environment::Clock`] so that tests can
/// pin it.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use cinema_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
