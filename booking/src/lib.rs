//! # Cinema Booking
//!
//! The seat-reservation-to-payment pipeline of a cinema.
//!
//! A customer holds seats for a screening, turns the holds into an order and
//! pays for it. Payment is the atomic step: the payment row, the Paid order
//! and the Sold seats are committed together or not at all. Every ticket of
//! a paid order gets a signed scan code that door staff check once.
//!
//! # Components
//!
//! - [`ledger`]: seat holds and the rules a set of holds must satisfy
//! - [`orders`]: Pending orders from validated holds, and cancellation
//! - [`payments`]: the atomic payment unit
//! - [`tickets`]: HMAC scan codes and the door check
//! - [`sweeper`]: background deletion of lapsed holds
//!
//! Each component is generic over a [`cinema_core::store::BookingStore`] and
//! a [`cinema_core::environment::Clock`]. Production wires them to
//! `PostgreSQL` and the system clock through [`BookingApp`]; tests use the
//! in-memory store from `cinema-testing`.
//!
//! # Lifecycle
//!
//! ```text
//! place_hold ──► Reserved ──create_order──► Order(Pending)
//!                   │                           │
//!              (expiry) sweeper          process_payment
//!                   │                           │
//!                   ▼                           ▼
//!                deleted            Order(Paid) + Reserved→Sold
//!                                               │
//!                                     issue codes ─► scan at door
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod orders;
pub mod payments;
pub mod sweeper;
pub mod tickets;

pub use app::{AppError, BookingApp, BookingServices};
pub use config::{BookingConfig, Config, ConfigError};
pub use error::{BookingError, ErrorKind, Result};
pub use ledger::ReservationLedger;
pub use orders::OrderCoordinator;
pub use payments::PaymentCoordinator;
pub use sweeper::ExpiredReservationSweeper;
pub use tickets::{IssuedCode, ScanOutcome, ScanResult, TicketIntegrityService, TicketSigner};
