//! Storage contract for the booking pipeline.
//!
//! The pipeline never talks to a database directly. It opens a
//! [`BookingTransaction`] through a [`BookingStore`], performs its reads and
//! writes on that transaction, and then either commits or rolls back.
//!
//! # Transaction guard
//!
//! A transaction is an owned guard:
//!
//! - [`BookingTransaction::commit`] and [`BookingTransaction::rollback`] consume
//!   it, so a scope can end exactly once
//! - dropping an uncommitted transaction discards its writes
//!
//! # Implementations
//!
//! - `PostgresBookingStore` (in `cinema-postgres`): production, backed by sqlx
//! - `InMemoryBookingStore` (in `cinema-testing`): serializable, with failure injection
//!
//! # Isolation
//!
//! Implementations must make a transaction's writes invisible to others until
//! commit, and must enforce uniqueness of `(session_id, seat_id)` across all
//! reservations.
//!
//! State-changing writes carry their precondition (the expected order status,
//! the hold owner) and report how many rows they changed. Of two transactions
//! racing on the same row, at most one sees its write apply.

use crate::types::{
    NewOrder, NewPayment, NewReservation, Order, OrderId, OrderStatus, Payment, ReservationId,
    SeatReservation, TicketContext, TicketId, UserId,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use thiserror::Error;

/// Errors raised by storage implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Database connection or query failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A uniqueness constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stored data could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Entry point to storage: opens transactions.
///
/// Implementations must be `Send + Sync` so a single store can be shared by
/// request tasks and the background sweeper.
pub trait BookingStore: Send + Sync {
    /// Transaction guard produced by this store
    type Transaction: BookingTransaction;

    /// Begin a new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if no transaction could be opened.
    fn begin(&self) -> impl Future<Output = Result<Self::Transaction, StoreError>> + Send;
}

/// Operations available inside one transaction.
///
/// Every method may fail with [`StoreError::Database`]; methods that write
/// document any additional failure.
pub trait BookingTransaction: Send {
    /// Load the reservations whose ids are in `ids`.
    ///
    /// Missing ids are silently omitted; callers compare counts.
    fn reservations_by_ids(
        &mut self,
        ids: &[ReservationId],
    ) -> impl Future<Output = Result<Vec<SeatReservation>, StoreError>> + Send;

    /// Place a hold for the booking flow.
    ///
    /// Inserts a new Reserved row, or takes over the existing row for the same
    /// `(session_id, seat_id)` only when that row is Reserved and either unowned
    /// or expired at `hold.reserved_at`. Returns `None` when the seat is held by
    /// someone else or sold.
    fn hold_seat(
        &mut self,
        hold: NewReservation,
    ) -> impl Future<Output = Result<Option<SeatReservation>, StoreError>> + Send;

    /// Transition reservations to Sold, linking each to the ticket it was sold as.
    ///
    /// Only Reserved rows held by `owner` that have not expired at `now`
    /// transition. Rows that are already Sold, taken over by someone else or
    /// lapsed are left untouched without error, and missing rows are skipped.
    /// Returns how many rows transitioned.
    fn mark_reservations_sold(
        &mut self,
        sales: &[(ReservationId, TicketId)],
        owner: UserId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Release Reserved rows owned by `owner` back to an unowned hold with no expiry.
    ///
    /// Sold rows and rows held by someone else are left untouched. Returns the
    /// number of rows released.
    fn release_reservations(
        &mut self,
        ids: &[ReservationId],
        owner: UserId,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Delete every Reserved row whose expiry is strictly before `before`.
    ///
    /// Rows without an expiry are never deleted. Returns the number of rows deleted.
    fn delete_expired_reservations(
        &mut self,
        before: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Persist an order with its tickets, returning it with assigned ids.
    fn insert_order(
        &mut self,
        order: NewOrder,
    ) -> impl Future<Output = Result<Order, StoreError>> + Send;

    /// Load an order with its tickets and payment.
    fn order(
        &mut self,
        id: OrderId,
    ) -> impl Future<Output = Result<Option<Order>, StoreError>> + Send;

    /// Move an order from `from` to `to`.
    ///
    /// The write only applies while the stored status is still `from`.
    /// Returns `false` if the order does not exist or a concurrent writer
    /// changed its status first.
    fn set_order_status(
        &mut self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Persist a payment.
    ///
    /// Fails with [`StoreError::Conflict`] if the order already has one.
    fn insert_payment(
        &mut self,
        payment: NewPayment,
    ) -> impl Future<Output = Result<Payment, StoreError>> + Send;

    /// Load a ticket with the session and display data needed at the door.
    fn ticket_context(
        &mut self,
        id: TicketId,
    ) -> impl Future<Output = Result<Option<TicketContext>, StoreError>> + Send;

    /// Stamp the first scan of a ticket.
    ///
    /// Only succeeds if the ticket has not been scanned yet; returns `false`
    /// when another scan got there first or the ticket does not exist.
    fn record_ticket_scan(
        &mut self,
        id: TicketId,
        scanned_at: DateTime<Utc>,
        scanned_by: UserId,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Store the issued scan code of a ticket. Returns `false` if it does not exist.
    fn set_ticket_scan_code(
        &mut self,
        id: TicketId,
        scan_code: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Make every write of this transaction visible.
    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Discard every write of this transaction.
    fn rollback(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}
