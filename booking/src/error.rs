//! Errors raised by the booking pipeline.

use cinema_core::store::StoreError;
use cinema_core::types::{
    Money, OrderId, OrderStatus, ReservationId, SeatId, SessionId, TicketId, UserId,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Coarse classification of a [`BookingError`].
///
/// Callers map kinds to responses (HTTP status, door display, metric label)
/// without matching on every variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Referenced entity does not exist
    NotFound,
    /// Caller does not own the entity
    Unauthorized,
    /// Entity is in the wrong state for the operation
    InvalidState,
    /// Request contradicts itself or stored data
    Inconsistent,
    /// Input could not be parsed
    Malformed,
    /// Scan code was tampered with
    InvalidSignature,
    /// Process is misconfigured
    Misconfigured,
    /// Storage collaborator failed
    Storage,
}

impl ErrorKind {
    /// Lowercase label used in logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::InvalidState => "invalid_state",
            Self::Inconsistent => "inconsistent",
            Self::Malformed => "malformed",
            Self::InvalidSignature => "invalid_signature",
            Self::Misconfigured => "misconfigured",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the ledger, coordinators and ticket integrity service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// A requested reservation does not exist.
    #[error("Reservation {0} not found")]
    ReservationNotFound(ReservationId),

    /// A requested reservation is held by another user (or by nobody).
    #[error("Reservation {reservation_id} is not held by user {user_id}")]
    NotOwner {
        /// Offending reservation
        reservation_id: ReservationId,
        /// Requesting user
        user_id: UserId,
    },

    /// A hold has lapsed or its seat is already sold.
    #[error("Seat hold has expired or is already sold{}", reservation_suffix(.reservation_id))]
    ReservationExpiredOrSold {
        /// Offending reservation, when it is still known
        reservation_id: Option<ReservationId>,
    },

    /// The requested reservations belong to more than one session.
    #[error("Reservations span more than one session")]
    MixedSessionReservations,

    /// No reservation ids were given.
    #[error("No reservations given")]
    EmptyReservationSet,

    /// The seat is held by someone else or sold.
    #[error("Seat {seat_id} is not available for session {session_id}")]
    SeatUnavailable {
        /// Requested session
        session_id: SessionId,
        /// Requested seat
        seat_id: SeatId,
    },

    /// The order does not exist.
    #[error("Order {0} not found")]
    OrderNotFound(OrderId),

    /// The order cannot move to the requested status.
    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Order
        order_id: OrderId,
        /// Current status
        from: OrderStatus,
        /// Requested status
        to: OrderStatus,
    },

    /// The order is not in the status the operation requires.
    #[error("Order {order_id} is {actual}, expected {expected}")]
    InvalidOrderState {
        /// Order
        order_id: OrderId,
        /// Required status
        expected: OrderStatus,
        /// Current status
        actual: OrderStatus,
    },

    /// The payment amount differs from the order total.
    #[error("Payment amount {actual} does not match order total {expected}")]
    AmountMismatch {
        /// Sum of ticket prices
        expected: Money,
        /// Amount tendered
        actual: Money,
    },

    /// The order total does not fit in a money value.
    #[error("Total of order {0} overflows")]
    TotalOverflow(OrderId),

    /// The ticket does not exist.
    #[error("Ticket {0} not found")]
    TicketNotFound(TicketId),

    /// The ticket does not belong to the session encoded in its scan code.
    #[error("Ticket {ticket_id} is not valid for session {session_id}")]
    SessionMismatch {
        /// Scanned ticket
        ticket_id: TicketId,
        /// Session from the scan code
        session_id: SessionId,
    },

    /// The scan code does not have the `TICKET:<id>:<session>:<hash>` shape.
    #[error("Malformed scan code")]
    MalformedCode,

    /// The scan code hash does not match its contents.
    #[error("Scan code signature is invalid")]
    InvalidSignature,

    /// The ticket signing secret is empty.
    #[error("Ticket signing secret is not configured")]
    MisconfiguredSecret,

    /// Storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[allow(clippy::ref_option)]
fn reservation_suffix(reservation_id: &Option<ReservationId>) -> String {
    reservation_id.map_or_else(String::new, |id| format!(" (reservation {id})"))
}

impl BookingError {
    /// Classify this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ReservationNotFound(_) | Self::OrderNotFound(_) | Self::TicketNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::NotOwner { .. } => ErrorKind::Unauthorized,
            Self::ReservationExpiredOrSold { .. }
            | Self::SeatUnavailable { .. }
            | Self::InvalidTransition { .. }
            | Self::InvalidOrderState { .. } => ErrorKind::InvalidState,
            Self::MixedSessionReservations
            | Self::EmptyReservationSet
            | Self::AmountMismatch { .. }
            | Self::TotalOverflow(_)
            | Self::SessionMismatch { .. } => ErrorKind::Inconsistent,
            Self::MalformedCode => ErrorKind::Malformed,
            Self::InvalidSignature => ErrorKind::InvalidSignature,
            Self::MisconfiguredSecret => ErrorKind::Misconfigured,
            Self::Store(_) => ErrorKind::Storage,
        }
    }
}

/// Result type for booking operations
pub type Result<T> = std::result::Result<T, BookingError>;
