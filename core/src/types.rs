//! Domain types for the cinema booking pipeline.
//!
//! This module contains the identifiers, value objects and entities shared by the
//! ledger, the order and payment coordinators and the ticket integrity service.
//! Statuses carry explicit one-byte storage codes so that the persisted format
//! never depends on variant declaration order.

use crate::seat_layout::CellKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            #[doc = concat!("Creates a `", stringify!($name), "` from its numeric value")]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the numeric value
            #[must_use]
            pub const fn value(&self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }
    };
}

numeric_id!(
    /// Unique identifier for a user (identity is owned by the auth collaborator)
    UserId
);
numeric_id!(
    /// Unique identifier for a screening session
    SessionId
);
numeric_id!(
    /// Unique identifier for a physical seat in a hall
    SeatId
);
numeric_id!(
    /// Unique identifier for a seat reservation (hold or sale)
    ReservationId
);
numeric_id!(
    /// Unique identifier for an order
    OrderId
);
numeric_id!(
    /// Unique identifier for a ticket
    TicketId
);
numeric_id!(
    /// Unique identifier for a payment
    PaymentId
);

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors.
///
/// Equality is exact, which is what payment amount checks rely on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from whole currency units with overflow checking
    #[must_use]
    pub const fn checked_from_units(units: u64) -> Option<Self> {
        match units.checked_mul(100) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Returns the whole currency units (rounded down)
    #[must_use]
    pub const fn units(&self) -> u64 {
        self.0 / 100
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Sums an iterator of amounts, returning `None` on overflow
    pub fn checked_sum<I>(amounts: I) -> Option<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, Self::checked_add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.units(), self.0 % 100)
    }
}

// ============================================================================
// Statuses (explicit storage codes)
// ============================================================================

/// A stored status or method code that does not map to any known variant.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unknown {kind} code: {code}")]
pub struct UnknownCode {
    /// What was being decoded
    pub kind: &'static str,
    /// The offending code
    pub code: u8,
}

/// Status of a seat reservation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Hold placed, awaiting payment
    Reserved,
    /// Paid, permanently bound to a ticket
    Sold,
}

impl ReservationStatus {
    /// Storage code of this status
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Reserved => 0,
            Self::Sold => 1,
        }
    }
}

impl TryFrom<u8> for ReservationStatus {
    type Error = UnknownCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Reserved),
            1 => Ok(Self::Sold),
            _ => Err(UnknownCode {
                kind: "reservation status",
                code,
            }),
        }
    }
}

/// Status of an order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Created but not yet submitted for payment
    Created,
    /// Awaiting payment
    Pending,
    /// Paid; reservations are sold
    Paid,
    /// Cancelled; reservations released
    Cancelled,
    /// Payment refunded
    Refunded,
    /// Abandoned past its holds
    Expired,
}

impl OrderStatus {
    /// Storage code of this status
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Pending => 1,
            Self::Paid => 2,
            Self::Cancelled => 3,
            Self::Refunded => 4,
            Self::Expired => 5,
        }
    }

    /// Lowercase label used in logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::Expired => "expired",
        }
    }
}

impl TryFrom<u8> for OrderStatus {
    type Error = UnknownCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Created),
            1 => Ok(Self::Pending),
            2 => Ok(Self::Paid),
            3 => Ok(Self::Cancelled),
            4 => Ok(Self::Refunded),
            5 => Ok(Self::Expired),
            _ => Err(UnknownCode {
                kind: "order status",
                code,
            }),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a payment was made. Recorded only; no processor is contacted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// Card at the box office or kiosk
    Card,
    /// Cash at the box office
    Cash,
    /// Online checkout
    Online,
}

impl PaymentMethod {
    /// Storage code of this method
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Card => 0,
            Self::Cash => 1,
            Self::Online => 2,
        }
    }

    /// Lowercase label used in logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Cash => "cash",
            Self::Online => "online",
        }
    }
}

impl TryFrom<u8> for PaymentMethod {
    type Error = UnknownCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Card),
            1 => Ok(Self::Cash),
            2 => Ok(Self::Online),
            _ => Err(UnknownCode {
                kind: "payment method",
                code,
            }),
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A hold or a sale of one physical seat for one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatReservation {
    /// Unique reservation identifier
    pub id: ReservationId,
    /// Screening session
    pub session_id: SessionId,
    /// Physical seat
    pub seat_id: SeatId,
    /// Hold or sale
    pub status: ReservationStatus,
    /// Price fixed at hold time
    pub price: Money,
    /// When the hold was placed
    pub reserved_at: DateTime<Utc>,
    /// When the hold lapses; `None` means not subject to expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Owner of the hold; `None` once released
    pub reserved_by: Option<UserId>,
    /// Ticket this reservation was sold as
    pub ticket_id: Option<TicketId>,
}

impl SeatReservation {
    /// Whether the hold has lapsed at `now`.
    ///
    /// A reservation without an expiry never lapses.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Whether this is a live hold: Reserved and not lapsed at `now`.
    #[must_use]
    pub fn is_fresh_hold(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Reserved && !self.is_expired(now)
    }

    /// Whether this reservation still blocks its seat at `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Sold || self.is_fresh_hold(now)
    }
}

/// A hold to be inserted by the booking flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewReservation {
    /// Screening session
    pub session_id: SessionId,
    /// Physical seat
    pub seat_id: SeatId,
    /// Price fixed at hold time
    pub price: Money,
    /// When the hold was placed
    pub reserved_at: DateTime<Utc>,
    /// When the hold lapses
    pub expires_at: Option<DateTime<Utc>>,
    /// Owner of the hold
    pub reserved_by: UserId,
}

/// One admission to a session, created alongside its order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Unique ticket identifier
    pub id: TicketId,
    /// Owning order
    pub order_id: OrderId,
    /// Reservation this ticket was issued for; `None` once the hold was reclaimed
    pub seat_reservation_id: Option<ReservationId>,
    /// Price copied from the reservation
    pub price: Money,
    /// First valid scan time
    pub scanned_at: Option<DateTime<Utc>>,
    /// Door staff who performed the first valid scan
    pub scanned_by: Option<UserId>,
    /// Issued scan code
    pub scan_code: Option<String>,
}

impl Ticket {
    /// Whether the ticket has already been scanned at the door
    #[must_use]
    pub const fn is_scanned(&self) -> bool {
        self.scanned_at.is_some()
    }
}

/// A ticket to be inserted with a new order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTicket {
    /// Reservation the ticket is issued for
    pub seat_reservation_id: ReservationId,
    /// Price copied from the reservation
    pub price: Money,
}

/// Recorded payment for an order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Unique payment identifier
    pub id: PaymentId,
    /// Paid order (1:1)
    pub order_id: OrderId,
    /// Amount paid
    pub amount: Money,
    /// Method used
    pub method: PaymentMethod,
    /// When the payment was recorded
    pub paid_at: DateTime<Utc>,
    /// Reference for reconciliation
    pub transaction_id: String,
}

/// A payment to be inserted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPayment {
    /// Paid order
    pub order_id: OrderId,
    /// Amount paid
    pub amount: Money,
    /// Method used
    pub method: PaymentMethod,
    /// When the payment was recorded
    pub paid_at: DateTime<Utc>,
    /// Reference for reconciliation
    pub transaction_id: String,
}

/// A user's purchase of one or more seats in one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier
    pub id: OrderId,
    /// Purchasing user
    pub user_id: UserId,
    /// Session all tickets belong to
    pub session_id: SessionId,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Current status
    pub status: OrderStatus,
    /// Payment, once paid
    pub payment: Option<Payment>,
    /// One ticket per reserved seat
    pub tickets: Vec<Ticket>,
}

impl Order {
    /// Sum of ticket prices, `None` on overflow
    #[must_use]
    pub fn total(&self) -> Option<Money> {
        Money::checked_sum(self.tickets.iter().map(|ticket| ticket.price))
    }

    /// Reservations still referenced by this order's tickets
    #[must_use]
    pub fn reservation_ids(&self) -> Vec<ReservationId> {
        self.tickets
            .iter()
            .filter_map(|ticket| ticket.seat_reservation_id)
            .collect()
    }
}

/// An order to be inserted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOrder {
    /// Purchasing user
    pub user_id: UserId,
    /// Session all tickets belong to
    pub session_id: SessionId,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Initial status
    pub status: OrderStatus,
    /// Tickets to create
    pub tickets: Vec<NewTicket>,
}

// ============================================================================
// Display data consumed at the door and by PDF/email collaborators
// ============================================================================

/// What is being screened, where and when.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreeningInfo {
    /// Session identifier
    pub session_id: SessionId,
    /// Movie title
    pub movie_title: String,
    /// Hall name
    pub hall_name: String,
    /// Start time
    pub starts_at: DateTime<Utc>,
}

/// Physical seat position for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatInfo {
    /// Seat identifier
    pub seat_id: SeatId,
    /// Zero-based grid row
    pub row: u8,
    /// Zero-based grid column
    pub column: u8,
    /// Cell kind from the hall layout
    pub kind: CellKind,
}

impl SeatInfo {
    /// Human label such as `"C7"`: row letter, one-based seat number.
    #[must_use]
    pub fn label(&self) -> String {
        let row = char::from(b'A' + self.row % 26);
        format!("{row}{}", u16::from(self.column) + 1)
    }
}

/// Everything the door check needs about one ticket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketContext {
    /// The ticket itself
    pub ticket: Ticket,
    /// Session of the owning order
    pub order_session_id: SessionId,
    /// Status of the owning order
    pub order_status: OrderStatus,
    /// Session of the reservation, if it is still tracked
    pub reservation_session_id: Option<SessionId>,
    /// Screening display data for the order's session
    pub screening: ScreeningInfo,
    /// Seat display data, if the reservation is still tracked
    pub seat: Option<SeatInfo>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reservation(expires_at: Option<DateTime<Utc>>, status: ReservationStatus) -> SeatReservation {
        SeatReservation {
            id: ReservationId::new(1),
            session_id: SessionId::new(1),
            seat_id: SeatId::new(1),
            status,
            price: Money::from_cents(1000),
            reserved_at: Utc::now(),
            expires_at,
            reserved_by: Some(UserId::new(7)),
            ticket_id: None,
        }
    }

    #[test]
    fn money_display_and_sum() {
        assert_eq!(Money::from_cents(2005).to_string(), "20.05");
        let total = Money::checked_sum([Money::from_cents(1000), Money::from_cents(1000)]);
        assert_eq!(total, Some(Money::from_cents(2000)));
        assert_eq!(Money::checked_sum([Money::from_cents(u64::MAX), Money::from_cents(1)]), None);
        assert_eq!(Money::checked_from_units(10), Some(Money::from_cents(1000)));
    }

    #[test]
    fn status_codes_are_fixed() {
        assert_eq!(ReservationStatus::Sold.code(), 1);
        assert_eq!(OrderStatus::Expired.code(), 5);
        assert_eq!(PaymentMethod::Online.code(), 2);
        for code in 0..=5u8 {
            assert_eq!(OrderStatus::try_from(code).unwrap().code(), code);
        }
        assert!(OrderStatus::try_from(6).is_err());
        assert!(ReservationStatus::try_from(2).is_err());
    }

    #[test]
    fn null_expiry_never_lapses() {
        let now = Utc::now();
        let hold = reservation(None, ReservationStatus::Reserved);
        assert!(!hold.is_expired(now + Duration::days(365)));
        assert!(hold.is_fresh_hold(now));
    }

    #[test]
    fn expiry_boundary_is_not_fresh() {
        let now = Utc::now();
        let hold = reservation(Some(now), ReservationStatus::Reserved);
        assert!(hold.is_expired(now));
        assert!(!hold.is_fresh_hold(now));
        assert!(reservation(Some(now), ReservationStatus::Sold).is_active(now));
    }

    #[test]
    fn seat_label_is_one_based() {
        let seat = SeatInfo {
            seat_id: SeatId::new(9),
            row: 2,
            column: 6,
            kind: CellKind::Standard,
        };
        assert_eq!(seat.label(), "C7");
    }

    #[test]
    fn ids_parse_and_display() {
        let id: TicketId = "42".parse().unwrap();
        assert_eq!(id, TicketId::new(42));
        assert_eq!(id.to_string(), "42");
        assert!("x".parse::<TicketId>().is_err());
    }
}
