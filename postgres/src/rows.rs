//! Column conversions between sqlx rows and `cinema-core` types.
//!
//! Identifiers and cents are `u64` in the domain and `BIGINT` in the database;
//! codes are `u8` in the domain and `SMALLINT` in the database. Every
//! conversion is checked and surfaces as [`StoreError::Corrupt`] on failure.

use chrono::{DateTime, Utc};
use cinema_core::seat_layout::CellKind;
use cinema_core::store::StoreError;
use cinema_core::types::{
    Money, OrderId, OrderStatus, Payment, PaymentId, PaymentMethod, ReservationId,
    ReservationStatus, ScreeningInfo, SeatId, SeatInfo, SeatReservation, SessionId, Ticket,
    TicketId, UnknownCode, UserId,
};
use sqlx::Row;
use sqlx::postgres::PgRow;

/// Columns selected for a reservation, in [`reservation`] order.
pub const RESERVATION_COLUMNS: &str =
    "id, session_id, seat_id, status, price_cents, reserved_at, expires_at, reserved_by, ticket_id";

/// Columns selected for a ticket, in [`ticket`] order.
pub const TICKET_COLUMNS: &str =
    "id, order_id, seat_reservation_id, price_cents, scanned_at, scanned_by, scan_code";

pub fn database(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

/// Map a failed insert, turning unique violations into [`StoreError::Conflict`].
pub fn insert_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        _ => database(e),
    }
}

pub fn to_db(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Corrupt(format!("{value} exceeds BIGINT")))
}

pub fn ids_to_db<I>(ids: I) -> Result<Vec<i64>, StoreError>
where
    I: IntoIterator<Item = u64>,
{
    ids.into_iter().map(to_db).collect()
}

pub fn from_db(value: i64, column: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {column}: {value}")))
}

fn unsigned(row: &PgRow, column: &str) -> Result<u64, StoreError> {
    let value: i64 = row.try_get(column).map_err(database)?;
    from_db(value, column)
}

fn optional_unsigned(row: &PgRow, column: &str) -> Result<Option<u64>, StoreError> {
    let value: Option<i64> = row.try_get(column).map_err(database)?;
    value.map(|v| from_db(v, column)).transpose()
}

fn code(row: &PgRow, column: &str) -> Result<u8, StoreError> {
    let value: i16 = row.try_get(column).map_err(database)?;
    u8::try_from(value).map_err(|_| StoreError::Corrupt(format!("invalid {column}: {value}")))
}

pub fn timestamp(row: &PgRow, column: &str) -> Result<DateTime<Utc>, StoreError> {
    row.try_get(column).map_err(database)
}

fn optional_timestamp(row: &PgRow, column: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    row.try_get(column).map_err(database)
}

#[allow(clippy::needless_pass_by_value)]
fn unknown(e: UnknownCode) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

pub fn reservation(row: &PgRow) -> Result<SeatReservation, StoreError> {
    Ok(SeatReservation {
        id: ReservationId::new(unsigned(row, "id")?),
        session_id: SessionId::new(unsigned(row, "session_id")?),
        seat_id: SeatId::new(unsigned(row, "seat_id")?),
        status: ReservationStatus::try_from(code(row, "status")?).map_err(unknown)?,
        price: Money::from_cents(unsigned(row, "price_cents")?),
        reserved_at: timestamp(row, "reserved_at")?,
        expires_at: optional_timestamp(row, "expires_at")?,
        reserved_by: optional_unsigned(row, "reserved_by")?.map(UserId::new),
        ticket_id: optional_unsigned(row, "ticket_id")?.map(TicketId::new),
    })
}

pub fn ticket(row: &PgRow) -> Result<Ticket, StoreError> {
    Ok(Ticket {
        id: TicketId::new(unsigned(row, "id")?),
        order_id: OrderId::new(unsigned(row, "order_id")?),
        seat_reservation_id: optional_unsigned(row, "seat_reservation_id")?.map(ReservationId::new),
        price: Money::from_cents(unsigned(row, "price_cents")?),
        scanned_at: optional_timestamp(row, "scanned_at")?,
        scanned_by: optional_unsigned(row, "scanned_by")?.map(UserId::new),
        scan_code: row.try_get("scan_code").map_err(database)?,
    })
}

pub fn payment(row: &PgRow) -> Result<Payment, StoreError> {
    Ok(Payment {
        id: PaymentId::new(unsigned(row, "id")?),
        order_id: OrderId::new(unsigned(row, "order_id")?),
        amount: Money::from_cents(unsigned(row, "amount_cents")?),
        method: PaymentMethod::try_from(code(row, "method")?).map_err(unknown)?,
        paid_at: timestamp(row, "paid_at")?,
        transaction_id: row.try_get("transaction_id").map_err(database)?,
    })
}

pub fn order_status(row: &PgRow, column: &str) -> Result<OrderStatus, StoreError> {
    OrderStatus::try_from(code(row, column)?).map_err(unknown)
}

/// Decode the screening columns of a ticket context row.
pub fn screening(row: &PgRow, session_id: SessionId) -> Result<ScreeningInfo, StoreError> {
    let movie_title: Option<String> = row.try_get("movie_title").map_err(database)?;
    let hall_name: Option<String> = row.try_get("hall_name").map_err(database)?;
    let starts_at = optional_timestamp(row, "starts_at")?;
    match (movie_title, hall_name, starts_at) {
        (Some(movie_title), Some(hall_name), Some(starts_at)) => Ok(ScreeningInfo {
            session_id,
            movie_title,
            hall_name,
            starts_at,
        }),
        _ => Err(StoreError::Corrupt(format!("no screening for session {session_id}"))),
    }
}

/// Decode the seat columns of a ticket context row, if the seat is tracked.
pub fn seat(row: &PgRow) -> Result<Option<SeatInfo>, StoreError> {
    let Some(seat_id) = optional_unsigned(row, "seat_seat_id")? else {
        return Ok(None);
    };
    let position = |column: &str| -> Result<u8, StoreError> {
        let value: Option<i16> = row.try_get(column).map_err(database)?;
        value
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(|| StoreError::Corrupt(format!("seat {seat_id}: invalid {column}")))
    };
    Ok(Some(SeatInfo {
        seat_id: SeatId::new(seat_id),
        row: position("seat_row")?,
        column: position("seat_column")?,
        kind: CellKind::from_bits(position("seat_kind")?),
    }))
}

pub fn session(row: &PgRow, column: &str) -> Result<SessionId, StoreError> {
    unsigned(row, column).map(SessionId::new)
}

pub fn optional_session(row: &PgRow, column: &str) -> Result<Option<SessionId>, StoreError> {
    optional_unsigned(row, column).map(|value| value.map(SessionId::new))
}

pub fn user(row: &PgRow, column: &str) -> Result<UserId, StoreError> {
    unsigned(row, column).map(UserId::new)
}
