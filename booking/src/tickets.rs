//! Ticket integrity: tamper-evident scan codes and the door check.
//!
//! # Scan code format
//!
//! ```text
//! TICKET:<ticket_id>:<session_id>:<hex(HMAC-SHA256(secret, "<ticket_id>:<session_id>"))>
//! ```
//!
//! Ids are unsigned decimal without leading zeros; the hash is 64 lowercase
//! hex characters. A code only verifies if every field is exactly what the
//! signer would produce.
//!
//! # Door check
//!
//! The first valid scan of a ticket stamps who scanned it and when. Scanning
//! it again is not an error: the result reports `already_scanned` with the
//! original stamp so door staff can spot a copied code. Failed scans never
//! modify a ticket.

use crate::error::{BookingError, ErrorKind, Result};
use crate::metrics;
use chrono::{DateTime, Utc};
use cinema_core::environment::Clock;
use cinema_core::store::{BookingStore, BookingTransaction, StoreError};
use cinema_core::types::{
    Money, OrderId, OrderStatus, SessionId, TicketContext, TicketId, UserId,
};
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

const CODE_PREFIX: &str = "TICKET";
const HASH_HEX_LEN: usize = 64;

/// Signs and verifies scan codes with a shared secret.
#[derive(Clone)]
pub struct TicketSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for TicketSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketSigner").finish_non_exhaustive()
    }
}

impl TicketSigner {
    /// Create a signer from the configured secret.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::MisconfiguredSecret`] if the secret is empty
    /// or only whitespace.
    pub fn new(secret: &str) -> Result<Self> {
        if secret.trim().is_empty() {
            return Err(BookingError::MisconfiguredSecret);
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| BookingError::MisconfiguredSecret)?;
        Ok(Self { mac })
    }

    /// Hex HMAC of `"{ticket_id}:{session_id}"`
    #[must_use]
    pub fn signature(&self, ticket_id: TicketId, session_id: SessionId) -> String {
        let mut mac = self.mac.clone();
        mac.update(format!("{ticket_id}:{session_id}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Full scan code for a ticket
    #[must_use]
    pub fn issue_code(&self, ticket_id: TicketId, session_id: SessionId) -> String {
        format!(
            "{CODE_PREFIX}:{ticket_id}:{session_id}:{}",
            self.signature(ticket_id, session_id)
        )
    }

    /// Parse a scan code and check its signature.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::MalformedCode`] if the code does not have the
    /// expected shape, or [`BookingError::InvalidSignature`] if the hash does
    /// not match.
    pub fn verify(&self, code: &str) -> Result<(TicketId, SessionId)> {
        let parsed = parse_code(code)?;
        let expected = self.signature(parsed.ticket_id, parsed.session_id);
        if !signatures_match(&expected, parsed.hash) {
            return Err(BookingError::InvalidSignature);
        }
        Ok((parsed.ticket_id, parsed.session_id))
    }
}

/// The fields of a well-formed scan code, not yet verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedCode<'a> {
    /// Ticket id field
    pub ticket_id: TicketId,
    /// Session id field
    pub session_id: SessionId,
    /// Hash field, as supplied
    pub hash: &'a str,
}

/// Split a scan code into its fields.
///
/// # Errors
///
/// Returns [`BookingError::MalformedCode`] unless the code has exactly four
/// `:`-separated parts, the first is `TICKET`, both ids are canonical decimal
/// (no sign, no leading zeros) that fits in a `u64`, and the hash is exactly
/// 64 hex characters.
pub fn parse_code(code: &str) -> Result<ParsedCode<'_>> {
    let parts: Vec<&str> = code.split(':').collect();
    let &[prefix, ticket, session, hash] = parts.as_slice() else {
        return Err(BookingError::MalformedCode);
    };
    if prefix != CODE_PREFIX {
        return Err(BookingError::MalformedCode);
    }
    if hash.len() != HASH_HEX_LEN || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(BookingError::MalformedCode);
    }
    Ok(ParsedCode {
        ticket_id: TicketId::new(decimal(ticket)?),
        session_id: SessionId::new(decimal(session)?),
        hash,
    })
}

/// Canonical unsigned decimal: digits only, no leading zero unless it is `0`.
fn decimal(field: &str) -> Result<u64> {
    if field.is_empty()
        || !field.bytes().all(|b| b.is_ascii_digit())
        || (field.len() > 1 && field.starts_with('0'))
    {
        return Err(BookingError::MalformedCode);
    }
    field.parse().map_err(|_| BookingError::MalformedCode)
}

/// Compare two signatures in time independent of where they first differ.
///
/// Length is not secret (always 64 for well-formed codes), so only equal
/// length inputs are compared byte by byte.
fn signatures_match(expected: &str, supplied: &str) -> bool {
    constant_time_eq(expected.as_bytes(), supplied.as_bytes())
}

/// What door staff see after a successful scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    /// Scanned ticket
    pub ticket_id: TicketId,
    /// Owning order
    pub order_id: OrderId,
    /// Whether this ticket had been scanned before this call
    pub already_scanned: bool,
    /// First valid scan time
    pub scanned_at: DateTime<Utc>,
    /// Staff member who performed the first valid scan
    pub scanned_by: UserId,
    /// Ticket price
    pub price: Money,
    /// Movie title
    pub movie_title: String,
    /// Hall name
    pub hall_name: String,
    /// Screening start
    pub starts_at: DateTime<Utc>,
    /// Seat label such as `C7`, if the seat is still tracked
    pub seat_label: Option<String>,
    /// Zero-based seat row
    pub seat_row: Option<u8>,
    /// Zero-based seat column
    pub seat_column: Option<u8>,
}

impl ScanResult {
    fn from_context(
        context: TicketContext,
        already_scanned: bool,
        scanned_at: DateTime<Utc>,
        scanned_by: UserId,
    ) -> Self {
        let seat = context.seat.as_ref();
        Self {
            ticket_id: context.ticket.id,
            order_id: context.ticket.order_id,
            already_scanned,
            scanned_at,
            scanned_by,
            price: context.ticket.price,
            seat_label: seat.map(cinema_core::types::SeatInfo::label),
            seat_row: seat.map(|s| s.row),
            seat_column: seat.map(|s| s.column),
            movie_title: context.screening.movie_title,
            hall_name: context.screening.hall_name,
            starts_at: context.screening.starts_at,
        }
    }

    fn previously_scanned(context: TicketContext) -> Result<Self> {
        match (context.ticket.scanned_at, context.ticket.scanned_by) {
            (Some(at), Some(by)) => Ok(Self::from_context(context, true, at, by)),
            _ => Err(StoreError::Corrupt(format!(
                "ticket {} has a partial scan stamp",
                context.ticket.id
            ))
            .into()),
        }
    }
}

/// Door-facing verdict of a scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// First valid scan: let the holder in
    Admitted(ScanResult),
    /// Valid code scanned before: possible copy
    AlreadyScanned(ScanResult),
    /// Code rejected
    Rejected {
        /// Why
        reason: ErrorKind,
        /// Human-readable detail
        message: String,
    },
}

impl ScanOutcome {
    /// Metric label for this outcome
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admitted(_) => "admitted",
            Self::AlreadyScanned(_) => "already_scanned",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// A scan code issued for a paid ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IssuedCode {
    /// Ticket
    pub ticket_id: TicketId,
    /// Scan code to print or send
    pub code: String,
}

/// Issues scan codes and validates them at the door.
pub struct TicketIntegrityService<S, C> {
    store: Arc<S>,
    clock: Arc<C>,
    signer: TicketSigner,
}

impl<S, C> TicketIntegrityService<S, C>
where
    S: BookingStore,
    C: Clock,
{
    /// Create a new ticket integrity service
    #[must_use]
    pub const fn new(store: Arc<S>, clock: Arc<C>, signer: TicketSigner) -> Self {
        Self {
            store,
            clock,
            signer,
        }
    }

    /// Scan code for a ticket
    #[must_use]
    pub fn issue_code(&self, ticket_id: TicketId, session_id: SessionId) -> String {
        self.signer.issue_code(ticket_id, session_id)
    }

    /// Compute and store the scan code of every ticket of a paid order.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::OrderNotFound`], [`BookingError::InvalidOrderState`]
    /// unless the order is Paid, or [`BookingError::Store`].
    #[tracing::instrument(skip_all, fields(%order_id))]
    pub async fn issue_order_codes(&self, order_id: OrderId) -> Result<Vec<IssuedCode>> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .order(order_id)
            .await?
            .ok_or(BookingError::OrderNotFound(order_id))?;
        if order.status != OrderStatus::Paid {
            return Err(BookingError::InvalidOrderState {
                order_id,
                expected: OrderStatus::Paid,
                actual: order.status,
            });
        }

        let mut issued = Vec::with_capacity(order.tickets.len());
        for ticket in &order.tickets {
            let code = self.signer.issue_code(ticket.id, order.session_id);
            tx.set_ticket_scan_code(ticket.id, &code).await?;
            issued.push(IssuedCode {
                ticket_id: ticket.id,
                code,
            });
        }
        tx.commit().await?;

        info!(tickets = issued.len(), "Scan codes issued");
        Ok(issued)
    }

    /// Validate a scan code and record the first scan.
    ///
    /// # Errors
    ///
    /// - [`BookingError::MalformedCode`] / [`BookingError::InvalidSignature`] for bad codes
    /// - [`BookingError::TicketNotFound`] if the ticket does not exist
    /// - [`BookingError::SessionMismatch`] if the ticket belongs to another session
    /// - [`BookingError::InvalidOrderState`] if the ticket's order is not paid
    /// - [`BookingError::Store`] on storage failure
    #[tracing::instrument(skip_all, fields(%scanned_by))]
    pub async fn scan(&self, code: &str, scanned_by: UserId) -> Result<ScanResult> {
        let (ticket_id, session_id) = self.signer.verify(code).inspect_err(|error| {
            warn!(%error, "Scan code rejected");
        })?;

        let mut tx = self.store.begin().await?;
        match self.admit(&mut tx, ticket_id, session_id, scanned_by).await {
            Ok(result) => {
                tx.commit().await?;
                if result.already_scanned {
                    warn!(%ticket_id, first_scanned_at = %result.scanned_at, "Ticket scanned again");
                } else {
                    info!(%ticket_id, "Ticket admitted");
                }
                Ok(result)
            }
            Err(error) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(%rollback_error, "Rollback after failed scan also failed");
                }
                warn!(%ticket_id, %error, "Scan rejected");
                Err(error)
            }
        }
    }

    /// Scan for door staff: never fails, always yields a verdict.
    pub async fn check_in(&self, code: &str, scanned_by: UserId) -> ScanOutcome {
        let outcome = match self.scan(code, scanned_by).await {
            Ok(result) if result.already_scanned => ScanOutcome::AlreadyScanned(result),
            Ok(result) => ScanOutcome::Admitted(result),
            Err(error) => ScanOutcome::Rejected {
                reason: error.kind(),
                message: error.to_string(),
            },
        };
        metrics::record_ticket_scan(outcome.as_str());
        outcome
    }

    async fn admit(
        &self,
        tx: &mut S::Transaction,
        ticket_id: TicketId,
        session_id: SessionId,
        scanned_by: UserId,
    ) -> Result<ScanResult> {
        let context = tx
            .ticket_context(ticket_id)
            .await?
            .ok_or(BookingError::TicketNotFound(ticket_id))?;

        let reservation_matches = context
            .reservation_session_id
            .is_none_or(|reservation_session| reservation_session == session_id);
        if context.order_session_id != session_id || !reservation_matches {
            return Err(BookingError::SessionMismatch {
                ticket_id,
                session_id,
            });
        }
        if context.order_status != OrderStatus::Paid {
            return Err(BookingError::InvalidOrderState {
                order_id: context.ticket.order_id,
                expected: OrderStatus::Paid,
                actual: context.order_status,
            });
        }

        if context.ticket.is_scanned() {
            return ScanResult::previously_scanned(context);
        }

        let now = self.clock.now();
        if tx.record_ticket_scan(ticket_id, now, scanned_by).await? {
            return Ok(ScanResult::from_context(context, false, now, scanned_by));
        }

        // Another scan won the race; report its stamp.
        let current = tx
            .ticket_context(ticket_id)
            .await?
            .ok_or(BookingError::TicketNotFound(ticket_id))?;
        ScanResult::previously_scanned(current)
    }
}
