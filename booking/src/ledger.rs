//! Reservation ledger: the rules a set of seat holds must satisfy before it
//! can be turned into an order.
//!
//! The ledger also owns the booking-flow boundary, [`ReservationLedger::place_hold`],
//! which is how Reserved rows come into existence.
//!
//! # Validation order
//!
//! Rules are evaluated in a fixed order and the first failure is reported:
//!
//! 1. every requested id resolves ([`BookingError::ReservationNotFound`])
//! 2. every hold belongs to the requester ([`BookingError::NotOwner`])
//! 3. every hold is Reserved and unexpired ([`BookingError::ReservationExpiredOrSold`])
//! 4. all holds share one session ([`BookingError::MixedSessionReservations`])

use crate::error::{BookingError, Result};
use chrono::{DateTime, Utc};
use cinema_core::environment::Clock;
use cinema_core::store::{BookingStore, BookingTransaction};
use cinema_core::types::{
    Money, NewReservation, ReservationId, SeatId, SeatReservation, SessionId, UserId,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Collapse duplicate ids, keeping first-seen order.
///
/// # Errors
///
/// Returns [`BookingError::EmptyReservationSet`] if `ids` is empty.
pub fn distinct_ids(ids: &[ReservationId]) -> Result<Vec<ReservationId>> {
    if ids.is_empty() {
        return Err(BookingError::EmptyReservationSet);
    }
    let mut distinct = Vec::with_capacity(ids.len());
    for id in ids {
        if !distinct.contains(id) {
            distinct.push(*id);
        }
    }
    Ok(distinct)
}

/// Check loaded holds against the ledger rules.
///
/// `requested` must already be distinct. `found` is whatever storage returned
/// for those ids, in any order. Returns the holds in `requested` order and the
/// session they share.
///
/// # Errors
///
/// Returns the first rule violation, in the documented order.
pub fn check_holds(
    requested: &[ReservationId],
    found: &[SeatReservation],
    user_id: UserId,
    now: DateTime<Utc>,
) -> Result<(Vec<SeatReservation>, SessionId)> {
    let mut holds = Vec::with_capacity(requested.len());
    for id in requested {
        let hold = found
            .iter()
            .find(|r| r.id == *id)
            .ok_or(BookingError::ReservationNotFound(*id))?;
        holds.push(hold.clone());
    }

    if let Some(foreign) = holds.iter().find(|r| r.reserved_by != Some(user_id)) {
        return Err(BookingError::NotOwner {
            reservation_id: foreign.id,
            user_id,
        });
    }

    if let Some(stale) = holds.iter().find(|r| !r.is_fresh_hold(now)) {
        return Err(BookingError::ReservationExpiredOrSold {
            reservation_id: Some(stale.id),
        });
    }

    let session_id = holds
        .first()
        .map(|r| r.session_id)
        .ok_or(BookingError::EmptyReservationSet)?;
    if holds.iter().any(|r| r.session_id != session_id) {
        return Err(BookingError::MixedSessionReservations);
    }

    Ok((holds, session_id))
}

/// Load and validate a user's holds inside an open transaction.
///
/// # Errors
///
/// Returns a ledger rule violation or [`BookingError::Store`].
pub async fn validate_holds<T>(
    tx: &mut T,
    user_id: UserId,
    ids: &[ReservationId],
    now: DateTime<Utc>,
) -> Result<(Vec<SeatReservation>, SessionId)>
where
    T: BookingTransaction,
{
    let requested = distinct_ids(ids)?;
    let found = tx.reservations_by_ids(&requested).await?;
    check_holds(&requested, &found, user_id, now)
}

/// Places seat holds for the booking flow.
pub struct ReservationLedger<S, C> {
    store: Arc<S>,
    clock: Arc<C>,
    hold_duration: chrono::Duration,
}

impl<S, C> ReservationLedger<S, C>
where
    S: BookingStore,
    C: Clock,
{
    /// Create a ledger placing holds that last `hold_duration`
    #[must_use]
    pub const fn new(store: Arc<S>, clock: Arc<C>, hold_duration: chrono::Duration) -> Self {
        Self {
            store,
            clock,
            hold_duration,
        }
    }

    /// How long new holds last
    #[must_use]
    pub const fn hold_duration(&self) -> chrono::Duration {
        self.hold_duration
    }

    /// Hold a seat for `user_id` at a fixed `price`.
    ///
    /// Takes over an existing row for the same seat only if it is an expired
    /// or released hold.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::SeatUnavailable`] if the seat is held by
    /// someone else or sold, or [`BookingError::Store`] on storage failure.
    #[tracing::instrument(skip_all, fields(%user_id, %session_id, %seat_id))]
    pub async fn place_hold(
        &self,
        user_id: UserId,
        session_id: SessionId,
        seat_id: SeatId,
        price: Money,
    ) -> Result<SeatReservation> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let held = tx
            .hold_seat(NewReservation {
                session_id,
                seat_id,
                price,
                reserved_at: now,
                expires_at: Some(now + self.hold_duration),
                reserved_by: user_id,
            })
            .await?;

        let Some(reservation) = held else {
            drop(tx);
            warn!("Seat unavailable");
            return Err(BookingError::SeatUnavailable {
                session_id,
                seat_id,
            });
        };
        tx.commit().await?;

        info!(
            reservation_id = %reservation.id,
            expires_at = ?reservation.expires_at,
            "Seat held"
        );
        Ok(reservation)
    }

    /// Validate a user's holds without changing anything.
    ///
    /// # Errors
    ///
    /// See [`check_holds`].
    pub async fn validate(
        &self,
        user_id: UserId,
        ids: &[ReservationId],
    ) -> Result<(Vec<SeatReservation>, SessionId)> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let result = validate_holds(&mut tx, user_id, ids, now).await;
        tx.rollback().await?;
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use cinema_core::types::ReservationStatus;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn hold(id: u64, user: u64, session: u64, expires_in: Option<i64>) -> SeatReservation {
        SeatReservation {
            id: ReservationId::new(id),
            session_id: SessionId::new(session),
            seat_id: SeatId::new(id),
            status: ReservationStatus::Reserved,
            price: Money::from_cents(1000),
            reserved_at: now() - Duration::minutes(1),
            expires_at: expires_in.map(|minutes| now() + Duration::minutes(minutes)),
            reserved_by: Some(UserId::new(user)),
            ticket_id: None,
        }
    }

    fn ids(raw: &[u64]) -> Vec<ReservationId> {
        raw.iter().copied().map(ReservationId::new).collect()
    }

    #[test]
    fn duplicates_collapse_and_empty_is_rejected() {
        assert_eq!(distinct_ids(&ids(&[3, 1, 3])).unwrap(), ids(&[3, 1]));
        assert_eq!(distinct_ids(&[]), Err(BookingError::EmptyReservationSet));
    }

    #[test]
    fn valid_holds_pass() {
        let found = vec![hold(2, 7, 1, Some(10)), hold(1, 7, 1, None)];
        let (holds, session) = check_holds(&ids(&[1, 2]), &found, UserId::new(7), now()).unwrap();
        assert_eq!(session, SessionId::new(1));
        assert_eq!(holds.iter().map(|h| h.id).collect::<Vec<_>>(), ids(&[1, 2]));
    }

    #[test]
    fn missing_is_reported_before_ownership() {
        let found = vec![hold(1, 8, 1, Some(10))];
        assert_eq!(
            check_holds(&ids(&[1, 2]), &found, UserId::new(7), now()),
            Err(BookingError::ReservationNotFound(ReservationId::new(2)))
        );
    }

    #[test]
    fn ownership_is_reported_before_freshness() {
        let found = vec![hold(1, 7, 1, Some(-5)), hold(2, 8, 1, Some(10))];
        assert_eq!(
            check_holds(&ids(&[1, 2]), &found, UserId::new(7), now()),
            Err(BookingError::NotOwner {
                reservation_id: ReservationId::new(2),
                user_id: UserId::new(7)
            })
        );
    }

    #[test]
    fn released_hold_is_not_owned() {
        let mut released = hold(1, 7, 1, None);
        released.reserved_by = None;
        assert!(matches!(
            check_holds(&ids(&[1]), &[released], UserId::new(7), now()),
            Err(BookingError::NotOwner { .. })
        ));
    }

    #[test]
    fn expiry_boundary_is_stale() {
        let found = vec![hold(1, 7, 1, Some(0))];
        assert_eq!(
            check_holds(&ids(&[1]), &found, UserId::new(7), now()),
            Err(BookingError::ReservationExpiredOrSold {
                reservation_id: Some(ReservationId::new(1))
            })
        );
    }

    #[test]
    fn sold_seat_is_stale() {
        let mut sold = hold(1, 7, 1, Some(10));
        sold.status = ReservationStatus::Sold;
        assert!(matches!(
            check_holds(&ids(&[1]), &[sold], UserId::new(7), now()),
            Err(BookingError::ReservationExpiredOrSold { .. })
        ));
    }

    #[test]
    fn freshness_is_reported_before_session_mix() {
        let found = vec![hold(1, 7, 1, Some(10)), hold(2, 7, 2, Some(-1))];
        assert!(matches!(
            check_holds(&ids(&[1, 2]), &found, UserId::new(7), now()),
            Err(BookingError::ReservationExpiredOrSold { .. })
        ));
        let found = vec![hold(1, 7, 1, Some(10)), hold(2, 7, 2, Some(10))];
        assert_eq!(
            check_holds(&ids(&[1, 2]), &found, UserId::new(7), now()),
            Err(BookingError::MixedSessionReservations)
        );
    }

    proptest! {
        #[test]
        fn any_foreign_hold_is_rejected(
            count in 1usize..8,
            foreign in 0usize..8,
            owner in 1u64..100,
        ) {
            let foreign = foreign % count;
            let found: Vec<_> = (0..count)
                .map(|i| {
                    let user = if i == foreign { owner + 1 } else { owner };
                    hold(i as u64 + 1, user, 1, Some(10))
                })
                .collect();
            let requested: Vec<_> = found.iter().map(|h| h.id).collect();
            let result = check_holds(&requested, &found, UserId::new(owner), now());
            let is_not_owner = matches!(result, Err(BookingError::NotOwner { .. }));
            prop_assert!(is_not_owner);
        }

        #[test]
        fn fresh_owned_single_session_holds_always_pass(
            expiries in proptest::collection::vec(proptest::option::of(1i64..120), 1..8),
        ) {
            let found: Vec<_> = expiries
                .iter()
                .enumerate()
                .map(|(i, expiry)| hold(i as u64 + 1, 5, 3, *expiry))
                .collect();
            let requested: Vec<_> = found.iter().map(|h| h.id).collect();
            let (holds, session) = check_holds(&requested, &found, UserId::new(5), now()).unwrap();
            prop_assert_eq!(holds.len(), found.len());
            prop_assert_eq!(session, SessionId::new(3));
        }
    }
}
