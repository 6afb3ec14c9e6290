//! In-memory implementation of the booking storage contract.
//!
//! [`InMemoryBookingStore`] keeps every table in a single map set behind an
//! async mutex. Beginning a transaction takes the mutex and works on a copy of
//! the tables; commit writes the copy back, rollback or drop discards it. That
//! makes every transaction serializable, which is the strongest isolation the
//! production store can offer and the easiest to reason about in tests.
//!
//! Failures can be injected per [`StoreOperation`] to exercise rollback paths.
//!
//! # Example
//!
//! ```
//! use cinema_core::{BookingStore, BookingTransaction};
//! use cinema_testing::{InMemoryBookingStore, StoreOperation};
//!
//! # async fn example() {
//! let store = InMemoryBookingStore::new();
//! store.fail_once(StoreOperation::Commit);
//!
//! let tx = store.begin().await.unwrap();
//! assert!(tx.commit().await.is_err());
//! # }
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only poisoned mutexes panic

use chrono::{DateTime, Utc};
use cinema_core::store::{BookingStore, BookingTransaction, StoreError};
use cinema_core::types::{
    NewOrder, NewPayment, NewReservation, Order, OrderId, OrderStatus, Payment, PaymentId,
    ReservationId, ReservationStatus, ScreeningInfo, SeatId, SeatInfo, SeatReservation,
    SessionId, Ticket, TicketContext, TicketId, UserId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Storage operations that can be made to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    /// [`BookingStore::begin`]
    Begin,
    /// [`BookingTransaction::reservations_by_ids`]
    ReservationsByIds,
    /// [`BookingTransaction::hold_seat`]
    HoldSeat,
    /// [`BookingTransaction::mark_reservations_sold`]
    MarkReservationsSold,
    /// [`BookingTransaction::release_reservations`]
    ReleaseReservations,
    /// [`BookingTransaction::delete_expired_reservations`]
    DeleteExpiredReservations,
    /// [`BookingTransaction::insert_order`]
    InsertOrder,
    /// [`BookingTransaction::order`]
    LoadOrder,
    /// [`BookingTransaction::set_order_status`]
    SetOrderStatus,
    /// [`BookingTransaction::insert_payment`]
    InsertPayment,
    /// [`BookingTransaction::ticket_context`]
    TicketContext,
    /// [`BookingTransaction::record_ticket_scan`]
    RecordTicketScan,
    /// [`BookingTransaction::set_ticket_scan_code`]
    SetTicketScanCode,
    /// [`BookingTransaction::commit`]
    Commit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FailureMode {
    Once,
    Always,
}

type Failures = Arc<StdMutex<HashMap<StoreOperation, FailureMode>>>;

fn check(failures: &Failures, operation: StoreOperation) -> Result<(), StoreError> {
    let mut failures = failures.lock().unwrap();
    match failures.get(&operation).copied() {
        Some(FailureMode::Once) => {
            failures.remove(&operation);
            Err(injected(operation))
        }
        Some(FailureMode::Always) => Err(injected(operation)),
        None => Ok(()),
    }
}

fn injected(operation: StoreOperation) -> StoreError {
    StoreError::Database(format!("injected failure in {operation:?}"))
}

#[derive(Clone, Debug)]
struct OrderRow {
    id: OrderId,
    user_id: UserId,
    session_id: SessionId,
    created_at: DateTime<Utc>,
    status: OrderStatus,
}

#[derive(Clone, Debug, Default)]
struct Tables {
    reservations: BTreeMap<ReservationId, SeatReservation>,
    orders: BTreeMap<OrderId, OrderRow>,
    tickets: BTreeMap<TicketId, Ticket>,
    payments: BTreeMap<PaymentId, Payment>,
    screenings: HashMap<SessionId, ScreeningInfo>,
    seats: HashMap<SeatId, SeatInfo>,
    sequence: u64,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn assemble_order(&self, row: &OrderRow) -> Order {
        Order {
            id: row.id,
            user_id: row.user_id,
            session_id: row.session_id,
            created_at: row.created_at,
            status: row.status,
            payment: self
                .payments
                .values()
                .find(|payment| payment.order_id == row.id)
                .cloned(),
            tickets: self
                .tickets
                .values()
                .filter(|ticket| ticket.order_id == row.id)
                .cloned()
                .collect(),
        }
    }

    /// Delete a reservation row, detaching its tickets like
    /// `ON DELETE SET NULL` on `tickets.seat_reservation_id`.
    fn remove_reservation(&mut self, id: ReservationId) -> Option<SeatReservation> {
        let removed = self.reservations.remove(&id)?;
        for ticket in self.tickets.values_mut() {
            if ticket.seat_reservation_id == Some(id) {
                ticket.seat_reservation_id = None;
            }
        }
        Some(removed)
    }

    fn slot_taken_by(&self, session_id: SessionId, seat_id: SeatId) -> Option<ReservationId> {
        self.reservations
            .values()
            .find(|r| r.session_id == session_id && r.seat_id == seat_id)
            .map(|r| r.id)
    }
}

/// In-memory booking store for fast, deterministic testing.
///
/// Clones share the same tables.
#[derive(Clone, Debug, Default)]
pub struct InMemoryBookingStore {
    tables: Arc<Mutex<Tables>>,
    failures: Failures,
}

impl InMemoryBookingStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `operation` fail until [`Self::clear_failures`]
    pub fn fail_on(&self, operation: StoreOperation) {
        self.failures
            .lock()
            .unwrap()
            .insert(operation, FailureMode::Always);
    }

    /// Make the next call of `operation` fail
    pub fn fail_once(&self, operation: StoreOperation) {
        self.failures
            .lock()
            .unwrap()
            .insert(operation, FailureMode::Once);
    }

    /// Remove every injected failure
    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Register screening display data
    pub async fn seed_screening(&self, screening: ScreeningInfo) {
        self.tables
            .lock()
            .await
            .screenings
            .insert(screening.session_id, screening);
    }

    /// Register seat display data
    pub async fn seed_seat(&self, seat: SeatInfo) {
        self.tables.lock().await.seats.insert(seat.seat_id, seat);
    }

    /// Insert a reservation row verbatim, bypassing hold rules.
    ///
    /// The `id` of `reservation` is kept; the id sequence is advanced past it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if another row already occupies the
    /// same `(session_id, seat_id)` or id.
    pub async fn seed_reservation(&self, reservation: SeatReservation) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.reservations.contains_key(&reservation.id)
            || tables
                .slot_taken_by(reservation.session_id, reservation.seat_id)
                .is_some()
        {
            return Err(StoreError::Conflict(format!(
                "seat {} already reserved for session {}",
                reservation.seat_id, reservation.session_id
            )));
        }
        tables.sequence = tables.sequence.max(reservation.id.value());
        tables.reservations.insert(reservation.id, reservation);
        Ok(())
    }

    /// Delete a reservation row outside of any hold rule, whatever its status.
    ///
    /// Tickets sold as it keep existing with no reservation. Returns the
    /// deleted row.
    pub async fn remove_reservation(&self, id: ReservationId) -> Option<SeatReservation> {
        self.tables.lock().await.remove_reservation(id)
    }

    /// Committed reservation by id
    pub async fn reservation(&self, id: ReservationId) -> Option<SeatReservation> {
        self.tables.lock().await.reservations.get(&id).cloned()
    }

    /// All committed reservations
    pub async fn reservations(&self) -> Vec<SeatReservation> {
        self.tables
            .lock()
            .await
            .reservations
            .values()
            .cloned()
            .collect()
    }

    /// Committed order by id, with tickets and payment
    pub async fn stored_order(&self, id: OrderId) -> Option<Order> {
        let tables = self.tables.lock().await;
        tables.orders.get(&id).map(|row| tables.assemble_order(row))
    }

    /// Number of committed orders
    pub async fn order_count(&self) -> usize {
        self.tables.lock().await.orders.len()
    }

    /// Number of committed tickets
    pub async fn ticket_count(&self) -> usize {
        self.tables.lock().await.tickets.len()
    }

    /// Number of committed payments
    pub async fn payment_count(&self) -> usize {
        self.tables.lock().await.payments.len()
    }

    /// Committed ticket by id
    pub async fn ticket(&self, id: TicketId) -> Option<Ticket> {
        self.tables.lock().await.tickets.get(&id).cloned()
    }
}

impl BookingStore for InMemoryBookingStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction, StoreError> {
        check(&self.failures, StoreOperation::Begin)?;
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(InMemoryTransaction {
            guard,
            working,
            failures: Arc::clone(&self.failures),
        })
    }
}

/// Transaction over an [`InMemoryBookingStore`].
///
/// Holds the store's lock for its whole lifetime; writes go to a private copy
/// that replaces the committed tables on [`BookingTransaction::commit`].
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    failures: Failures,
}

impl std::fmt::Debug for InMemoryTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransaction").finish_non_exhaustive()
    }
}

impl BookingTransaction for InMemoryTransaction {
    async fn reservations_by_ids(
        &mut self,
        ids: &[ReservationId],
    ) -> Result<Vec<SeatReservation>, StoreError> {
        check(&self.failures, StoreOperation::ReservationsByIds)?;
        let mut found: Vec<SeatReservation> = ids
            .iter()
            .filter_map(|id| self.working.reservations.get(id).cloned())
            .collect();
        found.sort_by_key(|r| r.id);
        found.dedup_by_key(|r| r.id);
        Ok(found)
    }

    async fn hold_seat(
        &mut self,
        hold: NewReservation,
    ) -> Result<Option<SeatReservation>, StoreError> {
        check(&self.failures, StoreOperation::HoldSeat)?;
        let existing = self.working.slot_taken_by(hold.session_id, hold.seat_id);
        let id = match existing {
            Some(id) => {
                let current = &self.working.reservations[&id];
                let reclaimable = current.status == ReservationStatus::Reserved
                    && (current.reserved_by.is_none() || current.is_expired(hold.reserved_at));
                if !reclaimable {
                    return Ok(None);
                }
                id
            }
            None => ReservationId::new(self.working.next_id()),
        };
        let reservation = SeatReservation {
            id,
            session_id: hold.session_id,
            seat_id: hold.seat_id,
            status: ReservationStatus::Reserved,
            price: hold.price,
            reserved_at: hold.reserved_at,
            expires_at: hold.expires_at,
            reserved_by: Some(hold.reserved_by),
            ticket_id: None,
        };
        self.working.reservations.insert(id, reservation.clone());
        Ok(Some(reservation))
    }

    async fn mark_reservations_sold(
        &mut self,
        sales: &[(ReservationId, TicketId)],
        owner: UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        check(&self.failures, StoreOperation::MarkReservationsSold)?;
        let mut transitioned = 0;
        for (reservation_id, ticket_id) in sales {
            if let Some(reservation) = self.working.reservations.get_mut(reservation_id) {
                if reservation.status == ReservationStatus::Reserved
                    && reservation.reserved_by == Some(owner)
                    && !reservation.is_expired(now)
                {
                    reservation.status = ReservationStatus::Sold;
                    reservation.ticket_id = Some(*ticket_id);
                    transitioned += 1;
                }
            }
        }
        Ok(transitioned)
    }

    async fn release_reservations(
        &mut self,
        ids: &[ReservationId],
        owner: UserId,
    ) -> Result<u64, StoreError> {
        check(&self.failures, StoreOperation::ReleaseReservations)?;
        let mut released = 0;
        for id in ids {
            if let Some(reservation) = self.working.reservations.get_mut(id) {
                if reservation.status == ReservationStatus::Reserved
                    && reservation.reserved_by == Some(owner)
                {
                    reservation.reserved_by = None;
                    reservation.expires_at = None;
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    async fn delete_expired_reservations(
        &mut self,
        before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        check(&self.failures, StoreOperation::DeleteExpiredReservations)?;
        let expired: Vec<ReservationId> = self
            .working
            .reservations
            .values()
            .filter(|r| {
                r.status == ReservationStatus::Reserved
                    && r.expires_at.is_some_and(|expires_at| expires_at < before)
            })
            .map(|r| r.id)
            .collect();
        for id in &expired {
            self.working.remove_reservation(*id);
        }
        Ok(expired.len() as u64)
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError> {
        check(&self.failures, StoreOperation::InsertOrder)?;
        let row = OrderRow {
            id: OrderId::new(self.working.next_id()),
            user_id: order.user_id,
            session_id: order.session_id,
            created_at: order.created_at,
            status: order.status,
        };
        for new_ticket in order.tickets {
            let ticket = Ticket {
                id: TicketId::new(self.working.next_id()),
                order_id: row.id,
                seat_reservation_id: Some(new_ticket.seat_reservation_id),
                price: new_ticket.price,
                scanned_at: None,
                scanned_by: None,
                scan_code: None,
            };
            self.working.tickets.insert(ticket.id, ticket);
        }
        self.working.orders.insert(row.id, row.clone());
        Ok(self.working.assemble_order(&row))
    }

    async fn order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        check(&self.failures, StoreOperation::LoadOrder)?;
        Ok(self
            .working
            .orders
            .get(&id)
            .map(|row| self.working.assemble_order(row)))
    }

    async fn set_order_status(
        &mut self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        check(&self.failures, StoreOperation::SetOrderStatus)?;
        match self.working.orders.get_mut(&id) {
            Some(row) if row.status == from => {
                row.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment, StoreError> {
        check(&self.failures, StoreOperation::InsertPayment)?;
        if self
            .working
            .payments
            .values()
            .any(|existing| existing.order_id == payment.order_id)
        {
            return Err(StoreError::Conflict(format!(
                "order {} already has a payment",
                payment.order_id
            )));
        }
        let payment = Payment {
            id: PaymentId::new(self.working.next_id()),
            order_id: payment.order_id,
            amount: payment.amount,
            method: payment.method,
            paid_at: payment.paid_at,
            transaction_id: payment.transaction_id,
        };
        self.working.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn ticket_context(&mut self, id: TicketId) -> Result<Option<TicketContext>, StoreError> {
        check(&self.failures, StoreOperation::TicketContext)?;
        let Some(ticket) = self.working.tickets.get(&id).cloned() else {
            return Ok(None);
        };
        let Some(order) = self.working.orders.get(&ticket.order_id) else {
            return Err(StoreError::Corrupt(format!(
                "ticket {id} references missing order {}",
                ticket.order_id
            )));
        };
        let reservation = ticket
            .seat_reservation_id
            .and_then(|reservation_id| self.working.reservations.get(&reservation_id));
        let screening = self
            .working
            .screenings
            .get(&order.session_id)
            .cloned()
            .ok_or_else(|| {
                StoreError::Corrupt(format!("no screening for session {}", order.session_id))
            })?;
        Ok(Some(TicketContext {
            order_session_id: order.session_id,
            order_status: order.status,
            reservation_session_id: reservation.map(|r| r.session_id),
            seat: reservation.and_then(|r| self.working.seats.get(&r.seat_id).cloned()),
            screening,
            ticket,
        }))
    }

    async fn record_ticket_scan(
        &mut self,
        id: TicketId,
        scanned_at: DateTime<Utc>,
        scanned_by: UserId,
    ) -> Result<bool, StoreError> {
        check(&self.failures, StoreOperation::RecordTicketScan)?;
        match self.working.tickets.get_mut(&id) {
            Some(ticket) if ticket.scanned_at.is_none() => {
                ticket.scanned_at = Some(scanned_at);
                ticket.scanned_by = Some(scanned_by);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_ticket_scan_code(
        &mut self,
        id: TicketId,
        scan_code: &str,
    ) -> Result<bool, StoreError> {
        check(&self.failures, StoreOperation::SetTicketScanCode)?;
        Ok(self
            .working
            .tickets
            .get_mut(&id)
            .map(|ticket| ticket.scan_code = Some(scan_code.to_owned()))
            .is_some())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        check(&self.failures, StoreOperation::Commit)?;
        *self.guard = self.working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::test_epoch;
    use chrono::Duration;
    use cinema_core::types::{Money, NewTicket};

    fn hold(seat: u64, user: u64, at: DateTime<Utc>) -> NewReservation {
        NewReservation {
            session_id: SessionId::new(1),
            seat_id: SeatId::new(seat),
            price: Money::from_cents(1000),
            reserved_at: at,
            expires_at: Some(at + Duration::minutes(15)),
            reserved_by: UserId::new(user),
        }
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let store = InMemoryBookingStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.hold_seat(hold(1, 1, test_epoch())).await.unwrap().unwrap();
        drop(tx);
        assert!(store.reservations().await.is_empty());

        let mut tx = store.begin().await.unwrap();
        tx.hold_seat(hold(1, 1, test_epoch())).await.unwrap().unwrap();
        tx.rollback().await.unwrap();
        assert!(store.reservations().await.is_empty());
    }

    #[tokio::test]
    async fn held_seat_cannot_be_taken_until_expired() {
        let store = InMemoryBookingStore::new();
        let now = test_epoch();
        let mut tx = store.begin().await.unwrap();
        let first = tx.hold_seat(hold(1, 1, now)).await.unwrap().unwrap();
        assert!(tx.hold_seat(hold(1, 2, now)).await.unwrap().is_none());

        let later = now + Duration::minutes(16);
        let taken = tx.hold_seat(hold(1, 2, later)).await.unwrap().unwrap();
        assert_eq!(taken.id, first.id);
        assert_eq!(taken.reserved_by, Some(UserId::new(2)));
        tx.commit().await.unwrap();
        assert_eq!(store.reservations().await.len(), 1);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let store = InMemoryBookingStore::new();
        store.fail_once(StoreOperation::InsertOrder);
        let order = NewOrder {
            user_id: UserId::new(1),
            session_id: SessionId::new(1),
            created_at: test_epoch(),
            status: OrderStatus::Pending,
            tickets: vec![NewTicket {
                seat_reservation_id: ReservationId::new(1),
                price: Money::from_cents(500),
            }],
        };
        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_order(order.clone()).await.is_err());
        let created = tx.insert_order(order).await.unwrap();
        assert_eq!(created.tickets.len(), 1);
        tx.commit().await.unwrap();
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn order_status_only_moves_from_the_expected_status() {
        let store = InMemoryBookingStore::new();
        let mut tx = store.begin().await.unwrap();
        let order = tx
            .insert_order(NewOrder {
                user_id: UserId::new(1),
                session_id: SessionId::new(1),
                created_at: test_epoch(),
                status: OrderStatus::Pending,
                tickets: Vec::new(),
            })
            .await
            .unwrap();

        assert!(
            tx.set_order_status(order.id, OrderStatus::Pending, OrderStatus::Paid)
                .await
                .unwrap()
        );
        assert!(
            !tx.set_order_status(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
                .await
                .unwrap()
        );
        assert!(
            !tx.set_order_status(OrderId::new(999), OrderStatus::Pending, OrderStatus::Paid)
                .await
                .unwrap()
        );
        assert_eq!(
            tx.order(order.id).await.unwrap().map(|o| o.status),
            Some(OrderStatus::Paid)
        );
    }

    #[tokio::test]
    async fn sale_requires_the_holder_and_a_live_hold() {
        let store = InMemoryBookingStore::new();
        let now = test_epoch();
        let mut tx = store.begin().await.unwrap();
        let held = tx.hold_seat(hold(1, 1, now)).await.unwrap().unwrap();
        let sales = [(held.id, TicketId::new(50))];

        let lapsed = now + Duration::minutes(15);
        assert_eq!(
            tx.mark_reservations_sold(&sales, UserId::new(1), lapsed)
                .await
                .unwrap(),
            0
        );

        tx.hold_seat(hold(1, 2, lapsed)).await.unwrap().unwrap();
        assert_eq!(
            tx.mark_reservations_sold(&sales, UserId::new(1), lapsed)
                .await
                .unwrap(),
            0
        );
        let taken = tx.reservations_by_ids(&[held.id]).await.unwrap();
        assert_eq!(taken[0].status, ReservationStatus::Reserved);
        assert_eq!(taken[0].reserved_by, Some(UserId::new(2)));

        assert_eq!(
            tx.mark_reservations_sold(&sales, UserId::new(2), lapsed)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn second_payment_conflicts() {
        let store = InMemoryBookingStore::new();
        let payment = NewPayment {
            order_id: OrderId::new(9),
            amount: Money::from_cents(100),
            method: cinema_core::types::PaymentMethod::Cash,
            paid_at: test_epoch(),
            transaction_id: "t-1".to_string(),
        };
        let mut tx = store.begin().await.unwrap();
        tx.insert_payment(payment.clone()).await.unwrap();
        assert!(matches!(
            tx.insert_payment(payment).await,
            Err(StoreError::Conflict(_))
        ));
    }
}
