//! Integration tests for the expired hold sweeper

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::Duration;
use cinema_booking::{BookingError, ExpiredReservationSweeper};
use cinema_core::store::StoreError;
use cinema_core::types::{
    Money, ReservationId, ReservationStatus, SeatId, SeatReservation, SessionId, UserId,
};
use cinema_testing::{InMemoryBookingStore, ManualClock, StoreOperation, test_epoch};
use std::sync::Arc;
use tokio::sync::broadcast;

// ============================================================================
// Test Fixtures
// ============================================================================

fn reservation(
    id: u64,
    status: ReservationStatus,
    expires_in_minutes: Option<i64>,
) -> SeatReservation {
    SeatReservation {
        id: ReservationId::new(id),
        session_id: SessionId::new(1),
        seat_id: SeatId::new(id),
        status,
        price: Money::from_cents(900),
        reserved_at: test_epoch() - Duration::minutes(15),
        expires_at: expires_in_minutes.map(|minutes| test_epoch() + Duration::minutes(minutes)),
        reserved_by: Some(UserId::new(1)),
        ticket_id: None,
    }
}

async fn seeded() -> (InMemoryBookingStore, ManualClock) {
    cinema_testing::helpers::init_test_tracing();

    let store = InMemoryBookingStore::new();
    for row in [
        reservation(1, ReservationStatus::Reserved, Some(-5)), // lapsed
        reservation(2, ReservationStatus::Reserved, Some(0)),  // lapsing this instant
        reservation(3, ReservationStatus::Reserved, Some(5)),  // still held
        reservation(4, ReservationStatus::Reserved, None),     // never lapses
        reservation(5, ReservationStatus::Sold, Some(-60)),    // sold
    ] {
        store.seed_reservation(row).await.unwrap();
    }
    (store, ManualClock::new(test_epoch()))
}

fn sweeper(
    store: &InMemoryBookingStore,
    clock: &ManualClock,
    interval: std::time::Duration,
) -> ExpiredReservationSweeper<InMemoryBookingStore, ManualClock> {
    ExpiredReservationSweeper::new(Arc::new(store.clone()), Arc::new(clock.clone()), interval)
}

async fn remaining(store: &InMemoryBookingStore) -> Vec<u64> {
    store
        .reservations()
        .await
        .iter()
        .map(|r| r.id.value())
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn sweep_deletes_only_lapsed_holds() {
    let (store, clock) = seeded().await;
    let sweeper = sweeper(&store, &clock, std::time::Duration::from_secs(60));

    assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
    assert_eq!(remaining(&store).await, vec![2, 3, 4, 5]);

    clock.advance(Duration::seconds(1));
    assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
    assert_eq!(remaining(&store).await, vec![3, 4, 5]);

    clock.advance(Duration::days(1));
    assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
    assert_eq!(remaining(&store).await, vec![4, 5]);
}

#[tokio::test]
async fn failed_sweep_deletes_nothing() {
    let (store, clock) = seeded().await;
    let sweeper = sweeper(&store, &clock, std::time::Duration::from_secs(60));

    store.fail_once(StoreOperation::Commit);
    assert!(matches!(
        sweeper.sweep_once().await,
        Err(BookingError::Store(StoreError::Database(_)))
    ));
    assert_eq!(remaining(&store).await, vec![1, 2, 3, 4, 5]);
}

#[tokio::test(start_paused = true)]
async fn background_loop_survives_a_failed_tick() {
    let (store, clock) = seeded().await;
    store.fail_once(StoreOperation::DeleteExpiredReservations);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = sweeper(&store, &clock, std::time::Duration::from_secs(60)).spawn(shutdown_rx);

    // First tick fires immediately and fails; the second one sweeps.
    tokio::time::sleep(std::time::Duration::from_secs(61)).await;
    assert_eq!(remaining(&store).await, vec![2, 3, 4, 5]);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_loop() {
    let (store, clock) = seeded().await;
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = sweeper(&store, &clock, std::time::Duration::from_secs(3600)).spawn(shutdown_rx);

    tokio::task::yield_now().await;
    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}
