//! Integration tests for scan code issuance and the door check

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::Duration;
use cinema_booking::{
    BookingConfig, BookingError, BookingServices, ErrorKind, ScanOutcome, TicketSigner,
};
use cinema_core::seat_layout::CellKind;
use cinema_core::types::{
    Money, Order, OrderStatus, PaymentMethod, ScreeningInfo, SeatId, SeatInfo, SessionId,
    TicketId, UserId,
};
use cinema_testing::{InMemoryBookingStore, ManualClock, StoreOperation, test_epoch};
use proptest::prelude::*;
use std::sync::Arc;

// ============================================================================
// Test Fixtures
// ============================================================================

const SECRET: &str = "door-secret";
const SESSION: SessionId = SessionId::new(1);
const OTHER_SESSION: SessionId = SessionId::new(2);
const BUYER: UserId = UserId::new(100);
const USHER: UserId = UserId::new(900);
const OTHER_USHER: UserId = UserId::new(901);

struct Door {
    store: InMemoryBookingStore,
    clock: ManualClock,
    services: BookingServices<InMemoryBookingStore, ManualClock>,
}

async fn door() -> Door {
    cinema_testing::helpers::init_test_tracing();

    let store = InMemoryBookingStore::new();
    let clock = ManualClock::new(test_epoch());
    for (session_id, hall_name) in [(SESSION, "Hall 1"), (OTHER_SESSION, "Hall 2")] {
        store
            .seed_screening(ScreeningInfo {
                session_id,
                movie_title: "Nosferatu".to_string(),
                hall_name: hall_name.to_string(),
                starts_at: test_epoch() + Duration::hours(2),
            })
            .await;
    }
    store
        .seed_seat(SeatInfo {
            seat_id: SeatId::new(7),
            row: 2,
            column: 6,
            kind: CellKind::Vip,
        })
        .await;
    store
        .seed_seat(SeatInfo {
            seat_id: SeatId::new(8),
            row: 2,
            column: 7,
            kind: CellKind::Vip,
        })
        .await;

    let services = BookingServices::new(
        Arc::new(store.clone()),
        Arc::new(clock.clone()),
        &BookingConfig::with_secret(SECRET),
    )
    .unwrap();

    Door {
        store,
        clock,
        services,
    }
}

impl Door {
    async fn order(&self, session: SessionId, seats: &[u64]) -> Order {
        let mut holds = Vec::new();
        for seat in seats {
            let hold = self
                .services
                .ledger
                .place_hold(BUYER, session, SeatId::new(*seat), Money::from_cents(1250))
                .await
                .unwrap();
            holds.push(hold.id);
        }
        self.services.orders.create_order(BUYER, &holds).await.unwrap()
    }

    async fn paid_order(&self, session: SessionId, seats: &[u64]) -> Order {
        let order = self.order(session, seats).await;
        self.services
            .payments
            .process_payment(order.id, order.total().unwrap(), PaymentMethod::Card)
            .await
            .unwrap();
        order
    }

    fn code(&self, ticket_id: TicketId, session_id: SessionId) -> String {
        self.services.tickets.issue_code(ticket_id, session_id)
    }
}

// ============================================================================
// Scanning
// ============================================================================

#[tokio::test]
async fn first_scan_admits_and_second_reports_original_stamp() {
    let door = door().await;
    let order = door.paid_order(SESSION, &[7]).await;
    let ticket = &order.tickets[0];
    let code = door.code(ticket.id, SESSION);

    let first = door.services.tickets.scan(&code, USHER).await.unwrap();
    assert!(!first.already_scanned);
    assert_eq!(first.ticket_id, ticket.id);
    assert_eq!(first.order_id, order.id);
    assert_eq!(first.scanned_at, test_epoch());
    assert_eq!(first.scanned_by, USHER);
    assert_eq!(first.movie_title, "Nosferatu");
    assert_eq!(first.hall_name, "Hall 1");
    assert_eq!(first.seat_label.as_deref(), Some("C7"));
    assert_eq!((first.seat_row, first.seat_column), (Some(2), Some(6)));
    assert_eq!(first.price, Money::from_cents(1250));

    door.clock.advance(Duration::minutes(3));

    let second = door.services.tickets.scan(&code, OTHER_USHER).await.unwrap();
    assert!(second.already_scanned);
    assert_eq!(second.scanned_at, test_epoch());
    assert_eq!(second.scanned_by, USHER);

    let stored = door.store.ticket(ticket.id).await.unwrap();
    assert_eq!(stored.scanned_at, Some(test_epoch()));
    assert_eq!(stored.scanned_by, Some(USHER));
}

#[tokio::test]
async fn malformed_code_is_rejected() {
    let door = door().await;
    for code in ["", "TICKET:1:1", "TICKET:a:1:00", "hello"] {
        assert_eq!(
            door.services.tickets.scan(code, USHER).await,
            Err(BookingError::MalformedCode),
            "{code}"
        );
    }
}

#[tokio::test]
async fn code_from_another_secret_is_rejected() {
    let door = door().await;
    let order = door.paid_order(SESSION, &[7]).await;
    let forged = TicketSigner::new("not-the-door-secret")
        .unwrap()
        .issue_code(order.tickets[0].id, SESSION);

    assert_eq!(
        door.services.tickets.scan(&forged, USHER).await,
        Err(BookingError::InvalidSignature)
    );
}

#[tokio::test]
async fn validly_signed_code_for_wrong_session_is_rejected() {
    let door = door().await;
    let order = door.paid_order(SESSION, &[7]).await;
    let ticket_id = order.tickets[0].id;
    let code = door.code(ticket_id, OTHER_SESSION);

    assert_eq!(
        door.services.tickets.scan(&code, USHER).await,
        Err(BookingError::SessionMismatch {
            ticket_id,
            session_id: OTHER_SESSION
        })
    );
    assert_eq!(door.store.ticket(ticket_id).await.unwrap().scanned_at, None);
}

#[tokio::test]
async fn unknown_ticket_is_not_found() {
    let door = door().await;
    let code = door.code(TicketId::new(4242), SESSION);
    assert_eq!(
        door.services.tickets.scan(&code, USHER).await,
        Err(BookingError::TicketNotFound(TicketId::new(4242)))
    );
}

#[tokio::test]
async fn unpaid_ticket_does_not_admit() {
    let door = door().await;
    let order = door.order(SESSION, &[7]).await;
    let code = door.code(order.tickets[0].id, SESSION);

    assert_eq!(
        door.services.tickets.scan(&code, USHER).await,
        Err(BookingError::InvalidOrderState {
            order_id: order.id,
            expected: OrderStatus::Paid,
            actual: OrderStatus::Pending,
        })
    );
}

#[tokio::test]
async fn ticket_outliving_its_reservation_admits_without_a_seat() {
    let door = door().await;
    let order = door.paid_order(SESSION, &[7]).await;
    let ticket = &order.tickets[0];
    door.store
        .remove_reservation(ticket.seat_reservation_id.unwrap())
        .await
        .unwrap();

    let result = door
        .services
        .tickets
        .scan(&door.code(ticket.id, SESSION), USHER)
        .await
        .unwrap();
    assert!(!result.already_scanned);
    assert_eq!(result.seat_label, None);
    assert_eq!((result.seat_row, result.seat_column), (None, None));
    assert_eq!(result.movie_title, "Nosferatu");
    assert_eq!(result.hall_name, "Hall 1");
    assert_eq!(result.price, Money::from_cents(1250));

    // The order's session still binds the code.
    assert_eq!(
        door.services
            .tickets
            .scan(&door.code(ticket.id, OTHER_SESSION), USHER)
            .await,
        Err(BookingError::SessionMismatch {
            ticket_id: ticket.id,
            session_id: OTHER_SESSION
        })
    );
}

#[tokio::test]
async fn ticket_of_a_swept_hold_does_not_admit() {
    let door = door().await;
    let order = door.order(SESSION, &[7]).await;
    let ticket_id = order.tickets[0].id;

    door.clock.advance(Duration::minutes(16));
    assert_eq!(door.services.sweeper().sweep_once().await.unwrap(), 1);
    assert_eq!(door.store.ticket(ticket_id).await.unwrap().seat_reservation_id, None);

    assert_eq!(
        door.services
            .tickets
            .scan(&door.code(ticket_id, SESSION), USHER)
            .await,
        Err(BookingError::InvalidOrderState {
            order_id: order.id,
            expected: OrderStatus::Paid,
            actual: OrderStatus::Pending,
        })
    );
    assert_eq!(door.store.ticket(ticket_id).await.unwrap().scanned_at, None);
}

#[tokio::test]
async fn failed_scan_write_leaves_ticket_unscanned() {
    let door = door().await;
    let order = door.paid_order(SESSION, &[7]).await;
    let ticket_id = order.tickets[0].id;
    let code = door.code(ticket_id, SESSION);

    door.store.fail_once(StoreOperation::Commit);
    assert!(matches!(
        door.services.tickets.scan(&code, USHER).await,
        Err(BookingError::Store(_))
    ));
    assert_eq!(door.store.ticket(ticket_id).await.unwrap().scanned_at, None);

    let retry = door.services.tickets.scan(&code, USHER).await.unwrap();
    assert!(!retry.already_scanned);
}

// ============================================================================
// Door outcomes
// ============================================================================

#[tokio::test]
async fn check_in_maps_every_outcome() {
    let door = door().await;
    let order = door.paid_order(SESSION, &[7]).await;
    let code = door.code(order.tickets[0].id, SESSION);
    let tickets = &door.services.tickets;

    assert!(matches!(tickets.check_in(&code, USHER).await, ScanOutcome::Admitted(_)));
    assert!(matches!(
        tickets.check_in(&code, USHER).await,
        ScanOutcome::AlreadyScanned(_)
    ));

    match tickets.check_in("TICKET:nope", USHER).await {
        ScanOutcome::Rejected { reason, message } => {
            assert_eq!(reason, ErrorKind::Malformed);
            assert!(!message.is_empty());
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn outcome_serializes_with_tag() {
    let door = door().await;
    let order = door.paid_order(SESSION, &[7]).await;
    let code = door.code(order.tickets[0].id, SESSION);

    let admitted = serde_json::to_value(door.services.tickets.check_in(&code, USHER).await).unwrap();
    assert_eq!(admitted["outcome"], "admitted");
    assert_eq!(admitted["seat_label"], "C7");
    assert_eq!(admitted["already_scanned"], false);

    let rejected = serde_json::to_value(door.services.tickets.check_in("junk", USHER).await).unwrap();
    assert_eq!(rejected["outcome"], "rejected");
    assert_eq!(rejected["reason"], "malformed");
}

// ============================================================================
// Issuance
// ============================================================================

#[tokio::test]
async fn paid_order_gets_a_stored_code_per_ticket() {
    let door = door().await;
    let order = door.paid_order(SESSION, &[7, 8]).await;

    let issued = door.services.tickets.issue_order_codes(order.id).await.unwrap();
    assert_eq!(issued.len(), 2);

    let signer = TicketSigner::new(SECRET).unwrap();
    for code in &issued {
        assert_eq!(signer.verify(&code.code).unwrap(), (code.ticket_id, SESSION));
        let stored = door.store.ticket(code.ticket_id).await.unwrap();
        assert_eq!(stored.scan_code.as_deref(), Some(code.code.as_str()));
    }

    // Issuing again yields the same codes.
    let again = door.services.tickets.issue_order_codes(order.id).await.unwrap();
    assert_eq!(again, issued);
}

#[tokio::test]
async fn unpaid_order_gets_no_codes() {
    let door = door().await;
    let order = door.order(SESSION, &[7]).await;

    assert_eq!(
        door.services.tickets.issue_order_codes(order.id).await,
        Err(BookingError::InvalidOrderState {
            order_id: order.id,
            expected: OrderStatus::Paid,
            actual: OrderStatus::Pending,
        })
    );
    assert_eq!(door.store.ticket(order.tickets[0].id).await.unwrap().scan_code, None);
}

// ============================================================================
// Property tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn any_single_character_change_is_rejected(
        position in any::<proptest::sample::Index>(),
        replacement in proptest::char::range('!', '~'),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let door = door().await;
            let order = door.paid_order(SESSION, &[7]).await;
            let ticket_id = order.tickets[0].id;
            let code = door.code(ticket_id, SESSION);

            let at = position.index(code.len());
            prop_assume!(code.as_bytes()[at] != u8::try_from(replacement).unwrap());
            let mut tampered = code.clone();
            tampered.replace_range(at..=at, replacement.encode_utf8(&mut [0; 4]));

            let rejected = door.services.tickets.scan(&tampered, USHER).await;
            let is_rejected = matches!(
                rejected,
                Err(BookingError::MalformedCode | BookingError::InvalidSignature)
            );
            prop_assert!(is_rejected, "{} was accepted: {:?}", tampered, rejected);
            prop_assert_eq!(door.store.ticket(ticket_id).await.unwrap().scanned_at, None);

            // The untouched code still admits.
            let admitted = door.services.tickets.scan(&code, USHER).await;
            prop_assert!(admitted.is_ok());
            Ok::<(), TestCaseError>(())
        })?;
    }
}
