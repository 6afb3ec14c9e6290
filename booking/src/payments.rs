//! Payment coordinator: the atomic unit of the pipeline.
//!
//! Within one transaction a payment:
//!
//! 1. loads the order with its tickets
//! 2. requires it to be Pending
//! 3. requires the tendered amount to equal the sum of ticket prices exactly
//! 4. re-checks every hold (a slow buyer may have lost it since ordering)
//! 5. records the payment
//! 6. moves the order from Pending to Paid, failing if a concurrent writer
//!    changed its status first
//! 7. marks every seat still held by the buyer Sold, linked to its ticket
//!
//! Any failure rolls the transaction back explicitly before the original
//! error is returned, so no payment exists without a sale and no sale
//! without a payment. This is the only place orders become Paid and
//! reservations become Sold.

use crate::error::{BookingError, ErrorKind, Result};
use crate::metrics;
use chrono::{DateTime, Utc};
use cinema_core::environment::Clock;
use cinema_core::store::{BookingStore, BookingTransaction};
use cinema_core::types::{
    Money, NewPayment, Order, OrderId, OrderStatus, Payment, PaymentMethod, ReservationId,
    ReservationStatus, TicketId,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Records payments and finalizes orders.
pub struct PaymentCoordinator<S, C> {
    store: Arc<S>,
    clock: Arc<C>,
}

impl<S, C> PaymentCoordinator<S, C>
where
    S: BookingStore,
    C: Clock,
{
    /// Create a new payment coordinator
    #[must_use]
    pub const fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self { store, clock }
    }

    /// Pay for a Pending order.
    ///
    /// # Errors
    ///
    /// - [`BookingError::OrderNotFound`] if the order does not exist
    /// - [`BookingError::InvalidOrderState`] unless the order is Pending
    /// - [`BookingError::AmountMismatch`] if `amount` differs from the order total
    /// - [`BookingError::ReservationExpiredOrSold`] if any hold was lost
    /// - [`BookingError::Store`] on storage failure
    ///
    /// Nothing is persisted on failure.
    #[tracing::instrument(skip_all, fields(%order_id, %amount, method = method.as_str()))]
    pub async fn process_payment(
        &self,
        order_id: OrderId,
        amount: Money,
        method: PaymentMethod,
    ) -> Result<Payment> {
        let started = Instant::now();
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        match settle(&mut tx, order_id, amount, method, now).await {
            Ok((payment, tickets)) => {
                tx.commit().await.inspect_err(|error| {
                    warn!(%error, "Payment commit failed");
                    metrics::record_payment_failed(ErrorKind::Storage.as_str());
                })?;
                info!(
                    payment_id = %payment.id,
                    transaction_id = %payment.transaction_id,
                    tickets,
                    "Payment recorded"
                );
                metrics::record_payment_succeeded(
                    payment.amount.cents(),
                    tickets,
                    started.elapsed().as_secs_f64(),
                );
                Ok(payment)
            }
            Err(error) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(%rollback_error, "Rollback after failed payment also failed");
                }
                warn!(%error, "Payment rolled back");
                metrics::record_payment_failed(error.kind().as_str());
                Err(error)
            }
        }
    }
}

/// Steps 1–7 of the atomic unit; the caller commits or rolls back.
async fn settle<T>(
    tx: &mut T,
    order_id: OrderId,
    amount: Money,
    method: PaymentMethod,
    now: DateTime<Utc>,
) -> Result<(Payment, usize)>
where
    T: BookingTransaction,
{
    let order = tx
        .order(order_id)
        .await?
        .ok_or(BookingError::OrderNotFound(order_id))?;

    if order.status != OrderStatus::Pending {
        return Err(BookingError::InvalidOrderState {
            order_id,
            expected: OrderStatus::Pending,
            actual: order.status,
        });
    }

    let expected = order.total().ok_or(BookingError::TotalOverflow(order_id))?;
    if expected != amount {
        return Err(BookingError::AmountMismatch {
            expected,
            actual: amount,
        });
    }

    let sales = sales_of(&order)?;
    recheck_holds(tx, &order, &sales, now).await?;

    let payment = tx
        .insert_payment(NewPayment {
            order_id,
            amount,
            method,
            paid_at: now,
            transaction_id: format!("TXN-{}", uuid::Uuid::new_v4().simple()),
        })
        .await?;

    if !tx
        .set_order_status(order_id, OrderStatus::Pending, OrderStatus::Paid)
        .await?
    {
        // A concurrent cancellation or payment committed first.
        let actual = tx
            .order(order_id)
            .await?
            .ok_or(BookingError::OrderNotFound(order_id))?
            .status;
        return Err(BookingError::InvalidOrderState {
            order_id,
            expected: OrderStatus::Pending,
            actual,
        });
    }

    let sold = tx
        .mark_reservations_sold(&sales, order.user_id, now)
        .await?;
    if sold != sales.len() as u64 {
        return Err(lost_sale(tx, &sales).await);
    }

    Ok((payment, sales.len()))
}

/// Pair each ticket with the reservation it will be sold as.
fn sales_of(order: &Order) -> Result<Vec<(ReservationId, TicketId)>> {
    order
        .tickets
        .iter()
        .map(|ticket| {
            ticket
                .seat_reservation_id
                .map(|reservation_id| (reservation_id, ticket.id))
                .ok_or(BookingError::ReservationExpiredOrSold {
                    reservation_id: None,
                })
        })
        .collect()
}

/// Every hold must still exist, belong to the buyer and be fresh.
async fn recheck_holds<T>(
    tx: &mut T,
    order: &Order,
    sales: &[(ReservationId, TicketId)],
    now: DateTime<Utc>,
) -> Result<()>
where
    T: BookingTransaction,
{
    let ids: Vec<ReservationId> = sales.iter().map(|(id, _)| *id).collect();
    let holds = tx.reservations_by_ids(&ids).await?;
    for id in ids {
        let kept = holds
            .iter()
            .find(|r| r.id == id)
            .is_some_and(|r| r.reserved_by == Some(order.user_id) && r.is_fresh_hold(now));
        if !kept {
            return Err(BookingError::ReservationExpiredOrSold {
                reservation_id: Some(id),
            });
        }
    }
    Ok(())
}

/// Name the first reservation a concurrent writer sold or took over.
async fn lost_sale<T>(tx: &mut T, sales: &[(ReservationId, TicketId)]) -> BookingError
where
    T: BookingTransaction,
{
    let ids: Vec<ReservationId> = sales.iter().map(|(id, _)| *id).collect();
    let reservation_id = match tx.reservations_by_ids(&ids).await {
        Ok(current) => sales
            .iter()
            .find(|(id, ticket)| {
                !current.iter().any(|r| {
                    r.id == *id
                        && r.status == ReservationStatus::Sold
                        && r.ticket_id == Some(*ticket)
                })
            })
            .map(|(id, _)| *id),
        Err(_) => None,
    };
    BookingError::ReservationExpiredOrSold { reservation_id }
}
