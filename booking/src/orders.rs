//! Order coordinator: turns a user's seat holds into a Pending order and
//! cancels orders that were never paid.
//!
//! Creating an order neither sells nor extends the holds; payment re-checks
//! them, so a slow buyer can still lose a seat to the sweeper in between.

use crate::error::{BookingError, Result};
use crate::ledger::validate_holds;
use crate::metrics;
use cinema_core::environment::Clock;
use cinema_core::store::{BookingStore, BookingTransaction};
use cinema_core::types::{NewOrder, NewTicket, Order, OrderId, OrderStatus, ReservationId, UserId};
use std::sync::Arc;
use tracing::{info, warn};

/// Creates, loads and cancels orders.
pub struct OrderCoordinator<S, C> {
    store: Arc<S>,
    clock: Arc<C>,
}

impl<S, C> OrderCoordinator<S, C>
where
    S: BookingStore,
    C: Clock,
{
    /// Create a new order coordinator
    #[must_use]
    pub const fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self { store, clock }
    }

    /// Create a Pending order with one ticket per held seat.
    ///
    /// Each ticket copies the price fixed on its reservation.
    ///
    /// # Errors
    ///
    /// Returns a ledger rule violation (see [`crate::ledger`]) or
    /// [`BookingError::Store`]. Nothing is persisted on failure.
    #[tracing::instrument(skip_all, fields(%user_id, seats = reservation_ids.len()))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        reservation_ids: &[ReservationId],
    ) -> Result<Order> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let (holds, session_id) = match validate_holds(&mut tx, user_id, reservation_ids, now).await
        {
            Ok(validated) => validated,
            Err(error) => {
                drop(tx);
                warn!(%error, "Order rejected");
                metrics::record_order_rejected(error.kind().as_str());
                return Err(error);
            }
        };

        let order = tx
            .insert_order(NewOrder {
                user_id,
                session_id,
                created_at: now,
                status: OrderStatus::Pending,
                tickets: holds
                    .iter()
                    .map(|hold| NewTicket {
                        seat_reservation_id: hold.id,
                        price: hold.price,
                    })
                    .collect(),
            })
            .await?;
        tx.commit().await?;

        info!(
            order_id = %order.id,
            session_id = %order.session_id,
            tickets = order.tickets.len(),
            "Order created"
        );
        metrics::record_order_created(order.tickets.len());
        Ok(order)
    }

    /// Load an order with its tickets and payment.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::OrderNotFound`] or [`BookingError::Store`].
    pub async fn order(&self, order_id: OrderId) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let order = tx.order(order_id).await?;
        tx.rollback().await?;
        order.ok_or(BookingError::OrderNotFound(order_id))
    }

    /// Cancel an unpaid order and release its holds.
    ///
    /// Released holds stay Reserved with no owner and no expiry, so the seat
    /// can be held again by anyone.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::OrderNotFound`], [`BookingError::InvalidTransition`]
    /// for orders that are already cancelled, expired, paid or refunded, or
    /// [`BookingError::Store`].
    #[tracing::instrument(skip_all, fields(%order_id))]
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let Some(mut order) = tx.order(order_id).await? else {
            return Err(BookingError::OrderNotFound(order_id));
        };

        if !matches!(order.status, OrderStatus::Created | OrderStatus::Pending) {
            warn!(status = %order.status, "Cancellation rejected");
            return Err(BookingError::InvalidTransition {
                order_id,
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }

        if !tx
            .set_order_status(order_id, order.status, OrderStatus::Cancelled)
            .await?
        {
            // A concurrent payment or cancellation committed first.
            let current = tx
                .order(order_id)
                .await?
                .ok_or(BookingError::OrderNotFound(order_id))?;
            warn!(status = %current.status, "Cancellation lost a race");
            return Err(BookingError::InvalidTransition {
                order_id,
                from: current.status,
                to: OrderStatus::Cancelled,
            });
        }
        let released = tx
            .release_reservations(&order.reservation_ids(), order.user_id)
            .await?;
        tx.commit().await?;

        order.status = OrderStatus::Cancelled;
        info!(released, "Order cancelled");
        metrics::record_order_cancelled();
        Ok(order)
    }
}
