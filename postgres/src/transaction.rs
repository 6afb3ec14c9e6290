//! [`BookingTransaction`] over a sqlx `PostgreSQL` transaction.
//!
//! Writes rely on conditional `UPDATE ... WHERE status = <expected>` statements
//! rather than explicit row locks. Under READ COMMITTED a concurrent writer
//! blocks on the row and re-evaluates the predicate once the first commits, so
//! of a payment and a cancellation racing on one order only the first to
//! commit changes its status, and only one of two racing payments can
//! transition a reservation.

use crate::rows::{self, RESERVATION_COLUMNS, TICKET_COLUMNS, database, ids_to_db, to_db};
use chrono::{DateTime, Utc};
use cinema_core::store::{BookingTransaction, StoreError};
use cinema_core::types::{
    NewOrder, NewPayment, NewReservation, Order, OrderId, OrderStatus, Payment, PaymentId,
    ReservationId, SeatReservation, Ticket, TicketContext, TicketId, UserId,
};
use sqlx::{Postgres, Transaction};

/// An open `PostgreSQL` transaction.
///
/// Dropping it without [`BookingTransaction::commit`] rolls it back.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PostgresTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresTransaction").finish_non_exhaustive()
    }
}

impl PostgresTransaction {
    pub(crate) const fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self { tx }
    }

    async fn tickets_of(&mut self, order_id: i64) -> Result<Vec<Ticket>, StoreError> {
        let query = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE order_id = $1 ORDER BY id");
        let records = sqlx::query(&query)
            .bind(order_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(database)?;
        records.iter().map(rows::ticket).collect()
    }
}

impl BookingTransaction for PostgresTransaction {
    async fn reservations_by_ids(
        &mut self,
        ids: &[ReservationId],
    ) -> Result<Vec<SeatReservation>, StoreError> {
        let ids = ids_to_db(ids.iter().map(ReservationId::value))?;
        let query = format!(
            "SELECT {RESERVATION_COLUMNS} FROM seat_reservations WHERE id = ANY($1) ORDER BY id"
        );
        let records = sqlx::query(&query)
            .bind(ids)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(database)?;
        records.iter().map(rows::reservation).collect()
    }

    async fn hold_seat(
        &mut self,
        hold: NewReservation,
    ) -> Result<Option<SeatReservation>, StoreError> {
        let query = format!(
            r"
            INSERT INTO seat_reservations
                (session_id, seat_id, status, price_cents, reserved_at, expires_at, reserved_by)
            VALUES ($1, $2, 0, $3, $4, $5, $6)
            ON CONFLICT (session_id, seat_id) DO UPDATE SET
                status = 0,
                price_cents = EXCLUDED.price_cents,
                reserved_at = EXCLUDED.reserved_at,
                expires_at = EXCLUDED.expires_at,
                reserved_by = EXCLUDED.reserved_by,
                ticket_id = NULL
            WHERE seat_reservations.status = 0
              AND (seat_reservations.reserved_by IS NULL
                   OR seat_reservations.expires_at <= EXCLUDED.reserved_at)
            RETURNING {RESERVATION_COLUMNS}
            "
        );
        let row = sqlx::query(&query)
            .bind(to_db(hold.session_id.value())?)
            .bind(to_db(hold.seat_id.value())?)
            .bind(to_db(hold.price.cents())?)
            .bind(hold.reserved_at)
            .bind(hold.expires_at)
            .bind(to_db(hold.reserved_by.value())?)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(database)?;
        row.as_ref().map(rows::reservation).transpose()
    }

    async fn mark_reservations_sold(
        &mut self,
        sales: &[(ReservationId, TicketId)],
        owner: UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let reservation_ids = ids_to_db(sales.iter().map(|(id, _)| id.value()))?;
        let ticket_ids = ids_to_db(sales.iter().map(|(_, ticket)| ticket.value()))?;
        let result = sqlx::query(
            r"
            UPDATE seat_reservations r
            SET status = 1, ticket_id = s.ticket_id
            FROM UNNEST($1::BIGINT[], $2::BIGINT[]) AS s(id, ticket_id)
            WHERE r.id = s.id
              AND r.status = 0
              AND r.reserved_by = $3
              AND (r.expires_at IS NULL OR r.expires_at > $4)
            ",
        )
        .bind(reservation_ids)
        .bind(ticket_ids)
        .bind(to_db(owner.value())?)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(database)?;
        Ok(result.rows_affected())
    }

    async fn release_reservations(
        &mut self,
        ids: &[ReservationId],
        owner: UserId,
    ) -> Result<u64, StoreError> {
        let ids = ids_to_db(ids.iter().map(ReservationId::value))?;
        let result = sqlx::query(
            r"
            UPDATE seat_reservations
            SET reserved_by = NULL, expires_at = NULL
            WHERE id = ANY($1) AND status = 0 AND reserved_by = $2
            ",
        )
        .bind(ids)
        .bind(to_db(owner.value())?)
        .execute(&mut *self.tx)
        .await
        .map_err(database)?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_reservations(
        &mut self,
        before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM seat_reservations WHERE status = 0 AND expires_at < $1")
                .bind(before)
                .execute(&mut *self.tx)
                .await
                .map_err(database)?;
        Ok(result.rows_affected())
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError> {
        let (order_id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO orders (user_id, session_id, created_at, status)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            ",
        )
        .bind(to_db(order.user_id.value())?)
        .bind(to_db(order.session_id.value())?)
        .bind(order.created_at)
        .bind(i16::from(order.status.code()))
        .fetch_one(&mut *self.tx)
        .await
        .map_err(database)?;

        for ticket in &order.tickets {
            sqlx::query(
                r"
                INSERT INTO tickets (order_id, seat_reservation_id, price_cents)
                VALUES ($1, $2, $3)
                ",
            )
            .bind(order_id)
            .bind(to_db(ticket.seat_reservation_id.value())?)
            .bind(to_db(ticket.price.cents())?)
            .execute(&mut *self.tx)
            .await
            .map_err(rows::insert_error)?;
        }

        let tickets = self.tickets_of(order_id).await?;
        tracing::debug!(order_id, tickets = tickets.len(), "Order rows inserted");

        Ok(Order {
            id: OrderId::new(rows::from_db(order_id, "orders.id")?),
            user_id: order.user_id,
            session_id: order.session_id,
            created_at: order.created_at,
            status: order.status,
            payment: None,
            tickets,
        })
    }

    async fn order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let order_id = to_db(id.value())?;
        let Some(row) = sqlx::query(
            "SELECT user_id, session_id, created_at, status FROM orders WHERE id = $1",
        )
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(database)?
        else {
            return Ok(None);
        };

        let user_id = rows::user(&row, "user_id")?;
        let session_id = rows::session(&row, "session_id")?;
        let created_at = rows::timestamp(&row, "created_at")?;
        let status = rows::order_status(&row, "status")?;

        let tickets = self.tickets_of(order_id).await?;
        let payment = sqlx::query(
            r"
            SELECT id, order_id, amount_cents, method, paid_at, transaction_id
            FROM payments WHERE order_id = $1
            ",
        )
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(database)?
        .as_ref()
        .map(rows::payment)
        .transpose()?;

        Ok(Some(Order {
            id,
            user_id,
            session_id,
            created_at,
            status,
            payment,
            tickets,
        }))
    }

    async fn set_order_status(
        &mut self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE orders SET status = $3 WHERE id = $1 AND status = $2")
            .bind(to_db(id.value())?)
            .bind(i16::from(from.code()))
            .bind(i16::from(to.code()))
            .execute(&mut *self.tx)
            .await
            .map_err(database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO payments (order_id, amount_cents, method, paid_at, transaction_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            ",
        )
        .bind(to_db(payment.order_id.value())?)
        .bind(to_db(payment.amount.cents())?)
        .bind(i16::from(payment.method.code()))
        .bind(payment.paid_at)
        .bind(&payment.transaction_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(rows::insert_error)?;

        Ok(Payment {
            id: PaymentId::new(rows::from_db(id, "payments.id")?),
            order_id: payment.order_id,
            amount: payment.amount,
            method: payment.method,
            paid_at: payment.paid_at,
            transaction_id: payment.transaction_id,
        })
    }

    async fn ticket_context(&mut self, id: TicketId) -> Result<Option<TicketContext>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT
                t.id, t.order_id, t.seat_reservation_id, t.price_cents,
                t.scanned_at, t.scanned_by, t.scan_code,
                o.session_id AS order_session_id, o.status AS order_status,
                r.session_id AS reservation_session_id,
                sc.movie_title, sc.hall_name, sc.starts_at,
                s.seat_id AS seat_seat_id, s.seat_row, s.seat_column, s.kind AS seat_kind
            FROM tickets t
            JOIN orders o ON o.id = t.order_id
            LEFT JOIN seat_reservations r ON r.id = t.seat_reservation_id
            LEFT JOIN screenings sc ON sc.session_id = o.session_id
            LEFT JOIN seats s ON s.seat_id = r.seat_id
            WHERE t.id = $1
            ",
        )
        .bind(to_db(id.value())?)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(database)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let order_session_id = rows::session(&row, "order_session_id")?;
        Ok(Some(TicketContext {
            ticket: rows::ticket(&row)?,
            order_session_id,
            order_status: rows::order_status(&row, "order_status")?,
            reservation_session_id: rows::optional_session(&row, "reservation_session_id")?,
            screening: rows::screening(&row, order_session_id)?,
            seat: rows::seat(&row)?,
        }))
    }

    async fn record_ticket_scan(
        &mut self,
        id: TicketId,
        scanned_at: DateTime<Utc>,
        scanned_by: UserId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE tickets SET scanned_at = $2, scanned_by = $3
            WHERE id = $1 AND scanned_at IS NULL
            ",
        )
        .bind(to_db(id.value())?)
        .bind(scanned_at)
        .bind(to_db(scanned_by.value())?)
        .execute(&mut *self.tx)
        .await
        .map_err(database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_ticket_scan_code(
        &mut self,
        id: TicketId,
        scan_code: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE tickets SET scan_code = $2 WHERE id = $1")
            .bind(to_db(id.value())?)
            .bind(scan_code)
            .execute(&mut *self.tx)
            .await
            .map_err(database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(database)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(database)
    }
}
