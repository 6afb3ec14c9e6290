//! Business metrics for the booking pipeline.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `cinema_orders_total{status}` - Orders by outcome (created, cancelled, rejected)
//! - `cinema_payments_total{status}` - Payments by outcome (succeeded, failed)
//! - `cinema_payment_revenue_cents_total` - Total revenue in cents
//! - `cinema_tickets_sold_total` - Total tickets sold
//! - `cinema_ticket_scans_total{outcome}` - Door scans by outcome
//! - `cinema_reservations_swept_total` - Expired holds deleted by the sweeper
//! - `cinema_sweeper_failures_total` - Sweeper ticks that failed
//!
//! ## Histograms
//! - `cinema_payment_duration_seconds` - Payment processing time

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised while installing the Prometheus exporter.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Exporter configuration was rejected
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),

    /// Recorder or HTTP listener could not be installed
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must run inside a Tokio runtime.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be built or installed.
pub fn install_exporter(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    register_booking_metrics();
    tracing::info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Register descriptions of every booking metric.
///
/// Call once at startup, after the recorder is installed.
pub fn register_booking_metrics() {
    describe_counter!(
        "cinema_orders_total",
        "Total number of orders by status (created, cancelled, rejected)"
    );
    describe_counter!(
        "cinema_payments_total",
        "Total number of payments by status (succeeded, failed)"
    );
    describe_counter!(
        "cinema_payment_revenue_cents_total",
        "Total revenue from successful payments in cents"
    );
    describe_histogram!(
        "cinema_payment_duration_seconds",
        "Time taken to process a payment"
    );
    describe_counter!("cinema_tickets_sold_total", "Total number of tickets sold");
    describe_counter!(
        "cinema_ticket_scans_total",
        "Door scans by outcome (admitted, already_scanned, rejected)"
    );
    describe_counter!(
        "cinema_reservations_swept_total",
        "Expired seat holds deleted by the sweeper"
    );
    describe_counter!(
        "cinema_sweeper_failures_total",
        "Sweeper ticks that failed"
    );

    tracing::info!("Booking metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record an order created.
pub fn record_order_created(tickets: usize) {
    metrics::counter!("cinema_orders_total", "status" => "created").increment(1);
    tracing::debug!(tickets, "Recorded order_created metric");
}

/// Record an order request rejected by validation.
pub fn record_order_rejected(reason: &'static str) {
    metrics::counter!("cinema_orders_total", "status" => "rejected", "reason" => reason)
        .increment(1);
    tracing::debug!(reason, "Recorded order_rejected metric");
}

/// Record an order cancelled.
pub fn record_order_cancelled() {
    metrics::counter!("cinema_orders_total", "status" => "cancelled").increment(1);
    tracing::debug!("Recorded order_cancelled metric");
}

/// Record a payment succeeded.
///
/// # Arguments
///
/// * `amount_cents` - Payment amount in cents
/// * `tickets` - Tickets sold by the payment
/// * `duration_secs` - Time taken to process payment in seconds
pub fn record_payment_succeeded(amount_cents: u64, tickets: usize, duration_secs: f64) {
    metrics::counter!("cinema_payments_total", "status" => "succeeded").increment(1);
    metrics::counter!("cinema_payment_revenue_cents_total").increment(amount_cents);
    metrics::counter!("cinema_tickets_sold_total").increment(tickets as u64);
    metrics::histogram!("cinema_payment_duration_seconds").record(duration_secs);
    tracing::debug!(amount_cents, tickets, duration_secs, "Recorded payment_succeeded metric");
}

/// Record a payment failed.
///
/// # Arguments
///
/// * `reason` - Error kind label (e.g., "inconsistent", "storage")
pub fn record_payment_failed(reason: &'static str) {
    metrics::counter!("cinema_payments_total", "status" => "failed", "reason" => reason)
        .increment(1);
    tracing::debug!(reason, "Recorded payment_failed metric");
}

/// Record a door scan outcome.
pub fn record_ticket_scan(outcome: &'static str) {
    metrics::counter!("cinema_ticket_scans_total", "outcome" => outcome).increment(1);
    tracing::debug!(outcome, "Recorded ticket_scan metric");
}

/// Record holds removed by one sweeper tick.
pub fn record_reservations_swept(count: u64) {
    metrics::counter!("cinema_reservations_swept_total").increment(count);
}

/// Record a failed sweeper tick.
pub fn record_sweeper_failure() {
    metrics::counter!("cinema_sweeper_failures_total").increment(1);
}
