//! Prometheus metrics for the reservation engine.
//!
//! Counters and histograms for:
//! - Booking outcomes and latency
//! - Ledger entries by kind
//! - Scheduler transitions
//! - Withdrawal decisions
//! - Payout retries
//!
//! # Example
//!
//! ```rust,no_run
//! use slotbook_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use slotbook_core::ledger::EntryKind;
use slotbook_core::slot::SlotStatus;
use slotbook_core::{ErrorKind, SlotbookError};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder and spawn the HTTP exporter.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or its listener cannot bind.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs a
    /// warning and returns `Ok` without serving.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        tokio::spawn(async move {
            if let Err(e) = exporter.await {
                tracing::error!(error = ?e, "Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "slotbook_bookings_total",
        "Booking attempts by outcome"
    );
    describe_histogram!(
        "slotbook_booking_duration_seconds",
        "Time taken to run the booking protocol"
    );
    describe_counter!(
        "slotbook_ledger_entries_total",
        "Ledger entries committed by kind"
    );
    describe_counter!(
        "slotbook_scheduler_transitions_total",
        "Slot status transitions by target status and source (scheduler or admin)"
    );
    describe_counter!(
        "slotbook_slots_removed_total",
        "Slots removed by admins"
    );
    describe_counter!(
        "slotbook_orphaned_bookings_cancelled_total",
        "Confirmed bookings cancelled and refunded because their slot was removed"
    );
    describe_counter!(
        "slotbook_scheduler_failures_total",
        "Per-slot failures during scheduler ticks"
    );
    describe_counter!(
        "slotbook_withdrawals_total",
        "Withdrawal requests and decisions by outcome"
    );
    describe_counter!(
        "slotbook_store_errors_total",
        "Database failures in the PostgreSQL store by operation"
    );
    describe_counter!(
        "slotbook_retry_attempts_total",
        "Total number of retry attempts"
    );
    describe_counter!(
        "slotbook_retry_successes_total",
        "Total number of successful retries"
    );
    describe_counter!(
        "slotbook_retry_exhausted_total",
        "Total number of operations that exhausted max retries"
    );
}

/// Outcome label for a booking or withdrawal result.
#[must_use]
pub fn outcome_label<T>(result: &Result<T, SlotbookError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => match e.kind() {
            ErrorKind::Validation => "invalid",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::NotFound => "not_found",
            ErrorKind::State => "invalid_state",
            ErrorKind::Upstream => "upstream_error",
            ErrorKind::Storage => "storage_error",
        },
    }
}

/// Booking metrics recorder.
pub struct BookingMetrics;

impl BookingMetrics {
    /// Record one run of the booking protocol.
    pub fn record(outcome: &'static str, duration: Duration) {
        counter!("slotbook_bookings_total", "outcome" => outcome).increment(1);
        histogram!("slotbook_booking_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Ledger metrics recorder.
pub struct LedgerMetrics;

impl LedgerMetrics {
    /// Record a committed entry.
    pub fn record_entry(kind: EntryKind) {
        counter!("slotbook_ledger_entries_total", "kind" => kind.as_str()).increment(1);
    }
}

/// Scheduler metrics recorder.
pub struct SchedulerMetrics;

impl SchedulerMetrics {
    /// Record a status transition made by `source` (`scheduler` or `admin`).
    pub fn record_transition(target: SlotStatus, source: &'static str) {
        counter!(
            "slotbook_scheduler_transitions_total",
            "target" => target.as_str(),
            "source" => source
        )
        .increment(1);
    }

    /// Record an admin slot removal.
    pub fn record_removal() {
        counter!("slotbook_slots_removed_total").increment(1);
    }

    /// Record bookings cancelled because their slot is gone.
    pub fn record_orphans_cancelled(count: usize) {
        counter!("slotbook_orphaned_bookings_cancelled_total").increment(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Record a per-slot failure.
    pub fn record_failure() {
        counter!("slotbook_scheduler_failures_total").increment(1);
    }
}

/// Withdrawal metrics recorder.
pub struct WithdrawalMetrics;

impl WithdrawalMetrics {
    /// Record a withdrawal step (`requested`, `claimed`, `released`, `approved`,
    /// `rejected`) and its outcome.
    pub fn record(step: &'static str, outcome: &'static str) {
        counter!("slotbook_withdrawals_total", "step" => step, "outcome" => outcome).increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("slotbook_retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("slotbook_retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("slotbook_retry_exhausted_total").increment(1);
    }
}
