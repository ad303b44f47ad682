use std::net::SocketAddr;
use std::time::Instant;

use tracing_subscriber::EnvFilter;

use crate::engine::SchedulingError;

// ── RED metrics (operation-driven) ──────────────────────────────

/// Counter: engine operations. Labels: op, status.
pub const OPERATIONS_TOTAL: &str = "cadence_operations_total";

/// Histogram: operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "cadence_operation_duration_seconds";

/// Counter: rejected operations. Labels: op, reason.
pub const REJECTIONS_TOTAL: &str = "cadence_rejections_total";

// ── Scheduling ──────────────────────────────────────────────────

/// Counter: sessions committed, parents and generated occurrences alike.
pub const SESSIONS_BOOKED_TOTAL: &str = "cadence_sessions_booked_total";

/// Counter: generated occurrences accepted into a series.
pub const RECURRENCE_CREATED_TOTAL: &str = "cadence_recurrence_created_total";

/// Counter: generated occurrences dropped because they conflicted.
pub const RECURRENCE_SKIPPED_TOTAL: &str = "cadence_recurrence_skipped_total";

/// Counter: credits taken from packages.
pub const CREDITS_DEDUCTED_TOTAL: &str = "cadence_credits_deducted_total";

/// Counter: credits handed back to packages.
pub const CREDITS_REFUNDED_TOTAL: &str = "cadence_credits_refunded_total";

/// Gauge: tenants with a loaded schedule.
pub const SCHEDULES_LOADED: &str = "cadence_schedules_loaded";

// ── Notifications ───────────────────────────────────────────────

pub const NOTIFICATIONS_SENT_TOTAL: &str = "cadence_notifications_sent_total";
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "cadence_notifications_failed_total";
pub const NOTIFICATIONS_DROPPED_TOTAL: &str = "cadence_notifications_dropped_total";

// ── WAL ─────────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "cadence_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "cadence_wal_flush_batch_size";

/// Counter: completed compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "cadence_wal_compactions_total";

/// Install the fmt subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Record count, latency and rejection reason for one engine operation.
pub(crate) fn record<T>(op: &'static str, started: Instant, result: &Result<T, SchedulingError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(e) => {
            metrics::counter!(REJECTIONS_TOTAL, "op" => op, "reason" => e.label()).increment(1);
            "error"
        }
    };
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
}
