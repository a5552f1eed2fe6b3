use std::net::SocketAddr;

use crate::model::Availability;

// ── Query metrics ───────────────────────────────────────────────

/// Counter: listings evaluated. Labels: op, outcome (available/unavailable/unknown).
pub const AVAILABILITY_TOTAL: &str = "incasa_availability_total";

/// Histogram: availability call latency in seconds. Labels: op.
pub const QUERY_DURATION_SECONDS: &str = "incasa_query_duration_seconds";

/// Counter: store reads that failed or timed out. Labels: store, reason.
pub const STORE_FAILURES_TOTAL: &str = "incasa_store_failures_total";

/// Counter: cache lookups. Labels: result (hit/miss).
pub const CACHE_LOOKUPS_TOTAL: &str = "incasa_cache_lookups_total";

/// Counter: cache entries dropped for a listing.
pub const CACHE_INVALIDATIONS_TOTAL: &str = "incasa_cache_invalidations_total";

// ── Reservation flow ────────────────────────────────────────────

/// Counter: reservation writes. Labels: op, status (ok/error).
pub const RESERVATIONS_TOTAL: &str = "incasa_reservations_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "incasa_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "incasa_wal_flush_batch_size";

/// Install the fmt tracing subscriber. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().try_init();
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

pub fn outcome_label(a: Availability) -> &'static str {
    match a {
        Availability::Available => "available",
        Availability::Unavailable => "unavailable",
        Availability::Unknown => "unknown",
    }
}
