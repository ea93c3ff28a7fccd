use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "parkbuddy_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "parkbuddy_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "parkbuddy_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "parkbuddy_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "parkbuddy_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "parkbuddy_tenants_active";

/// Histogram: snapshot flush duration in seconds.
pub const STORE_FLUSH_DURATION_SECONDS: &str = "parkbuddy_store_flush_duration_seconds";

/// Histogram: commits coalesced per snapshot flush.
pub const STORE_FLUSH_BATCH_SIZE: &str = "parkbuddy_store_flush_batch_size";

// ── Domain counters ─────────────────────────────────────────────

/// Counter: reservations accepted.
pub const BOOKINGS_TOTAL: &str = "parkbuddy_bookings_total";

/// Counter: check-in attempts. Labels: outcome (parked, rejected).
pub const CHECK_INS_TOTAL: &str = "parkbuddy_check_ins_total";

/// Counter: successful check-outs.
pub const CHECK_OUTS_TOTAL: &str = "parkbuddy_check_outs_total";

/// Counter: occupants evicted and fined.
pub const EVICTIONS_TOTAL: &str = "parkbuddy_evictions_total";

/// Counter: overstays detected by the watcher.
pub const OVERSTAYS_TOTAL: &str = "parkbuddy_overstays_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertLot { .. } => "insert_lot",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::CheckIn { .. } => "check_in",
        Command::CheckOut { .. } => "check_out",
        Command::SelectLots => "select_lots",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectSpots { .. } => "select_spots",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectHistory { .. } => "select_history",
        Command::SelectFines { .. } => "select_fines",
    }
}
