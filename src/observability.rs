use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "lodge_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "lodge_query_duration_seconds";

/// Counter: admission decisions. Labels: outcome (`admitted` or the rejection reason).
pub const ADMISSIONS_TOTAL: &str = "lodge_admissions_total";

// ── Resource metrics ────────────────────────────────────────────

/// Gauge: open client connections.
pub const CONNECTIONS_ACTIVE: &str = "lodge_connections_active";

/// Counter: connections accepted.
pub const CONNECTIONS_TOTAL: &str = "lodge_connections_total";

/// Counter: connections turned away at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "lodge_connections_rejected_total";

/// Counter: failed logins.
pub const AUTH_FAILURES_TOTAL: &str = "lodge_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "lodge_wal_flush_duration_seconds";

/// Histogram: events per WAL flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "lodge_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "lodge_wal_compactions_total";

/// Serve Prometheus metrics on `port`. Without a port, metrics calls stay no-ops.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://{addr}/metrics");
    Ok(())
}

/// Short metrics label for a parsed statement.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertCabin { .. } => "insert_cabin",
        Command::DeleteCabin { .. } => "delete_cabin",
        Command::InsertGuest { .. } => "insert_guest",
        Command::DeleteGuest { .. } => "delete_guest",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::InsertPayment { .. } => "insert_payment",
        Command::SelectCabins { .. } => "select_cabins",
        Command::SelectGuests { .. } => "select_guests",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectPayments { .. } => "select_payments",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectStayCheck { .. } => "select_stay_check",
        Command::SelectRevenue { .. } => "select_revenue",
        Command::SelectRevenueTotal { .. } => "select_revenue_total",
    }
}
