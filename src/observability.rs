use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotbook_query_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: bookings accepted and persisted.
pub const BOOKINGS_CREATED_TOTAL: &str = "slotbook_bookings_created_total";

/// Counter: submissions rejected because the slot was not free.
pub const BOOKING_CONFLICTS_TOTAL: &str = "slotbook_booking_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotbook_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "slotbook_tenants_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "slotbook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertBusiness { .. } => "insert_business",
        Command::UpdateBusiness { .. } => "update_business",
        Command::DeleteBusiness { .. } => "delete_business",
        Command::ReplaceWeeklyHours { .. } => "replace_weekly_hours",
        Command::InsertBreak { .. } => "insert_break",
        Command::DeleteBreak { .. } => "delete_break",
        Command::InsertHoliday { .. } => "insert_holiday",
        Command::DeleteHoliday { .. } => "delete_holiday",
        Command::InsertBlockedSlot { .. } => "insert_blocked_slot",
        Command::DeleteBlockedSlot { .. } => "delete_blocked_slot",
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBookingStatus { .. } => "update_booking_status",
        Command::SelectBusinesses => "select_businesses",
        Command::SelectWeeklyHours { .. } => "select_weekly_hours",
        Command::SelectBreaks { .. } => "select_breaks",
        Command::SelectHolidays { .. } => "select_holidays",
        Command::SelectBlockedSlots { .. } => "select_blocked_slots",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectAvailability { .. } => "select_availability",
        Command::Listen { .. } => "listen",
    }
}
