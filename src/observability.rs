use std::net::SocketAddr;

use crate::command::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "vacancy_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "vacancy_command_duration_seconds";

/// Counter: allocations committed.
pub const ALLOCATIONS_ACCEPTED_TOTAL: &str = "vacancy_allocations_accepted_total";

/// Counter: allocations refused for lack of capacity.
pub const ALLOCATIONS_REJECTED_TOTAL: &str = "vacancy_allocations_rejected_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "vacancy_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "vacancy_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "vacancy_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "vacancy_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "vacancy_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "vacancy_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), String> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus exporter: {e}"))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metric label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::RegisterResource { .. } => "register_resource",
        Command::UpdateResource { .. } => "update_resource",
        Command::ListResources { .. } => "list_resources",
        Command::GetResource { .. } => "get_resource",
        Command::CreateBooking(_) => "create_booking",
        Command::GetBooking { .. } => "get_booking",
        Command::FindBookings(_) => "find_bookings",
        Command::SetBookingStatus { .. } => "set_booking_status",
        Command::RescheduleBooking { .. } => "reschedule_booking",
        Command::CheckAvailability { .. } => "check_availability",
        Command::FullyBooked { .. } => "fully_booked",
        Command::FindAvailableRooms { .. } => "find_available_rooms",
        Command::FindAvailableVehicles { .. } => "find_available_vehicles",
        Command::Allocate(_) => "allocate",
        Command::UpdateStatus { .. } => "update_status",
        Command::CheckIn { .. } => "check_in",
        Command::CheckOut { .. } => "check_out",
        Command::OccupancyStats { .. } => "occupancy_stats",
    }
}
