use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;

use crate::command::{parse_command, Command};
use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::ResourceKey;
use crate::observability::{command_label, COMMANDS_TOTAL, COMMAND_DURATION_SECONDS};

/// One response line: `{"success":true,"data":..}` or
/// `{"success":false,"message":..,"error":<code>}`.
#[derive(Debug, Serialize, PartialEq)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error: None,
        }
    }

    pub fn failure(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            error: Some(code),
        }
    }

    fn to_line(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"success":false,"error":"internal"}"#.to_string())
    }
}

impl From<EngineError> for Response {
    fn from(e: EngineError) -> Self {
        Response::failure(e.code(), e.to_string())
    }
}

fn to_data<T: Serialize>(value: T) -> Result<Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::Internal(format!("encode response: {e}")))
}

/// Run one command against the engine.
pub async fn execute(engine: &Engine, cmd: Command) -> Result<Value, EngineError> {
    match cmd {
        Command::RegisterResource {
            resource_id,
            resource_type,
            name,
            capacity,
            category,
        } => to_data(
            engine
                .register_resource(ResourceKey::new(resource_id, resource_type), name, capacity, category)
                .await?,
        ),
        Command::UpdateResource {
            resource_id,
            resource_type,
            name,
            capacity,
        } => to_data(
            engine
                .update_resource(&ResourceKey::new(resource_id, resource_type), name, capacity)
                .await?,
        ),
        Command::ListResources { resource_type } => to_data(engine.list_resources(resource_type).await),
        Command::GetResource {
            resource_id,
            resource_type,
        } => to_data(
            engine
                .get_resource_info(&ResourceKey::new(resource_id, resource_type))
                .await?,
        ),
        Command::CreateBooking(new) => to_data(engine.create_booking(new).await?),
        Command::GetBooking { booking_id } => to_data(engine.get_booking(booking_id).await?),
        Command::FindBookings(filter) => to_data(engine.find_bookings(&filter).await?),
        Command::SetBookingStatus { booking_id, status } => {
            to_data(engine.set_booking_status(booking_id, status).await?)
        }
        Command::RescheduleBooking { booking_id, span } => {
            to_data(engine.reschedule_booking(booking_id, span).await?)
        }
        Command::CheckAvailability {
            resource_id,
            resource_type,
            span,
            exclude_booking_id,
        } => to_data(
            engine
                .check_resource_availability(&ResourceKey::new(resource_id, resource_type), span, exclude_booking_id)
                .await?,
        ),
        Command::FullyBooked {
            resource_id,
            resource_type,
            window,
        } => to_data(
            engine
                .fully_booked_periods(&ResourceKey::new(resource_id, resource_type), window)
                .await?,
        ),
        Command::FindAvailableRooms {
            property_id,
            room_type,
            span,
            quantity,
        } => to_data(
            engine
                .find_available_rooms(&property_id, &room_type, span, quantity)
                .await?,
        ),
        Command::FindAvailableVehicles { vehicle_type, span } => {
            to_data(engine.find_available_vehicles(&vehicle_type, span).await?)
        }
        Command::Allocate(req) => to_data(engine.allocate_resource(req).await?),
        Command::UpdateStatus { booking_id, status } => {
            to_data(engine.update_resource_status(booking_id, status).await?)
        }
        Command::CheckIn { booking_id } => to_data(engine.check_in(booking_id).await?),
        Command::CheckOut { booking_id } => to_data(engine.check_out(booking_id).await?),
        Command::OccupancyStats { resource_type, window } => {
            to_data(engine.get_resource_occupancy_stats(resource_type, window).await?)
        }
    }
}

/// Parse, execute and time one request line.
pub async fn handle_line(engine: &Engine, line: &str) -> Response {
    let cmd = match parse_command(line) {
        Ok(cmd) => cmd,
        Err(e) => {
            metrics::counter!(COMMANDS_TOTAL, "command" => "invalid", "status" => "error").increment(1);
            return Response::failure(e.code(), e.to_string());
        }
    };

    let label = command_label(&cmd);
    let start = Instant::now();
    let result = execute(engine, cmd).await;
    metrics::histogram!(COMMAND_DURATION_SECONDS, "command" => label).record(start.elapsed().as_secs_f64());

    match result {
        Ok(data) => {
            metrics::counter!(COMMANDS_TOTAL, "command" => label, "status" => "ok").increment(1);
            Response::ok(data)
        }
        Err(e) => {
            metrics::counter!(COMMANDS_TOTAL, "command" => label, "status" => "error").increment(1);
            debug!("{label} failed: {e}");
            Response::from(e)
        }
    }
}

/// Serve one client: one JSON request per line, one JSON response per line.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> Result<(), LinesCodecError> {
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    while let Some(next) = lines.next().await {
        let line = match next {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                let resp = Response::failure("line_too_long", format!("request exceeds {MAX_LINE_LEN} bytes"));
                lines.send(resp.to_line()).await?;
                return Err(LinesCodecError::MaxLineLengthExceeded);
            }
            Err(e) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }
        let resp = handle_line(&engine, &line).await;
        lines.send(resp.to_line()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_shape() {
        let line = Response::ok(json!({"n": 1})).to_line();
        assert_eq!(line, r#"{"success":true,"data":{"n":1}}"#);
    }

    #[test]
    fn failure_shape_carries_code() {
        let resp = Response::from(EngineError::NotAllocated(ulid::Ulid::nil()));
        let value: Value = serde_json::from_str(&resp.to_line()).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["error"], json!("not_allocated"));
        assert!(value.get("data").is_none());
        assert!(value["message"].as_str().unwrap().contains("no resource allocation"));
    }
}
