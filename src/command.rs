use serde::Deserialize;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

fn one() -> u32 {
    1
}

/// One request line, tagged by `"op"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    RegisterResource {
        resource_id: String,
        resource_type: ResourceType,
        #[serde(default)]
        name: Option<String>,
        capacity: u32,
        #[serde(default)]
        category: Category,
    },
    UpdateResource {
        resource_id: String,
        resource_type: ResourceType,
        #[serde(default)]
        name: Option<String>,
        capacity: u32,
    },
    ListResources {
        #[serde(default)]
        resource_type: Option<ResourceType>,
    },
    GetResource {
        resource_id: String,
        resource_type: ResourceType,
    },
    CreateBooking(NewBooking),
    GetBooking {
        booking_id: Ulid,
    },
    FindBookings(BookingFilter),
    SetBookingStatus {
        booking_id: Ulid,
        status: BookingStatus,
    },
    RescheduleBooking {
        booking_id: Ulid,
        span: Span,
    },
    CheckAvailability {
        resource_id: String,
        resource_type: ResourceType,
        span: Span,
        #[serde(default)]
        exclude_booking_id: Option<Ulid>,
    },
    FullyBooked {
        resource_id: String,
        resource_type: ResourceType,
        window: Span,
    },
    FindAvailableRooms {
        property_id: String,
        room_type: String,
        span: Span,
        #[serde(default = "one")]
        quantity: u32,
    },
    FindAvailableVehicles {
        vehicle_type: String,
        span: Span,
    },
    Allocate(AllocationRequest),
    UpdateStatus {
        booking_id: Ulid,
        status: AvailabilityStatus,
    },
    CheckIn {
        booking_id: Ulid,
    },
    CheckOut {
        booking_id: Ulid,
    },
    OccupancyStats {
        resource_type: ResourceType,
        window: Span,
    },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("empty request")]
    Empty,
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        "bad_request"
    }
}

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(CommandError::Empty);
    }
    Ok(serde_json::from_str(trimmed)?)
}
