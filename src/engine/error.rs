use thiserror::Error;
use ulid::Ulid;

use crate::model::{AvailabilityStatus, BookingStatus, ResourceKey};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Booking not found: {0}")]
    BookingNotFound(Ulid),
    #[error("Resource not found: {0}")]
    ResourceNotFound(ResourceKey),
    #[error("invalid date range: check-in must be before check-out")]
    InvalidRange,
    #[error("capacity exceeded: requested {requested}, available {available}")]
    CapacityExceeded { requested: u32, available: u32 },
    #[error("illegal allocation transition {from} -> {to}")]
    IllegalTransition {
        from: AvailabilityStatus,
        to: AvailabilityStatus,
    },
    #[error("illegal booking transition {from} -> {to}")]
    InvalidStatus { from: BookingStatus, to: BookingStatus },
    #[error("booking {booking} already holds {resource}; release it first")]
    AlreadyAllocated { booking: Ulid, resource: ResourceKey },
    #[error("booking {0} has no resource allocation")]
    NotAllocated(Ulid),
    #[error("booking {booking}: {reason}")]
    InvalidState { booking: Ulid, reason: &'static str },
    #[error("resource already registered: {0}")]
    ResourceExists(ResourceKey),
    #[error("capacity {capacity} is below the {load} units already allocated")]
    CapacityBelowLoad { capacity: u32, load: u32 },
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable code for the wire.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::BookingNotFound(_) | EngineError::ResourceNotFound(_) => "not_found",
            EngineError::InvalidRange => "invalid_range",
            EngineError::CapacityExceeded { .. } => "capacity_exceeded",
            EngineError::IllegalTransition { .. } | EngineError::InvalidStatus { .. } => "illegal_transition",
            EngineError::AlreadyAllocated { .. } => "already_allocated",
            EngineError::NotAllocated(_) => "not_allocated",
            EngineError::InvalidState { .. } => "invalid_state",
            EngineError::ResourceExists(_) => "already_exists",
            EngineError::CapacityBelowLoad { .. } => "capacity_below_load",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "persistence_failure",
            EngineError::Internal(_) => "internal",
        }
    }
}
