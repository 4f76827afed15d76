//! Transition tables for a booking's ledger status and for the occupancy
//! state of its resource allocation. The engine is the only caller; every
//! status write goes through one of these functions.

use crate::engine::EngineError;
use crate::model::{AvailabilityStatus, BookingStatus};

impl AvailabilityStatus {
    /// ```text
    /// available   -> allocated
    /// allocated   -> occupied | available
    /// occupied    -> available
    /// maintenance -> available
    /// blocked     -> available
    /// any         -> maintenance | blocked
    /// ```
    pub fn can_transition_to(self, to: AvailabilityStatus) -> bool {
        use AvailabilityStatus::*;
        match (self, to) {
            (_, Maintenance | Blocked) => true,
            (Available, Allocated) => true,
            (Allocated, Occupied | Available) => true,
            (Occupied, Available) => true,
            (Maintenance | Blocked, Available) => true,
            _ => false,
        }
    }

    pub fn transition(self, to: AvailabilityStatus) -> Result<AvailabilityStatus, EngineError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(EngineError::IllegalTransition { from: self, to })
        }
    }
}

impl BookingStatus {
    /// ```text
    /// pending   -> confirmed | cancelled | no-show
    /// confirmed -> cancelled | completed | no-show
    /// ```
    /// Cancelled, completed and no-show are terminal.
    pub fn can_transition_to(self, to: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, to),
            (Pending, Confirmed | Cancelled | NoShow) | (Confirmed, Cancelled | Completed | NoShow)
        )
    }

    pub fn transition(self, to: BookingStatus) -> Result<BookingStatus, EngineError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(EngineError::InvalidStatus { from: self, to })
        }
    }
}
