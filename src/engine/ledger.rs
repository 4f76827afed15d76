use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::time::now_ms;

use super::conflict::{validate_span, validate_window};
use super::{Engine, EngineError};

fn validate_new_booking(new: &NewBooking) -> Result<(), EngineError> {
    validate_span(&new.span)?;
    if new.user_id.is_empty() {
        return Err(EngineError::InvalidInput("user_id is required"));
    }
    if new.user_id.len() > MAX_ID_LEN || new.resource.target_id().len() > MAX_ID_LEN {
        return Err(EngineError::LimitExceeded("id too long"));
    }
    if new.resource.target_id().is_empty() {
        return Err(EngineError::InvalidInput("resource reference is empty"));
    }
    if let ResourceRef::Property { room_type, .. } = &new.resource
        && (room_type.is_empty() || room_type.len() > MAX_NAME_LEN)
    {
        return Err(EngineError::InvalidInput("room_type must be 1..=256 bytes"));
    }
    if new.payment.total_amount < 0 {
        return Err(EngineError::InvalidInput("total_amount must not be negative"));
    }
    if new.payment.total_amount > MAX_TOTAL_AMOUNT {
        return Err(EngineError::LimitExceeded("total_amount too large"));
    }
    Ok(())
}

impl Engine {
    /// Record a new pending booking. No capacity is taken until it is
    /// allocated.
    pub async fn create_booking(&self, new: NewBooking) -> Result<Booking, EngineError> {
        validate_new_booking(&new)?;
        if self.bookings.len() >= MAX_BOOKINGS {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }
        let _gate = self.gate.read().await;

        let id = Ulid::new();
        let now = now_ms();
        let booking = Booking {
            id,
            reservation_number: reservation_number(id),
            user_id: new.user_id,
            resource: new.resource,
            span: new.span,
            status: BookingStatus::Pending,
            allocation: None,
            payment: new.payment,
            created_at: now,
            updated_at: now,
        };

        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.wal_append(&event).await?;
        self.bookings
            .insert(id, Arc::new(Mutex::new(booking.clone())));
        info!(
            "booking {} ({}) created for {:?}",
            booking.reservation_number,
            id,
            booking.booking_type()
        );
        Ok(booking)
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let handle = self.booking_handle(id)?;
        let booking = handle.lock().await;
        Ok(booking.clone())
    }

    /// Bookings matching every set field of `filter`, ordered by check-in.
    pub async fn find_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, EngineError> {
        if let Some(window) = &filter.window {
            validate_window(window)?;
        }
        let handles: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        let mut found = Vec::new();
        for handle in handles {
            let booking = handle.lock().await;
            if filter.matches(&booking) {
                found.push(booking.clone());
            }
        }
        found.sort_by(|a, b| a.span.start.cmp(&b.span.start).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    /// Move a booking through the ledger state machine. Entering a terminal
    /// state releases its allocation in the same write.
    pub async fn set_booking_status(&self, id: Ulid, status: BookingStatus) -> Result<Booking, EngineError> {
        let _gate = self.gate.read().await;
        let handle = self.booking_handle(id)?;
        let mut booking = handle.lock().await;
        booking.status.transition(status)?;

        let mut rs = self.lock_allocated_resource(&booking).await?;
        let event = Event::BookingStatusChanged {
            booking_id: id,
            status,
            at: now_ms(),
        };
        self.persist_booking_event(&mut booking, rs.as_deref_mut(), &event)
            .await?;
        info!("booking {} is now {status}", booking.reservation_number);
        Ok(booking.clone())
    }

    pub async fn confirm_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.set_booking_status(id, BookingStatus::Confirmed).await
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.set_booking_status(id, BookingStatus::Cancelled).await
    }
}
