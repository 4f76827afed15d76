use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{ALLOCATIONS_ACCEPTED_TOTAL, ALLOCATIONS_REJECTED_TOTAL};
use crate::time::now_ms;

use super::availability::peak_load;
use super::conflict::{check_capacity, validate_span};
use super::{Engine, EngineError, SharedResourceState, WalCommand};

fn validate_resource(key: &ResourceKey, name: Option<&str>, capacity: u32) -> Result<(), EngineError> {
    if key.resource_id.is_empty() {
        return Err(EngineError::InvalidInput("resource_id is required"));
    }
    if key.resource_id.len() > MAX_ID_LEN {
        return Err(EngineError::LimitExceeded("resource_id too long"));
    }
    if name.is_some_and(|n| n.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("resource name too long"));
    }
    if capacity == 0 {
        return Err(EngineError::InvalidInput("capacity must be at least 1"));
    }
    if capacity > MAX_CAPACITY {
        return Err(EngineError::LimitExceeded("capacity too large"));
    }
    Ok(())
}

fn validate_allocation(req: &AllocationRequest) -> Result<(), EngineError> {
    validate_resource(&req.resource, Some(&req.resource_name), req.capacity)?;
    if req.quantity == 0 {
        return Err(EngineError::InvalidInput("quantity must be at least 1"));
    }
    if req.quantity > MAX_CAPACITY {
        return Err(EngineError::LimitExceeded("quantity too large"));
    }
    if req.assigned_by.as_ref().is_some_and(|a| a.len() > MAX_ID_LEN) {
        return Err(EngineError::LimitExceeded("assigned_by too long"));
    }
    if req.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

impl Engine {
    // ── Catalog ──────────────────────────────────────────────

    pub async fn register_resource(
        &self,
        key: ResourceKey,
        name: Option<String>,
        capacity: u32,
        category: Category,
    ) -> Result<ResourceInfo, EngineError> {
        validate_resource(&key, name.as_deref(), capacity)?;
        let _gate = self.gate.read().await;
        let _registry = self.registry.lock().await;
        if self.resources.contains_key(&key) {
            return Err(EngineError::ResourceExists(key));
        }
        let rs = self.register_locked(key, name, capacity, category).await?;
        let guard = rs.read().await;
        Ok(guard.info())
    }

    /// Caller holds `registry` and has checked the key is free.
    async fn register_locked(
        &self,
        key: ResourceKey,
        name: Option<String>,
        capacity: u32,
        category: Category,
    ) -> Result<SharedResourceState, EngineError> {
        if self.resources.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        let event = Event::ResourceRegistered {
            key: key.clone(),
            name: name.clone(),
            capacity,
            category: category.clone(),
        };
        self.wal_append(&event).await?;
        let rs = Arc::new(RwLock::new(ResourceState::new(key.clone(), name, capacity, category)));
        self.resources.insert(key.clone(), rs.clone());
        info!("resource {key} registered with capacity {capacity}");
        Ok(rs)
    }

    /// Catalog entry for `key`, registering it with the caller's declared
    /// capacity on first sight.
    async fn ensure_resource(
        &self,
        key: &ResourceKey,
        name: &str,
        capacity: u32,
    ) -> Result<SharedResourceState, EngineError> {
        if let Some(rs) = self.get_resource(key) {
            return Ok(rs);
        }
        let _registry = self.registry.lock().await;
        if let Some(rs) = self.get_resource(key) {
            return Ok(rs);
        }
        self.register_locked(key.clone(), Some(name.to_string()), capacity, Category::General)
            .await
    }

    /// Rename or resize a resource. Capacity may not drop below the load
    /// already allocated at any instant.
    pub async fn update_resource(
        &self,
        key: &ResourceKey,
        name: Option<String>,
        capacity: u32,
    ) -> Result<ResourceInfo, EngineError> {
        validate_resource(key, name.as_deref(), capacity)?;
        let _gate = self.gate.read().await;
        let rs = self
            .get_resource(key)
            .ok_or_else(|| EngineError::ResourceNotFound(key.clone()))?;
        let mut guard = rs.write().await;

        let everything = Span {
            start: Ms::MIN,
            end: Ms::MAX,
        };
        let load = peak_load(guard.allocations.iter().map(|a| (&a.span, a.quantity)), &everything);
        if capacity < load {
            return Err(EngineError::CapacityBelowLoad { capacity, load });
        }

        let event = Event::ResourceUpdated {
            key: key.clone(),
            name: name.clone(),
            capacity,
        };
        self.wal_append(&event).await?;
        guard.name = name;
        guard.capacity = capacity;
        info!("resource {key} capacity set to {capacity}");
        Ok(guard.info())
    }

    // ── Allocation ───────────────────────────────────────────

    /// Atomic check-and-reserve: capacity is re-validated under the resource's
    /// write lock, so two callers can never both take the last unit.
    pub async fn allocate_resource(&self, req: AllocationRequest) -> Result<Booking, EngineError> {
        validate_allocation(&req)?;
        let _gate = self.gate.read().await;
        let handle = self.booking_handle(req.booking_id)?;
        let mut booking = handle.lock().await;

        if !booking.status.is_active() {
            return Err(EngineError::InvalidState {
                booking: booking.id,
                reason: "booking is closed",
            });
        }
        if let Some(current) = &booking.allocation {
            if current.status.holds_capacity() && current.resource != req.resource {
                return Err(EngineError::AlreadyAllocated {
                    booking: booking.id,
                    resource: current.resource.clone(),
                });
            }
            // Re-allocating on the same resource resizes the allocation.
            if current.status != AvailabilityStatus::Allocated {
                current.status.transition(AvailabilityStatus::Allocated)?;
            }
        }

        let rs = self
            .ensure_resource(&req.resource, &req.resource_name, req.capacity)
            .await?;
        let mut rs = rs.write_owned().await;
        if rs.capacity != req.capacity {
            warn!(
                "allocation for {} declares capacity {} but {} is catalogued with {}; using catalog",
                booking.reservation_number, req.capacity, rs.key, rs.capacity
            );
        }
        if rs.allocations.len() >= MAX_ALLOCATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many allocations on resource"));
        }

        if let Err(e) = check_capacity(&rs, &booking.span, req.quantity, Some(booking.id)) {
            metrics::counter!(ALLOCATIONS_REJECTED_TOTAL).increment(1);
            info!("allocation of {} for {} rejected: {e}", rs.key, booking.reservation_number);
            return Err(e);
        }

        let at = now_ms();
        let event = Event::AllocationAssigned {
            booking_id: booking.id,
            allocation: ResourceAllocation {
                resource: req.resource,
                resource_name: req.resource_name,
                capacity: rs.capacity,
                quantity: req.quantity,
                status: AvailabilityStatus::Allocated,
                assigned_by: req.assigned_by,
                assigned_at: at,
                notes: req.notes,
            },
            at,
        };
        self.persist_booking_event(&mut booking, Some(&mut *rs), &event)
            .await?;
        metrics::counter!(ALLOCATIONS_ACCEPTED_TOTAL).increment(1);
        info!(
            "allocated {} x{} to {}",
            rs.key, req.quantity, booking.reservation_number
        );
        Ok(booking.clone())
    }

    /// Move a booking's allocation through the occupancy state machine.
    /// A transition that makes the booking hold units again re-checks capacity.
    pub async fn update_resource_status(
        &self,
        booking_id: Ulid,
        status: AvailabilityStatus,
    ) -> Result<Booking, EngineError> {
        self.transition_allocation(booking_id, status).await
    }

    /// `allocated -> occupied` for a confirmed booking.
    pub async fn check_in(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition_allocation(booking_id, AvailabilityStatus::Occupied).await
    }

    async fn transition_allocation(&self, booking_id: Ulid, status: AvailabilityStatus) -> Result<Booking, EngineError> {
        let _gate = self.gate.read().await;
        let handle = self.booking_handle(booking_id)?;
        let mut booking = handle.lock().await;
        if status == AvailabilityStatus::Occupied && booking.status != BookingStatus::Confirmed {
            return Err(EngineError::InvalidState {
                booking: booking_id,
                reason: "only confirmed bookings can check in",
            });
        }
        let (current, quantity) = match &booking.allocation {
            Some(a) => (a.status, a.quantity),
            None => return Err(EngineError::NotAllocated(booking_id)),
        };
        current.transition(status)?;

        let mut rs = self
            .lock_allocated_resource(&booking)
            .await?
            .ok_or(EngineError::NotAllocated(booking_id))?;
        let regains_units = !booking.holds_capacity() && booking.status.is_active() && status.holds_capacity();
        if regains_units {
            check_capacity(&rs, &booking.span, quantity, Some(booking_id))?;
        }

        let event = Event::AllocationStatusChanged {
            booking_id,
            status,
            at: now_ms(),
        };
        self.persist_booking_event(&mut booking, Some(&mut *rs), &event)
            .await?;
        info!("{} on {} is now {status}", booking.reservation_number, rs.key);
        Ok(booking.clone())
    }

    /// `occupied -> available`, completing the booking in the same write.
    pub async fn check_out(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let _gate = self.gate.read().await;
        let handle = self.booking_handle(booking_id)?;
        let mut booking = handle.lock().await;
        match &booking.allocation {
            Some(a) if a.status == AvailabilityStatus::Occupied => {}
            Some(_) => {
                return Err(EngineError::InvalidState {
                    booking: booking_id,
                    reason: "booking is not checked in",
                });
            }
            None => return Err(EngineError::NotAllocated(booking_id)),
        }
        booking.status.transition(BookingStatus::Completed)?;

        let mut rs = self.lock_allocated_resource(&booking).await?;
        let event = Event::BookingStatusChanged {
            booking_id,
            status: BookingStatus::Completed,
            at: now_ms(),
        };
        self.persist_booking_event(&mut booking, rs.as_deref_mut(), &event)
            .await?;
        info!("{} checked out", booking.reservation_number);
        Ok(booking.clone())
    }

    /// Move a booking's dates. A booking holding units keeps them only if the
    /// new dates fit, its own current allocation excluded.
    pub async fn reschedule_booking(&self, booking_id: Ulid, span: Span) -> Result<Booking, EngineError> {
        validate_span(&span)?;
        let _gate = self.gate.read().await;
        let handle = self.booking_handle(booking_id)?;
        let mut booking = handle.lock().await;
        if !booking.status.is_active() {
            return Err(EngineError::InvalidState {
                booking: booking_id,
                reason: "booking is closed",
            });
        }

        let mut rs = self.lock_allocated_resource(&booking).await?;
        if let (Some(rs), Some(alloc)) = (rs.as_deref(), booking.allocation.as_ref())
            && booking.holds_capacity()
        {
            check_capacity(rs, &span, alloc.quantity, Some(booking_id))?;
        }

        let event = Event::BookingRescheduled {
            booking_id,
            span,
            at: now_ms(),
        };
        self.persist_booking_event(&mut booking, rs.as_deref_mut(), &event)
            .await?;
        info!("{} rescheduled", booking.reservation_number);
        Ok(booking.clone())
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to recreate
    /// the current catalog and ledger.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.gate.write().await;
        let mut events = Vec::new();

        let mut resources: Vec<SharedResourceState> =
            self.resources.iter().map(|e| e.value().clone()).collect();
        let mut snapshots = Vec::with_capacity(resources.len());
        for rs in resources.drain(..) {
            let guard = rs.read().await;
            snapshots.push(Event::ResourceRegistered {
                key: guard.key.clone(),
                name: guard.name.clone(),
                capacity: guard.capacity,
                category: guard.category.clone(),
            });
        }
        snapshots.sort_by(|a, b| match (a, b) {
            (Event::ResourceRegistered { key: ka, .. }, Event::ResourceRegistered { key: kb, .. }) => ka.cmp(kb),
            _ => std::cmp::Ordering::Equal,
        });
        events.extend(snapshots);

        let handles: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        let mut bookings = Vec::with_capacity(handles.len());
        for handle in handles {
            bookings.push(handle.lock().await.clone());
        }
        bookings.sort_by_key(|b| b.id);
        events.extend(bookings.into_iter().map(|booking| Event::BookingCreated { booking }));

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
