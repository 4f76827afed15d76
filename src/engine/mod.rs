mod availability;
mod conflict;
mod error;
mod ledger;
mod mutations;
mod queries;

pub use availability::{free_units, peak_load, saturated_spans};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;
pub type SharedBooking = Arc<Mutex<Booking>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    if result.is_ok() {
        result = wal.flush_sync();
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL commit of {} events failed: {e}", batch.len());
        // Every sender hears Err, so none of the batch may survive a replay.
        if let Err(e) = wal.rollback() {
            tracing::error!("WAL rollback failed, refusing further appends: {e}");
        }
    }

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// The booking ledger plus the resource catalog, kept consistent under
/// per-resource locks.
///
/// Lock order: `gate` (shared) → booking mutex → `registry` → resource lock.
/// Availability queries take resource read locks only; the allocation index
/// carries what they need. Ledger reads lock one booking at a time and never
/// hold a resource lock meanwhile.
pub struct Engine {
    pub(super) resources: DashMap<ResourceKey, SharedResourceState>,
    pub(super) bookings: DashMap<Ulid, SharedBooking>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold it shared; compaction holds it exclusively.
    pub(super) gate: RwLock<()>,
    /// Serializes catalog registrations.
    pub(super) registry: Mutex<()>,
}

/// Apply a booking-level event. `rs` is the resource the booking is (or is
/// becoming) allocated on; the caller holds its write lock.
fn apply_to_booking(booking: &mut Booking, rs: Option<&mut ResourceState>, event: &Event) {
    match event {
        Event::AllocationAssigned { allocation, at, .. } => {
            booking.allocation = Some(allocation.clone());
            booking.updated_at = *at;
        }
        Event::AllocationStatusChanged { status, at, .. } => {
            if let Some(alloc) = booking.allocation.as_mut() {
                alloc.status = *status;
            }
            booking.updated_at = *at;
        }
        Event::BookingStatusChanged { status, at, .. } => {
            booking.status = *status;
            // Closing a booking hands its units back.
            if status.is_terminal()
                && let Some(alloc) = booking.allocation.as_mut()
                && matches!(alloc.status, AvailabilityStatus::Allocated | AvailabilityStatus::Occupied)
            {
                alloc.status = AvailabilityStatus::Available;
            }
            booking.updated_at = *at;
        }
        Event::BookingRescheduled { span, at, .. } => {
            booking.span = *span;
            booking.updated_at = *at;
        }
        Event::ResourceRegistered { .. } | Event::ResourceUpdated { .. } | Event::BookingCreated { .. } => {}
    }
    if let Some(rs) = rs {
        rs.reindex(booking);
    }
}

/// The booking an event mutates, for booking-level events.
fn event_booking_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::AllocationAssigned { booking_id, .. }
        | Event::AllocationStatusChanged { booking_id, .. }
        | Event::BookingStatusChanged { booking_id, .. }
        | Event::BookingRescheduled { booking_id, .. } => Some(*booking_id),
        Event::BookingCreated { booking } => Some(booking.id),
        Event::ResourceRegistered { .. } | Event::ResourceUpdated { .. } => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            resources: DashMap::new(),
            bookings: DashMap::new(),
            wal_tx,
            gate: RwLock::new(()),
            registry: Mutex::new(()),
        };

        // We're the sole owner of every lock during replay, so try_lock/try_write
        // always succeed. Never use blocking_* here: this may run inside an
        // async context.
        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            "ledger replayed: {} events, {} resources, {} bookings",
            events.len(),
            engine.resources.len(),
            engine.bookings.len()
        );

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::ResourceRegistered { key, name, capacity, category } => {
                let rs = ResourceState::new(key.clone(), name.clone(), *capacity, category.clone());
                self.resources.insert(key.clone(), Arc::new(RwLock::new(rs)));
            }
            Event::ResourceUpdated { key, name, capacity } => {
                if let Some(rs) = self.get_resource(key) {
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    guard.name = name.clone();
                    guard.capacity = *capacity;
                }
            }
            Event::BookingCreated { booking } => {
                if let Some(rs) = booking.allocated_key().and_then(|k| self.get_resource(k)) {
                    rs.try_write().expect("replay: uncontended write").reindex(booking);
                }
                self.bookings
                    .insert(booking.id, Arc::new(Mutex::new(booking.clone())));
            }
            other => {
                let Some(handle) = event_booking_id(other).and_then(|id| self.booking_handle(id).ok()) else {
                    return;
                };
                let mut booking = handle.try_lock().expect("replay: uncontended lock");
                let key = match other {
                    Event::AllocationAssigned { allocation, .. } => Some(allocation.resource.clone()),
                    _ => booking.allocated_key().cloned(),
                };
                let rs = key.and_then(|k| self.get_resource(&k));
                let mut guard = rs.as_ref().map(|rs| rs.try_write().expect("replay: uncontended write"));
                apply_to_booking(&mut booking, guard.as_deref_mut(), other);
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append then apply. Memory is untouched when the append fails.
    pub(super) async fn persist_booking_event(
        &self,
        booking: &mut Booking,
        rs: Option<&mut ResourceState>,
        event: &Event,
    ) -> Result<(), EngineError> {
        if let Err(e) = self.wal_append(event).await {
            tracing::error!("booking {} not updated, persistence failed: {e}", booking.id);
            return Err(e);
        }
        apply_to_booking(booking, rs, event);
        Ok(())
    }

    pub fn get_resource(&self, key: &ResourceKey) -> Option<SharedResourceState> {
        self.resources.get(key).map(|e| e.value().clone())
    }

    pub(super) fn booking_handle(&self, id: Ulid) -> Result<SharedBooking, EngineError> {
        self.bookings
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::BookingNotFound(id))
    }

    /// Write-lock the resource a booking is allocated on, if any.
    /// Caller holds the booking's mutex, so the allocation cannot move.
    pub(super) async fn lock_allocated_resource(
        &self,
        booking: &Booking,
    ) -> Result<Option<OwnedRwLockWriteGuard<ResourceState>>, EngineError> {
        let Some(key) = booking.allocated_key() else {
            return Ok(None);
        };
        let rs = self
            .get_resource(key)
            .ok_or_else(|| EngineError::ResourceNotFound(key.clone()))?;
        Ok(Some(rs.write_owned().await))
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }
}
