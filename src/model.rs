use std::fmt;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    #[serde(with = "crate::time::iso8601")]
    pub start: Ms,
    #[serde(with = "crate::time::iso8601")]
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Half-open overlap, spelled as the three ways `other` can meet `self`.
    /// Every clause keeps `start` inclusive and `end` exclusive, so the
    /// disjunction is exactly `self.start < other.end && other.start < self.end`.
    pub fn overlaps(&self, other: &Span) -> bool {
        let starts_during = self.start <= other.start && other.start < self.end;
        let ends_during = self.start < other.end && other.end <= self.end;
        let encompasses = other.start <= self.start && self.end <= other.end;
        starts_during || ends_during || encompasses
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Room,
    Seat,
    Vehicle,
    Staff,
    Equipment,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Room => "room",
            ResourceType::Seat => "seat",
            ResourceType::Vehicle => "vehicle",
            ResourceType::Staff => "staff",
            ResourceType::Equipment => "equipment",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource is identified by its id *and* its type: `R1` the room and
/// `R1` the vehicle are different resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub resource_id: String,
    pub resource_type: ResourceType,
}

impl ResourceKey {
    pub fn new(resource_id: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            resource_id: resource_id.into(),
            resource_type,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.resource_id)
    }
}

/// What inventory a resource belongs to, used to enumerate candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Room { property_id: String, room_type: String },
    Vehicle { vehicle_type: String },
    #[default]
    General,
}

/// Projection of one capacity-holding booking onto its resource.
/// Carries everything an availability query needs, so those readers never
/// touch the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationEntry {
    pub booking_id: Ulid,
    pub reservation_number: String,
    pub span: Span,
    pub quantity: u32,
    pub booking_status: BookingStatus,
    pub availability: AvailabilityStatus,
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub key: ResourceKey,
    pub name: Option<String>,
    /// Units that may be allocated at any instant.
    pub capacity: u32,
    pub category: Category,
    /// Capacity-holding allocations, sorted by `span.start`.
    pub allocations: Vec<AllocationEntry>,
}

impl ResourceState {
    pub fn new(key: ResourceKey, name: Option<String>, capacity: u32, category: Category) -> Self {
        Self {
            key,
            name,
            capacity,
            category,
            allocations: Vec::new(),
        }
    }

    /// Insert entry maintaining sort order by span.start.
    pub fn insert_allocation(&mut self, entry: AllocationEntry) {
        let pos = self
            .allocations
            .binary_search_by_key(&entry.span.start, |a| a.span.start)
            .unwrap_or_else(|e| e);
        self.allocations.insert(pos, entry);
    }

    pub fn remove_allocation(&mut self, booking_id: Ulid) -> Option<AllocationEntry> {
        let pos = self.allocations.iter().position(|a| a.booking_id == booking_id)?;
        Some(self.allocations.remove(pos))
    }

    /// Return only allocations whose span overlaps the query window.
    /// Uses binary search to skip allocations starting at or after `query.end`.
    pub fn overlapping<'a>(&'a self, query: &Span) -> impl Iterator<Item = &'a AllocationEntry> + use<'a> {
        let query = *query;
        let right_bound = self
            .allocations
            .partition_point(|a| a.span.start < query.end);
        self.allocations[..right_bound]
            .iter()
            .filter(move |a| a.span.overlaps(&query))
    }

    /// Bring this resource's index in line with `booking`'s current state.
    pub fn reindex(&mut self, booking: &Booking) {
        self.remove_allocation(booking.id);
        if booking.holds_capacity_on(&self.key)
            && let Some(alloc) = &booking.allocation
        {
            self.insert_allocation(AllocationEntry {
                booking_id: booking.id,
                reservation_number: booking.reservation_number.clone(),
                span: booking.span,
                quantity: alloc.quantity,
                booking_status: booking.status,
                availability: alloc.status,
            });
        }
    }

    pub fn info(&self) -> ResourceInfo {
        ResourceInfo {
            key: self.key.clone(),
            name: self.name.clone(),
            capacity: self.capacity,
            category: self.category.clone(),
            active_allocations: self.allocations.len(),
        }
    }
}

// ── Ledger ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookingType {
    Property,
    Service,
    Flight,
    CarRental,
    Transfer,
    Package,
}

/// Which catalog item a booking is for. One variant per booking type,
/// so a booking can never point at a flight and a property at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceRef {
    Property { property_id: String, room_type: String },
    Service { service_id: String },
    Flight { flight_id: String },
    CarRental { car_rental_id: String },
    Transfer { transfer_id: String },
    Package { package_id: String },
}

impl ResourceRef {
    pub fn booking_type(&self) -> BookingType {
        match self {
            ResourceRef::Property { .. } => BookingType::Property,
            ResourceRef::Service { .. } => BookingType::Service,
            ResourceRef::Flight { .. } => BookingType::Flight,
            ResourceRef::CarRental { .. } => BookingType::CarRental,
            ResourceRef::Transfer { .. } => BookingType::Transfer,
            ResourceRef::Package { .. } => BookingType::Package,
        }
    }

    /// The primary id of the referenced item.
    pub fn target_id(&self) -> &str {
        match self {
            ResourceRef::Property { property_id, .. } => property_id,
            ResourceRef::Service { service_id } => service_id,
            ResourceRef::Flight { flight_id } => flight_id,
            ResourceRef::CarRental { car_rental_id } => car_rental_id,
            ResourceRef::Transfer { transfer_id } => transfer_id,
            ResourceRef::Package { package_id } => package_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
            BookingStatus::NoShow => "no-show",
        }
    }

    /// Pending and confirmed bookings may hold capacity.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityStatus {
    Available,
    Allocated,
    Occupied,
    Maintenance,
    Blocked,
}

impl AvailabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityStatus::Available => "available",
            AvailabilityStatus::Allocated => "allocated",
            AvailabilityStatus::Occupied => "occupied",
            AvailabilityStatus::Maintenance => "maintenance",
            AvailabilityStatus::Blocked => "blocked",
        }
    }

    /// Everything except a released allocation takes units away.
    pub fn holds_capacity(&self) -> bool {
        !matches!(self, AvailabilityStatus::Available)
    }
}

impl fmt::Display for AvailabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub resource: ResourceKey,
    pub resource_name: String,
    /// Catalog capacity of the resource when the allocation was made.
    pub capacity: u32,
    pub quantity: u32,
    pub status: AvailabilityStatus,
    pub assigned_by: Option<String>,
    #[serde(with = "crate::time::iso8601")]
    pub assigned_at: Ms,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Refunded,
    Failed,
}

/// Read-only to the engine; only summed for revenue reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSummary {
    #[serde(default)]
    pub status: PaymentStatus,
    /// Minor currency units.
    #[serde(default)]
    pub total_amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub reservation_number: String,
    pub user_id: String,
    pub resource: ResourceRef,
    /// `[check_in, check_out)`
    pub span: Span,
    pub status: BookingStatus,
    pub allocation: Option<ResourceAllocation>,
    pub payment: PaymentSummary,
    #[serde(with = "crate::time::iso8601")]
    pub created_at: Ms,
    #[serde(with = "crate::time::iso8601")]
    pub updated_at: Ms,
}

impl Booking {
    pub fn booking_type(&self) -> BookingType {
        self.resource.booking_type()
    }

    pub fn allocated_key(&self) -> Option<&ResourceKey> {
        self.allocation.as_ref().map(|a| &a.resource)
    }

    pub fn holds_capacity(&self) -> bool {
        self.status.is_active()
            && self
                .allocation
                .as_ref()
                .is_some_and(|a| a.status.holds_capacity())
    }

    pub fn holds_capacity_on(&self, key: &ResourceKey) -> bool {
        self.holds_capacity() && self.allocated_key() == Some(key)
    }
}

/// `BK-YYYYMMDD-XXXXXX`: the id's creation date plus its last six characters.
pub fn reservation_number(id: Ulid) -> String {
    let date = DateTime::from_timestamp_millis(id.timestamp_ms() as i64)
        .map(|d| d.format("%Y%m%d").to_string())
        .unwrap_or_else(|| "00000000".into());
    let encoded = id.to_string();
    format!("BK-{date}-{}", &encoded[encoded.len() - 6..])
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceRegistered {
        key: ResourceKey,
        name: Option<String>,
        capacity: u32,
        category: Category,
    },
    ResourceUpdated {
        key: ResourceKey,
        name: Option<String>,
        capacity: u32,
    },
    BookingCreated {
        booking: Booking,
    },
    AllocationAssigned {
        booking_id: Ulid,
        allocation: ResourceAllocation,
        at: Ms,
    },
    AllocationStatusChanged {
        booking_id: Ulid,
        status: AvailabilityStatus,
        at: Ms,
    },
    BookingStatusChanged {
        booking_id: Ulid,
        status: BookingStatus,
        at: Ms,
    },
    BookingRescheduled {
        booking_id: Ulid,
        span: Span,
        at: Ms,
    },
}

// ── Requests & query results ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub user_id: String,
    pub resource: ResourceRef,
    pub span: Span,
    #[serde(default)]
    pub payment: PaymentSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub booking_id: Ulid,
    #[serde(flatten)]
    pub resource: ResourceKey,
    pub resource_name: String,
    pub capacity: u32,
    pub quantity: u32,
    #[serde(default)]
    pub assigned_by: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingFilter {
    #[serde(default)]
    pub resource: Option<ResourceKey>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub booking_type: Option<BookingType>,
    #[serde(default)]
    pub status: Option<BookingStatus>,
    #[serde(default)]
    pub window: Option<Span>,
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking) -> bool {
        self.resource
            .as_ref()
            .is_none_or(|key| booking.allocated_key() == Some(key))
            && self.user_id.as_ref().is_none_or(|u| &booking.user_id == u)
            && self.booking_type.is_none_or(|t| booking.booking_type() == t)
            && self.status.is_none_or(|s| booking.status == s)
            && self.window.is_none_or(|w| booking.span.overlaps(&w))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    #[serde(flatten)]
    pub key: ResourceKey,
    pub name: Option<String>,
    pub capacity: u32,
    pub category: Category,
    pub active_allocations: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub booking_id: Ulid,
    pub reservation_number: String,
    pub span: Span,
    pub quantity: u32,
    pub status: BookingStatus,
    pub availability: AvailabilityStatus,
}

impl From<&AllocationEntry> for ConflictInfo {
    fn from(entry: &AllocationEntry) -> Self {
        Self {
            booking_id: entry.booking_id,
            reservation_number: entry.reservation_number.clone(),
            span: entry.span,
            quantity: entry.quantity,
            status: entry.booking_status,
            availability: entry.availability,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityResult {
    pub available: bool,
    pub conflicting_bookings: Vec<ConflictInfo>,
    /// `total_capacity` minus the peak number of units held at any single
    /// instant of the window, floored at 0. Conflicts that never overlap
    /// each other do not add up, so this can exceed capacity minus the sum
    /// of the conflicting quantities.
    pub available_quantity: u32,
    pub total_capacity: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyStats {
    pub resource_id: String,
    pub booking_count: u64,
    pub total_nights: u64,
    pub total_revenue: i64,
    pub average_revenue: f64,
}
