use std::collections::BTreeMap;

use ulid::Ulid;

use crate::model::*;
use crate::time::nights;

use super::availability::saturated_spans;
use super::conflict::{assess, validate_window};
use super::{Engine, EngineError, SharedResourceState};

/// Capacity assumed for a resource nobody has catalogued yet.
pub const DEFAULT_CAPACITY: u32 = 1;

impl Engine {
    /// Free units of `key` over `span`, plus the allocations competing for
    /// them. Pure read under the resource's shared lock.
    pub async fn check_resource_availability(
        &self,
        key: &ResourceKey,
        span: Span,
        exclude_booking_id: Option<Ulid>,
    ) -> Result<AvailabilityResult, EngineError> {
        validate_window(&span)?;
        let Some(rs) = self.get_resource(key) else {
            return Ok(AvailabilityResult {
                available: true,
                conflicting_bookings: Vec::new(),
                available_quantity: DEFAULT_CAPACITY,
                total_capacity: DEFAULT_CAPACITY,
                message: format!("{key} is not in the catalog; assuming capacity {DEFAULT_CAPACITY}"),
            });
        };
        let guard = rs.read().await;
        let assessment = assess(&guard, &span, exclude_booking_id);
        let available_quantity = assessment.free(guard.capacity);
        let message = if available_quantity > 0 {
            format!("{available_quantity} of {} available", guard.capacity)
        } else {
            "Resource is fully booked for the requested period".to_string()
        };
        Ok(AvailabilityResult {
            available: available_quantity > 0,
            conflicting_bookings: assessment.conflicts.into_iter().map(ConflictInfo::from).collect(),
            available_quantity,
            total_capacity: guard.capacity,
            message,
        })
    }

    /// Periods inside `window` where every unit of `key` is taken.
    pub async fn fully_booked_periods(&self, key: &ResourceKey, window: Span) -> Result<Vec<Span>, EngineError> {
        validate_window(&window)?;
        let rs = self
            .get_resource(key)
            .ok_or_else(|| EngineError::ResourceNotFound(key.clone()))?;
        let guard = rs.read().await;
        Ok(saturated_spans(
            guard.overlapping(&window).map(|a| (&a.span, a.quantity)),
            &window,
            guard.capacity,
        ))
    }

    /// Rooms of one type at one property with at least `quantity` units free
    /// for the whole stay.
    pub async fn find_available_rooms(
        &self,
        property_id: &str,
        room_type: &str,
        span: Span,
        quantity: u32,
    ) -> Result<Vec<String>, EngineError> {
        validate_window(&span)?;
        if quantity == 0 {
            return Err(EngineError::InvalidInput("quantity must be at least 1"));
        }
        let candidates = self.catalog_matching(|key, category| {
            key.resource_type == ResourceType::Room
                && matches!(category, Category::Room { property_id: p, room_type: t } if p == property_id && t == room_type)
        })
        .await;
        Ok(self.keep_free(candidates, &span, quantity).await)
    }

    pub async fn find_available_vehicles(&self, vehicle_type: &str, span: Span) -> Result<Vec<String>, EngineError> {
        validate_window(&span)?;
        let candidates = self.catalog_matching(|key, category| {
            key.resource_type == ResourceType::Vehicle
                && matches!(category, Category::Vehicle { vehicle_type: t } if t == vehicle_type)
        })
        .await;
        Ok(self.keep_free(candidates, &span, 1).await)
    }

    /// Catalog entries accepted by `pred`, ordered by key.
    async fn catalog_matching(
        &self,
        pred: impl Fn(&ResourceKey, &Category) -> bool,
    ) -> Vec<SharedResourceState> {
        let mut all: Vec<(ResourceKey, SharedResourceState)> = self
            .resources
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        let mut matched = Vec::new();
        for (key, rs) in all {
            if pred(&key, &rs.read().await.category) {
                matched.push(rs);
            }
        }
        matched
    }

    async fn keep_free(
        &self,
        candidates: Vec<SharedResourceState>,
        span: &Span,
        quantity: u32,
    ) -> Vec<String> {
        let mut free = Vec::new();
        for rs in candidates {
            let guard = rs.read().await;
            if assess(&guard, span, None).free(guard.capacity) >= quantity {
                free.push(guard.key.resource_id.clone());
            }
        }
        free
    }

    /// Per-resource booking counts, nights and revenue for confirmed or
    /// occupied stays overlapping `window`, read from the ledger so a
    /// confirmed stay counts even after its units were released. Resources
    /// with nothing to report are left out.
    pub async fn get_resource_occupancy_stats(
        &self,
        resource_type: ResourceType,
        window: Span,
    ) -> Result<Vec<OccupancyStats>, EngineError> {
        validate_window(&window)?;
        let handles: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();

        let mut rows: BTreeMap<String, OccupancyStats> = BTreeMap::new();
        for handle in handles {
            let booking = handle.lock().await;
            let Some(alloc) = &booking.allocation else {
                continue;
            };
            if alloc.resource.resource_type != resource_type || !booking.span.overlaps(&window) {
                continue;
            }
            if booking.status != BookingStatus::Confirmed && alloc.status != AvailabilityStatus::Occupied {
                continue;
            }
            let row = rows
                .entry(alloc.resource.resource_id.clone())
                .or_insert_with(|| OccupancyStats {
                    resource_id: alloc.resource.resource_id.clone(),
                    booking_count: 0,
                    total_nights: 0,
                    total_revenue: 0,
                    average_revenue: 0.0,
                });
            row.booking_count += 1;
            row.total_nights += nights(booking.span.duration_ms());
            row.total_revenue = row
                .total_revenue
                .checked_add(booking.payment.total_amount)
                .ok_or(EngineError::LimitExceeded("revenue total overflows"))?;
        }
        for row in rows.values_mut() {
            row.average_revenue = row.total_revenue as f64 / row.booking_count as f64;
        }
        Ok(rows.into_values().collect())
    }

    /// Every catalogued resource, ordered by key.
    pub async fn list_resources(&self, resource_type: Option<ResourceType>) -> Vec<ResourceInfo> {
        let all: Vec<SharedResourceState> = self
            .resources
            .iter()
            .filter(|e| resource_type.is_none_or(|t| e.key().resource_type == t))
            .map(|e| e.value().clone())
            .collect();
        let mut infos = Vec::with_capacity(all.len());
        for rs in all {
            infos.push(rs.read().await.info());
        }
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    pub async fn get_resource_info(&self, key: &ResourceKey) -> Result<ResourceInfo, EngineError> {
        let rs = self
            .get_resource(key)
            .ok_or_else(|| EngineError::ResourceNotFound(key.clone()))?;
        let guard = rs.read().await;
        Ok(guard.info())
    }
}
