use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{free_units, peak_load};
use super::EngineError;

/// Reject empty or reversed ranges and out-of-range timestamps before any
/// state is read.
pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::InvalidRange);
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(())
}

pub(crate) fn validate_window(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::InvalidRange);
    }
    if span.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

/// Allocations competing with `query` on one resource.
pub(crate) struct Assessment<'a> {
    pub conflicts: Vec<&'a AllocationEntry>,
    pub peak: u32,
}

impl Assessment<'_> {
    pub fn free(&self, capacity: u32) -> u32 {
        free_units(capacity, self.peak)
    }
}

pub(crate) fn assess<'a>(rs: &'a ResourceState, query: &Span, exclude: Option<Ulid>) -> Assessment<'a> {
    let mut conflicts: Vec<&AllocationEntry> = rs
        .overlapping(query)
        .filter(|a| Some(a.booking_id) != exclude)
        .collect();
    conflicts.sort_by(|a, b| a.span.start.cmp(&b.span.start).then(a.booking_id.cmp(&b.booking_id)));
    let peak = peak_load(conflicts.iter().map(|a| (&a.span, a.quantity)), query);
    Assessment { conflicts, peak }
}

/// Fails unless `quantity` more units fit everywhere in `span`.
/// Must be called with the resource's write lock held.
pub(crate) fn check_capacity(
    rs: &ResourceState,
    span: &Span,
    quantity: u32,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let available = assess(rs, span, exclude).free(rs.capacity);
    if quantity > available {
        return Err(EngineError::CapacityExceeded {
            requested: quantity,
            available,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const D: Ms = 86_400_000;
    const JAN_1_2025: Ms = 1_735_689_600_000;

    fn resource(capacity: u32) -> ResourceState {
        ResourceState::new(ResourceKey::new("R1", ResourceType::Room), None, capacity, Category::General)
    }

    fn hold(rs: &mut ResourceState, start_day: i64, end_day: i64, quantity: u32) -> Ulid {
        let id = Ulid::new();
        rs.insert_allocation(AllocationEntry {
            booking_id: id,
            reservation_number: reservation_number(id),
            span: Span::new(JAN_1_2025 + start_day * D, JAN_1_2025 + end_day * D),
            quantity,
            booking_status: BookingStatus::Confirmed,
            availability: AvailabilityStatus::Allocated,
        });
        id
    }

    fn days(start_day: i64, end_day: i64) -> Span {
        Span::new(JAN_1_2025 + start_day * D, JAN_1_2025 + end_day * D)
    }

    #[test]
    fn reversed_and_empty_ranges_rejected() {
        let empty = Span { start: JAN_1_2025, end: JAN_1_2025 };
        let reversed = Span { start: JAN_1_2025 + D, end: JAN_1_2025 };
        assert!(matches!(validate_span(&empty), Err(EngineError::InvalidRange)));
        assert!(matches!(validate_span(&reversed), Err(EngineError::InvalidRange)));
        assert!(matches!(validate_window(&reversed), Err(EngineError::InvalidRange)));
        assert!(validate_span(&days(0, 4)).is_ok());
    }

    #[test]
    fn absurd_spans_rejected() {
        assert!(matches!(
            validate_span(&Span::new(0, 1000)),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_span(&days(0, 1000)),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn exclusion_hides_own_allocation() {
        let mut rs = resource(1);
        let own = hold(&mut rs, 0, 4, 1);
        assert!(check_capacity(&rs, &days(1, 3), 1, None).is_err());
        assert!(check_capacity(&rs, &days(1, 3), 1, Some(own)).is_ok());
        let a = assess(&rs, &days(0, 4), Some(own));
        assert!(a.conflicts.is_empty());
        assert_eq!(a.free(rs.capacity), 1);
    }

    #[test]
    fn capacity_exceeded_reports_free_units() {
        let mut rs = resource(3);
        hold(&mut rs, 0, 4, 2);
        let err = check_capacity(&rs, &days(2, 3), 2, None).unwrap_err();
        assert!(matches!(
            err,
            EngineError::CapacityExceeded { requested: 2, available: 1 }
        ));
    }

    #[test]
    fn checkout_day_is_free_for_next_checkin() {
        let mut rs = resource(1);
        hold(&mut rs, 0, 4, 1);
        assert!(check_capacity(&rs, &days(4, 6), 1, None).is_ok());
        assert!(check_capacity(&rs, &days(-2, 0), 1, None).is_ok());
    }

    #[test]
    fn conflicts_are_ordered() {
        let mut rs = resource(5);
        hold(&mut rs, 2, 5, 1);
        hold(&mut rs, 0, 3, 1);
        let a = assess(&rs, &days(0, 10), None);
        assert_eq!(a.conflicts.len(), 2);
        assert!(a.conflicts[0].span.start < a.conflicts[1].span.start);
        assert_eq!(a.peak, 2);
    }
}
