use crate::model::Ms;
use crate::time::DAY_MS;

pub const MAX_RESOURCES: usize = 100_000;
pub const MAX_BOOKINGS: usize = 10_000_000;
pub const MAX_ALLOCATIONS_PER_RESOURCE: usize = 100_000;

pub const MAX_ID_LEN: usize = 128;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 2_048;

pub const MAX_CAPACITY: u32 = 100_000;

/// Minor units; ten billion in the major unit.
pub const MAX_TOTAL_AMOUNT: i64 = 1_000_000_000_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// A single stay, rental or seat reservation.
pub const MAX_SPAN_DURATION_MS: Ms = 400 * DAY_MS;
/// Availability and reporting windows.
pub const MAX_QUERY_WINDOW_MS: Ms = 3 * 366 * DAY_MS;

pub const MAX_LINE_LEN: usize = 64 * 1024;
