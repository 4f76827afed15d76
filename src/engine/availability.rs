use crate::model::*;

// ── Capacity Algorithm ────────────────────────────────────────────

/// Sweep-line: the largest total quantity held at any single instant of
/// `window` by the given allocations.
///
/// Allocations are clipped to the window first. At equal timestamps releases
/// are processed before acquisitions, so a stay ending at `t` and one
/// starting at `t` never stack (half-open intervals).
pub fn peak_load<'a, I>(allocs: I, window: &Span) -> u32
where
    I: IntoIterator<Item = (&'a Span, u32)>,
{
    let mut events: Vec<(Ms, i64)> = Vec::new();
    for (span, quantity) in allocs {
        let start = span.start.max(window.start);
        let end = span.end.min(window.end);
        if start < end && quantity > 0 {
            events.push((start, quantity as i64));
            events.push((end, -(quantity as i64)));
        }
    }
    if events.is_empty() {
        return 0;
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut load: i64 = 0;
    let mut peak: i64 = 0;
    for (_, delta) in &events {
        load += delta;
        peak = peak.max(load);
    }
    peak.min(u32::MAX as i64) as u32
}

/// Sweep-line: time ranges inside `window` where held quantity reaches
/// `capacity`. Returns sorted, merged spans.
pub fn saturated_spans<'a, I>(allocs: I, window: &Span, capacity: u32) -> Vec<Span>
where
    I: IntoIterator<Item = (&'a Span, u32)>,
{
    let mut events: Vec<(Ms, i64)> = Vec::new();
    for (span, quantity) in allocs {
        let start = span.start.max(window.start);
        let end = span.end.min(window.end);
        if start < end && quantity > 0 {
            events.push((start, quantity as i64));
            events.push((end, -(quantity as i64)));
        }
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let threshold = capacity as i64;
    let mut result: Vec<Span> = Vec::new();
    let mut load: i64 = 0;
    let mut saturated_start: Option<Ms> = None;

    for (time, delta) in &events {
        load += delta;
        if load >= threshold && saturated_start.is_none() {
            saturated_start = Some(*time);
        } else if load < threshold
            && let Some(start) = saturated_start.take()
            && *time > start
        {
            match result.last_mut() {
                Some(last) if last.end == start => last.end = *time,
                _ => result.push(Span::new(start, *time)),
            }
        }
    }

    result
}

/// Units still free given a peak load.
pub fn free_units(capacity: u32, peak: u32) -> u32 {
    capacity.saturating_sub(peak)
}
