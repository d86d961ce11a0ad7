//! Bounded append with amortized eviction.
//!
//! `merge_bounded` appends a batch to an ordered sequence and drops the
//! oldest items once the combined length passes an eviction threshold.
//! Letting the sequence overshoot `limit` up to the threshold means the
//! front-trim happens once per many small batches instead of on every one.

/// Eviction threshold the sync engine uses for a given `limit` (`limit × 1.2`).
#[must_use]
pub fn evict_threshold(limit: usize) -> usize {
    limit.saturating_mul(6) / 5
}

/// Append `incoming` to `existing`, bounded by `limit`.
///
/// - Without `limit`, returns `existing ++ incoming`.
/// - With `limit`, let `threshold = evict_threshold.unwrap_or(limit)`. When
///   the combined length exceeds `threshold`, the oldest
///   `combined - limit` items are dropped before appending.
///
/// Neither input is modified.
#[must_use]
pub fn merge_bounded<T: Clone>(
    existing: &[T],
    incoming: &[T],
    limit: Option<usize>,
    evict_threshold: Option<usize>,
) -> Vec<T> {
    let combined = existing.len() + incoming.len();
    let skip = match limit {
        Some(limit) if combined > evict_threshold.unwrap_or(limit) => combined.saturating_sub(limit),
        _ => 0,
    };

    let mut out = Vec::with_capacity(combined - skip);
    if skip < existing.len() {
        out.extend_from_slice(&existing[skip..]);
        out.extend_from_slice(incoming);
    } else {
        // The batch alone overflows the limit; keep its newest tail.
        out.extend_from_slice(&incoming[skip - existing.len()..]);
    }
    out
}

/// The newest `limit` items of `items` (all of them when `limit` is unset).
#[must_use]
pub fn newest<T>(items: &[T], limit: Option<usize>) -> &[T] {
    match limit {
        Some(limit) if items.len() > limit => &items[items.len() - limit..],
        _ => items,
    }
}

#[cfg(test)]
#[path = "window_test.rs"]
mod tests;
