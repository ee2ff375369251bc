//! Debug assertion macros for buffer and aggregation invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so there is zero
//! overhead in release builds.

// =============================================================================
// Bounded buffers
// =============================================================================

/// Assert that a bounded buffer never holds more than its capacity.
///
/// **Invariant**: `len ≤ capacity`
///
/// Used in: `BoundedList::add()`, `BoundedMap::put()` after eviction
macro_rules! debug_assert_bounded_len {
    ($len:expr, $capacity:expr) => {
        debug_assert!(
            $len <= $capacity,
            "bounded buffer holds {} items, capacity is {}",
            $len,
            $capacity
        )
    };
}

/// Assert that a drop counter only moves forward.
///
/// **Invariant**: `new_dropped ≥ old_dropped` (between explicit clears)
///
/// Used in: `BoundedList::add()`, `BoundedMap::put()`
macro_rules! debug_assert_dropped_monotonic {
    ($old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "dropped count decreased from {} to {}",
            $old,
            $new
        )
    };
}

// =============================================================================
// Distribution aggregation
// =============================================================================

/// Assert that the per-bucket counts add up to the total count.
///
/// **Invariant**: `Σ bucket_counts == count`
///
/// Used in: `MutableAggregation::add()` and `combine()` for distributions
macro_rules! debug_assert_bucket_total {
    ($buckets:expr, $count:expr) => {
        debug_assert_eq!(
            $buckets.iter().sum::<u64>(),
            $count,
            "distribution bucket counts do not sum to total count"
        )
    };
}

pub(crate) use debug_assert_bounded_len;
pub(crate) use debug_assert_bucket_total;
pub(crate) use debug_assert_dropped_monotonic;
