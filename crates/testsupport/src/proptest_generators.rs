//! Property-based generators for index workloads.

use common::RowId;
use proptest::prelude::*;

/// Strategy for index workloads: up to `max` `(key, rowId)` entries with
/// duplicate keys allowed but rowIds kept distinct (position-derived), the
/// uniqueness contract the index expects from its caller.
///
/// # Example
///
/// ```
/// use proptest::prelude::*;
/// use testsupport::proptest_generators::arb_entries;
///
/// proptest! {
///     #[test]
///     fn entries_have_distinct_row_ids(entries in arb_entries(64)) {
///         let mut rids: Vec<_> = entries.iter().map(|e| e.1).collect();
///         rids.sort_unstable();
///         rids.dedup();
///         assert_eq!(rids.len(), entries.len());
///     }
/// }
/// ```
pub fn arb_entries(max: usize) -> impl Strategy<Value = Vec<(u32, RowId)>> {
    prop::collection::vec(0u32..1_000, 1..max)
        .prop_map(|keys| keys.into_iter().zip(0u32..).collect())
}

/// Strategy for an inclusive key range; the bounds may arrive inverted,
/// which the index treats as an empty range.
pub fn arb_key_range() -> impl Strategy<Value = (u32, u32)> {
    (0u32..1_000, 0u32..1_000)
}
