//! Custom assertion helpers for the storage test suites.

use common::{DbResult, RowId};

/// The rowIds a full-range scan should return for `entries`: every rowId,
/// ordered by the composite `(key, rowId)`.
pub fn row_ids_in_composite_order(entries: &[(u32, RowId)]) -> Vec<RowId> {
    let mut sorted: Vec<_> = entries.to_vec();
    sorted.sort_unstable();
    sorted.into_iter().map(|(_, rid)| rid).collect()
}

/// Assert that an operation returns an error whose display contains
/// `expected_msg`.
///
/// # Example
///
/// ```
/// use testsupport::assertions::assert_error_contains;
///
/// let result: common::DbResult<()> = Err(common::DbError::InvalidPageNumber(9));
/// assert_error_contains(result, "invalid page number");
/// ```
pub fn assert_error_contains<T>(result: DbResult<T>, expected_msg: &str) {
    match result {
        Ok(_) => panic!("expected error containing {expected_msg:?}, got Ok"),
        Err(e) => {
            let msg = e.to_string();
            assert!(
                msg.contains(expected_msg),
                "error {msg:?} does not contain {expected_msg:?}"
            );
        }
    }
}
