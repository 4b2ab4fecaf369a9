//! Custom assertion helpers for testing.
//!
//! Provides specialized assertion functions for rowid streams and error
//! results produced by the access-path iterators.

use common::{pretty::format_row_ids, DbError, DbResult, Row, RowId};

/// Rowids of `rows`, in row order.
///
/// # Panics
///
/// Panics when a row carries no rowid.
pub fn rowids(rows: &[Row]) -> Vec<RowId> {
    rows.iter()
        .map(|row| row.rid().expect("row without rowid"))
        .collect()
}

/// Assert that rowids ascend strictly, i.e. are sorted and duplicate-free.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
/// use common::RowId;
///
/// assert_strictly_ascending(&[RowId(1), RowId(4), RowId(9)]);
/// ```
pub fn assert_strictly_ascending(ids: &[RowId]) {
    if let Some(w) = ids.windows(2).find(|w| w[0] >= w[1]) {
        panic!(
            "Expected strictly ascending rowids, but {} is followed by {} in {}",
            w[0].0,
            w[1].0,
            format_row_ids(ids)
        );
    }
}

/// Assert that an operation returns an error containing a specific substring.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
///
/// let result: Result<(), common::DbError> = Err(common::DbError::Executor("table not found".into()));
/// assert_error_contains(result, "table not found");
/// ```
pub fn assert_error_contains<T>(result: DbResult<T>, expected_msg: &str) {
    match result {
        Ok(_) => panic!("Expected error containing '{}', but got Ok", expected_msg),
        Err(e) => {
            let error_string = e.to_string();
            assert!(
                error_string.contains(expected_msg),
                "Expected error to contain '{}', but got: {}",
                expected_msg,
                error_string
            );
        }
    }
}

/// Assert that an operation failed inside the storage engine.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
/// use common::DbError;
///
/// let result: Result<(), DbError> = Err(DbError::Storage("injected read failure".into()));
/// assert_storage_error(result);
/// ```
pub fn assert_storage_error<T: std::fmt::Debug>(result: DbResult<T>) {
    match result {
        Err(DbError::Storage(_)) => {}
        other => panic!("Expected a storage error, but got: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "strictly ascending")]
    fn duplicates_are_not_ascending() {
        assert_strictly_ascending(&[RowId(1), RowId(1)]);
    }

    #[test]
    fn rowids_follow_row_order() {
        let rows = vec![
            Row::new(vec![]).with_rid(RowId(7)),
            Row::new(vec![]).with_rid(RowId(2)),
        ];
        assert_eq!(rowids(&rows), vec![RowId(7), RowId(2)]);
    }
}
