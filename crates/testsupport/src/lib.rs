//! Fixture tables, predicate strategies and rowid assertions shared by the
//! planner and executor tests.
//!
//! # Example
//!
//! ```
//! use testsupport::prelude::*;
//!
//! let table = abc_table();
//! assert_eq!(table.rows().len(), 40);
//! assert_eq!(table.meta().index_number("i_ab").unwrap(), 2);
//! ```

pub mod assertions;
pub mod fixtures;
pub mod proptest_generators;

/// Fixtures and assertions in one import.
pub mod prelude {
    pub use crate::assertions::*;
    pub use crate::fixtures::*;
}
