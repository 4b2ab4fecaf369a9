
pub mod pretty;

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;
use types::Value;

/// Ordinal of a column within its table; also the position of its value in a row.
pub type ColumnId = u16;

/// Identifier the catalog assigns to each table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId(pub u64);

/// Engine-level row address used for random access and rowid-ordered merges.
///
/// Only the storage engine knows how two rowids order; planners and merge
/// iterators compare them through `storage::Cursor::compare_rowid`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub u64);

/// Column values by ordinal, plus the rowid of the stored row it came from
/// when there is one. Grouped output rows have none.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
    #[serde(skip)]
    #[serde(default)]
    rid: Option<RowId>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values, rid: None }
    }

    pub fn with_rid(mut self, rid: RowId) -> Self {
        self.rid = Some(rid);
        self
    }

    pub fn set_rid(&mut self, rid: Option<RowId>) {
        self.rid = rid;
    }

    pub fn rid(&self) -> Option<RowId> {
        self.rid
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

/// Rectangular result set carrying column labels and rows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Set of column ordinals, used for "fields needed by the query" and
/// "fields an index covers" bookkeeping.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnSet(RoaringBitmap);

impl ColumnSet {
    pub fn new() -> Self {
        Self(RoaringBitmap::new())
    }

    pub fn insert(&mut self, column: ColumnId) -> bool {
        self.0.insert(u32::from(column))
    }

    pub fn contains(&self, column: ColumnId) -> bool {
        self.0.contains(u32::from(column))
    }

    pub fn len(&self) -> usize {
        self.0.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every column of `self` is also in `other`.
    pub fn is_subset(&self, other: &ColumnSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn union_with(&mut self, other: &ColumnSet) {
        self.0 |= &other.0;
    }

    pub fn intersect_with(&mut self, other: &ColumnSet) {
        self.0 &= &other.0;
    }

    pub fn subtract(&mut self, other: &ColumnSet) {
        self.0 -= &other.0;
    }

    /// Lowest column ordinal in the set.
    pub fn first(&self) -> Option<ColumnId> {
        self.0.min().map(|c| c as ColumnId)
    }

    pub fn iter(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.0.iter().map(|c| c as ColumnId)
    }
}

impl FromIterator<ColumnId> for ColumnSet {
    fn from_iter<I: IntoIterator<Item = ColumnId>>(iter: I) -> Self {
        Self(iter.into_iter().map(u32::from).collect())
    }
}

/// Canonical error type shared across the optimizer subsystems.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("plan: {0}")]
    Planner(String),
    #[error("exec: {0}")]
    Executor(String),
    #[error("catalog: {0}")]
    Catalog(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Tunables for range analysis, plan selection and merge execution.
///
/// # Example
/// ```
/// use common::Config;
///
/// let config = Config::builder()
///     .sort_buffer_size(64 * 1024)
///     .index_merge(false)
///     .build();
/// assert_eq!(config.max_sel_args, 16_000);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Memory budget in bytes for the rowid dedup aggregator before it spills.
    #[builder(default = 2 * 1024 * 1024)]
    pub sort_buffer_size: usize,
    /// Interval count above which a key's range set is discarded as too
    /// expensive to analyse.
    #[builder(default = 16_000)]
    pub max_sel_args: usize,
    /// Hard cap on interval nodes allocated while analysing one predicate.
    #[builder(default = 200_000)]
    pub sel_arg_arena_limit: usize,
    /// `NOT IN` lists longer than this are not turned into ranges.
    #[builder(default = 1_000)]
    pub not_in_ignore_threshold: usize,
    /// Directory for spill files; the system temp dir when unset.
    pub tmp_dir: Option<PathBuf>,
    /// Allows index-merge and ROR-union plans.
    #[builder(default = true)]
    pub index_merge: bool,
    /// Allows ROR-intersection plans.
    #[builder(default = true)]
    pub ror_intersect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sort_buffer_size: 2 * 1024 * 1024,
            max_sel_args: 16_000,
            sel_arg_arena_limit: 200_000,
            not_in_ignore_threshold: 1_000,
            tmp_dir: None,
            index_merge: true,
            ror_intersect: true,
        }
    }
}

/// Counters collected by an access-path iterator.
///
/// # Examples
/// ```
/// use common::ExecutionStats;
/// use std::time::Duration;
///
/// let stats = ExecutionStats {
///     open_time: Duration::from_millis(5),
///     total_next_time: Duration::from_millis(150),
///     rows_produced: 1000,
///     ..ExecutionStats::default()
/// };
/// assert_eq!(stats.total_time().as_millis(), 155);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ExecutionStats {
    /// Time spent in init() and reset()
    pub open_time: Duration,
    /// Cumulative time spent across all get_next() calls
    pub total_next_time: Duration,
    /// Number of rows returned
    pub rows_produced: u64,
    /// Index entries read but rejected by a key-part filter
    pub rows_filtered: u64,
    /// Number of index seeks issued
    pub index_seeks: u64,
}

impl ExecutionStats {
    /// Returns total execution time (open + next)
    pub fn total_time(&self) -> Duration {
        self.open_time + self.total_next_time
    }

    /// Formats duration in human-readable form (e.g., "123.45ms", "1.234s")
    pub fn format_duration(d: Duration) -> String {
        let micros = d.as_micros();
        if micros < 1000 {
            format!("{micros}µs")
        } else if micros < 1_000_000 {
            format!("{:.2}ms", micros as f64 / 1000.0)
        } else {
            format!("{:.3}s", micros as f64 / 1_000_000.0)
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{ColumnId, ColumnSet, Config, DbError, DbResult, Row, RowId};
    pub use types::{SqlType, Value};
}
