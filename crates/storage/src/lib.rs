//! Storage-engine capability set consumed by the range optimizer.
//!
//! The optimizer never touches table data directly. It asks a [`Cursor`] for
//! statistics and cost estimates while planning, and drives the same cursor
//! (or clones of it) through index seeks, ordered index walks and rowid
//! fetches while executing the chosen access path.
//!
//! # Architecture
//!
//! ```text
//! planner ──stats / estimated_rows / read_time──▶ Cursor
//! executor ──start_scan / seek / next_in_index / fetch_by_rowid──▶ Cursor
//!                                                                   │
//!                                                        MemoryTable (rows + sorted index entries)
//! ```
//!
//! [`MemoryTable`] is the bundled engine: rows live in a vector whose
//! position is the rowid, and every index is a sorted vector of
//! `(key, rowid)` entries. It keeps call counters and can inject read
//! failures, which is what the executor tests lean on.

pub mod memory;


use common::{DbResult, Row, RowId};
use std::{cmp::Ordering, ops::Bound};
use types::Value;

pub use memory::{CounterSnapshot, EngineCounters, MemoryCursor, MemoryTable};

/// Unit of disk transfer assumed by the cost formulas.
pub const IO_SIZE: u64 = 4096;

/// Table-level statistics reported by the engine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TableStats {
    /// Number of rows in the table.
    pub records: u64,
    /// Bytes occupied by row data.
    pub data_file_length: u64,
    /// Index block size in bytes.
    pub block_size: u32,
    /// Bytes needed to store one rowid.
    pub ref_length: u32,
    /// Average row length in bytes.
    pub mean_rec_length: u64,
}

/// What a scan reads: one index in key order, or the whole table in rowid order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanMode {
    /// `keyread` asks the engine to serve rows from index entries only.
    Index { keynr: usize, keyread: bool },
    Table,
}

/// Positioning rule for [`Cursor::seek`].
///
/// Keys may be prefixes of the index key; comparisons look only at the
/// supplied prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekMode {
    /// First entry whose prefix equals the key.
    KeyExact,
    /// First entry whose prefix is `>=` the key.
    KeyOrNext,
    /// First entry whose prefix is `>` the key.
    AfterKey,
    /// Last entry whose prefix is `<` the key.
    BeforeKey,
    /// Last entry whose prefix equals the key.
    PrefixLast,
    /// Last entry whose prefix is `<=` the key.
    PrefixLastOrPrev,
}

/// One index entry as returned by index navigation.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexEntry {
    /// Key part values in index column order.
    pub key: Vec<Value>,
    pub rowid: RowId,
    /// Clustered primary key value of the row, when the engine clusters by PK.
    pub pk: Option<Vec<Value>>,
}

/// Capability set of a storage-engine handle.
///
/// A cursor holds at most one active scan at a time. Anything that needs two
/// independent positions (merge iterators) asks for a second handle with
/// [`Cursor::clone_cursor`].
pub trait Cursor {
    /// Current table statistics.
    fn stats(&self) -> TableStats;

    /// Packed length of the full key of index `keynr`.
    fn key_length(&self, keynr: usize) -> u32;

    /// True when rows are stored in primary key order, so a PK scan is a rowid-order scan.
    fn primary_key_is_clustered(&self) -> bool;

    /// True when `keynr` is the clustered primary key.
    fn is_clustered(&self, keynr: usize) -> bool;

    /// True when equal-key entries of `keynr` come back in ascending rowid order.
    fn is_rowid_ordered(&self, keynr: usize) -> bool;

    /// True when the engine can serve rows of `keynr` from index entries alone.
    fn supports_keyread(&self, _keynr: usize) -> bool {
        true
    }

    /// Estimated entries of `keynr` whose key prefix falls between `min` and `max`.
    ///
    /// Returns `u64::MAX` when the index cannot answer the question (for
    /// example a range probe against a hash index).
    fn estimated_rows(
        &self,
        keynr: usize,
        min: Bound<&[Value]>,
        max: Bound<&[Value]>,
    ) -> DbResult<u64>;

    /// Average number of rows sharing one value of the first `parts` key parts.
    fn rec_per_key(&self, keynr: usize, parts: usize) -> Option<u64>;

    /// Cost of a full table scan.
    fn scan_time(&self) -> f64 {
        self.stats().data_file_length as f64 / IO_SIZE as f64 + 2.0
    }

    /// Cost of reading `rows` rows through `ranges` index ranges.
    fn read_time(&self, _keynr: usize, ranges: u64, rows: u64) -> f64 {
        (ranges + rows) as f64
    }

    /// Cost of reading `rows` entries of `keynr` without touching row data.
    fn index_only_read_cost(&self, keynr: usize, rows: u64) -> f64 {
        let stats = self.stats();
        let entry = u64::from(self.key_length(keynr) + stats.ref_length).max(1);
        let keys_per_block = u64::from(stats.block_size / 2) / entry + 1;
        (rows + keys_per_block - 1) as f64 / keys_per_block as f64
    }

    /// Begin a scan. Ending a scan that was never started is a no-op.
    fn start_scan(&mut self, mode: ScanMode) -> DbResult<()>;

    fn end_scan(&mut self) -> DbResult<()>;

    /// Position on an index entry according to `mode`.
    fn seek(&mut self, key: &[Value], mode: SeekMode) -> DbResult<Option<IndexEntry>>;

    /// Position on the first entry of the index.
    fn first_in_index(&mut self) -> DbResult<Option<IndexEntry>>;

    fn next_in_index(&mut self) -> DbResult<Option<IndexEntry>>;

    fn prev_in_index(&mut self) -> DbResult<Option<IndexEntry>>;

    /// Rowid of the entry or row the cursor is positioned on.
    fn current_rowid(&self) -> Option<RowId>;

    /// Random access to a full row.
    fn fetch_by_rowid(&mut self, rowid: RowId) -> DbResult<Row>;

    /// Next row of a table scan, in rowid order.
    fn table_next(&mut self) -> DbResult<Option<Row>>;

    /// Engine order of two rowids.
    fn compare_rowid(&self, a: RowId, b: RowId) -> Ordering;

    /// A second, independently positioned handle on the same table.
    fn clone_cursor(&self) -> DbResult<Box<dyn Cursor>>;
}

/// Three-way comparison of an index key against a (possibly shorter) key prefix.
pub fn prefix_cmp(entry_key: &[Value], key: &[Value]) -> Ordering {
    let n = key.len().min(entry_key.len());
    entry_key[..n].cmp(&key[..n])
}
