//! In-memory table engine.

use std::{cell::Cell, cmp::Ordering, ops::Bound, rc::Rc};

use bincode::config;
use bincode::serde::encode_to_vec;
use catalog::{IndexKind, TableMeta};
use common::{DbError, DbResult, Row, RowId};
use tracing::trace;
use types::Value;

use crate::{Cursor, IO_SIZE, IndexEntry, ScanMode, SeekMode, TableStats, prefix_cmp};

/// Call counters shared by a table and every cursor opened on it.
#[derive(Debug, Default)]
pub struct EngineCounters {
    scans_started: Cell<u64>,
    open_scans: Cell<u64>,
    seeks: Cell<u64>,
    index_reads: Cell<u64>,
    row_fetches: Cell<u64>,
    table_reads: Cell<u64>,
    estimates: Cell<u64>,
    fail_after_reads: Cell<Option<u64>>,
}

/// Point-in-time copy of [`EngineCounters`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub scans_started: u64,
    pub open_scans: u64,
    pub seeks: u64,
    pub index_reads: u64,
    pub row_fetches: u64,
    pub table_reads: u64,
    pub estimates: u64,
}

impl CounterSnapshot {
    /// Number of calls that touched row or index data.
    pub fn data_accesses(&self) -> u64 {
        self.scans_started + self.seeks + self.index_reads + self.row_fetches + self.table_reads
    }
}

impl EngineCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            scans_started: self.scans_started.get(),
            open_scans: self.open_scans.get(),
            seeks: self.seeks.get(),
            index_reads: self.index_reads.get(),
            row_fetches: self.row_fetches.get(),
            table_reads: self.table_reads.get(),
            estimates: self.estimates.get(),
        }
    }

    /// Make every read after the next `reads` successful ones fail.
    pub fn fail_after_reads(&self, reads: u64) {
        let done = self.reads();
        self.fail_after_reads.set(Some(done + reads));
    }

    pub fn clear_failure(&self) {
        self.fail_after_reads.set(None);
    }

    fn reads(&self) -> u64 {
        self.index_reads.get() + self.row_fetches.get() + self.table_reads.get()
    }

    fn charge(&self, counter: &Cell<u64>) -> DbResult<()> {
        if let Some(limit) = self.fail_after_reads.get() {
            if self.reads() >= limit {
                return Err(DbError::Storage("injected read failure".into()));
            }
        }
        counter.set(counter.get() + 1);
        Ok(())
    }

    fn bump(counter: &Cell<u64>) {
        counter.set(counter.get() + 1);
    }
}

/// A table held entirely in memory.
///
/// Rows are stored in rowid order. When the table has a primary key and is
/// built clustered, rows are sorted by that key first, so a primary key scan
/// visits rowids in ascending order.
#[derive(Debug)]
pub struct MemoryTable {
    meta: TableMeta,
    rows: Vec<Row>,
    indexes: Vec<Vec<IndexEntry>>,
    clustered: bool,
    stats: TableStats,
    counters: EngineCounters,
}

#[bon::bon]
impl MemoryTable {
    /// Load `rows` into a new table described by `meta`.
    ///
    /// Rows are validated against column types and unique indexes. `stats`
    /// overrides the measured statistics, which lets tests plan against a
    /// table that is larger than the data they load.
    #[builder]
    pub fn new(
        meta: TableMeta,
        rows: Vec<Vec<Value>>,
        #[builder(default = true)] clustered: bool,
        #[builder(default = IO_SIZE as u32)] block_size: u32,
        stats: Option<TableStats>,
    ) -> DbResult<Rc<Self>> {
        for (n, values) in rows.iter().enumerate() {
            if values.len() != meta.schema.columns.len() {
                return Err(DbError::Storage(format!(
                    "row {n} has {} values, table '{}' has {} columns",
                    values.len(),
                    meta.name,
                    meta.schema.columns.len()
                )));
            }
            for (value, column) in values.iter().zip(&meta.schema.columns) {
                if !value.fits(&column.ty) {
                    return Err(DbError::Storage(format!(
                        "row {n}: value {value} does not fit column '{}'",
                        column.name
                    )));
                }
            }
        }

        let pk = meta.primary_key();
        let clustered = clustered && pk.is_some();
        let mut rows = rows;
        if let (true, Some(pk)) = (clustered, pk) {
            let cols = meta.indexes[pk].columns.clone();
            rows.sort_by(|a, b| key_of(a, &cols).cmp(&key_of(b, &cols)));
        }

        let rows: Vec<Row> = rows
            .into_iter()
            .enumerate()
            .map(|(pos, values)| Row::new(values).with_rid(RowId(pos as u64)))
            .collect();

        let mut indexes = Vec::with_capacity(meta.indexes.len());
        for index in &meta.indexes {
            let mut entries: Vec<IndexEntry> = rows
                .iter()
                .enumerate()
                .map(|(pos, row)| IndexEntry {
                    key: key_of(&row.values, &index.columns),
                    rowid: RowId(pos as u64),
                    pk: match (clustered, pk) {
                        (true, Some(pk)) => Some(key_of(&row.values, &meta.indexes[pk].columns)),
                        _ => None,
                    },
                })
                .collect();
            entries.sort_by(|a, b| a.key.cmp(&b.key).then(a.rowid.cmp(&b.rowid)));

            if index.primary && entries.iter().any(|e| e.key.iter().any(Value::is_null)) {
                return Err(DbError::Storage(format!(
                    "primary key '{}' contains NULL",
                    index.name
                )));
            }
            if index.unique {
                let dup = entries.windows(2).find(|w| {
                    w[0].key == w[1].key && !w[0].key.iter().any(Value::is_null)
                });
                if let Some(w) = dup {
                    return Err(DbError::Storage(format!(
                        "duplicate key {:?} in unique index '{}'",
                        w[0].key, index.name
                    )));
                }
            }
            indexes.push(entries);
        }

        let measured = measure(&rows, block_size)?;
        let table = MemoryTable {
            meta,
            rows,
            indexes,
            clustered,
            stats: stats.unwrap_or(measured),
            counters: EngineCounters::default(),
        };
        trace!(table = %table.meta.name, rows = table.rows.len(), "loaded memory table");
        Ok(Rc::new(table))
    }
}

impl MemoryTable {
    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    pub fn counters(&self) -> &EngineCounters {
        &self.counters
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Open a cursor with no active scan.
    pub fn cursor(self: &Rc<Self>) -> MemoryCursor {
        MemoryCursor {
            table: Rc::clone(self),
            mode: None,
            pos: -1,
            current: None,
        }
    }

    fn entries(&self, keynr: usize) -> DbResult<&[IndexEntry]> {
        self.indexes
            .get(keynr)
            .map(Vec::as_slice)
            .ok_or_else(|| DbError::Storage(format!("no index number {keynr}")))
    }
}

fn key_of(values: &[Value], columns: &[u16]) -> Vec<Value> {
    columns
        .iter()
        .map(|c| values.get(*c as usize).cloned().unwrap_or(Value::Null))
        .collect()
}

fn measure(rows: &[Row], block_size: u32) -> DbResult<TableStats> {
    let mut data_file_length = 0u64;
    for row in rows {
        let bytes = encode_to_vec(&row.values, config::legacy())
            .map_err(|e| DbError::Storage(format!("serialize row failed: {e}")))?;
        data_file_length += bytes.len() as u64;
    }
    let records = rows.len() as u64;
    Ok(TableStats {
        records,
        data_file_length,
        block_size,
        ref_length: std::mem::size_of::<RowId>() as u32,
        mean_rec_length: if records == 0 {
            0
        } else {
            data_file_length / records
        },
    })
}

/// Cursor over a [`MemoryTable`].
///
/// Dropping the cursor ends any scan it still has open.
#[derive(Debug)]
pub struct MemoryCursor {
    table: Rc<MemoryTable>,
    mode: Option<ScanMode>,
    pos: isize,
    current: Option<RowId>,
}

impl MemoryCursor {
    pub fn table(&self) -> &Rc<MemoryTable> {
        &self.table
    }

    fn active_index(&self) -> DbResult<usize> {
        match self.mode {
            Some(ScanMode::Index { keynr, .. }) => Ok(keynr),
            _ => Err(DbError::Storage("no active index scan".into())),
        }
    }

    fn land(&mut self, keynr: usize, pos: Option<usize>, forward: bool) -> DbResult<Option<IndexEntry>> {
        let entries = self.table.entries(keynr)?;
        match pos {
            Some(i) => {
                self.table.counters.charge(&self.table.counters.index_reads)?;
                self.pos = i as isize;
                let entry = entries[i].clone();
                self.current = Some(entry.rowid);
                Ok(Some(entry))
            }
            None => {
                self.pos = if forward { entries.len() as isize } else { -1 };
                self.current = None;
                Ok(None)
            }
        }
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        if self.mode.is_some() {
            let open = &self.table.counters.open_scans;
            open.set(open.get().saturating_sub(1));
        }
    }
}

impl Cursor for MemoryCursor {
    fn stats(&self) -> TableStats {
        self.table.stats
    }

    fn key_length(&self, keynr: usize) -> u32 {
        self.table.meta.key_length(keynr)
    }

    fn primary_key_is_clustered(&self) -> bool {
        self.table.clustered
    }

    fn is_clustered(&self, keynr: usize) -> bool {
        self.table.clustered && self.table.meta.primary_key() == Some(keynr)
    }

    fn is_rowid_ordered(&self, keynr: usize) -> bool {
        self.table
            .meta
            .indexes
            .get(keynr)
            .is_some_and(|index| index.kind == IndexKind::BTree)
    }

    fn estimated_rows(
        &self,
        keynr: usize,
        min: Bound<&[Value]>,
        max: Bound<&[Value]>,
    ) -> DbResult<u64> {
        EngineCounters::bump(&self.table.counters.estimates);
        let entries = self.table.entries(keynr)?;
        let index = &self.table.meta.indexes[keynr];
        if index.kind == IndexKind::Hash {
            // hash lookups only answer full-key equality
            let full = index.columns.len();
            return Ok(match (min, max) {
                (Bound::Included(lo), Bound::Included(hi)) if lo == hi && lo.len() == full => {
                    entries.iter().filter(|e| e.key.as_slice() == lo).count() as u64
                }
                _ => u64::MAX,
            });
        }

        let start = match min {
            Bound::Unbounded => 0,
            Bound::Included(k) => entries.partition_point(|e| prefix_cmp(&e.key, k) == Ordering::Less),
            Bound::Excluded(k) => {
                entries.partition_point(|e| prefix_cmp(&e.key, k) != Ordering::Greater)
            }
        };
        let end = match max {
            Bound::Unbounded => entries.len(),
            Bound::Included(k) => {
                entries.partition_point(|e| prefix_cmp(&e.key, k) != Ordering::Greater)
            }
            Bound::Excluded(k) => entries.partition_point(|e| prefix_cmp(&e.key, k) == Ordering::Less),
        };
        Ok(end.saturating_sub(start) as u64)
    }

    fn rec_per_key(&self, keynr: usize, parts: usize) -> Option<u64> {
        let entries = self.table.indexes.get(keynr)?;
        if entries.is_empty() || parts == 0 {
            return None;
        }
        let distinct = 1 + entries
            .windows(2)
            .filter(|w| w[0].key[..parts.min(w[0].key.len())] != w[1].key[..parts.min(w[1].key.len())])
            .count();
        Some((entries.len() / distinct).max(1) as u64)
    }

    fn start_scan(&mut self, mode: ScanMode) -> DbResult<()> {
        if let ScanMode::Index { keynr, .. } = mode {
            self.table.entries(keynr)?;
        }
        if self.mode.is_none() {
            EngineCounters::bump(&self.table.counters.open_scans);
        }
        EngineCounters::bump(&self.table.counters.scans_started);
        self.mode = Some(mode);
        self.pos = -1;
        self.current = None;
        Ok(())
    }

    fn end_scan(&mut self) -> DbResult<()> {
        if self.mode.take().is_some() {
            let open = &self.table.counters.open_scans;
            open.set(open.get().saturating_sub(1));
        }
        self.current = None;
        Ok(())
    }

    fn seek(&mut self, key: &[Value], mode: SeekMode) -> DbResult<Option<IndexEntry>> {
        let keynr = self.active_index()?;
        EngineCounters::bump(&self.table.counters.seeks);
        let entries = self.table.entries(keynr)?;
        let lower = entries.partition_point(|e| prefix_cmp(&e.key, key) == Ordering::Less);
        let upper = entries.partition_point(|e| prefix_cmp(&e.key, key) != Ordering::Greater);
        let (pos, forward) = match mode {
            SeekMode::KeyExact => ((lower < upper).then_some(lower), true),
            SeekMode::KeyOrNext => ((lower < entries.len()).then_some(lower), true),
            SeekMode::AfterKey => ((upper < entries.len()).then_some(upper), true),
            SeekMode::BeforeKey => (lower.checked_sub(1), false),
            SeekMode::PrefixLast => ((lower < upper).then(|| upper - 1), false),
            SeekMode::PrefixLastOrPrev => (upper.checked_sub(1), false),
        };
        self.land(keynr, pos, forward)
    }

    fn first_in_index(&mut self) -> DbResult<Option<IndexEntry>> {
        let keynr = self.active_index()?;
        let len = self.table.entries(keynr)?.len();
        self.land(keynr, (len > 0).then_some(0), true)
    }

    fn next_in_index(&mut self) -> DbResult<Option<IndexEntry>> {
        let keynr = self.active_index()?;
        let len = self.table.entries(keynr)?.len() as isize;
        let next = self.pos + 1;
        self.land(keynr, (next < len).then_some(next as usize), true)
    }

    fn prev_in_index(&mut self) -> DbResult<Option<IndexEntry>> {
        let keynr = self.active_index()?;
        let prev = self.pos - 1;
        self.land(keynr, (prev >= 0).then_some(prev as usize), false)
    }

    fn current_rowid(&self) -> Option<RowId> {
        self.current
    }

    fn fetch_by_rowid(&mut self, rowid: RowId) -> DbResult<Row> {
        self.table.counters.charge(&self.table.counters.row_fetches)?;
        self.table
            .rows
            .get(rowid.0 as usize)
            .cloned()
            .ok_or_else(|| DbError::Storage(format!("no row with rowid {}", rowid.0)))
    }

    fn table_next(&mut self) -> DbResult<Option<Row>> {
        if self.mode != Some(ScanMode::Table) {
            return Err(DbError::Storage("no active table scan".into()));
        }
        let next = self.pos + 1;
        match self.table.rows.get(next as usize) {
            Some(row) => {
                self.table.counters.charge(&self.table.counters.table_reads)?;
                self.pos = next;
                self.current = row.rid();
                Ok(Some(row.clone()))
            }
            None => {
                self.current = None;
                Ok(None)
            }
        }
    }

    fn compare_rowid(&self, a: RowId, b: RowId) -> Ordering {
        a.0.cmp(&b.0)
    }

    fn clone_cursor(&self) -> DbResult<Box<dyn Cursor>> {
        Ok(Box::new(self.table.cursor()))
    }
}
