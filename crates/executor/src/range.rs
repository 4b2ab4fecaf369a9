//! Range scan over one index.
//!
//! Each range is entered with one seek and then walked with index-next until
//! an entry falls past its end; the scan then seeks to the next range. Ranges
//! are disjoint and ascending, so the cursor only ever moves forward.
//!
//! ```text
//! Uninitialized ─init()─▶ Ready ─reset()─▶ Scanning ─last range done─▶ Exhausted
//!                           ▲                                              │
//!                           └──────────────────range_end()─────────────────┘
//! ```

use std::{ops::Bound, time::Instant};

use common::{DbError, DbResult, ExecutionStats, Row};
use planner::{QuickRange, RangeReadPlan};
use storage::{Cursor, IndexEntry, ScanMode, SeekMode};
use tracing::{debug, trace};
use types::Value;

use crate::keyread::KeyLayout;

/// Lifecycle of a scan-driving iterator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanState {
    Uninitialized,
    Ready,
    Scanning,
    Exhausted,
}

/// Ordered sequence of range seeks against one index.
pub struct QuickRangeSelect {
    cursor: Box<dyn Cursor>,
    keynr: usize,
    key_name: String,
    max_used_key_length: u32,
    ranges: Vec<QuickRange>,
    /// Rows are built from index entries instead of fetched.
    keyread: bool,
    layout: KeyLayout,
    state: ScanState,
    /// Range being walked.
    current: usize,
    /// The cursor is positioned inside `ranges[current]`.
    in_range: bool,
    stats: ExecutionStats,
}

#[bon::bon]
impl QuickRangeSelect {
    /// Create a range select over `plan`'s ranges using its own `cursor`.
    #[builder]
    pub(crate) fn new(
        cursor: Box<dyn Cursor>,
        plan: &RangeReadPlan,
        layout: KeyLayout,
        #[builder(default)] keyread: bool,
    ) -> Self {
        Self {
            cursor,
            keynr: plan.keynr,
            key_name: plan.key_name.clone(),
            max_used_key_length: plan.max_used_key_length,
            ranges: plan.ranges.clone(),
            keyread,
            layout,
            state: ScanState::Uninitialized,
            current: 0,
            in_range: false,
            stats: ExecutionStats::default(),
        }
    }
}

impl QuickRangeSelect {
    pub fn init(&mut self) -> DbResult<()> {
        let start = Instant::now();
        if self
            .ranges
            .windows(2)
            .any(|w| w[0].max_bound() == Bound::Unbounded || w[0].min_key > w[1].min_key)
        {
            return Err(DbError::Executor(format!(
                "ranges of index '{}' are not ascending",
                self.key_name
            )));
        }
        self.state = ScanState::Ready;
        self.stats.open_time += start.elapsed();
        debug!(index = %self.key_name, ranges = self.ranges.len(), "range select init");
        Ok(())
    }

    /// Start (or restart) the scan at the first range.
    pub fn reset(&mut self) -> DbResult<()> {
        let start = Instant::now();
        if self.state == ScanState::Uninitialized {
            return Err(DbError::Executor(format!(
                "range select on '{}' reset before init",
                self.key_name
            )));
        }
        self.cursor.start_scan(ScanMode::Index {
            keynr: self.keynr,
            keyread: self.keyread,
        })?;
        self.current = 0;
        self.in_range = false;
        self.state = ScanState::Scanning;
        self.stats.open_time += start.elapsed();
        debug!(index = %self.key_name, keyread = self.keyread, "range select reset");
        Ok(())
    }

    /// End the scan; the select can be reset again.
    pub fn range_end(&mut self) -> DbResult<()> {
        if matches!(self.state, ScanState::Scanning | ScanState::Exhausted) {
            self.cursor.end_scan()?;
            self.state = ScanState::Ready;
        }
        Ok(())
    }

    /// Next index entry inside some range, in key order.
    pub(crate) fn next_entry(&mut self) -> DbResult<Option<IndexEntry>> {
        match self.state {
            ScanState::Scanning => {}
            ScanState::Exhausted => return Ok(None),
            ScanState::Uninitialized | ScanState::Ready => {
                return Err(DbError::Executor(format!(
                    "range select on '{}' read before reset",
                    self.key_name
                )));
            }
        }
        loop {
            let entry = if self.in_range {
                self.cursor.next_in_index()?
            } else {
                let Some(range) = self.ranges.get(self.current) else {
                    self.state = ScanState::Exhausted;
                    return Ok(None);
                };
                self.stats.index_seeks += 1;
                self.in_range = true;
                match range.min_bound() {
                    Bound::Unbounded => self.cursor.first_in_index()?,
                    Bound::Included(key) => self.cursor.seek(key, SeekMode::KeyOrNext)?,
                    Bound::Excluded(key) => self.cursor.seek(key, SeekMode::AfterKey)?,
                }
            };

            let range = &self.ranges[self.current];
            match entry {
                Some(entry) if !range.is_past_end(&entry.key) => {
                    if range.passes_filter(&entry.key) {
                        return Ok(Some(entry));
                    }
                    self.stats.rows_filtered += 1;
                    trace!(index = %self.key_name, key = ?entry.key, "entry rejected by key part filter");
                }
                _ => {
                    self.current += 1;
                    self.in_range = false;
                }
            }
        }
    }

    /// Next row inside some range.
    pub fn get_next(&mut self) -> DbResult<Option<Row>> {
        let start = Instant::now();
        let row = match self.next_entry()? {
            Some(entry) => Some(self.row_for(&entry)?),
            None => None,
        };
        self.stats.total_next_time += start.elapsed();
        if row.is_some() {
            self.stats.rows_produced += 1;
        }
        Ok(row)
    }

    fn row_for(&mut self, entry: &IndexEntry) -> DbResult<Row> {
        if self.keyread {
            Ok(self.layout.row(entry))
        } else {
            let mut row = self.cursor.fetch_by_rowid(entry.rowid)?;
            row.set_rid(Some(entry.rowid));
            Ok(row)
        }
    }

    /// True when `key`, a full key of this index, lies in one of the ranges.
    pub fn row_in_ranges(&self, key: &[Value]) -> bool {
        let first = self.ranges.partition_point(|r| r.is_past_end(key));
        self.ranges
            .get(first)
            .is_some_and(|range| range.contains_key(key))
    }

    pub(crate) fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    pub fn keynr(&self) -> usize {
        self.keynr
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    pub fn max_used_key_length(&self) -> u32 {
        self.max_used_key_length
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }
}

impl Drop for QuickRangeSelect {
    fn drop(&mut self) {
        if let Err(e) = self.range_end() {
            debug!(index = %self.key_name, error = %e, "end_scan failed on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::helpers::range_plan;
    use expr::Expr;
    use pretty_assertions::assert_eq;
    use testsupport::{
        assertions::rowids,
        fixtures::{abc_table_with, big_stats, ints},
    };

    fn range_select(cond: Expr, keyread: bool) -> (std::rc::Rc<storage::MemoryTable>, QuickRangeSelect) {
        let table = abc_table_with(Some(big_stats()));
        let plan = range_plan(&table, cond, "i_ab");
        let layout = KeyLayout::new(table.meta(), plan.keynr).unwrap();
        let quick = QuickRangeSelect::builder()
            .cursor(Box::new(table.cursor()))
            .plan(&plan)
            .layout(layout)
            .keyread(keyread)
            .build();
        (table, quick)
    }

    #[test]
    fn keys_come_back_in_index_order() {
        let cond = Expr::col("a").in_list(vec![Expr::int(3), Expr::int(1)]);
        let (_table, mut quick) = range_select(cond, true);
        quick.init().unwrap();
        quick.reset().unwrap();
        let mut keys = Vec::new();
        while let Some(entry) = quick.next_entry().unwrap() {
            keys.push(entry.key);
        }
        assert!(!keys.is_empty());
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
        assert!(keys.iter().all(|k| matches!(k[0], Value::Int(1 | 3))));
        assert_eq!(quick.stats().index_seeks, 2);
        assert_eq!(quick.state(), ScanState::Exhausted);
    }

    #[test]
    fn filter_drops_entries_between_compound_endpoints() {
        let cond = Expr::col("a")
            .between(Expr::int(1), Expr::int(3))
            .and(Expr::col("b").in_list(vec![Expr::int(1), Expr::int(2)]));
        let (table, mut quick) = range_select(cond.clone(), false);
        quick.init().unwrap();
        quick.reset().unwrap();
        let mut rows = Vec::new();
        while let Some(row) = quick.get_next().unwrap() {
            rows.push(row);
        }
        let expected: Vec<_> = table
            .rows()
            .iter()
            .filter(|r| {
                matches!(r.values[1], Value::Int(1..=3))
                    && matches!(r.values[2], Value::Int(1..=2))
            })
            .map(|r| r.rid().unwrap())
            .collect();
        let mut got = rowids(&rows);
        got.sort();
        assert_eq!(got, expected);
        assert!(quick.stats().rows_filtered > 0);
    }

    #[test]
    fn reading_before_reset_is_an_error() {
        let (_table, mut quick) = range_select(Expr::col("a").eq(Expr::int(2)), false);
        assert!(quick.reset().is_err());
        quick.init().unwrap();
        let err = quick.get_next().unwrap_err();
        assert!(err.to_string().contains("before reset"));
    }

    #[test]
    fn restart_after_range_end_repeats_rows() {
        let (table, mut quick) = range_select(Expr::col("a").eq(Expr::int(2)), false);
        quick.init().unwrap();
        let mut passes = Vec::new();
        for _ in 0..2 {
            quick.reset().unwrap();
            let mut rows = Vec::new();
            while let Some(row) = quick.get_next().unwrap() {
                rows.push(row);
            }
            quick.range_end().unwrap();
            passes.push(rows);
        }
        assert_eq!(passes[0], passes[1]);
        assert_eq!(passes[0].len(), 8);
        assert_eq!(table.counters().snapshot().open_scans, 0);
    }

    #[test]
    fn drop_ends_open_scan() {
        let (table, mut quick) = range_select(Expr::col("a").eq(Expr::int(2)), false);
        quick.init().unwrap();
        quick.reset().unwrap();
        quick.get_next().unwrap();
        assert_eq!(table.counters().snapshot().open_scans, 1);
        drop(quick);
        assert_eq!(table.counters().snapshot().open_scans, 0);
    }

    #[test]
    fn engine_errors_propagate() {
        let (table, mut quick) = range_select(Expr::col("a").eq(Expr::int(2)), false);
        quick.init().unwrap();
        quick.reset().unwrap();
        table.counters().fail_after_reads(3);
        let mut result = Ok(None);
        for _ in 0..20 {
            result = quick.get_next();
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(DbError::Storage(_))));
    }

    #[test]
    fn row_in_ranges_checks_full_keys() {
        let cond = Expr::col("a").in_list(vec![Expr::int(1), Expr::int(3)]);
        let (_table, quick) = range_select(cond, false);
        assert!(quick.row_in_ranges(&ints(&[1, 9])));
        assert!(quick.row_in_ranges(&ints(&[3, 0])));
        assert!(!quick.row_in_ranges(&ints(&[2, 1])));
        assert!(!quick.row_in_ranges(&ints(&[4, 1])));
    }
}
