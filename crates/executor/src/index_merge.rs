//! Sort-union of range scans whose output is not in rowid order.
//!
//! `reset` runs every member to exhaustion in index-only mode and collects
//! the rowids into a [`Unique`]. `get_next` then fetches the rows in rowid
//! order, one fetch per distinct rowid. When a member scans the clustered
//! primary key, its rows are skipped during collection (the primary key value
//! in every secondary entry tells whether the key scan will return it) and
//! the key scan runs last.

use std::{path::PathBuf, time::Instant};

use common::{DbError, DbResult, ExecutionStats, Row, RowId};
use storage::Cursor;
use tracing::debug;

use crate::{
    range::{QuickRangeSelect, ScanState},
    unique::{Unique, UniqueIter},
};

enum MergePhase {
    Idle,
    Rowids(UniqueIter<RowId>),
    ClusteredScan,
    Done,
}

pub struct QuickIndexMergeSelect {
    cursor: Box<dyn Cursor>,
    scans: Vec<QuickRangeSelect>,
    cpk: Option<QuickRangeSelect>,
    /// Rowids the collector holds in memory before spilling a run.
    unique_capacity: u64,
    tmp_dir: Option<PathBuf>,
    phase: MergePhase,
    state: ScanState,
    stats: ExecutionStats,
}

impl QuickIndexMergeSelect {
    pub(crate) fn new(
        cursor: Box<dyn Cursor>,
        scans: Vec<QuickRangeSelect>,
        cpk: Option<QuickRangeSelect>,
        unique_capacity: u64,
        tmp_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            cursor,
            scans,
            cpk,
            unique_capacity,
            tmp_dir,
            phase: MergePhase::Idle,
            state: ScanState::Uninitialized,
            stats: ExecutionStats::default(),
        }
    }

    pub fn init(&mut self) -> DbResult<()> {
        let start = Instant::now();
        for scan in self.scans.iter_mut().chain(&mut self.cpk) {
            scan.init()?;
        }
        self.state = ScanState::Ready;
        self.stats.open_time += start.elapsed();
        debug!(members = self.scans.len(), cpk = self.cpk.is_some(), "index merge init");
        Ok(())
    }

    /// Collect and deduplicate the rowids of every non-clustered member.
    pub fn reset(&mut self) -> DbResult<()> {
        let start = Instant::now();
        if self.state == ScanState::Uninitialized {
            return Err(DbError::Executor("index merge reset before init".into()));
        }
        self.phase = MergePhase::Idle;
        if let Some(cpk) = &mut self.cpk {
            cpk.range_end()?;
        }

        let mut unique = Unique::new(self.unique_capacity, self.tmp_dir.clone());
        let mut skipped = 0u64;
        for scan in &mut self.scans {
            scan.range_end()?;
            scan.reset()?;
            while let Some(entry) = scan.next_entry()? {
                let in_cpk = match (&self.cpk, entry.pk.as_deref()) {
                    (Some(cpk), Some(pk)) => cpk.row_in_ranges(pk),
                    _ => false,
                };
                if in_cpk {
                    skipped += 1;
                    continue;
                }
                unique.insert(entry.rowid)?;
            }
            scan.range_end()?;
        }
        debug!(
            rowids = unique.size(),
            runs = unique.spilled_runs(),
            skipped,
            "index merge collected rowids"
        );
        self.phase = MergePhase::Rowids(unique.into_sorted()?);
        self.state = ScanState::Scanning;
        self.stats.open_time += start.elapsed();
        Ok(())
    }

    pub fn get_next(&mut self) -> DbResult<Option<Row>> {
        let start = Instant::now();
        let row = self.next_row()?;
        self.stats.total_next_time += start.elapsed();
        if row.is_some() {
            self.stats.rows_produced += 1;
        }
        Ok(row)
    }

    fn next_row(&mut self) -> DbResult<Option<Row>> {
        loop {
            match &mut self.phase {
                MergePhase::Idle => {
                    return Err(DbError::Executor("index merge read before reset".into()));
                }
                MergePhase::Rowids(rowids) => match rowids.next() {
                    Some(rowid) => {
                        let rowid = rowid?;
                        let mut row = self.cursor.fetch_by_rowid(rowid)?;
                        row.set_rid(Some(rowid));
                        return Ok(Some(row));
                    }
                    None => match &mut self.cpk {
                        Some(cpk) => {
                            cpk.reset()?;
                            self.phase = MergePhase::ClusteredScan;
                        }
                        None => self.phase = MergePhase::Done,
                    },
                },
                MergePhase::ClusteredScan => {
                    let Some(cpk) = &mut self.cpk else {
                        self.phase = MergePhase::Done;
                        continue;
                    };
                    match cpk.get_next()? {
                        Some(row) => return Ok(Some(row)),
                        None => {
                            cpk.range_end()?;
                            self.phase = MergePhase::Done;
                        }
                    }
                }
                MergePhase::Done => {
                    self.state = ScanState::Exhausted;
                    return Ok(None);
                }
            }
        }
    }

    /// Members in plan order, the clustered primary key scan last.
    pub fn members(&self) -> impl Iterator<Item = &QuickRangeSelect> {
        self.scans.iter().chain(&self.cpk)
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }
}
