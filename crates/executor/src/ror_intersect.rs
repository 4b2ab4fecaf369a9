//! Rowid-ordered intersection of range scans.
//!
//! Every member returns its entries in rowid order, so the intersection is a
//! lockstep walk: one candidate rowid, and each member is advanced until it
//! reaches or passes the candidate. A member that passes it raises the
//! candidate; once all members sit on the candidate the row qualifies.
//!
//! A clustered primary key member is never scanned. Its ranges only filter
//! candidates by the primary key value carried in the secondary entries.

use std::{cmp::Ordering, time::Instant};

use common::{DbError, DbResult, ExecutionStats, Row, RowId};
use storage::{Cursor, IndexEntry};
use tracing::debug;
use types::Value;

use crate::range::{QuickRangeSelect, ScanState};

pub struct QuickRorIntersectSelect {
    /// Handle used to fetch qualifying rows.
    cursor: Box<dyn Cursor>,
    scans: Vec<QuickRangeSelect>,
    cpk: Option<QuickRangeSelect>,
    /// Members hold every needed column, so rows are built from their entries.
    covering: bool,
    /// Entry each member is positioned on.
    current: Vec<Option<IndexEntry>>,
    state: ScanState,
    stats: ExecutionStats,
}

impl QuickRorIntersectSelect {
    pub(crate) fn new(
        cursor: Box<dyn Cursor>,
        scans: Vec<QuickRangeSelect>,
        cpk: Option<QuickRangeSelect>,
        covering: bool,
    ) -> DbResult<Self> {
        if scans.is_empty() {
            return Err(DbError::Executor("rowid intersection without members".into()));
        }
        let n = scans.len();
        Ok(Self {
            cursor,
            scans,
            cpk,
            covering,
            current: vec![None; n],
            state: ScanState::Uninitialized,
            stats: ExecutionStats::default(),
        })
    }

    pub fn init(&mut self) -> DbResult<()> {
        let start = Instant::now();
        for scan in &mut self.scans {
            scan.init()?;
        }
        if let Some(cpk) = &mut self.cpk {
            cpk.init()?;
        }
        self.state = ScanState::Ready;
        self.stats.open_time += start.elapsed();
        debug!(members = self.scans.len(), cpk = self.cpk.is_some(), "ror intersect init");
        Ok(())
    }

    pub fn reset(&mut self) -> DbResult<()> {
        let start = Instant::now();
        for scan in &mut self.scans {
            scan.range_end()?;
            scan.reset()?;
        }
        self.current.iter_mut().for_each(|entry| *entry = None);
        self.state = ScanState::Scanning;
        self.stats.open_time += start.elapsed();
        debug!(members = self.scans.len(), covering = self.covering, "ror intersect reset");
        Ok(())
    }

    /// Advance member `i` to its first entry at or past `candidate`.
    fn advance_to(&mut self, i: usize, candidate: RowId) -> DbResult<Option<Ordering>> {
        loop {
            let Some(entry) = self.scans[i].next_entry()? else {
                return Ok(None);
            };
            let order = self.cursor.compare_rowid(entry.rowid, candidate);
            if order != Ordering::Less {
                self.current[i] = Some(entry);
                return Ok(Some(order));
            }
        }
    }

    fn cpk_accepts(&self) -> bool {
        let Some(cpk) = &self.cpk else {
            return true;
        };
        let pk = self
            .current
            .iter()
            .flatten()
            .find_map(|entry| entry.pk.as_deref());
        pk.is_none_or(|pk| cpk.row_in_ranges(pk))
    }

    /// Next rowid present in every member.
    pub(crate) fn next_rowid(&mut self) -> DbResult<Option<RowId>> {
        if self.state == ScanState::Exhausted {
            return Ok(None);
        }
        let n = self.scans.len();
        loop {
            let Some(first) = self.scans[0].next_entry()? else {
                self.state = ScanState::Exhausted;
                return Ok(None);
            };
            let mut candidate = first.rowid;
            self.current[0] = Some(first);

            let mut matched = 1;
            let mut i = 1 % n;
            while matched < n {
                match self.advance_to(i, candidate)? {
                    None => {
                        self.state = ScanState::Exhausted;
                        return Ok(None);
                    }
                    Some(Ordering::Greater) => {
                        if let Some(entry) = &self.current[i] {
                            candidate = entry.rowid;
                        }
                        matched = 1;
                    }
                    Some(_) => matched += 1,
                }
                i = (i + 1) % n;
            }

            if self.cpk_accepts() {
                return Ok(Some(candidate));
            }
            self.stats.rows_filtered += 1;
        }
    }

    pub fn get_next(&mut self) -> DbResult<Option<Row>> {
        let start = Instant::now();
        let row = match self.next_rowid()? {
            Some(rowid) if self.covering => Some(self.covering_row(rowid)),
            Some(rowid) => {
                let mut row = self.cursor.fetch_by_rowid(rowid)?;
                row.set_rid(Some(rowid));
                Some(row)
            }
            None => None,
        };
        self.stats.total_next_time += start.elapsed();
        if row.is_some() {
            self.stats.rows_produced += 1;
        }
        Ok(row)
    }

    fn covering_row(&self, rowid: RowId) -> Row {
        let width = self.scans[0].layout().width();
        let mut values = vec![Value::Null; width];
        for (scan, entry) in self.scans.iter().zip(&self.current) {
            if let Some(entry) = entry {
                scan.layout().fill(entry, &mut values);
            }
        }
        Row::new(values).with_rid(rowid)
    }

    pub fn scans(&self) -> &[QuickRangeSelect] {
        &self.scans
    }

    pub fn cpk(&self) -> Option<&QuickRangeSelect> {
        self.cpk.as_ref()
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }
}
