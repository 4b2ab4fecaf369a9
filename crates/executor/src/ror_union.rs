//! Rowid-ordered union of rowid-ordered children.
//!
//! A min-queue holds the current rowid of every child. The smallest is popped,
//! its child advanced and pushed back, and a rowid equal to the previous one
//! is dropped. The queue never compares rowids itself; it is handed the
//! engine's comparison on every operation.

use std::{cmp::Ordering, time::Instant};

use common::{DbResult, ExecutionStats, Row, RowId};
use storage::Cursor;
use tracing::debug;

use crate::{range::ScanState, QuickSelect};

/// Binary min-heap of `(rowid, child)` pairs.
///
/// Ties on rowid fall back to the child position so the order is total.
#[derive(Debug, Default)]
pub(crate) struct RowidQueue {
    heap: Vec<(RowId, usize)>,
}

impl RowidQueue {
    fn less(&self, a: usize, b: usize, cmp: &dyn Fn(RowId, RowId) -> Ordering) -> bool {
        let (ra, ca) = self.heap[a];
        let (rb, cb) = self.heap[b];
        cmp(ra, rb).then(ca.cmp(&cb)) == Ordering::Less
    }

    pub(crate) fn push(&mut self, item: (RowId, usize), cmp: &dyn Fn(RowId, RowId) -> Ordering) {
        self.heap.push(item);
        let mut pos = self.heap.len() - 1;
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.less(pos, parent, cmp) {
                break;
            }
            self.heap.swap(pos, parent);
            pos = parent;
        }
    }

    pub(crate) fn pop(&mut self, cmp: &dyn Fn(RowId, RowId) -> Ordering) -> Option<(RowId, usize)> {
        if self.heap.is_empty() {
            return None;
        }
        let top = self.heap.swap_remove(0);
        let len = self.heap.len();
        let mut pos = 0;
        loop {
            let (left, right) = (2 * pos + 1, 2 * pos + 2);
            let mut smallest = pos;
            if left < len && self.less(left, smallest, cmp) {
                smallest = left;
            }
            if right < len && self.less(right, smallest, cmp) {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.heap.swap(pos, smallest);
            pos = smallest;
        }
        Some(top)
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}

pub struct QuickRorUnionSelect {
    cursor: Box<dyn Cursor>,
    children: Vec<QuickSelect>,
    queue: RowidQueue,
    last: Option<RowId>,
    state: ScanState,
    stats: ExecutionStats,
}

impl QuickRorUnionSelect {
    pub(crate) fn new(cursor: Box<dyn Cursor>, children: Vec<QuickSelect>) -> Self {
        Self {
            cursor,
            children,
            queue: RowidQueue::default(),
            last: None,
            state: ScanState::Uninitialized,
            stats: ExecutionStats::default(),
        }
    }

    pub fn init(&mut self) -> DbResult<()> {
        let start = Instant::now();
        for child in &mut self.children {
            child.init()?;
        }
        self.state = ScanState::Ready;
        self.stats.open_time += start.elapsed();
        debug!(children = self.children.len(), "ror union init");
        Ok(())
    }

    /// Restart every child and load its first rowid into the queue.
    pub fn reset(&mut self) -> DbResult<()> {
        let start = Instant::now();
        self.queue.clear();
        self.last = None;
        let cursor = &self.cursor;
        let cmp = |a: RowId, b: RowId| cursor.compare_rowid(a, b);
        for (n, child) in self.children.iter_mut().enumerate() {
            child.reset()?;
            if let Some(rowid) = child.next_rowid()? {
                self.queue.push((rowid, n), &cmp);
            }
        }
        self.state = ScanState::Scanning;
        self.stats.open_time += start.elapsed();
        debug!(children = self.children.len(), queued = self.queue.len(), "ror union reset");
        Ok(())
    }

    pub(crate) fn next_rowid(&mut self) -> DbResult<Option<RowId>> {
        if self.state != ScanState::Scanning {
            return Ok(None);
        }
        let cursor = &self.cursor;
        let cmp = |a: RowId, b: RowId| cursor.compare_rowid(a, b);
        loop {
            let Some((rowid, child)) = self.queue.pop(&cmp) else {
                self.state = ScanState::Exhausted;
                return Ok(None);
            };
            if let Some(next) = self.children[child].next_rowid()? {
                self.queue.push((next, child), &cmp);
            }
            if self.last.is_some_and(|last| cmp(last, rowid) == Ordering::Equal) {
                continue;
            }
            self.last = Some(rowid);
            return Ok(Some(rowid));
        }
    }

    pub fn get_next(&mut self) -> DbResult<Option<Row>> {
        let start = Instant::now();
        let row = match self.next_rowid()? {
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

    pub fn children(&self) -> &[QuickSelect] {
        &self.children
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }
}
