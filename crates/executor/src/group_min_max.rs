//! Loose index scan for grouped MIN/MAX.
//!
//! The scan visits each distinct group prefix of the index once. Within a
//! group the MIN is found by seeking forward into the first range on the
//! MIN/MAX key part and the MAX by seeking backward into the last one, so
//! only a handful of entries per group are read no matter how large the
//! group is.
//!
//! ```text
//! group g=1:  seek(AfterKey [0]) ──▶ (1, ..)        next group
//!             seek(KeyOrNext [1, min]) ──▶ MIN      forward walk, NULLs skipped
//!             seek(PrefixLastOrPrev [1, max]) ──▶ MAX  backward walk
//! ```
//!
//! The whole predicate is re-checked on every entry the walks touch, so the
//! ranges only narrow where the walks start.

use std::{cmp::Ordering, time::Instant};

use common::{DbError, DbResult, ExecutionStats, Row};
use expr::{EvalContext, Expr};
use planner::{GroupMinMaxReadPlan, Interval, RangeFlags};
use storage::{prefix_cmp, Cursor, IndexEntry, ScanMode, SeekMode};
use tracing::{debug, trace};
use types::Value;

use crate::{keyread::KeyLayout, range::ScanState};

pub struct QuickGroupMinMaxSelect {
    cursor: Box<dyn Cursor>,
    plan: GroupMinMaxReadPlan,
    layout: KeyLayout,
    /// Column names of the table, for evaluating the predicate.
    schema: Vec<String>,
    cond: Option<Expr>,
    last_group: Option<Vec<Value>>,
    state: ScanState,
    stats: ExecutionStats,
}

fn past_max(interval: &Interval, v: &Value) -> bool {
    if !interval.has_max() {
        return false;
    }
    match v.cmp(&interval.max) {
        Ordering::Greater => true,
        Ordering::Equal => interval.max_flag.contains(RangeFlags::NEAR_MAX),
        Ordering::Less => false,
    }
}

fn before_min(interval: &Interval, v: &Value) -> bool {
    if !interval.has_min() {
        return false;
    }
    match v.cmp(&interval.min) {
        Ordering::Less => true,
        Ordering::Equal => interval.min_flag.contains(RangeFlags::NEAR_MIN),
        Ordering::Greater => false,
    }
}

impl QuickGroupMinMaxSelect {
    pub(crate) fn new(
        cursor: Box<dyn Cursor>,
        plan: &GroupMinMaxReadPlan,
        layout: KeyLayout,
        schema: Vec<String>,
        cond: Option<Expr>,
    ) -> Self {
        Self {
            cursor,
            plan: plan.clone(),
            layout,
            schema,
            cond,
            last_group: None,
            state: ScanState::Uninitialized,
            stats: ExecutionStats::default(),
        }
    }

    pub fn init(&mut self) -> DbResult<()> {
        let start = Instant::now();
        let prefix = self.plan.group_prefix_len + self.plan.key_infix.len();
        if self.plan.min_max_part.is_some_and(|part| part != prefix) {
            return Err(DbError::Executor(format!(
                "MIN/MAX key part of '{}' does not follow its group prefix",
                self.plan.key_name
            )));
        }
        self.state = ScanState::Ready;
        self.stats.open_time += start.elapsed();
        debug!(
            index = %self.plan.key_name,
            group_parts = self.plan.group_prefix_len,
            infix = self.plan.key_infix.len(),
            "group min/max init"
        );
        Ok(())
    }

    pub fn reset(&mut self) -> DbResult<()> {
        let start = Instant::now();
        match self.state {
            ScanState::Uninitialized => {
                return Err(DbError::Executor("group min/max reset before init".into()));
            }
            ScanState::Scanning | ScanState::Exhausted => self.cursor.end_scan()?,
            ScanState::Ready => {}
        }
        self.cursor.start_scan(ScanMode::Index {
            keynr: self.plan.keynr,
            keyread: true,
        })?;
        self.last_group = None;
        self.state = ScanState::Scanning;
        self.stats.open_time += start.elapsed();
        Ok(())
    }

    pub fn range_end(&mut self) -> DbResult<()> {
        if matches!(self.state, ScanState::Scanning | ScanState::Exhausted) {
            self.cursor.end_scan()?;
            self.state = ScanState::Ready;
        }
        Ok(())
    }

    /// One row per qualifying group: the group values, then MIN and MAX.
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
        match self.state {
            ScanState::Scanning => {}
            ScanState::Exhausted => return Ok(None),
            ScanState::Uninitialized | ScanState::Ready => {
                return Err(DbError::Executor("group min/max read before reset".into()));
            }
        }
        loop {
            let Some(group) = self.next_group()? else {
                self.state = ScanState::Exhausted;
                return Ok(None);
            };
            self.last_group = Some(group.clone());
            let mut prefix = group.clone();
            prefix.extend(self.plan.key_infix.iter().cloned());

            let mut values = group;
            if self.plan.min_max_part.is_none() {
                if self.group_has_match(&prefix)? {
                    return Ok(Some(Row::new(values)));
                }
                self.stats.rows_filtered += 1;
                continue;
            }

            let min = if self.plan.have_min { self.find_min(&prefix)? } else { None };
            let max = if self.plan.have_max { self.find_max(&prefix)? } else { None };
            if min.is_none() && max.is_none() && !self.group_has_match(&prefix)? {
                trace!(group = ?prefix, "group has no qualifying entry");
                self.stats.rows_filtered += 1;
                continue;
            }
            if self.plan.have_min {
                values.push(min.unwrap_or(Value::Null));
            }
            if self.plan.have_max {
                values.push(max.unwrap_or(Value::Null));
            }
            return Ok(Some(Row::new(values)));
        }
    }

    /// Prefix of the first entry past the previous group.
    fn next_group(&mut self) -> DbResult<Option<Vec<Value>>> {
        self.stats.index_seeks += 1;
        let entry = match &self.last_group {
            None => self.cursor.first_in_index()?,
            Some(group) => self.cursor.seek(group, SeekMode::AfterKey)?,
        };
        Ok(entry.map(|e| e.key[..self.plan.group_prefix_len].to_vec()))
    }

    fn same_prefix(entry: &Option<IndexEntry>, prefix: &[Value]) -> bool {
        entry
            .as_ref()
            .is_some_and(|e| prefix_cmp(&e.key, prefix) == Ordering::Equal)
    }

    fn qualifies(&self, entry: &IndexEntry) -> DbResult<bool> {
        match &self.cond {
            None => Ok(true),
            Some(cond) => {
                let ctx = EvalContext {
                    schema: &self.schema,
                };
                ctx.matches(cond, &self.layout.row(entry))
            }
        }
    }

    fn find_min(&mut self, prefix: &[Value]) -> DbResult<Option<Value>> {
        let part = prefix.len();
        for n in 0..self.plan.min_max_ranges.len() {
            let interval = self.plan.min_max_ranges[n].clone();
            let mut key = prefix.to_vec();
            let mode = if interval.has_min() {
                key.push(interval.min.clone());
                if interval.min_flag.contains(RangeFlags::NEAR_MIN) {
                    SeekMode::AfterKey
                } else {
                    SeekMode::KeyOrNext
                }
            } else {
                SeekMode::KeyOrNext
            };
            self.stats.index_seeks += 1;
            let mut entry = self.cursor.seek(&key, mode)?;
            while Self::same_prefix(&entry, prefix) {
                let Some(found) = entry.take() else { break };
                let value = &found.key[part];
                if past_max(&interval, value) {
                    break;
                }
                if !value.is_null() && interval.contains(value) && self.qualifies(&found)? {
                    return Ok(Some(value.clone()));
                }
                entry = self.cursor.next_in_index()?;
            }
        }
        Ok(None)
    }

    fn find_max(&mut self, prefix: &[Value]) -> DbResult<Option<Value>> {
        let part = prefix.len();
        for n in (0..self.plan.min_max_ranges.len()).rev() {
            let interval = self.plan.min_max_ranges[n].clone();
            let mut key = prefix.to_vec();
            let mode = if interval.has_max() {
                key.push(interval.max.clone());
                if interval.max_flag.contains(RangeFlags::NEAR_MAX) {
                    SeekMode::BeforeKey
                } else {
                    SeekMode::PrefixLastOrPrev
                }
            } else {
                SeekMode::PrefixLast
            };
            self.stats.index_seeks += 1;
            let mut entry = self.cursor.seek(&key, mode)?;
            while Self::same_prefix(&entry, prefix) {
                let Some(found) = entry.take() else { break };
                let value = &found.key[part];
                // NULLs sort first, so nothing below one can qualify
                if value.is_null() || before_min(&interval, value) {
                    break;
                }
                if interval.contains(value) && self.qualifies(&found)? {
                    return Ok(Some(value.clone()));
                }
                entry = self.cursor.prev_in_index()?;
            }
        }
        Ok(None)
    }

    /// True when some entry of the group satisfies the predicate.
    fn group_has_match(&mut self, prefix: &[Value]) -> DbResult<bool> {
        self.stats.index_seeks += 1;
        let mut entry = self.cursor.seek(prefix, SeekMode::KeyExact)?;
        while Self::same_prefix(&entry, prefix) {
            let Some(found) = entry.take() else { break };
            if self.qualifies(&found)? {
                return Ok(true);
            }
            entry = self.cursor.next_in_index()?;
        }
        Ok(false)
    }

    pub fn plan(&self) -> &GroupMinMaxReadPlan {
        &self.plan
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }
}

impl Drop for QuickGroupMinMaxSelect {
    fn drop(&mut self) {
        if let Err(e) = self.range_end() {
            debug!(index = %self.plan.key_name, error = %e, "end_scan failed on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::rc::Rc;
    use storage::MemoryTable;
    use testsupport::fixtures::gkv_table;

    fn plan(infix: &[i64], part: Option<usize>, ranges: Vec<Interval>) -> GroupMinMaxReadPlan {
        GroupMinMaxReadPlan {
            keynr: 0,
            key_name: "i_gkv".into(),
            group_prefix_len: 1,
            key_infix: infix.iter().copied().map(Value::Int).collect(),
            min_max_part: part,
            min_max_ranges: ranges,
            have_min: part.is_some(),
            have_max: part.is_some(),
            max_used_key_length: 24,
            records: 5,
            read_cost: 1.0,
        }
    }

    fn run(table: &Rc<MemoryTable>, plan: &GroupMinMaxReadPlan, cond: Option<Expr>) -> Vec<Vec<Value>> {
        let layout = KeyLayout::new(table.meta(), plan.keynr).unwrap();
        let mut quick = QuickGroupMinMaxSelect::new(
            Box::new(table.cursor()),
            plan,
            layout,
            table.meta().column_names(),
            cond,
        );
        quick.init().unwrap();
        quick.reset().unwrap();
        let mut out = Vec::new();
        while let Some(row) = quick.get_next().unwrap() {
            assert_eq!(row.rid(), None);
            out.push(row.values);
        }
        out
    }

    fn row(values: &[Option<i64>]) -> Vec<Value> {
        values
            .iter()
            .map(|v| v.map_or(Value::Null, Value::Int))
            .collect()
    }

    #[test]
    fn min_max_of_next_key_part() {
        let table = gkv_table();
        let rows = run(&table, &plan(&[], Some(1), vec![Interval::not_null()]), None);
        let expected: Vec<_> = (0..4).map(|g| row(&[Some(g), Some(0), Some(2)])).collect();
        assert_eq!(rows, expected);
    }

    #[test]
    fn all_null_group_reports_null() {
        let table = gkv_table();
        let cond = Expr::col("k").eq(Expr::int(1));
        let rows = run(&table, &plan(&[1], Some(2), vec![Interval::not_null()]), Some(cond));
        assert_eq!(
            rows,
            vec![
                row(&[Some(0), Some(10), Some(14)]),
                row(&[Some(1), Some(110), Some(114)]),
                row(&[Some(2), Some(210), Some(214)]),
                row(&[Some(3), None, None]),
            ]
        );
    }

    #[test]
    fn ranges_bound_min_and_max() {
        let table = gkv_table();
        let cond = Expr::col("k")
            .eq(Expr::int(2))
            .and(Expr::col("v").gt(Expr::int(103)));
        let ranges = vec![Interval::above(Value::Int(103), true)];
        let rows = run(&table, &plan(&[2], Some(2), ranges), Some(cond));
        assert_eq!(
            rows,
            vec![
                row(&[Some(1), Some(120), Some(124)]),
                row(&[Some(2), Some(220), Some(224)]),
                row(&[Some(3), Some(320), Some(324)]),
            ]
        );

        // the all-NULL group fails `v < 215` and disappears
        let cond = Expr::col("k")
            .eq(Expr::int(1))
            .and(Expr::col("v").lt(Expr::int(215)));
        let ranges = vec![Interval::below(Value::Int(215), true)];
        let rows = run(&table, &plan(&[1], Some(2), ranges), Some(cond));
        assert_eq!(
            rows,
            vec![
                row(&[Some(0), Some(10), Some(14)]),
                row(&[Some(1), Some(110), Some(114)]),
                row(&[Some(2), Some(210), Some(214)]),
            ]
        );
    }

    #[test]
    fn residual_predicate_filters_walked_entries() {
        let table = gkv_table();
        let cond = Expr::col("v").eq(Expr::int(101));
        let rows = run(&table, &plan(&[], Some(1), vec![Interval::not_null()]), Some(cond));
        assert_eq!(rows, vec![row(&[Some(1), Some(0), Some(0)])]);
    }

    #[test]
    fn distinct_groups() {
        let table = gkv_table();
        let rows = run(&table, &plan(&[], None, Vec::new()), None);
        let expected: Vec<_> = (0..4).map(|g| row(&[Some(g)])).collect();
        assert_eq!(rows, expected);
    }

    #[test]
    fn misplaced_min_max_part_is_rejected() {
        let table = gkv_table();
        let layout = KeyLayout::new(table.meta(), 0).unwrap();
        let mut quick = QuickGroupMinMaxSelect::new(
            Box::new(table.cursor()),
            &plan(&[], Some(2), vec![Interval::not_null()]),
            layout,
            table.meta().column_names(),
            None,
        );
        assert!(quick.init().is_err());
    }
}
