//! Test helpers and utilities for executor tests.

use std::rc::Rc;

use common::{Config, Row, RowId};
use expr::{EvalContext, Expr};
use planner::{choose_read_plan, PlanChoice, RangeReadPlan, TableQuery, TableReadPlan};
use storage::MemoryTable;

use crate::QuickSelect;

/// Plan `cond` using only the indexes named in `keys`.
pub fn plan_for(table: &Rc<MemoryTable>, cond: Expr, keys: &[&str]) -> Option<TableReadPlan> {
    let query = TableQuery::builder()
        .cond(cond)
        .keys_to_use(keys.iter().map(|k| k.to_string()).collect())
        .force_quick_range(true)
        .build();
    match choose_read_plan(table.meta(), &table.cursor(), &Config::default(), &query).unwrap() {
        PlanChoice::Plan(plan) => Some(plan),
        PlanChoice::TableScan | PlanChoice::Impossible => None,
    }
}

/// Range plan of `cond` over the single index `key`.
///
/// # Panics
///
/// Panics when the planner picks anything but a range scan of `key`.
pub fn range_plan(table: &Rc<MemoryTable>, cond: Expr, key: &str) -> RangeReadPlan {
    match plan_for(table, cond.clone(), &[key]) {
        Some(TableReadPlan::Range(plan)) => plan,
        other => panic!("expected a range scan of {key} for {cond:?}, got {other:?}"),
    }
}

/// Every row left in an initialized and reset select.
pub fn drain(quick: &mut QuickSelect) -> Vec<Row> {
    let mut rows = Vec::new();
    while let Some(row) = quick.get_next().unwrap() {
        rows.push(row);
    }
    rows
}

/// Rowids of the rows matching `cond`, found by evaluating every row.
pub fn brute_force(table: &Rc<MemoryTable>, cond: &Expr) -> Vec<RowId> {
    let schema = table.meta().column_names();
    let ctx = EvalContext { schema: &schema };
    table
        .rows()
        .iter()
        .filter(|row| ctx.matches(cond, row).unwrap())
        .filter_map(Row::rid)
        .collect()
}
