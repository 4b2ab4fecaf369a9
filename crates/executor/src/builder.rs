//! Builder: turns a chosen read plan into a runnable quick select.

use catalog::TableMeta;
use common::{Config, DbError, DbResult};
use expr::Expr;
use planner::{cost::max_elements_in_tree, RangeReadPlan, TableReadPlan};
use storage::Cursor;
use tracing::debug;

use crate::{
    group_min_max::QuickGroupMinMaxSelect, index_merge::QuickIndexMergeSelect,
    keyread::KeyLayout, range::QuickRangeSelect, ror_intersect::QuickRorIntersectSelect,
    ror_union::QuickRorUnionSelect, QuickSelect,
};

fn range_select(
    table: &TableMeta,
    cursor: &dyn Cursor,
    plan: &RangeReadPlan,
    keyread: bool,
) -> DbResult<QuickRangeSelect> {
    Ok(QuickRangeSelect::builder()
        .cursor(cursor.clone_cursor()?)
        .plan(plan)
        .layout(KeyLayout::new(table, plan.keynr)?)
        .keyread(keyread)
        .build())
}

/// Build the iterator tree for `plan`.
///
/// Every member gets its own handle from [`Cursor::clone_cursor`]; `cursor`
/// itself is never positioned. `cond` is the full predicate, which only the
/// loose group scan evaluates itself.
///
/// # Errors
///
/// Returns `DbError::Executor` when a rowid-ordered union holds a child that
/// is not rowid-ordered, and propagates engine errors from cloning cursors.
pub fn make_quick(
    table: &TableMeta,
    cursor: &dyn Cursor,
    plan: &TableReadPlan,
    config: &Config,
    cond: Option<&Expr>,
) -> DbResult<QuickSelect> {
    let quick = match plan {
        TableReadPlan::Range(p) => QuickSelect::Range(range_select(table, cursor, p, p.covering)?),

        TableReadPlan::RorIntersect(p) => {
            let scans = p
                .scans
                .iter()
                .map(|scan| range_select(table, cursor, scan, true))
                .collect::<DbResult<Vec<_>>>()?;
            let cpk = p
                .cpk_scan
                .as_ref()
                .map(|scan| range_select(table, cursor, scan, false))
                .transpose()?;
            QuickSelect::RorIntersect(QuickRorIntersectSelect::new(
                cursor.clone_cursor()?,
                scans,
                cpk,
                p.is_covering,
            )?)
        }

        TableReadPlan::RorUnion(p) => {
            let mut children = Vec::with_capacity(p.children.len());
            for child in &p.children {
                if !child.is_ror() {
                    return Err(DbError::Executor(format!(
                        "union member {} is not rowid-ordered",
                        child.key_description()
                    )));
                }
                children.push(make_quick(table, cursor, child, config, cond)?);
            }
            QuickSelect::RorUnion(QuickRorUnionSelect::new(cursor.clone_cursor()?, children))
        }

        TableReadPlan::IndexMerge(p) => {
            let mut scans = Vec::with_capacity(p.range_scans.len());
            let mut cpk = None;
            for scan in &p.range_scans {
                if cursor.is_clustered(scan.keynr) {
                    cpk = Some(range_select(table, cursor, scan, false)?);
                } else {
                    scans.push(range_select(table, cursor, scan, true)?);
                }
            }
            let capacity = max_elements_in_tree(config.sort_buffer_size, cursor.stats().ref_length);
            debug!(capacity, "sort-union rowid budget");
            QuickSelect::IndexMerge(QuickIndexMergeSelect::new(
                cursor.clone_cursor()?,
                scans,
                cpk,
                capacity,
                config.tmp_dir.clone(),
            ))
        }

        TableReadPlan::GroupMinMax(p) => QuickSelect::GroupMinMax(QuickGroupMinMaxSelect::new(
            cursor.clone_cursor()?,
            p,
            KeyLayout::new(table, p.keynr)?,
            table.column_names(),
            cond.cloned(),
        )),
    };
    Ok(quick)
}
