//! Query executor: runs the access path the planner chose for one table.
//!
//! A chosen [`TableReadPlan`] is turned into a [`QuickSelect`], a pull-based
//! iterator over the qualifying rows. Composite selects own their members,
//! and every member reads through its own cursor.
//!
//! # Architecture
//!
//! ```text
//! choose_read_plan
//!     ↓
//! make_quick → QuickSelect { Range | RorIntersect | RorUnion | IndexMerge | GroupMinMax }
//!     ↓
//! init() → check ranges, no engine access
//!     ↓
//! reset() → start scans (sort-union collects its rowids here)
//!     ↓
//! get_next() → pull rows until Ok(None)
//! ```
//!
//! # Example
//!
//! ```
//! use catalog::{Catalog, Column, IndexKind};
//! use common::Config;
//! use executor::execute;
//! use expr::Expr;
//! use planner::TableQuery;
//! use storage::MemoryTable;
//! use types::{SqlType, Value};
//!
//! let mut catalog = Catalog::new();
//! catalog.create_table("t", vec![Column::new("a", SqlType::Int)]).unwrap();
//! catalog.create_index("t", "i_a", &["a"], IndexKind::BTree).unwrap();
//! let meta = catalog.table("t").unwrap().clone();
//! let rows = (0..100).map(|i| vec![Value::Int(i)]).collect();
//! let table = MemoryTable::builder().meta(meta).rows(rows).build().unwrap();
//!
//! let query = TableQuery::builder()
//!     .cond(Expr::col("a").between(Expr::int(10), Expr::int(12)))
//!     .build();
//! let batch = execute(table.meta(), &table.cursor(), &Config::default(), &query).unwrap();
//! assert_eq!(batch.rows.len(), 3);
//! ```


mod builder;
mod group_min_max;
mod index_merge;
mod keyread;
mod range;
mod ror_intersect;
mod ror_union;
mod unique;

pub use builder::make_quick;
pub use group_min_max::QuickGroupMinMaxSelect;
pub use index_merge::QuickIndexMergeSelect;
pub use range::{QuickRangeSelect, ScanState};
pub use ror_intersect::QuickRorIntersectSelect;
pub use ror_union::QuickRorUnionSelect;
pub use unique::{Unique, UniqueIter};

use std::collections::BTreeMap;
use std::time::Instant;

use catalog::TableMeta;
use common::{pretty::TableStyleKind, Config, DbError, DbResult, ExecutionStats, RecordBatch, Row, RowId};
use expr::{EvalContext, Expr};
use planner::{
    choose_read_plan, explain, render_explain, GroupMinMaxQuery, PlanChoice, TableQuery,
    TableReadPlan,
};
use storage::{Cursor, ScanMode};
use tracing::{debug, info};
use types::Value;

/// Runnable access path for one table.
///
/// Every variant follows the same protocol: `init` once, `reset` to start
/// (or restart) the scan, then `get_next` until it returns `Ok(None)`.
pub enum QuickSelect {
    Range(QuickRangeSelect),
    RorIntersect(QuickRorIntersectSelect),
    RorUnion(QuickRorUnionSelect),
    IndexMerge(QuickIndexMergeSelect),
    GroupMinMax(QuickGroupMinMaxSelect),
}

impl QuickSelect {
    pub fn init(&mut self) -> DbResult<()> {
        match self {
            QuickSelect::Range(q) => q.init(),
            QuickSelect::RorIntersect(q) => q.init(),
            QuickSelect::RorUnion(q) => q.init(),
            QuickSelect::IndexMerge(q) => q.init(),
            QuickSelect::GroupMinMax(q) => q.init(),
        }
    }

    pub fn reset(&mut self) -> DbResult<()> {
        match self {
            QuickSelect::Range(q) => {
                q.range_end()?;
                q.reset()
            }
            QuickSelect::RorIntersect(q) => q.reset(),
            QuickSelect::RorUnion(q) => q.reset(),
            QuickSelect::IndexMerge(q) => q.reset(),
            QuickSelect::GroupMinMax(q) => q.reset(),
        }
    }

    /// Next qualifying row, `None` at end of data.
    pub fn get_next(&mut self) -> DbResult<Option<Row>> {
        match self {
            QuickSelect::Range(q) => q.get_next(),
            QuickSelect::RorIntersect(q) => q.get_next(),
            QuickSelect::RorUnion(q) => q.get_next(),
            QuickSelect::IndexMerge(q) => q.get_next(),
            QuickSelect::GroupMinMax(q) => q.get_next(),
        }
    }

    /// Next rowid of a rowid-ordered select, without fetching the row.
    pub(crate) fn next_rowid(&mut self) -> DbResult<Option<RowId>> {
        match self {
            QuickSelect::Range(q) => Ok(q.next_entry()?.map(|entry| entry.rowid)),
            QuickSelect::RorIntersect(q) => q.next_rowid(),
            QuickSelect::RorUnion(q) => q.next_rowid(),
            QuickSelect::IndexMerge(_) | QuickSelect::GroupMinMax(_) => Err(DbError::Executor(
                "select does not produce rows in rowid order".into(),
            )),
        }
    }

    pub fn stats(&self) -> &ExecutionStats {
        match self {
            QuickSelect::Range(q) => q.stats(),
            QuickSelect::RorIntersect(q) => q.stats(),
            QuickSelect::RorUnion(q) => q.stats(),
            QuickSelect::IndexMerge(q) => q.stats(),
            QuickSelect::GroupMinMax(q) => q.stats(),
        }
    }

    /// Append the EXPLAIN key description, e.g. `union(i_c,intersect(i_a,i_b))`.
    pub fn add_info_string(&self, out: &mut String) {
        fn list<'a>(out: &mut String, names: impl Iterator<Item = &'a str>) {
            for (n, name) in names.enumerate() {
                if n > 0 {
                    out.push(',');
                }
                out.push_str(name);
            }
        }
        match self {
            QuickSelect::Range(q) => out.push_str(q.key_name()),
            QuickSelect::GroupMinMax(q) => out.push_str(&q.plan().key_name),
            QuickSelect::RorIntersect(q) => {
                out.push_str("intersect(");
                list(out, q.scans().iter().chain(q.cpk()).map(QuickRangeSelect::key_name));
                out.push(')');
            }
            QuickSelect::IndexMerge(q) => {
                out.push_str("sort_union(");
                list(out, q.members().map(QuickRangeSelect::key_name));
                out.push(')');
            }
            QuickSelect::RorUnion(q) => {
                out.push_str("union(");
                for (n, child) in q.children().iter().enumerate() {
                    if n > 0 {
                        out.push(',');
                    }
                    child.add_info_string(out);
                }
                out.push(')');
            }
        }
    }

    /// Append the used key names and key lengths, comma separated.
    pub fn add_keys_and_lengths(&self, keys: &mut String, lengths: &mut String) {
        let mut add = |name: &str, length: u32| {
            if !keys.is_empty() {
                keys.push(',');
                lengths.push(',');
            }
            keys.push_str(name);
            lengths.push_str(&length.to_string());
        };
        match self {
            QuickSelect::Range(q) => add(q.key_name(), q.max_used_key_length()),
            QuickSelect::GroupMinMax(q) => add(&q.plan().key_name, q.plan().max_used_key_length),
            QuickSelect::RorIntersect(q) => {
                for scan in q.scans().iter().chain(q.cpk()) {
                    add(scan.key_name(), scan.max_used_key_length());
                }
            }
            QuickSelect::IndexMerge(q) => {
                for scan in q.members() {
                    add(scan.key_name(), scan.max_used_key_length());
                }
            }
            QuickSelect::RorUnion(q) => {
                for child in q.children() {
                    child.add_keys_and_lengths(keys, lengths);
                }
            }
        }
    }
}

/// Residual predicate check against full table rows.
struct Residual<'a> {
    ctx: EvalContext<'a>,
    cond: Option<&'a Expr>,
}

impl Residual<'_> {
    fn accepts(&self, row: &Row) -> DbResult<bool> {
        match self.cond {
            None => Ok(true),
            Some(cond) => self.ctx.matches(cond, row),
        }
    }
}

fn scan_table(cursor: &dyn Cursor, residual: &Residual<'_>, limit: Option<u64>) -> DbResult<Vec<Row>> {
    let mut scan = cursor.clone_cursor()?;
    scan.start_scan(ScanMode::Table)?;
    let mut rows = Vec::new();
    while limit.is_none_or(|l| (rows.len() as u64) < l) {
        let Some(row) = scan.table_next()? else { break };
        if residual.accepts(&row)? {
            rows.push(row);
        }
    }
    scan.end_scan()?;
    Ok(rows)
}

fn drain_quick(
    quick: &mut QuickSelect,
    residual: &Residual<'_>,
    limit: Option<u64>,
) -> DbResult<Vec<Row>> {
    quick.init()?;
    quick.reset()?;
    let mut rows = Vec::new();
    while limit.is_none_or(|l| (rows.len() as u64) < l) {
        let Some(row) = quick.get_next()? else { break };
        if residual.accepts(&row)? {
            rows.push(row);
        }
    }
    let stats = quick.stats();
    debug!(
        produced = stats.rows_produced,
        kept = rows.len(),
        seeks = stats.index_seeks,
        time = %ExecutionStats::format_duration(stats.total_time()),
        "quick select drained"
    );
    Ok(rows)
}

fn column_ids(table: &TableMeta, names: &[String]) -> DbResult<Vec<usize>> {
    names
        .iter()
        .map(|name| {
            table
                .schema
                .column_index(name)
                .map(usize::from)
                .ok_or_else(|| DbError::Executor(format!("unknown column '{name}'")))
        })
        .collect()
}

fn group_labels(group: &GroupMinMaxQuery) -> Vec<String> {
    let mut labels = group.group_by.clone();
    if let Some(column) = &group.min_max_column {
        if group.have_min {
            labels.push(format!("MIN({column})"));
        }
        if group.have_max {
            labels.push(format!("MAX({column})"));
        }
    }
    labels
}

/// GROUP BY with MIN/MAX over already-filtered rows, in group order.
fn aggregate(table: &TableMeta, rows: Vec<Row>, group: &GroupMinMaxQuery) -> DbResult<Vec<Row>> {
    let group_ids = column_ids(table, &group.group_by)?;
    let arg = match &group.min_max_column {
        Some(column) => Some(column_ids(table, std::slice::from_ref(column))?[0]),
        None => None,
    };
    let mut groups: BTreeMap<Vec<Value>, Option<(Value, Value)>> = BTreeMap::new();
    for row in rows {
        let key: Vec<Value> = group_ids.iter().map(|&i| row.values[i].clone()).collect();
        let slot = groups.entry(key).or_default();
        let Some(value) = arg.map(|i| &row.values[i]).filter(|v| !v.is_null()) else {
            continue;
        };
        let (min, max) = slot.get_or_insert_with(|| (value.clone(), value.clone()));
        if *value < *min {
            *min = value.clone();
        }
        if *value > *max {
            *max = value.clone();
        }
    }
    Ok(groups
        .into_iter()
        .map(|(mut values, extremes)| {
            if arg.is_some() {
                let (min, max) = extremes.unwrap_or((Value::Null, Value::Null));
                if group.have_min {
                    values.push(min);
                }
                if group.have_max {
                    values.push(max);
                }
            }
            Row::new(values)
        })
        .collect())
}

/// Plan `query` against `table`, run the chosen access path and collect the
/// result.
///
/// Rows are filtered by the full predicate, cut to `query.limit` and
/// projected to `query.columns`; projected rows keep their rowid. A grouped
/// query returns one row per group, labelled `g.., MIN(col), MAX(col)`.
///
/// # Errors
///
/// Propagates planning errors and engine errors as they happen.
pub fn execute(
    table: &TableMeta,
    cursor: &dyn Cursor,
    config: &Config,
    query: &TableQuery,
) -> DbResult<RecordBatch> {
    let start = Instant::now();
    let choice = choose_read_plan(table, cursor, config, query)?;
    let schema = table.column_names();
    let residual = Residual {
        ctx: EvalContext { schema: &schema },
        cond: query.cond.as_ref(),
    };
    let row_limit = if query.group.is_some() { None } else { query.limit };

    let (rows, grouped) = match &choice {
        PlanChoice::Impossible => {
            debug!(table = %table.name, "impossible predicate, engine untouched");
            (Vec::new(), false)
        }
        PlanChoice::TableScan => (scan_table(cursor, &residual, row_limit)?, false),
        PlanChoice::Plan(plan) => {
            let mut quick = make_quick(table, cursor, plan, config, query.cond.as_ref())?;
            let grouped = matches!(plan, TableReadPlan::GroupMinMax(_));
            let rows = if grouped {
                // the loose scan checks the predicate on the entries it reads
                let none = Residual {
                    ctx: EvalContext { schema: &schema },
                    cond: None,
                };
                drain_quick(&mut quick, &none, None)?
            } else {
                drain_quick(&mut quick, &residual, row_limit)?
            };
            (rows, grouped)
        }
    };

    let batch = match &query.group {
        Some(group) => {
            let mut rows = if grouped { rows } else { aggregate(table, rows, group)? };
            if let Some(limit) = query.limit {
                rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            }
            RecordBatch {
                columns: group_labels(group),
                rows,
            }
        }
        None => match &query.columns {
            None => RecordBatch { columns: schema.clone(), rows },
            Some(columns) => {
                let ids = column_ids(table, columns)?;
                let rows = rows
                    .into_iter()
                    .map(|row| {
                        let mut projected =
                            Row::new(ids.iter().map(|&i| row.values[i].clone()).collect());
                        projected.set_rid(row.rid());
                        projected
                    })
                    .collect();
                RecordBatch {
                    columns: columns.clone(),
                    rows,
                }
            }
        },
    };
    info!(
        table = %table.name,
        rows = batch.rows.len(),
        elapsed = %ExecutionStats::format_duration(start.elapsed()),
        "query executed"
    );
    Ok(batch)
}

/// Plan `query` and render its EXPLAIN line as a text table.
pub fn explain_query(
    table: &TableMeta,
    cursor: &dyn Cursor,
    config: &Config,
    query: &TableQuery,
    style: TableStyleKind,
) -> DbResult<String> {
    let choice = choose_read_plan(table, cursor, config, query)?;
    let row = explain(&table.name, &choice, cursor.stats().records);
    Ok(render_explain(&[row], style))
}
