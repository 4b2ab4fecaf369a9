//! Access path selection for one table.
//!
//! [`choose_read_plan`] builds the range tree of the predicate, then costs
//! every strategy the tree allows against a full table scan:
//!
//! ```text
//! predicate ──get_mm_tree──▶ SelTree
//!                              │
//!        no merges ────────────┼──────────── merges
//!            │                               │
//!   best range per index              per imerge:
//!   ROR intersection                    sort-union
//!   covering ROR intersection           ROR union
//!            │                               │
//!            └────── cheapest, strict < ─────┘
//!                          │
//!                 group min/max competes with all of them
//! ```
//!
//! Candidates are compared with a strict `<`, so on equal cost the earlier
//! candidate wins: a plain range beats any merge and a lower key number
//! beats a higher one.

use std::f64::consts::LN_2;

use catalog::TableMeta;
use common::{ColumnSet, Config, DbError, DbResult};
use expr::Expr;
use storage::Cursor;
use tracing::{debug, trace};

use crate::{
    builder::get_mm_tree,
    cost::{sweep_read_cost, unique_use_cost, TIME_FOR_COMPARE, TIME_FOR_COMPARE_ROWID},
    group_min_max::{get_best_group_min_max, GroupMinMaxQuery},
    param::RangeParam,
    plan::{
        IndexMergeReadPlan, PlanChoice, RangeReadPlan, RorUnionReadPlan, TableReadPlan,
    },
    range_seq::{check_quick_select, ScanEstimate},
    ror::{get_best_covering_ror_intersect, get_best_ror_intersect},
    sel_tree::{SelImerge, SelTree, TreeType},
};

/// What the caller wants from one table.
#[derive(Clone, Debug, Default, bon::Builder)]
pub struct TableQuery {
    /// WHERE clause over the table's columns.
    pub cond: Option<Expr>,
    /// Columns the query reads; every column when unset.
    pub columns: Option<Vec<String>>,
    /// Indexes the planner may use; every index when unset.
    pub keys_to_use: Option<Vec<String>>,
    pub limit: Option<u64>,
    /// Analyse ranges even when a table scan looks trivially cheap.
    #[builder(default)]
    pub force_quick_range: bool,
    pub group: Option<GroupMinMaxQuery>,
    /// The table is read on its own, so row fetches may be interrupted by
    /// other I/O between sweeps.
    #[builder(default = true)]
    pub single_table: bool,
}

impl TableQuery {
    /// Columns read by the query and its predicate.
    pub fn needed_fields(&self, table: &TableMeta) -> DbResult<ColumnSet> {
        let mut needed = ColumnSet::new();
        let mut add = |name: &str| -> DbResult<()> {
            let id = table.schema.column_index(name).ok_or_else(|| {
                DbError::Planner(format!("unknown column '{name}' in table '{}'", table.name))
            })?;
            needed.insert(id);
            Ok(())
        };
        match (&self.columns, &self.group) {
            (Some(columns), _) => columns.iter().try_for_each(|c| add(c.as_str()))?,
            (None, Some(group)) => group.columns().try_for_each(&mut add)?,
            (None, None) => {
                for column in &table.schema.columns {
                    add(&column.name)?;
                }
            }
        }
        if let Some(cond) = &self.cond {
            cond.columns().into_iter().try_for_each(&mut add)?;
        }
        Ok(needed)
    }

    fn key_numbers(&self, table: &TableMeta) -> DbResult<Vec<usize>> {
        match &self.keys_to_use {
            Some(names) => names
                .iter()
                .map(|name| {
                    table
                        .index_number(name)
                        .map_err(|_| DbError::Planner(format!("unknown index '{name}'")))
                })
                .collect(),
            None => Ok((0..table.indexes.len()).collect()),
        }
    }
}

/// Best range scans of one tree, plus every rowid-ordered scan it admits.
pub(crate) struct KeyScans {
    pub best: Option<RangeReadPlan>,
    pub ror_scans: Vec<(usize, ScanEstimate)>,
}

/// Cheapest single-index range scan of `tree` that beats `read_time`.
pub(crate) fn get_key_scans_params(
    param: &mut RangeParam<'_>,
    tree: &SelTree,
    index_read_must_be_used: bool,
    mut read_time: f64,
) -> DbResult<KeyScans> {
    let mut best = None;
    let mut ror_scans = Vec::new();
    for (idx, root) in tree.keys.iter().enumerate() {
        let Some(root) = *root else { continue };
        let keynr = param.real_keynr(idx);
        let covering = param.is_covering(keynr);
        let read_index_only = index_read_must_be_used || covering;
        let Some(estimate) = check_quick_select(param, idx, read_index_only, root)? else {
            continue;
        };
        let found_read_time = estimate.cost.total_cost();
        if read_time > found_read_time {
            read_time = found_read_time;
            best = Some(RangeReadPlan {
                keynr,
                key_name: param.keys[idx].name.clone(),
                ranges: estimate.seq.ranges.clone(),
                used_key_parts: estimate.seq.used_key_parts,
                max_used_key_length: estimate.seq.max_used_key_length,
                records: estimate.records,
                read_cost: found_read_time,
                is_ror: estimate.is_ror,
                covering,
            });
        }
        if estimate.is_ror {
            ror_scans.push((idx, estimate));
        }
    }
    if let Some(plan) = &best {
        debug!(
            index = %plan.key_name,
            cost = plan.read_cost,
            rows = plan.records,
            ror = plan.is_ror,
            "range candidate"
        );
    }
    Ok(KeyScans { best, ror_scans })
}

/// Cheapest sort-union or ROR-union over the disjuncts of `imerge`.
pub(crate) fn get_best_disjunct_quick(
    param: &mut RangeParam<'_>,
    imerge: &SelImerge,
    mut read_time: f64,
    interrupted: bool,
) -> DbResult<Option<TableReadPlan>> {
    let table_records = param.cursor.stats().records;
    let cpk = param.clustered_pk();
    let mut children = Vec::with_capacity(imerge.trees.len());
    let mut imerge_cost = 0.0;
    let mut cpk_scan_records: u64 = 0;
    let mut non_cpk_scan_records: u64 = 0;
    let mut all_scans_ror_able = true;
    let mut all_scans_rors = true;

    for tree in &imerge.trees {
        let KeyScans { best, ror_scans } = get_key_scans_params(param, tree, true, read_time)?;
        let Some(best) = best else {
            trace!("a disjunct has no range scan cheaper than the table scan");
            return Ok(None);
        };
        imerge_cost += best.read_cost;
        all_scans_ror_able &= !ror_scans.is_empty();
        all_scans_rors &= best.is_ror;
        if cpk == Some(best.keynr) {
            cpk_scan_records += best.records;
        } else {
            non_cpk_scan_records += best.records;
        }
        children.push((best, ror_scans));
    }

    if imerge_cost > read_time
        || (non_cpk_scan_records + cpk_scan_records >= table_records && read_time != f64::MAX)
    {
        trace!(imerge_cost, read_time, "index merge is no cheaper than the table scan");
        return Ok(None);
    }

    let mut imerge_plan = None;
    if !all_scans_rors {
        if children.iter().any(|(c, _)| cpk == Some(c.keynr)) {
            // Rowids of non-PK scans are checked against the PK ranges.
            imerge_cost += non_cpk_scan_records as f64 / TIME_FOR_COMPARE_ROWID;
        }
        imerge_cost += sweep_read_cost(param.cursor, cpk, non_cpk_scan_records, interrupted)
            .total_cost();
        if imerge_cost <= read_time {
            imerge_cost += unique_use_cost(
                non_cpk_scan_records,
                param.cursor.stats().ref_length,
                param.config.sort_buffer_size,
            );
            if imerge_cost < read_time {
                let plan = IndexMergeReadPlan {
                    range_scans: children.iter().map(|(c, _)| c.clone()).collect(),
                    records: (non_cpk_scan_records + cpk_scan_records).min(table_records),
                    read_cost: imerge_cost,
                };
                debug!(cost = plan.read_cost, rows = plan.records, "index merge candidate");
                imerge_plan = Some(TableReadPlan::IndexMerge(plan));
                read_time = imerge_cost;
            }
        }
        if !all_scans_ror_able {
            return Ok(imerge_plan);
        }
    }

    // Every disjunct can be read in rowid order: try a ROR union.
    let table_rows = param.records as f64;
    let mut roru_children = Vec::with_capacity(children.len());
    let mut roru_index_costs = 0.0;
    let mut roru_total_records: u64 = 0;
    let mut roru_intersect_part = 1.0;
    for ((best, ror_scans), tree) in children.into_iter().zip(&imerge.trees) {
        let cost = if best.is_ror {
            param.cursor.read_time(best.keynr, 1, best.records)
                + best.records as f64 / TIME_FOR_COMPARE
        } else {
            read_time
        };
        let search = get_best_ror_intersect(param, tree, &ror_scans, cost, interrupted)?;
        let child = match search.plan {
            Some(intersect) => {
                roru_index_costs += intersect.index_scan_costs;
                TableReadPlan::RorIntersect(intersect)
            }
            None if best.is_ror => {
                roru_index_costs += best.read_cost;
                TableReadPlan::Range(best)
            }
            None => return Ok(imerge_plan),
        };
        roru_total_records += child.records();
        roru_intersect_part *= child.records() as f64 / table_rows;
        roru_children.push(child);
    }

    // Disjuncts share no key parts, so overlap is estimated as independent.
    roru_total_records =
        roru_total_records.saturating_sub((roru_intersect_part * table_rows) as u64);
    let n_children = roru_children.len() as f64;
    let roru_total_cost = roru_index_costs
        + roru_total_records as f64 * n_children.ln() / (TIME_FOR_COMPARE_ROWID * LN_2)
        + sweep_read_cost(param.cursor, cpk, roru_total_records, interrupted).total_cost();

    if roru_total_cost < read_time {
        debug!(
            cost = roru_total_cost,
            rows = roru_total_records,
            children = roru_children.len(),
            "ROR union candidate"
        );
        return Ok(Some(TableReadPlan::RorUnion(RorUnionReadPlan {
            children: roru_children,
            records: roru_total_records,
            read_cost: roru_total_cost,
        })));
    }
    Ok(imerge_plan)
}

/// Pick the cheapest way to read the rows of `table` that `query` selects.
///
/// Returns [`PlanChoice::TableScan`] when no index plan beats a full scan and
/// [`PlanChoice::Impossible`] when the predicate can match no row.
pub fn choose_read_plan(
    table: &TableMeta,
    cursor: &dyn Cursor,
    config: &Config,
    query: &TableQuery,
) -> DbResult<PlanChoice> {
    let keys = query.key_numbers(table)?;
    if keys.is_empty() {
        return Ok(PlanChoice::TableScan);
    }

    let records = cursor.stats().records.max(1);
    let scan_time = records as f64 / TIME_FOR_COMPARE + 1.0;
    let mut read_time = cursor.scan_time() + scan_time + 1.1;
    if query.limit.is_some_and(|limit| limit < records) {
        read_time = records as f64 + scan_time + 1.0;
    } else if read_time <= 2.0 && !query.force_quick_range {
        trace!(read_time, "table scan is trivially cheap");
        return Ok(PlanChoice::TableScan);
    }

    let needed = query.needed_fields(table)?;
    let mut param = RangeParam::new(table, cursor, config, &keys, needed);

    // A full pass over the shortest covering index may beat the table scan.
    let shortest_covering = param
        .keys
        .iter()
        .filter(|key| param.is_covering(key.keynr))
        .min_by_key(|key| key.key_length())
        .map(|key| key.keynr);
    if let Some(keynr) = shortest_covering {
        let key_read_time =
            cursor.index_only_read_cost(keynr, records) + records as f64 / TIME_FOR_COMPARE;
        if key_read_time < read_time {
            read_time = key_read_time;
        }
    }

    let mut tree = None;
    if let Some(cond) = &query.cond {
        let built = get_mm_tree(&mut param, cond)?;
        if built.kind == TreeType::Impossible {
            debug!(table = %table.name, "predicate selects no rows");
            return Ok(PlanChoice::Impossible);
        }
        if matches!(built.kind, TreeType::Key | TreeType::KeySmaller) {
            tree = Some(built);
        }
    }

    let mut best: Option<TableReadPlan> = None;
    let mut best_read_time = read_time;

    if let Some(group) = &query.group {
        if let Some(plan) = get_best_group_min_max(&param, tree.as_ref(), group) {
            if plan.read_cost < best_read_time {
                best_read_time = plan.read_cost;
                best = Some(TableReadPlan::GroupMinMax(plan));
            }
        }
    }

    if let Some(tree) = &tree {
        if tree.merges.is_empty() {
            let scans = get_key_scans_params(&mut param, tree, false, best_read_time)?;
            if let Some(range) = scans.best {
                best_read_time = range.read_cost;
                best = Some(TableReadPlan::Range(range));
            }
            if config.ror_intersect {
                let search = get_best_ror_intersect(
                    &param,
                    tree,
                    &scans.ror_scans,
                    best_read_time,
                    query.single_table,
                )?;
                if let Some(intersect) = search.plan {
                    best_read_time = intersect.read_cost;
                    let is_covering = intersect.is_covering;
                    best = Some(TableReadPlan::RorIntersect(intersect));
                    if !is_covering && search.are_all_covering {
                        if let Some(covering) =
                            get_best_covering_ror_intersect(&param, search.scans, best_read_time)
                        {
                            best = Some(TableReadPlan::RorIntersect(covering));
                        }
                    }
                }
            }
        } else if config.index_merge {
            let mut best_conj: Option<TableReadPlan> = None;
            for imerge in &tree.merges {
                let candidate =
                    get_best_disjunct_quick(&mut param, imerge, best_read_time, query.single_table)?;
                if let Some(candidate) = candidate {
                    if best_conj
                        .as_ref()
                        .is_none_or(|b| candidate.read_cost() < b.read_cost())
                    {
                        best_conj = Some(candidate);
                    }
                }
            }
            if best_conj.is_some() {
                best = best_conj;
            }
        }
    }

    Ok(match best {
        Some(plan) => {
            debug!(
                table = %table.name,
                access = plan.access_type(),
                key = %plan.key_description(),
                cost = plan.read_cost(),
                rows = plan.records(),
                "chose read plan"
            );
            PlanChoice::Plan(plan)
        }
        None => {
            debug!(table = %table.name, read_time, "chose table scan");
            PlanChoice::TableScan
        }
    })
}

#[cfg(test)]
mod tests;
