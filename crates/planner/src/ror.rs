//! Choosing rowid-ordered range scans to intersect.
//!
//! Scans are added greedily, cheapest first, while each one still lowers the
//! estimated output; a clustered primary key scan is tried last as a pure
//! rowid filter. A second search looks for a set of scans whose indexes
//! together cover every needed column, so rows never have to be fetched.

use std::{cmp::Ordering, f64::consts::LN_2, ops::Bound};

use common::{ColumnSet, DbResult};
use tracing::{debug, trace};
use types::Value;

use crate::{
    cost::{sweep_read_cost, TIME_FOR_COMPARE_ROWID},
    param::RangeParam,
    plan::{RangeReadPlan, RorIntersectReadPlan},
    range_seq::{QuickRange, ScanEstimate},
    sel_arg::NodeId,
    sel_tree::SelTree,
};

/// A rowid-ordered scan considered for intersection.
#[derive(Clone, Debug)]
pub(crate) struct RorScanInfo {
    pub idx: usize,
    pub keynr: usize,
    pub root: NodeId,
    pub ranges: Vec<QuickRange>,
    pub used_key_parts: usize,
    pub max_used_key_length: u32,
    /// Needed columns the index holds.
    pub covered_fields: ColumnSet,
    pub records: u64,
    pub index_read_cost: f64,
    pub key_rec_length: u32,
    pub used_fields_covered: usize,
    pub first_uncovered_field: usize,
    pub key_components: usize,
}

impl RorScanInfo {
    pub fn to_range_plan(&self, param: &RangeParam<'_>) -> RangeReadPlan {
        RangeReadPlan {
            keynr: self.keynr,
            key_name: param.keys[self.idx].name.clone(),
            ranges: self.ranges.clone(),
            used_key_parts: self.used_key_parts,
            max_used_key_length: self.max_used_key_length,
            records: self.records,
            read_cost: self.index_read_cost,
            is_ror: true,
            covering: false,
        }
    }
}

/// Build the scan description of index `idx` over its tree at `root`.
pub(crate) fn make_ror_scan(
    param: &RangeParam<'_>,
    idx: usize,
    root: NodeId,
    estimate: &ScanEstimate,
) -> RorScanInfo {
    let key = &param.keys[idx];
    let keynr = key.keynr;
    let mut covered_fields = key.columns();
    covered_fields.intersect_with(&param.needed_fields);
    let records = estimate.records;
    RorScanInfo {
        idx,
        keynr,
        root,
        ranges: estimate.seq.ranges.clone(),
        used_key_parts: estimate.seq.used_key_parts,
        max_used_key_length: estimate.seq.max_used_key_length,
        first_uncovered_field: first_missing(&covered_fields),
        used_fields_covered: covered_fields.len(),
        covered_fields,
        records,
        index_read_cost: param.cursor.index_only_read_cost(keynr, records),
        key_rec_length: param.cursor.key_length(keynr) + param.cursor.stats().ref_length,
        key_components: key.parts.len(),
    }
}

fn first_missing(set: &ColumnSet) -> usize {
    (0..=u16::MAX)
        .find(|c| !set.contains(*c))
        .map_or(usize::from(u16::MAX), usize::from)
}

/// Running state of one intersection candidate.
#[derive(Clone, Debug)]
struct RorIntersectInfo {
    covered_fields: ColumnSet,
    out_rows: f64,
    is_covering: bool,
    index_records: u64,
    index_scan_costs: f64,
    total_cost: f64,
}

impl RorIntersectInfo {
    fn new(param: &RangeParam<'_>) -> Self {
        Self {
            covered_fields: ColumnSet::new(),
            out_rows: param.records as f64,
            is_covering: false,
            index_records: 0,
            index_scan_costs: 0.0,
            total_cost: 0.0,
        }
    }
}

/// Fraction of the current intersection output that survives adding `scan`.
///
/// Walks the key parts of `scan`'s tree; each stretch of parts whose columns
/// are already covered contributes nothing, each uncovered stretch
/// contributes the drop in the engine's prefix estimates.
fn ror_scan_selectivity(
    param: &RangeParam<'_>,
    info: &RorIntersectInfo,
    scan: &RorScanInfo,
) -> DbResult<f64> {
    let key = &param.keys[scan.idx];
    let arena = &param.arena;
    let mut selectivity_mult = 1.0;
    let mut prev_covered = info.covered_fields.contains(key.parts[0].field);
    let mut prev_records = param.records as f64;
    let mut tuple: Vec<Value> = Vec::new();
    let mut tuple_arg: Option<NodeId> = None;

    let mut sel_arg = Some(scan.root);
    while let Some(id) = sel_arg {
        let node = arena.node(id);
        let cur_covered = info
            .covered_fields
            .contains(key.parts[usize::from(node.part)].field);
        if cur_covered != prev_covered {
            // Prefix tuple of every part before this one.
            let mut arg = match tuple_arg {
                Some(arg) => arg,
                None => {
                    tuple.push(arena.node(scan.root).interval.min.clone());
                    scan.root
                }
            };
            while let Some(next) = arena.node(arg).next_key_part.filter(|n| *n != id) {
                arg = next;
                tuple.push(arena.node(arg).interval.min.clone());
            }
            tuple_arg = Some(arg);
            let records = param.cursor.estimated_rows(
                scan.keynr,
                Bound::Included(tuple.as_slice()),
                Bound::Included(tuple.as_slice()),
            )? as f64;
            if cur_covered {
                selectivity_mult *= records / prev_records.max(1.0);
                prev_records = f64::MAX;
            } else {
                prev_records = records;
            }
        }
        prev_covered = cur_covered;
        sel_arg = node.next_key_part;
    }
    if !prev_covered {
        selectivity_mult *= scan.records as f64 / prev_records.max(1.0);
    }
    Ok(selectivity_mult)
}

/// Add `scan` to the intersection if it reduces the output.
fn ror_intersect_add(
    param: &RangeParam<'_>,
    info: &mut RorIntersectInfo,
    scan: &RorScanInfo,
    is_cpk_scan: bool,
    interrupted: bool,
) -> DbResult<bool> {
    let selectivity_mult = ror_scan_selectivity(param, info, scan)?;
    if selectivity_mult == 1.0 {
        return Ok(false);
    }
    info.out_rows *= selectivity_mult;

    if is_cpk_scan {
        // Rowids are checked against the primary key ranges in memory.
        info.index_scan_costs += info.index_records as f64 / TIME_FOR_COMPARE_ROWID;
    } else {
        info.index_records += scan.records;
        info.index_scan_costs += scan.index_read_cost;
        info.covered_fields.union_with(&scan.covered_fields);
        if !info.is_covering && param.needed_fields.is_subset(&info.covered_fields) {
            info.is_covering = true;
        }
    }

    info.total_cost = info.index_scan_costs;
    if !info.is_covering {
        let sweep = sweep_read_cost(
            param.cursor,
            param.clustered_pk(),
            info.out_rows as u64,
            interrupted,
        );
        info.total_cost += sweep.total_cost();
    }
    Ok(true)
}

/// Result of the greedy intersection search.
pub(crate) struct RorSearch {
    pub plan: Option<RorIntersectReadPlan>,
    /// All scans taken together hold every needed column.
    pub are_all_covering: bool,
    /// Scans the search considered, cheapest first.
    pub scans: Vec<RorScanInfo>,
}

/// Greedy search for the cheapest ROR intersection of the tree's ROR scans.
///
/// `ror_scans` pairs each usable index whose range scan is rowid ordered
/// with the estimate of that scan.
pub(crate) fn get_best_ror_intersect(
    param: &RangeParam<'_>,
    tree: &SelTree,
    ror_scans: &[(usize, ScanEstimate)],
    read_time: f64,
    interrupted: bool,
) -> DbResult<RorSearch> {
    let none = |scans: Vec<RorScanInfo>| RorSearch {
        plan: None,
        are_all_covering: false,
        scans,
    };
    if ror_scans.len() < 2 || param.cursor.stats().records == 0 {
        return Ok(none(Vec::new()));
    }

    let cpk_keynr = param.clustered_pk();
    let mut scans = Vec::new();
    let mut cpk_scan = None;
    for (idx, estimate) in ror_scans {
        let Some(root) = tree.keys[*idx] else {
            continue;
        };
        let scan = make_ror_scan(param, *idx, root, estimate);
        if Some(scan.keynr) == cpk_keynr {
            cpk_scan = Some(scan);
        } else {
            scans.push(scan);
        }
    }
    scans.sort_by(|a, b| {
        let va = a.records as f64 * f64::from(a.key_rec_length);
        let vb = b.records as f64 * f64::from(b.key_rec_length);
        va.partial_cmp(&vb).unwrap_or(Ordering::Equal)
    });

    let mut intersect = RorIntersectInfo::new(param);
    let mut best = intersect.clone();
    let mut chosen: Vec<usize> = Vec::new();
    let mut best_num = 0;
    let mut min_cost = f64::MAX;
    for (pos, scan) in scans.iter().enumerate() {
        if intersect.is_covering {
            break;
        }
        if !ror_intersect_add(param, &mut intersect, scan, false, interrupted)? {
            continue;
        }
        chosen.push(pos);
        if intersect.total_cost < min_cost {
            best = intersect.clone();
            best_num = chosen.len();
            min_cost = intersect.total_cost;
        }
    }
    if best_num == 0 {
        return Ok(none(scans));
    }
    let are_all_covering = intersect.is_covering;

    let mut cpk_used = false;
    if let Some(cpk) = &cpk_scan {
        let mut with_cpk = best.clone();
        if !with_cpk.is_covering
            && ror_intersect_add(param, &mut with_cpk, cpk, true, interrupted)?
            && with_cpk.total_cost < min_cost
        {
            cpk_used = true;
            best = with_cpk;
        }
    }

    if min_cost >= read_time || (!cpk_used && best_num < 2) {
        trace!(min_cost, read_time, best_num, "no ROR intersection is cheaper");
        return Ok(RorSearch {
            plan: None,
            are_all_covering,
            scans,
        });
    }

    let plan = RorIntersectReadPlan {
        scans: chosen[..best_num]
            .iter()
            .map(|pos| scans[*pos].to_range_plan(param))
            .collect(),
        cpk_scan: cpk_scan
            .filter(|_| cpk_used)
            .map(|cpk| cpk.to_range_plan(param)),
        is_covering: best.is_covering,
        records: (best.out_rows as u64).max(1),
        read_cost: best.total_cost,
        index_scan_costs: best.index_scan_costs,
    };
    debug!(
        scans = plan.scans.len(),
        cpk = cpk_used,
        cost = plan.read_cost,
        rows = plan.records,
        "ROR intersection candidate"
    );
    Ok(RorSearch {
        plan: Some(plan),
        are_all_covering,
        scans,
    })
}

/// Cheapest set of scans that together cover every needed column.
///
/// Picks, at each step, the scan covering the most still-uncovered columns
/// (fewest key parts, then lowest first uncovered column on ties).
pub(crate) fn get_best_covering_ror_intersect(
    param: &RangeParam<'_>,
    mut scans: Vec<RorScanInfo>,
    read_time: f64,
) -> Option<RorIntersectReadPlan> {
    if scans.len() < 2 {
        return None;
    }
    let mut covered = ColumnSet::new();
    let mut total_cost = 0.0;
    let mut records: u64 = 0;
    let mut mark = 0;
    let mut all_covered = false;
    while mark < scans.len() && !all_covered {
        for scan in &mut scans[mark..] {
            scan.covered_fields.subtract(&covered);
            scan.used_fields_covered = scan.covered_fields.len();
            scan.first_uncovered_field = first_missing(&scan.covered_fields);
        }
        scans[mark..].sort_by(|a, b| {
            b.used_fields_covered
                .cmp(&a.used_fields_covered)
                .then(a.key_components.cmp(&b.key_components))
                .then(a.first_uncovered_field.cmp(&b.first_uncovered_field))
        });

        total_cost += scans[mark].index_read_cost;
        records += scans[mark].records;
        if total_cost > read_time {
            return None;
        }
        covered.union_with(&scans[mark].covered_fields);
        all_covered = param.needed_fields.is_subset(&covered);
        mark += 1;
    }
    if !all_covered || mark == 1 {
        return None;
    }

    // Merging the rowid streams.
    total_cost += records as f64 * (mark as f64).ln() / (TIME_FOR_COMPARE_ROWID * LN_2);
    if total_cost > read_time {
        return None;
    }
    let plan = RorIntersectReadPlan {
        scans: scans[..mark].iter().map(|s| s.to_range_plan(param)).collect(),
        cpk_scan: None,
        is_covering: true,
        records,
        read_cost: total_cost,
        index_scan_costs: total_cost,
    };
    debug!(scans = mark, cost = total_cost, "covering ROR intersection candidate");
    Some(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::get_mm_tree;
    use crate::range_seq::check_quick_select;
    use crate::test_util::Fixture;
    use expr::Expr;
    use pretty_assertions::assert_eq;
    use storage::{TableStats, IO_SIZE};

    fn big_stats() -> TableStats {
        TableStats {
            records: 10_000,
            data_file_length: 4 * 1024 * IO_SIZE,
            block_size: IO_SIZE as u32,
            ref_length: 8,
            mean_rec_length: 400,
        }
    }

    /// Context over `i_a`, `i_b` and `PRIMARY`, needing `needed` columns.
    fn param_without_ab(fx: &Fixture, needed: ColumnSet) -> RangeParam<'_> {
        let keys = [fx.keynr("i_a"), fx.keynr("i_b"), fx.keynr("PRIMARY")];
        RangeParam::new(fx.table.meta(), &fx.cursor, &fx.config, &keys, needed)
    }

    fn all_columns() -> ColumnSet {
        (0..4u16).collect()
    }

    fn ror_scans(param: &mut RangeParam<'_>, tree: &SelTree) -> Vec<(usize, ScanEstimate)> {
        let mut out = Vec::new();
        for idx in 0..tree.keys.len() {
            let Some(root) = tree.keys[idx] else { continue };
            if let Some(est) = check_quick_select(param, idx, true, root).unwrap() {
                if est.is_ror {
                    out.push((idx, est));
                }
            }
        }
        out
    }

    fn a_and_b() -> Expr {
        Expr::col("a").eq(Expr::int(1)).and(Expr::col("b").eq(Expr::int(3)))
    }

    #[test]
    fn two_equalities_intersect() {
        let fx = Fixture::abc_with(Some(big_stats()));
        let mut param = param_without_ab(&fx, all_columns());
        let tree = get_mm_tree(&mut param, &a_and_b()).unwrap();
        let scans = ror_scans(&mut param, &tree);
        assert_eq!(scans.len(), 2);

        let search = get_best_ror_intersect(&param, &tree, &scans, f64::MAX, true).unwrap();
        let plan = search.plan.expect("intersection");
        // b = 3 matches fewer rows, so it goes first.
        let names: Vec<&str> = plan.scans.iter().map(|s| s.key_name.as_str()).collect();
        assert_eq!(names, vec!["i_b", "i_a"]);
        assert!(plan.cpk_scan.is_none());
        assert!(!plan.is_covering);
        assert_eq!(plan.records, 1);
        assert!(plan.read_cost >= plan.index_scan_costs);
    }

    #[test]
    fn covered_scan_adds_no_selectivity() {
        let fx = Fixture::abc_with(Some(big_stats()));
        let mut param = crate::test_util::param_fixture(&fx);
        let tree = get_mm_tree(&mut param, &a_and_b()).unwrap();
        let scans = ror_scans(&mut param, &tree);
        // i_ab already covers a and b, leaving nothing for i_a or i_b to add.
        assert_eq!(scans.len(), 3);
        let search = get_best_ror_intersect(&param, &tree, &scans, f64::MAX, true).unwrap();
        assert!(search.plan.is_none());
        assert_eq!(param.keys[search.scans[0].idx].name, "i_ab");
    }

    #[test]
    fn single_scan_is_not_an_intersection() {
        let fx = Fixture::abc_with(Some(big_stats()));
        let mut param = param_without_ab(&fx, all_columns());
        let tree = get_mm_tree(&mut param, &Expr::col("b").eq(Expr::int(3))).unwrap();
        let scans = ror_scans(&mut param, &tree);
        assert_eq!(scans.len(), 1);
        let search = get_best_ror_intersect(&param, &tree, &scans, f64::MAX, true).unwrap();
        assert!(search.plan.is_none());
    }

    #[test]
    fn read_time_bounds_the_search() {
        let fx = Fixture::abc_with(Some(big_stats()));
        let mut param = param_without_ab(&fx, all_columns());
        let tree = get_mm_tree(&mut param, &a_and_b()).unwrap();
        let scans = ror_scans(&mut param, &tree);
        let search = get_best_ror_intersect(&param, &tree, &scans, 0.0, true).unwrap();
        assert!(search.plan.is_none());
        assert_eq!(search.scans.len(), 2);
    }

    #[test]
    fn covering_search_needs_all_columns() {
        let fx = Fixture::abc_with(Some(big_stats()));
        // Only a and b are needed: i_a and i_b together cover them.
        let needed: ColumnSet = [1u16, 2].into_iter().collect();
        let mut param = param_without_ab(&fx, needed);
        let tree = get_mm_tree(&mut param, &a_and_b()).unwrap();
        let scans: Vec<RorScanInfo> = ror_scans(&mut param, &tree)
            .iter()
            .map(|(idx, est)| make_ror_scan(&param, *idx, tree.keys[*idx].unwrap(), est))
            .collect();
        let plan = get_best_covering_ror_intersect(&param, scans.clone(), f64::MAX).unwrap();
        assert!(plan.is_covering);
        assert_eq!(plan.scans.len(), 2);
        assert_eq!(plan.records, 14);

        assert!(get_best_covering_ror_intersect(&param, scans, 0.0).is_none());
        assert!(get_best_covering_ror_intersect(&param, Vec::new(), f64::MAX).is_none());
    }
}
