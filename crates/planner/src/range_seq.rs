//! Flattening an interval tree into ordered key ranges and estimating them.

use std::{cmp::Ordering, ops::Bound};

use catalog::IndexKind;
use common::DbResult;
use storage::prefix_cmp;
use tracing::trace;
use types::Value;

use crate::{
    cost::{CostVector, TIME_FOR_COMPARE},
    param::{KeyInfo, RangeParam},
    sel_arg::{Interval, NodeId, RangeFlags, SelArg, SelArgArena, SelArgKind},
};

/// Conditions on later key parts that a range's endpoints cannot express.
///
/// `a IN (1, 3) AND b IN (10, 20)` walked as `[1, 3]` would also return
/// `(2, 25)`; the filter keeps only entries whose `b` lies in a branch.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyPartFilter {
    pub part: u16,
    pub branches: Vec<(Interval, Option<KeyPartFilter>)>,
}

impl KeyPartFilter {
    fn from_tree(arena: &SelArgArena, root: NodeId) -> Option<Self> {
        let node = arena.node(root);
        if node.kind != SelArgKind::KeyRange {
            return None;
        }
        let branches = arena
            .iter(root)
            .map(|id| {
                let n = arena.node(id);
                let next = n.next_key_part.and_then(|next| Self::from_tree(arena, next));
                (n.interval.clone(), next)
            })
            .collect();
        Some(Self {
            part: node.part,
            branches,
        })
    }

    /// True when `key` satisfies some branch.
    pub fn matches(&self, key: &[Value]) -> bool {
        let Some(v) = key.get(usize::from(self.part)) else {
            return true;
        };
        self.branches.iter().any(|(interval, next)| {
            interval.contains(v) && next.as_ref().is_none_or(|n| n.matches(key))
        })
    }
}

/// One contiguous stretch of an index, given by key prefixes.
#[derive(Clone, Debug, PartialEq)]
pub struct QuickRange {
    pub min_key: Vec<Value>,
    pub max_key: Vec<Value>,
    pub flag: RangeFlags,
    pub filter: Option<KeyPartFilter>,
}

impl QuickRange {
    pub fn min_bound(&self) -> Bound<&[Value]> {
        if self.flag.contains(RangeFlags::NO_MIN_RANGE) {
            Bound::Unbounded
        } else if self.flag.contains(RangeFlags::NEAR_MIN) {
            Bound::Excluded(&self.min_key)
        } else {
            Bound::Included(&self.min_key)
        }
    }

    pub fn max_bound(&self) -> Bound<&[Value]> {
        if self.flag.contains(RangeFlags::NO_MAX_RANGE) {
            Bound::Unbounded
        } else if self.flag.contains(RangeFlags::NEAR_MAX) {
            Bound::Excluded(&self.max_key)
        } else {
            Bound::Included(&self.max_key)
        }
    }

    pub fn is_eq(&self) -> bool {
        self.flag.contains(RangeFlags::EQ_RANGE)
    }

    /// True when an entry with `key` lies past the end of the range.
    pub fn is_past_end(&self, key: &[Value]) -> bool {
        match self.max_bound() {
            Bound::Unbounded => false,
            Bound::Included(max) => prefix_cmp(key, max) == Ordering::Greater,
            Bound::Excluded(max) => prefix_cmp(key, max) != Ordering::Less,
        }
    }

    /// True when an entry with `key` lies inside the range.
    pub fn contains_key(&self, key: &[Value]) -> bool {
        let after_min = match self.min_bound() {
            Bound::Unbounded => true,
            Bound::Included(min) => prefix_cmp(key, min) != Ordering::Less,
            Bound::Excluded(min) => prefix_cmp(key, min) == Ordering::Greater,
        };
        after_min && !self.is_past_end(key) && self.passes_filter(key)
    }

    pub fn passes_filter(&self, key: &[Value]) -> bool {
        self.filter.as_ref().is_none_or(|f| f.matches(key))
    }
}

/// Ordered ranges of one index tree plus how many key parts they use.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RangeSeq {
    pub ranges: Vec<QuickRange>,
    pub used_key_parts: usize,
    pub max_used_key_length: u32,
}

/// Walk the tree of index `key` in key order, producing one range per
/// non-point stretch and descending into the next key part under points.
pub fn get_quick_keys(arena: &SelArgArena, key: &KeyInfo, root: NodeId) -> RangeSeq {
    let mut seq = RangeSeq::default();
    let mut min_key = Vec::new();
    let mut max_key = Vec::new();
    walk(arena, key, root, &mut min_key, &mut max_key, &mut seq);
    seq
}

fn store_min(node: &SelArg, key: &mut Vec<Value>) -> bool {
    if node.interval.min_flag.contains(RangeFlags::NO_MIN_RANGE) {
        return false;
    }
    key.push(node.interval.min.clone());
    true
}

fn store_max(node: &SelArg, key: &mut Vec<Value>) -> bool {
    if node.interval.max_flag.contains(RangeFlags::NO_MAX_RANGE) {
        return false;
    }
    key.push(node.interval.max.clone());
    true
}

/// Extend `key` with the lowest endpoint along the next-key-part chain.
fn store_min_key(arena: &SelArgArena, root: NodeId, key: &mut Vec<Value>, flag: &mut RangeFlags) {
    let node = arena.node(arena.first(root));
    store_min(node, key);
    *flag |= node.interval.min_flag;
    if let Some(next) = next_part(arena, node) {
        if !flag.intersects(RangeFlags::NO_MIN_RANGE | RangeFlags::NEAR_MIN) {
            store_min_key(arena, next, key, flag);
        }
    }
}

fn store_max_key(arena: &SelArgArena, root: NodeId, key: &mut Vec<Value>, flag: &mut RangeFlags) {
    let node = arena.node(arena.last(root));
    store_max(node, key);
    *flag |= node.interval.max_flag;
    if let Some(next) = next_part(arena, node) {
        if !flag.intersects(RangeFlags::NO_MAX_RANGE | RangeFlags::NEAR_MAX) {
            store_max_key(arena, next, key, flag);
        }
    }
}

/// The next-key-part tree when it is an interval tree on the following part.
fn next_part(arena: &SelArgArena, node: &SelArg) -> Option<NodeId> {
    node.next_key_part.filter(|next| {
        let n = arena.node(*next);
        n.kind == SelArgKind::KeyRange && n.part == node.part + 1
    })
}

fn walk(
    arena: &SelArgArena,
    key: &KeyInfo,
    root: NodeId,
    min_key: &mut Vec<Value>,
    max_key: &mut Vec<Value>,
    seq: &mut RangeSeq,
) {
    for id in arena.iter(root) {
        let node = arena.node(id);
        let (min_len, max_len) = (min_key.len(), max_key.len());
        let stored_min = store_min(node, min_key);
        let stored_max = store_max(node, max_key);

        let mut filter = None;
        let flag = match next_part(arena, node) {
            Some(next) if stored_min && stored_max && node.interval.is_point() => {
                walk(arena, key, next, min_key, max_key, seq);
                min_key.truncate(min_len);
                max_key.truncate(max_len);
                continue;
            }
            Some(next) => {
                let mut min_flag = node.interval.min_flag;
                let mut max_flag = node.interval.max_flag;
                if min_flag.is_empty() {
                    store_min_key(arena, next, min_key, &mut min_flag);
                }
                if max_flag.is_empty() {
                    store_max_key(arena, next, max_key, &mut max_flag);
                }
                filter = KeyPartFilter::from_tree(arena, next);
                min_flag | max_flag
            }
            None => node.interval.min_flag | node.interval.max_flag,
        };

        let mut flag = if min_key.is_empty() {
            flag | RangeFlags::NO_MIN_RANGE
        } else {
            flag.without(RangeFlags::NO_MIN_RANGE)
        };
        flag = if max_key.is_empty() {
            flag | RangeFlags::NO_MAX_RANGE
        } else {
            flag.without(RangeFlags::NO_MAX_RANGE)
        };

        if flag.is_empty() && min_key == max_key {
            flag = RangeFlags::EQ_RANGE;
            if key.unique && min_key.len() == key.parts.len() {
                flag |= if min_key.iter().any(Value::is_null) {
                    RangeFlags::NULL_RANGE
                } else {
                    RangeFlags::UNIQUE_RANGE
                };
            }
        }

        let parts = min_key.len().max(max_key.len());
        if parts > seq.used_key_parts {
            seq.used_key_parts = parts;
            seq.max_used_key_length = key.prefix_length(parts);
        }
        seq.ranges.push(QuickRange {
            min_key: min_key.clone(),
            max_key: max_key.clone(),
            flag,
            filter,
        });
        min_key.truncate(min_len);
        max_key.truncate(max_len);
    }
}

/// True when equal-prefix entries on the first `nparts` parts of index `idx`
/// come back in rowid order.
///
/// Holds when the prefix is the whole key, or when the remaining parts are a
/// leading run of a clustered primary key.
pub fn is_key_scan_ror(param: &RangeParam<'_>, idx: usize, nparts: usize) -> bool {
    let key = &param.keys[idx];
    if nparts >= key.parts.len() {
        return true;
    }
    if !param.cursor.primary_key_is_clustered() {
        return false;
    }
    let Some(pk) = param.table.primary_key() else {
        return false;
    };
    let pk_columns = &param.table.indexes[pk].columns;
    let rest = &key.parts[nparts..];
    rest.len() <= pk_columns.len()
        && rest.iter().zip(pk_columns).all(|(part, pk_col)| part.field == *pk_col)
}

/// Row and cost estimate of one index's range scan.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanEstimate {
    pub records: u64,
    pub cost: CostVector,
    pub is_ror: bool,
    pub seq: RangeSeq,
}

/// Estimate the range scan of index `idx` over the tree at `root`.
///
/// Returns `None` when the tree cannot drive a scan of this index or the
/// engine cannot estimate the ranges.
pub fn check_quick_select(
    param: &mut RangeParam<'_>,
    idx: usize,
    index_only: bool,
    root: NodeId,
) -> DbResult<Option<ScanEstimate>> {
    let node = param.arena.node(root);
    if node.kind == SelArgKind::Impossible {
        return Ok(Some(ScanEstimate {
            records: 0,
            cost: CostVector::default(),
            is_ror: false,
            seq: RangeSeq::default(),
        }));
    }
    if node.kind != SelArgKind::KeyRange || node.part != 0 {
        return Ok(None);
    }

    let key = &param.keys[idx];
    let keynr = key.keynr;
    let seq = get_quick_keys(&param.arena, key, root);

    let mut records: u64 = 0;
    for range in &seq.ranges {
        let rows = if range.flag.contains(RangeFlags::UNIQUE_RANGE) {
            1
        } else {
            let rows = param
                .cursor
                .estimated_rows(keynr, range.min_bound(), range.max_bound())?;
            if rows == u64::MAX {
                trace!(index = %key.name, "engine cannot estimate range");
                return Ok(None);
            }
            rows
        };
        records = records.saturating_add(rows);
    }
    param.quick_rows[idx] = Some(records);

    let clustered_pk = param.is_clustered_pk(keynr);
    let index_only = index_only && param.cursor.supports_keyread(keynr) && !clustered_pk;
    let n_ranges = seq.ranges.len() as u64;
    let cost = CostVector {
        io_count: if index_only && records > 2 {
            param.cursor.index_only_read_cost(keynr, records)
        } else {
            param.cursor.read_time(keynr, n_ranges, records)
        },
        avg_io_cost: 1.0,
        cpu_cost: records as f64 / TIME_FOR_COMPARE + 0.01,
    };

    let is_ror = if key.kind != IndexKind::BTree {
        false
    } else if clustered_pk {
        true
    } else {
        param.cursor.is_rowid_ordered(keynr)
            && match seq.ranges.as_slice() {
                [range] => {
                    range.is_eq()
                        && range.filter.is_none()
                        && range
                            .flag
                            .without(RangeFlags::EQ_RANGE | RangeFlags::UNIQUE_RANGE | RangeFlags::NULL_RANGE)
                            .is_empty()
                        && is_key_scan_ror(param, idx, range.min_key.len())
                }
                _ => false,
            }
    };

    trace!(
        index = %param.keys[idx].name,
        ranges = n_ranges,
        records,
        cost = cost.total_cost(),
        is_ror,
        "estimated range scan"
    );
    Ok(Some(ScanEstimate {
        records,
        cost,
        is_ror,
        seq,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::get_mm_tree;
    use crate::test_util::{param_fixture, Fixture};
    use expr::Expr;
    use pretty_assertions::assert_eq;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::Int(*v)).collect()
    }

    fn idx_of(param: &RangeParam<'_>, name: &str) -> usize {
        param.keys.iter().position(|k| k.name == name).unwrap()
    }

    fn ranges_for(fx: &Fixture, cond: Expr, index: &str) -> (RangeSeq, Option<ScanEstimate>) {
        let mut param = param_fixture(fx);
        let tree = get_mm_tree(&mut param, &cond).unwrap();
        let idx = idx_of(&param, index);
        let root = tree.keys[idx].unwrap();
        let seq = get_quick_keys(&param.arena, &param.keys[idx], root);
        let estimate = check_quick_select(&mut param, idx, false, root).unwrap();
        (seq, estimate)
    }

    #[test]
    fn points_descend_into_next_key_part() {
        let fx = Fixture::abc();
        let cond = Expr::col("a")
            .in_list(vec![Expr::int(1), Expr::int(3)])
            .and(Expr::col("b").eq(Expr::int(6)));
        let (seq, estimate) = ranges_for(&fx, cond, "i_ab");
        assert_eq!(seq.ranges.len(), 2);
        assert_eq!(seq.ranges[0].min_key, ints(&[1, 6]));
        assert_eq!(seq.ranges[1].max_key, ints(&[3, 6]));
        assert!(seq.ranges.iter().all(QuickRange::is_eq));
        assert_eq!(seq.used_key_parts, 2);
        assert_eq!(seq.max_used_key_length, 16);
        // id 6 has (a, b) = (1, 6) and id 13 has (3, 6)
        assert_eq!(estimate.unwrap().records, 2);
    }

    #[test]
    fn range_on_first_part_carries_filter() {
        let fx = Fixture::abc();
        let cond = Expr::col("a")
            .between(Expr::int(1), Expr::int(3))
            .and(Expr::col("b").in_list(vec![Expr::int(1), Expr::int(2)]));
        let (seq, _) = ranges_for(&fx, cond, "i_ab");
        assert_eq!(seq.ranges.len(), 1);
        let range = &seq.ranges[0];
        assert_eq!(range.min_key, ints(&[1, 1]));
        assert_eq!(range.max_key, ints(&[3, 2]));
        assert!(range.contains_key(&ints(&[2, 1])));
        assert!(!range.contains_key(&ints(&[2, 5])));
        assert!(!range.contains_key(&ints(&[3, 3])));
        assert!(range.is_past_end(&ints(&[3, 3])));
    }

    #[test]
    fn open_ranges_get_no_min_and_near_flags() {
        let fx = Fixture::abc();
        let (seq, _) = ranges_for(&fx, Expr::col("a").lt(Expr::int(2)), "i_a");
        let range = &seq.ranges[0];
        assert_eq!(range.min_key, vec![Value::Null]);
        assert!(range.flag.contains(RangeFlags::NEAR_MIN | RangeFlags::NEAR_MAX));
        assert!(!range.contains_key(&[Value::Null]));
        assert!(range.contains_key(&ints(&[1])));

        let (seq, _) = ranges_for(&fx, Expr::col("id").ge(Expr::int(39)), "PRIMARY");
        assert!(seq.ranges[0].flag.contains(RangeFlags::NO_MAX_RANGE));
        assert_eq!(seq.ranges[0].max_bound(), Bound::Unbounded);
    }

    #[test]
    fn unique_full_key_equality() {
        let fx = Fixture::abc();
        let (seq, estimate) = ranges_for(&fx, Expr::col("id").eq(Expr::int(7)), "PRIMARY");
        assert!(seq.ranges[0].flag.contains(RangeFlags::UNIQUE_RANGE));
        let estimate = estimate.unwrap();
        assert_eq!(estimate.records, 1);
        assert!(estimate.is_ror);
    }

    #[test]
    fn single_equality_on_secondary_is_rowid_ordered() {
        let fx = Fixture::abc();
        let (_, estimate) = ranges_for(&fx, Expr::col("b").eq(Expr::int(3)), "i_b");
        assert!(estimate.unwrap().is_ror);

        let (_, estimate) = ranges_for(&fx, Expr::col("b").gt(Expr::int(3)), "i_b");
        assert!(!estimate.unwrap().is_ror);

        // Equal `a` alone leaves `b` unordered inside the prefix.
        let (_, estimate) = ranges_for(&fx, Expr::col("a").eq(Expr::int(3)), "i_ab");
        assert!(!estimate.unwrap().is_ror);
    }

    #[test]
    fn clustered_pk_suffix_keeps_rowid_order() {
        let fx = Fixture::abc();
        let param = param_fixture(&fx);
        let i_a = idx_of(&param, "i_a");
        let i_ab = idx_of(&param, "i_ab");
        assert!(is_key_scan_ror(&param, i_a, 1));
        assert!(!is_key_scan_ror(&param, i_ab, 1));
        assert!(is_key_scan_ror(&param, i_ab, 2));
    }

    #[test]
    fn filter_matches_nested_branches() {
        let filter = KeyPartFilter {
            part: 1,
            branches: vec![(
                Interval::point(Value::Int(5)),
                Some(KeyPartFilter {
                    part: 2,
                    branches: vec![(Interval::above(Value::Int(0), true), None)],
                }),
            )],
        };
        assert!(filter.matches(&ints(&[9, 5, 1])));
        assert!(!filter.matches(&ints(&[9, 5, 0])));
        assert!(!filter.matches(&ints(&[9, 4, 1])));
        assert!(filter.matches(&ints(&[9])));
    }
}
