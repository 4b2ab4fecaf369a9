//! Per-index range conditions of a whole predicate and their AND/OR algebra.
//!
//! A [`SelTree`] holds, for every usable index, the interval tree its first
//! key part must satisfy. A disjunction that no single index can express
//! becomes an index-merge candidate: a list of [`SelImerge`]s, each an OR of
//! range-only trees, with the tree's conditions being the AND of the list.

use std::{cmp::Ordering, mem};

use common::DbResult;
use hashbrown::HashMap;
use tracing::trace;

use crate::{
    param::RangeParam,
    sel_arg::{union_segments, Element, NodeId, SelArgKind},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeType {
    /// No row can match.
    Impossible,
    /// Every row may match.
    Always,
    /// Conditions exist but none are usable for ranges.
    Maybe,
    Key,
    /// Per-index trees select a superset of the rows.
    KeySmaller,
}

/// OR of range-only trees.
#[derive(Clone, Debug)]
pub struct SelImerge {
    pub trees: Vec<SelTree>,
}

#[derive(Clone, Debug)]
pub struct SelTree {
    pub kind: TreeType,
    /// Indexed by usable-index number.
    pub keys: Vec<Option<NodeId>>,
    /// Conjunction of index-merge candidates.
    pub merges: Vec<SelImerge>,
}

impl SelTree {
    pub fn new(kind: TreeType, nkeys: usize) -> Self {
        Self {
            kind,
            keys: vec![None; nkeys],
            merges: Vec::new(),
        }
    }

    pub fn impossible(nkeys: usize) -> Self {
        Self::new(TreeType::Impossible, nkeys)
    }

    pub fn always(nkeys: usize) -> Self {
        Self::new(TreeType::Always, nkeys)
    }

    pub fn maybe(nkeys: usize) -> Self {
        Self::new(TreeType::Maybe, nkeys)
    }

    /// True when the tree has range conditions on some index.
    pub fn has_keys(&self) -> bool {
        self.keys.iter().any(Option::is_some)
    }

    /// True for trees whose per-index conditions can drive a range scan.
    pub fn is_range_usable(&self) -> bool {
        matches!(self.kind, TreeType::Key | TreeType::KeySmaller)
    }
}

impl SelImerge {
    fn new(trees: Vec<SelTree>) -> Self {
        Self { trees }
    }

    /// OR `tree` into the first member it shares an index with, or append it.
    ///
    /// Returns false when the result would select every row.
    fn or_sel_tree_with_checks(
        &mut self,
        param: &mut RangeParam<'_>,
        new_tree: SelTree,
    ) -> DbResult<bool> {
        for tree in &mut self.trees {
            if sel_trees_can_be_ored(param, tree, &new_tree) {
                let ored = tree_or(param, mem::replace(tree, SelTree::maybe(0)), new_tree)?;
                if matches!(ored.kind, TreeType::Maybe | TreeType::Always) {
                    return Ok(false);
                }
                *tree = ored;
                return Ok(true);
            }
        }
        self.trees.push(new_tree);
        Ok(true)
    }

    fn or_sel_imerge_with_checks(
        &mut self,
        param: &mut RangeParam<'_>,
        other: SelImerge,
    ) -> DbResult<bool> {
        for tree in other.trees {
            if !self.or_sel_tree_with_checks(param, tree)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// True when both trees constrain some index starting at the same key part.
pub fn sel_trees_can_be_ored(param: &RangeParam<'_>, t1: &SelTree, t2: &SelTree) -> bool {
    t1.keys.iter().zip(&t2.keys).any(|pair| match pair {
        (Some(a), Some(b)) => param.arena.node(*a).part == param.arena.node(*b).part,
        _ => false,
    })
}

/// Drop per-index trees that do not start at the first key part.
///
/// Returns true when nothing usable is left.
pub fn remove_nonrange_trees(param: &RangeParam<'_>, tree: &mut SelTree) -> bool {
    let mut any = false;
    for key in &mut tree.keys {
        if let Some(root) = *key {
            if param.arena.node(root).part != 0 {
                *key = None;
            } else {
                any = true;
            }
        }
    }
    !any
}

/// Conjunction of two trees.
pub fn tree_and(param: &mut RangeParam<'_>, t1: SelTree, t2: SelTree) -> DbResult<SelTree> {
    use TreeType::*;
    match (t1.kind, t2.kind) {
        (Impossible, _) | (_, Always) => return Ok(t1),
        (_, Impossible) | (Always, _) => return Ok(t2),
        (Maybe, _) => {
            let mut t2 = t2;
            if t2.kind == Key {
                t2.kind = KeySmaller;
            }
            return Ok(t2);
        }
        (_, Maybe) => {
            let mut t1 = t1;
            t1.kind = KeySmaller;
            return Ok(t1);
        }
        _ => {}
    }

    let nkeys = t1.keys.len();
    let mut result = t1;
    let mut has_keys = false;
    for idx in 0..nkeys {
        let (k1, k2) = (result.keys[idx], t2.keys[idx]);
        if k1.is_none() && k2.is_none() {
            continue;
        }
        let key = key_and(param, k1, k2)?;
        if key.is_some_and(|k| param.arena.is_impossible(k)) {
            trace!(idx, "conjunction is impossible on index");
            return Ok(SelTree::impossible(nkeys));
        }
        result.keys[idx] = key;
        has_keys |= key.is_some();
    }
    if has_keys {
        result.merges.clear();
    } else {
        result.merges.extend(t2.merges);
    }
    Ok(result)
}

/// Disjunction of two trees.
pub fn tree_or(param: &mut RangeParam<'_>, t1: SelTree, t2: SelTree) -> DbResult<SelTree> {
    use TreeType::*;
    match (t1.kind, t2.kind) {
        (Impossible, _) | (_, Always) => return Ok(t2),
        (_, Impossible) | (Always, _) => return Ok(t1),
        (Maybe, _) => return Ok(t1),
        (_, Maybe) => return Ok(t2),
        _ => {}
    }

    let nkeys = t1.keys.len();
    if sel_trees_can_be_ored(param, &t1, &t2) {
        let mut result = t1;
        let mut has_keys = false;
        for idx in 0..nkeys {
            let key = key_or(param, result.keys[idx], t2.keys[idx])?;
            result.keys[idx] = key;
            has_keys |= key.is_some();
        }
        if !has_keys {
            return Ok(SelTree::always(nkeys));
        }
        return Ok(result);
    }

    let (mut t1, mut t2) = (t1, t2);
    match (t1.merges.is_empty(), t2.merges.is_empty()) {
        (true, true) => {
            if remove_nonrange_trees(param, &mut t1) || remove_nonrange_trees(param, &mut t2) {
                return Ok(SelTree::always(nkeys));
            }
            let mut result = SelTree::new(Key, nkeys);
            result.merges.push(SelImerge::new(vec![t1, t2]));
            Ok(result)
        }
        (false, false) => {
            // Only the first candidate of each side survives.
            t1.merges.truncate(1);
            let Some(other) = t2.merges.into_iter().next() else {
                return Ok(SelTree::always(nkeys));
            };
            if !t1.merges[0].or_sel_imerge_with_checks(param, other)? {
                return Ok(SelTree::always(nkeys));
            }
            Ok(t1)
        }
        _ => {
            let (mut imerge_tree, mut range_tree) = if t1.merges.is_empty() {
                (t2, t1)
            } else {
                (t1, t2)
            };
            if remove_nonrange_trees(param, &mut range_tree) {
                return Ok(SelTree::always(nkeys));
            }
            let mut kept = Vec::new();
            for mut imerge in mem::take(&mut imerge_tree.merges) {
                if imerge.or_sel_tree_with_checks(param, range_tree.clone())? {
                    kept.push(imerge);
                }
            }
            if kept.is_empty() {
                return Ok(SelTree::always(nkeys));
            }
            imerge_tree.merges = kept;
            Ok(imerge_tree)
        }
    }
}

/// Conjunction of two interval trees of the same index.
pub fn key_and(
    param: &mut RangeParam<'_>,
    key1: Option<NodeId>,
    key2: Option<NodeId>,
) -> DbResult<Option<NodeId>> {
    let (Some(mut k1), Some(mut k2)) = (key1, key2) else {
        return Ok(key1.or(key2));
    };
    if param.arena.is_impossible(k1) || param.arena.is_impossible(k2) {
        return Ok(Some(param.arena.impossible()));
    }

    let (p1, p2) = (param.arena.node(k1).part, param.arena.node(k2).part);
    if p1 != p2 {
        if p1 > p2 {
            mem::swap(&mut k1, &mut k2);
        }
        return and_all_keys(param, k1, k2).map(Some);
    }

    if param.arena.kind(k1) == SelArgKind::MaybeKey {
        mem::swap(&mut k1, &mut k2);
    }
    if param.arena.kind(k2) == SelArgKind::MaybeKey {
        let (n1, n2) = (
            param.arena.node(k1).next_key_part,
            param.arena.node(k2).next_key_part,
        );
        if param.arena.kind(k1) == SelArgKind::MaybeKey {
            let next = key_and(param, n1, n2)?;
            if next.is_some_and(|n| param.arena.is_impossible(n)) {
                return Ok(next);
            }
            let node = param.arena.node(k1);
            let (part, field) = (node.part, node.field);
            return param.arena.maybe_key(part, field, next).map(Some);
        }
        let smaller = with_maybe_flag(param, k1)?;
        if n2.is_some() {
            return and_all_keys(param, smaller, k2).map(Some);
        }
        return Ok(Some(smaller));
    }

    let node = param.arena.node(k1);
    let (part, field) = (node.part, node.field);
    let maybe_flag = node.maybe_flag && param.arena.node(k2).maybe_flag;

    let mut out: Vec<Element> = Vec::new();
    let mut e1 = Some(param.arena.first(k1));
    let mut e2 = Some(param.arena.first(k2));
    while let (Some(x), Some(y)) = (e1, e2) {
        let cmp = param
            .arena
            .node(x)
            .interval
            .cmp_min_to_min(&param.arena.node(y).interval);
        let skipped = if cmp == Ordering::Less {
            get_range(param, &mut e1, &mut e2, k1)
        } else {
            get_range(param, &mut e2, &mut e1, k2)
        };
        if skipped {
            continue;
        }
        let (Some(x), Some(y)) = (e1, e2) else {
            break;
        };
        let (nx, ny) = (param.arena.node(x), param.arena.node(y));
        let overlap = nx.interval.intersect(&ny.interval);
        let x_ends_first = nx.interval.cmp_max_to_max(&ny.interval) == Ordering::Less;
        let (next_x, next_y) = (nx.next_key_part, ny.next_key_part);
        if let Some(interval) = overlap {
            let next = key_and(param, next_x, next_y)?;
            if !next.is_some_and(|n| param.arena.is_impossible(n)) {
                out.push((interval, next));
            }
        }
        if x_ends_first {
            e1 = param.arena.next(x);
        } else {
            e2 = param.arena.next(y);
        }
    }
    param.arena.build(part, field, out, maybe_flag).map(Some)
}

/// Move `e1` (from the tree at `root1`) to the first interval that may overlap
/// `e2`. Returns true when no overlap exists at the current positions.
fn get_range(
    param: &RangeParam<'_>,
    e1: &mut Option<NodeId>,
    e2: &mut Option<NodeId>,
    root1: NodeId,
) -> bool {
    let Some(y) = *e2 else {
        return true;
    };
    let arena = &param.arena;
    let target = &arena.node(y).interval;
    let found = arena.find_range(root1, target);
    *e1 = Some(found);
    if arena.node(found).interval.cmp_max_to_min(target) == Ordering::Less {
        *e1 = arena.next(found);
        let Some(next) = *e1 else {
            return true;
        };
        if arena.node(next).interval.cmp_min_to_max(target) == Ordering::Greater {
            *e2 = arena.next(y);
            return true;
        }
    }
    false
}

/// AND `key2` (a later key part) into every element of `key1`.
fn and_all_keys(param: &mut RangeParam<'_>, key1: NodeId, key2: NodeId) -> DbResult<NodeId> {
    let node = param.arena.node(key1);
    let (part, field, maybe_flag) = (node.part, node.field, node.maybe_flag);
    let (kind, next_key_part) = (node.kind, node.next_key_part);

    if kind == SelArgKind::MaybeKey {
        let next = match next_key_part {
            Some(n) => key_and(param, Some(n), Some(key2))?,
            None => Some(key2),
        };
        if let Some(n) = next.filter(|n| param.arena.is_impossible(*n)) {
            return Ok(n);
        }
        return param.arena.maybe_key(part, field, next);
    }

    let mut out: Vec<Element> = Vec::new();
    for (interval, next) in param.arena.elements_of(key1) {
        let next = match next {
            Some(n) => key_and(param, Some(n), Some(key2))?,
            None => Some(key2),
        };
        if next.is_some_and(|n| param.arena.is_impossible(n)) {
            continue;
        }
        out.push((interval, next));
    }
    param.arena.build(part, field, out, maybe_flag)
}

fn with_maybe_flag(param: &mut RangeParam<'_>, root: NodeId) -> DbResult<NodeId> {
    let node = param.arena.node(root);
    if node.maybe_flag {
        return Ok(root);
    }
    let (part, field) = (node.part, node.field);
    let elements = param.arena.elements_of(root);
    param.arena.build(part, field, elements, true)
}

/// Disjunction of two interval trees of the same index.
///
/// `None` means the result does not restrict the index at all.
pub fn key_or(
    param: &mut RangeParam<'_>,
    key1: Option<NodeId>,
    key2: Option<NodeId>,
) -> DbResult<Option<NodeId>> {
    let (Some(k1), Some(k2)) = (key1, key2) else {
        return Ok(None);
    };
    if param.arena.is_impossible(k1) {
        return Ok(Some(k2));
    }
    if param.arena.is_impossible(k2) {
        return Ok(Some(k1));
    }
    let (n1, n2) = (param.arena.node(k1), param.arena.node(k2));
    if n1.part != n2.part {
        return Ok(None);
    }
    if n1.kind == SelArgKind::MaybeKey {
        return Ok(Some(k1));
    }
    if n2.kind == SelArgKind::MaybeKey {
        return Ok(Some(k2));
    }
    let (part, field) = (n1.part, n1.field);
    let maybe_flag = n1.maybe_flag || n2.maybe_flag;

    let a = param.arena.elements_of(k1);
    let b = param.arena.elements_of(k2);
    let mut ored: HashMap<(usize, usize), Option<NodeId>> = HashMap::new();
    let mut out: Vec<Element> = Vec::new();
    for segment in union_segments(&a, &b) {
        let next = match (segment.left, segment.right) {
            (Some(i), None) => a[i].1,
            (None, Some(j)) => b[j].1,
            (Some(i), Some(j)) => match ored.get(&(i, j)) {
                Some(next) => *next,
                None => {
                    let next = key_or(param, a[i].1, b[j].1)?;
                    ored.insert((i, j), next);
                    next
                }
            },
            (None, None) => continue,
        };
        if segment.joins_previous {
            if let Some(last) = out.last_mut() {
                if param.arena.eq_tree(last.1, next) {
                    if let Some(merged) = last.0.merge_if_adjacent(&segment.interval) {
                        last.0 = merged;
                        continue;
                    }
                }
            }
        }
        out.push((segment.interval, next));
    }

    if out.len() == 1 && out[0].0.is_full() && out[0].1.is_none() {
        return if maybe_flag {
            param.arena.maybe_key(part, field, None).map(Some)
        } else {
            Ok(None)
        };
    }
    if out.len() > param.config.max_sel_args {
        trace!(intervals = out.len(), "disjunction too large, dropping key");
        return Ok(None);
    }
    param.arena.build(part, field, out, maybe_flag).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::get_mm_tree;
    use crate::sel_arg::{Interval, RangeFlags};
    use crate::test_util::{param_fixture, Fixture};
    use common::Config;
    use expr::Expr;
    use pretty_assertions::assert_eq;
    use types::Value;

    fn int(v: i64) -> Value {
        Value::Int(v)
    }

    fn intervals(param: &RangeParam<'_>, root: NodeId) -> Vec<String> {
        param
            .arena
            .iter(root)
            .map(|id| param.arena.node(id).interval.to_string())
            .collect()
    }

    fn leaf(param: &mut RangeParam<'_>, part: u16, interval: Interval) -> NodeId {
        param.arena.leaf(part, part, interval).unwrap()
    }

    #[test]
    fn and_of_overlapping_ranges_intersects() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let a = leaf(&mut param, 0, Interval::above(int(3), false));
        let b = leaf(&mut param, 0, Interval::below(int(10), true));
        let out = key_and(&mut param, Some(a), Some(b)).unwrap().unwrap();
        assert_eq!(intervals(&param, out), vec!["[3, 10)"]);
    }

    #[test]
    fn and_of_disjoint_ranges_is_impossible() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let a = leaf(&mut param, 0, Interval::point(int(1)));
        let b = leaf(&mut param, 0, Interval::point(int(2)));
        let out = key_and(&mut param, Some(a), Some(b)).unwrap().unwrap();
        assert!(param.arena.is_impossible(out));
    }

    #[test]
    fn and_walks_many_intervals() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let points: Vec<Element> = [1, 4, 7, 12, 20]
            .into_iter()
            .map(|v| (Interval::point(int(v)), None))
            .collect();
        let a = param.arena.build(0, 0, points, false).unwrap();
        let b = leaf(
            &mut param,
            0,
            Interval::new(int(4), RangeFlags::NONE, int(12), RangeFlags::NONE),
        );
        let out = key_and(&mut param, Some(a), Some(b)).unwrap().unwrap();
        assert_eq!(intervals(&param, out), vec!["[4, 4]", "[7, 7]", "[12, 12]"]);
    }

    #[test]
    fn and_across_parts_attaches_next_key_part() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let a = leaf(&mut param, 0, Interval::point(int(1)));
        let b = leaf(&mut param, 1, Interval::point(int(2)));
        let out = key_and(&mut param, Some(b), Some(a)).unwrap().unwrap();
        assert_eq!(param.arena.node(out).part, 0);
        let next = param.arena.node(out).next_key_part.unwrap();
        assert_eq!(param.arena.node(next).part, 1);
        assert_eq!(intervals(&param, next), vec!["[2, 2]"]);
    }

    #[test]
    fn or_merges_adjacent_and_overlapping() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let a = leaf(&mut param, 0, Interval::below(int(5), true));
        let b = leaf(&mut param, 0, Interval::above(int(5), false));
        let out = key_or(&mut param, Some(a), Some(b)).unwrap().unwrap();
        assert_eq!(intervals(&param, out), vec!["(NULL, +inf)"]);

        let is_null = leaf(&mut param, 0, Interval::point(Value::Null));
        assert_eq!(key_or(&mut param, Some(out), Some(is_null)).unwrap(), None);

        let c = leaf(&mut param, 0, Interval::point(int(5)));
        let d = leaf(&mut param, 0, Interval::point(int(9)));
        let out = key_or(&mut param, Some(c), Some(d)).unwrap().unwrap();
        assert_eq!(intervals(&param, out), vec!["[5, 5]", "[9, 9]"]);
    }

    #[test]
    fn or_with_maybe_key_stays_maybe() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let a = leaf(&mut param, 0, Interval::point(int(5)));
        let m = param.arena.maybe_key(0, 0, None).unwrap();
        let out = key_or(&mut param, Some(a), Some(m)).unwrap().unwrap();
        assert_eq!(param.arena.kind(out), SelArgKind::MaybeKey);
    }

    #[test]
    fn or_keeps_distinct_next_key_parts() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let b1 = leaf(&mut param, 1, Interval::point(int(10)));
        let b2 = leaf(&mut param, 1, Interval::point(int(20)));
        let a1 = leaf(&mut param, 0, Interval::point(int(1)));
        let a2 = leaf(&mut param, 0, Interval::point(int(1)));
        let left = key_and(&mut param, Some(a1), Some(b1)).unwrap();
        let right = key_and(&mut param, Some(a2), Some(b2)).unwrap();
        let out = key_or(&mut param, left, right).unwrap().unwrap();
        assert_eq!(intervals(&param, out), vec!["[1, 1]"]);
        let next = param.arena.node(out).next_key_part.unwrap();
        assert_eq!(intervals(&param, next), vec!["[10, 10]", "[20, 20]"]);
    }

    #[test]
    fn tree_or_without_common_key_builds_imerge() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let nkeys = param.keys.len();
        let mut t1 = SelTree::new(TreeType::Key, nkeys);
        t1.keys[0] = Some(leaf(&mut param, 0, Interval::point(int(1))));
        let mut t2 = SelTree::new(TreeType::Key, nkeys);
        t2.keys[1] = Some(leaf(&mut param, 0, Interval::point(int(2))));

        let ored = tree_or(&mut param, t1, t2.clone()).unwrap();
        assert_eq!(ored.kind, TreeType::Key);
        assert!(!ored.has_keys());
        assert_eq!(ored.merges.len(), 1);
        assert_eq!(ored.merges[0].trees.len(), 2);

        // A third disjunct on the first index folds into the first member.
        let mut t3 = SelTree::new(TreeType::Key, nkeys);
        t3.keys[0] = Some(leaf(&mut param, 0, Interval::point(int(7))));
        let ored = tree_or(&mut param, ored, t3).unwrap();
        assert_eq!(ored.merges[0].trees.len(), 2);
        let first = ored.merges[0].trees[0].keys[0].unwrap();
        assert_eq!(intervals(&param, first), vec!["[1, 1]", "[7, 7]"]);
    }

    #[test]
    fn tree_or_with_non_leading_part_is_always() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let nkeys = param.keys.len();
        let mut t1 = SelTree::new(TreeType::Key, nkeys);
        t1.keys[0] = Some(leaf(&mut param, 0, Interval::point(int(1))));
        let mut t2 = SelTree::new(TreeType::Key, nkeys);
        t2.keys[2] = Some(leaf(&mut param, 1, Interval::point(int(2))));
        let ored = tree_or(&mut param, t1, t2).unwrap();
        assert_eq!(ored.kind, TreeType::Always);
    }

    #[test]
    fn tree_and_clears_merges_once_keys_exist() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let nkeys = param.keys.len();
        let mut t1 = SelTree::new(TreeType::Key, nkeys);
        t1.keys[0] = Some(leaf(&mut param, 0, Interval::point(int(1))));
        let mut t2 = SelTree::new(TreeType::Key, nkeys);
        t2.keys[1] = Some(leaf(&mut param, 0, Interval::point(int(2))));
        let imerge = tree_or(&mut param, t1.clone(), t2).unwrap();

        let anded = tree_and(&mut param, imerge.clone(), t1).unwrap();
        assert!(anded.has_keys());
        assert!(anded.merges.is_empty());

        let maybe = SelTree::maybe(nkeys);
        let anded = tree_and(&mut param, maybe, imerge).unwrap();
        assert_eq!(anded.kind, TreeType::KeySmaller);
        assert_eq!(anded.merges.len(), 1);
    }

    #[test]
    fn tree_and_of_contradiction_is_impossible() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let nkeys = param.keys.len();
        let mut t1 = SelTree::new(TreeType::Key, nkeys);
        t1.keys[0] = Some(leaf(&mut param, 0, Interval::below(int(1), true)));
        let mut t2 = SelTree::new(TreeType::Key, nkeys);
        t2.keys[0] = Some(leaf(&mut param, 0, Interval::above(int(5), true)));
        let anded = tree_and(&mut param, t1, t2).unwrap();
        assert_eq!(anded.kind, TreeType::Impossible);
    }

    #[test]
    fn disjunction_over_element_cap_drops_the_key() {
        let mut fx = Fixture::abc();
        fx.config = Config::builder().max_sel_args(2).build();
        let i_a = fx.keynr("i_a");
        let mut param = param_fixture(&fx);

        let two = Expr::col("a").eq(Expr::int(1)).or(Expr::col("a").eq(Expr::int(4)));
        let tree = get_mm_tree(&mut param, &two).unwrap();
        let root = tree.keys[i_a].unwrap();
        assert_eq!(intervals(&param, root), vec!["[1, 1]", "[4, 4]"]);

        let three = two.or(Expr::col("a").eq(Expr::int(7)));
        let tree = get_mm_tree(&mut param, &three).unwrap();
        assert!(tree.keys[i_a].is_none());
        assert_eq!(tree.kind, TreeType::Always);
    }
}
