//! Loose index scan for `GROUP BY g.. ` queries computing `MIN`/`MAX` of one
//! column.
//!
//! An index qualifies when its leading parts are exactly the group columns,
//! any parts between the group and the MIN/MAX column are pinned to a single
//! constant by the predicate, and it holds every column the query reads.
//! The scan then jumps from group to group instead of reading every entry.

use catalog::IndexKind;
use common::ColumnId;
use tracing::{debug, trace};

use crate::{
    cost::TIME_FOR_COMPARE,
    param::{KeyInfo, RangeParam},
    plan::GroupMinMaxReadPlan,
    sel_arg::{Interval, NodeId, SelArgArena, SelArgKind},
    sel_tree::SelTree,
};

/// Shape of a grouped query: group columns plus an optional MIN/MAX argument.
#[derive(Clone, Debug, PartialEq, bon::Builder)]
pub struct GroupMinMaxQuery {
    pub group_by: Vec<String>,
    #[builder(into)]
    pub min_max_column: Option<String>,
    #[builder(default)]
    pub have_min: bool,
    #[builder(default)]
    pub have_max: bool,
}

impl GroupMinMaxQuery {
    /// Columns the query reads besides the predicate.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.group_by
            .iter()
            .chain(&self.min_max_column)
            .map(String::as_str)
    }
}

/// Subtree constraining key part `part`, reached through the parts before it.
///
/// Gives up when earlier parts lead to different subtrees for different
/// intervals, since no single set of ranges applies then.
fn tree_for_part(arena: &SelArgArena, root: NodeId, part: u16) -> Option<NodeId> {
    let mut level = root;
    loop {
        let node = arena.node(level);
        if node.kind != SelArgKind::KeyRange || node.part > part {
            return None;
        }
        if node.part == part {
            return Some(level);
        }
        let mut next: Option<Option<NodeId>> = None;
        for id in arena.iter(level) {
            let nkp = arena.node(id).next_key_part;
            match next {
                None => next = Some(nkp),
                Some(prev) if !arena.eq_tree(prev, nkp) => return None,
                Some(_) => {}
            }
        }
        level = next.flatten()?;
    }
}

/// Cost and group count of a loose scan using `used_key_parts` parts of `key`.
fn cost_group_min_max(
    param: &RangeParam<'_>,
    key: &KeyInfo,
    used_key_parts: usize,
    group_key_parts: usize,
    have_min: bool,
    have_max: bool,
) -> (f64, u64) {
    let stats = param.cursor.stats();
    let table_records = param.records;
    let keys_per_block =
        u64::from(stats.block_size / 2 / (key.key_length() + stats.ref_length).max(1)) + 1;
    let num_blocks = table_records / keys_per_block + 1;

    let keys_per_group = param
        .cursor
        .rec_per_key(key.keynr, group_key_parts)
        .filter(|n| *n > 0)
        .unwrap_or(table_records / 10 + 1);
    let num_groups = table_records / keys_per_group + 1;

    let io_cost = if used_key_parts > group_key_parts {
        let keys_per_subgroup = param
            .cursor
            .rec_per_key(key.keynr, used_key_parts)
            .unwrap_or(1);
        let p_overlap = if keys_per_subgroup >= keys_per_block {
            1.0
        } else {
            let blocks_per_group = num_blocks as f64 / num_groups as f64;
            (blocks_per_group * (keys_per_subgroup as f64 - 1.0) / keys_per_group as f64).min(1.0)
        };
        (num_groups as f64 * (1.0 + p_overlap)).min(num_blocks as f64)
    } else if keys_per_group > keys_per_block {
        if have_min && have_max {
            (num_groups + 1) as f64
        } else {
            num_groups as f64
        }
    } else {
        num_blocks as f64
    };
    let cpu_cost = num_groups as f64 / TIME_FOR_COMPARE;
    (io_cost + cpu_cost, num_groups)
}

fn column_id(param: &RangeParam<'_>, name: &str) -> Option<ColumnId> {
    param.table.schema.column_index(name)
}

/// Plan a loose scan for one index, or explain why it cannot be used.
fn plan_for_key(
    param: &RangeParam<'_>,
    tree: Option<&SelTree>,
    idx: usize,
    group: &[ColumnId],
    min_max: Option<ColumnId>,
    query: &GroupMinMaxQuery,
) -> Result<GroupMinMaxReadPlan, &'static str> {
    let key = &param.keys[idx];
    if key.kind != IndexKind::BTree {
        return Err("not an ordered index");
    }
    let group_len = group.len();
    if key.parts.len() < group_len
        || !key.parts[..group_len]
            .iter()
            .all(|part| group.contains(&part.field))
    {
        return Err("group columns are not a key prefix");
    }
    if !param.needed_fields.is_subset(&key.columns()) {
        return Err("index does not hold every needed column");
    }

    let min_max_part = match min_max {
        Some(field) => Some(
            key.parts
                .iter()
                .skip(group_len)
                .position(|part| part.field == field)
                .map(|pos| pos + group_len)
                .ok_or("MIN/MAX column is not in the key after the group")?,
        ),
        None => None,
    };
    let root = tree.and_then(|tree| tree.keys[idx]);

    // Parts between the group and the MIN/MAX column must be constants.
    let mut key_infix = Vec::new();
    if let Some(mm_part) = min_max_part {
        for part in group_len..mm_part {
            let level = root
                .and_then(|root| tree_for_part(&param.arena, root, part as u16))
                .ok_or("key infix part is not constrained")?;
            let node = param.arena.node(level);
            if param.arena.elements(level) != 1 || !node.interval.is_point() {
                return Err("key infix part is not a single constant");
            }
            key_infix.push(node.interval.min.clone());
        }
    }

    let min_max_ranges = match (min_max_part, root) {
        (Some(part), Some(root)) => tree_for_part(&param.arena, root, part as u16)
            .map(|level| {
                param
                    .arena
                    .elements_of(level)
                    .iter()
                    .filter_map(|(interval, _)| interval.intersect(&Interval::not_null()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|| vec![Interval::not_null()]),
        (Some(_), None) => vec![Interval::not_null()],
        (None, _) => Vec::new(),
    };

    let used_key_parts = min_max_part.map_or(group_len, |part| part + 1);
    let (read_cost, records) = cost_group_min_max(
        param,
        key,
        used_key_parts,
        group_len,
        query.have_min,
        query.have_max,
    );
    Ok(GroupMinMaxReadPlan {
        keynr: key.keynr,
        key_name: key.name.clone(),
        group_prefix_len: group_len,
        key_infix,
        min_max_part,
        min_max_ranges,
        have_min: query.have_min,
        have_max: query.have_max,
        max_used_key_length: key.prefix_length(used_key_parts),
        records,
        read_cost,
    })
}

/// Cheapest loose index scan for `query`, if any index qualifies.
pub fn get_best_group_min_max(
    param: &RangeParam<'_>,
    tree: Option<&SelTree>,
    query: &GroupMinMaxQuery,
) -> Option<GroupMinMaxReadPlan> {
    if query.group_by.is_empty() {
        return None;
    }
    let group = query
        .group_by
        .iter()
        .map(|name| column_id(param, name))
        .collect::<Option<Vec<_>>>()?;
    let min_max = match &query.min_max_column {
        Some(name) => {
            let field = column_id(param, name)?;
            if group.contains(&field) {
                return None;
            }
            Some(field)
        }
        None => None,
    };
    if min_max.is_some() != (query.have_min || query.have_max) {
        return None;
    }

    let mut best: Option<GroupMinMaxReadPlan> = None;
    for idx in 0..param.keys.len() {
        match plan_for_key(param, tree, idx, &group, min_max, query) {
            Ok(plan) => {
                if best.as_ref().is_none_or(|b| plan.read_cost < b.read_cost) {
                    best = Some(plan);
                }
            }
            Err(reason) => trace!(index = %param.keys[idx].name, reason, "no loose scan"),
        }
    }
    if let Some(plan) = &best {
        debug!(
            index = %plan.key_name,
            cost = plan.read_cost,
            groups = plan.records,
            "group min/max candidate"
        );
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::get_mm_tree;
    use crate::test_util::{param_needing, Fixture};
    use common::ColumnSet;
    use expr::Expr;
    use pretty_assertions::assert_eq;
    use types::Value;

    fn min_max_of(column: &str) -> GroupMinMaxQuery {
        GroupMinMaxQuery::builder()
            .group_by(vec!["g".into()])
            .min_max_column(column)
            .have_min(true)
            .have_max(true)
            .build()
    }

    #[test]
    fn group_prefix_with_next_part() {
        let fx = Fixture::gkv();
        let needed: ColumnSet = [0u16, 1].into_iter().collect();
        let param = param_needing(&fx, needed);
        let plan = get_best_group_min_max(&param, None, &min_max_of("k")).unwrap();
        assert_eq!(plan.key_name, "i_gkv");
        assert_eq!(plan.group_prefix_len, 1);
        assert_eq!(plan.min_max_part, Some(1));
        assert!(plan.key_infix.is_empty());
        assert_eq!(plan.min_max_ranges, vec![Interval::not_null()]);
        assert_eq!(plan.max_used_key_length, 16);
        // four distinct g values, fifteen entries each
        assert_eq!(plan.records, 60 / 15 + 1);
    }

    #[test]
    fn infix_needs_an_equality() {
        let fx = Fixture::gkv();
        let needed: ColumnSet = [0u16, 1, 2].into_iter().collect();
        let mut param = param_needing(&fx, needed);
        assert!(get_best_group_min_max(&param, None, &min_max_of("v")).is_none());

        let cond = Expr::col("k").eq(Expr::int(2)).and(Expr::col("v").gt(Expr::int(103)));
        let tree = get_mm_tree(&mut param, &cond).unwrap();
        let plan = get_best_group_min_max(&param, Some(&tree), &min_max_of("v")).unwrap();
        assert_eq!(plan.key_infix, vec![Value::Int(2)]);
        assert_eq!(plan.min_max_part, Some(2));
        assert_eq!(plan.min_max_ranges, vec![Interval::above(Value::Int(103), true)]);

        let cond = Expr::col("k").in_list(vec![Expr::int(1), Expr::int(2)]);
        let tree = get_mm_tree(&mut param, &cond).unwrap();
        assert!(get_best_group_min_max(&param, Some(&tree), &min_max_of("v")).is_none());
    }

    #[test]
    fn uncovered_or_misordered_columns_are_rejected() {
        let fx = Fixture::abc();
        let needed: ColumnSet = [1u16, 2].into_iter().collect();
        let param = param_needing(&fx, needed);
        let by_a = GroupMinMaxQuery::builder()
            .group_by(vec!["a".into()])
            .min_max_column("b")
            .have_max(true)
            .build();
        let plan = get_best_group_min_max(&param, None, &by_a).unwrap();
        assert_eq!(plan.key_name, "i_ab");
        assert!(!plan.have_min);

        // b leads no index that also holds a after it
        let by_b = GroupMinMaxQuery::builder()
            .group_by(vec!["b".into()])
            .min_max_column("a")
            .have_min(true)
            .build();
        assert!(get_best_group_min_max(&param, None, &by_b).is_none());

        let needed: ColumnSet = [1u16, 2, 3].into_iter().collect();
        let param = param_needing(&fx, needed);
        assert!(get_best_group_min_max(&param, None, &by_a).is_none());
    }

    #[test]
    fn distinct_groups_without_aggregate() {
        let fx = Fixture::gkv();
        let needed: ColumnSet = [0u16].into_iter().collect();
        let param = param_needing(&fx, needed);
        let query = GroupMinMaxQuery::builder().group_by(vec!["g".into()]).build();
        let plan = get_best_group_min_max(&param, None, &query).unwrap();
        assert_eq!(plan.min_max_part, None);
        assert!(plan.min_max_ranges.is_empty());
        assert_eq!(plan.max_used_key_length, 8);
    }
}
