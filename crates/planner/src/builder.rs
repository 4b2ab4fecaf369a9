//! Turning a predicate into a [`SelTree`].
//!
//! Each supported condition shape on an indexed column becomes one interval
//! tree per index containing the column; AND and OR combine the per-condition
//! trees with [`tree_and`] and [`tree_or`]. Anything that cannot be expressed
//! as intervals becomes a `Maybe` tree, which the residual filter handles.

use common::{ColumnId, DbResult, Row};
use expr::{BinaryOp, EvalContext, Expr, UnaryOp};
use tracing::trace;
use types::{SqlType, Value};

use crate::{
    param::RangeParam,
    sel_arg::{Element, Interval, RangeFlags},
    sel_tree::{tree_and, tree_or, SelTree, TreeType},
};

/// Build the range tree of `cond`.
pub fn get_mm_tree(param: &mut RangeParam<'_>, cond: &Expr) -> DbResult<SelTree> {
    let nkeys = param.keys.len();
    if cond.is_constant() {
        return Ok(constant_tree(cond, nkeys));
    }

    match cond {
        Expr::Binary {
            op: BinaryOp::And, ..
        } => {
            let mut conjuncts = Vec::new();
            flatten(cond, BinaryOp::And, &mut conjuncts);
            let mut tree: Option<SelTree> = None;
            for c in conjuncts {
                let next = get_mm_tree(param, c)?;
                let acc = match tree {
                    None => next,
                    Some(acc) => tree_and(param, acc, next)?,
                };
                if acc.kind == TreeType::Impossible {
                    return Ok(acc);
                }
                tree = Some(acc);
            }
            Ok(tree.unwrap_or_else(|| SelTree::always(nkeys)))
        }
        Expr::Binary {
            op: BinaryOp::Or, ..
        } => {
            let mut disjuncts = Vec::new();
            flatten(cond, BinaryOp::Or, &mut disjuncts);
            let mut tree: Option<SelTree> = None;
            for d in disjuncts {
                let next = get_mm_tree(param, d)?;
                let acc = match tree {
                    None => next,
                    Some(acc) => tree_or(param, acc, next)?,
                };
                if matches!(acc.kind, TreeType::Always | TreeType::Maybe) {
                    return Ok(acc);
                }
                tree = Some(acc);
            }
            Ok(tree.unwrap_or_else(|| SelTree::impossible(nkeys)))
        }
        Expr::Binary { left, op, right } => match (column_of(left), column_of(right)) {
            (Some(name), None) => match const_value(right) {
                Some(v) => comparison_tree(param, name, *op, v),
                None => Ok(SelTree::maybe(nkeys)),
            },
            (None, Some(name)) => match const_value(left) {
                Some(v) => comparison_tree(param, name, op.swapped(), v),
                None => Ok(SelTree::maybe(nkeys)),
            },
            _ => Ok(SelTree::maybe(nkeys)),
        },
        Expr::Unary { op, expr } => match (op, column_of(expr)) {
            (UnaryOp::IsNull, Some(name)) => {
                intervals_tree(param, name, vec![Interval::point(Value::Null)])
            }
            (UnaryOp::IsNotNull, Some(name)) => {
                intervals_tree(param, name, vec![Interval::not_null()])
            }
            (UnaryOp::Not, _) => match negate(expr) {
                Some(negated) => get_mm_tree(param, &negated),
                None => Ok(SelTree::maybe(nkeys)),
            },
            _ => Ok(SelTree::maybe(nkeys)),
        },
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let (Some(name), Some(lo), Some(hi)) =
                (column_of(expr), const_value(low), const_value(high))
            else {
                return Ok(SelTree::maybe(nkeys));
            };
            if *negated {
                let below = comparison_tree(param, name, BinaryOp::Lt, lo)?;
                let above = comparison_tree(param, name, BinaryOp::Gt, hi)?;
                tree_or(param, below, above)
            } else {
                let from = comparison_tree(param, name, BinaryOp::Ge, lo)?;
                let to = comparison_tree(param, name, BinaryOp::Le, hi)?;
                tree_and(param, from, to)
            }
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let Some(name) = column_of(expr) else {
                return Ok(SelTree::maybe(nkeys));
            };
            let Some(values) = list.iter().map(const_value).collect::<Option<Vec<_>>>() else {
                return Ok(SelTree::maybe(nkeys));
            };
            if *negated {
                not_in_tree(param, name, values)
            } else {
                in_tree(param, name, values)
            }
        }
        Expr::Like {
            expr,
            pattern,
            negated: false,
        } => match column_of(expr) {
            Some(name) => like_tree(param, name, pattern),
            None => Ok(SelTree::maybe(nkeys)),
        },
        _ => Ok(SelTree::maybe(nkeys)),
    }
}

fn flatten<'e>(expr: &'e Expr, op: BinaryOp, out: &mut Vec<&'e Expr>) {
    match expr {
        Expr::Binary {
            left,
            op: this,
            right,
        } if *this == op => {
            flatten(left, op, out);
            flatten(right, op, out);
        }
        other => out.push(other),
    }
}

fn column_of(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Column { name, .. } => Some(name),
        _ => None,
    }
}

/// Value of a column-free expression; `None` when it cannot be evaluated.
fn const_value(expr: &Expr) -> Option<Value> {
    if !expr.is_constant() {
        return None;
    }
    let ctx = EvalContext { schema: &[] };
    ctx.eval(expr, &Row::new(Vec::new())).ok()
}

fn constant_tree(cond: &Expr, nkeys: usize) -> SelTree {
    let ctx = EvalContext { schema: &[] };
    match ctx.eval(cond, &Row::new(Vec::new())) {
        Ok(Value::Bool(true)) => SelTree::always(nkeys),
        Ok(_) => SelTree::impossible(nkeys),
        // Leave the error to the residual filter.
        Err(_) => SelTree::maybe(nkeys),
    }
}

/// Push a NOT one level down, where that keeps the meaning under three-valued logic.
fn negate(expr: &Expr) -> Option<Expr> {
    match expr {
        Expr::Unary {
            op: UnaryOp::Not,
            expr,
        } => Some((**expr).clone()),
        Expr::Unary {
            op: UnaryOp::IsNull,
            expr,
        } => Some(Expr::Unary {
            op: UnaryOp::IsNotNull,
            expr: expr.clone(),
        }),
        Expr::Unary {
            op: UnaryOp::IsNotNull,
            expr,
        } => Some(Expr::Unary {
            op: UnaryOp::IsNull,
            expr: expr.clone(),
        }),
        Expr::Binary { left, op, right } => op.negated().map(|op| Expr::Binary {
            left: left.clone(),
            op,
            right: right.clone(),
        }),
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => Some(Expr::Between {
            expr: expr.clone(),
            low: low.clone(),
            high: high.clone(),
            negated: !negated,
        }),
        Expr::InList {
            expr,
            list,
            negated,
        } => Some(Expr::InList {
            expr: expr.clone(),
            list: list.clone(),
            negated: !negated,
        }),
        Expr::Like {
            expr,
            pattern,
            negated,
        } => Some(Expr::Like {
            expr: expr.clone(),
            pattern: pattern.clone(),
            negated: !negated,
        }),
        _ => None,
    }
}

/// Column ordinal and type, if the column exists.
fn resolve(param: &RangeParam<'_>, name: &str) -> Option<(ColumnId, SqlType)> {
    let schema = &param.table.schema;
    let field = schema.column_index(name)?;
    Some((field, schema.column_type(field)?.clone()))
}

fn comparison_tree(
    param: &mut RangeParam<'_>,
    name: &str,
    op: BinaryOp,
    value: Value,
) -> DbResult<SelTree> {
    let nkeys = param.keys.len();
    // Comparisons with NULL are never true.
    if value.is_null() {
        return Ok(SelTree::impossible(nkeys));
    }
    let intervals = match op {
        BinaryOp::Eq => vec![Interval::point(value)],
        BinaryOp::Lt => vec![Interval::below(value, true)],
        BinaryOp::Le => vec![Interval::below(value, false)],
        BinaryOp::Gt => vec![Interval::above(value, true)],
        BinaryOp::Ge => vec![Interval::above(value, false)],
        BinaryOp::Ne => vec![
            Interval::below(value.clone(), true),
            Interval::above(value, true),
        ],
        BinaryOp::And | BinaryOp::Or => return Ok(SelTree::maybe(nkeys)),
    };
    intervals_tree(param, name, intervals)
}

fn in_tree(param: &mut RangeParam<'_>, name: &str, values: Vec<Value>) -> DbResult<SelTree> {
    let mut points: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    if points.is_empty() {
        return Ok(SelTree::impossible(param.keys.len()));
    }
    points.sort();
    points.dedup();
    intervals_tree(param, name, points.into_iter().map(Interval::point).collect())
}

/// `a NOT IN (...)` as the gaps between the sorted list values.
fn not_in_tree(param: &mut RangeParam<'_>, name: &str, values: Vec<Value>) -> DbResult<SelTree> {
    let nkeys = param.keys.len();
    if values.len() > param.config.not_in_ignore_threshold {
        trace!(values = values.len(), "NOT IN list too long for ranges");
        return Ok(SelTree::maybe(nkeys));
    }
    // One NULL in the list makes the predicate unknown for every row.
    if values.iter().any(Value::is_null) {
        return Ok(SelTree::impossible(nkeys));
    }
    if values.is_empty() {
        return Ok(SelTree::maybe(nkeys));
    }
    let mut points = values;
    points.sort();
    points.dedup();

    let mut gaps = Vec::with_capacity(points.len() + 1);
    gaps.push(Interval::below(points[0].clone(), true));
    for w in points.windows(2) {
        gaps.push(Interval::new(
            w[0].clone(),
            RangeFlags::NEAR_MIN,
            w[1].clone(),
            RangeFlags::NEAR_MAX,
        ));
    }
    if let Some(last) = points.last() {
        gaps.push(Interval::above(last.clone(), true));
    }
    intervals_tree(param, name, gaps)
}

/// Ranges for `LIKE` patterns with a literal prefix.
fn like_tree(param: &mut RangeParam<'_>, name: &str, pattern: &str) -> DbResult<SelTree> {
    let nkeys = param.keys.len();
    match resolve(param, name) {
        Some((_, SqlType::Text)) => {}
        _ => return Ok(SelTree::maybe(nkeys)),
    }
    let prefix: String = pattern.chars().take_while(|c| *c != '%' && *c != '_').collect();
    if prefix.len() == pattern.len() {
        return intervals_tree(param, name, vec![Interval::point(Value::Text(prefix))]);
    }
    if prefix.is_empty() {
        return Ok(SelTree::maybe(nkeys));
    }
    let interval = match prefix_successor(&prefix) {
        Some(upper) => Interval::new(
            Value::Text(prefix),
            RangeFlags::NONE,
            Value::Text(upper),
            RangeFlags::NEAR_MAX,
        ),
        None => Interval::above(Value::Text(prefix), false),
    };
    intervals_tree(param, name, vec![interval])
}

/// Smallest string greater than every string starting with `prefix`.
fn prefix_successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = char::from_u32(last as u32 + 1) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

/// One tree per index part on `name`, each holding `intervals`.
fn intervals_tree(
    param: &mut RangeParam<'_>,
    name: &str,
    intervals: Vec<Interval>,
) -> DbResult<SelTree> {
    let nkeys = param.keys.len();
    let Some((field, ty)) = resolve(param, name) else {
        return Ok(SelTree::maybe(nkeys));
    };
    if intervals
        .iter()
        .any(|i| !i.min.fits(&ty) || !i.max.fits(&ty))
    {
        trace!(column = name, "constant type does not match column");
        return Ok(SelTree::maybe(nkeys));
    }
    let parts = param.key_parts_on(field);
    if parts.is_empty() {
        return Ok(SelTree::maybe(nkeys));
    }

    let elements: Vec<Element> = intervals
        .into_iter()
        .filter(|i| !i.is_empty())
        .map(|i| (i, None))
        .collect();
    if elements.is_empty() {
        return Ok(SelTree::impossible(nkeys));
    }

    let mut tree = SelTree::new(TreeType::Key, nkeys);
    for (idx, part) in parts {
        tree.keys[idx] = Some(param.arena.build(part, field, elements.clone(), false)?);
    }
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sel_arg::NodeId;
    use crate::test_util::{param_fixture, Fixture};
    use pretty_assertions::assert_eq;

    fn render(param: &RangeParam<'_>, root: NodeId) -> Vec<String> {
        param
            .arena
            .iter(root)
            .map(|id| {
                let node = param.arena.node(id);
                match node.next_key_part {
                    Some(next) => format!("{} -> {}", node.interval, render(param, next).join(" ")),
                    None => node.interval.to_string(),
                }
            })
            .collect()
    }

    fn key_of(param: &RangeParam<'_>, tree: &SelTree, name: &str) -> Option<Vec<String>> {
        let idx = param.keys.iter().position(|k| k.name == name)?;
        tree.keys[idx].map(|root| render(param, root))
    }

    #[test]
    fn comparison_feeds_every_index_on_the_column() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let tree = get_mm_tree(&mut param, &Expr::col("a").gt(Expr::int(3))).unwrap();
        assert_eq!(tree.kind, TreeType::Key);
        assert_eq!(key_of(&param, &tree, "i_a"), Some(vec!["(3, +inf)".to_string()]));
        assert_eq!(key_of(&param, &tree, "i_ab"), Some(vec!["(3, +inf)".to_string()]));
        assert_eq!(key_of(&param, &tree, "i_b"), None);
    }

    #[test]
    fn swapped_operands_flip_the_operator() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let tree = get_mm_tree(&mut param, &Expr::int(3).gt(Expr::col("a"))).unwrap();
        assert_eq!(key_of(&param, &tree, "i_a"), Some(vec!["(NULL, 3)".to_string()]));
    }

    #[test]
    fn and_builds_compound_key_ranges() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let cond = Expr::col("a")
            .eq(Expr::int(1))
            .and(Expr::col("b").between(Expr::int(2), Expr::int(4)));
        let tree = get_mm_tree(&mut param, &cond).unwrap();
        assert_eq!(
            key_of(&param, &tree, "i_ab"),
            Some(vec!["[1, 1] -> [2, 4]".to_string()])
        );
        assert_eq!(key_of(&param, &tree, "i_b"), Some(vec!["[2, 4]".to_string()]));
    }

    #[test]
    fn null_handling() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let tree = get_mm_tree(&mut param, &Expr::col("a").is_null()).unwrap();
        assert_eq!(key_of(&param, &tree, "i_a"), Some(vec!["[NULL, NULL]".to_string()]));

        let tree = get_mm_tree(&mut param, &Expr::col("a").is_not_null()).unwrap();
        assert_eq!(key_of(&param, &tree, "i_a"), Some(vec!["(NULL, +inf)".to_string()]));

        let tree = get_mm_tree(&mut param, &Expr::col("a").eq(Expr::null())).unwrap();
        assert_eq!(tree.kind, TreeType::Impossible);
    }

    #[test]
    fn in_and_not_in_lists() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let cond = Expr::col("a").in_list(vec![Expr::int(4), Expr::int(1), Expr::int(4)]);
        let tree = get_mm_tree(&mut param, &cond).unwrap();
        assert_eq!(
            key_of(&param, &tree, "i_a"),
            Some(vec!["[1, 1]".to_string(), "[4, 4]".to_string()])
        );

        let cond = Expr::col("a").not_in_list(vec![Expr::int(4), Expr::int(1)]);
        let tree = get_mm_tree(&mut param, &cond).unwrap();
        assert_eq!(
            key_of(&param, &tree, "i_a"),
            Some(vec![
                "(NULL, 1)".to_string(),
                "(1, 4)".to_string(),
                "(4, +inf)".to_string()
            ])
        );

        let cond = Expr::col("a").not_in_list(vec![Expr::int(4), Expr::null()]);
        let tree = get_mm_tree(&mut param, &cond).unwrap();
        assert_eq!(tree.kind, TreeType::Impossible);
    }

    #[test]
    fn not_pushes_through_comparisons() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let cond = Expr::col("a").lt(Expr::int(3)).not();
        let tree = get_mm_tree(&mut param, &cond).unwrap();
        assert_eq!(key_of(&param, &tree, "i_a"), Some(vec!["[3, +inf)".to_string()]));

        let cond = Expr::col("a").eq(Expr::int(1)).or(Expr::col("b").eq(Expr::int(2))).not();
        let tree = get_mm_tree(&mut param, &cond).unwrap();
        assert_eq!(tree.kind, TreeType::Maybe);
    }

    #[test]
    fn like_prefix_becomes_range() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        // `c` has no index, so the tree is unusable either way.
        let tree = get_mm_tree(&mut param, &Expr::col("c").like("name1%")).unwrap();
        assert_eq!(tree.kind, TreeType::Maybe);
        assert_eq!(prefix_successor("ab"), Some("ac".to_string()));
    }

    #[test]
    fn constant_conditions() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let tree = get_mm_tree(&mut param, &Expr::int(1).eq(Expr::int(1))).unwrap();
        assert_eq!(tree.kind, TreeType::Always);
        let tree = get_mm_tree(&mut param, &Expr::int(1).eq(Expr::int(2))).unwrap();
        assert_eq!(tree.kind, TreeType::Impossible);
        let cond = Expr::col("a").eq(Expr::int(1)).and(Expr::int(1).eq(Expr::int(2)));
        let tree = get_mm_tree(&mut param, &cond).unwrap();
        assert_eq!(tree.kind, TreeType::Impossible);
    }

    #[test]
    fn or_across_indexes_becomes_merge_candidate() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let cond = Expr::col("a").eq(Expr::int(1)).or(Expr::col("b").eq(Expr::int(2)));
        let tree = get_mm_tree(&mut param, &cond).unwrap();
        assert_eq!(tree.kind, TreeType::Key);
        assert!(!tree.has_keys());
        assert_eq!(tree.merges.len(), 1);
        assert_eq!(tree.merges[0].trees.len(), 2);

        let cond = Expr::col("a").eq(Expr::int(1)).or(Expr::col("c").eq(Expr::text("x")));
        let tree = get_mm_tree(&mut param, &cond).unwrap();
        assert_eq!(tree.kind, TreeType::Maybe);
    }

    #[test]
    fn type_mismatch_is_unusable() {
        let fx = Fixture::abc();
        let mut param = param_fixture(&fx);
        let tree = get_mm_tree(&mut param, &Expr::col("a").eq(Expr::text("x"))).unwrap();
        assert_eq!(tree.kind, TreeType::Maybe);
    }
}
