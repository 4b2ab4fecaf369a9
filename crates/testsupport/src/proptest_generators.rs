//! Predicate strategies for property tests.
//!
//! Constants come from `-1..9`, the value domain of the fixture tables, so
//! generated conditions select some rows and miss others.

use expr::Expr;
use proptest::prelude::*;

fn int_const() -> impl Strategy<Value = Expr> {
    (-1i64..9).prop_map(Expr::int)
}

/// Strategy for one range-analysable comparison on an integer column.
///
/// Covers `=`, `<>`, `<`, `<=`, `>`, `>=`, `BETWEEN`, `IN`, `NOT IN` and the
/// NULL tests, in both `col OP const` and `const OP col` forms.
pub fn arb_comparison(columns: Vec<&'static str>) -> impl Strategy<Value = Expr> {
    let column = prop::sample::select(columns);
    (column, 0u8..12, int_const(), int_const(), prop::collection::vec(-1i64..9, 1..4)).prop_map(
        |(name, op, x, y, list)| {
            let col = Expr::col(name);
            let list = list.into_iter().map(Expr::int).collect();
            match op {
                0 => col.eq(x),
                1 => col.ne(x),
                2 => col.lt(x),
                3 => col.le(x),
                4 => col.gt(x),
                5 => col.ge(x),
                6 => x.lt(col),
                7 => col.between(x, y),
                8 => col.in_list(list),
                9 => col.not_in_list(list),
                10 => col.is_null(),
                _ => col.is_not_null(),
            }
        },
    )
}

/// Strategy for AND/OR/NOT trees of [`arb_comparison`] leaves.
///
/// # Example
///
/// ```
/// use proptest::prelude::*;
/// use testsupport::proptest_generators::arb_predicate;
///
/// proptest! {
///     #[test]
///     fn predicates_mention_known_columns(cond in arb_predicate(vec!["a", "b"])) {
///         assert!(cond.columns().iter().all(|c| *c == "a" || *c == "b"));
///     }
/// }
/// ```
pub fn arb_predicate(columns: Vec<&'static str>) -> impl Strategy<Value = Expr> {
    arb_comparison(columns).prop_recursive(3, 12, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| l.and(r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| l.or(r)),
            inner.prop_map(Expr::not),
        ]
    })
}
