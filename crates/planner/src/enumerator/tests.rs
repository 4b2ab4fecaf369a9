use super::*;
use crate::plan::explain;
use crate::test_util::Fixture;
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

fn choose(fx: &Fixture, query: &TableQuery) -> PlanChoice {
    choose_read_plan(fx.table.meta(), &fx.cursor, &fx.config, query).unwrap()
}

fn filtered(cond: Expr) -> TableQuery {
    TableQuery::builder().cond(cond).build()
}

fn expect_plan(choice: PlanChoice) -> TableReadPlan {
    match choice {
        PlanChoice::Plan(plan) => plan,
        other => panic!("expected an index plan, got {other:?}"),
    }
}

#[test]
fn constant_false_predicate_touches_nothing() {
    let fx = Fixture::abc_with(Some(big_stats()));
    let before = fx.table.counters().snapshot();
    for cond in [
        Expr::int(1).eq(Expr::int(0)),
        Expr::col("a").eq(Expr::null()),
        Expr::col("a").gt(Expr::int(3)).and(Expr::col("a").lt(Expr::int(2))),
    ] {
        assert_eq!(choose(&fx, &filtered(cond)), PlanChoice::Impossible);
    }
    assert_eq!(fx.table.counters().snapshot(), before);
}

#[test]
fn no_predicate_scans_the_table() {
    let fx = Fixture::abc_with(Some(big_stats()));
    assert_eq!(choose(&fx, &TableQuery::default()), PlanChoice::TableScan);
    let unusable = filtered(Expr::col("c").like("%x"));
    assert_eq!(choose(&fx, &unusable), PlanChoice::TableScan);
}

#[test]
fn selective_equality_uses_a_range_scan() {
    let fx = Fixture::abc_with(Some(big_stats()));
    let plan = expect_plan(choose(&fx, &filtered(Expr::col("b").eq(Expr::int(3)))));
    let TableReadPlan::Range(range) = &plan else {
        panic!("expected a range scan, got {plan:?}");
    };
    assert_eq!(range.key_name, "i_b");
    assert_eq!(range.records, 6);
    assert!(range.is_ror);
    assert!(!range.covering);

    let row = explain("t", &PlanChoice::Plan(plan), 10_000);
    assert_eq!(row.access_type, "range");
    assert_eq!(row.key_len, "8");
    assert_eq!(row.extra, "Using where");
}

#[test]
fn compound_index_beats_intersection() {
    let fx = Fixture::abc_with(Some(big_stats()));
    let cond = Expr::col("a").eq(Expr::int(1)).and(Expr::col("b").eq(Expr::int(3)));
    let plan = expect_plan(choose(&fx, &filtered(cond)));
    assert_eq!(plan.key_description(), "i_ab");
    assert_eq!(plan.records(), 1);
}

#[test]
fn two_single_column_indexes_intersect() {
    let fx = Fixture::abc_with(Some(big_stats()));
    let cond = Expr::col("a").eq(Expr::int(1)).and(Expr::col("b").eq(Expr::int(3)));
    let query = TableQuery::builder()
        .cond(cond)
        .keys_to_use(vec!["i_a".into(), "i_b".into()])
        .build();
    let plan = expect_plan(choose(&fx, &query));
    assert_eq!(plan.key_description(), "intersect(i_b,i_a)");
    assert!(plan.is_ror());

    let mut fx = fx;
    fx.config.ror_intersect = false;
    let plan = expect_plan(choose(&fx, &query));
    assert_eq!(plan.key_description(), "i_b");
}

#[test]
fn equal_cost_prefers_lower_key_number() {
    let fx = Fixture::abc_indexed(&[("i_a1", &["a"]), ("i_a2", &["a"])], Some(big_stats()));
    let plan = expect_plan(choose(&fx, &filtered(Expr::col("a").eq(Expr::int(1)))));
    assert_eq!(plan.key_description(), "i_a1");
}

#[test]
fn disjunction_of_equalities_is_a_ror_union() {
    let fx = Fixture::abc_with(Some(big_stats()));
    let cond = Expr::col("a").eq(Expr::int(1)).or(Expr::col("b").eq(Expr::int(3)));
    let plan = expect_plan(choose(&fx, &filtered(cond.clone())));
    let TableReadPlan::RorUnion(union) = &plan else {
        panic!("expected a ROR union, got {plan:?}");
    };
    assert_eq!(plan.key_description(), "union(i_a,i_b)");
    assert_eq!(union.records, 14);
    assert_eq!(plan.access_type(), "index_merge");

    let mut fx = fx;
    fx.config.index_merge = false;
    assert_eq!(choose(&fx, &filtered(cond)), PlanChoice::TableScan);
}

#[test]
fn disjunction_of_ranges_is_a_sort_union() {
    let fx = Fixture::abc_with(Some(big_stats()));
    let cond = Expr::col("a").gt(Expr::int(3)).or(Expr::col("b").lt(Expr::int(1)));
    let plan = expect_plan(choose(&fx, &filtered(cond)));
    let TableReadPlan::IndexMerge(merge) = &plan else {
        panic!("expected a sort-union, got {plan:?}");
    };
    assert_eq!(plan.key_description(), "sort_union(i_a,i_b)");
    assert_eq!(merge.records, 8 + 5);
    assert!(!plan.is_ror());
}

#[test]
fn limit_forces_index_consideration() {
    let fx = Fixture::abc();
    // Forty rows: b < 6 reads most of the table, so the scan wins...
    let cond = Expr::col("b").lt(Expr::int(6));
    assert_eq!(choose(&fx, &filtered(cond.clone())), PlanChoice::TableScan);
    // ...unless the caller only wants a few rows.
    let query = TableQuery::builder().cond(cond).limit(5).build();
    let plan = expect_plan(choose(&fx, &query));
    assert_eq!(plan.key_description(), "i_b");
}

#[test]
fn unknown_names_are_planner_errors() {
    let fx = Fixture::abc();
    let query = TableQuery::builder()
        .keys_to_use(vec!["nope".into()])
        .build();
    let err = choose_read_plan(fx.table.meta(), &fx.cursor, &fx.config, &query).unwrap_err();
    assert!(matches!(err, DbError::Planner(_)));

    let query = TableQuery::builder().columns(vec!["zz".into()]).build();
    assert!(query.needed_fields(fx.table.meta()).is_err());
}

#[test]
fn grouped_min_uses_loose_scan() {
    let fx = Fixture::gkv();
    let group = GroupMinMaxQuery::builder()
        .group_by(vec!["g".into()])
        .min_max_column("k")
        .have_min(true)
        .build();
    let query = TableQuery::builder().group(group).build();
    let plan = expect_plan(choose(&fx, &query));
    let TableReadPlan::GroupMinMax(loose) = &plan else {
        panic!("expected a loose index scan, got {plan:?}");
    };
    assert_eq!(loose.key_name, "i_gkv");
    assert_eq!(loose.records, 5);
    let row = explain("g", &PlanChoice::Plan(plan), 60);
    assert_eq!(row.extra, "Using index for group-by");
}

#[test_log::test]
fn needed_fields_follow_query_shape() {
    let fx = Fixture::abc();
    let meta = fx.table.meta();
    let query = TableQuery::builder()
        .columns(vec!["id".into()])
        .cond(Expr::col("b").eq(Expr::int(1)))
        .build();
    let needed: Vec<u16> = query.needed_fields(meta).unwrap().iter().collect();
    assert_eq!(needed, vec![0, 2]);
    let all: Vec<u16> = TableQuery::default().needed_fields(meta).unwrap().iter().collect();
    assert_eq!(all, vec![0, 1, 2, 3]);
}
