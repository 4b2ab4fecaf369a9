//! Range and index-merge access path selection for a single table.
//!
//! Given a predicate over one table, the planner decides how to read the
//! qualifying rows most cheaply: a range scan of one index, a rowid-ordered
//! intersection or union of several range scans, a sort-union of range
//! scans, a loose index scan for grouped MIN/MAX, or a plain table scan.
//!
//! # Architecture
//!
//! ```text
//! Expr (WHERE)
//!     ↓ builder::get_mm_tree
//! SelTree (per-index interval trees in a SelArgArena, plus SelImerge alternatives)
//!     ↓ enumerator::choose_read_plan  (cost model: cost.rs, ror.rs, group_min_max.rs)
//! PlanChoice { TableScan | Impossible | Plan(TableReadPlan) }
//!     ↓ executor::make_quick
//! QuickSelect
//! ```
//!
//! Interval nodes live in an arena owned by [`RangeParam`]; plans copy out
//! the materialized ranges they need, so the arena is dropped as soon as a
//! plan is chosen.
//!
//! # Example
//!
//! ```
//! use catalog::{Catalog, Column, IndexKind};
//! use common::Config;
//! use expr::Expr;
//! use planner::{choose_read_plan, PlanChoice, TableQuery};
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
//!     .cond(Expr::col("a").gt(Expr::int(5)).and(Expr::col("a").lt(Expr::int(3))))
//!     .build();
//! let choice = choose_read_plan(table.meta(), &table.cursor(), &Config::default(), &query).unwrap();
//! assert_eq!(choice, PlanChoice::Impossible);
//! ```

pub mod builder;
pub mod cost;
pub mod enumerator;
pub mod group_min_max;
pub mod param;
pub mod plan;
pub mod range_seq;
mod ror;
pub mod sel_arg;
pub mod sel_tree;

#[cfg(test)]
mod test_util;

pub use builder::get_mm_tree;
pub use enumerator::{choose_read_plan, TableQuery};
pub use group_min_max::GroupMinMaxQuery;
pub use param::{KeyInfo, KeyPart, RangeParam};
pub use plan::{
    explain, render_explain, ExplainRow, GroupMinMaxReadPlan, IndexMergeReadPlan, PlanChoice,
    RangeReadPlan, RorIntersectReadPlan, RorUnionReadPlan, TableReadPlan,
};
pub use range_seq::{KeyPartFilter, QuickRange};
pub use sel_arg::{Interval, RangeFlags};
pub use sel_tree::{SelTree, TreeType};
