use std::rc::Rc;

use catalog::{Catalog, Column, IndexKind, IndexSpec};
use common::{ColumnSet, Config};
use storage::{MemoryCursor, MemoryTable, TableStats};
use types::{SqlType, Value};

use crate::param::RangeParam;

/// Table `t(id, a, b, c)` with indexes `i_a(a)`, `i_b(b)`, `i_ab(a, b)` and
/// `PRIMARY(id)`, in that key order.
pub struct Fixture {
    pub table: Rc<MemoryTable>,
    pub cursor: MemoryCursor,
    pub config: Config,
}

impl Fixture {
    pub fn abc() -> Self {
        Self::abc_with(None)
    }

    /// Same table, planned as if it held `stats.records` rows.
    pub fn abc_with(stats: Option<TableStats>) -> Self {
        Self::abc_indexed(&[("i_a", &["a"]), ("i_b", &["b"]), ("i_ab", &["a", "b"])], stats)
    }

    /// Table `t` with the given B-tree indexes followed by `PRIMARY(id)`.
    pub fn abc_indexed(indexes: &[(&str, &[&str])], stats: Option<TableStats>) -> Self {
        let mut catalog = Catalog::new();
        catalog
            .create_table(
                "t",
                vec![
                    Column::new("id", SqlType::Int),
                    Column::new("a", SqlType::Int),
                    Column::new("b", SqlType::Int),
                    Column::new("c", SqlType::Text),
                ],
            )
            .unwrap();
        for (name, columns) in indexes {
            catalog.create_index("t", name, columns, IndexKind::BTree).unwrap();
        }
        catalog
            .create_index_with(
                "t",
                IndexSpec::builder()
                    .name("PRIMARY")
                    .columns(vec!["id".into()])
                    .primary(true)
                    .build(),
            )
            .unwrap();
        let meta = catalog.table("t").unwrap().clone();

        let rows = (1..=40)
            .map(|id| {
                vec![
                    Value::Int(id),
                    if id % 10 == 0 { Value::Null } else { Value::Int(id % 5) },
                    Value::Int(id % 7),
                    Value::Text(format!("name{:02}", id % 13)),
                ]
            })
            .collect();
        let table = MemoryTable::builder()
            .meta(meta)
            .rows(rows)
            .maybe_stats(stats)
            .build()
            .unwrap();
        let cursor = table.cursor();
        Self {
            table,
            cursor,
            config: Config::default(),
        }
    }

    /// Table `g(g, k, v)` with the single index `i_gkv(g, k, v)` and no
    /// primary key. Group `g = 3, k = 1` holds only NULLs in `v`.
    pub fn gkv() -> Self {
        let mut catalog = Catalog::new();
        catalog
            .create_table(
                "g",
                vec![
                    Column::new("g", SqlType::Int),
                    Column::new("k", SqlType::Int),
                    Column::new("v", SqlType::Int),
                ],
            )
            .unwrap();
        catalog
            .create_index("g", "i_gkv", &["g", "k", "v"], IndexKind::BTree)
            .unwrap();
        let meta = catalog.table("g").unwrap().clone();

        let mut rows = Vec::new();
        for g in 0..4 {
            for k in 0..3 {
                for v in 0..5 {
                    let v = if g == 3 && k == 1 {
                        Value::Null
                    } else {
                        Value::Int(g * 100 + k * 10 + v)
                    };
                    rows.push(vec![Value::Int(g), Value::Int(k), v]);
                }
            }
        }
        let table = MemoryTable::builder().meta(meta).rows(rows).build().unwrap();
        let cursor = table.cursor();
        Self {
            table,
            cursor,
            config: Config::default(),
        }
    }

    pub fn keynr(&self, name: &str) -> usize {
        self.table.meta().index_number(name).unwrap()
    }
}

/// Range context over every index, needing every column.
pub fn param_fixture(fx: &Fixture) -> RangeParam<'_> {
    let meta = fx.table.meta();
    let needed: ColumnSet = (0..meta.schema.columns.len() as u16).collect();
    param_needing(fx, needed)
}

/// Range context over every index, needing only `needed`.
pub fn param_needing(fx: &Fixture, needed: ColumnSet) -> RangeParam<'_> {
    let meta = fx.table.meta();
    let keys: Vec<usize> = (0..meta.indexes.len()).collect();
    RangeParam::new(meta, &fx.cursor, &fx.config, &keys, needed)
}
