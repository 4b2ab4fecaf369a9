//! Fixture tables and data builders.
//!
//! Every fixture is a [`MemoryTable`] registered through a throwaway
//! [`Catalog`], so key numbers follow index declaration order. Tables with a
//! primary key are clustered on it.

use std::rc::Rc;

use catalog::{Catalog, Column, IndexKind, IndexSpec};
use common::{Row, RowId};
use storage::{MemoryTable, TableStats, IO_SIZE};
use types::{SqlType, Value};

/// Build a vector of integer values.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
/// use types::Value;
///
/// assert_eq!(ints(&[1, 2]), vec![Value::Int(1), Value::Int(2)]);
/// ```
pub fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|&v| Value::Int(v)).collect()
}

/// Build a row with integer values.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
///
/// let row = int_row(&[1, 2, 3]);
/// assert_eq!(row.values.len(), 3);
/// ```
pub fn int_row(values: &[i64]) -> Row {
    Row::new(ints(values))
}

/// Statistics of a table far larger than the rows a fixture loads.
///
/// Planning against them makes index plans win over a table scan while
/// row estimates still come from the loaded entries.
pub fn big_stats() -> TableStats {
    TableStats {
        records: 10_000,
        data_file_length: 4 * 1024 * IO_SIZE,
        block_size: IO_SIZE as u32,
        ref_length: 8,
        mean_rec_length: 400,
    }
}

/// Build a fixture table.
///
/// # Example
///
/// ```
/// use testsupport::fixtures::fixture_table;
/// use types::{SqlType, Value};
///
/// let table = fixture_table()
///     .name("t")
///     .columns(&[("a", SqlType::Int)])
///     .indexes(&[("i_a", &["a"])])
///     .rows(vec![vec![Value::Int(1)], vec![Value::Int(2)]])
///     .call();
/// assert_eq!(table.rows().len(), 2);
/// ```
#[bon::builder]
pub fn fixture_table(
    name: &str,
    columns: &[(&str, SqlType)],
    // B-tree indexes in key number order
    #[builder(default)]
    indexes: &[(&str, &[&str])],
    // declared after `indexes`
    primary_key: Option<&[&str]>,
    rows: Vec<Vec<Value>>,
    stats: Option<TableStats>,
) -> Rc<MemoryTable> {
    let mut catalog = Catalog::new();
    catalog
        .create_table(
            name,
            columns
                .iter()
                .map(|(column, ty)| Column::new(*column, ty.clone()))
                .collect(),
        )
        .expect("fixture table");
    for (index, index_columns) in indexes {
        catalog
            .create_index(name, index, index_columns, IndexKind::BTree)
            .expect("fixture index");
    }
    if let Some(pk) = primary_key {
        catalog
            .create_index_with(
                name,
                IndexSpec::builder()
                    .name("PRIMARY")
                    .columns(pk.iter().map(|c| c.to_string()).collect())
                    .primary(true)
                    .build(),
            )
            .expect("fixture primary key");
    }
    let meta = catalog.table(name).expect("fixture meta").clone();
    MemoryTable::builder()
        .meta(meta)
        .rows(rows)
        .maybe_stats(stats)
        .build()
        .expect("fixture rows")
}

/// Table `t(id, a, b, c)` with 40 rows and indexes `i_a(a)`, `i_b(b)`,
/// `i_ab(a, b)` and `PRIMARY(id)`, in that key order.
///
/// Row `id` holds `a = id % 5` (NULL when `id` is a multiple of 10),
/// `b = id % 7` and `c = 'nameNN'` with `NN = id % 13`.
pub fn abc_table() -> Rc<MemoryTable> {
    abc_table_with(None)
}

/// [`abc_table`] planned with `stats` instead of measured statistics.
pub fn abc_table_with(stats: Option<TableStats>) -> Rc<MemoryTable> {
    let rows = (1..=40)
        .map(|id| {
            vec![
                Value::Int(id),
                if id % 10 == 0 {
                    Value::Null
                } else {
                    Value::Int(id % 5)
                },
                Value::Int(id % 7),
                Value::Text(format!("name{:02}", id % 13)),
            ]
        })
        .collect();
    fixture_table()
        .name("t")
        .columns(&[
            ("id", SqlType::Int),
            ("a", SqlType::Int),
            ("b", SqlType::Int),
            ("c", SqlType::Text),
        ])
        .indexes(&[("i_a", &["a"]), ("i_b", &["b"]), ("i_ab", &["a", "b"])])
        .primary_key(&["id"])
        .rows(rows)
        .maybe_stats(stats)
        .call()
}

/// Table `g(g, k, v)` with the single index `i_gkv(g, k, v)` and no primary
/// key: four groups of fifteen rows, `v = g * 100 + k * 10 + (0..5)`, except
/// that `g = 3, k = 1` holds only NULLs in `v`.
pub fn gkv_table() -> Rc<MemoryTable> {
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
    fixture_table()
        .name("g")
        .columns(&[("g", SqlType::Int), ("k", SqlType::Int), ("v", SqlType::Int)])
        .indexes(&[("i_gkv", &["g", "k", "v"])])
        .rows(rows)
        .call()
}

/// Rowids of the three rows that match `a = 5 OR b = 7` in [`union_table`].
pub const UNION_MATCHES: [RowId; 3] = [RowId(100), RowId(400), RowId(700)];

/// Table `t(a, b)` with indexes `i_a(a)` and `i_b(b)`, no primary key and
/// 1000 rows. Only rows 100, 400 and 700 hold `(5, 1)`, `(2, 7)` and `(5, 7)`;
/// every other row has `a, b >= 10`.
pub fn union_table() -> Rc<MemoryTable> {
    let rows = (0..1000i64)
        .map(|i| match i {
            100 => ints(&[5, 1]),
            400 => ints(&[2, 7]),
            700 => ints(&[5, 7]),
            _ => ints(&[10 + i % 90, 10 + i % 80]),
        })
        .collect();
    fixture_table()
        .name("t")
        .columns(&[("a", SqlType::Int), ("b", SqlType::Int)])
        .indexes(&[("i_a", &["a"]), ("i_b", &["b"])])
        .rows(rows)
        .call()
}

/// Table `t(a, b)` with the compound index `i_ab(a, b)` and no primary key:
/// one row for every `a` in `0..25` and `b` in `0..40`.
pub fn compound_table() -> Rc<MemoryTable> {
    let rows = (0..1000i64).map(|i| ints(&[i / 40, i % 40])).collect();
    fixture_table()
        .name("t")
        .columns(&[("a", SqlType::Int), ("b", SqlType::Int)])
        .indexes(&[("i_ab", &["a", "b"])])
        .rows(rows)
        .call()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn union_table_has_three_matches() {
        let table = union_table();
        let matches: Vec<RowId> = table
            .rows()
            .iter()
            .filter(|r| r.values[0] == Value::Int(5) || r.values[1] == Value::Int(7))
            .filter_map(Row::rid)
            .collect();
        assert_eq!(matches, UNION_MATCHES.to_vec());
    }

    #[test]
    fn abc_table_is_clustered_on_id() {
        let table = abc_table();
        let ids: Vec<&Value> = table.rows().iter().map(|r| &r.values[0]).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(table.meta().primary_key(), Some(3));
    }
}
