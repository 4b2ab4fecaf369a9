//! Table and index metadata.
//!
//! Range analysis, the storage engine and the executor all address an index
//! by its key number: its position in [`TableMeta::indexes`]. Key parts are
//! column ordinals, and the packed key length of a prefix of them feeds the
//! planner's cost model.

use ahash::RandomState;
use common::{ColumnId, ColumnSet, DbError, DbResult, TableId};
use hashbrown::HashMap;
use types::SqlType;

type Map<K, V> = HashMap<K, V, RandomState>;

/// Catalog-wide index identifier, stable across key renumbering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IndexId(pub u64);

/// Registry of tables and the indexes declared on them.
#[derive(Clone, Debug)]
pub struct Catalog {
    tables: Vec<TableMeta>,
    next_table_id: u64,
    next_index_id: u64,
    by_name: Map<String, usize>,
}

fn no_table(name: &str) -> DbError {
    DbError::Catalog(format!("unknown table '{name}'"))
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            tables: Vec::new(),
            next_table_id: 1,
            next_index_id: 1,
            by_name: Map::default(),
        }
    }

    pub fn table(&self, name: &str) -> DbResult<&TableMeta> {
        self.by_name
            .get(name)
            .and_then(|pos| self.tables.get(*pos))
            .ok_or_else(|| no_table(name))
    }

    fn table_mut(&mut self, name: &str) -> DbResult<&mut TableMeta> {
        let pos = *self.by_name.get(name).ok_or_else(|| no_table(name))?;
        self.tables.get_mut(pos).ok_or_else(|| no_table(name))
    }

    pub fn create_table(&mut self, name: &str, columns: Vec<Column>) -> DbResult<TableId> {
        if self.by_name.contains_key(name) {
            return Err(DbError::Catalog(format!("table '{name}' already exists")));
        }
        let id = TableId(self.next_table_id);
        self.next_table_id += 1;
        self.by_name.insert(name.to_string(), self.tables.len());
        self.tables.push(TableMeta {
            id,
            name: name.to_string(),
            schema: TableSchema::try_new(columns)?,
            indexes: Vec::new(),
            by_name: Map::default(),
        });
        Ok(id)
    }

    /// Declare a non-unique index of `kind` over `columns`, in key-part order.
    pub fn create_index(
        &mut self,
        table_name: &str,
        index_name: &str,
        columns: &[&str],
        kind: IndexKind,
    ) -> DbResult<IndexId> {
        let spec = IndexSpec::builder()
            .name(index_name)
            .columns(columns.iter().map(|c| c.to_string()).collect())
            .kind(kind)
            .build();
        self.create_index_with(table_name, spec)
    }

    /// Declare the index described by `spec`. It receives the next key number
    /// of the table.
    ///
    /// A primary key is implicitly unique and a table may carry at most one.
    pub fn create_index_with(&mut self, table_name: &str, spec: IndexSpec) -> DbResult<IndexId> {
        if spec.columns.is_empty() {
            return Err(DbError::Catalog(format!("index '{}' has no key parts", spec.name)));
        }
        let table = self.table(table_name)?;
        if table.by_name.contains_key(&spec.name) {
            return Err(DbError::Catalog(format!(
                "index '{}' already exists on table '{table_name}'",
                spec.name
            )));
        }
        if spec.primary && table.primary_key().is_some() {
            return Err(DbError::Catalog(format!(
                "table '{table_name}' already has a primary key"
            )));
        }
        let mut parts: Vec<ColumnId> = Vec::with_capacity(spec.columns.len());
        for name in &spec.columns {
            let ordinal = table.schema.column_index(name).ok_or_else(|| {
                DbError::Catalog(format!("unknown column '{name}' on table '{table_name}'"))
            })?;
            if parts.contains(&ordinal) {
                return Err(DbError::Catalog(format!(
                    "column '{name}' listed twice in index '{}'",
                    spec.name
                )));
            }
            parts.push(ordinal);
        }

        let id = IndexId(self.next_index_id);
        self.next_index_id += 1;
        let table = self.table_mut(table_name)?;
        table.by_name.insert(spec.name.clone(), table.indexes.len());
        table.indexes.push(IndexMeta {
            id,
            name: spec.name,
            columns: parts,
            kind: spec.kind,
            unique: spec.unique || spec.primary,
            primary: spec.primary,
        });
        Ok(id)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Index definition accepted by [`Catalog::create_index_with`].
///
/// # Example
/// ```
/// use catalog::{IndexKind, IndexSpec};
///
/// let pk = IndexSpec::builder()
///     .name("PRIMARY")
///     .columns(vec!["id".into()])
///     .primary(true)
///     .build();
/// assert_eq!(pk.kind, IndexKind::BTree);
/// ```
#[derive(Clone, Debug, bon::Builder)]
pub struct IndexSpec {
    #[builder(into)]
    pub name: String,
    pub columns: Vec<String>,
    #[builder(default = IndexKind::BTree)]
    pub kind: IndexKind,
    #[builder(default)]
    pub unique: bool,
    #[builder(default)]
    pub primary: bool,
}

/// A table: its columns and its indexes in key-number order.
#[derive(Clone, Debug)]
pub struct TableMeta {
    pub id: TableId,
    pub name: String,
    pub schema: TableSchema,
    pub indexes: Vec<IndexMeta>,
    by_name: Map<String, usize>,
}

impl TableMeta {
    pub fn index(&self, name: &str) -> DbResult<&IndexMeta> {
        self.index_number(name).map(|keynr| &self.indexes[keynr])
    }

    /// Key number of the named index.
    pub fn index_number(&self, name: &str) -> DbResult<usize> {
        self.by_name.get(name).copied().ok_or_else(|| {
            DbError::Catalog(format!("no index '{name}' on table '{}'", self.name))
        })
    }

    pub fn primary_key(&self) -> Option<usize> {
        self.indexes.iter().position(|idx| idx.primary)
    }

    pub fn key_length(&self, keynr: usize) -> u32 {
        self.key_prefix_length(keynr, usize::MAX)
    }

    /// Packed length of the first `parts` key parts of index `keynr`; zero for
    /// an unknown key.
    pub fn key_prefix_length(&self, keynr: usize, parts: usize) -> u32 {
        let Some(index) = self.indexes.get(keynr) else {
            return 0;
        };
        index
            .columns
            .iter()
            .take(parts)
            .filter_map(|col| self.schema.column_type(*col))
            .map(SqlType::pack_length)
            .sum()
    }

    /// Column names by ordinal: the row layout expressions are evaluated against.
    pub fn column_names(&self) -> Vec<String> {
        self.schema.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn key_columns(&self, keynr: usize) -> ColumnSet {
        self.indexes
            .get(keynr)
            .map(|index| index.columns.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<Column>,
    ordinals: Map<String, ColumnId>,
}

impl TableSchema {
    /// Validate `columns` (non-empty, distinct names, ordinals fit a
    /// [`ColumnId`]) and index them by name.
    pub fn try_new(columns: Vec<Column>) -> DbResult<Self> {
        if columns.is_empty() {
            return Err(DbError::Catalog("a table needs at least one column".into()));
        }
        let mut ordinals = Map::default();
        for (pos, column) in columns.iter().enumerate() {
            let ordinal = ColumnId::try_from(pos)
                .map_err(|_| DbError::Catalog(format!("too many columns ({})", columns.len())))?;
            if ordinals.insert(column.name.clone(), ordinal).is_some() {
                return Err(DbError::Catalog(format!("duplicate column '{}'", column.name)));
            }
        }
        Ok(Self { columns, ordinals })
    }

    pub fn column_index(&self, name: &str) -> Option<ColumnId> {
        self.ordinals.get(name).copied()
    }

    pub fn column_type(&self, ordinal: ColumnId) -> Option<&SqlType> {
        self.columns.get(usize::from(ordinal)).map(|c| &c.ty)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: SqlType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexMeta {
    pub id: IndexId,
    pub name: String,
    /// Key parts, most significant first.
    pub columns: Vec<ColumnId>,
    pub kind: IndexKind,
    /// No two rows share a full key value (NULLs excepted).
    pub unique: bool,
    /// The primary key; when the engine clusters rows by it, its order is rowid order.
    pub primary: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    /// Ordered index: supports ranges and, for single-point ranges, rowid order.
    BTree,
    /// Equality-only index: never rowid-ordered.
    Hash,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn t1() -> Catalog {
        let mut catalog = Catalog::new();
        catalog
            .create_table(
                "t1",
                vec![
                    Column::new("id", SqlType::Int),
                    Column::new("a", SqlType::Int),
                    Column::new("c", SqlType::Text),
                ],
            )
            .unwrap();
        catalog
    }

    #[test]
    fn key_numbers_follow_declaration_order() {
        let mut catalog = t1();
        catalog
            .create_index_with(
                "t1",
                IndexSpec::builder()
                    .name("PRIMARY")
                    .columns(vec!["id".into()])
                    .primary(true)
                    .build(),
            )
            .unwrap();
        catalog.create_index("t1", "i_a", &["a"], IndexKind::BTree).unwrap();
        catalog.create_index("t1", "i_c", &["c"], IndexKind::Hash).unwrap();

        let table = catalog.table("t1").unwrap();
        assert_eq!(table.primary_key(), Some(0));
        assert_eq!(table.index_number("i_a").unwrap(), 1);
        assert_eq!(table.index("i_c").unwrap().kind, IndexKind::Hash);
        assert!(table.indexes[0].unique);
        assert!(!table.indexes[1].unique);
        assert_eq!(table.column_names(), vec!["id", "a", "c"]);
    }

    #[test]
    fn key_prefix_lengths_add_up_part_by_part() {
        let mut catalog = t1();
        catalog
            .create_index("t1", "i_ac", &["a", "c"], IndexKind::BTree)
            .unwrap();
        let table = catalog.table("t1").unwrap();
        assert_eq!(table.key_prefix_length(0, 1), 8);
        assert_eq!(table.key_length(0), 8 + 32);
        assert_eq!(table.key_prefix_length(0, 0), 0);
        assert_eq!(table.key_length(7), 0);
        assert_eq!(table.key_columns(0).iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn rejects_bad_definitions() {
        let mut catalog = t1();
        let dup_table = catalog.create_table("t1", vec![Column::new("x", SqlType::Int)]);
        assert!(format!("{}", dup_table.unwrap_err()).contains("already exists"));

        let dup_column = catalog.create_table(
            "t2",
            vec![Column::new("x", SqlType::Int), Column::new("x", SqlType::Int)],
        );
        assert!(format!("{}", dup_column.unwrap_err()).contains("duplicate column"));

        let err = catalog
            .create_index("t1", "i_z", &["z"], IndexKind::BTree)
            .unwrap_err();
        assert!(format!("{err}").contains("unknown column"));

        let err = catalog
            .create_index("t1", "i_aa", &["a", "a"], IndexKind::BTree)
            .unwrap_err();
        assert!(format!("{err}").contains("listed twice"));

        catalog.create_index("t1", "i_a", &["a"], IndexKind::BTree).unwrap();
        let err = catalog
            .create_index("t1", "i_a", &["c"], IndexKind::BTree)
            .unwrap_err();
        assert!(format!("{err}").contains("already exists"));

        let pk = IndexSpec::builder()
            .name("PRIMARY")
            .columns(vec!["id".into()])
            .primary(true)
            .build();
        catalog.create_index_with("t1", pk.clone()).unwrap();
        let err = catalog
            .create_index_with("t1", IndexSpec { name: "PK2".into(), ..pk })
            .unwrap_err();
        assert!(format!("{err}").contains("already has a primary key"));
    }
}
