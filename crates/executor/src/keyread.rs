//! Rows rebuilt from index entries for index-only reads.

use catalog::TableMeta;
use common::{ColumnId, DbError, DbResult, Row};
use storage::IndexEntry;
use types::Value;

/// Where the values of one index entry land in a table row.
#[derive(Clone, Debug)]
pub(crate) struct KeyLayout {
    width: usize,
    key_columns: Vec<ColumnId>,
    pk_columns: Vec<ColumnId>,
}

impl KeyLayout {
    pub(crate) fn new(table: &TableMeta, keynr: usize) -> DbResult<Self> {
        let index = table.indexes.get(keynr).ok_or_else(|| {
            DbError::Executor(format!("table '{}' has no index number {keynr}", table.name))
        })?;
        let pk_columns = table
            .primary_key()
            .map(|pk| table.indexes[pk].columns.clone())
            .unwrap_or_default();
        Ok(Self {
            width: table.schema.columns.len(),
            key_columns: index.columns.clone(),
            pk_columns,
        })
    }

    pub(crate) fn width(&self) -> usize {
        self.width
    }

    /// Row holding the entry's key values (and clustered key, when the
    /// entry carries one); every other column is NULL.
    pub(crate) fn row(&self, entry: &IndexEntry) -> Row {
        let mut values = vec![Value::Null; self.width];
        self.fill(entry, &mut values);
        Row::new(values).with_rid(entry.rowid)
    }

    pub(crate) fn fill(&self, entry: &IndexEntry, values: &mut [Value]) {
        let pk = entry.pk.as_deref().unwrap_or_default();
        let pairs = self
            .key_columns
            .iter()
            .zip(&entry.key)
            .chain(self.pk_columns.iter().zip(pk));
        for (column, value) in pairs {
            if let Some(slot) = values.get_mut(usize::from(*column)) {
                *slot = value.clone();
            }
        }
    }
}
