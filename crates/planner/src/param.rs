//! Planning context shared by tree building and plan enumeration.

use catalog::{IndexKind, TableMeta};
use common::{ColumnId, ColumnSet, Config};
use storage::Cursor;
use types::SqlType;

use crate::sel_arg::SelArgArena;

/// One column of an index, as seen by range analysis.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyPart {
    pub field: ColumnId,
    pub ty: SqlType,
    /// Packed length in bytes.
    pub length: u32,
}

/// An index that range analysis may use.
///
/// Range analysis numbers usable indexes densely (`idx`); `keynr` is the
/// position of the index in the table definition.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyInfo {
    pub keynr: usize,
    pub name: String,
    pub parts: Vec<KeyPart>,
    pub unique: bool,
    pub primary: bool,
    pub kind: IndexKind,
}

impl KeyInfo {
    /// Packed length of the first `parts` key parts.
    pub fn prefix_length(&self, parts: usize) -> u32 {
        self.parts.iter().take(parts).map(|p| p.length).sum()
    }

    pub fn key_length(&self) -> u32 {
        self.prefix_length(self.parts.len())
    }

    pub fn columns(&self) -> ColumnSet {
        self.parts.iter().map(|p| p.field).collect()
    }
}

/// Everything range analysis needs, passed explicitly as `&mut`.
///
/// Owns the interval arena; dropping the context frees every interval node
/// at once.
pub struct RangeParam<'a> {
    pub table: &'a TableMeta,
    pub cursor: &'a dyn Cursor,
    pub config: &'a Config,
    pub arena: SelArgArena,
    pub keys: Vec<KeyInfo>,
    /// Columns the query reads; a scan covering all of them is index-only.
    pub needed_fields: ColumnSet,
    /// Row estimate of the last range analysis per usable index.
    pub quick_rows: Vec<Option<u64>>,
    /// Table rows, never zero.
    pub records: u64,
}

impl<'a> RangeParam<'a> {
    /// Set up a context over the indexes in `keys_to_use` (table key numbers).
    pub fn new(
        table: &'a TableMeta,
        cursor: &'a dyn Cursor,
        config: &'a Config,
        keys_to_use: &[usize],
        needed_fields: ColumnSet,
    ) -> Self {
        let mut keynrs: Vec<usize> = keys_to_use
            .iter()
            .copied()
            .filter(|k| *k < table.indexes.len())
            .collect();
        keynrs.sort_unstable();
        keynrs.dedup();

        let keys: Vec<KeyInfo> = keynrs
            .into_iter()
            .map(|keynr| {
                let index = &table.indexes[keynr];
                let parts = index
                    .columns
                    .iter()
                    .map(|col| {
                        let ty = table
                            .schema
                            .column_type(*col)
                            .cloned()
                            .unwrap_or(SqlType::Int);
                        KeyPart {
                            field: *col,
                            length: ty.pack_length(),
                            ty,
                        }
                    })
                    .collect();
                KeyInfo {
                    keynr,
                    name: index.name.clone(),
                    parts,
                    unique: index.unique,
                    primary: index.primary,
                    kind: index.kind,
                }
            })
            .collect();

        let n = keys.len();
        Self {
            table,
            cursor,
            config,
            arena: SelArgArena::new(config.sel_arg_arena_limit),
            keys,
            needed_fields,
            quick_rows: vec![None; n],
            records: cursor.stats().records.max(1),
        }
    }

    pub fn real_keynr(&self, idx: usize) -> usize {
        self.keys[idx].keynr
    }

    /// `(idx, part)` of every usable index part on `field`.
    pub fn key_parts_on(&self, field: ColumnId) -> Vec<(usize, u16)> {
        let mut out = Vec::new();
        for (idx, key) in self.keys.iter().enumerate() {
            for (part, kp) in key.parts.iter().enumerate() {
                if kp.field == field {
                    out.push((idx, part as u16));
                }
            }
        }
        out
    }

    /// True when `keynr` is the primary key of a table clustered on it.
    pub fn is_clustered_pk(&self, keynr: usize) -> bool {
        self.clustered_pk() == Some(keynr)
    }

    /// Key number of the clustered primary key, if the table has one.
    pub fn clustered_pk(&self) -> Option<usize> {
        self.cursor
            .primary_key_is_clustered()
            .then(|| self.table.primary_key())
            .flatten()
    }

    /// True when index `keynr` holds every needed column.
    pub fn is_covering(&self, keynr: usize) -> bool {
        if !self.cursor.supports_keyread(keynr) {
            return false;
        }
        let mut covered = self.table.key_columns(keynr);
        if self.cursor.primary_key_is_clustered() {
            if let Some(pk) = self.table.primary_key() {
                covered.union_with(&self.table.key_columns(pk));
            }
        }
        self.needed_fields.is_subset(&covered)
    }
}
