//! Text rendering of result batches, EXPLAIN rows and rowid sets.

use crate::{RecordBatch, RowId};
use tabled::{Table, Tabled, builder::Builder, settings::Style};
use types::Value;

/// Border style of rendered tables.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TableStyleKind {
    #[default]
    Modern,
    Ascii,
    Plain,
}

fn styled(mut table: Table, style: TableStyleKind) -> String {
    match style {
        TableStyleKind::Modern => table.with(Style::modern()),
        TableStyleKind::Ascii => table.with(Style::ascii()),
        TableStyleKind::Plain => table.with(Style::empty()),
    };
    table.to_string()
}

/// Render `batch` with one header per column.
///
/// When every row carries its rowid a leading `rowid` column shows it, so
/// output of different access paths can be compared row for row.
pub fn render_record_batch(batch: &RecordBatch, style: TableStyleKind) -> String {
    if batch.columns.is_empty() && batch.rows.is_empty() {
        return "<empty>".into();
    }
    let with_rid = !batch.rows.is_empty() && batch.rows.iter().all(|row| row.rid().is_some());

    let mut builder = Builder::default();
    let header = with_rid.then(|| "rowid".to_string());
    builder.push_record(header.into_iter().chain(batch.columns.iter().cloned()));
    for row in &batch.rows {
        let rid = row.rid().filter(|_| with_rid).map(|rid| rid.0.to_string());
        builder.push_record(rid.into_iter().chain(row.values.iter().map(format_value)));
    }
    styled(builder.build(), style)
}

/// Render rows of any [`Tabled`] type, such as EXPLAIN output.
pub fn render_structured_rows<T>(rows: &[T], style: TableStyleKind) -> String
where
    T: Tabled + Clone,
{
    if rows.is_empty() {
        return "<empty>".into();
    }
    styled(Table::new(rows.to_vec()), style)
}

pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".into(),
        Value::Int(v) => v.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Text(text) => format!("'{text}'"),
    }
}

/// Rowids as a set literal, e.g. `{1, 5, 9}`.
pub fn format_row_ids(rids: &[RowId]) -> String {
    let inner: Vec<String> = rids.iter().map(|rid| rid.0.to_string()).collect();
    format!("{{{}}}", inner.join(", "))
}
