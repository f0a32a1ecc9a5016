use rusqlite::types::Value;

use crate::error::SqlPipelineError;
use crate::types::RowValues;

/// Convert a single `RowValues` into the value rusqlite binds.
#[must_use]
pub fn row_value_to_sqlite_value(value: RowValues) -> Value {
    match value {
        RowValues::Int(i) => Value::Integer(i),
        RowValues::Float(f) => Value::Real(f),
        RowValues::Text(s) => Value::Text(s),
        RowValues::Bool(b) => Value::Integer(i64::from(b)),
        // Same textual layout the column accessors parse back
        RowValues::Timestamp(dt) => Value::Text(dt.format("%F %T%.f").to_string()),
        RowValues::Date(d) => Value::Text(d.format("%F").to_string()),
        RowValues::Time(t) => Value::Text(t.format("%T%.f").to_string()),
        RowValues::Null => Value::Null,
        RowValues::JSON(jval) => Value::Text(jval.to_string()),
        RowValues::Blob(bytes) => Value::Blob(bytes),
    }
}

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
///
/// Returns `SqlPipelineError::SqliteError` if the column cannot be read.
pub fn sqlite_extract_value(row: &rusqlite::Row, idx: usize) -> Result<RowValues, SqlPipelineError> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}
