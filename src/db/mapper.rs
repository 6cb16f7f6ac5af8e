//! Turns the engine's columnar results into keyed records and typed rows.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;

use super::engine::QueryResult;
use super::error::DbError;
use super::value::Value;

/// One result row keyed by column name, in the order the columns were declared.
pub type Record = IndexMap<String, Value>;

/// Build one [`Record`] per row.
///
/// Values are taken positionally: a short row fills the missing columns with
/// [`Value::Null`] and surplus values are ignored. When a column name repeats,
/// the later value replaces the earlier one in the earlier slot.
pub fn map_rows(columns: &[String], rows: &[Vec<Value>]) -> Vec<Record> {
    rows.iter()
        .map(|row| {
            let mut record = Record::with_capacity(columns.len());
            for (idx, column) in columns.iter().enumerate() {
                let value = row.get(idx).cloned().unwrap_or(Value::Null);
                record.insert(column.clone(), value);
            }
            record
        })
        .collect()
}

/// Map every row of `result` and decode it into `T`.
pub fn map_results<T: DeserializeOwned>(result: &QueryResult) -> Result<Vec<T>, DbError> {
    map_rows(&result.columns, &result.rows)
        .into_iter()
        .map(decode::<T>)
        .collect()
}

/// Decode a single record into `T` through its JSON object form.
pub fn decode<T: DeserializeOwned>(record: Record) -> Result<T, DbError> {
    let object = serde_json::to_value(record)?;
    Ok(serde_json::from_value(object)?)
}
