use std::sync::Arc;

use deadpool_libsql::libsql::{Row, Rows, Value};

use crate::error::SqlGatewayError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Build a result set from a libsql query execution
pub async fn build_result_set(mut rows: Rows) -> Result<ResultSet, SqlGatewayError> {
    let column_count = rows.column_count();
    let mut column_names = Vec::with_capacity(usize::try_from(column_count).map_err(|e| {
        SqlGatewayError::ExecutionError(format!("Invalid column count: {e}"))
    })?);

    for i in 0..column_count {
        match rows.column_name(i) {
            Some(name) => column_names.push(name.to_string()),
            None => column_names.push(format!("column_{i}")),
        }
    }

    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(Arc::new(column_names));

    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| SqlGatewayError::ExecutionError(format!("Failed to get next row: {e}")))?
    {
        let mut row_values = Vec::with_capacity(usize::try_from(column_count).unwrap_or(0));
        for i in 0..column_count {
            row_values.push(extract_value(&row, i)?);
        }
        result_set.add_row_values(row_values);
    }

    Ok(result_set)
}

/// Extract a `RowValues` from a libsql row at the given index
fn extract_value(row: &Row, idx: i32) -> Result<RowValues, SqlGatewayError> {
    let value = row.get_value(idx).map_err(|e| {
        SqlGatewayError::ExecutionError(format!("Failed to get value at index {idx}: {e}"))
    })?;

    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(bytes) => RowValues::Blob(bytes),
    })
}
