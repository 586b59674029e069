use deadpool_libsql::libsql::Connection;

use super::params::Params;
use super::query::build_result_set;
use crate::error::SqlGatewayError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Execute a batch of SQL statements (no parameters, no result rows)
pub async fn execute_batch(conn: &Connection, query: &str) -> Result<(), SqlGatewayError> {
    conn.execute_batch(query)
        .await
        .map_err(|e| SqlGatewayError::ExecutionError(format!("Failed to execute batch: {e}")))?;
    Ok(())
}

/// Execute a statement that returns rows
pub async fn execute_select(
    conn: &Connection,
    query: &str,
    params: &[RowValues],
) -> Result<ResultSet, SqlGatewayError> {
    let rows = conn
        .query(query, Params::convert(params).into_vec())
        .await
        .map_err(|e| SqlGatewayError::ExecutionError(format!("Failed to execute query: {e}")))?;
    build_result_set(rows).await
}

/// Execute a DML statement, returning the number of changed rows
pub async fn execute_dml(
    conn: &Connection,
    query: &str,
    params: &[RowValues],
) -> Result<u64, SqlGatewayError> {
    conn.execute(query, Params::convert(params).into_vec())
        .await
        .map_err(|e| SqlGatewayError::ExecutionError(format!("Failed to execute DML: {e}")))
}
