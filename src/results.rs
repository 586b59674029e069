mod result_set;
mod row;

pub use result_set::ResultSet;
pub use row::CustomDbRow;

use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;

use crate::error::SqlGatewayError;

/// Outcome of a single statement.
///
/// A statement that produced a generated row identifier is an [`QueryResult::Insert`];
/// everything else, including a read matching zero rows, is [`QueryResult::Rows`].
///
/// Serializes as `{"insertId": 7}` or `{"rows": [{"id": 1, ...}]}`.
#[derive(Debug, Clone)]
pub enum QueryResult {
    Insert { insert_id: i64 },
    Rows(ResultSet),
}

impl QueryResult {
    /// Generated identifier, if the statement was classified as an insert.
    #[must_use]
    pub fn insert_id(&self) -> Option<i64> {
        match self {
            QueryResult::Insert { insert_id } => Some(*insert_id),
            QueryResult::Rows(_) => None,
        }
    }

    #[must_use]
    pub fn rows(&self) -> Option<&ResultSet> {
        match self {
            QueryResult::Rows(rows) => Some(rows),
            QueryResult::Insert { .. } => None,
        }
    }

    /// Consume the result, returning the row set.
    ///
    /// # Errors
    /// Returns `SqlGatewayError::DecodeError` when the statement was classified as an insert.
    pub fn into_rows(self) -> Result<ResultSet, SqlGatewayError> {
        match self {
            QueryResult::Rows(rows) => Ok(rows),
            QueryResult::Insert { insert_id } => Err(SqlGatewayError::DecodeError(format!(
                "expected rows, statement produced insert id {insert_id}"
            ))),
        }
    }

    /// Decode the row set into `T`.
    ///
    /// # Errors
    /// Returns `SqlGatewayError::DecodeError` for insert results or rows that do not fit `T`.
    pub fn rows_as<T: DeserializeOwned>(&self) -> Result<Vec<T>, SqlGatewayError> {
        match self {
            QueryResult::Rows(rows) => rows.decode(),
            QueryResult::Insert { insert_id } => Err(SqlGatewayError::DecodeError(format!(
                "expected rows, statement produced insert id {insert_id}"
            ))),
        }
    }
}

impl serde::Serialize for QueryResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            QueryResult::Insert { insert_id } => map.serialize_entry("insertId", insert_id)?,
            QueryResult::Rows(rows) => map.serialize_entry("rows", rows)?,
        }
        map.end()
    }
}
