use deadpool_libsql::libsql::Value;

use crate::types::RowValues;

/// Container for libsql parameters
pub struct Params(pub Vec<Value>);

impl Params {
    /// Convert from a slice of `RowValues` to libsql parameters
    #[must_use]
    pub fn convert(params: &[RowValues]) -> Params {
        Params(params.iter().map(to_libsql_value).collect())
    }

    /// Get a reference to the underlying parameter array
    #[must_use]
    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    /// Convert to owned vector for use with libsql API
    #[must_use]
    pub fn into_vec(self) -> Vec<Value> {
        self.0
    }
}

fn to_libsql_value(param: &RowValues) -> Value {
    match param {
        RowValues::Int(i) => Value::Integer(*i),
        RowValues::Float(f) => Value::Real(*f),
        RowValues::Text(s) => Value::Text(s.clone()),
        RowValues::Bool(b) => Value::Integer(i64::from(*b)),
        RowValues::Timestamp(dt) => Value::Text(dt.format("%F %T%.f").to_string()),
        RowValues::Null => Value::Null,
        RowValues::JSON(jval) => Value::Text(jval.to_string()),
        RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
    }
}
