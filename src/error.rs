use thiserror::Error;

use deadpool_libsql::libsql;

#[derive(Debug, Error)]
pub enum SqlGatewayError {
    #[error(transparent)]
    LibsqlError(#[from] libsql::Error),

    #[error("Connection pool error: {0}")]
    PoolError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Row decoding error: {0}")]
    DecodeError(String),

    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(std::time::Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Transaction aborted after a failed statement")]
    TransactionAborted,

    #[error("Transaction already finished")]
    TransactionFinished,

    /// Business-rule failure raised by a handler body, e.g. "Book not found".
    #[error("{0}")]
    Rejected(String),

    #[error("Other database error: {0}")]
    Other(String),
}

impl SqlGatewayError {
    /// Shorthand for handler bodies rejecting a request.
    pub fn rejected(message: impl Into<String>) -> Self {
        SqlGatewayError::Rejected(message.into())
    }

    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, SqlGatewayError::ConfigError(_))
    }
}

impl From<serde_json::Error> for SqlGatewayError {
    fn from(err: serde_json::Error) -> Self {
        SqlGatewayError::DecodeError(err.to_string())
    }
}
