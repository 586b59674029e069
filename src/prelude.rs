//! Convenient imports for request handlers.

pub use crate::config::{DbConfig, ExecOptions};
pub use crate::envelope::{IntoOutcome, Outcome, ResponseEnvelope};
pub use crate::error::SqlGatewayError;
pub use crate::executor::{Conn, Executor};
pub use crate::gateway::{Gateway, Handler};
pub use crate::results::{CustomDbRow, QueryResult, ResultSet};
pub use crate::transaction::TxHandle;
pub use crate::types::{Profile, RowValues};

pub use tokio_util::sync::CancellationToken;
