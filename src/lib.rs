//! Transactional, audited query gateway over libsql.
//!
//! Every request handler runs through a [`Gateway`]: it gets either a plain
//! connection ([`Gateway::run_plain`]) or a transaction ([`Gateway::run_in_transaction`]),
//! issues statements through the [`Executor`] trait, and receives a
//! [`ResponseEnvelope`] back. Non read-only statements are recorded in the
//! `query_logs` audit table on a separate connection, so the trail survives rollbacks.
//!
//! ```rust,no_run
//! use sql_gateway::prelude::*;
//!
//! # async fn demo() -> Result<(), SqlGatewayError> {
//! let config = DbConfig::builder().local("school.db").finish();
//! let gateway = Gateway::connect(&config, Some(Profile::Local)).await?;
//!
//! let res = gateway
//!     .run_in_transaction(|tx: TxHandle| async move {
//!         let found = tx
//!             .select("SELECT id FROM books WHERE id = ?1", &[RowValues::Int(3)])
//!             .await?;
//!         if found.is_empty() {
//!             return Err(SqlGatewayError::rejected("Book not found"));
//!         }
//!         tx.execute("DELETE FROM books WHERE id = ?1", &[RowValues::Int(3)])
//!             .await?;
//!         Ok::<_, SqlGatewayError>("Book deleted successfully")
//!     })
//!     .await;
//! assert!(res.message().is_some() || res.is_error());
//! # Ok(()) }
//! ```

pub mod audit;
pub mod config;
mod deadline;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod factory;
pub mod gateway;
pub mod libsql;
pub mod prelude;
pub mod results;
pub mod statement;
pub mod transaction;
pub mod types;

pub use audit::{AuditCounts, AuditEntry, AuditLogger};
pub use config::{DbConfig, DbConfigBuilder, ExecOptions, LocalOptions, RemoteOptions, Target};
pub use envelope::{IntoOutcome, Outcome, ResponseEnvelope};
pub use error::SqlGatewayError;
pub use executor::{Conn, Executor};
pub use factory::{ConnectionCounts, ConnectionFactory, Lease};
pub use gateway::{Gateway, Handler};
pub use results::{CustomDbRow, QueryResult, ResultSet};
pub use statement::StatementKind;
pub use transaction::{QueryRecord, TransactionCoordinator, TxHandle, TxState};
pub use types::{Profile, RowValues};
