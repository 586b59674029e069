use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use deadpool_libsql::libsql::Connection;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::audit::{AuditEntry, AuditLogger};
use crate::deadline::OpGuard;
use crate::error::SqlGatewayError;
use crate::factory::Lease;
use crate::libsql::{execute_batch, execute_dml, execute_select};
use crate::results::{QueryResult, ResultSet};
use crate::statement::StatementKind;
use crate::types::RowValues;

/// Statement execution surface shared by plain connections and transactions.
///
/// Every call is one round trip. Statements that are not `SELECT`-prefixed are
/// written to the audit trail whether they succeed or fail.
pub trait Executor {
    /// Execute one parameterized statement and classify its result.
    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        statement: &str,
        args: &[RowValues],
    ) -> impl Future<Output = Result<QueryResult, SqlGatewayError>>;

    /// Execute a multi-statement script without parameters (schema setup, seeding).
    #[allow(clippy::manual_async_fn)]
    fn execute_batch(&self, script: &str) -> impl Future<Output = Result<(), SqlGatewayError>>;

    /// Execute a statement that must produce rows.
    #[allow(clippy::manual_async_fn)]
    fn select(
        &self,
        statement: &str,
        args: &[RowValues],
    ) -> impl Future<Output = Result<ResultSet, SqlGatewayError>> {
        async move { self.execute(statement, args).await?.into_rows() }
    }

    /// Execute a statement and decode its rows into `T`.
    #[allow(clippy::manual_async_fn)]
    fn select_as<T: DeserializeOwned>(
        &self,
        statement: &str,
        args: &[RowValues],
    ) -> impl Future<Output = Result<Vec<T>, SqlGatewayError>> {
        async move { self.select(statement, args).await?.decode() }
    }
}

/// Result of one statement plus the audit entry id it produced, if any.
pub(crate) struct Executed {
    pub(crate) result: Result<QueryResult, SqlGatewayError>,
    pub(crate) audit_id: Option<String>,
}

/// Issue a statement on `conn` under `guard`, then audit it.
pub(crate) async fn execute_on(
    conn: &Connection,
    audit: &AuditLogger,
    guard: &OpGuard,
    statement: &str,
    args: &[RowValues],
) -> Executed {
    let kind = StatementKind::classify(statement);
    let started = Instant::now();
    let result = guard.run(issue(conn, kind, statement, args)).await;
    tracing::debug!(
        ?kind,
        elapsed_us = started.elapsed().as_micros(),
        ok = result.is_ok(),
        "statement executed"
    );
    let audit_id = kind
        .is_audited()
        .then(|| record(audit, statement, args, result.is_err()));
    Executed { result, audit_id }
}

/// Run a script on `conn` under `guard`, auditing it as one entry.
pub(crate) async fn execute_batch_on(
    conn: &Connection,
    audit: &AuditLogger,
    guard: &OpGuard,
    script: &str,
) -> (Result<(), SqlGatewayError>, String) {
    let result = guard.run(execute_batch(conn, script)).await;
    let id = record(audit, script, &[], result.is_err());
    (result, id)
}

fn record(audit: &AuditLogger, statement: &str, args: &[RowValues], errored: bool) -> String {
    let entry = AuditEntry::new(statement, args, errored);
    let id = entry.id.clone();
    audit.log(entry);
    id
}

async fn issue(
    conn: &Connection,
    kind: StatementKind,
    statement: &str,
    args: &[RowValues],
) -> Result<QueryResult, SqlGatewayError> {
    if kind.returns_rows() {
        return execute_select(conn, statement, args)
            .await
            .map(QueryResult::Rows);
    }
    // an upsert that took the update path leaves the connection's previous rowid in place
    let previous_id = conn.last_insert_rowid();
    let changed = execute_dml(conn, statement, args).await?;
    let insert_id = conn.last_insert_rowid();
    let generated = match kind {
        StatementKind::Insert => changed > 0 && insert_id != 0,
        StatementKind::Upsert => changed > 0 && insert_id != 0 && insert_id != previous_id,
        _ => false,
    };
    if generated {
        return Ok(QueryResult::Insert { insert_id });
    }
    Ok(QueryResult::Rows(ResultSet::default()))
}

/// A plain, non-transactional connection handed to handlers run with
/// [`Gateway::run_plain`](crate::gateway::Gateway::run_plain).
///
/// Each statement commits on its own; a later failure does not undo earlier writes.
#[derive(Clone)]
pub struct Conn {
    inner: Arc<ConnInner>,
}

struct ConnInner {
    lease: Mutex<Option<Lease>>,
    audit: AuditLogger,
    guard: OpGuard,
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn").finish_non_exhaustive()
    }
}

impl Conn {
    pub(crate) fn new(lease: Lease, audit: AuditLogger, guard: OpGuard) -> Self {
        Self {
            inner: Arc::new(ConnInner {
                lease: Mutex::new(Some(lease)),
                audit,
                guard,
            }),
        }
    }

    /// Close the connection; clones retained by the handler fail afterwards.
    pub(crate) async fn close(&self) {
        drop(self.inner.lease.lock().await.take());
    }
}

impl Executor for Conn {
    async fn execute(
        &self,
        statement: &str,
        args: &[RowValues],
    ) -> Result<QueryResult, SqlGatewayError> {
        let slot = self.inner.lease.lock().await;
        let lease = slot.as_ref().ok_or_else(closed)?;
        let executed = execute_on(
            lease.connection()?,
            &self.inner.audit,
            &self.inner.guard,
            statement,
            args,
        )
        .await;
        executed.result
    }

    async fn execute_batch(&self, script: &str) -> Result<(), SqlGatewayError> {
        let slot = self.inner.lease.lock().await;
        let lease = slot.as_ref().ok_or_else(closed)?;
        let (result, _) =
            execute_batch_on(lease.connection()?, &self.inner.audit, &self.inner.guard, script)
                .await;
        result
    }
}

fn closed() -> SqlGatewayError {
    SqlGatewayError::ConnectionError("connection already closed".into())
}
