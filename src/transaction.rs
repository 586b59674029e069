use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Mutex;

use crate::audit::AuditLogger;
use crate::config::ExecOptions;
use crate::deadline::OpGuard;
use crate::error::SqlGatewayError;
use crate::executor::{Executor, execute_batch_on, execute_on};
use crate::factory::{ConnectionFactory, Lease};
use crate::libsql::execute_batch;
use crate::results::QueryResult;
use crate::types::RowValues;

/// Lifecycle of a transaction.
///
/// `Aborted` is an open transaction in which a statement failed; it can only roll back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Open,
    Aborted,
    Committed,
    RolledBack,
}

impl TxState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TxState::Committed | TxState::RolledBack)
    }
}

/// A mutating statement issued inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecord {
    /// Id of the audit entry written for the statement.
    pub id: String,
    pub statement: String,
    pub arguments: Vec<RowValues>,
}

/// Transaction-scoped executor handed to handlers run with
/// [`Gateway::run_in_transaction`](crate::gateway::Gateway::run_in_transaction).
///
/// Statements run strictly in the order they are awaited. Clones share the same
/// transaction; once it is committed or rolled back every clone refuses new work.
/// If the last clone is dropped while the transaction is still open (the operation's
/// future was dropped), it is rolled back on a spawned task before the connection
/// goes back to the pool.
#[derive(Clone)]
pub struct TxHandle {
    inner: Arc<TxInner>,
}

struct TxInner {
    slot: Mutex<TxSlot>,
    audit: AuditLogger,
    guard: OpGuard,
}

struct TxSlot {
    lease: Option<Lease>,
    state: TxState,
    history: Vec<QueryRecord>,
}

impl TxSlot {
    fn usable(&self) -> Result<&Lease, SqlGatewayError> {
        match self.state {
            TxState::Open => self.lease.as_ref().ok_or(SqlGatewayError::TransactionFinished),
            TxState::Aborted => Err(SqlGatewayError::TransactionAborted),
            TxState::Committed | TxState::RolledBack => Err(SqlGatewayError::TransactionFinished),
        }
    }

    fn history_ids(&self) -> Vec<String> {
        self.history.iter().map(|r| r.id.clone()).collect()
    }
}

impl Drop for TxInner {
    fn drop(&mut self) {
        let slot = self.slot.get_mut();
        if slot.state.is_terminal() {
            return;
        }
        let Some(lease) = slot.lease.take() else {
            return;
        };
        slot.state = TxState::RolledBack;
        let ids = slot.history_ids();
        let audit = self.audit.clone();

        let Ok(handle) = Handle::try_current() else {
            tracing::error!("transaction dropped outside a runtime; discarding connection");
            audit.mark_errored(ids);
            lease.discard();
            return;
        };
        handle.spawn(async move {
            let rolled_back = match lease.connection() {
                Ok(conn) => execute_batch(conn, "ROLLBACK").await,
                Err(e) => Err(e),
            };
            tracing::warn!(statements = ids.len(), "dropped transaction rolled back");
            audit.mark_errored(ids);
            if let Err(e) = rolled_back {
                tracing::error!(error = %e, "rollback of dropped transaction failed; discarding connection");
                lease.discard();
            }
        });
    }
}

impl std::fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxHandle").finish_non_exhaustive()
    }
}

impl TxHandle {
    async fn begin(
        lease: Lease,
        audit: AuditLogger,
        guard: OpGuard,
    ) -> Result<Self, SqlGatewayError> {
        // Take the write lock up front: a deferred transaction that reads before
        // writing can fail outright if another writer committed in between.
        guard.run(execute_batch(lease.connection()?, "BEGIN IMMEDIATE")).await?;
        Ok(Self {
            inner: Arc::new(TxInner {
                slot: Mutex::new(TxSlot {
                    lease: Some(lease),
                    state: TxState::Open,
                    history: Vec::new(),
                }),
                audit,
                guard,
            }),
        })
    }

    pub async fn state(&self) -> TxState {
        self.inner.slot.lock().await.state
    }

    /// Mutating statements issued so far, in order.
    pub async fn history(&self) -> Vec<QueryRecord> {
        self.inner.slot.lock().await.history.clone()
    }

    async fn commit(&self) -> Result<(), SqlGatewayError> {
        let mut slot = self.inner.slot.lock().await;
        let lease = slot.usable()?;
        self.inner
            .guard
            .run(execute_batch(lease.connection()?, "COMMIT"))
            .await?;
        slot.state = TxState::Committed;
        tracing::debug!(statements = slot.history.len(), "transaction committed");
        Ok(())
    }

    /// Roll back (once), then mark every recorded statement errored.
    ///
    /// Never fails: a rollback error is logged and the connection is discarded
    /// instead of being returned to the pool.
    async fn abandon(&self, cause: &str) {
        let mut slot = self.inner.slot.lock().await;
        if slot.state.is_terminal() {
            return;
        }
        let rolled_back = match slot.lease.as_ref() {
            Some(lease) => match lease.connection() {
                Ok(conn) => execute_batch(conn, "ROLLBACK").await,
                Err(e) => Err(e),
            },
            None => Err(SqlGatewayError::TransactionFinished),
        };
        if let Err(e) = rolled_back {
            tracing::error!(error = %e, cause, "rollback failed; discarding connection");
            if let Some(lease) = slot.lease.take() {
                lease.discard();
            }
        }
        slot.state = TxState::RolledBack;
        let ids = slot.history_ids();
        tracing::warn!(cause, statements = ids.len(), "transaction rolled back");
        self.inner.audit.mark_errored(ids);
    }

    /// Close the connection. Runs exactly once per transaction.
    async fn finish(&self) {
        let lease = self.inner.slot.lock().await.lease.take();
        drop(lease);
    }
}

impl Executor for TxHandle {
    async fn execute(
        &self,
        statement: &str,
        args: &[RowValues],
    ) -> Result<QueryResult, SqlGatewayError> {
        let mut slot = self.inner.slot.lock().await;
        let lease = slot.usable()?;
        let executed = execute_on(
            lease.connection()?,
            &self.inner.audit,
            &self.inner.guard,
            statement,
            args,
        )
        .await;
        if let Some(id) = executed.audit_id {
            slot.history.push(QueryRecord {
                id,
                statement: statement.to_owned(),
                arguments: args.to_vec(),
            });
        }
        if executed.result.is_err() {
            slot.state = TxState::Aborted;
            self.inner.audit.mark_errored(slot.history_ids());
        }
        executed.result
    }

    async fn execute_batch(&self, script: &str) -> Result<(), SqlGatewayError> {
        let mut slot = self.inner.slot.lock().await;
        let lease = slot.usable()?;
        let (result, id) = execute_batch_on(
            lease.connection()?,
            &self.inner.audit,
            &self.inner.guard,
            script,
        )
        .await;
        slot.history.push(QueryRecord {
            id,
            statement: script.to_owned(),
            arguments: Vec::new(),
        });
        if result.is_err() {
            slot.state = TxState::Aborted;
            self.inner.audit.mark_errored(slot.history_ids());
        }
        result
    }
}

/// Runs a body inside exactly one transaction on a fresh connection.
#[derive(Clone, Debug)]
pub struct TransactionCoordinator {
    factory: ConnectionFactory,
    audit: AuditLogger,
}

impl TransactionCoordinator {
    #[must_use]
    pub fn new(factory: ConnectionFactory, audit: AuditLogger) -> Self {
        Self { factory, audit }
    }

    /// Run `body` in a transaction.
    ///
    /// The body's value is returned after a successful commit. If the body fails,
    /// the deadline passes, the operation is cancelled, a statement failed, or the
    /// commit fails, the transaction is rolled back, every statement it recorded is
    /// marked errored in the audit trail, and the original error is returned. The
    /// connection is closed on every path.
    ///
    /// # Errors
    /// Whatever `body` returns, or `SqlGatewayError` (converted into `E`) for
    /// connection, begin, commit, deadline and cancellation failures.
    pub async fn run<T, E, F, Fut>(&self, options: &ExecOptions, body: F) -> Result<T, E>
    where
        F: FnOnce(TxHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<SqlGatewayError> + std::fmt::Display,
    {
        let guard = OpGuard::start(options);
        let lease = self.factory.open().await.map_err(E::from)?;
        let tx = TxHandle::begin(lease, self.audit.clone(), guard.clone())
            .await
            .map_err(E::from)?;

        let outcome = match guard.run(body(tx.clone())).await {
            Ok(value) => tx.commit().await.map(|()| value).map_err(E::from),
            Err(e) => Err(e),
        };
        if let Err(e) = &outcome {
            tx.abandon(&e.to_string()).await;
        }
        tx.finish().await;
        outcome
    }
}
