use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;

use crate::audit::AuditLogger;
use crate::config::{DbConfig, ExecOptions};
use crate::deadline::OpGuard;
use crate::envelope::{IntoOutcome, ResponseEnvelope};
use crate::error::SqlGatewayError;
use crate::executor::Conn;
use crate::factory::{ConnectionCounts, ConnectionFactory};
use crate::transaction::{TransactionCoordinator, TxHandle};
use crate::types::Profile;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;
type PlainFn<'a, R, E> = Box<dyn FnOnce(Conn) -> BoxFuture<'a, Result<R, E>> + 'a>;
type TxFn<'a, R, E> = Box<dyn FnOnce(TxHandle) -> BoxFuture<'a, Result<R, E>> + 'a>;

/// A handler whose execution mode is chosen at runtime.
pub enum Handler<'a, R, E> {
    Plain(PlainFn<'a, R, E>),
    Transactional(TxFn<'a, R, E>),
}

impl<'a, R, E> Handler<'a, R, E> {
    pub fn plain<F, Fut>(handler: F) -> Self
    where
        F: FnOnce(Conn) -> Fut + 'a,
        Fut: Future<Output = Result<R, E>> + 'a,
    {
        Handler::Plain(Box::new(move |conn| Box::pin(handler(conn))))
    }

    pub fn transactional<F, Fut>(handler: F) -> Self
    where
        F: FnOnce(TxHandle) -> Fut + 'a,
        Fut: Future<Output = Result<R, E>> + 'a,
    {
        Handler::Transactional(Box::new(move |tx| Box::pin(handler(tx))))
    }
}

/// Entry point used by request handlers.
///
/// Every call is one logical operation: it leases one connection, runs the handler
/// exactly once and answers with a [`ResponseEnvelope`].
#[derive(Clone, Debug)]
pub struct Gateway {
    factory: ConnectionFactory,
    audit: AuditLogger,
    coordinator: TransactionCoordinator,
    exec: ExecOptions,
}

impl Gateway {
    /// Connect to the store selected by `profile` (or by `config`) and start the
    /// audit worker on its own connection.
    ///
    /// # Errors
    /// Configuration errors and connection failures surface here, never from the
    /// `run_*` methods.
    pub async fn connect(
        config: &DbConfig,
        profile: Option<Profile>,
    ) -> Result<Self, SqlGatewayError> {
        let factory = ConnectionFactory::connect(config, profile).await?;
        let audit = if config.audit_enabled {
            let audit_factory =
                ConnectionFactory::for_target(factory.target().clone(), 1, factory.busy_timeout())
                    .await?;
            AuditLogger::start(audit_factory)
        } else {
            AuditLogger::disabled()
        };
        tracing::info!(
            profile = %factory.profile(),
            audit = audit.is_enabled(),
            "sql gateway connected"
        );
        Ok(Self {
            coordinator: TransactionCoordinator::new(factory.clone(), audit.clone()),
            factory,
            audit,
            exec: config.exec.clone(),
        })
    }

    /// [`Gateway::connect`] with configuration read from the environment.
    ///
    /// # Errors
    /// See [`DbConfig::from_env`] and [`Gateway::connect`].
    pub async fn from_env() -> Result<Self, SqlGatewayError> {
        let config = DbConfig::from_env()?;
        Self::connect(&config, None).await
    }

    #[must_use]
    pub fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }

    #[must_use]
    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    #[must_use]
    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub fn connection_stats(&self) -> ConnectionCounts {
        self.factory.stats()
    }

    /// Wait for every audit write submitted so far.
    pub async fn flush_audit(&self) {
        self.audit.flush().await;
    }

    /// Run `handler` on a plain connection with the configured deadline.
    pub async fn run_plain<F, Fut, R, E>(&self, handler: F) -> ResponseEnvelope<R::Payload>
    where
        F: FnOnce(Conn) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: IntoOutcome,
        E: From<SqlGatewayError> + Display,
    {
        self.run_plain_with(&self.exec, handler).await
    }

    /// Run `handler` on a plain connection: no transaction, no query history.
    ///
    /// Statements commit individually, so writes made before a failure stay.
    pub async fn run_plain_with<F, Fut, R, E>(
        &self,
        options: &ExecOptions,
        handler: F,
    ) -> ResponseEnvelope<R::Payload>
    where
        F: FnOnce(Conn) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: IntoOutcome,
        E: From<SqlGatewayError> + Display,
    {
        let guard = OpGuard::start(options);
        let lease = match self.factory.open().await {
            Ok(lease) => lease,
            Err(e) => return envelope::<R, E>(Err(E::from(e))),
        };
        let conn = Conn::new(lease, self.audit.clone(), guard.clone());
        let result = guard.run(handler(conn.clone())).await;
        conn.close().await;
        envelope(result)
    }

    /// Run `handler` inside one transaction with the configured deadline.
    pub async fn run_in_transaction<F, Fut, R, E>(&self, handler: F) -> ResponseEnvelope<R::Payload>
    where
        F: FnOnce(TxHandle) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: IntoOutcome,
        E: From<SqlGatewayError> + Display,
    {
        self.run_in_transaction_with(&self.exec, handler).await
    }

    /// Run `handler` inside one transaction; see [`TransactionCoordinator::run`].
    pub async fn run_in_transaction_with<F, Fut, R, E>(
        &self,
        options: &ExecOptions,
        handler: F,
    ) -> ResponseEnvelope<R::Payload>
    where
        F: FnOnce(TxHandle) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: IntoOutcome,
        E: From<SqlGatewayError> + Display,
    {
        envelope(self.coordinator.run(options, handler).await)
    }

    /// Run a handler whose mode was picked at runtime.
    pub async fn run<R, E>(&self, handler: Handler<'_, R, E>) -> ResponseEnvelope<R::Payload>
    where
        R: IntoOutcome,
        E: From<SqlGatewayError> + Display,
    {
        match handler {
            Handler::Plain(f) => self.run_plain(f).await,
            Handler::Transactional(f) => self.run_in_transaction(f).await,
        }
    }
}

fn envelope<R, E>(result: Result<R, E>) -> ResponseEnvelope<R::Payload>
where
    R: IntoOutcome,
    E: Display,
{
    match result {
        Ok(value) => ResponseEnvelope::from_outcome(value.into_outcome()),
        Err(e) => {
            tracing::debug!(error = %e, "operation failed");
            ResponseEnvelope::Error {
                message: e.to_string(),
            }
        }
    }
}
