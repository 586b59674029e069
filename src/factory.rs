use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use deadpool_libsql::libsql::{Builder, Connection, Database};
use deadpool_libsql::{Manager, Object, Pool};

use crate::config::{DbConfig, Target};
use crate::error::SqlGatewayError;
use crate::types::Profile;

/// Open/close counters for the connections handed out by one factory.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    opened: AtomicU64,
    closed: AtomicU64,
}

/// Point-in-time copy of [`ConnectionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionCounts {
    pub opened: u64,
    pub closed: u64,
}

impl ConnectionCounts {
    /// Connections opened and not yet closed.
    #[must_use]
    pub fn in_use(&self) -> u64 {
        self.opened.saturating_sub(self.closed)
    }
}

impl ConnectionStats {
    #[must_use]
    pub fn snapshot(&self) -> ConnectionCounts {
        ConnectionCounts {
            opened: self.opened.load(Ordering::SeqCst),
            closed: self.closed.load(Ordering::SeqCst),
        }
    }
}

/// Produces connections to the configured backing store.
///
/// Each [`Lease`] is one logical open; dropping it is the matching close.
#[derive(Clone)]
pub struct ConnectionFactory {
    pool: Pool,
    target: Target,
    busy_timeout: Duration,
    stats: Arc<ConnectionStats>,
}

impl std::fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("profile", &self.target.profile())
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl ConnectionFactory {
    /// Build a factory for `profile`, or for the profile named by `config`.
    ///
    /// # Errors
    /// Returns `SqlGatewayError::ConfigError` when the profile cannot be resolved, and
    /// `SqlGatewayError::ConnectionError` when the store cannot be reached.
    pub async fn connect(
        config: &DbConfig,
        profile: Option<Profile>,
    ) -> Result<Self, SqlGatewayError> {
        let target = config.resolve(profile)?;
        Self::for_target(target, config.pool_size, config.busy_timeout).await
    }

    pub(crate) async fn for_target(
        target: Target,
        pool_size: usize,
        busy_timeout: Duration,
    ) -> Result<Self, SqlGatewayError> {
        let db = open_database(&target).await?;
        let manager = Manager::from_libsql_database(db);
        let pool = Pool::builder(manager)
            .max_size(pool_size.max(1))
            .build()
            .map_err(|e| {
                SqlGatewayError::ConnectionError(format!("Failed to create libsql pool: {e}"))
            })?;

        // Test the connection
        let conn = pool.get().await.map_err(|e| {
            SqlGatewayError::ConnectionError(format!("Failed to get libsql connection: {e}"))
        })?;
        if matches!(target, Target::Local(_)) {
            // WAL keeps readers unblocked while a transaction holds the write lock
            run_pragma(&conn, "PRAGMA journal_mode = WAL").await;
        }
        drop(conn);

        tracing::debug!(profile = %target.profile(), pool_size, "connection factory ready");
        Ok(Self {
            pool,
            target,
            busy_timeout,
            stats: Arc::new(ConnectionStats::default()),
        })
    }

    #[must_use]
    pub fn profile(&self) -> Profile {
        self.target.profile()
    }

    #[must_use]
    pub fn stats(&self) -> ConnectionCounts {
        self.stats.snapshot()
    }

    pub(crate) fn target(&self) -> &Target {
        &self.target
    }

    pub(crate) fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    /// Lease one connection for a logical operation.
    ///
    /// # Errors
    /// Returns `SqlGatewayError::PoolError` if no connection can be obtained.
    pub async fn open(&self) -> Result<Lease, SqlGatewayError> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| SqlGatewayError::PoolError(e.to_string()))?;
        if matches!(self.target, Target::Local(_)) {
            let pragma = format!("PRAGMA busy_timeout = {}", self.busy_timeout.as_millis());
            run_pragma(&conn, &pragma).await;
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Lease {
            conn: Some(conn),
            stats: Arc::clone(&self.stats),
        })
    }
}

/// Best-effort pragma; stepping the rows forces execution on local connections.
async fn run_pragma(conn: &Connection, pragma: &str) {
    match conn.query(pragma, ()).await {
        Ok(mut rows) => {
            let _ = rows.next().await;
        }
        Err(e) => tracing::debug!(pragma, error = %e, "pragma ignored"),
    }
}

async fn open_database(target: &Target) -> Result<Database, SqlGatewayError> {
    match target {
        Target::Local(opts) => Builder::new_local(opts.path.clone())
            .build()
            .await
            .map_err(|e| {
                SqlGatewayError::ConnectionError(format!(
                    "Failed to open local libsql database `{}`: {e}",
                    opts.path
                ))
            }),
        Target::Remote(opts) => Builder::new_remote(opts.url.clone(), opts.auth_token.clone())
            .build()
            .await
            .map_err(|e| {
                SqlGatewayError::ConnectionError(format!(
                    "Failed to create remote libsql database: {e}"
                ))
            }),
    }
}

/// One open connection, owned by exactly one logical operation.
pub struct Lease {
    conn: Option<Object>,
    stats: Arc<ConnectionStats>,
}

impl Lease {
    /// The underlying libsql connection.
    ///
    /// # Errors
    /// Returns `SqlGatewayError::ConnectionError` after the lease was discarded.
    pub fn connection(&self) -> Result<&Connection, SqlGatewayError> {
        self.conn
            .as_deref()
            .ok_or_else(|| SqlGatewayError::ConnectionError("connection discarded".into()))
    }

    /// Close the connection without returning it to the pool.
    ///
    /// Used when the connection may still hold an unfinished transaction.
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            drop(Object::take(conn));
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        // never hand a connection with an open transaction back to the pool
        if let Some(conn) = self.conn.take_if(|conn| !conn.is_autocommit()) {
            tracing::warn!("connection still inside a transaction; discarding it");
            drop(Object::take(conn));
        }
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
    }
}
