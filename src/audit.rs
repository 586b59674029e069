//! Best-effort audit trail of every non read-only statement.
//!
//! Entries go to the `query_logs` table through a dedicated worker that owns its own
//! connection, so a rollback of the caller's transaction never removes them. Commands
//! are applied in submission order; failures are logged and counted, never returned.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::sync::{mpsc, oneshot};

use crate::error::SqlGatewayError;
use crate::factory::{ConnectionFactory, Lease};
use crate::libsql::{execute_batch, execute_dml};
use crate::types::RowValues;

/// Maximum number of characters kept from a statement or its serialized arguments.
pub const AUDIT_FIELD_LIMIT: usize = 400;
const ELLIPSIS: &str = "...";
const ENTRY_ID_LEN: usize = 20;

/// Commands the worker may fall behind by before new ones are dropped and counted.
pub const AUDIT_QUEUE_CAPACITY: usize = 1024;

pub const AUDIT_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS query_logs (
    id TEXT PRIMARY KEY,
    query TEXT NOT NULL,
    args TEXT NOT NULL,
    error INTEGER NOT NULL DEFAULT 0,
    date INTEGER NOT NULL
)";

const INSERT_ENTRY: &str =
    "INSERT INTO query_logs (id, query, args, error, date) VALUES (?1, ?2, ?3, ?4, ?5)";

/// One row of the audit table.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub id: String,
    /// Statement text, truncated.
    pub statement: String,
    /// JSON-serialized arguments, truncated.
    pub arguments: String,
    pub errored: bool,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl AuditEntry {
    #[must_use]
    pub fn new(statement: &str, args: &[RowValues], errored: bool) -> Self {
        let arguments = serde_json::to_string(args).unwrap_or_else(|e| format!("<{e}>"));
        Self {
            id: new_entry_id(),
            statement: truncate(statement),
            arguments: truncate(&arguments),
            errored,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Random 20-character alphanumeric identifier.
#[must_use]
pub fn new_entry_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ENTRY_ID_LEN)
        .map(char::from)
        .collect()
}

/// Keep the first [`AUDIT_FIELD_LIMIT`] characters, marking cut text with `...`.
#[must_use]
pub fn truncate(text: &str) -> String {
    match text.char_indices().nth(AUDIT_FIELD_LIMIT) {
        Some((cut, _)) => format!("{}{ELLIPSIS}", &text[..cut]),
        None => text.to_owned(),
    }
}

#[derive(Debug, Default)]
struct AuditStats {
    written: AtomicU64,
    corrected: AtomicU64,
    failed: AtomicU64,
}

/// Counters exposing how the audit trail is doing; `failed` counts swallowed errors
/// and commands dropped because the queue was full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuditCounts {
    pub written: u64,
    pub corrected: u64,
    pub failed: u64,
}

enum AuditCommand {
    Log(AuditEntry),
    MarkErrored(Vec<String>),
    Flush(oneshot::Sender<()>),
}

/// Handle to the audit worker. Cheap to clone.
#[derive(Clone, Debug)]
pub struct AuditLogger {
    sender: Option<mpsc::Sender<AuditCommand>>,
    stats: Arc<AuditStats>,
}

impl AuditLogger {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// `factory` should be dedicated to auditing; the worker keeps one of its
    /// connections for as long as it can.
    #[must_use]
    pub fn start(factory: ConnectionFactory) -> Self {
        let (sender, receiver) = mpsc::channel(AUDIT_QUEUE_CAPACITY);
        let stats = Arc::new(AuditStats::default());
        tokio::spawn(run_audit_worker(factory, receiver, Arc::clone(&stats)));
        Self {
            sender: Some(sender),
            stats,
        }
    }

    /// A logger that drops everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            sender: None,
            stats: Arc::new(AuditStats::default()),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    pub fn log(&self, entry: AuditEntry) {
        self.send(AuditCommand::Log(entry));
    }

    pub fn mark_errored(&self, ids: Vec<String>) {
        if !ids.is_empty() {
            self.send(AuditCommand::MarkErrored(ids));
        }
    }

    /// Wait until every command submitted before this call has been applied.
    ///
    /// Unlike `log`, this waits for queue space instead of dropping.
    pub async fn flush(&self) {
        let Some(sender) = &self.sender else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if sender.send(AuditCommand::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    #[must_use]
    pub fn stats(&self) -> AuditCounts {
        AuditCounts {
            written: self.stats.written.load(Ordering::SeqCst),
            corrected: self.stats.corrected.load(Ordering::SeqCst),
            failed: self.stats.failed.load(Ordering::SeqCst),
        }
    }

    fn send(&self, command: AuditCommand) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(capacity = AUDIT_QUEUE_CAPACITY, "audit queue full; command dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                tracing::warn!("audit worker stopped; command dropped");
            }
        }
    }
}

async fn run_audit_worker(
    factory: ConnectionFactory,
    mut receiver: mpsc::Receiver<AuditCommand>,
    stats: Arc<AuditStats>,
) {
    let mut writer = AuditWriter {
        factory,
        lease: None,
    };

    while let Some(command) = receiver.recv().await {
        match command {
            AuditCommand::Log(entry) => match writer.write(&entry).await {
                Ok(()) => {
                    stats.written.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(id = %entry.id, error = %e, "failed to write audit entry");
                }
            },
            AuditCommand::MarkErrored(ids) => match writer.mark_errored(&ids).await {
                Ok(changed) => {
                    stats.corrected.fetch_add(changed, Ordering::SeqCst);
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(count = ids.len(), error = %e, "failed to mark audit entries errored");
                }
            },
            AuditCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("audit worker stopped");
}

struct AuditWriter {
    factory: ConnectionFactory,
    lease: Option<Lease>,
}

impl AuditWriter {
    /// Reuse the held connection, reconnecting (and re-ensuring the table) after a failure.
    async fn connection(&mut self) -> Result<&Lease, SqlGatewayError> {
        if self.lease.is_none() {
            let lease = self.factory.open().await?;
            execute_batch(lease.connection()?, AUDIT_TABLE_DDL).await?;
            self.lease = Some(lease);
        }
        self.lease
            .as_ref()
            .ok_or_else(|| SqlGatewayError::ConnectionError("audit connection missing".into()))
    }

    async fn write(&mut self, entry: &AuditEntry) -> Result<(), SqlGatewayError> {
        let params = [
            RowValues::Text(entry.id.clone()),
            RowValues::Text(entry.statement.clone()),
            RowValues::Text(entry.arguments.clone()),
            RowValues::Bool(entry.errored),
            RowValues::Int(entry.timestamp),
        ];
        let result = {
            let lease = self.connection().await?;
            execute_dml(lease.connection()?, INSERT_ENTRY, &params).await
        };
        self.reset_on_error(result).map(|_| ())
    }

    async fn mark_errored(&mut self, ids: &[String]) -> Result<u64, SqlGatewayError> {
        let placeholders = (1..=ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE query_logs SET error = 1 WHERE id IN ({placeholders})");
        let params: Vec<RowValues> = ids.iter().cloned().map(RowValues::Text).collect();
        let result = {
            let lease = self.connection().await?;
            execute_dml(lease.connection()?, &sql, &params).await
        };
        self.reset_on_error(result)
    }

    fn reset_on_error<T>(
        &mut self,
        result: Result<T, SqlGatewayError>,
    ) -> Result<T, SqlGatewayError> {
        if result.is_err() {
            self.lease = None;
        }
        result
    }
}
