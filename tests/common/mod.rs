#![allow(dead_code)]

use std::time::Duration;

use sql_gateway::prelude::*;
use tempfile::TempDir;
use tokio::runtime::Runtime;

pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS books (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL UNIQUE,
        author TEXT,
        price REAL
    );
    CREATE TABLE IF NOT EXISTS payments (
        id INTEGER PRIMARY KEY,
        book_id INTEGER NOT NULL,
        amount REAL NOT NULL
    );
";

pub struct TestDb {
    // keeps the database file alive for the test
    _dir: TempDir,
    pub path: String,
    pub gateway: Gateway,
}

/// Multi-threaded runtime with enough workers that a local call blocked on the
/// database lock never starves the task holding it.
pub fn runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn local_config(path: &str) -> DbConfig {
    DbConfig::builder()
        .local(path)
        .pool_size(4)
        .busy_timeout(Duration::from_secs(10))
        .finish()
}

/// Fresh local database with the test schema applied and the audit table in place.
pub async fn setup() -> Result<TestDb, Box<dyn std::error::Error>> {
    setup_with_pool(4).await
}

/// [`setup`] with a pool of `pool_size` connections; a size of one makes every
/// operation reuse the same connection.
pub async fn setup_with_pool(pool_size: usize) -> Result<TestDb, Box<dyn std::error::Error>> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("school.db").to_string_lossy().into_owned();
    let mut config = local_config(&path);
    config.pool_size = pool_size;
    let gateway = Gateway::connect(&config, Some(Profile::Local)).await?;
    let res = gateway
        .run_plain(|conn: Conn| async move {
            conn.execute_batch(SCHEMA).await?;
            Ok::<_, SqlGatewayError>("schema ready")
        })
        .await;
    assert_eq!(res.message(), Some("schema ready"), "{res:?}");
    gateway.flush_audit().await;
    Ok(TestDb {
        _dir: dir,
        path,
        gateway,
    })
}

/// Titles currently stored, read through a fresh plain connection.
pub async fn titles(gateway: &Gateway) -> Vec<String> {
    let res = gateway
        .run_plain(|conn: Conn| async move {
            let rows = conn.select("SELECT title FROM books ORDER BY title", &[]).await?;
            Ok::<_, SqlGatewayError>(
                rows.results
                    .iter()
                    .filter_map(|row| row.get("title").and_then(|v| v.as_text()).map(String::from))
                    .collect::<Vec<_>>(),
            )
        })
        .await;
    res.data().cloned().unwrap_or_default()
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AuditRow {
    pub id: String,
    pub query: String,
    pub args: String,
    pub error: i64,
    pub date: i64,
}

/// Every audit row, oldest first, after waiting for pending audit writes.
pub async fn audit_rows(gateway: &Gateway) -> Vec<AuditRow> {
    gateway.flush_audit().await;
    let res = gateway
        .run_plain(|conn: Conn| async move {
            conn.select_as::<AuditRow>(
                "SELECT id, query, args, error, date FROM query_logs ORDER BY date, rowid",
                &[],
            )
            .await
        })
        .await;
    match res {
        ResponseEnvelope::Data { payload } => payload,
        other => panic!("reading audit rows failed: {other:?}"),
    }
}
