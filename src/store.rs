// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local durable store for mirrored records.
//!
//! The store is also the replication checkpoint: the watermark is
//! `MAX(id)` over what has been persisted, queried fresh every cycle.
//! There is no separate cursor file and nothing cached across restarts.
//!
//! ```text
//! fetch [1000,2000) → append in one transaction → watermark = 1999
//!                     (crash here = nothing committed, block re-fetched)
//! ```
//!
//! # Idempotent Appends
//!
//! `records.id` is the primary key and rows are written with
//! `INSERT OR IGNORE`, so re-appending an overlapping block after a crash
//! (or from a second engine instance) leaves exactly one row per id.
//!
//! # SQLite Busy Handling
//!
//! A second process sharing the database can make SQLite return
//! SQLITE_BUSY/SQLITE_LOCKED. Those are retried with bounded exponential
//! backoff; every other error is surfaced immediately.

use crate::config::StoreConfig;
use crate::error::{MirrorError, Result};
use crate::feed::BoxFuture;
use crate::record::Record;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Configuration for SQLite busy retry behavior
const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS records (
        id INTEGER PRIMARY KEY,
        created TEXT NOT NULL,
        url TEXT NOT NULL,
        status INTEGER NOT NULL,
        response BLOB NOT NULL
    )
"#;

const INSERT_RECORD: &str =
    "INSERT OR IGNORE INTO records (id, created, url, status, response) VALUES (?, ?, ?, ?, ?)";

/// What the engine needs from the local store.
pub trait LocalStore: Send + Sync + 'static {
    /// Highest persisted id, or `None` when the store is empty.
    fn current_watermark(&self) -> BoxFuture<'_, Option<i64>>;

    /// Persist `records` as one atomic unit.
    ///
    /// Ids that already exist are skipped. Returns the number of rows newly
    /// inserted. On error nothing from this batch is visible.
    fn append_batch<'a>(&'a self, records: &'a [Record]) -> BoxFuture<'a, usize>;
}

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(
    operation_name: &str,
    mut f: F,
) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts, "SQLite operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                crate::metrics::record_store_retry(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => {
                if is_sqlite_busy_error(&e) {
                    warn!(
                        operation = operation_name,
                        attempts, "SQLite busy, max retries exceeded"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// SQLite-backed record store.
pub struct SqliteStore {
    pool: SqlitePool,
    path: String,
}

impl SqliteStore {
    /// Open (or create) a store at the given path with WAL journaling.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let config = StoreConfig {
            sqlite_path: path.as_ref().to_string_lossy().to_string(),
            wal_mode: true,
        };
        Self::from_config(&config).await
    }

    /// Open (or create) a store described by `config`.
    ///
    /// `":memory:"` opens a private in-memory database on a single
    /// long-lived connection.
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        let path = config.sqlite_path.clone();
        info!(path = %path, "Initializing record store");

        let pool = if config.is_in_memory() {
            let options = SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| MirrorError::Config(format!("Invalid SQLite path: {}", e)))?;
            // Every connection would get its own empty database
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            let journal = if config.wal_mode {
                SqliteJournalMode::Wal
            } else {
                SqliteJournalMode::Delete
            };
            let options = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path))
                .map_err(|e| MirrorError::Config(format!("Invalid SQLite path: {}", e)))?
                .journal_mode(journal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);
            SqlitePoolOptions::new()
                .max_connections(2) // One writer, one reader is plenty
                .connect_with(options)
                .await?
        };

        sqlx::query(CREATE_TABLE).execute(&pool).await?;

        let store = Self { pool, path };
        if let Some(watermark) = store.watermark().await? {
            info!(watermark, "Resuming from persisted watermark");
        }
        Ok(store)
    }

    async fn watermark(&self) -> Result<Option<i64>> {
        let pool = &self.pool;
        let max_id = execute_with_retry("store_watermark", || async {
            sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(id) FROM records")
                .fetch_one(pool)
                .await
        })
        .await?;
        Ok(max_id)
    }

    async fn append(&self, records: &[Record]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let pool = &self.pool;
        let inserted = execute_with_retry("store_append", || async {
            let mut tx = pool.begin().await?;
            let mut inserted = 0usize;
            for record in records {
                let result = sqlx::query(INSERT_RECORD)
                    .bind(record.id)
                    .bind(&record.created)
                    .bind(&record.url)
                    .bind(record.status)
                    .bind(&record.payload)
                    .execute(&mut *tx)
                    .await?;
                inserted += result.rows_affected() as usize;
            }
            tx.commit().await?;
            Ok::<_, sqlx::Error>(inserted)
        })
        .await?;

        if inserted < records.len() {
            debug!(
                offered = records.len(),
                inserted,
                "Skipped records that were already stored"
            );
        }
        Ok(inserted)
    }

    /// Fetch one stored record by id, payload still compressed.
    pub async fn get(&self, id: i64) -> Result<Option<Record>> {
        let row: Option<(i64, String, String, i64, Vec<u8>)> = sqlx::query_as(
            "SELECT id, created, url, status, response FROM records WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, created, url, status, payload)| Record {
            id,
            created,
            url,
            status,
            payload,
        }))
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Get database path (for diagnostics).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Force flush WAL to main database (for clean shutdown).
    pub async fn checkpoint(&self) -> Result<()> {
        let pool = &self.pool;
        execute_with_retry("store_checkpoint", || async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(pool)
                .await
        })
        .await?;

        debug!("WAL checkpoint complete");
        Ok(())
    }

    /// Checkpoint WAL and close the connection pool.
    pub async fn close(&self) {
        if let Err(e) = self.checkpoint().await {
            warn!(error = %e, "Failed to checkpoint WAL on close");
        }
        self.pool.close().await;
        info!("Record store closed");
    }
}

impl LocalStore for SqliteStore {
    fn current_watermark(&self) -> BoxFuture<'_, Option<i64>> {
        Box::pin(self.watermark())
    }

    fn append_batch<'a>(&'a self, records: &'a [Record]) -> BoxFuture<'a, usize> {
        Box::pin(self.append(records))
    }
}

/// In-memory store with the same semantics as [`SqliteStore`].
///
/// Used for tests and dry runs. Faults can be injected to exercise the
/// engine's abort-and-resume path.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<i64, Record>>,
    fail_next_append: AtomicBool,
    fail_next_watermark: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `append_batch` fail without storing anything.
    pub fn fail_next_append(&self) {
        self.fail_next_append.store(true, Ordering::SeqCst);
    }

    /// Make the next `current_watermark` fail.
    pub fn fail_next_watermark(&self) {
        self.fail_next_watermark.store(true, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn get(&self, id: i64) -> Option<Record> {
        self.records.read().await.get(&id).cloned()
    }

    /// All stored ids in ascending order.
    pub async fn ids(&self) -> Vec<i64> {
        self.records.read().await.keys().copied().collect()
    }
}

impl LocalStore for MemoryStore {
    fn current_watermark(&self) -> BoxFuture<'_, Option<i64>> {
        Box::pin(async move {
            if self.fail_next_watermark.swap(false, Ordering::SeqCst) {
                return Err(MirrorError::StoreFailure("injected watermark failure".into()));
            }
            Ok(self.records.read().await.keys().next_back().copied())
        })
    }

    fn append_batch<'a>(&'a self, records: &'a [Record]) -> BoxFuture<'a, usize> {
        Box::pin(async move {
            if self.fail_next_append.swap(false, Ordering::SeqCst) {
                return Err(MirrorError::StoreFailure("injected append failure".into()));
            }
            let mut stored = self.records.write().await;
            let mut inserted = 0;
            for record in records {
                if !stored.contains_key(&record.id) {
                    stored.insert(record.id, record.clone());
                    inserted += 1;
                }
            }
            Ok(inserted)
        })
    }
}
