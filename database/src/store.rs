use crate::lock::StateLock;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tm_core::error::{Result, TmError};
use tm_core::paths;

/// Handle to the single-file SQLite store under a state directory.
///
/// Opened in WAL journal mode with foreign keys on and a 5 second busy
/// timeout, matching the concurrency model: many reader processes, writers
/// serialized by SQLite itself plus the advisory state lock for compound
/// operations.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    state_dir: PathBuf,
}

impl Store {
    /// Open (or create) the store under `state_dir`.
    ///
    /// The directory itself must already exist; `tm init` creates it. The
    /// integrity check runs once at open and a failure surfaces as
    /// `CorruptStore`; nothing is repaired silently.
    pub async fn open(state_dir: &Path) -> Result<Self> {
        if !state_dir.is_dir() {
            return Err(TmError::StorageUnavailable(format!(
                "state directory {} does not exist (run 'tm init')",
                state_dir.display()
            )));
        }

        let db_path = paths::db_path(state_dir);
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| map_open_error(&db_path, e))?;

        let store = Self {
            pool,
            state_dir: state_dir.to_path_buf(),
        };
        store.integrity_check().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn db_path(&self) -> PathBuf {
        paths::db_path(&self.state_dir)
    }

    /// Acquire the cross-process advisory lock for a compound operation.
    pub fn lock(&self, timeout: Duration) -> Result<StateLock> {
        StateLock::acquire(&self.state_dir, timeout)
    }

    /// `PRAGMA quick_check`; anything but "ok" is `CorruptStore`.
    pub async fn integrity_check(&self) -> Result<()> {
        let row = sqlx::query("PRAGMA quick_check")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| TmError::Database(format!("integrity check failed to run: {e}")))?;
        let verdict: String = row.get(0);
        if verdict == "ok" {
            Ok(())
        } else {
            tracing::error!(verdict = %verdict, "store integrity check failed");
            Err(TmError::CorruptStore)
        }
    }

    /// Flush the WAL into the main database file so a plain file copy (the
    /// migration backup) captures everything committed so far.
    pub async fn checkpoint(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .map_err(|e| TmError::Database(format!("wal checkpoint failed: {e}")))?;
        Ok(())
    }

    /// Close the pool, releasing all file handles (used before restoring a
    /// backup over the live file).
    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn map_open_error(db_path: &Path, e: sqlx::Error) -> TmError {
    if let sqlx::Error::Io(io) = &e {
        if io.kind() == std::io::ErrorKind::PermissionDenied {
            return TmError::PermissionDenied(db_path.display().to_string());
        }
    }
    TmError::StorageUnavailable(format!("opening {}: {e}", db_path.display()))
}

/// Retry budget for transient BUSY/LOCKED contention.
pub const BUSY_RETRIES: u32 = 5;
/// Initial backoff; doubles per attempt up to [`BUSY_BACKOFF_CAP`].
pub const BUSY_BACKOFF_INITIAL: Duration = Duration::from_millis(50);
pub const BUSY_BACKOFF_CAP: Duration = Duration::from_secs(2);

/// Run an operation, retrying transient contention errors with exponential
/// backoff. The closure builds a fresh future per attempt; anything other
/// than `Busy` propagates immediately.
pub async fn retry_busy<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = BUSY_BACKOFF_INITIAL;
    let mut attempt = 0;
    loop {
        match op().await {
            Err(TmError::Busy) if attempt < BUSY_RETRIES => {
                attempt += 1;
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "store busy; retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(BUSY_BACKOFF_CAP);
            }
            other => return other,
        }
    }
}
