use crate::store::Store;
use chrono::Utc;
use sqlx::Row;
use std::path::{Path, PathBuf};
use tm_core::error::{Result, TmError};
use tm_core::paths;

/// One forward-only schema migration. Rollback is by restoring the backup
/// taken before apply, never by a symmetric down-migration.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// The ordered, contiguous migration sequence.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "base schema: tasks, dependency edges, collaboration, notifications",
        sql: r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id          TEXT PRIMARY KEY,
                title       TEXT NOT NULL,
                description TEXT,
                status      TEXT NOT NULL,
                priority    TEXT NOT NULL DEFAULT 'medium',
                assignee    TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS task_deps (
                task_id       TEXT NOT NULL REFERENCES tasks(id),
                depends_on_id TEXT NOT NULL REFERENCES tasks(id),
                PRIMARY KEY (task_id, depends_on_id)
            );

            CREATE TABLE IF NOT EXISTS file_refs (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id    TEXT NOT NULL REFERENCES tasks(id),
                path       TEXT NOT NULL,
                line_start INTEGER NOT NULL,
                line_end   INTEGER
            );

            CREATE TABLE IF NOT EXISTS task_tags (
                task_id TEXT NOT NULL REFERENCES tasks(id),
                tag     TEXT NOT NULL,
                PRIMARY KEY (task_id, tag)
            );

            CREATE TABLE IF NOT EXISTS context_entries (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id    TEXT NOT NULL REFERENCES tasks(id),
                agent_id   TEXT NOT NULL,
                kind       TEXT NOT NULL,
                message    TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS private_notes (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id    TEXT NOT NULL REFERENCES tasks(id),
                agent_id   TEXT NOT NULL,
                message    TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS participants (
                task_id   TEXT NOT NULL REFERENCES tasks(id),
                agent_id  TEXT NOT NULL,
                role      TEXT,
                joined_at TEXT NOT NULL,
                PRIMARY KEY (task_id, agent_id)
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient  TEXT,
                task_id    TEXT,
                kind       TEXT NOT NULL,
                message    TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notification_reads (
                notification_id INTEGER NOT NULL REFERENCES notifications(id),
                agent_id        TEXT NOT NULL,
                read_at         TEXT NOT NULL,
                PRIMARY KEY (notification_id, agent_id)
            );

            CREATE TABLE IF NOT EXISTS progress_entries (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id    TEXT NOT NULL REFERENCES tasks(id),
                agent_id   TEXT NOT NULL,
                message    TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        description: "core-loop columns, all defaulting to NULL",
        sql: r#"
            ALTER TABLE tasks ADD COLUMN success_criteria TEXT;
            ALTER TABLE tasks ADD COLUMN deadline TEXT;
            ALTER TABLE tasks ADD COLUMN estimated_hours REAL;
            ALTER TABLE tasks ADD COLUMN actual_hours REAL;
            ALTER TABLE tasks ADD COLUMN completion_summary TEXT;
            ALTER TABLE tasks ADD COLUMN feedback_quality INTEGER;
            ALTER TABLE tasks ADD COLUMN feedback_timeliness INTEGER;
            ALTER TABLE tasks ADD COLUMN feedback_notes TEXT;
            ALTER TABLE tasks ADD COLUMN rework_of TEXT;
        "#,
    },
    Migration {
        version: 3,
        description: "hot-path indexes",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_assignee ON tasks(assignee);
            CREATE INDEX IF NOT EXISTS idx_deps_depends_on ON task_deps(depends_on_id);
            CREATE INDEX IF NOT EXISTS idx_context_task ON context_entries(task_id);
            CREATE INDEX IF NOT EXISTS idx_notes_task_agent ON private_notes(task_id, agent_id);
            CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications(recipient);
            CREATE INDEX IF NOT EXISTS idx_progress_task ON progress_entries(task_id);
        "#,
    },
];

/// An applied migration as recorded in `schema_migrations`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: u32,
    pub applied_at: String,
}

/// Applied and pending versions.
#[derive(Debug, Clone, Default)]
pub struct MigrationStatus {
    pub applied: Vec<AppliedMigration>,
    pub pending: Vec<u32>,
}

/// Applies and reports migrations. Callers hold the state lock around
/// `apply` and `rollback`; duplicate concurrent runs are safe because
/// applying an already-recorded version is a no-op.
pub struct MigrationManager<'a> {
    store: &'a Store,
}

impl<'a> MigrationManager<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    async fn ensure_table(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
        )
        .execute(self.store.pool())
        .await
        .map_err(|e| TmError::Database(format!("creating schema_migrations: {e}")))?;
        Ok(())
    }

    /// Applied versions plus the pending tail.
    pub async fn status(&self) -> Result<MigrationStatus> {
        self.ensure_table().await?;
        let rows = sqlx::query(
            "SELECT version, applied_at FROM schema_migrations ORDER BY version ASC",
        )
        .fetch_all(self.store.pool())
        .await
        .map_err(|e| TmError::Database(format!("reading schema_migrations: {e}")))?;

        let applied: Vec<AppliedMigration> = rows
            .iter()
            .map(|row| AppliedMigration {
                version: row.get::<i64, _>("version") as u32,
                applied_at: row.get("applied_at"),
            })
            .collect();

        let applied_versions: Vec<u32> = applied.iter().map(|m| m.version).collect();
        let pending = MIGRATIONS
            .iter()
            .map(|m| m.version)
            .filter(|v| !applied_versions.contains(v))
            .collect();

        Ok(MigrationStatus { applied, pending })
    }

    /// Apply every pending migration in order. Each step: copy the DB file
    /// into `backups/`, run the DDL in one transaction, record the version,
    /// commit. The first failure stops the run with `MigrationFailed`.
    /// Returns the versions applied by this call.
    pub async fn apply(&self) -> Result<Vec<u32>> {
        let status = self.status().await?;
        let mut applied_now = Vec::new();

        for migration in MIGRATIONS {
            if !status.pending.contains(&migration.version) {
                continue;
            }

            self.backup(migration.version).await?;

            let mut tx = self
                .store
                .pool()
                .begin()
                .await
                .map_err(|e| TmError::Database(format!("starting migration tx: {e}")))?;

            sqlx::raw_sql(migration.sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| TmError::MigrationFailed {
                    version: migration.version,
                    reason: e.to_string(),
                })?;

            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(migration.version as i64)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await
                .map_err(|e| TmError::MigrationFailed {
                    version: migration.version,
                    reason: format!("recording version: {e}"),
                })?;

            tx.commit().await.map_err(|e| TmError::MigrationFailed {
                version: migration.version,
                reason: format!("commit: {e}"),
            })?;

            tracing::info!(
                version = migration.version,
                description = migration.description,
                "migration applied"
            );
            applied_now.push(migration.version);
        }

        Ok(applied_now)
    }

    /// Point-in-time copy of the DB file before a migration step.
    async fn backup(&self, version: u32) -> Result<PathBuf> {
        self.store.checkpoint().await?;

        let dir = paths::backups_dir(self.store.state_dir());
        std::fs::create_dir_all(&dir)
            .map_err(|e| TmError::StorageUnavailable(format!("creating {}: {e}", dir.display())))?;

        // Version suffix keeps names unique even when two steps land in
        // the same millisecond
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
        let target = dir.join(format!("tasks_backup_{stamp}_m{version:03}.db"));
        std::fs::copy(self.store.db_path(), &target).map_err(|e| TmError::MigrationFailed {
            version,
            reason: format!("backup copy failed: {e}"),
        })?;
        tracing::info!(backup = %target.display(), "pre-migration backup written");
        Ok(target)
    }

    /// Restore the most recent backup over the live DB file (atomic
    /// rename) and drop stale WAL sidecars. Runs against a closed store;
    /// the caller holds the state lock and reopens afterwards.
    pub fn rollback(state_dir: &Path) -> Result<PathBuf> {
        let dir = paths::backups_dir(state_dir);
        let mut backups: Vec<PathBuf> = match std::fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with("tasks_backup_") && n.ends_with(".db"))
                        .unwrap_or(false)
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        backups.sort();

        let latest = backups
            .pop()
            .ok_or_else(|| TmError::not_found("backup", dir.display().to_string()))?;

        let db = paths::db_path(state_dir);
        // Copy to a temp sibling, then rename into place so a crash cannot
        // leave a half-written live DB.
        let staging = db.with_extension("db.restore");
        std::fs::copy(&latest, &staging).map_err(|e| {
            TmError::StorageUnavailable(format!("staging backup restore: {e}"))
        })?;
        std::fs::rename(&staging, &db)
            .map_err(|e| TmError::StorageUnavailable(format!("restoring backup: {e}")))?;

        for sidecar in ["-wal", "-shm"] {
            let mut name = db.as_os_str().to_owned();
            name.push(sidecar);
            let _ = std::fs::remove_file(PathBuf::from(name));
        }

        tracing::info!(restored = %latest.display(), "store rolled back to latest backup");
        Ok(latest)
    }
}
