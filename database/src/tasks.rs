use crate::common::{
    map_sqlx_err, row_to_progress, row_to_task, status_from_db, TASK_COLUMNS,
};
use crate::notify::insert_notification;
use crate::store::{retry_busy, Store};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::sync::Arc;
use tm_core::error::{Result, TmError};
use tm_core::events::{Event, EventSink, NoopSink};
use tm_core::graph::{self, Edge, GraphAnomaly};
use tm_core::models::{
    CompleteOptions, CompletionResult, DepSummary, FileRef, NewTask, NotificationKind, Task,
    TaskDetail, TaskFilter, TaskPatch, TaskStatus,
};
use tm_core::repository::TaskRepository;
use tm_core::validation::Validator;
use tm_core::criteria;

/// Attempts at drawing a fresh random id before giving up.
const ID_ATTEMPTS: u32 = 16;

/// SQLite implementation of every repository trait.
///
/// Compound writes run in one transaction each; transient BUSY contention
/// retries with backoff. Committed changes are announced to the event sink
/// after the transaction lands, never inside it.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
    sink: Arc<dyn EventSink>,
}

impl SqliteRepository {
    pub fn new(store: &Store) -> Self {
        Self::with_sink(store, Arc::new(NoopSink))
    }

    pub fn with_sink(store: &Store, sink: Arc<dyn EventSink>) -> Self {
        Self {
            pool: store.pool().clone(),
            sink,
        }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }
}

pub(crate) async fn fetch_task(conn: &mut SqliteConnection, id: &str) -> Result<Option<Task>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
    row.as_ref().map(row_to_task).transpose()
}

pub(crate) async fn require_task(conn: &mut SqliteConnection, id: &str) -> Result<Task> {
    fetch_task(conn, id)
        .await?
        .ok_or_else(|| TmError::task_not_found(id))
}

async fn generate_id(conn: &mut SqliteConnection) -> Result<String> {
    for _ in 0..ID_ATTEMPTS {
        let id = hex::encode(rand::random::<[u8; 4]>());
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?)")
            .bind(&id)
            .fetch_one(&mut *conn)
            .await
            .map_err(map_sqlx_err)?;
        if !exists {
            return Ok(id);
        }
    }
    Err(TmError::Internal(format!(
        "task id space exhausted after {ID_ATTEMPTS} attempts"
    )))
}

async fn load_edges(conn: &mut SqliteConnection) -> Result<Vec<Edge>> {
    let rows = sqlx::query("SELECT task_id, depends_on_id FROM task_deps")
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
    Ok(rows
        .iter()
        .map(|row| (row.get("task_id"), row.get("depends_on_id")))
        .collect())
}

async fn unmet_dep_count(conn: &mut SqliteConnection, task_id: &str) -> Result<i64> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM task_deps d
         JOIN tasks p ON p.id = d.depends_on_id
         WHERE d.task_id = ? AND p.status != 'completed'",
    )
    .bind(task_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_sqlx_err)
}

async fn dependent_ids(conn: &mut SqliteConnection, task_id: &str) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT task_id FROM task_deps WHERE depends_on_id = ? ORDER BY task_id")
        .bind(task_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
    Ok(rows.iter().map(|row| row.get("task_id")).collect())
}

async fn neighbor_summaries(
    conn: &mut SqliteConnection,
    task_id: &str,
    dependents: bool,
) -> Result<Vec<DepSummary>> {
    let sql = if dependents {
        "SELECT t.id, t.title, t.status FROM task_deps d
         JOIN tasks t ON t.id = d.task_id
         WHERE d.depends_on_id = ? ORDER BY t.created_at ASC, t.id ASC"
    } else {
        "SELECT t.id, t.title, t.status FROM task_deps d
         JOIN tasks t ON t.id = d.depends_on_id
         WHERE d.task_id = ? ORDER BY t.created_at ASC, t.id ASC"
    };
    let rows = sqlx::query(sql)
        .bind(task_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
    rows.iter()
        .map(|row| {
            let status_str: String = row.get("status");
            Ok(DepSummary {
                id: row.get("id"),
                title: row.get("title"),
                status: status_from_db(&status_str)?,
            })
        })
        .collect()
}

impl SqliteRepository {
    async fn add_once(&self, new: &NewTask) -> Result<Task> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        let now = Utc::now();

        // Dedupe the dependency list, preserving order
        let mut deps: Vec<String> = Vec::new();
        for dep in &new.deps {
            if !deps.contains(dep) {
                deps.push(dep.clone());
            }
        }

        let mut unmet = 0usize;
        for dep in &deps {
            match fetch_task(&mut tx, dep).await? {
                Some(parent) => {
                    if parent.status != TaskStatus::Completed {
                        unmet += 1;
                    }
                }
                None => return Err(TmError::UnknownDependency { id: dep.clone() }),
            }
        }

        let id = generate_id(&mut tx).await?;

        if !deps.is_empty() {
            let existing = load_edges(&mut tx).await?;
            let candidate: Vec<Edge> = deps.iter().map(|d| (id.clone(), d.clone())).collect();
            if let Some(path) = graph::find_cycle(&existing, &candidate) {
                return Err(TmError::CycleDetected { path });
            }
        }

        let status = if unmet > 0 {
            TaskStatus::Blocked
        } else {
            TaskStatus::Pending
        };

        let criteria_json = new
            .criteria
            .as_ref()
            .map(|c| serde_json::to_string(c))
            .transpose()
            .map_err(|e| TmError::Internal(format!("serializing criteria: {e}")))?;

        sqlx::query(
            "INSERT INTO tasks (id, title, description, status, priority, assignee,
                                created_at, updated_at, success_criteria, deadline, estimated_hours)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(status.as_str())
        .bind(new.priority.as_str())
        .bind(&new.assignee)
        .bind(now)
        .bind(now)
        .bind(&criteria_json)
        .bind(new.deadline)
        .bind(new.estimated_hours)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        for dep in &deps {
            sqlx::query("INSERT INTO task_deps (task_id, depends_on_id) VALUES (?, ?)")
                .bind(&id)
                .bind(dep)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        }
        for file_ref in &new.file_refs {
            sqlx::query(
                "INSERT INTO file_refs (task_id, path, line_start, line_end) VALUES (?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(&file_ref.path)
            .bind(file_ref.line_start as i64)
            .bind(file_ref.line_end.map(|v| v as i64))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }
        for tag in &new.tags {
            sqlx::query("INSERT INTO task_tags (task_id, tag) VALUES (?, ?)")
                .bind(&id)
                .bind(tag)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        }

        let task = require_task(&mut tx, &id).await?;
        tx.commit().await.map_err(map_sqlx_err)?;

        self.sink.emit(&Event::TaskCreated {
            task_id: task.id.clone(),
            title: task.title.clone(),
        });
        tracing::info!(task_id = %task.id, status = %task.status, "task created");
        Ok(task)
    }

    async fn update_once(&self, id: &str, patch: &TaskPatch) -> Result<Task> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        let task = require_task(&mut tx, id).await?;
        let now = Utc::now();

        let previous_status = task.status;
        if let Some(new_status) = patch.status {
            if new_status == TaskStatus::Completed {
                // The criteria gate and the cascade live in complete()
                return Err(TmError::invalid_transition(task.status, new_status));
            }
            if !task.can_transition_to(new_status, patch.reopen) {
                return Err(TmError::invalid_transition(task.status, new_status));
            }
            sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
                .bind(new_status.as_str())
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        }
        if let Some(priority) = patch.priority {
            sqlx::query("UPDATE tasks SET priority = ?, updated_at = ? WHERE id = ?")
                .bind(priority.as_str())
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        }
        if let Some(assignee) = &patch.assignee {
            sqlx::query("UPDATE tasks SET assignee = ?, updated_at = ? WHERE id = ?")
                .bind(assignee)
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
            insert_notification(
                &mut tx,
                Some(assignee),
                Some(id),
                NotificationKind::TaskAssigned,
                &format!("task {id} assigned to you"),
            )
            .await;
        }

        let updated = require_task(&mut tx, id).await?;
        tx.commit().await.map_err(map_sqlx_err)?;

        if updated.status != previous_status {
            self.sink.emit(&Event::TaskStatusChanged {
                task_id: updated.id.clone(),
                from: previous_status,
                to: updated.status,
            });
        }
        Ok(updated)
    }

    async fn complete_once(&self, id: &str, opts: &CompleteOptions) -> Result<CompletionResult> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        let task = require_task(&mut tx, id).await?;
        let now = Utc::now();

        // Idempotent re-complete: no writes, no notifications
        if task.status == TaskStatus::Completed {
            return Ok(CompletionResult {
                task,
                unblocked: Vec::new(),
                report: None,
                already_completed: true,
            });
        }
        if !task.completable() {
            return Err(TmError::invalid_transition(task.status, TaskStatus::Completed));
        }

        // Criteria gate: a task with criteria completes only when
        // validation passed or the caller forced it
        let report = match task.success_criteria.as_deref() {
            Some(criteria) if !criteria.is_empty() => {
                let confirmations = if opts.validate {
                    opts.confirmations.as_deref()
                } else {
                    None
                };
                Some(criteria::gate(criteria, confirmations, opts.force)?)
            }
            _ => None,
        };

        let summary = opts
            .summary
            .as_deref()
            .map(Validator::summary)
            .transpose()?;
        if let Some(hours) = opts.actual_hours {
            Validator::hours("actual-hours", hours)?;
        }

        // Guarded update: loses cleanly against a concurrent complete
        let updated_rows = sqlx::query(
            "UPDATE tasks SET status = 'completed', updated_at = ?,
                    completion_summary = COALESCE(?, completion_summary),
                    actual_hours = COALESCE(?, actual_hours)
             WHERE id = ? AND status IN ('pending', 'in_progress')",
        )
        .bind(now)
        .bind(&summary)
        .bind(opts.actual_hours)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        if updated_rows.rows_affected() == 0 {
            let current = require_task(&mut tx, id).await?;
            if current.status == TaskStatus::Completed {
                return Ok(CompletionResult {
                    task: current,
                    unblocked: Vec::new(),
                    report,
                    already_completed: true,
                });
            }
            return Err(TmError::invalid_transition(
                current.status,
                TaskStatus::Completed,
            ));
        }

        // Cascade-unblock dependents whose last unmet dependency this was
        let mut unblocked = Vec::new();
        for dependent_id in dependent_ids(&mut tx, id).await? {
            if unmet_dep_count(&mut tx, &dependent_id).await? > 0 {
                continue;
            }
            let flipped = sqlx::query(
                "UPDATE tasks SET status = 'pending', updated_at = ?
                 WHERE id = ? AND status = 'blocked'",
            )
            .bind(now)
            .bind(&dependent_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
            if flipped.rows_affected() == 0 {
                continue;
            }
            unblocked.push(dependent_id.clone());

            let assignee: Option<String> =
                sqlx::query_scalar("SELECT assignee FROM tasks WHERE id = ?")
                    .bind(&dependent_id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(map_sqlx_err)?;
            let message = format!("task {dependent_id} unblocked: all dependencies completed");
            if let Some(assignee) = &assignee {
                insert_notification(
                    &mut tx,
                    Some(assignee),
                    Some(dependent_id.as_str()),
                    NotificationKind::TaskUnblocked,
                    &message,
                )
                .await;
            }
            insert_notification(
                &mut tx,
                None,
                Some(dependent_id.as_str()),
                NotificationKind::TaskUnblocked,
                &message,
            )
            .await;
        }

        // Completion notifications: unicast to the assignee, broadcast for
        // watchers
        let message = format!("task {id} completed");
        if let Some(assignee) = &task.assignee {
            insert_notification(
                &mut tx,
                Some(assignee),
                Some(id),
                NotificationKind::TaskCompleted,
                &message,
            )
            .await;
        }
        insert_notification(&mut tx, None, Some(id), NotificationKind::TaskCompleted, &message)
            .await;

        if opts.impact_review {
            let has_refs: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM file_refs WHERE task_id = ?)")
                    .bind(id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(map_sqlx_err)?;
            if has_refs {
                insert_notification(
                    &mut tx,
                    None,
                    Some(id),
                    NotificationKind::ImpactReview,
                    &format!("task {id} completed; review impact on referenced files"),
                )
                .await;
            }
        }

        let completed = require_task(&mut tx, id).await?;
        tx.commit().await.map_err(map_sqlx_err)?;

        self.sink.emit(&Event::TaskStatusChanged {
            task_id: completed.id.clone(),
            from: task.status,
            to: TaskStatus::Completed,
        });
        for dependent_id in &unblocked {
            self.sink.emit(&Event::TaskStatusChanged {
                task_id: dependent_id.clone(),
                from: TaskStatus::Blocked,
                to: TaskStatus::Pending,
            });
        }
        tracing::info!(task_id = %id, unblocked = unblocked.len(), "task completed");

        Ok(CompletionResult {
            task: completed,
            unblocked,
            report,
            already_completed: false,
        })
    }

    async fn delete_once(&self, id: &str, cascade: bool) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        require_task(&mut tx, id).await?;

        let direct = dependent_ids(&mut tx, id).await?;
        if !direct.is_empty() && !cascade {
            return Err(TmError::DependentsExist { ids: direct });
        }

        // Transitive closure of dependents, then the task itself
        let mut doomed: Vec<String> = vec![id.to_string()];
        let mut seen: HashSet<String> = doomed.iter().cloned().collect();
        let mut frontier = direct;
        while let Some(next) = frontier.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }
            frontier.extend(dependent_ids(&mut tx, &next).await?);
            doomed.push(next);
        }

        // Edges across the whole doomed set first, to satisfy the FKs
        for task_id in &doomed {
            sqlx::query("DELETE FROM task_deps WHERE task_id = ? OR depends_on_id = ?")
                .bind(task_id)
                .bind(task_id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        }
        for task_id in &doomed {
            sqlx::query(
                "DELETE FROM notification_reads WHERE notification_id IN
                 (SELECT id FROM notifications WHERE task_id = ?)",
            )
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
            for table in [
                "notifications",
                "context_entries",
                "private_notes",
                "participants",
                "progress_entries",
                "file_refs",
                "task_tags",
            ] {
                sqlx::query(&format!("DELETE FROM {table} WHERE task_id = ?"))
                    .bind(task_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_err)?;
            }
            sqlx::query("DELETE FROM tasks WHERE id = ?")
                .bind(task_id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(doomed)
    }

    async fn add_dependency_once(&self, task_id: &str, depends_on_id: &str) -> Result<Task> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        let task = require_task(&mut tx, task_id).await?;
        let parent = fetch_task(&mut tx, depends_on_id)
            .await?
            .ok_or_else(|| TmError::UnknownDependency {
                id: depends_on_id.to_string(),
            })?;

        let candidate = vec![(task_id.to_string(), depends_on_id.to_string())];
        let existing = load_edges(&mut tx).await?;
        if existing.contains(&candidate[0]) {
            return Ok(task);
        }
        if let Some(path) = graph::find_cycle(&existing, &candidate) {
            return Err(TmError::CycleDetected { path });
        }

        sqlx::query("INSERT INTO task_deps (task_id, depends_on_id) VALUES (?, ?)")
            .bind(task_id)
            .bind(depends_on_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        // Keep the blocking invariant: an unmet dependency blocks the task
        if parent.status != TaskStatus::Completed
            && matches!(task.status, TaskStatus::Pending | TaskStatus::InProgress)
        {
            sqlx::query("UPDATE tasks SET status = 'blocked', updated_at = ? WHERE id = ?")
                .bind(Utc::now())
                .bind(task_id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        }

        let updated = require_task(&mut tx, task_id).await?;
        tx.commit().await.map_err(map_sqlx_err)?;

        if updated.status != task.status {
            self.sink.emit(&Event::TaskStatusChanged {
                task_id: updated.id.clone(),
                from: task.status,
                to: updated.status,
            });
        }
        Ok(updated)
    }
}

#[async_trait]
impl TaskRepository for SqliteRepository {
    async fn add(&self, task: NewTask) -> Result<Task> {
        let task = Validator::new_task(task)?;
        retry_busy(|| self.add_once(&task)).await
    }

    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new(format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1=1"));

        if let Some(status) = filter.status {
            qb.push(" AND status = ");
            qb.push_bind(status.as_str());
        }
        if let Some(assignee) = &filter.assignee {
            qb.push(" AND assignee = ");
            qb.push_bind(assignee.clone());
        }
        if let Some(has_deps) = filter.has_deps {
            if has_deps {
                qb.push(" AND EXISTS (SELECT 1 FROM task_deps d WHERE d.task_id = tasks.id)");
            } else {
                qb.push(" AND NOT EXISTS (SELECT 1 FROM task_deps d WHERE d.task_id = tasks.id)");
            }
        }
        qb.push(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit as i64);
        }

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_task).collect()
    }

    async fn show(&self, id: &str) -> Result<TaskDetail> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_err)?;
        let task = require_task(&mut conn, id).await?;

        let deps = neighbor_summaries(&mut conn, id, false).await?;
        let dependents = neighbor_summaries(&mut conn, id, true).await?;

        let ref_rows = sqlx::query(
            "SELECT path, line_start, line_end FROM file_refs WHERE task_id = ? ORDER BY id ASC",
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        let file_refs = ref_rows
            .iter()
            .map(|row| FileRef {
                path: row.get("path"),
                line_start: row.get::<i64, _>("line_start") as u32,
                line_end: row.get::<Option<i64>, _>("line_end").map(|v| v as u32),
            })
            .collect();

        let tag_rows = sqlx::query("SELECT tag FROM task_tags WHERE task_id = ? ORDER BY tag ASC")
            .bind(id)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_sqlx_err)?;
        let tags = tag_rows.iter().map(|row| row.get("tag")).collect();

        let progress_rows = sqlx::query(
            "SELECT id, task_id, agent_id, message, created_at FROM progress_entries
             WHERE task_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        let progress = progress_rows.iter().map(row_to_progress).collect();

        Ok(TaskDetail {
            task,
            deps,
            dependents,
            file_refs,
            tags,
            progress,
        })
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        retry_busy(|| self.update_once(id, &patch)).await
    }

    async fn complete(&self, id: &str, opts: CompleteOptions) -> Result<CompletionResult> {
        retry_busy(|| self.complete_once(id, &opts)).await
    }

    async fn delete(&self, id: &str, cascade: bool) -> Result<()> {
        let doomed = retry_busy(|| self.delete_once(id, cascade)).await?;
        for task_id in doomed {
            self.sink.emit(&Event::TaskDeleted { task_id });
        }
        Ok(())
    }

    async fn assign(&self, id: &str, agent_id: &str) -> Result<Task> {
        if agent_id.trim().is_empty() {
            return Err(TmError::empty_field("assignee"));
        }
        let patch = TaskPatch {
            assignee: Some(agent_id.trim().to_string()),
            ..Default::default()
        };
        retry_busy(|| self.update_once(id, &patch)).await
    }

    async fn add_dependency(&self, task_id: &str, depends_on_id: &str) -> Result<Task> {
        retry_busy(|| self.add_dependency_once(task_id, depends_on_id)).await
    }

    async fn critical_path(&self) -> Result<Vec<Task>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_err)?;
        let rows = sqlx::query("SELECT id, estimated_hours FROM tasks")
            .fetch_all(&mut *conn)
            .await
            .map_err(map_sqlx_err)?;
        let weights = rows
            .iter()
            .map(|row| {
                (
                    row.get::<String, _>("id"),
                    row.get::<Option<f64>, _>("estimated_hours").unwrap_or(0.0),
                )
            })
            .collect();
        let edges = load_edges(&mut conn).await?;

        let mut tasks = Vec::new();
        for id in graph::critical_path(&weights, &edges) {
            tasks.push(require_task(&mut conn, &id).await?);
        }
        Ok(tasks)
    }

    async fn audit_graph(&self) -> Result<Vec<GraphAnomaly>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_err)?;
        let rows = sqlx::query("SELECT id FROM tasks")
            .fetch_all(&mut *conn)
            .await
            .map_err(map_sqlx_err)?;
        let ids: HashSet<String> = rows.iter().map(|row| row.get("id")).collect();
        let edges = load_edges(&mut conn).await?;
        Ok(graph::audit(&ids, &edges))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::MigrationManager;
    use tempfile::TempDir;

    pub(crate) async fn test_repo() -> (TempDir, SqliteRepository) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        MigrationManager::new(&store).apply().await.unwrap();
        (dir, SqliteRepository::new(&store))
    }

    #[tokio::test]
    async fn add_generates_hex_id_and_pending_status() {
        let (_dir, repo) = test_repo().await;
        let task = repo.add(NewTask::titled("Fix login bug")).await.unwrap();
        assert_eq!(task.id.len(), 8);
        assert!(task.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.title, "Fix login bug");
    }

    #[tokio::test]
    async fn add_rejects_unknown_dependency() {
        let (_dir, repo) = test_repo().await;
        let mut new = NewTask::titled("Frontend");
        new.deps = vec!["deadbeef".to_string()];
        let err = repo.add(new).await.unwrap_err();
        assert!(matches!(err, TmError::UnknownDependency { id } if id == "deadbeef"));

        // Failure left no task behind
        let all = repo.list(TaskFilter::default()).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn add_with_unmet_dep_starts_blocked() {
        let (_dir, repo) = test_repo().await;
        let backend = repo.add(NewTask::titled("Backend")).await.unwrap();
        let mut new = NewTask::titled("Frontend");
        new.deps = vec![backend.id.clone()];
        let frontend = repo.add(new).await.unwrap();
        assert_eq!(frontend.status, TaskStatus::Blocked);
    }

    #[tokio::test]
    async fn add_with_completed_dep_starts_pending() {
        let (_dir, repo) = test_repo().await;
        let backend = repo.add(NewTask::titled("Backend")).await.unwrap();
        repo.complete(&backend.id, CompleteOptions::default())
            .await
            .unwrap();

        let mut new = NewTask::titled("Frontend");
        new.deps = vec![backend.id.clone()];
        let frontend = repo.add(new).await.unwrap();
        assert_eq!(frontend.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn complete_cascades_to_dependents() {
        let (_dir, repo) = test_repo().await;
        let backend = repo.add(NewTask::titled("Backend")).await.unwrap();
        let mut new = NewTask::titled("Frontend");
        new.deps = vec![backend.id.clone()];
        let frontend = repo.add(new).await.unwrap();

        let result = repo
            .complete(&backend.id, CompleteOptions::default())
            .await
            .unwrap();
        assert_eq!(result.unblocked, vec![frontend.id.clone()]);

        let frontend = repo.show(&frontend.id).await.unwrap().task;
        assert_eq!(frontend.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn complete_waits_for_all_dependencies() {
        let (_dir, repo) = test_repo().await;
        let a = repo.add(NewTask::titled("A")).await.unwrap();
        let b = repo.add(NewTask::titled("B")).await.unwrap();
        let mut new = NewTask::titled("C");
        new.deps = vec![a.id.clone(), b.id.clone()];
        let c = repo.add(new).await.unwrap();

        let result = repo.complete(&a.id, CompleteOptions::default()).await.unwrap();
        assert!(result.unblocked.is_empty());
        assert_eq!(repo.show(&c.id).await.unwrap().task.status, TaskStatus::Blocked);

        let result = repo.complete(&b.id, CompleteOptions::default()).await.unwrap();
        assert_eq!(result.unblocked, vec![c.id.clone()]);
        assert_eq!(repo.show(&c.id).await.unwrap().task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn recomplete_is_idempotent() {
        let (_dir, repo) = test_repo().await;
        let task = repo.add(NewTask::titled("Once")).await.unwrap();
        let first = repo
            .complete(&task.id, CompleteOptions::default())
            .await
            .unwrap();
        assert!(!first.already_completed);

        let second = repo
            .complete(&task.id, CompleteOptions::default())
            .await
            .unwrap();
        assert!(second.already_completed);
        assert!(second.unblocked.is_empty());
    }

    #[tokio::test]
    async fn manual_complete_via_update_is_rejected() {
        let (_dir, repo) = test_repo().await;
        let task = repo.add(NewTask::titled("Nope")).await.unwrap();
        let patch = TaskPatch {
            status: Some(TaskStatus::Completed),
            ..Default::default()
        };
        let err = repo.update(&task.id, patch).await.unwrap_err();
        assert!(matches!(err, TmError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn reopen_needs_flag() {
        let (_dir, repo) = test_repo().await;
        let task = repo.add(NewTask::titled("Reopenable")).await.unwrap();
        repo.complete(&task.id, CompleteOptions::default())
            .await
            .unwrap();

        let patch = TaskPatch {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        };
        assert!(repo.update(&task.id, patch).await.is_err());

        let patch = TaskPatch {
            status: Some(TaskStatus::InProgress),
            reopen: true,
            ..Default::default()
        };
        let reopened = repo.update(&task.id, patch).await.unwrap();
        assert_eq!(reopened.status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn add_dependency_detects_cycles() {
        let (_dir, repo) = test_repo().await;
        let a = repo.add(NewTask::titled("A")).await.unwrap();
        let mut new = NewTask::titled("B");
        new.deps = vec![a.id.clone()];
        let b = repo.add(new).await.unwrap();
        let mut new = NewTask::titled("C");
        new.deps = vec![b.id.clone()];
        let c = repo.add(new).await.unwrap();

        let err = repo.add_dependency(&a.id, &c.id).await.unwrap_err();
        match err {
            TmError::CycleDetected { path } => {
                assert_eq!(path.first(), path.last());
                assert!(path.len() >= 3);
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }

        // Store unchanged: the audit stays clean and A has no deps
        assert!(repo.audit_graph().await.unwrap().is_empty());
        assert!(repo.show(&a.id).await.unwrap().deps.is_empty());
    }

    #[tokio::test]
    async fn self_dependency_is_trivial_cycle() {
        let (_dir, repo) = test_repo().await;
        let a = repo.add(NewTask::titled("A")).await.unwrap();
        let err = repo.add_dependency(&a.id, &a.id).await.unwrap_err();
        assert!(matches!(err, TmError::CycleDetected { .. }));
    }

    #[tokio::test]
    async fn delete_refuses_without_cascade() {
        let (_dir, repo) = test_repo().await;
        let backend = repo.add(NewTask::titled("Backend")).await.unwrap();
        let mut new = NewTask::titled("Frontend");
        new.deps = vec![backend.id.clone()];
        let frontend = repo.add(new).await.unwrap();

        let err = repo.delete(&backend.id, false).await.unwrap_err();
        assert!(matches!(err, TmError::DependentsExist { ids } if ids == vec![frontend.id.clone()]));

        repo.delete(&backend.id, true).await.unwrap();
        assert!(repo.show(&backend.id).await.is_err());
        assert!(repo.show(&frontend.id).await.is_err());
    }

    #[tokio::test]
    async fn list_filters_compose() {
        let (_dir, repo) = test_repo().await;
        let mut new = NewTask::titled("One");
        new.assignee = Some("alice".to_string());
        repo.add(new).await.unwrap();
        let two = repo.add(NewTask::titled("Two")).await.unwrap();
        let mut new = NewTask::titled("Three");
        new.deps = vec![two.id.clone()];
        new.assignee = Some("alice".to_string());
        repo.add(new).await.unwrap();

        let filter = TaskFilter {
            assignee: Some("alice".to_string()),
            ..Default::default()
        };
        assert_eq!(repo.list(filter).await.unwrap().len(), 2);

        let filter = TaskFilter {
            assignee: Some("alice".to_string()),
            has_deps: Some(true),
            ..Default::default()
        };
        let result = repo.list(filter).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].title, "Three");

        let filter = TaskFilter {
            status: Some(TaskStatus::Pending),
            limit: Some(1),
            ..Default::default()
        };
        assert_eq!(repo.list(filter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn show_collects_satellites() {
        let (_dir, repo) = test_repo().await;
        let dep = repo.add(NewTask::titled("Dep")).await.unwrap();
        let mut new = NewTask::titled("Main");
        new.deps = vec![dep.id.clone()];
        new.tags = vec!["auth".to_string(), "backend".to_string()];
        new.file_refs = vec![FileRef {
            path: "src/auth.rs".to_string(),
            line_start: 10,
            line_end: Some(42),
        }];
        let main = repo.add(new).await.unwrap();

        let detail = repo.show(&main.id).await.unwrap();
        assert_eq!(detail.deps.len(), 1);
        assert_eq!(detail.deps[0].id, dep.id);
        assert_eq!(detail.tags, vec!["auth", "backend"]);
        assert_eq!(detail.file_refs[0].line_end, Some(42));

        let detail = repo.show(&dep.id).await.unwrap();
        assert_eq!(detail.dependents.len(), 1);
        assert_eq!(detail.dependents[0].id, main.id);
    }

    #[tokio::test]
    async fn critical_path_spans_heaviest_chain() {
        let (_dir, repo) = test_repo().await;
        let mut new = NewTask::titled("Base");
        new.estimated_hours = Some(2.0);
        let base = repo.add(new).await.unwrap();

        let mut new = NewTask::titled("Heavy");
        new.estimated_hours = Some(8.0);
        new.deps = vec![base.id.clone()];
        let heavy = repo.add(new).await.unwrap();

        let mut new = NewTask::titled("Light");
        new.estimated_hours = Some(1.0);
        new.deps = vec![base.id.clone()];
        repo.add(new).await.unwrap();

        let path = repo.critical_path().await.unwrap();
        let ids: Vec<&str> = path.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![base.id.as_str(), heavy.id.as_str()]);
    }
}
