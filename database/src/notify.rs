use crate::common::{map_sqlx_err, row_to_notification};
use crate::store::retry_busy;
use crate::tasks::SqliteRepository;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqliteConnection;
use tm_core::error::{Result, TmError};
use tm_core::events::Event;
use tm_core::models::{Notification, NotificationKind};
use tm_core::repository::NotificationRepository;

/// Per-task cap on stored notifications. Once reached, a single
/// `notifications_truncated` marker replaces further rows for that task.
pub const PER_TASK_CAP: i64 = 100;

/// Insert one notification row, honoring the per-task cap. Returns the new
/// row id, or `None` when the cap swallowed the row.
pub(crate) async fn try_insert_notification(
    conn: &mut SqliteConnection,
    recipient: Option<&str>,
    task_id: Option<&str>,
    kind: NotificationKind,
    message: &str,
) -> Result<Option<i64>> {
    if let Some(task_id) = task_id {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE task_id = ?")
            .bind(task_id)
            .fetch_one(&mut *conn)
            .await
            .map_err(map_sqlx_err)?;
        if count >= PER_TASK_CAP {
            let marker_exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM notifications
                 WHERE task_id = ? AND kind = 'notifications_truncated')",
            )
            .bind(task_id)
            .fetch_one(&mut *conn)
            .await
            .map_err(map_sqlx_err)?;
            if !marker_exists {
                sqlx::query(
                    "INSERT INTO notifications (recipient, task_id, kind, message, created_at)
                     VALUES (NULL, ?, 'notifications_truncated', ?, ?)",
                )
                .bind(task_id)
                .bind(format!("further notifications for task {task_id} truncated"))
                .bind(Utc::now())
                .execute(&mut *conn)
                .await
                .map_err(map_sqlx_err)?;
            }
            return Ok(None);
        }
    }

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO notifications (recipient, task_id, kind, message, created_at)
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(recipient)
    .bind(task_id)
    .bind(kind.as_str())
    .bind(message)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await
    .map_err(map_sqlx_err)?;
    Ok(Some(id))
}

/// Best-effort emission from inside a compound operation: a notification
/// failure never fails the operation that produced it.
pub(crate) async fn insert_notification(
    conn: &mut SqliteConnection,
    recipient: Option<&str>,
    task_id: Option<&str>,
    kind: NotificationKind,
    message: &str,
) {
    if let Err(e) = try_insert_notification(conn, recipient, task_id, kind, message).await {
        tracing::warn!(kind = %kind, error = %e, "notification emission failed");
    }
}

#[async_trait]
impl NotificationRepository for SqliteRepository {
    async fn emit(
        &self,
        recipient: Option<&str>,
        task_id: Option<&str>,
        kind: NotificationKind,
        message: &str,
    ) -> Result<Option<i64>> {
        if let Some(task_id) = task_id {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?)")
                .bind(task_id)
                .fetch_one(self.pool())
                .await
                .map_err(map_sqlx_err)?;
            if !exists {
                return Err(TmError::task_not_found(task_id));
            }
        }

        let emitted = retry_busy(|| async move {
            let mut tx = self.pool().begin().await.map_err(map_sqlx_err)?;
            let id = try_insert_notification(&mut tx, recipient, task_id, kind, message).await?;
            tx.commit().await.map_err(map_sqlx_err)?;
            Ok(id)
        })
        .await?;

        if let Some(id) = emitted {
            self.sink().emit(&Event::NotificationEmitted(Notification {
                id,
                recipient: recipient.map(str::to_string),
                task_id: task_id.map(str::to_string),
                kind,
                message: message.to_string(),
                created_at: Utc::now(),
            }));
        }
        Ok(emitted)
    }

    async fn watch(&self, agent_id: &str, limit: Option<u32>) -> Result<Vec<Notification>> {
        retry_busy(|| async move {
            let mut tx = self.pool().begin().await.map_err(map_sqlx_err)?;

            let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
                "SELECT id, recipient, task_id, kind, message, created_at FROM notifications n
                 WHERE (n.recipient = ",
            );
            qb.push_bind(agent_id);
            qb.push(" OR n.recipient IS NULL) AND NOT EXISTS (SELECT 1 FROM notification_reads r WHERE r.notification_id = n.id AND r.agent_id = ");
            qb.push_bind(agent_id);
            qb.push(") ORDER BY n.created_at ASC, n.id ASC");
            if let Some(limit) = limit {
                qb.push(" LIMIT ");
                qb.push_bind(limit as i64);
            }

            let rows = qb.build().fetch_all(&mut *tx).await.map_err(map_sqlx_err)?;
            let notifications: Vec<Notification> = rows
                .iter()
                .map(row_to_notification)
                .collect::<Result<_>>()?;

            // Mark seen in the same transaction: a second watch returns
            // nothing new
            let now = Utc::now();
            for notification in &notifications {
                sqlx::query(
                    "INSERT OR IGNORE INTO notification_reads (notification_id, agent_id, read_at)
                     VALUES (?, ?, ?)",
                )
                .bind(notification.id)
                .bind(agent_id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
            }

            tx.commit().await.map_err(map_sqlx_err)?;
            Ok(notifications)
        })
        .await
    }
}
