use crate::common::{
    map_sqlx_err, row_to_context_entry, row_to_participant, row_to_private_note,
};
use crate::notify::insert_notification;
use crate::store::retry_busy;
use crate::tasks::{require_task, SqliteRepository};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqliteConnection;
use tm_core::error::{Result, TmError};
use tm_core::events::Event;
use tm_core::models::{ContextEntry, ContextKind, ContextView, NotificationKind, PrivateNote};
use tm_core::repository::CollaborationRepository;

async fn append_context(
    conn: &mut SqliteConnection,
    task_id: &str,
    agent_id: &str,
    kind: ContextKind,
    message: &str,
) -> Result<ContextEntry> {
    if message.trim().is_empty() {
        return Err(TmError::empty_field("message"));
    }
    let now = Utc::now();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO context_entries (task_id, agent_id, kind, message, created_at)
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(task_id)
    .bind(agent_id)
    .bind(kind.as_str())
    .bind(message)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_sqlx_err)?;

    Ok(ContextEntry {
        id,
        task_id: task_id.to_string(),
        agent_id: agent_id.to_string(),
        kind,
        message: message.to_string(),
        created_at: now,
    })
}

#[async_trait]
impl CollaborationRepository for SqliteRepository {
    async fn join(&self, task_id: &str, agent_id: &str, role: Option<&str>) -> Result<()> {
        retry_busy(|| async move {
            let mut tx = self.pool().begin().await.map_err(map_sqlx_err)?;
            require_task(&mut tx, task_id).await?;
            // Idempotent: re-joining keeps the original row
            sqlx::query(
                "INSERT OR IGNORE INTO participants (task_id, agent_id, role, joined_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(task_id)
            .bind(agent_id)
            .bind(role)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
            tx.commit().await.map_err(map_sqlx_err)
        })
        .await?;
        Ok(())
    }

    async fn share(
        &self,
        task_id: &str,
        agent_id: &str,
        kind: ContextKind,
        message: &str,
    ) -> Result<ContextEntry> {
        let entry = retry_busy(|| async move {
            let mut tx = self.pool().begin().await.map_err(map_sqlx_err)?;
            require_task(&mut tx, task_id).await?;
            let entry = append_context(&mut tx, task_id, agent_id, kind, message).await?;
            tx.commit().await.map_err(map_sqlx_err)?;
            Ok(entry)
        })
        .await?;

        self.sink().emit(&Event::ContextShared(entry.clone()));
        Ok(entry)
    }

    async fn note(&self, task_id: &str, agent_id: &str, message: &str) -> Result<PrivateNote> {
        if message.trim().is_empty() {
            return Err(TmError::empty_field("message"));
        }
        let note = retry_busy(|| async move {
            let mut tx = self.pool().begin().await.map_err(map_sqlx_err)?;
            require_task(&mut tx, task_id).await?;
            let now = Utc::now();
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO private_notes (task_id, agent_id, message, created_at)
                 VALUES (?, ?, ?, ?) RETURNING id",
            )
            .bind(task_id)
            .bind(agent_id)
            .bind(message)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
            tx.commit().await.map_err(map_sqlx_err)?;
            Ok(PrivateNote {
                id,
                task_id: task_id.to_string(),
                agent_id: agent_id.to_string(),
                message: message.to_string(),
                created_at: now,
            })
        })
        .await?;

        self.sink().emit(&Event::NoteAdded(note.clone()));
        Ok(note)
    }

    async fn sync(&self, task_id: &str, agent_id: &str, checkpoint: &str) -> Result<ContextEntry> {
        let entry = retry_busy(|| async move {
            let mut tx = self.pool().begin().await.map_err(map_sqlx_err)?;
            require_task(&mut tx, task_id).await?;
            let entry =
                append_context(&mut tx, task_id, agent_id, ContextKind::Sync, checkpoint).await?;
            insert_notification(
                &mut tx,
                None,
                Some(task_id),
                NotificationKind::SyncPoint,
                &format!("sync point '{checkpoint}' reached on task {task_id} by {agent_id}"),
            )
            .await;
            tx.commit().await.map_err(map_sqlx_err)?;
            Ok(entry)
        })
        .await?;

        self.sink().emit(&Event::ContextShared(entry.clone()));
        Ok(entry)
    }

    async fn discover(
        &self,
        task_id: &str,
        agent_id: &str,
        message: &str,
        impact: Option<&str>,
        tags: &[String],
    ) -> Result<ContextEntry> {
        let entry = retry_busy(|| async move {
            let mut tx = self.pool().begin().await.map_err(map_sqlx_err)?;
            require_task(&mut tx, task_id).await?;
            let entry =
                append_context(&mut tx, task_id, agent_id, ContextKind::Discovery, message).await?;

            let mut broadcast = format!("discovery on task {task_id}: {message}");
            if let Some(impact) = impact {
                broadcast.push_str(&format!(" [impact: {impact}]"));
            }
            if !tags.is_empty() {
                broadcast.push_str(&format!(" [tags: {}]", tags.join(", ")));
            }
            insert_notification(
                &mut tx,
                None,
                Some(task_id),
                NotificationKind::Discovery,
                &broadcast,
            )
            .await;
            tx.commit().await.map_err(map_sqlx_err)?;
            Ok(entry)
        })
        .await?;

        self.sink().emit(&Event::ContextShared(entry.clone()));
        Ok(entry)
    }

    async fn context(&self, task_id: &str, agent_id: &str) -> Result<ContextView> {
        let mut conn = self.pool().acquire().await.map_err(map_sqlx_err)?;
        require_task(&mut conn, task_id).await?;

        let shared_rows = sqlx::query(
            "SELECT id, task_id, agent_id, kind, message, created_at FROM context_entries
             WHERE task_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(task_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        let shared = shared_rows
            .iter()
            .map(row_to_context_entry)
            .collect::<Result<_>>()?;

        // Isolation invariant: only the caller's own notes come back
        let note_rows = sqlx::query(
            "SELECT id, task_id, agent_id, message, created_at FROM private_notes
             WHERE task_id = ? AND agent_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(task_id)
        .bind(agent_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        let private_mine = note_rows.iter().map(row_to_private_note).collect();

        let participant_rows = sqlx::query(
            "SELECT task_id, agent_id, role, joined_at FROM participants
             WHERE task_id = ? ORDER BY joined_at ASC, agent_id ASC",
        )
        .bind(task_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;
        let participants = participant_rows.iter().map(row_to_participant).collect();

        Ok(ContextView {
            shared,
            private_mine,
            participants,
        })
    }
}
