use crate::common::{map_sqlx_err, row_to_progress};
use crate::store::retry_busy;
use crate::tasks::{require_task, SqliteRepository};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use tm_core::error::{Result, TmError};
use tm_core::metrics::{self, TaskSample};
use tm_core::models::{Feedback, Metrics, Period, ProgressEntry, Task, TaskStatus};
use tm_core::repository::CoreLoopRepository;
use tm_core::validation::Validator;

#[async_trait]
impl CoreLoopRepository for SqliteRepository {
    async fn progress(
        &self,
        task_id: &str,
        agent_id: &str,
        message: &str,
    ) -> Result<ProgressEntry> {
        if message.trim().is_empty() {
            return Err(TmError::empty_field("message"));
        }
        retry_busy(|| async move {
            let mut tx = self.pool().begin().await.map_err(map_sqlx_err)?;
            require_task(&mut tx, task_id).await?;
            let now = Utc::now();
            let row = sqlx::query(
                "INSERT INTO progress_entries (task_id, agent_id, message, created_at)
                 VALUES (?, ?, ?, ?)
                 RETURNING id, task_id, agent_id, message, created_at",
            )
            .bind(task_id)
            .bind(agent_id)
            .bind(message)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
            tx.commit().await.map_err(map_sqlx_err)?;
            Ok(row_to_progress(&row))
        })
        .await
    }

    async fn feedback(&self, task_id: &str, feedback: Feedback) -> Result<Task> {
        if feedback.quality.is_none() && feedback.timeliness.is_none() && feedback.notes.is_none() {
            return Err(TmError::validation(
                "feedback",
                "provide at least one of quality, timeliness, or note",
            ));
        }
        if let Some(quality) = feedback.quality {
            Validator::score("quality", quality)?;
        }
        if let Some(timeliness) = feedback.timeliness {
            Validator::score("timeliness", timeliness)?;
        }
        if let Some(notes) = &feedback.notes {
            Validator::feedback_note(notes)?;
        }

        let feedback = &feedback;
        retry_busy(|| async move {
            let mut tx = self.pool().begin().await.map_err(map_sqlx_err)?;
            let task = require_task(&mut tx, task_id).await?;
            if task.status != TaskStatus::Completed {
                return Err(TmError::validation(
                    "feedback",
                    format!("task is {}, feedback applies to completed tasks", task.status),
                ));
            }

            // One record per task: provided fields overwrite, absent fields
            // keep their previous value
            sqlx::query(
                "UPDATE tasks SET feedback_quality = COALESCE(?, feedback_quality),
                        feedback_timeliness = COALESCE(?, feedback_timeliness),
                        feedback_notes = COALESCE(?, feedback_notes)
                 WHERE id = ?",
            )
            .bind(feedback.quality.map(|v| v as i64))
            .bind(feedback.timeliness.map(|v| v as i64))
            .bind(&feedback.notes)
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

            let updated = require_task(&mut tx, task_id).await?;
            tx.commit().await.map_err(map_sqlx_err)?;
            Ok(updated)
        })
        .await
    }

    async fn metrics(&self, period: Period) -> Result<Metrics> {
        let cutoff = period.cutoff(Utc::now());

        let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
            "SELECT t.id, t.feedback_quality, t.feedback_timeliness, t.estimated_hours,
                    t.actual_hours,
                    EXISTS(SELECT 1 FROM tasks o WHERE o.rework_of = t.id) AS was_reworked
             FROM tasks t WHERE t.status = 'completed'",
        );
        if let Some(cutoff) = cutoff {
            qb.push(" AND t.updated_at >= ");
            qb.push_bind(cutoff);
        }

        let rows = qb
            .build()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_err)?;

        let samples: Vec<TaskSample> = rows
            .iter()
            .map(|row| TaskSample {
                id: row.get("id"),
                feedback_quality: row.get::<Option<i64>, _>("feedback_quality").map(|v| v as u8),
                feedback_timeliness: row
                    .get::<Option<i64>, _>("feedback_timeliness")
                    .map(|v| v as u8),
                estimated_hours: row.get("estimated_hours"),
                actual_hours: row.get("actual_hours"),
                was_reworked: row.get::<bool, _>("was_reworked"),
            })
            .collect();

        Ok(metrics::aggregate(&samples))
    }
}
