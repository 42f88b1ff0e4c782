use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tm_core::error::{Result, TmError};
use tm_core::models::{
    ContextEntry, ContextKind, Notification, NotificationKind, Participant, PrivateNote, Priority,
    ProgressEntry, SuccessCriterion, Task, TaskStatus,
};

/// Column list for full task selects, in `row_to_task` order.
pub const TASK_COLUMNS: &str = "id, title, description, status, priority, assignee, created_at, \
     updated_at, success_criteria, deadline, estimated_hours, actual_hours, completion_summary, \
     feedback_quality, feedback_timeliness, feedback_notes, rework_of";

pub fn status_from_db(s: &str) -> Result<TaskStatus> {
    TaskStatus::parse(s)
        .ok_or_else(|| TmError::Database(format!("invalid task status in database: {s}")))
}

pub fn priority_from_db(s: &str) -> Result<Priority> {
    Priority::parse(s)
        .ok_or_else(|| TmError::Database(format!("invalid priority in database: {s}")))
}

pub fn context_kind_from_db(s: &str) -> Result<ContextKind> {
    ContextKind::parse(s)
        .ok_or_else(|| TmError::Database(format!("invalid context kind in database: {s}")))
}

pub fn notification_kind_from_db(s: &str) -> Result<NotificationKind> {
    NotificationKind::parse(s)
        .ok_or_else(|| TmError::Database(format!("invalid notification kind in database: {s}")))
}

/// Convert a full task row into the model.
pub fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let status_str: String = row.get("status");
    let priority_str: String = row.get("priority");

    let criteria: Option<Vec<SuccessCriterion>> = row
        .get::<Option<String>, _>("success_criteria")
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| TmError::Database(format!("invalid criteria JSON in database: {e}")))
        })
        .transpose()?;

    let feedback_quality: Option<i64> = row.get("feedback_quality");
    let feedback_timeliness: Option<i64> = row.get("feedback_timeliness");

    Ok(Task {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        status: status_from_db(&status_str)?,
        priority: priority_from_db(&priority_str)?,
        assignee: row.get("assignee"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
        success_criteria: criteria,
        deadline: row.get::<Option<DateTime<Utc>>, _>("deadline"),
        estimated_hours: row.get("estimated_hours"),
        actual_hours: row.get("actual_hours"),
        completion_summary: row.get("completion_summary"),
        feedback_quality: feedback_quality.map(|v| v as u8),
        feedback_timeliness: feedback_timeliness.map(|v| v as u8),
        feedback_notes: row.get("feedback_notes"),
        rework_of: row.get("rework_of"),
    })
}

pub fn row_to_context_entry(row: &SqliteRow) -> Result<ContextEntry> {
    let kind_str: String = row.get("kind");
    Ok(ContextEntry {
        id: row.get("id"),
        task_id: row.get("task_id"),
        agent_id: row.get("agent_id"),
        kind: context_kind_from_db(&kind_str)?,
        message: row.get("message"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}

pub fn row_to_private_note(row: &SqliteRow) -> PrivateNote {
    PrivateNote {
        id: row.get("id"),
        task_id: row.get("task_id"),
        agent_id: row.get("agent_id"),
        message: row.get("message"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    }
}

pub fn row_to_participant(row: &SqliteRow) -> Participant {
    Participant {
        task_id: row.get("task_id"),
        agent_id: row.get("agent_id"),
        role: row.get("role"),
        joined_at: row.get::<DateTime<Utc>, _>("joined_at"),
    }
}

pub fn row_to_notification(row: &SqliteRow) -> Result<Notification> {
    let kind_str: String = row.get("kind");
    Ok(Notification {
        id: row.get("id"),
        recipient: row.get("recipient"),
        task_id: row.get("task_id"),
        kind: notification_kind_from_db(&kind_str)?,
        message: row.get("message"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}

pub fn row_to_progress(row: &SqliteRow) -> ProgressEntry {
    ProgressEntry {
        id: row.get("id"),
        task_id: row.get("task_id"),
        agent_id: row.get("agent_id"),
        message: row.get("message"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    }
}

/// Map an sqlx error onto the core taxonomy. BUSY/LOCKED become `Busy` so
/// the retry helper can take another pass; everything else is `Database`.
pub fn map_sqlx_err(err: sqlx::Error) -> TmError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().unwrap_or_default();
            let message = db_err.message();
            // SQLITE_BUSY = 5, SQLITE_LOCKED = 6; extended codes carry the
            // primary code in their low byte (e.g. BUSY_SNAPSHOT = 261)
            let primary = code.parse::<u32>().ok().map(|c| c & 0xff);
            if matches!(primary, Some(5) | Some(6))
                || message.contains("database is locked")
                || message.contains("database table is locked")
            {
                TmError::Busy
            } else {
                TmError::Database(format!("database error: {message}"))
            }
        }
        sqlx::Error::PoolTimedOut => TmError::Busy,
        sqlx::Error::Io(io_err) if io_err.kind() == std::io::ErrorKind::PermissionDenied => {
            TmError::PermissionDenied(io_err.to_string())
        }
        sqlx::Error::Io(io_err) => TmError::Database(format!("database I/O error: {io_err}")),
        _ => TmError::Database(format!("database operation failed: {err}")),
    }
}
