//! Filesystem projections of store state for external observers.
//!
//! Renders notifications, shared context, and private notes into plain
//! files under the state directory (`notifications/`, `context/`,
//! `agents/notes/`). The store remains the source of truth; everything
//! here is best-effort and a write failure only logs a warning.

use std::io::Write;
use std::path::{Path, PathBuf};
use tm_core::events::{Event, EventSink};

pub struct FsMirror {
    state_dir: PathBuf,
}

impl FsMirror {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    fn append_line(&self, relative: &Path, line: &str) {
        let path = self.state_dir.join(relative);
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            writeln!(file, "{line}")
        })();
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "mirror write failed");
        }
    }
}

impl EventSink for FsMirror {
    fn emit(&self, event: &Event) {
        match event {
            Event::NotificationEmitted(n) => {
                let bucket = n.recipient.as_deref().unwrap_or("broadcast");
                self.append_line(
                    &Path::new("notifications").join(format!("{bucket}.log")),
                    &format!(
                        "{} [{}] task={} {}",
                        n.created_at.to_rfc3339(),
                        n.kind,
                        n.task_id.as_deref().unwrap_or("-"),
                        n.message
                    ),
                );
            }
            Event::ContextShared(entry) => {
                self.append_line(
                    &Path::new("context").join(format!("{}.log", entry.task_id)),
                    &format!(
                        "{} {} [{}] {}",
                        entry.created_at.to_rfc3339(),
                        entry.agent_id,
                        entry.kind,
                        entry.message
                    ),
                );
            }
            Event::NoteAdded(note) => {
                self.append_line(
                    &Path::new("agents")
                        .join("notes")
                        .join(&note.agent_id)
                        .join(format!("{}.log", note.task_id)),
                    &format!("{} {}", note.created_at.to_rfc3339(), note.message),
                );
            }
            // Task lifecycle events have no file projection
            Event::TaskCreated { .. }
            | Event::TaskStatusChanged { .. }
            | Event::TaskDeleted { .. } => {}
        }
    }
}
