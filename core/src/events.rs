//! Commit-event capability.
//!
//! Compound operations announce what they committed through an
//! [`EventSink`]. The store stays the single source of truth; sinks only
//! observe. Emission is synchronous but must be cheap: implementations do
//! best-effort work (filesystem mirrors, hook scripts) and swallow their
//! own failures. The core never fails an operation because a sink did.

use crate::models::{ContextEntry, Notification, PrivateNote, TaskStatus};

/// A committed change worth projecting outside the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TaskCreated {
        task_id: String,
        title: String,
    },
    TaskStatusChanged {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
    TaskDeleted {
        task_id: String,
    },
    NotificationEmitted(Notification),
    ContextShared(ContextEntry),
    NoteAdded(PrivateNote),
}

/// Observer of committed changes. `emit` must not block or fail loudly.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Sink that drops everything; the default when no projector is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &Event) {}
}
