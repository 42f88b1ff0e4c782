use crate::{
    error::Result,
    graph::GraphAnomaly,
    models::{
        CompleteOptions, CompletionResult, ContextKind, ContextView, Feedback, Metrics, NewTask,
        Notification, Period, ProgressEntry, Task, TaskDetail, TaskFilter, TaskPatch,
    },
};
use async_trait::async_trait;

/// Task persistence and lifecycle operations.
///
/// Implementations must be safe for concurrent use across processes: any
/// compound write (create with dependency checks, complete with cascade,
/// delete with cleanup) runs inside one transaction under the cross-process
/// state lock. Two concurrent mutations of the same task serialize; reads
/// proceed in parallel.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Create a task with its edges, file refs, and tags in one transaction.
    ///
    /// The initial status is `blocked` when any declared dependency is not
    /// completed, else `pending`. Fails with `UnknownDependency` for a
    /// missing dep id, `CycleDetected` when an edge would close a cycle,
    /// and `Validation` for malformed fields. Failure leaves the store
    /// unchanged.
    async fn add(&self, task: NewTask) -> Result<Task>;

    /// List tasks. Filters AND together; results order by `created_at`
    /// ascending.
    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>>;

    /// Full task view: deps, dependents, refs, tags, progress log.
    /// Fails with `NotFound` for an unknown id.
    async fn show(&self, id: &str) -> Result<TaskDetail>;

    /// Apply a manual patch (status, priority, assignee).
    ///
    /// Status changes go through the transition matrix; moving to
    /// `completed` is rejected here (callers use [`Self::complete`]) and
    /// `blocked`/`pending` flips driven by dependencies are rejected too.
    /// Reassignment emits a notification to the new assignee.
    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Task>;

    /// Complete a task and cascade-unblock its dependents atomically.
    ///
    /// Preconditions: status `pending` or `in_progress`. Re-completing a
    /// completed task is an idempotent no-op (no notifications). When the
    /// task has success criteria and `validate` is set, the criteria gate
    /// runs first and `CriteriaUnmet` aborts the whole operation.
    async fn complete(&self, id: &str, opts: CompleteOptions) -> Result<CompletionResult>;

    /// Delete a task and every satellite row in one transaction.
    ///
    /// Fails with `DependentsExist` when other tasks depend on this one
    /// and `cascade` is false; with `cascade`, dependents are deleted
    /// recursively.
    async fn delete(&self, id: &str, cascade: bool) -> Result<()>;

    /// Reassign a task and notify the new assignee.
    async fn assign(&self, id: &str, agent_id: &str) -> Result<Task>;

    /// Add a dependency edge between two existing tasks.
    ///
    /// Idempotent for an existing edge. Fails with `UnknownDependency`
    /// when the target does not exist and `CycleDetected` (including the
    /// trivial self-dependency) when the edge would close a cycle. When
    /// the new dependency is unmet, the task flips to `blocked`.
    async fn add_dependency(&self, task_id: &str, depends_on_id: &str) -> Result<Task>;

    /// Longest path through the DAG by estimated hours; reporting only.
    async fn critical_path(&self) -> Result<Vec<Task>>;

    /// Defensive full-graph audit; empty under normal operation.
    async fn audit_graph(&self) -> Result<Vec<GraphAnomaly>>;
}

/// Shared context, private notes, and participation.
#[async_trait]
pub trait CollaborationRepository: Send + Sync {
    /// Record participation; calling twice is a no-op.
    async fn join(&self, task_id: &str, agent_id: &str, role: Option<&str>) -> Result<()>;

    /// Append to the shared context log. Returns the stored entry.
    async fn share(
        &self,
        task_id: &str,
        agent_id: &str,
        kind: ContextKind,
        message: &str,
    ) -> Result<crate::models::ContextEntry>;

    /// Append to the calling agent's private notes; invisible to others.
    async fn note(
        &self,
        task_id: &str,
        agent_id: &str,
        message: &str,
    ) -> Result<crate::models::PrivateNote>;

    /// Append a sync checkpoint to shared context and broadcast a
    /// `sync_point` notification.
    async fn sync(
        &self,
        task_id: &str,
        agent_id: &str,
        checkpoint: &str,
    ) -> Result<crate::models::ContextEntry>;

    /// Append a discovery to shared context and broadcast a `discovery`
    /// notification. `impact` and `tags` enrich the broadcast message.
    async fn discover(
        &self,
        task_id: &str,
        agent_id: &str,
        message: &str,
        impact: Option<&str>,
        tags: &[String],
    ) -> Result<crate::models::ContextEntry>;

    /// Shared log (chronological), the caller's own notes, participants.
    async fn context(&self, task_id: &str, agent_id: &str) -> Result<ContextView>;
}

/// Notification write and read-and-mark paths.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Write one notification. `recipient = None` broadcasts. Generation
    /// is capped per task; past the cap a single `notifications_truncated`
    /// marker replaces further rows and `Ok(None)` is returned.
    async fn emit(
        &self,
        recipient: Option<&str>,
        task_id: Option<&str>,
        kind: crate::models::NotificationKind,
        message: &str,
    ) -> Result<Option<i64>>;

    /// Unread notifications for this agent (unicast plus broadcasts),
    /// oldest first, marked read in the same transaction.
    async fn watch(&self, agent_id: &str, limit: Option<u32>) -> Result<Vec<Notification>>;
}

/// Progress log, feedback, and metrics.
#[async_trait]
pub trait CoreLoopRepository: Send + Sync {
    /// Append a progress entry. Advisory; never touches status.
    async fn progress(&self, task_id: &str, agent_id: &str, message: &str)
        -> Result<ProgressEntry>;

    /// Write or update the task's single feedback record. Only valid for
    /// completed tasks.
    async fn feedback(&self, task_id: &str, feedback: Feedback) -> Result<Task>;

    /// Aggregate core-loop metrics over the window.
    async fn metrics(&self, period: Period) -> Result<Metrics>;
}
