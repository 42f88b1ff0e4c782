use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A task record in the orchestrator store.
///
/// Tasks are identified by an 8-character hex id and move through a fixed
/// lifecycle. A task whose dependencies are not all completed is `Blocked`;
/// completing the last unmet dependency flips it back to `Pending`
/// automatically, never by hand.
///
/// The core-loop fields (`success_criteria` through `rework_of`) were added
/// by a later schema migration and are nullable so that records written
/// before the migration stay valid.
///
/// # Examples
///
/// ```rust
/// use tm_core::models::{Task, TaskStatus};
///
/// let task = Task::sample("a1b2c3d4", "Fix login bug");
/// assert_eq!(task.status, TaskStatus::Pending);
/// assert!(task.can_transition_to(TaskStatus::InProgress, false));
/// assert!(!task.can_transition_to(TaskStatus::Completed, false));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// 8 hex chars, generated from 4 random bytes
    pub id: String,
    /// Non-empty, at most 500 chars after trimming
    pub title: String,
    /// Optional free text; intent markers (WHY:/WHAT:/DONE:) live here
    pub description: Option<String>,
    /// Current lifecycle status
    pub status: TaskStatus,
    /// Scheduling hint only; never affects blocking
    pub priority: Priority,
    /// Agent the task is assigned to, if any
    pub assignee: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,

    // Core-loop fields, all nullable (schema migration 002)
    /// Acceptance criteria checked on `complete --validate`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<Vec<SuccessCriterion>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_hours: Option<f64>,
    /// 20-2000 chars when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_summary: Option<String>,
    /// 1-5
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_quality: Option<u8>,
    /// 1-5
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_timeliness: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_notes: Option<String>,
    /// Id of the task this one redoes, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rework_of: Option<String>,
}

/// Task lifecycle statuses.
///
/// Manual transitions are restricted (see [`Task::can_transition_to`]):
///
/// - `Pending` ↔ `InProgress`
/// - `Pending` ↔ `Cancelled`
/// - `InProgress` → `Blocked`, `Cancelled`
/// - `Completed` → `InProgress` only with the explicit reopen flag
///
/// `Blocked` ↔ `Pending` is reserved to the dependency engine, and
/// `Completed` is reachable only through the complete operation so that the
/// criteria gate and the dependency cascade cannot be skipped.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "blocked" => Some(TaskStatus::Blocked),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority. Default is `Medium`.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Priority> {
        match s {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "critical" => Some(Priority::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source-file reference attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRef {
    pub path: String,
    /// 1-based
    pub line_start: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_end: Option<u32>,
}

impl FileRef {
    /// Swap an inverted range so `line_end >= line_start` always holds.
    pub fn normalized(mut self) -> Self {
        if let Some(end) = self.line_end {
            if end < self.line_start {
                self.line_end = Some(self.line_start);
                self.line_start = end;
            }
        }
        self
    }
}

/// One acceptance criterion on a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuccessCriterion {
    pub criterion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurable: Option<String>,
}

/// Data for creating a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub deps: Vec<String>,
    pub file_refs: Vec<FileRef>,
    pub assignee: Option<String>,
    pub criteria: Option<Vec<SuccessCriterion>>,
    pub deadline: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
    pub tags: Vec<String>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Fields updatable through the update operation. Only non-None fields are
/// applied. `reopen` authorizes the otherwise-forbidden
/// `completed → in_progress` move.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub assignee: Option<String>,
    pub reopen: bool,
}

/// Filter criteria for listing tasks. Fields combine with AND; results are
/// ordered by `created_at` ascending.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assignee: Option<String>,
    pub has_deps: Option<bool>,
    pub limit: Option<u32>,
}

/// Abbreviated view of a neighbor in the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepSummary {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
}

/// Full task view returned by the show operation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub deps: Vec<DepSummary>,
    pub dependents: Vec<DepSummary>,
    pub file_refs: Vec<FileRef>,
    pub tags: Vec<String>,
    pub progress: Vec<ProgressEntry>,
}

/// Kinds of shared-context entries.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Update,
    Discovery,
    Decision,
    Sync,
}

impl ContextKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Update => "update",
            ContextKind::Discovery => "discovery",
            ContextKind::Decision => "decision",
            ContextKind::Sync => "sync",
        }
    }

    pub fn parse(s: &str) -> Option<ContextKind> {
        match s {
            "update" => Some(ContextKind::Update),
            "discovery" => Some(ContextKind::Discovery),
            "decision" => Some(ContextKind::Decision),
            "sync" => Some(ContextKind::Sync),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a task's shared context log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextEntry {
    pub id: i64,
    pub task_id: String,
    pub agent_id: String,
    pub kind: ContextKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// A private note. Readable only by the authoring agent; the read path
/// filters by `(task_id, agent_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrivateNote {
    pub id: i64,
    pub task_id: String,
    pub agent_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// A recorded participant on a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub task_id: String,
    pub agent_id: String,
    pub role: Option<String>,
    pub joined_at: DateTime<Utc>,
}

/// Combined context view for one task, from one agent's perspective.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContextView {
    pub shared: Vec<ContextEntry>,
    pub private_mine: Vec<PrivateNote>,
    pub participants: Vec<Participant>,
}

/// Notification kinds written by the orchestrator.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TaskCompleted,
    TaskUnblocked,
    TaskAssigned,
    ImpactReview,
    SyncPoint,
    Discovery,
    NotificationsTruncated,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::TaskCompleted => "task_completed",
            NotificationKind::TaskUnblocked => "task_unblocked",
            NotificationKind::TaskAssigned => "task_assigned",
            NotificationKind::ImpactReview => "impact_review",
            NotificationKind::SyncPoint => "sync_point",
            NotificationKind::Discovery => "discovery",
            NotificationKind::NotificationsTruncated => "notifications_truncated",
        }
    }

    pub fn parse(s: &str) -> Option<NotificationKind> {
        match s {
            "task_completed" => Some(NotificationKind::TaskCompleted),
            "task_unblocked" => Some(NotificationKind::TaskUnblocked),
            "task_assigned" => Some(NotificationKind::TaskAssigned),
            "impact_review" => Some(NotificationKind::ImpactReview),
            "sync_point" => Some(NotificationKind::SyncPoint),
            "discovery" => Some(NotificationKind::Discovery),
            "notifications_truncated" => Some(NotificationKind::NotificationsTruncated),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification row. `recipient = None` is a broadcast, visible to every
/// agent until that agent has read it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: i64,
    pub recipient: Option<String>,
    pub task_id: Option<String>,
    pub kind: NotificationKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// One entry in a task's progress log. Advisory; never changes status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEntry {
    pub id: i64,
    pub task_id: String,
    pub agent_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Feedback scores for a completed task. At most one record per task.
#[derive(Debug, Clone, Default)]
pub struct Feedback {
    pub quality: Option<u8>,
    pub timeliness: Option<u8>,
    pub notes: Option<String>,
}

/// Options for the complete operation.
#[derive(Debug, Clone, Default)]
pub struct CompleteOptions {
    /// Evaluate success criteria before completing
    pub validate: bool,
    /// Per-criterion confirmations supplied by the caller, in order
    pub confirmations: Option<Vec<bool>>,
    /// Complete even if criteria fail or stay unconfirmed
    pub force: bool,
    pub summary: Option<String>,
    pub actual_hours: Option<f64>,
    /// Broadcast an impact-review notification when the task has file refs
    pub impact_review: bool,
}

/// Outcome of a criterion check during validated completion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    /// Not automatically checkable and not confirmed by the caller
    Manual,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Pass => f.write_str("pass"),
            CheckStatus::Fail => f.write_str("fail"),
            CheckStatus::Manual => f.write_str("manual"),
        }
    }
}

/// Per-criterion line of a validation report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CriterionCheck {
    pub criterion: String,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Full validation report produced on `complete --validate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CriteriaReport {
    pub checks: Vec<CriterionCheck>,
}

impl CriteriaReport {
    /// True when every criterion passed.
    pub fn satisfied(&self) -> bool {
        self.checks.iter().all(|c| c.status == CheckStatus::Pass)
    }
}

impl std::fmt::Display for CriteriaReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, check) in self.checks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "[{}] {}", check.status, check.criterion)?;
            if let Some(detail) = &check.detail {
                write!(f, " ({detail})")?;
            }
        }
        Ok(())
    }
}

/// Result of a successful (or idempotent) complete operation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionResult {
    pub task: Task,
    /// Ids of dependents flipped from blocked to pending by the cascade
    pub unblocked: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<CriteriaReport>,
    /// True when the task was already completed and nothing changed
    pub already_completed: bool,
}

/// Aggregation window for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Period {
    #[default]
    All,
    Month,
    Week,
}

impl Period {
    /// Inclusive lower bound of the window, if any.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Period::All => None,
            Period::Month => Some(now - Duration::days(30)),
            Period::Week => Some(now - Duration::days(7)),
        }
    }

    pub fn parse(s: &str) -> Option<Period> {
        match s {
            "all" => Some(Period::All),
            "month" => Some(Period::Month),
            "week" => Some(Period::Week),
            _ => None,
        }
    }
}

/// Aggregated core-loop metrics over a window.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Metrics {
    pub completed_tasks: u64,
    pub tasks_with_feedback: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_quality: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_timeliness: Option<f64>,
    /// `1 - mean(|est - act| / max(est, act))`, in [0, 1]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimation_accuracy: Option<f64>,
    /// Share of low-quality tasks that got reworked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rework_correlation: Option<f64>,
}

impl Task {
    /// Whether a manual status change is allowed.
    ///
    /// `Blocked → Pending` belongs to the dependency engine and `Completed`
    /// is reachable only through the complete operation, so both are
    /// rejected here regardless of flags. `reopen` authorizes
    /// `Completed → InProgress`.
    pub fn can_transition_to(&self, new: TaskStatus, reopen: bool) -> bool {
        use TaskStatus::*;

        match (self.status, new) {
            (current, new) if current == new => false,
            (Pending, InProgress) => true,
            (InProgress, Pending) => true,
            (Pending, Cancelled) => true,
            (Cancelled, Pending) => true,
            (InProgress, Blocked | Cancelled) => true,
            (Completed, InProgress) => reopen,
            _ => false,
        }
    }

    /// Whether the complete operation may run (idempotent re-complete is
    /// handled separately by the repository).
    pub fn completable(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::InProgress)
    }

    /// Fixture constructor used by unit tests and doc examples.
    pub fn sample(id: &str, title: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: None,
            status: TaskStatus::Pending,
            priority: Priority::default(),
            assignee: None,
            created_at: now,
            updated_at: now,
            success_criteria: None,
            deadline: None,
            estimated_hours: None,
            actual_hours: None,
            completion_summary: None,
            feedback_quality: None,
            feedback_timeliness: None,
            feedback_notes: None,
            rework_of: None,
        }
    }
}
