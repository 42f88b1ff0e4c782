use crate::enforcement::Violation;
use crate::models::{CriteriaReport, TaskStatus};
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, TmError>;

/// Closed error taxonomy for the orchestrator core.
///
/// Every failure mode an operation can surface to the CLI is one of these
/// variants; each maps to a process exit code via [`TmError::exit_code`]
/// (0 success, 1 general, 2 validation, 3 store, 4 dependency graph,
/// 5 permission).
///
/// # Examples
///
/// ```rust
/// use tm_core::error::TmError;
///
/// let err = TmError::not_found("task", "a1b2c3d4");
/// assert!(err.is_not_found());
/// assert_eq!(err.exit_code(), 2);
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TmError {
    /// Malformed or out-of-bounds input
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Referenced entity does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// Disallowed status change
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    /// A declared dependency id does not exist
    #[error("unknown dependency: {id}")]
    UnknownDependency { id: String },

    /// The requested edge would close a cycle
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    /// Deletion refused because other tasks depend on this one
    #[error("tasks depend on this one: {}", ids.join(", "))]
    DependentsExist { ids: Vec<String> },

    /// Validated completion failed its criteria checks
    #[error("success criteria unmet:\n{report}")]
    CriteriaUnmet { report: CriteriaReport },

    /// Advisory lock not acquired within the bounded wait
    #[error("could not acquire state lock{}", held_by.map(|pid| format!(" (held by pid {pid})")).unwrap_or_default())]
    LockTimeout { held_by: Option<u32> },

    /// Transient contention that exhausted the retry budget
    #[error("store is busy; retry later")]
    Busy,

    /// Integrity check failed at open; never repaired silently
    #[error("store failed integrity check; restore a backup with 'tm migrate --rollback'")]
    CorruptStore,

    /// Store path unwritable or unopenable
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Filesystem permissions prevented the operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A migration step failed; the store was rolled back
    #[error("migration {version:03} failed: {reason}")]
    MigrationFailed { version: u32, reason: String },

    /// Strict-level enforcement refused to run the operation
    #[error("orchestration preconditions not met ({} violation(s))", violations.len())]
    EnforcementBlocked { violations: Vec<Violation> },

    /// Database operation failure not covered by a more specific variant
    #[error("database error: {0}")]
    Database(String),

    /// Internal invariant failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl TmError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn empty_field(field: &str) -> Self {
        Self::validation(field, "must not be empty")
    }

    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn task_not_found(id: impl Into<String>) -> Self {
        Self::not_found("task", id)
    }

    pub fn invalid_transition(from: TaskStatus, to: TaskStatus) -> Self {
        Self::InvalidTransition { from, to }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TmError::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, TmError::Validation { .. })
    }

    pub fn is_contention(&self) -> bool {
        matches!(self, TmError::Busy | TmError::LockTimeout { .. })
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            TmError::Validation { .. }
            | TmError::NotFound { .. }
            | TmError::InvalidTransition { .. }
            | TmError::CriteriaUnmet { .. } => 2,
            TmError::UnknownDependency { .. }
            | TmError::CycleDetected { .. }
            | TmError::DependentsExist { .. } => 4,
            TmError::LockTimeout { .. }
            | TmError::Busy
            | TmError::CorruptStore
            | TmError::StorageUnavailable(_)
            | TmError::MigrationFailed { .. } => 3,
            TmError::PermissionDenied(_) => 5,
            TmError::EnforcementBlocked { .. } | TmError::Database(_) | TmError::Internal(_) => 1,
        }
    }
}
