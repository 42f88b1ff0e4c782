//! Orchestrator Core Library
//!
//! Foundational domain models, error taxonomy, validation, and trait
//! interfaces for the task orchestrator. The database and CLI crates
//! depend on the types defined here.
//!
//! # Architecture
//!
//! - [`models`] - Domain models (Task, TaskStatus, notifications, ...)
//! - [`error`] - Closed error taxonomy and result alias
//! - [`validation`] - Field validators shared by repository and CLI
//! - [`graph`] - Pure dependency-graph algorithms
//! - [`criteria`] - Success-criteria evaluation
//! - [`metrics`] - Core-loop aggregation math
//! - [`repository`] - Async repository traits
//! - [`identity`] - Agent identity resolution
//! - [`settings`] - Feature toggles and enforcement configuration
//! - [`enforcement`] - Pre-operation gate
//! - [`events`] - Commit-event sink capability
//! - [`telemetry`] - Local usage-event log
//! - [`paths`] - State-directory layout

pub mod criteria;
pub mod enforcement;
pub mod error;
pub mod events;
pub mod graph;
pub mod identity;
pub mod metrics;
pub mod models;
pub mod paths;
pub mod repository;
pub mod settings;
pub mod telemetry;
pub mod validation;

// Re-export the types nearly every caller touches
pub use error::{Result, TmError};
pub use models::{
    CompleteOptions, CompletionResult, NewTask, Notification, Priority, Task, TaskDetail,
    TaskFilter, TaskPatch, TaskStatus,
};
pub use repository::{
    CollaborationRepository, CoreLoopRepository, NotificationRepository, TaskRepository,
};
pub use settings::Settings;
pub use validation::Validator;

/// Current version of the core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
