mod commands;
mod format;
mod logging;
mod mirror;
mod setup;

use clap::{Parser, Subcommand};
use format::OutputFormat;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tm")]
#[command(about = "Local task orchestrator for cooperating agents")]
#[command(version)]
pub struct Cli {
    /// Agent identity (overrides TM_AGENT_ID)
    #[arg(long, global = true)]
    pub agent: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the state directory, open the store, run migrations
    Init,

    /// Create a task; prints the new task id
    Add {
        title: String,
        #[arg(short = 'd', long)]
        description: Option<String>,
        #[arg(short = 'p', long)]
        priority: Option<String>,
        /// Task ids this one depends on
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
        /// File reference as path[:line[:line_end]]
        #[arg(long = "file")]
        file: Vec<String>,
        #[arg(long)]
        assignee: Option<String>,
        /// Success criteria as a JSON array
        #[arg(long)]
        criteria: Option<String>,
        /// ISO-8601 deadline
        #[arg(long)]
        deadline: Option<String>,
        #[arg(long = "estimated-hours")]
        estimated_hours: Option<f64>,
        #[arg(long = "tag")]
        tag: Vec<String>,
    },

    /// List tasks
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        /// Only tasks that have dependencies
        #[arg(long = "has-deps")]
        has_deps: bool,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Show one task in full
    Show {
        id: String,
        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Change status, priority, assignee, or add a dependency
    Update {
        id: String,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        /// Allow reopening a completed task
        #[arg(long)]
        reopen: bool,
        /// Add a dependency on an existing task
        #[arg(long = "depends-on")]
        depends_on: Option<String>,
    },

    /// Complete a task and cascade-unblock its dependents
    Complete {
        id: String,
        /// Evaluate success criteria before completing
        #[arg(long)]
        validate: bool,
        /// Per-criterion confirmations, e.g. --confirm true,false
        #[arg(long, value_delimiter = ',')]
        confirm: Vec<bool>,
        /// Complete even when criteria fail
        #[arg(long)]
        force: bool,
        #[arg(long)]
        summary: Option<String>,
        #[arg(long = "actual-hours")]
        actual_hours: Option<f64>,
        /// Broadcast an impact-review request when file refs exist
        #[arg(long = "impact-review")]
        impact_review: bool,
    },

    /// Reassign a task
    Assign { id: String, assignee: String },

    /// Delete a task (and dependents with --cascade)
    Delete {
        id: String,
        #[arg(long)]
        cascade: bool,
    },

    /// Export tasks
    Export {
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
        #[arg(long)]
        status: Option<String>,
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Record participation on a task
    Join {
        id: String,
        #[arg(long)]
        role: Option<String>,
    },

    /// Append to a task's shared context
    Share {
        id: String,
        message: String,
        #[arg(long = "type", default_value = "update")]
        kind: String,
    },

    /// Append a private note only you can read
    Note { id: String, message: String },

    /// Share a discovery and broadcast it
    Discover {
        id: String,
        message: String,
        #[arg(long)]
        impact: Option<String>,
        #[arg(long = "tag")]
        tag: Vec<String>,
    },

    /// Record a sync checkpoint and broadcast it
    Sync { id: String, checkpoint: String },

    /// Show shared context, your notes, and participants
    Context {
        id: String,
        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Read and mark your unread notifications
    Watch {
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Append a progress update
    Progress { id: String, message: String },

    /// Score a completed task
    Feedback {
        id: String,
        #[arg(long)]
        quality: Option<u8>,
        #[arg(long)]
        timeliness: Option<u8>,
        #[arg(long)]
        note: Option<String>,
    },

    /// Aggregated core-loop metrics
    Metrics {
        /// Include feedback aggregates (on by default)
        #[arg(long)]
        feedback: bool,
        #[arg(long, default_value = "all")]
        period: String,
        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Longest path through the dependency graph by estimated hours
    CriticalPath {
        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Show or change feature toggles and enforcement settings
    Config {
        #[arg(long)]
        show: bool,
        #[arg(long)]
        enable: Option<String>,
        #[arg(long)]
        disable: Option<String>,
        /// Disable every core-loop feature at once
        #[arg(long = "minimal-mode")]
        minimal_mode: bool,
        #[arg(long)]
        reset: bool,
        #[arg(long = "enforce-orchestration")]
        enforce_orchestration: Option<bool>,
        #[arg(long = "enforcement-level")]
        enforcement_level: Option<String>,
        #[arg(long = "show-enforcement")]
        show_enforcement: bool,
    },

    /// Migration status, apply, or rollback
    Migrate {
        #[arg(long)]
        status: bool,
        #[arg(long)]
        apply: bool,
        #[arg(long)]
        rollback: bool,
    },

    /// Check orchestration preconditions and audit the dependency graph
    ValidateOrchestration,

    /// Print (or interactively apply) fixes for orchestration violations
    FixOrchestration {
        #[arg(long)]
        interactive: bool,
    },
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();

    if let Err(e) = commands::run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code() as i32);
    }
}
