//! Output rendering for every `--format` the commands accept.
//!
//! Human output is for terminals; JSON round-trips all observable fields;
//! Markdown groups by status; CSV/TSV are flat with multi-valued cells
//! semicolon-joined. An empty task set still renders a valid container in
//! every format.

use clap::ValueEnum;
use tm_core::models::{
    ContextView, Metrics, Notification, Task, TaskDetail, TaskStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
    Markdown,
    Csv,
    Tsv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OutputFormat::Human => "human",
            OutputFormat::Json => "json",
            OutputFormat::Markdown => "markdown",
            OutputFormat::Csv => "csv",
            OutputFormat::Tsv => "tsv",
        };
        f.write_str(name)
    }
}

const EXPORT_COLUMNS: [&str; 17] = [
    "id",
    "title",
    "status",
    "priority",
    "assignee",
    "created_at",
    "updated_at",
    "deadline",
    "estimated_hours",
    "actual_hours",
    "completion_summary",
    "feedback_quality",
    "feedback_timeliness",
    "tags",
    "deps",
    "dependents",
    "file_refs",
];

fn csv_escape(value: &str, delimiter: char) -> String {
    if value.contains(delimiter) || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

fn detail_row(detail: &TaskDetail) -> Vec<String> {
    let task = &detail.task;
    vec![
        task.id.clone(),
        task.title.clone(),
        task.status.to_string(),
        task.priority.to_string(),
        opt(&task.assignee),
        task.created_at.to_rfc3339(),
        task.updated_at.to_rfc3339(),
        task.deadline.map(|d| d.to_rfc3339()).unwrap_or_default(),
        opt(&task.estimated_hours),
        opt(&task.actual_hours),
        opt(&task.completion_summary),
        opt(&task.feedback_quality),
        opt(&task.feedback_timeliness),
        detail.tags.join(";"),
        detail
            .deps
            .iter()
            .map(|d| d.id.clone())
            .collect::<Vec<_>>()
            .join(";"),
        detail
            .dependents
            .iter()
            .map(|d| d.id.clone())
            .collect::<Vec<_>>()
            .join(";"),
        detail
            .file_refs
            .iter()
            .map(|r| match r.line_end {
                Some(end) => format!("{}:{}:{}", r.path, r.line_start, end),
                None => format!("{}:{}", r.path, r.line_start),
            })
            .collect::<Vec<_>>()
            .join(";"),
    ]
}

fn delimited(details: &[TaskDetail], delimiter: char) -> String {
    let mut out = String::new();
    out.push_str(
        &EXPORT_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(&delimiter.to_string()),
    );
    out.push('\n');
    for detail in details {
        let row: Vec<String> = detail_row(detail)
            .iter()
            .map(|v| csv_escape(v, delimiter))
            .collect();
        out.push_str(&row.join(&delimiter.to_string()));
        out.push('\n');
    }
    out
}

fn markdown(details: &[TaskDetail]) -> String {
    let mut out = String::from("# Tasks\n");
    for status in [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Blocked,
        TaskStatus::Completed,
        TaskStatus::Cancelled,
    ] {
        let group: Vec<&TaskDetail> =
            details.iter().filter(|d| d.task.status == status).collect();
        if group.is_empty() {
            continue;
        }
        out.push_str(&format!("\n## {status}\n\n"));
        for detail in group {
            let task = &detail.task;
            out.push_str(&format!("### {} `{}`\n\n", task.title, task.id));
            out.push_str(&format!("- priority: {}\n", task.priority));
            if let Some(assignee) = &task.assignee {
                out.push_str(&format!("- assignee: {assignee}\n"));
            }
            if !detail.deps.is_empty() {
                let ids: Vec<&str> = detail.deps.iter().map(|d| d.id.as_str()).collect();
                out.push_str(&format!("- depends on: {}\n", ids.join(", ")));
            }
            if !detail.tags.is_empty() {
                out.push_str(&format!("- tags: {}\n", detail.tags.join(", ")));
            }
            if let Some(summary) = &task.completion_summary {
                out.push_str(&format!("- summary: {summary}\n"));
            }
        }
    }
    if details.is_empty() {
        out.push_str("\n_No tasks._\n");
    }
    out
}

fn human_task_line(task: &Task) -> String {
    let assignee = task
        .assignee
        .as_deref()
        .map(|a| format!("  @{a}"))
        .unwrap_or_default();
    format!(
        "{}  {:<12} {:<8} {}{}",
        task.id, task.status, task.priority, task.title, assignee
    )
}

/// Render a task list (the `list` command).
pub fn tasks(tasks: &[Task], format: OutputFormat) -> String {
    match format {
        OutputFormat::Human => {
            if tasks.is_empty() {
                "no tasks".to_string()
            } else {
                tasks
                    .iter()
                    .map(human_task_line)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        OutputFormat::Json => serde_json::to_string_pretty(tasks).unwrap_or_else(|_| "[]".into()),
        // Structured formats want the full detail; the caller upgrades
        OutputFormat::Markdown | OutputFormat::Csv | OutputFormat::Tsv => {
            unreachable!("list renders structured formats through export()")
        }
    }
}

/// Render full task details (the `show` and `export` commands).
pub fn export(details: &[TaskDetail], format: OutputFormat) -> String {
    match format {
        OutputFormat::Human => {
            if details.is_empty() {
                return "no tasks".to_string();
            }
            details
                .iter()
                .map(|d| show(d))
                .collect::<Vec<_>>()
                .join("\n\n")
        }
        OutputFormat::Json => {
            serde_json::to_string_pretty(details).unwrap_or_else(|_| "[]".into())
        }
        OutputFormat::Markdown => markdown(details),
        OutputFormat::Csv => delimited(details, ','),
        OutputFormat::Tsv => delimited(details, '\t'),
    }
}

/// Render one task in full (the `show` command's human format).
pub fn show(detail: &TaskDetail) -> String {
    let task = &detail.task;
    let mut out = format!(
        "{}  {} [{} / {}]",
        task.id, task.title, task.status, task.priority
    );
    if let Some(assignee) = &task.assignee {
        out.push_str(&format!("\n  assignee: {assignee}"));
    }
    if let Some(description) = &task.description {
        out.push_str(&format!("\n  description: {description}"));
    }
    out.push_str(&format!("\n  created: {}", task.created_at.to_rfc3339()));
    if let Some(deadline) = task.deadline {
        out.push_str(&format!("\n  deadline: {}", deadline.to_rfc3339()));
    }
    if let Some(hours) = task.estimated_hours {
        out.push_str(&format!("\n  estimated hours: {hours}"));
    }
    if let Some(hours) = task.actual_hours {
        out.push_str(&format!("\n  actual hours: {hours}"));
    }
    if !detail.deps.is_empty() {
        out.push_str("\n  depends on:");
        for dep in &detail.deps {
            out.push_str(&format!("\n    {} {} [{}]", dep.id, dep.title, dep.status));
        }
    }
    if !detail.dependents.is_empty() {
        out.push_str("\n  dependents:");
        for dep in &detail.dependents {
            out.push_str(&format!("\n    {} {} [{}]", dep.id, dep.title, dep.status));
        }
    }
    if !detail.file_refs.is_empty() {
        out.push_str("\n  files:");
        for file_ref in &detail.file_refs {
            match file_ref.line_end {
                Some(end) => out.push_str(&format!(
                    "\n    {}:{}-{}",
                    file_ref.path, file_ref.line_start, end
                )),
                None => out.push_str(&format!("\n    {}:{}", file_ref.path, file_ref.line_start)),
            }
        }
    }
    if !detail.tags.is_empty() {
        out.push_str(&format!("\n  tags: {}", detail.tags.join(", ")));
    }
    if let Some(criteria) = &task.success_criteria {
        out.push_str("\n  success criteria:");
        for criterion in criteria {
            out.push_str(&format!("\n    - {}", criterion.criterion));
        }
    }
    if !detail.progress.is_empty() {
        out.push_str("\n  progress:");
        for entry in &detail.progress {
            out.push_str(&format!(
                "\n    {} {}: {}",
                entry.created_at.to_rfc3339(),
                entry.agent_id,
                entry.message
            ));
        }
    }
    if let Some(summary) = &task.completion_summary {
        out.push_str(&format!("\n  summary: {summary}"));
    }
    if let Some(quality) = task.feedback_quality {
        out.push_str(&format!("\n  feedback quality: {quality}/5"));
    }
    if let Some(timeliness) = task.feedback_timeliness {
        out.push_str(&format!("\n  feedback timeliness: {timeliness}/5"));
    }
    if let Some(notes) = &task.feedback_notes {
        out.push_str(&format!("\n  feedback notes: {notes}"));
    }
    out
}

/// Render a context view (the `context` command).
pub fn context(view: &ContextView, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(view).unwrap_or_else(|_| "{}".into());
    }
    let mut out = String::from("shared:");
    if view.shared.is_empty() {
        out.push_str("\n  (none)");
    }
    for entry in &view.shared {
        out.push_str(&format!(
            "\n  {} {} [{}] {}",
            entry.created_at.to_rfc3339(),
            entry.agent_id,
            entry.kind,
            entry.message
        ));
    }
    out.push_str("\n\nprivate:");
    if view.private_mine.is_empty() {
        out.push_str("\n  (none)");
    }
    for note in &view.private_mine {
        out.push_str(&format!(
            "\n  {} {}",
            note.created_at.to_rfc3339(),
            note.message
        ));
    }
    out.push_str("\n\nparticipants:");
    if view.participants.is_empty() {
        out.push_str("\n  (none)");
    }
    for participant in &view.participants {
        match &participant.role {
            Some(role) => out.push_str(&format!("\n  {} ({role})", participant.agent_id)),
            None => out.push_str(&format!("\n  {}", participant.agent_id)),
        }
    }
    out
}

/// Render notifications (the `watch` command).
pub fn notifications(items: &[Notification]) -> String {
    if items.is_empty() {
        return "no new notifications".to_string();
    }
    items
        .iter()
        .map(|n| {
            format!(
                "{} [{}] task={} {}",
                n.created_at.to_rfc3339(),
                n.kind,
                n.task_id.as_deref().unwrap_or("-"),
                n.message
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render the metrics report (the `metrics` command).
pub fn metrics(metrics: &Metrics, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(metrics).unwrap_or_else(|_| "{}".into());
    }
    let mut out = format!(
        "completed tasks:     {}\nwith feedback:       {}",
        metrics.completed_tasks, metrics.tasks_with_feedback
    );
    if let Some(quality) = metrics.avg_quality {
        out.push_str(&format!("\navg quality:         {quality:.2}"));
    }
    if let Some(timeliness) = metrics.avg_timeliness {
        out.push_str(&format!("\navg timeliness:      {timeliness:.2}"));
    }
    if let Some(accuracy) = metrics.estimation_accuracy {
        out.push_str(&format!("\nestimation accuracy: {accuracy:.2}"));
    }
    if let Some(rework) = metrics.rework_correlation {
        out.push_str(&format!("\nrework correlation:  {rework:.2}"));
    }
    out
}
