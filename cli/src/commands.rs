use crate::format::{self, OutputFormat};
use crate::mirror::FsMirror;
use crate::setup;
use crate::{Cli, Command};
use chrono::{DateTime, Utc};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tm_core::enforcement::{self, GateInput, Verdict};
use tm_core::error::{Result, TmError};
use tm_core::models::{
    CompleteOptions, ContextKind, Feedback, FileRef, NewTask, Period, Priority, TaskFilter,
    TaskPatch, TaskStatus,
};
use tm_core::paths;
use tm_core::repository::{
    CollaborationRepository, CoreLoopRepository, NotificationRepository, TaskRepository,
};
use tm_core::settings::{EnforcementLevel, Feature, Settings};
use tm_core::telemetry::TelemetryLog;
use tm_core::{identity, validation::Validator};
use tm_database::{MigrationManager, SqliteRepository, StateLock, Store};

fn lock_timeout() -> Duration {
    std::env::var(paths::LOCK_TIMEOUT_VAR)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(5))
}

fn parse_status(raw: &str) -> Result<TaskStatus> {
    TaskStatus::parse(raw).ok_or_else(|| {
        TmError::validation(
            "status",
            format!("'{raw}' is not one of pending, in_progress, completed, blocked, cancelled"),
        )
    })
}

fn parse_priority(raw: &str) -> Result<Priority> {
    Priority::parse(raw).ok_or_else(|| {
        TmError::validation(
            "priority",
            format!("'{raw}' is not one of low, medium, high, critical"),
        )
    })
}

fn parse_period(raw: &str) -> Result<Period> {
    Period::parse(raw)
        .ok_or_else(|| TmError::validation("period", format!("'{raw}' is not one of all, month, week")))
}

fn parse_share_kind(raw: &str) -> Result<ContextKind> {
    match ContextKind::parse(raw) {
        Some(kind) if kind != ContextKind::Sync => Ok(kind),
        // Sync entries come from the sync command, never from share
        _ => Err(TmError::validation(
            "type",
            format!("'{raw}' is not one of update, discovery, decision"),
        )),
    }
}

fn parse_deadline(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TmError::validation("deadline", format!("not ISO-8601: {e}")))
}

/// Parse `path[:line[:line_end]]`. Only trailing numeric segments count as
/// line numbers, so paths containing colons stay intact.
fn parse_file_ref(raw: &str) -> Result<FileRef> {
    let mut path = raw;
    let mut numbers: Vec<u32> = Vec::new();

    for _ in 0..2 {
        if let Some((head, tail)) = path.rsplit_once(':') {
            if let Ok(n) = tail.parse::<u32>() {
                numbers.insert(0, n);
                path = head;
                continue;
            }
        }
        break;
    }

    if path.is_empty() {
        return Err(TmError::empty_field("file"));
    }
    let (line_start, line_end) = match numbers.as_slice() {
        [] => (1, None),
        [start] => (*start, None),
        [start, end] => (*start, Some(*end)),
        _ => unreachable!(),
    };
    Ok(FileRef {
        path: path.to_string(),
        line_start,
        line_end,
    })
}

fn require_feature(settings: &Settings, feature: Feature, what: &str) -> Result<()> {
    if settings.enabled(feature) {
        return Ok(());
    }
    let why = if settings.features.minimal_mode {
        "minimal mode is on".to_string()
    } else {
        format!("feature '{}' is disabled", feature.as_str())
    };
    Err(TmError::validation(
        what,
        format!("{why}; enable it with 'tm config --enable {}'", feature.as_str()),
    ))
}

fn record_usage(settings: &Settings, state_dir: &Path, feature: &str, action: &str) {
    if !settings.enabled(Feature::Telemetry) {
        return;
    }
    let flags: Vec<String> = Feature::ALL
        .iter()
        .filter(|f| settings.enabled(**f))
        .map(|f| f.as_str().to_string())
        .collect();
    TelemetryLog::new(paths::telemetry_dir(state_dir)).record_best_effort(feature, action, flags);
}

/// Run the enforcement gate ahead of an orchestrated command.
///
/// Strict violations block. Standard violations print guidance and, on an
/// interactive terminal, ask for confirmation; in scripts they warn and
/// proceed. Advisory violations are logged only.
fn enforce(settings: &Settings, state_dir: &Path, intent: Option<Option<&str>>) -> Result<()> {
    let outcome = enforcement::evaluate(
        settings,
        GateInput {
            agent_configured: identity::configured(),
            state_dir,
            intent,
        },
    );

    match outcome.verdict {
        Verdict::Allow => Ok(()),
        Verdict::Block => Err(TmError::EnforcementBlocked {
            violations: outcome.violations,
        }),
        Verdict::Warn => {
            for violation in &outcome.violations {
                eprintln!(
                    "warning: {} - {} (e.g. {})",
                    violation.category.as_str(),
                    violation.fix,
                    violation.example
                );
            }
            if outcome.level == EnforcementLevel::Standard && std::io::stdin().is_terminal() {
                eprint!("proceed anyway? [y/N] ");
                let mut answer = String::new();
                let _ = std::io::stdin().read_line(&mut answer);
                if !matches!(answer.trim(), "y" | "Y" | "yes") {
                    return Err(TmError::EnforcementBlocked {
                        violations: outcome.violations,
                    });
                }
            }
            Ok(())
        }
    }
}

async fn open_repo(state_dir: &Path) -> Result<(Store, SqliteRepository)> {
    let store = setup::open_store(state_dir).await?;
    let repo = SqliteRepository::with_sink(&store, Arc::new(FsMirror::new(state_dir)));
    Ok((store, repo))
}

pub async fn run(cli: Cli) -> Result<()> {
    let agent = identity::resolve(cli.agent.as_deref());
    let state_dir = paths::state_dir();
    let settings = Settings::load(&state_dir)?;

    match cli.command {
        Command::Init => {
            setup::init(&state_dir, lock_timeout()).await?;
            record_usage(&settings, &state_dir, "store", "init");
        }

        Command::Add {
            title,
            description,
            priority,
            depends_on,
            file,
            assignee,
            criteria,
            deadline,
            estimated_hours,
            tag,
        } => {
            enforce(&settings, &state_dir, Some(description.as_deref()))?;

            let criteria = match criteria {
                Some(raw) => {
                    require_feature(&settings, Feature::SuccessCriteria, "criteria")?;
                    Some(Validator::criteria_json(&raw)?)
                }
                None => None,
            };
            let deadline = match deadline {
                Some(raw) => {
                    require_feature(&settings, Feature::Deadlines, "deadline")?;
                    Some(parse_deadline(&raw)?)
                }
                None => None,
            };
            if estimated_hours.is_some() {
                require_feature(&settings, Feature::TimeTracking, "estimated-hours")?;
            }

            let new_task = NewTask {
                title,
                description,
                priority: priority.as_deref().map(parse_priority).transpose()?.unwrap_or_default(),
                deps: depends_on,
                file_refs: file
                    .iter()
                    .map(|raw| parse_file_ref(raw))
                    .collect::<Result<_>>()?,
                assignee,
                criteria,
                deadline,
                estimated_hours,
                tags: tag,
            };

            let (store, repo) = open_repo(&state_dir).await?;
            let _lock = store.lock(lock_timeout())?;
            let task = repo.add(new_task).await?;
            record_usage(&settings, &state_dir, "tasks", "add");
            println!("{}", task.id);
        }

        Command::List {
            status,
            assignee,
            has_deps,
            limit,
            format: fmt,
        } => {
            let filter = TaskFilter {
                status: status.as_deref().map(parse_status).transpose()?,
                assignee,
                has_deps: has_deps.then_some(true),
                limit,
            };
            let (_store, repo) = open_repo(&state_dir).await?;
            match fmt {
                OutputFormat::Human | OutputFormat::Json => {
                    let tasks = repo.list(filter).await?;
                    println!("{}", format::tasks(&tasks, fmt));
                }
                _ => {
                    // Structured formats include deps/tags, so fetch details
                    let tasks = repo.list(filter).await?;
                    let mut details = Vec::with_capacity(tasks.len());
                    for task in &tasks {
                        details.push(repo.show(&task.id).await?);
                    }
                    println!("{}", format::export(&details, fmt));
                }
            }
            record_usage(&settings, &state_dir, "tasks", "list");
        }

        Command::Show { id, format: fmt } => {
            let (_store, repo) = open_repo(&state_dir).await?;
            let detail = repo.show(&id).await?;
            match fmt {
                OutputFormat::Human => println!("{}", format::show(&detail)),
                _ => println!("{}", format::export(&[detail], fmt)),
            }
            record_usage(&settings, &state_dir, "tasks", "show");
        }

        Command::Update {
            id,
            status,
            priority,
            assignee,
            reopen,
            depends_on,
        } => {
            enforce(&settings, &state_dir, None)?;
            let (store, repo) = open_repo(&state_dir).await?;
            let _lock = store.lock(lock_timeout())?;

            if let Some(dep) = depends_on {
                let task = repo.add_dependency(&id, &dep).await?;
                println!("{} now depends on {dep} (status: {})", task.id, task.status);
            }

            let patch = TaskPatch {
                status: status.as_deref().map(parse_status).transpose()?,
                priority: priority.as_deref().map(parse_priority).transpose()?,
                assignee,
                reopen,
            };
            if patch.status.is_some() || patch.priority.is_some() || patch.assignee.is_some() {
                let task = repo.update(&id, patch).await?;
                println!("{} updated (status: {})", task.id, task.status);
            }
            record_usage(&settings, &state_dir, "tasks", "update");
        }

        Command::Complete {
            id,
            validate,
            confirm,
            force,
            summary,
            actual_hours,
            impact_review,
        } => {
            enforce(&settings, &state_dir, None)?;
            if summary.is_some() {
                require_feature(&settings, Feature::CompletionSummaries, "summary")?;
            }
            if actual_hours.is_some() {
                require_feature(&settings, Feature::TimeTracking, "actual-hours")?;
            }
            let validate = validate && settings.enabled(Feature::SuccessCriteria);

            let opts = CompleteOptions {
                validate,
                confirmations: if confirm.is_empty() { None } else { Some(confirm) },
                force: force || !settings.enabled(Feature::SuccessCriteria),
                summary,
                actual_hours,
                impact_review,
            };

            let (store, repo) = open_repo(&state_dir).await?;
            let _lock = store.lock(lock_timeout())?;
            let result = repo.complete(&id, opts).await?;

            if let Some(report) = &result.report {
                println!("{report}");
            }
            if result.already_completed {
                println!("{id} was already completed");
            } else {
                println!("{id} completed");
                for unblocked in &result.unblocked {
                    println!("{unblocked} unblocked");
                }
            }
            record_usage(&settings, &state_dir, "tasks", "complete");
        }

        Command::Assign { id, assignee } => {
            enforce(&settings, &state_dir, None)?;
            let (store, repo) = open_repo(&state_dir).await?;
            let _lock = store.lock(lock_timeout())?;
            let task = repo.assign(&id, &assignee).await?;
            println!("{} assigned to {}", task.id, assignee);
            record_usage(&settings, &state_dir, "tasks", "assign");
        }

        Command::Delete { id, cascade } => {
            enforce(&settings, &state_dir, None)?;
            let (store, repo) = open_repo(&state_dir).await?;
            let _lock = store.lock(lock_timeout())?;
            repo.delete(&id, cascade).await?;
            println!("{id} deleted");
            record_usage(&settings, &state_dir, "tasks", "delete");
        }

        Command::Export {
            format: fmt,
            status,
            output,
        } => {
            let filter = TaskFilter {
                status: status.as_deref().map(parse_status).transpose()?,
                ..Default::default()
            };
            let (_store, repo) = open_repo(&state_dir).await?;
            let tasks = repo.list(filter).await?;
            let mut details = Vec::with_capacity(tasks.len());
            for task in &tasks {
                details.push(repo.show(&task.id).await?);
            }
            let rendered = format::export(&details, fmt);
            match output {
                Some(path) => {
                    std::fs::write(&path, rendered.as_bytes()).map_err(|e| {
                        TmError::StorageUnavailable(format!("writing {}: {e}", path.display()))
                    })?;
                    println!("exported {} task(s) to {}", details.len(), path.display());
                }
                None => println!("{rendered}"),
            }
            record_usage(&settings, &state_dir, "tasks", "export");
        }

        Command::Join { id, role } => {
            enforce(&settings, &state_dir, None)?;
            let (_store, repo) = open_repo(&state_dir).await?;
            repo.join(&id, &agent, role.as_deref()).await?;
            println!("{agent} joined {id}");
            record_usage(&settings, &state_dir, "collab", "join");
        }

        Command::Share { id, message, kind } => {
            enforce(&settings, &state_dir, None)?;
            let kind = parse_share_kind(&kind)?;
            let (_store, repo) = open_repo(&state_dir).await?;
            let entry = repo.share(&id, &agent, kind, &message).await?;
            println!("shared entry {} on {id}", entry.id);
            record_usage(&settings, &state_dir, "collab", "share");
        }

        Command::Note { id, message } => {
            enforce(&settings, &state_dir, None)?;
            let (_store, repo) = open_repo(&state_dir).await?;
            repo.note(&id, &agent, &message).await?;
            println!("noted on {id}");
            record_usage(&settings, &state_dir, "collab", "note");
        }

        Command::Discover {
            id,
            message,
            impact,
            tag,
        } => {
            enforce(&settings, &state_dir, None)?;
            let (_store, repo) = open_repo(&state_dir).await?;
            repo.discover(&id, &agent, &message, impact.as_deref(), &tag)
                .await?;
            println!("discovery shared on {id}");
            record_usage(&settings, &state_dir, "collab", "discover");
        }

        Command::Sync { id, checkpoint } => {
            enforce(&settings, &state_dir, None)?;
            let (_store, repo) = open_repo(&state_dir).await?;
            repo.sync(&id, &agent, &checkpoint).await?;
            println!("sync point '{checkpoint}' recorded on {id}");
            record_usage(&settings, &state_dir, "collab", "sync");
        }

        Command::Context { id, format: fmt } => {
            let (_store, repo) = open_repo(&state_dir).await?;
            let view = repo.context(&id, &agent).await?;
            println!("{}", format::context(&view, fmt));
            record_usage(&settings, &state_dir, "collab", "context");
        }

        Command::Watch { limit } => {
            let (_store, repo) = open_repo(&state_dir).await?;
            let notifications = repo.watch(&agent, limit).await?;
            println!("{}", format::notifications(&notifications));
            record_usage(&settings, &state_dir, "collab", "watch");
        }

        Command::Progress { id, message } => {
            enforce(&settings, &state_dir, None)?;
            let (_store, repo) = open_repo(&state_dir).await?;
            repo.progress(&id, &agent, &message).await?;
            println!("progress recorded on {id}");
            record_usage(&settings, &state_dir, "core_loop", "progress");
        }

        Command::Feedback {
            id,
            quality,
            timeliness,
            note,
        } => {
            enforce(&settings, &state_dir, None)?;
            require_feature(&settings, Feature::Feedback, "feedback")?;
            let (_store, repo) = open_repo(&state_dir).await?;
            repo.feedback(
                &id,
                Feedback {
                    quality,
                    timeliness,
                    notes: note,
                },
            )
            .await?;
            println!("feedback recorded on {id}");
            record_usage(&settings, &state_dir, "core_loop", "feedback");
        }

        Command::Metrics {
            feedback: _,
            period,
            format: fmt,
        } => {
            let period = parse_period(&period)?;
            let (_store, repo) = open_repo(&state_dir).await?;
            let metrics = repo.metrics(period).await?;
            println!("{}", format::metrics(&metrics, fmt));
            record_usage(&settings, &state_dir, "core_loop", "metrics");
        }

        Command::CriticalPath { format: fmt } => {
            let (_store, repo) = open_repo(&state_dir).await?;
            let path = repo.critical_path().await?;
            if fmt == OutputFormat::Json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&path).unwrap_or_else(|_| "[]".into())
                );
            } else if path.is_empty() {
                println!("no tasks");
            } else {
                let total: f64 = path.iter().filter_map(|t| t.estimated_hours).sum();
                for task in &path {
                    println!(
                        "{}  {} ({}h)",
                        task.id,
                        task.title,
                        task.estimated_hours.unwrap_or(0.0)
                    );
                }
                println!("total estimated: {total}h");
            }
            record_usage(&settings, &state_dir, "core_loop", "critical_path");
        }

        Command::Config {
            show,
            enable,
            disable,
            minimal_mode,
            reset,
            enforce_orchestration,
            enforcement_level,
            show_enforcement,
        } => {
            let mut settings = settings;
            let mut changed = false;

            if reset {
                settings = Settings::default();
                changed = true;
            }
            if let Some(name) = enable {
                let feature = Feature::parse(&name)
                    .ok_or_else(|| TmError::validation("feature", format!("unknown feature '{name}'")))?;
                settings.set_feature(feature, true);
                changed = true;
            }
            if let Some(name) = disable {
                let feature = Feature::parse(&name)
                    .ok_or_else(|| TmError::validation("feature", format!("unknown feature '{name}'")))?;
                settings.set_feature(feature, false);
                changed = true;
            }
            if minimal_mode {
                settings.features.minimal_mode = true;
                changed = true;
            }
            if let Some(enforced) = enforce_orchestration {
                settings.enforcement.enforced = enforced;
                changed = true;
            }
            if let Some(level) = enforcement_level {
                settings.enforcement.level = EnforcementLevel::parse(&level).ok_or_else(|| {
                    TmError::validation(
                        "enforcement-level",
                        format!("'{level}' is not one of strict, standard, advisory"),
                    )
                })?;
                changed = true;
            }

            if changed {
                std::fs::create_dir_all(&state_dir).map_err(|e| {
                    TmError::StorageUnavailable(format!("creating {}: {e}", state_dir.display()))
                })?;
                let _lock = StateLock::acquire(&state_dir, lock_timeout())?;
                settings.save(&state_dir)?;

                // Legacy mirror kept for older observers of the state dir
                let mirror = serde_json::json!({
                    "level": settings.enforcement.level.as_str(),
                    "auto_detect": settings.enforcement.auto_detect,
                    "enforced": settings.enforcement.enforced,
                });
                if let Err(e) = std::fs::write(
                    state_dir.join("enforcement.json"),
                    serde_json::to_vec_pretty(&mirror).unwrap_or_default(),
                ) {
                    tracing::warn!(error = %e, "enforcement.json mirror write failed");
                }
                println!("configuration saved");
            }

            if show_enforcement {
                println!(
                    "enforcement: level={} auto_detect={} enforced={}",
                    settings.enforcement.level,
                    settings.enforcement.auto_detect,
                    settings.enforcement.enforced
                );
            } else if show || !changed {
                let rendered = serde_yaml::to_string(&settings)
                    .map_err(|e| TmError::Internal(format!("rendering config: {e}")))?;
                print!("{rendered}");
            }
        }

        Command::Migrate {
            status: _,
            apply,
            rollback,
        } => {
            if rollback {
                let _lock = StateLock::acquire(&state_dir, lock_timeout())?;
                let restored = MigrationManager::rollback(&state_dir)?;
                println!("restored {}", restored.display());
            } else if apply {
                let store = Store::open(&state_dir).await?;
                let _lock = store.lock(lock_timeout())?;
                let applied = MigrationManager::new(&store).apply().await?;
                if applied.is_empty() {
                    println!("schema current; nothing to apply");
                } else {
                    for version in applied {
                        println!("applied {version:03}");
                    }
                }
            } else {
                // Default (and --status): report both lists
                let store = Store::open(&state_dir).await?;
                let report = MigrationManager::new(&store).status().await?;
                for migration in &report.applied {
                    println!("applied {:03} at {}", migration.version, migration.applied_at);
                }
                for version in &report.pending {
                    println!("pending {version:03}");
                }
                if report.applied.is_empty() && report.pending.is_empty() {
                    println!("no migrations known");
                }
            }
            record_usage(&settings, &state_dir, "store", "migrate");
        }

        Command::ValidateOrchestration => {
            let outcome = enforcement::evaluate(
                &settings,
                GateInput {
                    agent_configured: identity::configured(),
                    state_dir: &state_dir,
                    intent: None,
                },
            );

            let mut anomalies = Vec::new();
            if paths::initialized(&state_dir) {
                let (_store, repo) = open_repo(&state_dir).await?;
                anomalies = repo.audit_graph().await?;
            }

            for violation in &outcome.violations {
                println!(
                    "violation: {} - {} (e.g. {})",
                    violation.category.as_str(),
                    violation.fix,
                    violation.example
                );
            }
            for anomaly in &anomalies {
                println!("graph anomaly: {anomaly}");
            }

            if outcome.violations.is_empty() && anomalies.is_empty() {
                println!("orchestration ok (level: {})", outcome.level);
            } else if !outcome.violations.is_empty() {
                return Err(TmError::EnforcementBlocked {
                    violations: outcome.violations,
                });
            }
        }

        Command::FixOrchestration { interactive } => {
            let outcome = enforcement::evaluate(
                &settings,
                GateInput {
                    agent_configured: identity::configured(),
                    state_dir: &state_dir,
                    intent: None,
                },
            );

            if outcome.violations.is_empty() {
                println!("nothing to fix");
                return Ok(());
            }
            for violation in &outcome.violations {
                println!("{}: {}", violation.category.as_str(), violation.fix);
                println!("  e.g. {}", violation.example);
                if interactive
                    && violation.category
                        == tm_core::enforcement::ViolationCategory::StoreUninitialized
                {
                    setup::init(&state_dir, lock_timeout()).await?;
                }
            }
        }
    }

    Ok(())
}
