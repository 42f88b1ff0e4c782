//! End-to-end repository scenarios against a real on-disk store.

use tempfile::TempDir;
use tm_core::error::TmError;
use tm_core::models::{
    CompleteOptions, ContextKind, Feedback, NewTask, NotificationKind, Period, TaskFilter,
    TaskStatus,
};
use tm_core::repository::{
    CollaborationRepository, CoreLoopRepository, NotificationRepository, TaskRepository,
};
use tm_database::{MigrationManager, SqliteRepository, Store};

async fn open_repo() -> (TempDir, SqliteRepository) {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    MigrationManager::new(&store).apply().await.unwrap();
    (dir, SqliteRepository::new(&store))
}

fn task_with_deps(title: &str, deps: Vec<String>) -> NewTask {
    let mut new = NewTask::titled(title);
    new.deps = deps;
    new
}

#[tokio::test]
async fn basic_lifecycle() {
    let (_dir, repo) = open_repo().await;

    let mut new = NewTask::titled("Fix login bug");
    new.priority = tm_core::models::Priority::High;
    let task = repo.add(new).await.unwrap();
    assert_eq!(task.id.len(), 8);

    let pending = repo
        .list(TaskFilter {
            status: Some(TaskStatus::Pending),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(pending.iter().any(|t| t.id == task.id));
    assert_eq!(pending[0].priority, tm_core::models::Priority::High);

    let patch = tm_core::models::TaskPatch {
        status: Some(TaskStatus::InProgress),
        ..Default::default()
    };
    let task = repo.update(&task.id, patch).await.unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);

    let mut opts = CompleteOptions::default();
    opts.summary = Some("Patched race in session init.".to_string());
    let result = repo.complete(&task.id, opts).await.unwrap();
    assert_eq!(result.task.status, TaskStatus::Completed);
    assert_eq!(
        result.task.completion_summary.as_deref(),
        Some("Patched race in session init.")
    );
}

#[tokio::test]
async fn dependency_cascade_with_notifications() {
    let (_dir, repo) = open_repo().await;

    let backend = repo.add(NewTask::titled("Backend")).await.unwrap();
    let mut new = task_with_deps("Frontend", vec![backend.id.clone()]);
    new.assignee = Some("frontend-dev".to_string());
    let frontend = repo.add(new).await.unwrap();
    assert_eq!(frontend.status, TaskStatus::Blocked);

    let with_deps = repo
        .list(TaskFilter {
            has_deps: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(with_deps.len(), 1);
    assert_eq!(with_deps[0].id, frontend.id);

    let result = repo
        .complete(&backend.id, CompleteOptions::default())
        .await
        .unwrap();
    assert_eq!(result.unblocked, vec![frontend.id.clone()]);

    // The assignee hears about the unblock through watch
    let seen = repo.watch("frontend-dev", None).await.unwrap();
    assert!(seen
        .iter()
        .any(|n| n.kind == NotificationKind::TaskUnblocked
            && n.task_id.as_deref() == Some(frontend.id.as_str())));

    // And a broadcast reaches everyone else
    let other = repo.watch("someone-else", None).await.unwrap();
    assert!(other
        .iter()
        .any(|n| n.kind == NotificationKind::TaskUnblocked));
}

#[tokio::test]
async fn cycle_rejection_leaves_store_unchanged() {
    let (_dir, repo) = open_repo().await;

    let a = repo.add(NewTask::titled("A")).await.unwrap();
    let b = repo
        .add(task_with_deps("B", vec![a.id.clone()]))
        .await
        .unwrap();
    let c = repo
        .add(task_with_deps("C", vec![b.id.clone()]))
        .await
        .unwrap();

    let err = repo.add_dependency(&a.id, &c.id).await.unwrap_err();
    assert!(matches!(err, TmError::CycleDetected { .. }));

    let detail = repo.show(&a.id).await.unwrap();
    assert!(detail.deps.is_empty());
    assert!(repo.audit_graph().await.unwrap().is_empty());
}

#[tokio::test]
async fn criteria_validation_gate() {
    let (_dir, repo) = open_repo().await;

    let mut new = NewTask::titled("Ship");
    new.criteria = Some(
        tm_core::Validator::criteria_json(
            r#"[{"criterion":"tests pass"},{"criterion":"docs updated"}]"#,
        )
        .unwrap(),
    );
    let ship = repo.add(new).await.unwrap();

    // One criterion false: rejected, status unchanged
    let mut opts = CompleteOptions::default();
    opts.validate = true;
    opts.confirmations = Some(vec![true, false]);
    let err = repo.complete(&ship.id, opts).await.unwrap_err();
    assert!(matches!(err, TmError::CriteriaUnmet { .. }));
    assert_eq!(
        repo.show(&ship.id).await.unwrap().task.status,
        TaskStatus::Pending
    );

    // Both true: completes with a pass report
    let mut opts = CompleteOptions::default();
    opts.validate = true;
    opts.confirmations = Some(vec![true, true]);
    let result = repo.complete(&ship.id, opts).await.unwrap();
    assert!(result.report.unwrap().satisfied());
    assert_eq!(result.task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn unvalidated_complete_with_criteria_requires_force() {
    let (_dir, repo) = open_repo().await;

    let mut new = NewTask::titled("Guarded");
    new.criteria = Some(
        tm_core::Validator::criteria_json(r#"[{"criterion":"tests pass"}]"#).unwrap(),
    );
    let task = repo.add(new).await.unwrap();

    let err = repo
        .complete(&task.id, CompleteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TmError::CriteriaUnmet { .. }));

    let mut opts = CompleteOptions::default();
    opts.force = true;
    let result = repo.complete(&task.id, opts).await.unwrap();
    assert_eq!(result.task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn private_notes_invisible_to_others() {
    let (_dir, repo) = open_repo().await;
    let task = repo.add(NewTask::titled("T1")).await.unwrap();

    repo.note(&task.id, "alice", "try JWT").await.unwrap();
    repo.share(&task.id, "alice", ContextKind::Update, "looking at auth")
        .await
        .unwrap();

    let bob = repo.context(&task.id, "bob").await.unwrap();
    assert!(bob.private_mine.is_empty());
    assert!(bob.shared.iter().any(|e| e.message == "looking at auth"));
    assert!(!bob.shared.iter().any(|e| e.message.contains("try JWT")));

    let alice = repo.context(&task.id, "alice").await.unwrap();
    assert_eq!(alice.private_mine.len(), 1);
    assert_eq!(alice.private_mine[0].message, "try JWT");
}

#[tokio::test]
async fn concurrent_adds_both_succeed() {
    let (_dir, repo) = open_repo().await;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let repo = repo.clone();
            tokio::spawn(async move { repo.add(NewTask::titled("Same title")).await })
        })
        .collect();
    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_ne!(results[0].id, results[1].id);
    let all = repo.list(TaskFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn concurrent_completes_are_safe() {
    let (_dir, repo) = open_repo().await;
    let task = repo.add(NewTask::titled("Contested")).await.unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let repo = repo.clone();
            let id = task.id.clone();
            tokio::spawn(async move { repo.complete(&id, CompleteOptions::default()).await })
        })
        .collect();
    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    // Every call either completed it or observed it already completed;
    // exactly one did the work
    let mut fresh = 0;
    for result in results {
        match result {
            Ok(completion) => {
                if !completion.already_completed {
                    fresh += 1;
                }
            }
            Err(TmError::InvalidTransition { .. }) | Err(TmError::Busy) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(fresh, 1);

    // No duplicate completion broadcasts
    let seen = repo.watch("observer", None).await.unwrap();
    let completion_broadcasts = seen
        .iter()
        .filter(|n| n.kind == NotificationKind::TaskCompleted && n.recipient.is_none())
        .count();
    assert_eq!(completion_broadcasts, 1);
}

#[tokio::test]
async fn delete_cleans_every_satellite() {
    let (_dir, repo) = open_repo().await;

    let mut new = NewTask::titled("Doomed");
    new.tags = vec!["tmp".to_string()];
    new.file_refs = vec![tm_core::models::FileRef {
        path: "src/tmp.rs".to_string(),
        line_start: 1,
        line_end: None,
    }];
    let task = repo.add(new).await.unwrap();

    repo.join(&task.id, "alice", None).await.unwrap();
    repo.share(&task.id, "alice", ContextKind::Update, "work work")
        .await
        .unwrap();
    repo.note(&task.id, "alice", "secret").await.unwrap();
    repo.progress(&task.id, "alice", "10%").await.unwrap();
    repo.emit(None, Some(&task.id), NotificationKind::Discovery, "x")
        .await
        .unwrap();

    repo.delete(&task.id, false).await.unwrap();

    assert!(repo.show(&task.id).await.is_err());
    assert!(repo.context(&task.id, "alice").await.is_err());
    // The notification rows went with the task
    let seen = repo.watch("alice", None).await.unwrap();
    assert!(!seen.iter().any(|n| n.task_id.as_deref() == Some(task.id.as_str())));
}

#[tokio::test]
async fn feedback_and_metrics_round() {
    let (_dir, repo) = open_repo().await;

    let mut new = NewTask::titled("Estimated");
    new.estimated_hours = Some(3.0);
    let task = repo.add(new).await.unwrap();

    let mut opts = CompleteOptions::default();
    opts.actual_hours = Some(6.0);
    repo.complete(&task.id, opts).await.unwrap();

    repo.feedback(
        &task.id,
        Feedback {
            quality: Some(5),
            timeliness: Some(2),
            notes: Some("slow but good".to_string()),
        },
    )
    .await
    .unwrap();

    let metrics = repo.metrics(Period::All).await.unwrap();
    assert_eq!(metrics.completed_tasks, 1);
    assert_eq!(metrics.tasks_with_feedback, 1);
    assert_eq!(metrics.avg_quality, Some(5.0));
    assert_eq!(metrics.avg_timeliness, Some(2.0));
    // |3-6|/6 = 0.5
    assert!((metrics.estimation_accuracy.unwrap() - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn watch_is_exactly_once_per_agent() {
    let (_dir, repo) = open_repo().await;
    let task = repo.add(NewTask::titled("Noisy")).await.unwrap();
    repo.emit(Some("alice"), Some(&task.id), NotificationKind::TaskAssigned, "yours")
        .await
        .unwrap();
    repo.emit(None, Some(&task.id), NotificationKind::Discovery, "shared find")
        .await
        .unwrap();

    let first = repo.watch("alice", None).await.unwrap();
    assert_eq!(first.len(), 2);
    assert!(repo.watch("alice", None).await.unwrap().is_empty());

    // Bob still sees the broadcast, not the unicast
    let bob = repo.watch("bob", None).await.unwrap();
    assert_eq!(bob.len(), 1);
    assert_eq!(bob[0].message, "shared find");
}

#[tokio::test]
async fn blocked_tasks_cannot_complete() {
    let (_dir, repo) = open_repo().await;
    let a = repo.add(NewTask::titled("A")).await.unwrap();
    let b = repo
        .add(task_with_deps("B", vec![a.id.clone()]))
        .await
        .unwrap();

    let err = repo
        .complete(&b.id, CompleteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TmError::InvalidTransition {
            from: TaskStatus::Blocked,
            to: TaskStatus::Completed
        }
    ));
}

#[tokio::test]
async fn cancelled_dependency_does_not_unblock() {
    let (_dir, repo) = open_repo().await;
    let a = repo.add(NewTask::titled("A")).await.unwrap();
    let b = repo
        .add(task_with_deps("B", vec![a.id.clone()]))
        .await
        .unwrap();

    // Cancel the dependency instead of completing it
    let patch = tm_core::models::TaskPatch {
        status: Some(TaskStatus::Cancelled),
        ..Default::default()
    };
    repo.update(&a.id, patch).await.unwrap();

    // Only completed satisfies: B stays blocked
    assert_eq!(
        repo.show(&b.id).await.unwrap().task.status,
        TaskStatus::Blocked
    );
}
