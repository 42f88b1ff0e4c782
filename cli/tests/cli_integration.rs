//! End-to-end tests driving the `tm` binary against temporary stores.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn tm(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("tm").unwrap();
    cmd.env("TM_DB_PATH", dir.path().join(".tm"));
    cmd.env("TM_AGENT_ID", "tester");
    cmd.env_remove("TM_DEBUG");
    cmd.env_remove("RUST_LOG");
    cmd
}

fn init_store(dir: &TempDir) {
    tm(dir).arg("init").assert().success();
}

fn add_task(dir: &TempDir, args: &[&str]) -> String {
    let output = tm(dir).arg("add").args(args).assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let id = stdout.trim().to_string();
    assert_eq!(id.len(), 8, "expected an 8-hex id, got '{id}'");
    id
}

#[test]
fn scenario_basic_lifecycle() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);

    let id = add_task(&dir, &["Fix login bug", "-p", "high"]);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));

    tm(&dir)
        .args(["list", "--status", "pending"])
        .assert()
        .success()
        .stdout(predicate::str::contains(&id))
        .stdout(predicate::str::contains("high"));

    tm(&dir)
        .args(["update", &id, "--status", "in_progress"])
        .assert()
        .success()
        .stdout(predicate::str::contains("in_progress"));

    tm(&dir)
        .args(["complete", &id, "--summary", "Patched race in session init."])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"));

    tm(&dir)
        .args(["show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Patched race in session init."));
}

#[test]
fn scenario_dependency_cascade() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);

    let backend = add_task(&dir, &["Backend"]);
    let frontend = add_task(
        &dir,
        &["Frontend", "--depends-on", &backend, "--assignee", "frontend-dev"],
    );

    tm(&dir)
        .args(["show", &frontend])
        .assert()
        .success()
        .stdout(predicate::str::contains("blocked"));

    tm(&dir)
        .args(["list", "--has-deps"])
        .assert()
        .success()
        .stdout(predicate::str::contains(&frontend));

    tm(&dir)
        .args(["complete", &backend])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("{frontend} unblocked")));

    tm(&dir)
        .args(["show", &frontend])
        .assert()
        .success()
        .stdout(predicate::str::contains("pending"));

    // The unblock notification is readable via watch, then marked seen
    tm(&dir)
        .env("TM_AGENT_ID", "frontend-dev")
        .arg("watch")
        .assert()
        .success()
        .stdout(predicate::str::contains("task_unblocked"));
    tm(&dir)
        .env("TM_AGENT_ID", "frontend-dev")
        .arg("watch")
        .assert()
        .success()
        .stdout(predicate::str::contains("no new notifications"));
}

#[test]
fn scenario_cycle_rejection() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);

    let a = add_task(&dir, &["A"]);
    let b = add_task(&dir, &["B", "--depends-on", &a]);
    let c = add_task(&dir, &["C", "--depends-on", &b]);

    tm(&dir)
        .args(["update", &a, "--depends-on", &c])
        .assert()
        .failure()
        .code(4)
        .stderr(predicate::str::contains("cycle"));

    // Store unchanged
    tm(&dir)
        .args(["show", &a])
        .assert()
        .success()
        .stdout(predicate::str::contains("depends on").not());
}

#[test]
fn scenario_criteria_validation() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);

    let criteria = r#"[{"criterion":"tests pass"},{"criterion":"docs updated"}]"#;
    let ship = add_task(&dir, &["Ship", "--criteria", criteria]);

    tm(&dir)
        .args(["complete", &ship, "--validate", "--confirm", "true,false"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("criteria"));

    tm(&dir)
        .args(["show", &ship])
        .assert()
        .success()
        .stdout(predicate::str::contains("pending"));

    tm(&dir)
        .args(["complete", &ship, "--validate", "--confirm", "true,true"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"));
}

#[test]
fn scenario_private_vs_shared_context() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);
    let task = add_task(&dir, &["T1"]);

    tm(&dir)
        .env("TM_AGENT_ID", "alice")
        .args(["note", &task, "try JWT"])
        .assert()
        .success();

    tm(&dir)
        .env("TM_AGENT_ID", "bob")
        .args(["context", &task])
        .assert()
        .success()
        .stdout(predicate::str::contains("try JWT").not());

    tm(&dir)
        .env("TM_AGENT_ID", "alice")
        .args(["context", &task])
        .assert()
        .success()
        .stdout(predicate::str::contains("try JWT"));
}

#[test]
fn scenario_migration_safety() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);

    tm(&dir)
        .args(["migrate", "--status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("applied 001"))
        .stdout(predicate::str::contains("applied 003"));

    tm(&dir)
        .args(["migrate", "--apply"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to apply"));

    // Backups were written during init
    let backups = dir.path().join(".tm/backups");
    let count = std::fs::read_dir(&backups).unwrap().count();
    assert!(count >= 1, "expected pre-migration backups");

    tm(&dir)
        .args(["migrate", "--rollback"])
        .assert()
        .success()
        .stdout(predicate::str::contains("restored"));

    tm(&dir)
        .args(["migrate", "--status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pending 003"));
}

#[test]
fn exit_codes_follow_error_classes() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);

    // Unknown id: validation class, exit 2
    tm(&dir).args(["show", "ffffffff"]).assert().failure().code(2);

    // Bad priority: exit 2
    tm(&dir)
        .args(["add", "X", "-p", "urgent"])
        .assert()
        .failure()
        .code(2);

    // Unknown dependency: graph class, exit 4
    tm(&dir)
        .args(["add", "X", "--depends-on", "deadbeef"])
        .assert()
        .failure()
        .code(4);

    // Dependents present without --cascade: exit 4
    let base = add_task(&dir, &["Base"]);
    add_task(&dir, &["Child", "--depends-on", &base]);
    tm(&dir).args(["delete", &base]).assert().failure().code(4);

    // Uninitialized store: exit 3
    let empty = TempDir::new().unwrap();
    tm(&empty).args(["list"]).assert().failure().code(3);
}

#[test]
fn empty_title_rejected() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);
    tm(&dir).args(["add", "   "]).assert().failure().code(2);
}

#[test]
fn export_formats_handle_empty_and_data() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);

    tm(&dir)
        .args(["export", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));

    tm(&dir)
        .args(["export", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("id,title,status"));

    let id = add_task(&dir, &["Exported", "--tag", "a", "--tag", "b"]);
    tm(&dir)
        .args(["export", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("a;b"));

    tm(&dir)
        .args(["export", "--format", "markdown"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("`{id}`")));

    // Writing to a file
    let out = dir.path().join("tasks.json");
    tm(&dir)
        .args(["export", "--output"])
        .arg(&out)
        .assert()
        .success();
    let raw = std::fs::read_to_string(&out).unwrap();
    assert!(raw.contains(&id));
}

#[test]
fn config_toggles_gate_core_loop_commands() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);
    let id = add_task(&dir, &["Scored"]);
    tm(&dir).args(["complete", &id]).assert().success();

    tm(&dir)
        .args(["config", "--disable", "feedback"])
        .assert()
        .success();

    tm(&dir)
        .args(["feedback", &id, "--quality", "4"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("feedback"));

    tm(&dir)
        .args(["config", "--enable", "feedback"])
        .assert()
        .success();
    tm(&dir)
        .args(["feedback", &id, "--quality", "4"])
        .assert()
        .success();

    // Out-of-range score
    tm(&dir)
        .args(["feedback", &id, "--quality", "6"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn minimal_mode_disables_core_loop() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);
    tm(&dir)
        .args(["config", "--minimal-mode"])
        .assert()
        .success();

    tm(&dir)
        .args(["add", "X", "--criteria", r#"[{"criterion":"c"}]"#])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("minimal mode"));

    tm(&dir)
        .args(["add", "X", "--estimated-hours", "2"])
        .assert()
        .failure()
        .code(2);

    // Plain adds still work
    add_task(&dir, &["Plain task"]);
}

#[test]
fn progress_and_metrics_flow() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);
    let id = add_task(&dir, &["Tracked", "--estimated-hours", "2"]);

    tm(&dir)
        .args(["progress", &id, "half way"])
        .assert()
        .success();
    tm(&dir)
        .args(["show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("half way"));

    tm(&dir)
        .args(["complete", &id, "--actual-hours", "4"])
        .assert()
        .success();

    tm(&dir)
        .args(["metrics", "--period", "week"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed tasks:     1"))
        .stdout(predicate::str::contains("estimation accuracy: 0.50"));
}

#[test]
fn critical_path_reports_heaviest_chain() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);

    let base = add_task(&dir, &["Base", "--estimated-hours", "2"]);
    let heavy = add_task(&dir, &["Heavy", "--estimated-hours", "8", "--depends-on", &base]);
    add_task(&dir, &["Light", "--estimated-hours", "1", "--depends-on", &base]);

    tm(&dir)
        .arg("critical-path")
        .assert()
        .success()
        .stdout(predicate::str::contains(&base))
        .stdout(predicate::str::contains(&heavy))
        .stdout(predicate::str::contains("total estimated: 10h"));
}

#[test]
fn strict_enforcement_blocks_without_agent_id() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);
    tm(&dir)
        .args(["config", "--enforcement-level", "strict"])
        .assert()
        .success();

    let mut cmd = tm(&dir);
    cmd.env_remove("TM_AGENT_ID");
    cmd.args(["add", "Blocked add"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("orchestration"));

    // Reads are not gated
    let mut cmd = tm(&dir);
    cmd.env_remove("TM_AGENT_ID");
    cmd.arg("list").assert().success();
}

#[test]
fn validate_and_fix_orchestration() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);

    tm(&dir)
        .arg("validate-orchestration")
        .assert()
        .success()
        .stdout(predicate::str::contains("orchestration ok"));

    // Without an agent id the validator reports the violation
    let mut cmd = tm(&dir);
    cmd.env_remove("TM_AGENT_ID");
    cmd.arg("validate-orchestration")
        .assert()
        .failure()
        .stdout(predicate::str::contains("agent_id_missing"));

    let mut cmd = tm(&dir);
    cmd.env_remove("TM_AGENT_ID");
    cmd.arg("fix-orchestration")
        .assert()
        .success()
        .stdout(predicate::str::contains("TM_AGENT_ID"));
}

#[test]
fn recomplete_is_idempotent_via_cli() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);
    let id = add_task(&dir, &["Once"]);

    tm(&dir).args(["complete", &id]).assert().success();
    tm(&dir)
        .args(["complete", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("already completed"));
}

#[test]
fn sync_and_discover_broadcast() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);
    let id = add_task(&dir, &["Shared"]);

    tm(&dir)
        .env("TM_AGENT_ID", "alice")
        .args(["sync", &id, "api-frozen"])
        .assert()
        .success();
    tm(&dir)
        .env("TM_AGENT_ID", "alice")
        .args(["discover", &id, "schema drift", "--impact", "blocks migration"])
        .assert()
        .success();

    tm(&dir)
        .env("TM_AGENT_ID", "bob")
        .arg("watch")
        .assert()
        .success()
        .stdout(predicate::str::contains("sync_point"))
        .stdout(predicate::str::contains("api-frozen"))
        .stdout(predicate::str::contains("discovery"))
        .stdout(predicate::str::contains("blocks migration"));

    // Context carries both entries for everyone
    tm(&dir)
        .env("TM_AGENT_ID", "bob")
        .args(["context", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("schema drift"));
}

#[test]
fn mirrors_project_context_and_notes() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);
    let id = add_task(&dir, &["Mirrored"]);

    tm(&dir)
        .env("TM_AGENT_ID", "alice")
        .args(["share", &id, "working on it"])
        .assert()
        .success();
    tm(&dir)
        .env("TM_AGENT_ID", "alice")
        .args(["note", &id, "private hint"])
        .assert()
        .success();

    let context_log = dir.path().join(format!(".tm/context/{id}.log"));
    assert!(std::fs::read_to_string(context_log)
        .unwrap()
        .contains("working on it"));
    let notes_log = dir.path().join(format!(".tm/agents/notes/alice/{id}.log"));
    assert!(std::fs::read_to_string(notes_log)
        .unwrap()
        .contains("private hint"));
}

#[test]
fn telemetry_written_when_enabled_and_silent_when_not() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);
    add_task(&dir, &["Counted"]);

    let telemetry = dir.path().join(".tm/telemetry");
    let files: Vec<_> = std::fs::read_dir(&telemetry).unwrap().collect();
    assert_eq!(files.len(), 1);

    tm(&dir)
        .args(["config", "--disable", "telemetry"])
        .assert()
        .success();
    std::fs::remove_dir_all(&telemetry).unwrap();

    add_task(&dir, &["Uncounted"]);
    assert!(!telemetry.exists());
}
