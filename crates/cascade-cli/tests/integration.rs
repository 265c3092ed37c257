#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Writes every declared output of the current session into the staging
/// directory. Directory outputs get a single file.
const GENERATOR: &str = r##"
for out in $CASCADE_OUTPUTS; do
  case "$out" in
    */) mkdir -p "$CASCADE_STAGING_DIR/$out" && target="$CASCADE_STAGING_DIR/${out}item-1.md" ;;
    *)  mkdir -p "$(dirname "$CASCADE_STAGING_DIR/$out")" && target="$CASCADE_STAGING_DIR/$out" ;;
  esac
  echo "# $CASCADE_SESSION_TITLE" > "$target"
done
if [ -n "$FAIL_SESSION" ] && [ "$CASCADE_SESSION" = "$FAIL_SESSION" ]; then
  echo "generation failed for $CASCADE_SESSION" >&2
  exit 4
fi
"##;

fn cascade(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("cascade").unwrap();
    cmd.current_dir(dir.path())
        .env("CASCADE_ROOT", dir.path())
        .env_remove("CASCADE_ARTIFACTS")
        .env_remove("FAIL_SESSION");
    cmd
}

fn init_project(dir: &TempDir) {
    cascade(dir).arg("init").assert().success();
    std::fs::write(dir.path().join("generate.sh"), GENERATOR).unwrap();
    let config = std::fs::read_to_string(dir.path().join(".cascade/config.yaml")).unwrap();
    let config = config.replace("command: null", "command: sh generate.sh");
    std::fs::write(dir.path().join(".cascade/config.yaml"), config).unwrap();
}

fn status_json(dir: &TempDir) -> serde_json::Value {
    let out = cascade(dir).args(["status", "--json"]).output().unwrap();
    assert!(out.status.success());
    serde_json::from_slice(&out.stdout).unwrap()
}

fn state_of(status: &serde_json::Value, session: &str) -> String {
    status
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["session"] == session)
        .map(|r| r["state"].as_str().unwrap().to_string())
        .unwrap()
}

fn set_mtime(path: &Path, when: SystemTime) {
    let f = std::fs::File::options().write(true).open(path).unwrap();
    f.set_modified(when).unwrap();
}

// ---------------------------------------------------------------------------
// cascade init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config_and_artifact_dir() {
    let dir = TempDir::new().unwrap();
    cascade(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created: .cascade/config.yaml"));

    assert!(dir.path().join(".cascade/config.yaml").exists());
    assert!(dir.path().join("planning").is_dir());
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    cascade(&dir).arg("init").assert().success();
    cascade(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  .cascade/config.yaml"));
}

#[test]
fn artifacts_flag_overrides_config() {
    let dir = TempDir::new().unwrap();
    cascade(&dir)
        .args(["--artifacts", "docs/plan", "init"])
        .assert()
        .success();
    assert!(dir.path().join("docs/plan").is_dir());
    let config = std::fs::read_to_string(dir.path().join(".cascade/config.yaml")).unwrap();
    assert!(config.contains("docs/plan"));
}

// ---------------------------------------------------------------------------
// cascade status / next / sessions
// ---------------------------------------------------------------------------

#[test]
fn fresh_project_only_journey_is_runnable() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    let status = status_json(&dir);
    assert_eq!(status.as_array().unwrap().len(), 14);
    assert_eq!(state_of(&status, "user-journey"), "runnable");
    assert_eq!(state_of(&status, "product-strategy"), "blocked");
    assert_eq!(state_of(&status, "launch-checklist"), "blocked");

    cascade(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("missing journey.md"))
        .stdout(predicate::str::contains("0/14 sessions complete"));
}

#[test]
fn status_works_without_init() {
    let dir = TempDir::new().unwrap();
    cascade(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("user-journey"));
}

#[test]
fn next_points_at_frontier() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    cascade(&dir)
        .arg("next")
        .assert()
        .success()
        .stdout(predicate::str::contains("Next:     user-journey"));
}

#[test]
fn sessions_lists_dependencies() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    let out = cascade(&dir).args(["sessions", "--json"]).output().unwrap();
    assert!(out.status.success());
    let rows: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let schema = rows
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["id"] == "data-schema")
        .unwrap();
    assert_eq!(schema["depends_on"], serde_json::json!(["user-journey", "tech-stack"]));

    cascade(&dir)
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains("backlog/"));
}

// ---------------------------------------------------------------------------
// cascade run
// ---------------------------------------------------------------------------

#[test]
fn run_requires_session_or_auto() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    cascade(&dir).arg("run").assert().failure();
    cascade(&dir)
        .args(["run", "--session", "user-journey", "--auto"])
        .assert()
        .failure();
}

#[test]
fn run_without_executor_command_fails_with_hint() {
    let dir = TempDir::new().unwrap();
    cascade(&dir).arg("init").assert().success();
    cascade(&dir)
        .args(["run", "--session", "user-journey"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("executor.command"));
}

#[test]
fn run_single_session_then_next_is_strategy() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    cascade(&dir)
        .args(["run", "--session", "user-journey"])
        .assert()
        .success();

    let journey = std::fs::read_to_string(dir.path().join("planning/journey.md")).unwrap();
    assert_eq!(journey.trim(), "# User Journey");

    let status = status_json(&dir);
    assert_eq!(state_of(&status, "user-journey"), "complete");
    assert_eq!(state_of(&status, "product-strategy"), "runnable");
    assert_eq!(state_of(&status, "tech-stack"), "blocked");
}

#[test]
fn blocked_session_exits_2() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    cascade(&dir)
        .args(["run", "--session", "tech-stack"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("journey.md"));
    assert!(!dir.path().join("planning/tech-stack.md").exists());
}

#[test]
fn unknown_session_fails() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    cascade(&dir)
        .args(["run", "--session", "no-such-session"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("session not found"));
}

#[test]
fn auto_runs_everything() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    let out = cascade(&dir)
        .args(["run", "--auto", "--json"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["outcome"], "completed");
    let order: Vec<&str> = report["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["session_id"].as_str().unwrap())
        .collect();
    assert_eq!(order.len(), 14);
    assert_eq!(order[0], "user-journey");
    assert_eq!(order[13], "launch-checklist");

    assert!(dir.path().join("planning/backlog/item-1.md").exists());
    cascade(&dir)
        .arg("next")
        .assert()
        .success()
        .stdout(predicate::str::contains("All sessions complete."));
}

#[test]
fn failing_session_halts_without_writing() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    cascade(&dir)
        .args(["run", "--auto"])
        .env("FAIL_SESSION", "tech-stack")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("session 'tech-stack' failed"))
        .stderr(predicate::str::contains("generation failed for tech-stack"));

    assert!(dir.path().join("planning/strategy.md").exists());
    assert!(!dir.path().join("planning/tech-stack.md").exists());
    let status = status_json(&dir);
    assert_eq!(state_of(&status, "tech-stack"), "runnable");
}

#[test]
fn upstream_edit_makes_downstream_stale() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    cascade(&dir).args(["run", "--auto"]).assert().success();

    let future = SystemTime::now() + Duration::from_secs(3600);
    set_mtime(&dir.path().join("planning/architecture.md"), future);

    let status = status_json(&dir);
    assert_eq!(state_of(&status, "architecture"), "complete");
    assert_eq!(state_of(&status, "security"), "stale");
    assert_eq!(state_of(&status, "launch-checklist"), "stale");
    assert_eq!(state_of(&status, "screens"), "complete");
    assert_eq!(state_of(&status, "user-journey"), "complete");

    cascade(&dir)
        .args(["run", "--auto", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("security"))
        .stdout(predicate::str::contains("screens").not());
}

#[test]
fn dry_run_executes_nothing() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    cascade(&dir)
        .args(["run", "--auto", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains(" 1. user-journey"))
        .stdout(predicate::str::contains("14. launch-checklist"));
    assert!(!dir.path().join("planning/journey.md").exists());
}

#[test]
fn complete_session_is_skipped_unless_forced() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    cascade(&dir)
        .args(["run", "--session", "user-journey"])
        .assert()
        .success();

    cascade(&dir)
        .args(["run", "--session", "user-journey"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to run."));

    let out = cascade(&dir)
        .args(["run", "--session", "user-journey", "--force", "--json"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["results"][0]["forced"], true);
}

#[test]
fn json_report_survives_a_chatty_executor() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let config = std::fs::read_to_string(dir.path().join(".cascade/config.yaml")).unwrap();
    let config = config.replace(
        "command: sh generate.sh",
        "command: echo generated {session}; sh generate.sh",
    );
    std::fs::write(dir.path().join(".cascade/config.yaml"), config).unwrap();

    let out = cascade(&dir)
        .args(["run", "--session", "user-journey", "--json"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["outcome"], "completed");
    assert!(String::from_utf8_lossy(&out.stderr).contains("generated user-journey"));
}
