//! CLI integration tests using assert_cmd.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const EXAM_TOML: &str = r#"
[exam]
year = 2025
kind = "mock"
round = 1
categories = ["north", "south"]

[exam.schedule]
page_opened_at = "2025-03-01T00:00:00Z"
exam_started_at = "2025-03-08T09:00:00Z"
exam_finished_at = "2025-03-08T12:00:00Z"
predicted_key_opened_at = "2025-03-08T18:00:00Z"
official_key_opened_at = "2025-03-10T09:00:00Z"
predict_closed_at = "2025-03-20T00:00:00Z"

[[subjects]]
code = "logic"
name = "Logic"
question_count = 3
"#;

const SUBMIT_AT: &str = "2025-03-08T13:00:00Z";
const PREDICTED_AT: &str = "2025-03-09T00:00:00Z";
const OFFICIAL_AT: &str = "2025-03-11T00:00:00Z";

/// A `scorecast` invocation isolated inside `dir`.
fn scorecast(dir: &Path) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("scorecast").unwrap();
    cmd.current_dir(dir)
        .env("HOME", dir)
        .env_remove("SCORECAST_STORE")
        .env_remove("RUST_LOG");
    cmd
}

/// Stored exam where candidates 1, 2 and 3 answered [1,2,1], [1,2,2] and [2,2,1].
fn seeded() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("mock.toml"), EXAM_TOML).unwrap();

    scorecast(dir.path())
        .args(["exam", "add", "--exam", "mock.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stored exam 2025-mock-1"));

    for (id, name, category, answers) in [
        ("1", "Ahn", "north", "1,2,1"),
        ("2", "Baek", "north", "1,2,2"),
        ("3", "Cho", "south", "2,2,1"),
    ] {
        scorecast(dir.path())
            .args(["register", "--exam-id", "2025-mock-1", "--candidate", id])
            .args(["--name", name, "--category", category])
            .assert()
            .success();
        scorecast(dir.path())
            .args(["--at", SUBMIT_AT, "submit", "--exam-id", "2025-mock-1"])
            .args(["--candidate", id, "--subject", "logic", "--answers", answers])
            .assert()
            .success()
            .stdout(predicate::str::contains("All subjects confirmed"));
    }
    dir
}

#[test]
fn validate_exam_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("mock.toml"), EXAM_TOML).unwrap();

    scorecast(dir.path())
        .args(["validate", "--exam", "mock.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2025-mock-1 (1 subjects, 3 questions)"))
        .stdout(predicate::str::contains("All exams valid"));
}

#[test]
fn validate_reports_warnings() {
    let dir = TempDir::new().unwrap();
    let broken = EXAM_TOML.replace("question_count = 3", "question_count = 0");
    std::fs::write(dir.path().join("broken.toml"), broken).unwrap();

    scorecast(dir.path())
        .args(["validate", "--exam", "broken.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[logic] WARNING"))
        .stdout(predicate::str::contains("1 warning(s) found"));
}

#[test]
fn validate_nonexistent_file() {
    let dir = TempDir::new().unwrap();
    scorecast(dir.path())
        .args(["validate", "--exam", "nonexistent.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn init_creates_files() {
    let dir = TempDir::new().unwrap();

    scorecast(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created scorecast.toml"))
        .stdout(predicate::str::contains("Created exams/example.toml"));

    assert!(dir.path().join("scorecast.toml").exists());
    assert!(dir.path().join("keys/example.toml").exists());

    scorecast(dir.path())
        .args(["validate", "--exam", "exams"])
        .assert()
        .success()
        .stdout(predicate::str::contains("All exams valid"));
}

#[test]
fn init_skips_existing() {
    let dir = TempDir::new().unwrap();
    scorecast(dir.path()).arg("init").assert().success();
    scorecast(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn predicted_ranks_after_reconcile() {
    let dir = seeded();

    scorecast(dir.path())
        .args(["--at", PREDICTED_AT, "reconcile", "--output", "runs"])
        .assert()
        .success()
        .stderr(predicate::str::contains("official scores unchanged (official key not yet released)"));

    let runs: Vec<_> = std::fs::read_dir(dir.path().join("runs")).unwrap().collect();
    assert_eq!(runs.len(), 1);

    scorecast(dir.path())
        .args(["report", "--exam-id", "2025-mock-1", "--view", "ranks"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1/3"))
        .stdout(predicate::str::contains("100.0"))
        .stdout(predicate::str::contains("66.7"));

    scorecast(dir.path())
        .args(["report", "--exam-id", "2025-mock-1", "--view", "items"])
        .assert()
        .success()
        .stdout(predicate::str::contains("logic-3"));
}

#[test]
fn second_reconcile_writes_nothing() {
    let dir = seeded();
    scorecast(dir.path())
        .args(["--at", PREDICTED_AT, "reconcile", "--output", "runs"])
        .assert()
        .success();

    scorecast(dir.path())
        .args(["--at", PREDICTED_AT, "reconcile", "--output", "runs2"])
        .assert()
        .success();

    let entry = std::fs::read_dir(dir.path().join("runs2"))
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(entry.path()).unwrap()).unwrap();
    let steps = report["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 7);
    assert!(steps
        .iter()
        .all(|s| s["outcome"]["status"] == "unchanged"));
}

#[test]
fn official_key_scores_coexist_with_predicted() {
    let dir = seeded();
    std::fs::write(
        dir.path().join("key.toml"),
        "exam = \"2025-mock-1\"\n\n[answers]\nlogic = [1, 2, 2]\n",
    )
    .unwrap();

    scorecast(dir.path())
        .args(["publish-key", "--key", "key.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Published official key"));

    scorecast(dir.path())
        .args(["--at", OFFICIAL_AT, "reconcile"])
        .assert()
        .success();

    scorecast(dir.path())
        .args(["report", "--exam-id", "2025-mock-1", "--view", "ranks", "--context", "official"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Baek"))
        .stdout(predicate::str::contains("33.3"));

    scorecast(dir.path())
        .args(["report", "--exam-id", "2025-mock-1", "--context", "predicted"])
        .assert()
        .success()
        .stdout(predicate::str::contains("aggregate"))
        .stdout(predicate::str::contains("top 10%"));
}

#[test]
fn official_items_wait_for_key_release() {
    let dir = seeded();
    scorecast(dir.path())
        .args(["report", "--exam-id", "2025-mock-1", "--view", "items", "--context", "official"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no official key published"));

    std::fs::write(
        dir.path().join("key.toml"),
        "exam = \"2025-mock-1\"\n\n[answers]\nlogic = [1, 2, 2]\n",
    )
    .unwrap();
    scorecast(dir.path())
        .args(["publish-key", "--key", "key.toml"])
        .assert()
        .success();

    scorecast(dir.path())
        .args(["--at", PREDICTED_AT, "report", "--exam-id", "2025-mock-1"])
        .args(["--view", "items", "--context", "official"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not released until"));

    scorecast(dir.path())
        .args(["--at", OFFICIAL_AT, "reconcile"])
        .assert()
        .success();
    scorecast(dir.path())
        .args(["--at", OFFICIAL_AT, "report", "--exam-id", "2025-mock-1"])
        .args(["--view", "items", "--context", "official"])
        .assert()
        .success()
        .stdout(predicate::str::contains("logic-3"));
}

#[test]
fn resubmission_is_rejected() {
    let dir = seeded();
    scorecast(dir.path())
        .args(["--at", SUBMIT_AT, "submit", "--exam-id", "2025-mock-1"])
        .args(["--candidate", "1", "--subject", "logic", "--answers", "3,3,3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already confirmed"));
}

#[test]
fn malformed_answers_are_rejected() {
    let dir = seeded();
    scorecast(dir.path())
        .args(["register", "--exam-id", "2025-mock-1", "--candidate", "4", "--name", "Doh"])
        .assert()
        .success();

    scorecast(dir.path())
        .args(["--at", SUBMIT_AT, "submit", "--exam-id", "2025-mock-1"])
        .args(["--candidate", "4", "--subject", "logic", "--answers", "1,2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expects 3 answers"));

    scorecast(dir.path())
        .args(["--at", SUBMIT_AT, "submit", "--exam-id", "2025-mock-1"])
        .args(["--candidate", "4", "--subject", "logic", "--answers", "1,2,7"])
        .assert()
        .failure();
}

#[test]
fn submission_outside_window_is_rejected() {
    let dir = seeded();
    scorecast(dir.path())
        .args(["register", "--exam-id", "2025-mock-1", "--candidate", "4", "--name", "Doh"])
        .assert()
        .success();

    scorecast(dir.path())
        .args(["--at", "2025-03-25T00:00:00Z", "submit", "--exam-id", "2025-mock-1"])
        .args(["--candidate", "4", "--subject", "logic", "--answers", "1,2,3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("closed"));
}

#[test]
fn report_rejects_unknown_scope() {
    let dir = seeded();
    scorecast(dir.path())
        .args(["report", "--exam-id", "2025-mock-1", "--scope", "west"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no category west"));
}

#[test]
fn help_output() {
    let dir = TempDir::new().unwrap();
    scorecast(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Exam result prediction and ranking"));
}

#[test]
fn version_output() {
    let dir = TempDir::new().unwrap();
    scorecast(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("scorecast"));
}
