//! CLI integration tests using assert_cmd.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const SECRET: &str = "cli-test-secret";

fn examkit() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("examkit").unwrap();
    cmd.env("EXAMKIT_INTEGRITY_SECRET", SECRET);
    cmd
}

fn write_answers(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("answers.json");
    std::fs::write(
        &path,
        r#"{"q1": "B", "q2": ["C", "A"], "q3": 9.81, "q4": null, "q5": ["B", "C"]}"#,
    )
    .unwrap();
    path
}

fn score_to(dir: &Path) -> std::path::PathBuf {
    let answers = write_answers(dir);
    let output = dir.join("submission.json");
    examkit()
        .current_dir(dir)
        .arg("score")
        .arg("--exam")
        .arg(Path::new(env!("CARGO_MANIFEST_DIR")).join("../../exams/physics-101.toml"))
        .arg("--answers")
        .arg(&answers)
        .arg("--student")
        .arg("s-42")
        .arg("--time-taken")
        .arg("1500")
        .arg("--output")
        .arg(&output)
        .assert()
        .success();
    output
}

#[test]
fn validate_single_exam() {
    examkit()
        .arg("validate")
        .arg("--exam")
        .arg("../../exams/physics-101.toml")
        .assert()
        .success()
        .stdout(predicate::str::contains("5 questions"))
        .stdout(predicate::str::contains("24 marks"))
        .stdout(predicate::str::contains("All exams valid"));
}

#[test]
fn validate_directory() {
    examkit()
        .arg("validate")
        .arg("--exam")
        .arg("../../exams")
        .assert()
        .success()
        .stdout(predicate::str::contains("physics-101"))
        .stdout(predicate::str::contains("chemistry-quiz"));
}

#[test]
fn validate_reports_warnings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dup.toml");
    std::fs::write(
        &path,
        r#"
[exam]
id = "dup"

[[questions]]
id = "q1"
answer = "A"

[[questions]]
id = "q1"
answer = "B"
"#,
    )
    .unwrap();

    examkit()
        .arg("validate")
        .arg("--exam")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("[q1] WARNING"))
        .stdout(predicate::str::contains("warning(s) found"));
}

#[test]
fn validate_nonexistent_file() {
    examkit()
        .arg("validate")
        .arg("--exam")
        .arg("nonexistent.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn init_creates_files() {
    let dir = TempDir::new().unwrap();

    examkit()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created examkit.toml"))
        .stdout(predicate::str::contains("Created exams/sample.toml"));

    assert!(dir.path().join("examkit.toml").exists());
    assert!(dir.path().join("exams/sample.toml").exists());

    examkit()
        .current_dir(dir.path())
        .arg("validate")
        .arg("--exam")
        .arg("exams/sample.toml")
        .assert()
        .success()
        .stdout(predicate::str::contains("3 questions"));
}

#[test]
fn init_skips_existing() {
    let dir = TempDir::new().unwrap();

    examkit().current_dir(dir.path()).arg("init").assert().success();

    examkit()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn score_seals_a_submission() {
    let dir = TempDir::new().unwrap();
    let output = score_to(dir.path());

    let sealed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output).unwrap()).unwrap();
    assert_eq!(sealed["examId"], "physics-101");
    assert_eq!(sealed["studentId"], "s-42");
    assert_eq!(sealed["finalScore"], 10.0);
    assert_eq!(sealed["totalMarks"], 24.0);
    assert_eq!(sealed["correctAnswers"], 3);
    assert_eq!(sealed["incorrectAnswers"], 1);
    assert_eq!(sealed["unattempted"], 1);
    assert_eq!(sealed["timeTaken"], 1500);
    assert_eq!(sealed["integrityHash"].as_str().unwrap().len(), 64);
}

#[test]
fn score_requires_a_secret() {
    let dir = TempDir::new().unwrap();
    let answers = write_answers(dir.path());

    examkit()
        .current_dir(dir.path())
        .env_remove("EXAMKIT_INTEGRITY_SECRET")
        .env("HOME", dir.path())
        .arg("score")
        .arg("--exam")
        .arg(Path::new(env!("CARGO_MANIFEST_DIR")).join("../../exams/physics-101.toml"))
        .arg("--answers")
        .arg(&answers)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no integrity secret"));
}

#[test]
fn verify_accepts_untouched_submission() {
    let dir = TempDir::new().unwrap();
    let output = score_to(dir.path());

    examkit()
        .arg("verify")
        .arg("--submission")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Integrity: ok"))
        .stdout(predicate::str::contains("Score: 10 / 24"));
}

#[test]
fn verify_re_evaluates_tampered_submission() {
    let dir = TempDir::new().unwrap();
    let output = score_to(dir.path());

    let mut sealed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    sealed["finalScore"] = serde_json::json!(24.0);
    std::fs::write(&output, serde_json::to_string(&sealed).unwrap()).unwrap();

    examkit()
        .arg("verify")
        .arg("--submission")
        .arg(&output)
        .assert()
        .failure()
        .stdout(predicate::str::contains("integrity hash mismatch"))
        .stderr(predicate::str::contains("no exam given"));

    examkit()
        .arg("verify")
        .arg("--submission")
        .arg(&output)
        .arg("--exam")
        .arg("../../exams/physics-101.toml")
        .assert()
        .success()
        .stdout(predicate::str::contains("Re-evaluated score: 10 / 24 (claimed 24)"));
}

#[test]
fn verify_rejects_wrong_secret() {
    let dir = TempDir::new().unwrap();
    let output = score_to(dir.path());

    examkit()
        .env("EXAMKIT_INTEGRITY_SECRET", "another-secret")
        .arg("verify")
        .arg("--submission")
        .arg(&output)
        .assert()
        .failure()
        .stdout(predicate::str::contains("integrity hash mismatch"));
}

#[test]
fn timer_counts_down_and_auto_submits() {
    examkit()
        .arg("timer")
        .arg("--duration-secs")
        .arg("2")
        .arg("--precision-ms")
        .arg("250")
        .arg("--warn")
        .arg("1:One second left")
        .assert()
        .success()
        .stdout(predicate::str::contains("WARNING: One second left"))
        .stdout(predicate::str::contains("Time is up"));
}

#[test]
fn timer_json_without_auto_submit() {
    examkit()
        .arg("timer")
        .arg("--duration-secs")
        .arg("1")
        .arg("--precision-ms")
        .arg("250")
        .arg("--no-auto-submit")
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""type":"time_update""#))
        .stdout(predicate::str::contains(r#""type":"time_expired""#))
        .stdout(predicate::str::contains("auto_submit").not());
}

#[test]
fn timer_rejects_bad_warning() {
    examkit()
        .arg("timer")
        .arg("--duration-secs")
        .arg("5")
        .arg("--warn")
        .arg("soon")
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected SECS:MESSAGE"));
}

#[test]
fn timer_rejects_overflowing_duration() {
    examkit()
        .arg("timer")
        .arg("--duration-secs")
        .arg(u64::MAX.to_string())
        .assert()
        .failure()
        .stderr(predicate::str::contains("too long"));
}

#[test]
fn burst_settles_every_submission() {
    examkit()
        .arg("burst")
        .arg("--count")
        .arg("40")
        .arg("--workers")
        .arg("4")
        .arg("--failure-rate")
        .arg("0")
        .arg("--latency-ms")
        .arg("2")
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"))
        .stdout(predicate::str::contains("stored: 40"))
        .stdout(predicate::str::contains("pool size 4"));
}

#[test]
fn burst_writes_stored_submissions_to_jsonl() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("submissions.jsonl");

    examkit()
        .arg("burst")
        .arg("--count")
        .arg("12")
        .arg("--failure-rate")
        .arg("0")
        .arg("--latency-ms")
        .arg("0")
        .arg("--store")
        .arg(&store)
        .assert()
        .success()
        .stderr(predicate::str::contains("Submissions written to"));

    let content = std::fs::read_to_string(&store).unwrap();
    assert_eq!(content.lines().count(), 12);
    let row: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(row["submission"]["examId"], "burst");
}

#[test]
fn burst_failures_can_be_retried_from_the_journal() {
    let dir = TempDir::new().unwrap();
    let journal = dir.path().join("journal.jsonl");

    examkit()
        .arg("burst")
        .arg("--count")
        .arg("5")
        .arg("--failure-rate")
        .arg("1")
        .arg("--max-attempts")
        .arg("1")
        .arg("--latency-ms")
        .arg("0")
        .arg("--journal")
        .arg(&journal)
        .assert()
        .success()
        .stdout(predicate::str::contains("5 submission(s) need a manual retry"));

    examkit()
        .arg("queue")
        .arg("stats")
        .arg("--journal")
        .arg(&journal)
        .assert()
        .success()
        .stdout(predicate::str::contains("Failed submissions"))
        .stdout(predicate::str::contains("Total: 5"));

    let out = examkit()
        .arg("queue")
        .arg("stats")
        .arg("--journal")
        .arg(&journal)
        .arg("--format")
        .arg("json")
        .output()
        .unwrap();
    assert!(out.status.success());
    let summary: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let failed = summary["failedSubmissions"].as_array().unwrap();
    assert_eq!(failed.len(), 5);
    let id = failed[0]["submissionId"].as_str().unwrap().to_string();

    examkit()
        .arg("queue")
        .arg("retry")
        .arg("--journal")
        .arg(&journal)
        .arg("--id")
        .arg(&id)
        .assert()
        .success()
        .stdout(predicate::str::contains("Re-queued"));

    examkit()
        .arg("queue")
        .arg("retry")
        .arg("--journal")
        .arg(&journal)
        .arg("--id")
        .arg(&id)
        .assert()
        .failure()
        .stderr(predicate::str::contains("only failed submissions"));
}

#[test]
fn queue_stats_missing_journal() {
    examkit()
        .arg("queue")
        .arg("stats")
        .arg("--journal")
        .arg("no_such_journal.jsonl")
        .assert()
        .failure()
        .stderr(predicate::str::contains("journal not found"));
}

#[test]
fn help_output() {
    examkit()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Exam timing, scoring and submission pipeline"));
}

#[test]
fn version_output() {
    examkit()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("examkit"));
}
