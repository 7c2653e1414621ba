//! CLI tests for the orchestrator binary.
//!
//! Spawns the binary and verifies output and exit codes for parsing, applying,
//! evaluating, and rendering.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use orchestrator::core::types::{
    AttemptOutcome, AttemptRecord, ChangeSet, FileChange, Origin, Parsed, RunOutcome, RunResult,
};
use orchestrator::exit_codes;
use orchestrator::io::attempt_log::RunArtifacts;

const RESPONSE: &str = "## Explanation\nAdd a greeting.\n\n## Changes\n\n### File: `src/foo.txt`\n### Action: create\n```text\nhello\n```\n";

fn orchestrator(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_orchestrator"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn orchestrator")
}

#[test]
fn parse_prints_change_set_json() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("response.md"), RESPONSE).expect("write");

    let output = orchestrator(temp.path(), &["parse", "response.md"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let change_set: ChangeSet = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(change_set.changes, vec![FileChange::create("src/foo.txt", "hello")]);
    assert_eq!(change_set.explanation, "Add a greeting.");
}

#[test]
fn parse_reads_stdin() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut child = Command::new(env!("CARGO_BIN_EXE_orchestrator"))
        .current_dir(temp.path())
        .args(["parse", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(RESPONSE.as_bytes())
        .expect("write stdin");
    let output = child.wait_with_output().expect("wait");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
}

#[test]
fn parse_error_exits_invalid_with_line_number() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join("bad.md"),
        "## Changes\n### File: a.txt\n### Action: rename\n",
    )
    .expect("write");

    let output = orchestrator(temp.path(), &["parse", "bad.md"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("line 3"), "{stderr}");
    assert!(stderr.contains("rename"), "{stderr}");
}

#[test]
fn apply_writes_files_under_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(temp.path().join("repo")).expect("mkdir");
    fs::write(temp.path().join("response.md"), RESPONSE).expect("write");

    let output = orchestrator(temp.path(), &["apply", "--root", "repo", "response.md"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        fs::read_to_string(temp.path().join("repo/src/foo.txt")).expect("read"),
        "hello"
    );
}

#[test]
fn apply_rejects_escaping_paths() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(temp.path().join("repo")).expect("mkdir");
    fs::write(
        temp.path().join("response.md"),
        RESPONSE.replace("src/foo.txt", "../outside.txt"),
    )
    .expect("write");

    let output = orchestrator(temp.path(), &["apply", "--root", "repo", "response.md"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(!temp.path().join("outside.txt").exists());
}

#[test]
fn evaluate_prints_decision_and_maps_exit_codes() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join("started.json"),
        r#"{
            "number": 5,
            "labels": ["hal9000"],
            "label_events": [
                {"label": "hal9000", "action": "added", "actor": "alice", "created_at": "2024-05-01T10:00:00Z"}
            ]
        }"#,
    )
    .expect("write");
    fs::write(
        temp.path().join("dual.json"),
        r#"{"number": 6, "labels": ["hal9000", "hal9000-plan"]}"#,
    )
    .expect("write");

    let output = orchestrator(temp.path(), &["evaluate", "--issue", "started.json"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let decision: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(decision["state"]["phase"], "implementing");
    assert_eq!(decision["actions"][0]["kind"], "start_run");

    let output = orchestrator(temp.path(), &["evaluate", "--issue", "dual.json"]);
    assert_eq!(output.status.code(), Some(exit_codes::REJECTED));
}

#[test]
fn invalid_config_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("issue.json"), r#"{"number": 5}"#).expect("write");
    fs::write(temp.path().join("bad.toml"), "max_retries = 0\n").expect("write");

    let output = orchestrator(
        temp.path(),
        &["--config", "bad.toml", "evaluate", "--issue", "issue.json"],
    );

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("max_retries"));
}

#[test]
fn render_prints_saved_success_report() {
    let temp = tempfile::tempdir().expect("tempdir");
    let change_set = ChangeSet {
        changes: vec![FileChange::create("src/foo.txt", "hello")],
        explanation: "Add a greeting.".to_string(),
    };
    let result = RunResult {
        outcome: RunOutcome::Success,
        origin: Origin::Direct,
        max_retries: 3,
        attempts: vec![AttemptRecord {
            attempt_number: 1,
            model_response_text: RESPONSE.to_string(),
            parsed: Parsed::ChangeSet {
                change_set: change_set.clone(),
            },
            applied: Vec::new(),
            apply_error: None,
            test_exit_code: Some(0),
            test_output: Some("ok".to_string()),
            error: None,
            outcome: AttemptOutcome::Success,
            duration_ms: 5,
        }],
        final_changeset: Some(change_set),
    };
    RunArtifacts::new(temp.path())
        .write_result(&result)
        .expect("write result");

    let output = orchestrator(
        temp.path(),
        &["render", "--result", "result.json", "--number", "14"],
    );

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("<!-- orchestrator:run-succeeded -->"));
    assert!(stdout.contains("hal9000/issue-14"));
}

/// Full `run` through a stub model transport and a real test command.
#[cfg(unix)]
#[test]
fn run_resolves_issue_with_command_transport() {
    use std::os::unix::fs::PermissionsExt;

    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    fs::create_dir_all(root.join("repo")).expect("mkdir");
    fs::write(root.join("response.md"), RESPONSE).expect("write");
    let transport = root.join("transport.sh");
    fs::write(
        &transport,
        format!(
            "#!/bin/sh\ncat > /dev/null\ncat '{}'\n",
            root.join("response.md").display()
        ),
    )
    .expect("write transport");
    fs::set_permissions(&transport, fs::Permissions::from_mode(0o755)).expect("chmod");
    fs::write(
        root.join("config.toml"),
        format!(
            "max_retries = 2\ntest_command = 'test \"$(cat src/foo.txt)\" = hello'\n\n[model]\ncommand = ['{}']\n",
            transport.display()
        ),
    )
    .expect("write config");
    fs::write(
        root.join("issue.json"),
        r#"{"number": 31, "title": "Add greeting", "labels": ["hal9000"]}"#,
    )
    .expect("write issue");

    let output = orchestrator(
        root,
        &[
            "--config",
            "config.toml",
            "run",
            "--issue",
            "issue.json",
            "--root",
            "repo",
            "--output-dir",
            "out",
        ],
    );

    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("Resolved in 1 attempt"));
    assert!(root.join("out/result.json").is_file());
    assert!(root.join("out/report.md").is_file());
    assert!(root.join("out/attempts/1/response.md").is_file());
}
