//! Verification command adapter.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::io::process::run_command_with_timeout;

#[derive(Debug, Clone)]
pub struct TestRequest {
    pub attempt: u32,
    pub workdir: PathBuf,
    /// Opaque shell command line.
    pub command: String,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub log_path: Option<PathBuf>,
}

/// Exit status and captured output of a verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    /// `-1` when the process was killed.
    pub exit_code: i32,
    /// stdout, then stderr, trimmed.
    pub output: String,
    pub timed_out: bool,
}

impl TestReport {
    pub fn passed(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

pub trait TestRunner {
    /// `Err` means the command could not be run at all; a failing command is
    /// an `Ok` report with a non-zero exit code.
    fn run(&mut self, request: &TestRequest) -> Result<TestReport>;
}

/// Runs the command through `sh -c` in the working tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellTestRunner;

impl TestRunner for ShellTestRunner {
    #[instrument(skip_all, fields(attempt = request.attempt, timeout_secs = request.timeout.as_secs()))]
    fn run(&mut self, request: &TestRequest) -> Result<TestReport> {
        if request.command.trim().is_empty() {
            return Err(anyhow!("test command is empty"));
        }
        info!(command = %request.command, "running tests");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&request.command)
            .current_dir(&request.workdir);
        let output = run_command_with_timeout(
            cmd,
            None,
            request.timeout,
            request.output_limit_bytes,
        )
        .context("run test command")?;

        let mut text = output.combined_text();
        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "test command timed out");
            text.push_str(&format!(
                "\n[test command timed out after {}s]",
                request.timeout.as_secs()
            ));
        }
        let report = TestReport {
            exit_code: output.exit_code(),
            output: text,
            timed_out: output.timed_out,
        };

        if let Some(path) = &request.log_path {
            write_test_log(path, &report)?;
        }
        info!(exit_code = report.exit_code, "tests finished");
        Ok(report)
    }
}

pub fn write_test_log(path: &Path, report: &TestReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create test log dir {}", parent.display()))?;
    }
    let mut buf = format!("exit_code: {}\n\n", report.exit_code);
    buf.push_str(&report.output);
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write test log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(workdir: &Path, command: &str, timeout: Duration) -> TestRequest {
        TestRequest {
            attempt: 1,
            workdir: workdir.to_path_buf(),
            command: command.to_string(),
            timeout,
            output_limit_bytes: 10_000,
            log_path: Some(workdir.join("test.log")),
        }
    }

    #[test]
    fn reports_exit_code_and_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = ShellTestRunner
            .run(&request(
                temp.path(),
                "echo 'AssertionError: x != y' >&2; exit 1",
                Duration::from_secs(10),
            ))
            .expect("run");
        assert_eq!(report.exit_code, 1);
        assert!(!report.passed());
        assert_eq!(report.output, "AssertionError: x != y");
        let log = fs::read_to_string(temp.path().join("test.log")).expect("log");
        assert!(log.starts_with("exit_code: 1"));
    }

    #[test]
    fn runs_in_the_working_tree() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("marker.txt"), "here").expect("seed");
        let report = ShellTestRunner
            .run(&request(temp.path(), "cat marker.txt", Duration::from_secs(10)))
            .expect("run");
        assert!(report.passed());
        assert_eq!(report.output, "here");
    }

    #[test]
    fn timeout_is_reported_not_raised() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = ShellTestRunner
            .run(&request(temp.path(), "sleep 5", Duration::from_millis(200)))
            .expect("run");
        assert!(report.timed_out);
        assert!(!report.passed());
    }
}
