//! Scripted collaborators and fixture builders for tests.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::issue::{Comment, IssueContext, LabelAction, LabelEvent, Reaction};
use crate::io::model::{ModelInvoker, ModelRequest};
use crate::io::test_runner::{TestReport, TestRequest, TestRunner, write_test_log};
use crate::io::worktree::SnapshotWorkTree;

/// Model that replays a fixed script and records every prompt it saw.
#[derive(Debug)]
pub struct ScriptedModel {
    script: VecDeque<Result<String>>,
    requests: Vec<ModelRequest>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<String>>) -> Self {
        Self {
            script: script.into(),
            requests: Vec::new(),
        }
    }

    /// Script made only of successful responses.
    pub fn responses(responses: Vec<String>) -> Self {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    pub fn requests(&self) -> &[ModelRequest] {
        &self.requests
    }

    pub fn prompts(&self) -> Vec<&str> {
        self.requests.iter().map(|r| r.prompt.as_str()).collect()
    }
}

impl ModelInvoker for ScriptedModel {
    fn invoke(&mut self, request: &ModelRequest) -> Result<String> {
        self.requests.push(request.clone());
        self.script
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("model script exhausted")))
    }
}

/// One scripted verification result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedTest {
    pub exit_code: i32,
    pub output: String,
    pub timed_out: bool,
}

impl ScriptedTest {
    pub fn pass() -> Self {
        Self {
            exit_code: 0,
            output: "ok".to_string(),
            timed_out: false,
        }
    }

    pub fn fail(exit_code: i32, output: &str) -> Self {
        Self {
            exit_code,
            output: output.to_string(),
            timed_out: false,
        }
    }

    pub fn timed_out(output: &str) -> Self {
        Self {
            exit_code: -1,
            output: output.to_string(),
            timed_out: true,
        }
    }
}

/// Test runner that replays scripted results and writes the usual test log.
#[derive(Debug, Default)]
pub struct ScriptedTestRunner {
    script: VecDeque<ScriptedTest>,
    requests: Vec<TestRequest>,
}

impl ScriptedTestRunner {
    pub fn new(script: Vec<ScriptedTest>) -> Self {
        Self {
            script: script.into(),
            requests: Vec::new(),
        }
    }

    pub fn requests(&self) -> &[TestRequest] {
        &self.requests
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&mut self, request: &TestRequest) -> Result<TestReport> {
        self.requests.push(request.clone());
        let next = self
            .script
            .pop_front()
            .ok_or_else(|| anyhow!("test script exhausted"))?;
        let report = TestReport {
            exit_code: next.exit_code,
            output: next.output,
            timed_out: next.timed_out,
        };
        if let Some(path) = &request.log_path {
            write_test_log(path, &report)?;
        }
        Ok(report)
    }
}

/// Temporary pristine repository plus a snapshot tree rooted beside it.
#[derive(Debug)]
pub struct RepoFixture {
    temp: TempDir,
}

impl RepoFixture {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        fs::create_dir_all(temp.path().join("repo")).context("create repo dir")?;
        Ok(Self { temp })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn repo(&self) -> PathBuf {
        self.temp.path().join("repo")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.temp.path().join("out")
    }

    /// Seed a file in the pristine repository.
    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.repo().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn snapshot_tree(&self) -> SnapshotWorkTree {
        SnapshotWorkTree::new(self.repo(), self.temp.path().join("trees"))
    }
}

/// Model response that creates one file.
pub fn response_creating(path: &str, content: &str) -> String {
    format!(
        "## Explanation\nAdd `{path}`.\n\n## Changes\n\n### File: `{path}`\n### Action: create\n```text\n{content}\n```\n"
    )
}

/// RFC 3339 timestamp `minute` minutes after a fixed origin.
pub fn at(minute: u32) -> String {
    format!("2024-05-01T{:02}:{:02}:00Z", 10 + minute / 60, minute % 60)
}

pub fn issue(number: u64) -> IssueContext {
    IssueContext {
        number,
        title: format!("Issue {number}"),
        body: "Something is broken.".to_string(),
        ..IssueContext::default()
    }
}

pub fn comment(id: u64, author: &str, body: &str, minute: u32) -> Comment {
    Comment {
        id,
        author: author.to_string(),
        body: body.to_string(),
        created_at: at(minute),
    }
}

pub fn label_added(label: &str, minute: u32) -> LabelEvent {
    LabelEvent {
        label: label.to_string(),
        action: LabelAction::Added,
        actor: "alice".to_string(),
        created_at: at(minute),
    }
}

pub fn label_removed(label: &str, minute: u32) -> LabelEvent {
    LabelEvent {
        label: label.to_string(),
        action: LabelAction::Removed,
        actor: "alice".to_string(),
        created_at: at(minute),
    }
}

pub fn thumbs_up(author: &str, minute: u32) -> Reaction {
    Reaction {
        author: author.to_string(),
        content: "+1".to_string(),
        created_at: at(minute),
        comment_id: None,
    }
}
