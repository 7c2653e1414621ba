//! Shared deterministic types for orchestrator core logic.
//!
//! These types define stable contracts between the parser, applier, retry loop,
//! and reporter. They must not depend on external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::errors::ParseError;

/// File operation declared by a model response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Modify,
    Delete,
}

impl ChangeAction {
    /// Match an action token (ASCII case-insensitive).
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "create" => Some(Self::Create),
            "modify" => Some(Self::Modify),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }

    /// Whether the action carries a content block.
    pub fn requires_content(self) -> bool {
        !matches!(self, Self::Delete)
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file operation.
///
/// `content` is `Some` for create/modify and `None` for delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub action: ChangeAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl FileChange {
    pub fn create(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            action: ChangeAction::Create,
            content: Some(content.into()),
        }
    }

    pub fn modify(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            action: ChangeAction::Modify,
            content: Some(content.into()),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            action: ChangeAction::Delete,
            content: None,
        }
    }
}

/// Ordered file operations extracted from one model response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changes: Vec<FileChange>,
    #[serde(default)]
    pub explanation: String,
}

impl ChangeSet {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// One line per change (`create src/foo.rs`), used as retry feedback.
    pub fn summary(&self) -> String {
        self.changes
            .iter()
            .map(|change| format!("{} {}", change.action, change.path))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A completed file operation with the contents on either side of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub path: String,
    pub action: ChangeAction,
    /// File contents before the operation (`None` for create).
    pub before: Option<String>,
    /// File contents after the operation (`None` for delete).
    pub after: Option<String>,
}

/// Classification of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Changes applied and the test command exited 0.
    Success,
    /// Changes applied but the test command exited non-zero.
    TestFailure,
    /// The response did not match the change grammar.
    ParseFailure,
    /// A file operation was rejected by the applier.
    ApplyFailure,
    /// The model collaborator returned an error instead of a response.
    ModelFailure,
    /// The per-attempt budget elapsed during model invocation or testing.
    TimedOut,
}

impl AttemptOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::TestFailure => "test_failure",
            Self::ParseFailure => "parse_failure",
            Self::ApplyFailure => "apply_failure",
            Self::ModelFailure => "model_failure",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Parse result stored on an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Parsed {
    /// No response was obtained, so nothing was parsed.
    NotParsed,
    ChangeSet { change_set: ChangeSet },
    Error { error: ParseError },
}

impl Parsed {
    pub fn change_set(&self) -> Option<&ChangeSet> {
        match self {
            Self::ChangeSet { change_set } => Some(change_set),
            _ => None,
        }
    }
}

/// Immutable record of one generate -> parse -> apply -> test iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-indexed attempt number within the run.
    pub attempt_number: u32,
    pub model_response_text: String,
    pub parsed: Parsed,
    #[serde(default)]
    pub applied: Vec<AppliedChange>,
    pub apply_error: Option<String>,
    pub test_exit_code: Option<i32>,
    pub test_output: Option<String>,
    /// Model or test infrastructure failure text.
    pub error: Option<String>,
    pub outcome: AttemptOutcome,
    pub duration_ms: u64,
}

/// Which flow started the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Direct,
    Planned,
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    ExhaustedRetries,
}

/// Terminal summary of a retry loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub outcome: RunOutcome,
    pub origin: Origin,
    pub max_retries: u32,
    pub attempts: Vec<AttemptRecord>,
    pub final_changeset: Option<ChangeSet>,
}

impl RunResult {
    pub fn last_attempt(&self) -> Option<&AttemptRecord> {
        self.attempts.last()
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }
}
