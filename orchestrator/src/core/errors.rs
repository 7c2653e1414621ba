//! Typed error taxonomy for the orchestrator.
//!
//! Parse and apply errors are recoverable: the retry loop records them on the
//! attempt and turns them into feedback. Configuration errors are fatal and are
//! raised before the first attempt.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a model response could not be turned into a [`ChangeSet`](crate::core::types::ChangeSet).
///
/// Line numbers are 1-indexed into the response text.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseError {
    #[error("response has no `## Changes` section")]
    MissingChangesSection,
    #[error("`## Changes` section declares no file blocks")]
    NoChanges,
    #[error("line {line}: file block without a path")]
    MissingPath { line: usize },
    #[error("line {line}: no `### Action:` header for `{path}`")]
    MissingAction { line: usize, path: String },
    #[error("line {line}: unknown action `{token}` for `{path}` (expected create, modify, or delete)")]
    UnknownAction {
        line: usize,
        path: String,
        token: String,
    },
    #[error("line {line}: `{action}` of `{path}` has no fenced content block")]
    MissingContent {
        line: usize,
        path: String,
        action: String,
    },
    #[error("line {line}: `delete` of `{path}` must not carry a content block")]
    UnexpectedContent { line: usize, path: String },
    #[error("line {line}: content block for `{path}` is never closed")]
    UnterminatedBlock { line: usize, path: String },
    #[error("line {line}: `{path}` already appears earlier in the change set")]
    DuplicatePath { line: usize, path: String },
}

/// Why a file operation could not be applied to the working tree.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("path `{path}` escapes the repository root")]
    PathEscape { path: String },
    #[error("cannot create `{path}`: file already exists")]
    AlreadyExists { path: String },
    #[error("cannot {action} `{path}`: file not found")]
    NotFound { path: String, action: String },
    #[error("cannot {action} `{path}`: not a regular file")]
    NotAFile { path: String, action: String },
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ApplyError {
    pub fn is_path_escape(&self) -> bool {
        matches!(self, Self::PathEscape { .. })
    }
}

/// Invalid orchestrator configuration. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_retries must be >= 1 (got {0})")]
    NonPositiveMaxRetries(i64),
    #[error("max_retries must be <= {max} (got {0})", max = u32::MAX)]
    MaxRetriesTooLarge(i64),
    #[error("test_command must not be empty")]
    EmptyTestCommand,
    #[error("{0} must be > 0")]
    ZeroTimeout(&'static str),
    #[error("{0} must be > 0")]
    ZeroOutputLimit(&'static str),
    #[error("model.command must be a non-empty array")]
    EmptyModelCommand,
    #[error("labels.direct and labels.plan must differ (both are `{0}`)")]
    SameTriggerLabels(String),
}

/// Why a planning response could not be turned into a plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("plan response is empty")]
    Empty,
    #[error("plan response has none of the expected sections (Summary, Implementation Steps, ...)")]
    NoSections,
}

/// The per-attempt budget elapsed during `stage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{stage} timed out")]
pub struct TimedOut {
    pub stage: &'static str,
}
