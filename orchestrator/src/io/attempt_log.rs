//! Run artifacts under the output directory.
//!
//! Layout:
//!
//! ```text
//! <output>/attempts/<n>/meta.json
//! <output>/attempts/<n>/response.md
//! <output>/attempts/<n>/changes.json   (when the response parsed)
//! <output>/attempts/<n>/test.log       (when tests ran)
//! <output>/result.json
//! <output>/report.md
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::errors::ParseError;
use crate::core::types::{AttemptOutcome, AttemptRecord, Parsed, RunResult};

#[derive(Debug, Clone, Serialize)]
pub struct AttemptMeta<'a> {
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<&'a ParseError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply_error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a str>,
    pub files_applied: usize,
}

impl<'a> AttemptMeta<'a> {
    fn from_record(record: &'a AttemptRecord) -> Self {
        Self {
            attempt_number: record.attempt_number,
            outcome: record.outcome,
            duration_ms: record.duration_ms,
            parse_error: match &record.parsed {
                Parsed::Error { error } => Some(error),
                _ => None,
            },
            apply_error: record.apply_error.as_deref(),
            test_exit_code: record.test_exit_code,
            error: record.error.as_deref(),
            files_applied: record.applied.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttemptPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub response_path: PathBuf,
    pub changes_path: PathBuf,
    pub test_log_path: PathBuf,
    pub model_log_path: PathBuf,
}

impl AttemptPaths {
    pub fn new(output_dir: &Path, attempt: u32) -> Self {
        let dir = output_dir.join("attempts").join(attempt.to_string());
        Self {
            meta_path: dir.join("meta.json"),
            response_path: dir.join("response.md"),
            changes_path: dir.join("changes.json"),
            test_log_path: dir.join("test.log"),
            model_log_path: dir.join("model.log"),
            dir,
        }
    }
}

/// Writer for the artifacts of one run.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    output_dir: PathBuf,
}

impl RunArtifacts {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn attempt_paths(&self, attempt: u32) -> AttemptPaths {
        AttemptPaths::new(&self.output_dir, attempt)
    }

    pub fn result_path(&self) -> PathBuf {
        self.output_dir.join("result.json")
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join("report.md")
    }

    pub fn system_prompt_path(&self) -> PathBuf {
        self.output_dir.join("system_prompt.md")
    }

    /// Write the per-attempt files. `test.log` is written by the test runner.
    pub fn write_attempt(&self, record: &AttemptRecord) -> Result<AttemptPaths> {
        let paths = self.attempt_paths(record.attempt_number);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create attempt dir {}", paths.dir.display()))?;

        write_json(&paths.meta_path, &AttemptMeta::from_record(record))?;
        write_text(&paths.response_path, &record.model_response_text)?;
        if let Some(change_set) = record.parsed.change_set() {
            write_json(&paths.changes_path, change_set)?;
        }
        Ok(paths)
    }

    pub fn write_result(&self, result: &RunResult) -> Result<PathBuf> {
        let path = self.result_path();
        write_json(&path, result)?;
        Ok(path)
    }

    pub fn write_report(&self, report: &str) -> Result<PathBuf> {
        let path = self.report_path();
        write_text(&path, report)?;
        Ok(path)
    }
}

/// Load a `result.json` written by [`RunArtifacts::write_result`].
pub fn read_result(path: &Path) -> Result<RunResult> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

pub(crate) fn write_text(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
