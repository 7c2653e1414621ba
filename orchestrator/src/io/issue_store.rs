//! Issue snapshot and saved plan loading with schema validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;

use crate::core::issue::IssueContext;
use crate::core::plan::PlanDocument;

const ISSUE_SCHEMA: &str = include_str!("../../schemas/issue_context.schema.json");

/// Load an issue snapshot from JSON and validate it against the bundled schema.
pub fn load_issue(path: &Path) -> Result<IssueContext> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read issue {}", path.display()))?;
    parse_issue(&contents).with_context(|| format!("load issue {}", path.display()))
}

pub fn parse_issue(contents: &str) -> Result<IssueContext> {
    let value: Value = serde_json::from_str(contents).context("parse issue json")?;
    validate_schema(&value)?;
    serde_json::from_value(value).context("deserialize issue")
}

/// Load a `plan.json` written by a planning run.
pub fn load_plan(path: &Path) -> Result<PlanDocument> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse plan {}", path.display()))
}

fn validate_schema(issue: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(ISSUE_SCHEMA).context("parse issue schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(issue) {
        let messages = compiled
            .iter_errors(issue)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "issue schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::issue::LabelAction;

    #[test]
    fn loads_a_valid_snapshot() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("issue.json");
        fs::write(
            &path,
            r#"{
                "number": 42,
                "title": "Crash on empty input",
                "body": "Steps to reproduce...",
                "labels": ["hal9000"],
                "comments": [
                    {"id": 1, "author": "alice", "body": "/approve", "created_at": "2024-05-01T10:00:00Z"}
                ],
                "label_events": [
                    {"label": "hal9000", "action": "added", "actor": "alice", "created_at": "2024-05-01T09:00:00Z"}
                ],
                "reactions": []
            }"#,
        )
        .expect("write");

        let issue = load_issue(&path).expect("load");
        assert_eq!(issue.number, 42);
        assert!(issue.has_label("hal9000"));
        assert_eq!(issue.label_events[0].action, LabelAction::Added);
        assert_eq!(issue.comments[0].body, "/approve");
    }

    #[test]
    fn minimal_snapshot_defaults_collections() {
        let issue = parse_issue(r#"{"number": 7}"#).expect("parse");
        assert!(issue.comments.is_empty());
        assert!(issue.labels.is_empty());
    }

    #[test]
    fn rejects_schema_violations() {
        let err = parse_issue(r#"{"number": 0, "labels": [""]}"#).expect_err("invalid");
        assert!(format!("{err:#}").contains("issue schema validation failed"));

        let err = parse_issue(
            r#"{"number": 3, "label_events": [{"label": "x", "action": "renamed", "created_at": "t"}]}"#,
        )
        .expect_err("invalid action");
        assert!(format!("{err:#}").contains("schema"));
    }

    #[test]
    fn rejects_unknown_top_level_fields() {
        assert!(parse_issue(r#"{"number": 3, "state": "open"}"#).is_err());
    }
}
