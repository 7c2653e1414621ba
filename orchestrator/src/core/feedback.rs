//! Corrective feedback built from the previous attempt.

use serde::Serialize;

use crate::core::types::{AttemptOutcome, AttemptRecord, Parsed};

/// How much of an unparseable response is echoed back to the model.
pub const RESPONSE_ECHO_CHARS: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feedback {
    pub attempt_number: u32,
    /// Short statement of what went wrong.
    pub headline: String,
    /// Label for `detail` (`Test Output`, `Parse Error`, ...).
    pub detail_label: String,
    pub detail: String,
    /// Applied changes, one `action path` per line (test failures only).
    pub changes_summary: Option<String>,
    pub instruction: String,
}

impl Feedback {
    /// Feedback for the attempt after `previous`; `None` if it succeeded.
    pub fn from_attempt(previous: &AttemptRecord) -> Option<Self> {
        let n = previous.attempt_number;
        let feedback = match previous.outcome {
            AttemptOutcome::Success => return None,
            AttemptOutcome::TestFailure => Self {
                attempt_number: n,
                headline: format!(
                    "Your previous changes caused test failures (exit code {}).",
                    previous
                        .test_exit_code
                        .map_or_else(|| "unknown".to_string(), |c| c.to_string())
                ),
                detail_label: "Test Output".to_string(),
                detail: previous.test_output.clone().unwrap_or_default(),
                changes_summary: previous
                    .parsed
                    .change_set()
                    .map(|set| set.summary())
                    .filter(|s| !s.is_empty()),
                instruction: "Please analyze the failures and provide corrected changes."
                    .to_string(),
            },
            AttemptOutcome::ParseFailure => {
                let error = match &previous.parsed {
                    Parsed::Error { error } => error.to_string(),
                    _ => "response could not be parsed".to_string(),
                };
                let echo: String = previous
                    .model_response_text
                    .chars()
                    .take(RESPONSE_ECHO_CHARS)
                    .collect();
                Self {
                    attempt_number: n,
                    headline: format!("Your previous response could not be parsed: {error}."),
                    detail_label: "Start of Your Previous Response".to_string(),
                    detail: echo,
                    changes_summary: None,
                    instruction: "Respond again using exactly the `## Changes` format in the contract, with one `### File:` / `### Action:` block per file.".to_string(),
                }
            }
            AttemptOutcome::ApplyFailure => Self {
                attempt_number: n,
                headline: "Your previous changes could not be applied to the repository."
                    .to_string(),
                detail_label: "Apply Error".to_string(),
                detail: previous.apply_error.clone().unwrap_or_default(),
                changes_summary: None,
                instruction: "Use `create` only for new files, `modify` or `delete` only for existing files, and keep every path relative to the repository root.".to_string(),
            },
            AttemptOutcome::ModelFailure | AttemptOutcome::TimedOut => Self {
                attempt_number: n,
                headline: format!(
                    "The previous attempt did not complete ({}).",
                    previous.outcome.as_str().replace('_', " ")
                ),
                detail_label: "Error".to_string(),
                detail: previous.error.clone().unwrap_or_default(),
                changes_summary: None,
                instruction: "Please provide your changes again; keep the response focused."
                    .to_string(),
            },
        };
        Some(feedback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ParseError;
    use crate::core::types::{ChangeSet, FileChange};

    fn record(outcome: AttemptOutcome) -> AttemptRecord {
        AttemptRecord {
            attempt_number: 1,
            model_response_text: String::new(),
            parsed: Parsed::NotParsed,
            applied: Vec::new(),
            apply_error: None,
            test_exit_code: None,
            test_output: None,
            error: None,
            outcome,
            duration_ms: 0,
        }
    }

    #[test]
    fn success_yields_no_feedback() {
        assert_eq!(Feedback::from_attempt(&record(AttemptOutcome::Success)), None);
    }

    #[test]
    fn test_failure_carries_output_and_changes() {
        let mut prev = record(AttemptOutcome::TestFailure);
        prev.test_exit_code = Some(1);
        prev.test_output = Some("AssertionError: x != y".to_string());
        prev.parsed = Parsed::ChangeSet {
            change_set: ChangeSet {
                changes: vec![FileChange::modify("src/a.py", "x")],
                explanation: String::new(),
            },
        };
        let fb = Feedback::from_attempt(&prev).expect("feedback");
        assert!(fb.headline.contains("exit code 1"));
        assert_eq!(fb.detail, "AssertionError: x != y");
        assert_eq!(fb.changes_summary.as_deref(), Some("modify src/a.py"));
    }

    #[test]
    fn parse_failure_echoes_bounded_response() {
        let mut prev = record(AttemptOutcome::ParseFailure);
        prev.model_response_text = "z".repeat(RESPONSE_ECHO_CHARS * 2);
        prev.parsed = Parsed::Error {
            error: ParseError::MissingChangesSection,
        };
        let fb = Feedback::from_attempt(&prev).expect("feedback");
        assert!(fb.headline.contains("no `## Changes` section"));
        assert_eq!(fb.detail.chars().count(), RESPONSE_ECHO_CHARS);
    }

    #[test]
    fn apply_and_timeout_failures_carry_their_error() {
        let mut prev = record(AttemptOutcome::ApplyFailure);
        prev.apply_error = Some("cannot create `a.txt`: file already exists".to_string());
        assert!(
            Feedback::from_attempt(&prev)
                .expect("feedback")
                .detail
                .contains("already exists")
        );

        let mut prev = record(AttemptOutcome::TimedOut);
        prev.error = Some("tests timed out".to_string());
        let fb = Feedback::from_attempt(&prev).expect("feedback");
        assert!(fb.headline.contains("timed out"));
        assert_eq!(fb.detail, "tests timed out");
    }
}
