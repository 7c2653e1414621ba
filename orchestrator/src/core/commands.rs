//! Comment command vocabulary and orchestrator report markers.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/[A-Za-z0-9_-]+").expect("command regex"));
static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*orchestrator:([a-z-]+)\s*-->").expect("marker regex")
});

/// A human approval command. Tokens are case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    Approve,
    ApprovePr,
    Retry,
    ApprovePlan,
    ApprovePlanSingle,
    RetryPlan,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::Approve,
        Command::ApprovePr,
        Command::Retry,
        Command::ApprovePlan,
        Command::ApprovePlanSingle,
        Command::RetryPlan,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Self::Approve => "/approve",
            Self::ApprovePr => "/approve-pr",
            Self::Retry => "/retry",
            Self::ApprovePlan => "/approve-plan",
            Self::ApprovePlanSingle => "/approve-plan-single",
            Self::RetryPlan => "/retry-plan",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.token() == token)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// All recognised command tokens in `body`, in order of appearance.
///
/// A token must start at a word boundary (so `https://host/approve` is not a
/// command) and must match the vocabulary exactly (`/approved` is not
/// `/approve`).
pub fn commands_in(body: &str) -> Vec<Command> {
    TOKEN_RE
        .find_iter(body)
        .filter(|m| {
            body[..m.start()]
                .chars()
                .next_back()
                .is_none_or(|prev| !(prev.is_alphanumeric() || matches!(prev, '_' | '-' | '/')))
        })
        .filter_map(|m| Command::from_token(m.as_str()))
        .collect()
}

/// The command a comment stands for: the last recognised token wins.
pub fn last_command(body: &str) -> Option<Command> {
    commands_in(body).pop()
}

/// Whether the comment carries nothing but commands (and whitespace).
pub fn is_command_only(body: &str) -> bool {
    let rest = TOKEN_RE.replace_all(body, "");
    !commands_in(body).is_empty() && rest.trim().is_empty()
}

/// Kind of report the orchestrator posts, embedded as an HTML comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportMarker {
    PlanProposed,
    PlanFailed,
    RunSucceeded,
    RunFailed,
}

impl ReportMarker {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlanProposed => "plan-proposed",
            Self::PlanFailed => "plan-failed",
            Self::RunSucceeded => "run-succeeded",
            Self::RunFailed => "run-failed",
        }
    }

    /// `<!-- orchestrator:<kind> -->`
    pub fn html(self) -> String {
        marker_html(self.as_str())
    }

    fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "plan-proposed" => Some(Self::PlanProposed),
            "plan-failed" => Some(Self::PlanFailed),
            "run-succeeded" => Some(Self::RunSucceeded),
            "run-failed" => Some(Self::RunFailed),
            _ => None,
        }
    }
}

pub const PLAN_BEGIN: &str = "plan-begin";
pub const PLAN_END: &str = "plan-end";

pub fn marker_html(kind: &str) -> String {
    format!("<!-- orchestrator:{kind} -->")
}

/// First report marker in the body, if any.
pub fn report_marker(body: &str) -> Option<ReportMarker> {
    MARKER_RE
        .captures_iter(body)
        .find_map(|caps| ReportMarker::from_kind(&caps[1]))
}

/// Whether the body carries any orchestrator marker.
pub fn has_marker(body: &str) -> bool {
    MARKER_RE.is_match(body)
}

/// Text between the plan-begin and plan-end markers, trimmed.
pub fn embedded_plan(body: &str) -> Option<&str> {
    let begin = marker_html(PLAN_BEGIN);
    let end = marker_html(PLAN_END);
    let start = body.find(&begin)? + begin.len();
    let stop = body[start..].find(&end)? + start;
    Some(body[start..stop].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_commands_anywhere_in_text() {
        assert_eq!(
            commands_in("Looks good, /approve please"),
            vec![Command::Approve]
        );
        assert_eq!(
            commands_in("/retry-plan\nthen /approve-plan-single"),
            vec![Command::RetryPlan, Command::ApprovePlanSingle]
        );
    }

    #[test]
    fn tokens_are_exact_and_case_sensitive() {
        assert!(commands_in("/Approve").is_empty());
        assert!(commands_in("/approved").is_empty());
        assert!(commands_in("/approve_pr").is_empty());
        assert_eq!(commands_in("/approve-pr."), vec![Command::ApprovePr]);
    }

    #[test]
    fn ignores_tokens_inside_urls_and_paths() {
        assert!(commands_in("see https://example.com/approve").is_empty());
        assert!(commands_in("src/retry").is_empty());
        assert!(commands_in("//retry").is_empty());
    }

    #[test]
    fn last_token_wins() {
        assert_eq!(
            last_command("/retry, no wait, /approve"),
            Some(Command::Approve)
        );
        assert_eq!(last_command("nothing here"), None);
    }

    #[test]
    fn command_only_comments() {
        assert!(is_command_only("  /approve \n"));
        assert!(!is_command_only("/approve but also rename the helper"));
        assert!(!is_command_only("just words"));
    }

    #[test]
    fn recognises_report_markers() {
        let body = format!("{}\n## Done", ReportMarker::RunSucceeded.html());
        assert_eq!(report_marker(&body), Some(ReportMarker::RunSucceeded));
        assert!(has_marker(&marker_html(PLAN_BEGIN)));
        assert_eq!(report_marker(&marker_html(PLAN_BEGIN)), None);
    }

    #[test]
    fn extracts_embedded_plan() {
        let body = format!(
            "intro\n{}\n## Summary\nx\n{}\noutro",
            marker_html(PLAN_BEGIN),
            marker_html(PLAN_END)
        );
        assert_eq!(embedded_plan(&body), Some("## Summary\nx"));
        assert_eq!(embedded_plan("no plan"), None);
    }
}
