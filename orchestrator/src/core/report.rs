//! Markdown reports posted back to the issue.
//!
//! Every report embeds an orchestrator marker so later replays can tell it
//! apart from human comments. Rendering is pure; posting is the caller's job.

use std::path::Path;

use crate::core::commands::{Command, PLAN_BEGIN, PLAN_END, ReportMarker, marker_html};
use crate::core::diff::unified_diff;
use crate::core::plan::PlanDocument;
use crate::core::types::{
    AppliedChange, AttemptRecord, ChangeAction, ChangeSet, Parsed, RunOutcome, RunResult,
};

/// Hosting platforms reject comments above ~65k characters.
pub const REPORT_CHAR_LIMIT: usize = 65_000;
const TRUNCATED_KEEP: usize = 64_000;
const FAILURE_OUTPUT_CHARS: usize = 3_000;
const DIFF_CONTEXT: usize = 3;

/// Issue-level facts a report needs beyond the run itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportContext {
    pub issue: u64,
    pub branch: String,
    pub trigger_label: String,
}

/// Success or failure report for a finished run.
pub fn render_run(result: &RunResult, ctx: &ReportContext) -> String {
    match result.outcome {
        RunOutcome::Success => render_success(result, ctx),
        RunOutcome::ExhaustedRetries => render_failure(result, ctx),
    }
}

fn render_success(result: &RunResult, ctx: &ReportContext) -> String {
    let attempts = result.attempts.len();
    let mut out = Vec::new();
    out.push(ReportMarker::RunSucceeded.html());
    out.push("## 🤖 Hal 9000 - Proposed Changes".to_string());
    out.push(String::new());
    out.push(format!(
        "Resolved in {attempts} {} (budget {}). Tests pass.",
        plural(attempts, "attempt"),
        result.max_retries
    ));
    out.push(String::new());

    let change_set = result.final_changeset.clone().unwrap_or_default();
    if !change_set.explanation.is_empty() {
        out.push("### Explanation".to_string());
        out.push(String::new());
        out.push(change_set.explanation.clone());
        out.push(String::new());
    }

    out.push("### Changed Files".to_string());
    out.push(String::new());
    let applied = successful_changes(result, &change_set);
    for change in &applied {
        out.push(render_file(change));
        out.push(String::new());
    }

    out.push("---".to_string());
    out.push(String::new());
    out.push(format!(
        "**To approve these changes**, react with 👍 to this comment or reply with `{}`.",
        Command::Approve
    ));
    out.push(String::new());
    out.push(format!(
        "This will create a branch `{}` with these changes. Reply with `{}` to run again.",
        ctx.branch,
        Command::Retry
    ));
    cap(out.join("\n"))
}

/// The applied changes of the winning attempt, or the change set itself when
/// nothing was recorded.
fn successful_changes(result: &RunResult, change_set: &ChangeSet) -> Vec<AppliedChange> {
    if let Some(last) = result.last_attempt().filter(|a| !a.applied.is_empty()) {
        return last.applied.clone();
    }
    change_set
        .changes
        .iter()
        .map(|change| AppliedChange {
            path: change.path.clone(),
            action: change.action,
            before: None,
            after: change.content.clone(),
        })
        .collect()
}

fn render_file(change: &AppliedChange) -> String {
    let emoji = match change.action {
        ChangeAction::Create => "✨",
        ChangeAction::Modify => "✏️",
        ChangeAction::Delete => "🗑️",
    };
    let mut out = vec![
        "<details>".to_string(),
        format!(
            "<summary>{emoji} <code>{}</code> ({})</summary>",
            change.path, change.action
        ),
        String::new(),
    ];

    let before = change.before.as_deref().unwrap_or_default();
    let after = change.after.as_deref().unwrap_or_default();
    match change.action {
        ChangeAction::Create => push_fenced(&mut out, language_for(&change.path), after),
        ChangeAction::Modify => {
            let diff = unified_diff(&change.path, before, after, DIFF_CONTEXT);
            if diff.is_empty() {
                out.push("*No changes detected*".to_string());
            } else {
                push_fenced(&mut out, "diff", diff.trim_end());
            }
        }
        ChangeAction::Delete => {
            let removed = before
                .lines()
                .map(|line| format!("- {line}"))
                .collect::<Vec<_>>()
                .join("\n");
            push_fenced(&mut out, "diff", &removed);
        }
    }

    out.push(String::new());
    out.push("</details>".to_string());
    out.join("\n")
}

fn render_failure(result: &RunResult, ctx: &ReportContext) -> String {
    let attempts = result.attempts.len();
    let output = result
        .last_attempt()
        .map(failure_text)
        .unwrap_or_else(|| "Unknown error - no output captured".to_string());

    let mut out = Vec::new();
    out.push(ReportMarker::RunFailed.html());
    out.push("## 🔴 Hal 9000".to_string());
    out.push(String::new());
    out.push("> I'm sorry. I'm afraid I can't do that.".to_string());
    out.push(String::new());
    out.push(format!(
        "I wasn't able to solve this issue after {attempts} {}.",
        plural(attempts, "attempt")
    ));
    out.push(String::new());
    out.push("### Last Error".to_string());
    out.push(String::new());
    out.push("<details>".to_string());
    out.push("<summary>Output from final attempt</summary>".to_string());
    out.push(String::new());
    push_fenced(&mut out, "", &truncate_chars(&output, FAILURE_OUTPUT_CHARS));
    out.push(String::new());
    out.push("</details>".to_string());
    out.push(String::new());
    out.push("### What to do next".to_string());
    out.push(String::new());
    out.push("- Review the output above to understand what's failing".to_string());
    out.push("- Consider breaking the issue down into smaller tasks".to_string());
    out.push("- Add more context or specific requirements to the issue description".to_string());
    out.push(format!(
        "- Comment `{}` to try again, or remove the `{}` label to cancel",
        Command::Retry,
        ctx.trigger_label
    ));
    cap(out.join("\n"))
}

/// What went wrong on an attempt, most specific first.
pub fn failure_text(attempt: &AttemptRecord) -> String {
    if let Some(output) = attempt.test_output.as_deref().filter(|o| !o.is_empty()) {
        return output.to_string();
    }
    if let Some(err) = &attempt.apply_error {
        return format!("apply failed: {err}");
    }
    if let Parsed::Error { error } = &attempt.parsed {
        return format!("parse failed: {error}");
    }
    if let Some(err) = &attempt.error {
        return err.clone();
    }
    format!("attempt ended with {}", attempt.outcome.as_str())
}

/// Plan proposal with approval instructions.
pub fn render_plan(plan: &PlanDocument, implementation_model: &str, plan_label: &str) -> String {
    let mut out = Vec::new();
    out.push(ReportMarker::PlanProposed.html());
    out.push("## 🤖 Hal 9000 - Implementation Plan".to_string());
    out.push(String::new());

    for (title, body) in plan.sections() {
        if body.is_empty() {
            continue;
        }
        out.push(format!("### {title}"));
        out.push(String::new());
        out.push(body.to_string());
        out.push(String::new());
    }

    out.push("<details>".to_string());
    out.push("<summary>📋 View Full Plan</summary>".to_string());
    out.push(String::new());
    out.push(marker_html(PLAN_BEGIN));
    out.push(plan.raw.clone());
    out.push(marker_html(PLAN_END));
    out.push(String::new());
    out.push("</details>".to_string());
    out.push(String::new());
    out.push("---".to_string());
    out.push(String::new());
    out.push(format!("**Implementation model:** `{implementation_model}`"));
    out.push(String::new());
    out.push("### Next Steps".to_string());
    out.push(String::new());
    out.push(format!(
        "- ✅ **To approve this plan**, comment `{}`",
        Command::ApprovePlan
    ));
    out.push(format!(
        "- 1️⃣ **To implement with a single attempt**, comment `{}`",
        Command::ApprovePlanSingle
    ));
    out.push(format!(
        "- 🔄 **To regenerate the plan**, comment `{}`",
        Command::RetryPlan
    ));
    out.push(format!("- ❌ **To cancel**, remove the `{plan_label}` label"));
    cap(out.join("\n"))
}

pub fn render_plan_failure(error: &str) -> String {
    let mut out = vec![
        ReportMarker::PlanFailed.html(),
        "## 🔴 Hal 9000 - Planning Failed".to_string(),
        String::new(),
        "I couldn't produce a plan for this issue.".to_string(),
        String::new(),
    ];
    push_fenced(&mut out, "", &truncate_chars(error, FAILURE_OUTPUT_CHARS));
    out.push(String::new());
    out.push(format!("Comment `{}` to try again.", Command::RetryPlan));
    cap(out.join("\n"))
}

/// Deterministic pull request body.
pub fn render_pr_body(issue: u64, title: &str, change_set: &ChangeSet) -> String {
    let mut out = vec![
        "## Summary".to_string(),
        String::new(),
        if change_set.explanation.is_empty() {
            format!("Automated changes for: {title}")
        } else {
            change_set.explanation.clone()
        },
        String::new(),
        "## Changes".to_string(),
        String::new(),
    ];
    out.extend(
        change_set
            .changes
            .iter()
            .map(|change| format!("- `{}` ({})", change.path, change.action)),
    );
    out.push(String::new());
    out.push("---".to_string());
    out.push(format!("Closes #{issue}"));
    cap(out.join("\n"))
}

/// Enforce [`REPORT_CHAR_LIMIT`], appending a notice when text is cut.
pub fn cap(text: String) -> String {
    if text.chars().count() <= REPORT_CHAR_LIMIT {
        return text;
    }
    let mut kept: String = text.chars().take(TRUNCATED_KEEP).collect();
    kept.push_str("\n\n*[Comment truncated due to size limits]*");
    kept
}

pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut kept: String = text.chars().take(limit).collect();
    kept.push_str("\n...[truncated]");
    kept
}

/// Append a fenced block whose fence is longer than any backtick run inside.
fn push_fenced(out: &mut Vec<String>, lang: &str, body: &str) {
    let longest = body
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let fence = "`".repeat(longest.max(2) + 1);
    out.push(format!("{fence}{lang}"));
    out.push(body.to_string());
    out.push(fence);
}

fn language_for(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "py" => "python",
        "js" => "javascript",
        "jsx" => "jsx",
        "ts" => "typescript",
        "tsx" => "tsx",
        "java" => "java",
        "kt" => "kotlin",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" => "xml",
        "html" => "html",
        "css" => "css",
        "scss" => "scss",
        "sql" => "sql",
        "sh" => "bash",
        "md" => "markdown",
        "rs" => "rust",
        "go" => "go",
        "rb" => "ruby",
        "php" => "php",
        _ => "",
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        word.to_string()
    } else {
        format!("{word}s")
    }
}
