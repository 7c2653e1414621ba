//! Planning flow: ask the model for a plan and render the proposal.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::commands::{ReportMarker, embedded_plan, report_marker};
use crate::core::issue::IssueContext;
use crate::core::plan::PlanDocument;
use crate::core::report::{render_plan, render_plan_failure};
use crate::io::attempt_log::{write_json, write_text};
use crate::io::config::OrchestratorConfig;
use crate::io::model::{ModelInvoker, ModelRequest};
use crate::io::prompt::{PromptBuilder, PromptInputs};

/// Result of one planning run. Both variants carry the comment to post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    Proposed { plan: PlanDocument, comment: String },
    Failed { error: String, comment: String },
}

impl PlanOutcome {
    pub fn comment(&self) -> &str {
        match self {
            Self::Proposed { comment, .. } | Self::Failed { comment, .. } => comment,
        }
    }

    pub fn is_proposed(&self) -> bool {
        matches!(self, Self::Proposed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct PlanPaths {
    pub prompt_path: PathBuf,
    pub response_path: PathBuf,
    pub plan_path: PathBuf,
    pub comment_path: PathBuf,
    pub model_log_path: PathBuf,
}

impl PlanPaths {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            prompt_path: output_dir.join("plan_prompt.md"),
            response_path: output_dir.join("plan_response.md"),
            plan_path: output_dir.join("plan.json"),
            comment_path: output_dir.join("plan_comment.md"),
            model_log_path: output_dir.join("plan_model.log"),
        }
    }
}

pub struct PlanRequest<'a> {
    pub issue: &'a IssueContext,
    pub codebase: &'a str,
    /// Directory the transport runs in.
    pub workdir: &'a Path,
    pub output_dir: &'a Path,
}

/// Run the planning model once and write `plan.json` and `plan_comment.md`.
///
/// Model and parse failures become [`PlanOutcome::Failed`]; only artifact and
/// configuration problems are errors.
#[instrument(skip_all, fields(issue = request.issue.number))]
pub fn run_planning<M: ModelInvoker>(
    config: &OrchestratorConfig,
    model: &mut M,
    request: &PlanRequest<'_>,
) -> Result<PlanOutcome> {
    config.validate().context("invalid config")?;
    let paths = PlanPaths::new(request.output_dir);

    let inputs = PromptInputs::from_issue(
        request.issue,
        config.bot_login.as_deref(),
        &config.language,
        &config.test_command,
        request.codebase,
    );
    let prompt = PromptBuilder::new(config.prompt_budget_bytes).build_planning(&inputs)?;
    write_text(&paths.prompt_path, &prompt)?;

    info!(model = %config.model.planning_name, "requesting plan");
    let response = model.invoke(&ModelRequest {
        attempt: 0,
        workdir: request.workdir.to_path_buf(),
        prompt,
        system_prompt_path: None,
        model: config.model.planning_name.clone(),
        api_base: config.model.api_base.clone(),
        timeout: config.attempt_timeout(),
        output_limit_bytes: config.model_output_limit_bytes,
        log_path: Some(paths.model_log_path.clone()),
    });

    let outcome = match response {
        Ok(text) => {
            write_text(&paths.response_path, &text)?;
            match PlanDocument::parse(&text) {
                Ok(mut plan) => {
                    plan.implementation_model = Some(config.model.name.clone());
                    write_json(&paths.plan_path, &plan)?;
                    let comment = render_plan(&plan, &config.model.name, &config.labels.plan);
                    PlanOutcome::Proposed { plan, comment }
                }
                Err(err) => failed(err.to_string()),
            }
        }
        Err(err) => failed(format!("{err:#}")),
    };
    if let PlanOutcome::Failed { error, .. } = &outcome {
        warn!(error = %error, "planning failed");
    }
    write_text(&paths.comment_path, outcome.comment())?;
    Ok(outcome)
}

fn failed(error: String) -> PlanOutcome {
    let comment = render_plan_failure(&error);
    PlanOutcome::Failed { error, comment }
}

/// Most recent proposed plan recovered from the issue's comment history.
///
/// Only comments carrying the `plan-proposed` marker count, and only those by
/// `bot_login` when one is configured.
pub fn latest_plan(ctx: &IssueContext, bot_login: Option<&str>) -> Option<PlanDocument> {
    ctx.comments
        .iter()
        .rev()
        .filter(|c| bot_login.is_none_or(|bot| c.author == bot))
        .filter(|c| report_marker(&c.body) == Some(ReportMarker::PlanProposed))
        .find_map(|c| embedded_plan(&c.body).and_then(|raw| PlanDocument::parse(raw).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::TimedOut;
    use crate::test_support::{ScriptedModel, comment, issue};
    use std::fs;

    const PLAN: &str = "## Summary\nGuard the division.\n\n## Implementation Steps\n1. Check divisor.\n\n## Files to Modify\n- `src/math.py`: raise ValueError\n";

    #[test]
    fn proposed_plan_writes_json_and_comment() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut model = ScriptedModel::responses(vec![PLAN.to_string()]);
        let cfg = OrchestratorConfig::default();
        let ctx = issue(3);

        let outcome = run_planning(
            &cfg,
            &mut model,
            &PlanRequest {
                issue: &ctx,
                codebase: "code",
                workdir: temp.path(),
                output_dir: temp.path(),
            },
        )
        .expect("plan");

        assert!(outcome.is_proposed());
        assert_eq!(model.requests()[0].model, cfg.model.planning_name);
        let paths = PlanPaths::new(temp.path());
        let saved: PlanDocument =
            serde_json::from_str(&fs::read_to_string(&paths.plan_path).expect("read"))
                .expect("json");
        assert_eq!(saved.summary, "Guard the division.");
        assert_eq!(saved.implementation_model.as_deref(), Some(cfg.model.name.as_str()));
        let comment = fs::read_to_string(&paths.comment_path).expect("read");
        assert!(comment.contains("<!-- orchestrator:plan-proposed -->"));
        assert!(comment.contains("/approve-plan-single"));
    }

    #[test]
    fn model_error_renders_failure_comment() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut model = ScriptedModel::new(vec![Err(TimedOut { stage: "model" }.into())]);
        let ctx = issue(4);

        let outcome = run_planning(
            &OrchestratorConfig::default(),
            &mut model,
            &PlanRequest {
                issue: &ctx,
                codebase: "",
                workdir: temp.path(),
                output_dir: temp.path(),
            },
        )
        .expect("plan");

        let PlanOutcome::Failed { error, comment } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error, "model timed out");
        assert!(comment.contains("<!-- orchestrator:plan-failed -->"));
        assert!(!PlanPaths::new(temp.path()).plan_path.exists());
    }

    #[test]
    fn unparseable_plan_is_a_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut model = ScriptedModel::responses(vec!["I would rather not.".to_string()]);
        let ctx = issue(5);
        let outcome = run_planning(
            &OrchestratorConfig::default(),
            &mut model,
            &PlanRequest {
                issue: &ctx,
                codebase: "",
                workdir: temp.path(),
                output_dir: temp.path(),
            },
        )
        .expect("plan");
        assert!(!outcome.is_proposed());
    }

    #[test]
    fn latest_plan_prefers_newest_bot_proposal() {
        let plan = PlanDocument::parse(PLAN).expect("plan");
        let mut newer = plan.clone();
        newer.summary = "Second take.".to_string();
        newer.raw = PLAN.replace("Guard the division.", "Second take.");

        let mut ctx = issue(6);
        ctx.comments = vec![
            comment(1, "hal9000[bot]", &render_plan(&plan, "m", "hal9000-plan"), 1),
            comment(2, "hal9000[bot]", &render_plan(&newer, "m", "hal9000-plan"), 2),
            comment(3, "mallory", &render_plan(&plan, "m", "hal9000-plan"), 3),
        ];

        let found = latest_plan(&ctx, Some("hal9000[bot]")).expect("plan");
        assert_eq!(found.summary, "Second take.");
        assert_eq!(
            latest_plan(&ctx, None).expect("plan").summary,
            "Guard the division."
        );
        assert!(latest_plan(&ctx, Some("someone-else")).is_none());
    }
}
