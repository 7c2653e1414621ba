//! Bounded generate -> parse -> apply -> test loop.
//!
//! Every attempt starts from a fresh working tree. A failed attempt is turned
//! into [`Feedback`] for the next prompt; the loop stops on the first success
//! or when the attempt budget is spent.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::budget::remaining_budget;
use crate::core::errors::{ConfigError, TimedOut};
use crate::core::feedback::Feedback;
use crate::core::issue::IssueContext;
use crate::core::parser::parse_response;
use crate::core::types::{
    AttemptOutcome, AttemptRecord, ChangeSet, Origin, Parsed, RunOutcome, RunResult,
};
use crate::io::applier::ChangeApplier;
use crate::io::attempt_log::RunArtifacts;
use crate::io::config::OrchestratorConfig;
use crate::io::model::{ModelInvoker, ModelRequest};
use crate::io::prompt::{PromptBuilder, PromptInputs, SYSTEM_PROMPT};
use crate::io::test_runner::{TestReport, TestRequest, TestRunner};
use crate::io::worktree::WorkTree;

/// Errors that end a run without a [`RunResult`].
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// A fresh tree could not be prepared or artifacts could not be written.
    #[error("workspace failure: {0:#}")]
    Workspace(anyhow::Error),
    #[error("prompt rendering failed: {0:#}")]
    Prompt(anyhow::Error),
}

/// What to run.
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    pub issue: &'a IssueContext,
    /// Opaque repository bundle.
    pub codebase: &'a str,
    /// Approved plan text (planned flow only).
    pub plan: Option<&'a str>,
    pub origin: Origin,
    /// Run exactly one attempt regardless of `max_retries`.
    pub single_attempt: bool,
}

/// Drives one run with the given collaborators.
pub struct RetryController<'a, M, T, W> {
    config: &'a OrchestratorConfig,
    model: &'a mut M,
    tests: &'a mut T,
    tree: &'a mut W,
    artifacts: Option<&'a RunArtifacts>,
}

impl<'a, M: ModelInvoker, T: TestRunner, W: WorkTree> RetryController<'a, M, T, W> {
    pub fn new(
        config: &'a OrchestratorConfig,
        model: &'a mut M,
        tests: &'a mut T,
        tree: &'a mut W,
    ) -> Self {
        Self {
            config,
            model,
            tests,
            tree,
            artifacts: None,
        }
    }

    /// Write per-attempt artifacts under `artifacts`.
    pub fn with_artifacts(mut self, artifacts: &'a RunArtifacts) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Run attempts until one succeeds or the budget is spent.
    ///
    /// Configuration is validated before any collaborator is touched.
    /// `on_attempt` sees every record as soon as it is final.
    #[instrument(skip_all, fields(issue = request.issue.number, origin = ?request.origin))]
    pub fn run<F: FnMut(&AttemptRecord)>(
        &mut self,
        request: &RunRequest<'_>,
        mut on_attempt: F,
    ) -> Result<RunResult, RunError> {
        self.config.validate()?;
        let max_retries = if request.single_attempt {
            1
        } else {
            self.config.max_retries()?
        };
        info!(max_retries, "starting run");

        let system_prompt_path = self.write_system_prompt()?;
        let inputs = PromptInputs::from_issue(
            request.issue,
            self.config.bot_login.as_deref(),
            &self.config.language,
            &self.config.test_command,
            request.codebase,
        )
        .with_plan(request.plan);
        let prompts = PromptBuilder::new(self.config.prompt_budget_bytes);

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        for attempt in 1..=max_retries {
            let feedback = attempts.last().and_then(Feedback::from_attempt);
            let prompt = prompts
                .build_implementation(&inputs, feedback.as_ref())
                .map_err(RunError::Prompt)?;
            let record = self.run_attempt(attempt, prompt, system_prompt_path.clone())?;

            if let Some(artifacts) = self.artifacts {
                artifacts
                    .write_attempt(&record)
                    .context("write attempt artifacts")
                    .map_err(RunError::Workspace)?;
            }
            info!(
                attempt,
                outcome = record.outcome.as_str(),
                duration_ms = record.duration_ms,
                "attempt finished"
            );
            on_attempt(&record);

            let succeeded = record.outcome == AttemptOutcome::Success;
            attempts.push(record);
            if succeeded {
                let final_changeset = attempts
                    .last()
                    .and_then(|a| a.parsed.change_set())
                    .cloned();
                return Ok(RunResult {
                    outcome: RunOutcome::Success,
                    origin: request.origin,
                    max_retries,
                    attempts,
                    final_changeset,
                });
            }
        }

        warn!(max_retries, "attempt budget exhausted");
        Ok(RunResult {
            outcome: RunOutcome::ExhaustedRetries,
            origin: request.origin,
            max_retries,
            attempts,
            final_changeset: None,
        })
    }

    fn write_system_prompt(&self) -> Result<Option<PathBuf>, RunError> {
        let Some(artifacts) = self.artifacts else {
            return Ok(None);
        };
        let path = artifacts.system_prompt_path();
        fs::create_dir_all(artifacts.output_dir())
            .and_then(|()| fs::write(&path, SYSTEM_PROMPT))
            .with_context(|| format!("write system prompt {}", path.display()))
            .map_err(RunError::Workspace)?;
        Ok(Some(path))
    }

    #[instrument(skip_all, fields(attempt))]
    fn run_attempt(
        &mut self,
        attempt: u32,
        prompt: String,
        system_prompt_path: Option<PathBuf>,
    ) -> Result<AttemptRecord, RunError> {
        let started = Instant::now();
        let timeout = self.config.attempt_timeout();
        let deadline = started + timeout;
        let paths = self.artifacts.map(|a| a.attempt_paths(attempt));

        let workdir = self
            .tree
            .prepare(attempt)
            .context("prepare working tree")
            .map_err(RunError::Workspace)?;

        let mut record = AttemptRecord {
            attempt_number: attempt,
            model_response_text: String::new(),
            parsed: Parsed::NotParsed,
            applied: Vec::new(),
            apply_error: None,
            test_exit_code: None,
            test_output: None,
            error: None,
            outcome: AttemptOutcome::ModelFailure,
            duration_ms: 0,
        };
        let finish = |mut record: AttemptRecord,
                      outcome: AttemptOutcome|
         -> Result<AttemptRecord, RunError> {
            record.outcome = outcome;
            record.duration_ms = elapsed_ms(started);
            Ok(record)
        };

        let response = remaining_budget(deadline, "model").and_then(|remaining| {
            self.model.invoke(&ModelRequest {
                attempt,
                workdir: workdir.clone(),
                prompt,
                system_prompt_path,
                model: self.config.model.name.clone(),
                api_base: self.config.model.api_base.clone(),
                timeout: remaining,
                output_limit_bytes: self.config.model_output_limit_bytes,
                log_path: paths.as_ref().map(|p| p.model_log_path.clone()),
            })
        });
        let text = match response {
            Ok(text) => text,
            Err(err) => {
                record.error = Some(format!("{err:#}"));
                let outcome = if err.downcast_ref::<TimedOut>().is_some() {
                    AttemptOutcome::TimedOut
                } else {
                    AttemptOutcome::ModelFailure
                };
                return finish(record, outcome);
            }
        };
        record.model_response_text = text;

        let change_set: ChangeSet = match parse_response(&record.model_response_text) {
            Ok(change_set) => change_set,
            Err(error) => {
                record.parsed = Parsed::Error { error };
                return finish(record, AttemptOutcome::ParseFailure);
            }
        };
        record.parsed = Parsed::ChangeSet {
            change_set: change_set.clone(),
        };

        let applied = ChangeApplier::new(&workdir).apply(&change_set);
        record.applied = applied.applied;
        if let Some(err) = applied.error {
            record.apply_error = Some(err.to_string());
            return finish(record, AttemptOutcome::ApplyFailure);
        }

        let report = remaining_budget(deadline, "tests").and_then(|remaining| {
            self.tests.run(&TestRequest {
                attempt,
                workdir: workdir.clone(),
                command: self.config.test_command.clone(),
                timeout: remaining,
                output_limit_bytes: self.config.test_output_limit_bytes,
                log_path: paths.as_ref().map(|p| p.test_log_path.clone()),
            })
        });
        match report {
            Ok(report) => {
                let outcome = classify_test_report(&report);
                if report.timed_out {
                    record.error = Some(TimedOut { stage: "tests" }.to_string());
                }
                record.test_exit_code = Some(report.exit_code);
                record.test_output = Some(report.output);
                finish(record, outcome)
            }
            Err(err) => {
                record.error = Some(format!("{err:#}"));
                let outcome = if err.downcast_ref::<TimedOut>().is_some() {
                    AttemptOutcome::TimedOut
                } else {
                    AttemptOutcome::TestFailure
                };
                finish(record, outcome)
            }
        }
    }
}

fn classify_test_report(report: &TestReport) -> AttemptOutcome {
    if report.timed_out {
        AttemptOutcome::TimedOut
    } else if report.passed() {
        AttemptOutcome::Success
    } else {
        AttemptOutcome::TestFailure
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        ScriptedModel, ScriptedTest, ScriptedTestRunner, issue, response_creating,
    };
    use crate::io::worktree::SnapshotWorkTree;

    fn config(max_retries: i64) -> OrchestratorConfig {
        OrchestratorConfig {
            max_retries,
            test_command: "true".to_string(),
            ..OrchestratorConfig::default()
        }
    }

    fn request(issue: &IssueContext) -> RunRequest<'_> {
        RunRequest {
            issue,
            codebase: "",
            plan: None,
            origin: Origin::Direct,
            single_attempt: false,
        }
    }

    #[test]
    fn second_prompt_carries_test_feedback() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut tree = SnapshotWorkTree::new(temp.path().join("repo"), temp.path().join("trees"));
        fs::create_dir_all(temp.path().join("repo")).expect("mkdir");
        let mut model = ScriptedModel::responses(vec![
            response_creating("a.txt", "one"),
            response_creating("a.txt", "two"),
        ]);
        let mut tests = ScriptedTestRunner::new(vec![
            ScriptedTest::fail(1, "AssertionError: expected two"),
            ScriptedTest::pass(),
        ]);
        let cfg = config(3);
        let ctx = issue(5);

        let result = RetryController::new(&cfg, &mut model, &mut tests, &mut tree)
            .run(&request(&ctx), |_| {})
            .expect("run");

        assert!(result.is_success());
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.attempts[0].outcome, AttemptOutcome::TestFailure);
        assert!(!model.prompts()[0].contains("Previous Attempt Failed"));
        assert!(model.prompts()[1].contains("AssertionError: expected two"));
        assert!(model.prompts()[1].contains("create a.txt"));
    }

    #[test]
    fn model_timeout_consumes_an_attempt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut tree = SnapshotWorkTree::new(temp.path(), temp.path().join(".trees"));
        let mut model = ScriptedModel::new(vec![
            Err(TimedOut { stage: "model" }.into()),
            Ok(response_creating("b.txt", "ok")),
        ]);
        let mut tests = ScriptedTestRunner::new(vec![ScriptedTest::pass()]);
        let cfg = config(2);
        let ctx = issue(6);

        let result = RetryController::new(&cfg, &mut model, &mut tests, &mut tree)
            .run(&request(&ctx), |_| {})
            .expect("run");

        assert_eq!(result.attempts[0].outcome, AttemptOutcome::TimedOut);
        assert_eq!(result.attempts[0].error.as_deref(), Some("model timed out"));
        assert!(result.is_success());
        assert_eq!(tests.requests().len(), 1);
    }

    #[test]
    fn test_timeout_is_classified_as_timed_out() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut tree = SnapshotWorkTree::new(temp.path(), temp.path().join(".trees"));
        let mut model = ScriptedModel::responses(vec![response_creating("c.txt", "x")]);
        let mut tests = ScriptedTestRunner::new(vec![ScriptedTest::timed_out("partial output")]);
        let cfg = config(1);
        let ctx = issue(7);

        let result = RetryController::new(&cfg, &mut model, &mut tests, &mut tree)
            .run(&request(&ctx), |_| {})
            .expect("run");

        assert_eq!(result.outcome, RunOutcome::ExhaustedRetries);
        let attempt = &result.attempts[0];
        assert_eq!(attempt.outcome, AttemptOutcome::TimedOut);
        assert_eq!(attempt.test_output.as_deref(), Some("partial output"));
        assert_eq!(attempt.error.as_deref(), Some("tests timed out"));
    }

    #[test]
    fn single_attempt_overrides_configured_budget() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut tree = SnapshotWorkTree::new(temp.path(), temp.path().join(".trees"));
        let mut model = ScriptedModel::responses(vec!["no changes here".to_string()]);
        let mut tests = ScriptedTestRunner::new(Vec::new());
        let cfg = config(5);
        let ctx = issue(8);
        let mut req = request(&ctx);
        req.single_attempt = true;
        req.origin = Origin::Planned;

        let result = RetryController::new(&cfg, &mut model, &mut tests, &mut tree)
            .run(&req, |_| {})
            .expect("run");

        assert_eq!(result.max_retries, 1);
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.origin, Origin::Planned);
        assert_eq!(result.attempts[0].outcome, AttemptOutcome::ParseFailure);
    }

    #[test]
    fn artifacts_are_written_per_attempt() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("repo")).expect("mkdir");
        let mut tree = SnapshotWorkTree::new(temp.path().join("repo"), temp.path().join("trees"));
        let mut model = ScriptedModel::responses(vec![response_creating("d.txt", "d")]);
        let mut tests = ScriptedTestRunner::new(vec![ScriptedTest::pass()]);
        let artifacts = RunArtifacts::new(temp.path().join("out"));
        let cfg = config(1);
        let ctx = issue(9);

        RetryController::new(&cfg, &mut model, &mut tests, &mut tree)
            .with_artifacts(&artifacts)
            .run(&request(&ctx), |_| {})
            .expect("run");

        let paths = artifacts.attempt_paths(1);
        assert!(paths.meta_path.is_file());
        assert!(paths.response_path.is_file());
        assert!(paths.changes_path.is_file());
        assert!(artifacts.system_prompt_path().is_file());
    }
}
