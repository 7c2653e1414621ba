//! `orchestrator run`: one retry-loop run for an issue snapshot.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument};

use crate::core::approval::ApprovalMachine;
use crate::core::issue::IssueContext;
use crate::core::plan::PlanDocument;
use crate::core::report::{ReportContext, render_run};
use crate::core::types::{Origin, RunResult};
use crate::io::attempt_log::RunArtifacts;
use crate::io::config::OrchestratorConfig;
use crate::io::git::Git;
use crate::io::issue_store::load_plan;
use crate::io::model::ModelInvoker;
use crate::io::run_lock::RunLock;
use crate::io::test_runner::TestRunner;
use crate::io::worktree::{GitWorkTree, SnapshotWorkTree, WorkTree};
use crate::planning::latest_plan;
use crate::retry::{RetryController, RunRequest};

/// Everything `run` needs besides collaborators.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub root: PathBuf,
    pub output_dir: PathBuf,
    pub bundle: Option<PathBuf>,
    pub plan: Option<PathBuf>,
    pub single_attempt: bool,
}

/// A finished run with its rendered report.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub result: RunResult,
    pub report: String,
    pub result_path: PathBuf,
    pub report_path: PathBuf,
}

/// Work tree for `root`: a git checkout restored in place, or snapshots.
///
/// The output directory is kept out of every attempt tree.
pub fn work_tree_for(root: &Path, output_dir: &Path) -> Result<Box<dyn WorkTree>> {
    if Git::new(root).is_repo() {
        let abs_root = std::path::absolute(root)
            .with_context(|| format!("resolve {}", root.display()))?;
        let abs_output = std::path::absolute(output_dir)
            .with_context(|| format!("resolve {}", output_dir.display()))?;
        let excludes = abs_output
            .strip_prefix(&abs_root)
            .ok()
            .filter(|rel| !rel.as_os_str().is_empty())
            .map(|rel| vec![format!("{}/", rel.display())])
            .unwrap_or_default();
        return Ok(Box::new(GitWorkTree::new(root, excludes)?));
    }
    Ok(Box::new(
        SnapshotWorkTree::new(root, output_dir.join("trees")).skipping(output_dir),
    ))
}

/// Read the bundle file, or an empty bundle when none was given.
pub fn read_bundle(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("read bundle {}", path.display()))
        }
        None => Ok(String::new()),
    }
}

/// Approved plan for this run: `--plan`, else the newest proposal in the
/// comments when the issue carries only the plan label.
pub fn resolve_plan(
    config: &OrchestratorConfig,
    issue: &IssueContext,
    plan_path: Option<&Path>,
) -> Result<Option<PlanDocument>> {
    if let Some(path) = plan_path {
        return load_plan(path).map(Some);
    }
    let planned =
        issue.has_label(&config.labels.plan) && !issue.has_label(&config.labels.direct);
    if !planned {
        return Ok(None);
    }
    latest_plan(issue, config.bot_login.as_deref())
        .map(Some)
        .ok_or_else(|| anyhow!("issue #{} has no proposed plan to implement", issue.number))
}

/// Lock the issue, run the loop, and write `result.json` and `report.md`.
#[instrument(skip_all, fields(issue = issue.number))]
pub fn run_issue<M: ModelInvoker, T: TestRunner, W: WorkTree>(
    config: &OrchestratorConfig,
    issue: &IssueContext,
    options: &RunOptions,
    model: &mut M,
    tests: &mut T,
    tree: &mut W,
) -> Result<RunSummary> {
    let _lock = RunLock::acquire(&options.output_dir, issue.number)?;
    let codebase = read_bundle(options.bundle.as_deref())?;
    let plan = resolve_plan(config, issue, options.plan.as_deref())?;
    let origin = if plan.is_some() {
        Origin::Planned
    } else {
        Origin::Direct
    };

    let artifacts = RunArtifacts::new(&options.output_dir);
    let request = RunRequest {
        issue,
        codebase: &codebase,
        plan: plan.as_ref().map(|p| p.raw.as_str()),
        origin,
        single_attempt: options.single_attempt,
    };
    let result = RetryController::new(config, model, tests, tree)
        .with_artifacts(&artifacts)
        .run(&request, |_| {})?;

    let machine = ApprovalMachine::new(config.approval_settings());
    let report = render_run(
        &result,
        &ReportContext {
            issue: issue.number,
            branch: machine.branch_name(issue.number),
            trigger_label: match origin {
                Origin::Direct => config.labels.direct.clone(),
                Origin::Planned => config.labels.plan.clone(),
            },
        },
    );
    let result_path = artifacts.write_result(&result)?;
    let report_path = artifacts.write_report(&report)?;
    info!(outcome = ?result.outcome, attempts = result.attempts.len(), "run finished");

    Ok(RunSummary {
        result,
        report,
        result_path,
        report_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        RepoFixture, ScriptedModel, ScriptedTest, ScriptedTestRunner, comment, issue,
        response_creating,
    };

    fn options(fixture: &RepoFixture) -> RunOptions {
        RunOptions {
            root: fixture.repo(),
            output_dir: fixture.output_dir(),
            bundle: None,
            plan: None,
            single_attempt: false,
        }
    }

    #[test]
    fn writes_result_and_report() {
        let fixture = RepoFixture::new().expect("fixture");
        let mut tree = fixture.snapshot_tree();
        let mut model = ScriptedModel::responses(vec![response_creating("src/foo.txt", "hello")]);
        let mut tests = ScriptedTestRunner::new(vec![ScriptedTest::pass()]);
        let cfg = OrchestratorConfig::default();

        let summary = run_issue(
            &cfg,
            &issue(11),
            &options(&fixture),
            &mut model,
            &mut tests,
            &mut tree,
        )
        .expect("run");

        assert!(summary.result.is_success());
        assert!(summary.report.contains("hal9000/issue-11"));
        assert!(summary.result_path.is_file());
        assert!(summary.report_path.is_file());
        assert!(!RunLock::lock_path(&fixture.output_dir(), 11).exists());
    }

    #[test]
    fn plan_label_without_proposal_is_an_error() {
        let cfg = OrchestratorConfig::default();
        let mut ctx = issue(12);
        ctx.labels = vec![cfg.labels.plan.clone()];
        let err = resolve_plan(&cfg, &ctx, None).expect_err("no plan");
        assert!(err.to_string().contains("no proposed plan"));
    }

    #[test]
    fn plan_is_recovered_from_comments() {
        let cfg = OrchestratorConfig::default();
        let plan = PlanDocument::parse("## Summary\nDo it.").expect("plan");
        let mut ctx = issue(13);
        ctx.labels = vec![cfg.labels.plan.clone()];
        ctx.comments = vec![comment(
            1,
            "hal9000[bot]",
            &crate::core::report::render_plan(&plan, "m", &cfg.labels.plan),
            1,
        )];
        let found = resolve_plan(&cfg, &ctx, None).expect("resolve").expect("plan");
        assert_eq!(found.summary, "Do it.");

        ctx.labels.push(cfg.labels.direct.clone());
        assert!(resolve_plan(&cfg, &ctx, None).expect("resolve").is_none());
    }

    #[test]
    fn nested_output_dir_stays_out_of_snapshots() {
        let fixture = RepoFixture::new().expect("fixture");
        fixture.write("a.txt", "a").expect("seed");
        let output_dir = fixture.repo().join("out");
        fixture.write("out/result.json", "{}").expect("artifact");
        let mut tree = work_tree_for(&fixture.repo(), &output_dir).expect("tree");
        let dir = tree.prepare(1).expect("prepare");
        assert!(dir.join("a.txt").is_file());
        assert!(!dir.join("out").exists());
        assert!(!tree.prepare(2).expect("prepare").join("out").exists());
    }

    #[test]
    fn non_git_root_uses_snapshots() {
        let fixture = RepoFixture::new().expect("fixture");
        fixture.write("a.txt", "a").expect("seed");
        let mut tree = work_tree_for(&fixture.repo(), &fixture.output_dir()).expect("tree");
        let dir = tree.prepare(1).expect("prepare");
        assert!(dir.starts_with(fixture.output_dir()));
        assert!(dir.join("a.txt").is_file());
    }
}
