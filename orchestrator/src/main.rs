//! Response-to-changeset orchestrator CLI.
//!
//! Parses model responses into change sets, applies them, runs the
//! verify/retry loop for an issue, proposes plans, and replays issue activity
//! through the approval state machine.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use orchestrator::core::approval::{ApprovalMachine, Disposition};
use orchestrator::core::parser::parse_response;
use orchestrator::core::report::{ReportContext, render_run};
use orchestrator::core::types::{AppliedChange, Origin};
use orchestrator::exit_codes;
use orchestrator::io::applier::ChangeApplier;
use orchestrator::io::attempt_log::read_result;
use orchestrator::io::config::{ConfigOverrides, DEFAULT_CONFIG_PATH, OrchestratorConfig, load_config};
use orchestrator::io::issue_store::load_issue;
use orchestrator::io::model::CommandModelInvoker;
use orchestrator::io::test_runner::ShellTestRunner;
use orchestrator::logging;
use orchestrator::planning::{PlanOutcome, PlanRequest, run_planning};
use orchestrator::run::{RunOptions, read_bundle, run_issue, work_tree_for};

#[derive(Parser)]
#[command(
    name = "orchestrator",
    version,
    about = "Turn model responses into verified change sets behind human approval"
)]
struct Cli {
    /// Path to the TOML config (missing file means defaults).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a model response and print the change set as JSON.
    Parse {
        /// Response file (`-` for stdin).
        response: PathBuf,
    },
    /// Parse a model response and apply it to a directory.
    Apply {
        #[arg(long)]
        root: PathBuf,
        /// Response file (`-` for stdin).
        response: PathBuf,
    },
    /// Run the generate/apply/test retry loop for an issue.
    Run {
        /// Issue snapshot (JSON).
        #[arg(long)]
        issue: PathBuf,
        /// Repository to change.
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(long)]
        output_dir: PathBuf,
        /// Repository bundle produced by the bundler.
        #[arg(long)]
        bundle: Option<PathBuf>,
        /// Approved plan (`plan.json`) to implement.
        #[arg(long)]
        plan: Option<PathBuf>,
        /// Make exactly one attempt.
        #[arg(long)]
        single: bool,
        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Ask the planning model for an implementation plan.
    Plan {
        #[arg(long)]
        issue: PathBuf,
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(long)]
        output_dir: PathBuf,
        #[arg(long)]
        bundle: Option<PathBuf>,
        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Replay issue activity and print the approval decision as JSON.
    Evaluate {
        #[arg(long)]
        issue: PathBuf,
    },
    /// Render the report for a saved `result.json`.
    Render {
        #[arg(long)]
        result: PathBuf,
        /// Issue number the run belongs to.
        #[arg(long)]
        number: u64,
    },
}

#[derive(Args, Debug, Default)]
struct OverrideArgs {
    #[arg(long, allow_negative_numbers = true)]
    max_retries: Option<i64>,
    #[arg(long)]
    test_command: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    api_base: Option<String>,
}

impl From<OverrideArgs> for ConfigOverrides {
    fn from(args: OverrideArgs) -> Self {
        Self {
            max_retries: args.max_retries,
            test_command: args.test_command,
            model: args.model,
            api_base: args.api_base,
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Parse { response } => cmd_parse(&response),
        Command::Apply { root, response } => cmd_apply(&root, &response),
        Command::Run {
            issue,
            root,
            output_dir,
            bundle,
            plan,
            single,
            overrides,
        } => {
            let config = load_config(&cli.config, &overrides.into())?;
            cmd_run(
                &config,
                &issue,
                RunOptions {
                    root,
                    output_dir,
                    bundle,
                    plan,
                    single_attempt: single,
                },
            )
        }
        Command::Plan {
            issue,
            root,
            output_dir,
            bundle,
            overrides,
        } => {
            let config = load_config(&cli.config, &overrides.into())?;
            cmd_plan(&config, &issue, &root, &output_dir, bundle.as_deref())
        }
        Command::Evaluate { issue } => {
            let config = load_config(&cli.config, &ConfigOverrides::default())?;
            cmd_evaluate(&config, &issue)
        }
        Command::Render { result, number } => {
            let config = load_config(&cli.config, &ConfigOverrides::default())?;
            cmd_render(&config, &result, number)
        }
    }
}

fn cmd_parse(response: &Path) -> Result<i32> {
    let text = read_input(response)?;
    let change_set = parse_response(&text).context("parse response")?;
    print_json(&change_set)?;
    Ok(exit_codes::OK)
}

#[derive(Serialize)]
struct ApplyOutput<'a> {
    applied: &'a [AppliedChange],
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn cmd_apply(root: &Path, response: &Path) -> Result<i32> {
    let text = read_input(response)?;
    let change_set = parse_response(&text).context("parse response")?;
    let report = ChangeApplier::new(root).apply(&change_set);
    print_json(&ApplyOutput {
        applied: &report.applied,
        error: report.error.as_ref().map(ToString::to_string),
    })?;
    match report.error {
        Some(err) => Err(err).context("apply change set"),
        None => Ok(exit_codes::OK),
    }
}

fn cmd_run(config: &OrchestratorConfig, issue_path: &Path, options: RunOptions) -> Result<i32> {
    let issue = load_issue(issue_path)?;
    let mut tree = work_tree_for(&options.root, &options.output_dir)?;
    let mut model = CommandModelInvoker::new(config.model.command.clone())?;
    let mut tests = ShellTestRunner;
    let summary = run_issue(config, &issue, &options, &mut model, &mut tests, &mut tree)?;
    println!("{}", summary.report);
    Ok(if summary.result.is_success() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_plan(
    config: &OrchestratorConfig,
    issue_path: &Path,
    root: &Path,
    output_dir: &Path,
    bundle: Option<&Path>,
) -> Result<i32> {
    let issue = load_issue(issue_path)?;
    let codebase = read_bundle(bundle)?;
    let mut model = CommandModelInvoker::new(config.model.command.clone())?;
    let outcome = run_planning(
        config,
        &mut model,
        &PlanRequest {
            issue: &issue,
            codebase: &codebase,
            workdir: root,
            output_dir,
        },
    )?;
    println!("{}", outcome.comment());
    Ok(match outcome {
        PlanOutcome::Proposed { .. } => exit_codes::OK,
        PlanOutcome::Failed { .. } => exit_codes::FAILED,
    })
}

fn cmd_evaluate(config: &OrchestratorConfig, issue_path: &Path) -> Result<i32> {
    let issue = load_issue(issue_path)?;
    let decision = ApprovalMachine::new(config.approval_settings()).evaluate(&issue);
    print_json(&decision)?;
    Ok(match decision.disposition {
        Disposition::Applied => exit_codes::OK,
        Disposition::Ignored | Disposition::Busy | Disposition::Rejected { .. } => {
            exit_codes::REJECTED
        }
    })
}

fn cmd_render(config: &OrchestratorConfig, result_path: &Path, number: u64) -> Result<i32> {
    let result = read_result(result_path)?;
    let machine = ApprovalMachine::new(config.approval_settings());
    let report = render_run(
        &result,
        &ReportContext {
            issue: number,
            branch: machine.branch_name(number),
            trigger_label: match result.origin {
                Origin::Direct => config.labels.direct.clone(),
                Origin::Planned => config.labels.plan.clone(),
            },
        },
    );
    println!("{report}");
    Ok(exit_codes::OK)
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read stdin")?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
