//! Model invocation boundary.
//!
//! The [`ModelInvoker`] trait decouples the retry loop from the transport that
//! talks to a model provider. The default implementation pipes the prompt into
//! an external command; tests use scripted invokers.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::errors::TimedOut;
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Parameters for one model call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// 1-indexed attempt within the run (0 for planning).
    pub attempt: u32,
    /// Working directory for the transport process.
    pub workdir: PathBuf,
    pub prompt: String,
    /// System prompt written next to the attempt artifacts, if any.
    pub system_prompt_path: Option<PathBuf>,
    pub model: String,
    pub api_base: Option<String>,
    /// Remaining per-attempt budget.
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    /// Where to write transport stderr, if anywhere.
    pub log_path: Option<PathBuf>,
}

/// Abstraction over model transports.
pub trait ModelInvoker {
    /// Return the raw response text. A budget overrun fails with [`TimedOut`].
    fn invoke(&mut self, request: &ModelRequest) -> Result<String>;
}

/// Transport that spawns a configured command with the prompt on stdin.
///
/// The model name, API base and system prompt path are passed through the
/// `ORCHESTRATOR_MODEL`, `ORCHESTRATOR_API_BASE` and
/// `ORCHESTRATOR_SYSTEM_PROMPT_FILE` environment variables.
#[derive(Debug, Clone)]
pub struct CommandModelInvoker {
    command: Vec<String>,
}

impl CommandModelInvoker {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() || command[0].trim().is_empty() {
            return Err(anyhow!("model command must be a non-empty array"));
        }
        Ok(Self { command })
    }
}

impl ModelInvoker for CommandModelInvoker {
    #[instrument(skip_all, fields(attempt = request.attempt, model = %request.model, timeout_secs = request.timeout.as_secs()))]
    fn invoke(&mut self, request: &ModelRequest) -> Result<String> {
        info!(program = %self.command[0], "invoking model transport");

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .current_dir(&request.workdir)
            .env("ORCHESTRATOR_MODEL", &request.model);
        if let Some(api_base) = &request.api_base {
            cmd.env("ORCHESTRATOR_API_BASE", api_base);
        }
        if let Some(path) = &request.system_prompt_path {
            cmd.env("ORCHESTRATOR_SYSTEM_PROMPT_FILE", path);
        }

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
        )
        .context("run model transport")?;

        if let Some(path) = &request.log_path {
            write_transport_log(path, &output)?;
        }

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "model transport timed out");
            return Err(TimedOut { stage: "model" }.into());
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(exit_code = ?output.status.code(), "model transport failed");
            return Err(anyhow!(
                "model transport exited with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            ));
        }

        let text = output.stdout_text();
        debug!(bytes = text.len(), "model response received");
        Ok(text)
    }
}

fn write_transport_log(path: &Path, output: &CommandOutput) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create model log dir {}", parent.display()))?;
    }
    let mut buf = String::from_utf8_lossy(&output.stderr).into_owned();
    if output.stdout_truncated > 0 {
        buf.push_str(&format!(
            "\n[model stdout truncated {} bytes]\n",
            output.stdout_truncated
        ));
    }
    if output.timed_out {
        buf.push_str("\n[model timed out]\n");
    }
    fs::write(path, buf).with_context(|| format!("write model log {}", path.display()))
}
