//! Orchestrator configuration stored under `.orchestrator/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::approval::ApprovalSettings;
use crate::core::errors::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = ".orchestrator/config.toml";

/// Orchestrator configuration (TOML).
///
/// Missing fields default to the values below; a missing file is all defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Attempt budget per run. Signed so a negative value in the file is
    /// reported as a configuration error instead of a parse error.
    pub max_retries: i64,

    /// Verification command, run through `sh -c` in the working tree.
    pub test_command: String,

    /// Repository language, forwarded to prompts.
    pub language: String,

    /// Per-attempt wall-clock budget in seconds (model + tests).
    pub attempt_timeout_secs: u64,

    /// Keep at most this many bytes of each test output stream.
    pub test_output_limit_bytes: usize,

    /// Keep at most this many bytes of model stdout.
    pub model_output_limit_bytes: usize,

    /// Target size of a rendered prompt.
    pub prompt_budget_bytes: usize,

    /// Branch created on approval is `<branch_prefix><issue>`.
    pub branch_prefix: String,

    /// Login of the account posting reports; its comments never carry commands.
    pub bot_login: Option<String>,

    pub model: ModelConfig,
    pub labels: LabelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Implementation model, forwarded to the transport as `ORCHESTRATOR_MODEL`.
    pub name: String,
    /// Planning model (often larger than the implementation model).
    pub planning_name: String,
    pub api_base: Option<String>,
    /// Transport command; the prompt is written to its stdin.
    pub command: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "anthropic/claude-sonnet-4-20250514".to_string(),
            planning_name: "anthropic/claude-sonnet-4-20250514".to_string(),
            api_base: None,
            command: vec!["llm-gateway".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LabelConfig {
    pub direct: String,
    pub plan: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            direct: "hal9000".to_string(),
            plan: "hal9000-plan".to_string(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            test_command: "make test".to_string(),
            language: "unknown".to_string(),
            attempt_timeout_secs: 15 * 60,
            test_output_limit_bytes: 100_000,
            model_output_limit_bytes: 1_000_000,
            prompt_budget_bytes: 400_000,
            branch_prefix: "hal9000/issue-".to_string(),
            bot_login: None,
            model: ModelConfig::default(),
            labels: LabelConfig::default(),
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub max_retries: Option<i64>,
    pub test_command: Option<String>,
    pub model: Option<String>,
    pub api_base: Option<String>,
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.max_retries()?;
        if self.test_command.trim().is_empty() {
            return Err(ConfigError::EmptyTestCommand);
        }
        if self.attempt_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("attempt_timeout_secs"));
        }
        for (name, value) in [
            ("test_output_limit_bytes", self.test_output_limit_bytes),
            ("model_output_limit_bytes", self.model_output_limit_bytes),
            ("prompt_budget_bytes", self.prompt_budget_bytes),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroOutputLimit(name));
            }
        }
        if self.model.command.is_empty() || self.model.command[0].trim().is_empty() {
            return Err(ConfigError::EmptyModelCommand);
        }
        if self.labels.direct == self.labels.plan {
            return Err(ConfigError::SameTriggerLabels(self.labels.direct.clone()));
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(max_retries) = overrides.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(test_command) = &overrides.test_command {
            self.test_command = test_command.clone();
        }
        if let Some(model) = &overrides.model {
            self.model.name = model.clone();
        }
        if let Some(api_base) = &overrides.api_base {
            self.model.api_base = Some(api_base.clone());
        }
    }

    /// Attempt budget as an unsigned count.
    pub fn max_retries(&self) -> Result<u32, ConfigError> {
        if self.max_retries < 1 {
            return Err(ConfigError::NonPositiveMaxRetries(self.max_retries));
        }
        u32::try_from(self.max_retries)
            .map_err(|_| ConfigError::MaxRetriesTooLarge(self.max_retries))
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn approval_settings(&self) -> ApprovalSettings {
        ApprovalSettings {
            direct_label: self.labels.direct.clone(),
            plan_label: self.labels.plan.clone(),
            bot_login: self.bot_login.clone(),
            branch_prefix: self.branch_prefix.clone(),
        }
    }
}

/// Read config from a TOML file without validating it.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn read_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        return Ok(OrchestratorConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Read config, apply command-line overrides, then validate.
pub fn load_config(path: &Path, overrides: &ConfigOverrides) -> Result<OrchestratorConfig> {
    let mut cfg = read_config(path)?;
    cfg.apply_overrides(overrides);
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
