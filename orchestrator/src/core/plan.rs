//! Plan documents produced by the planning flow.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::PlanError;

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{2,3}[ \t]+(.+?)[ \t#]*$").expect("plan header regex"));
static BACKTICK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]+)`").expect("backtick regex"));

/// Structured plan with fixed sections kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDocument {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub implementation_steps: String,
    #[serde(default)]
    pub files_to_modify: String,
    #[serde(default)]
    pub files_to_create: String,
    #[serde(default)]
    pub tests_to_add: String,
    #[serde(default)]
    pub risks: String,
    /// Full planning response.
    pub raw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanSection {
    Summary,
    Steps,
    Modify,
    Create,
    Tests,
    Risks,
}

impl PlanSection {
    fn classify(title: &str) -> Option<Self> {
        let normalized = title
            .to_ascii_lowercase()
            .replace('&', "and")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let name = normalized.trim_end_matches(':');
        match name {
            "summary" => Some(Self::Summary),
            "implementation steps" | "implementation step" | "steps" | "step" => Some(Self::Steps),
            "files to modify" | "file to modify" => Some(Self::Modify),
            "files to create" | "file to create" => Some(Self::Create),
            "tests to add" | "test to add" | "tests" | "test" => Some(Self::Tests),
            "risks" | "risk" | "considerations" | "consideration" | "risks and considerations"
            | "potential issues" | "potential issue" => Some(Self::Risks),
            _ => None,
        }
    }
}

impl PlanDocument {
    /// Split a planning response into its fixed sections.
    ///
    /// Unknown sections are kept only in `raw`. The first occurrence of each
    /// section wins.
    pub fn parse(text: &str) -> Result<Self, PlanError> {
        if text.trim().is_empty() {
            return Err(PlanError::Empty);
        }

        let mut doc = PlanDocument {
            raw: text.trim().to_string(),
            ..PlanDocument::default()
        };
        let mut current: Option<PlanSection> = None;
        let mut bodies: Vec<(PlanSection, Vec<&str>)> = Vec::new();
        let mut in_fence = false;

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                in_fence = !in_fence;
            }
            if !in_fence {
                if let Some(caps) = HEADER_RE.captures(trimmed) {
                    current = PlanSection::classify(&caps[1]);
                    if let Some(section) = current {
                        bodies.push((section, Vec::new()));
                    }
                    continue;
                }
            }
            if current.is_some() {
                if let Some((_, body)) = bodies.last_mut() {
                    body.push(line);
                }
            }
        }

        if bodies.is_empty() {
            return Err(PlanError::NoSections);
        }

        for (section, body) in bodies {
            let text = body.join("\n").trim().to_string();
            let slot = doc.slot_mut(section);
            if slot.is_empty() {
                *slot = text;
            }
        }
        Ok(doc)
    }

    fn slot_mut(&mut self, section: PlanSection) -> &mut String {
        match section {
            PlanSection::Summary => &mut self.summary,
            PlanSection::Steps => &mut self.implementation_steps,
            PlanSection::Modify => &mut self.files_to_modify,
            PlanSection::Create => &mut self.files_to_create,
            PlanSection::Tests => &mut self.tests_to_add,
            PlanSection::Risks => &mut self.risks,
        }
    }

    /// `(title, body)` for each fixed section, in document order.
    pub fn sections(&self) -> [(&'static str, &str); 6] {
        [
            ("Summary", self.summary.as_str()),
            ("Implementation Steps", self.implementation_steps.as_str()),
            ("Files to Modify", self.files_to_modify.as_str()),
            ("Files to Create", self.files_to_create.as_str()),
            ("Tests to Add", self.tests_to_add.as_str()),
            ("Risks & Considerations", self.risks.as_str()),
        ]
    }

    /// Backticked paths listed under "Files to Modify".
    pub fn modify_paths(&self) -> Vec<String> {
        backticked(&self.files_to_modify)
    }

    /// Backticked paths listed under "Files to Create".
    pub fn create_paths(&self) -> Vec<String> {
        backticked(&self.files_to_create)
    }
}

fn backticked(text: &str) -> Vec<String> {
    BACKTICK_RE
        .captures_iter(text)
        .map(|caps| caps[1].trim().to_string())
        .collect()
}
