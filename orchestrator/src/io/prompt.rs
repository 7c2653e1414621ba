//! Prompt builder for model input.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::feedback::Feedback;
use crate::core::issue::IssueContext;

const IMPLEMENT_TEMPLATE: &str = include_str!("prompts/implement.md");
const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
pub const SYSTEM_PROMPT: &str = include_str!("prompts/system.md");

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section marker regex")
});

/// Droppable sections, least important first.
const DROP_ORDER: [&str; 2] = ["previous_changes", "discussion"];
const TRUNCATED_MARKER: &str = "\n[truncated]";

#[derive(Debug, Clone, Serialize)]
struct DiscussionEntry {
    author: String,
    body: String,
}

/// Everything a prompt needs about the issue and repository.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    number: u64,
    title: String,
    body: String,
    discussion: Vec<DiscussionEntry>,
    language: String,
    test_command: String,
    codebase: String,
    plan: Option<String>,
}

impl PromptInputs {
    pub fn from_issue(
        ctx: &IssueContext,
        bot_login: Option<&str>,
        language: &str,
        test_command: &str,
        codebase: &str,
    ) -> Self {
        Self {
            number: ctx.number,
            title: ctx.title.trim().to_string(),
            body: ctx.body.trim().to_string(),
            discussion: ctx
                .discussion(bot_login)
                .into_iter()
                .map(|c| DiscussionEntry {
                    author: c.author.clone(),
                    body: c.body.trim().to_string(),
                })
                .collect(),
            language: language.to_string(),
            test_command: test_command.to_string(),
            codebase: codebase.trim().to_string(),
            plan: None,
        }
    }

    /// Attach an approved plan (planned flow only).
    pub fn with_plan(mut self, plan: Option<&str>) -> Self {
        self.plan = plan.map(str::trim).filter(|p| !p.is_empty()).map(str::to_string);
        self
    }
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("implement", IMPLEMENT_TEMPLATE)
            .context("load implement template")?;
        env.add_template("plan", PLAN_TEMPLATE)
            .context("load plan template")?;
        Ok(Self { env })
    }

    fn render(&self, name: &str, input: &PromptInputs, feedback: Option<&Feedback>) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(context! {
                issue => context! {
                    number => input.number,
                    title => input.title.as_str(),
                    body => input.body.as_str(),
                },
                discussion => input.discussion.as_slice(),
                plan => input.plan.as_deref(),
                language => input.language.as_str(),
                test_command => input.test_command.as_str(),
                codebase => input.codebase.as_str(),
                feedback => feedback,
            })
            .with_context(|| format!("render {name} prompt"))?;
        Ok(rendered)
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output at `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();

    for (i, caps) in matches.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let required = kind.as_str() == "required";
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

/// Drop droppable sections until the prompt fits, then truncate the last section.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let other_len: usize = sections
        .iter()
        .take(sections.len().saturating_sub(1))
        .map(|s| s.content.len())
        .sum();
    let allowed = budget.saturating_sub(other_len);
    if let Some(last) = sections.last_mut() {
        let before_len = last.content.len();
        if allowed > TRUNCATED_MARKER.len() {
            truncate_at_char_boundary(&mut last.content, allowed - TRUNCATED_MARKER.len());
            last.content.push_str(TRUNCATED_MARKER);
        } else {
            truncate_at_char_boundary(&mut last.content, allowed);
        }
        debug!(
            section = last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn truncate_at_char_boundary(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds prompts within a byte budget, dropping less critical sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    /// Prompt for one implementation attempt.
    pub fn build_implementation(
        &self,
        input: &PromptInputs,
        feedback: Option<&Feedback>,
    ) -> Result<String> {
        self.build("implement", input, feedback)
    }

    /// Prompt for a planning run.
    pub fn build_planning(&self, input: &PromptInputs) -> Result<String> {
        self.build("plan", input, None)
    }

    fn build(&self, name: &str, input: &PromptInputs, feedback: Option<&Feedback>) -> Result<String> {
        let rendered = PromptEngine::new()?.render(name, input, feedback)?;
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        Ok(render_sections(&sections))
    }
}
