//! Strict parser for model responses.
//!
//! Grammar:
//!
//! ````text
//! ## Explanation
//! free text
//!
//! ## Changes
//!
//! ### File: `src/foo.rs`
//! ### Action: create | modify | delete
//! ```rust
//! <content>            (create/modify only)
//! ```
//! ````
//!
//! Any malformed block rejects the whole response. Prose between blocks is
//! ignored; prose inside a block (between its headers and its fence) is not.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::errors::ParseError;
use crate::core::path::identity_key;
use crate::core::types::{ChangeAction, ChangeSet, FileChange};

static SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^##[ \t]+(.+?)[ \t#]*$").expect("section regex"));
static FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{2,3}[ \t]*File:[ \t]*(.*)$").expect("file regex"));
static ACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{2,3}[ \t]*Action:[ \t]*(.*)$").expect("action regex"));

const CHANGES_TITLE: &str = "changes";
const EXPLANATION_TITLE: &str = "explanation";

/// Parse a model response into a validated [`ChangeSet`].
///
/// Pure and deterministic: the same text always yields the same result.
pub fn parse_response(text: &str) -> Result<ChangeSet, ParseError> {
    let lines: Vec<&str> = text.lines().collect();
    let sections = split_sections(&lines);

    let changes: Vec<(usize, &str)> = sections
        .iter()
        .filter(|s| s.title.eq_ignore_ascii_case(CHANGES_TITLE))
        .flat_map(|s| s.body.iter().copied())
        .collect();
    if !sections
        .iter()
        .any(|s| s.title.eq_ignore_ascii_case(CHANGES_TITLE))
    {
        return Err(ParseError::MissingChangesSection);
    }

    let explanation = sections
        .iter()
        .filter(|s| s.title.eq_ignore_ascii_case(EXPLANATION_TITLE))
        .map(|s| {
            s.body
                .iter()
                .map(|(_, line)| *line)
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let file_changes = parse_blocks(&changes)?;
    if file_changes.is_empty() {
        return Err(ParseError::NoChanges);
    }

    Ok(ChangeSet {
        changes: file_changes,
        explanation,
    })
}

/// A level-2 section with its body lines (1-indexed line number, text).
struct Section<'a> {
    title: String,
    body: Vec<(usize, &'a str)>,
}

/// Split the response at `## ` headers that sit outside fenced blocks.
fn split_sections<'a>(lines: &[&'a str]) -> Vec<Section<'a>> {
    let mut sections = Vec::new();
    let mut current: Option<Section<'a>> = None;
    let mut fence: Option<Fence> = None;

    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        if let Some(open) = fence {
            if open.is_closed_by(line) {
                fence = None;
            }
        } else if let Some(open) = Fence::open(line) {
            fence = Some(open);
        } else if let Some(title) = section_title(line) {
            if let Some(done) = current.take() {
                sections.push(done);
            }
            current = Some(Section {
                title,
                body: Vec::new(),
            });
            continue;
        }

        if let Some(section) = current.as_mut() {
            section.body.push((line_no, line));
        }
    }

    if let Some(done) = current {
        sections.push(done);
    }
    sections
}

fn section_title(line: &str) -> Option<String> {
    let trimmed = line.trim();
    // `## File:` / `## Action:` are block headers, not section boundaries.
    if FILE_RE.is_match(trimmed) || ACTION_RE.is_match(trimmed) {
        return None;
    }
    SECTION_RE
        .captures(trimmed)
        .map(|caps| caps[1].trim().to_string())
}

fn parse_blocks(lines: &[(usize, &str)]) -> Result<Vec<FileChange>, ParseError> {
    let mut changes = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut i = 0;

    while i < lines.len() {
        let (line_no, line) = lines[i];
        let trimmed = line.trim();

        if trimmed.is_empty() {
            i += 1;
            continue;
        }

        if let Some(caps) = FILE_RE.captures(trimmed) {
            let path = clean_path(&caps[1]);
            if path.is_empty() {
                return Err(ParseError::MissingPath { line: line_no });
            }
            i = skip_blank(lines, i + 1);

            let Some(token) = lines
                .get(i)
                .and_then(|(_, l)| ACTION_RE.captures(l.trim()))
                .map(|caps| caps[1].trim().trim_matches('`').to_string())
            else {
                return Err(ParseError::MissingAction {
                    line: line_no,
                    path,
                });
            };
            let action_line = lines[i].0;
            let action =
                ChangeAction::from_token(&token).ok_or_else(|| ParseError::UnknownAction {
                    line: action_line,
                    path: path.clone(),
                    token: token.clone(),
                })?;
            i = skip_blank(lines, i + 1);

            let content = if action.requires_content() {
                let Some(fence) = lines.get(i).and_then(|(_, l)| Fence::open(l)) else {
                    return Err(ParseError::MissingContent {
                        line: action_line,
                        path,
                        action: action.as_str().to_string(),
                    });
                };
                let open_line = lines[i].0;
                let close = lines[i + 1..]
                    .iter()
                    .position(|(_, l)| fence.is_closed_by(l))
                    .map(|offset| i + 1 + offset)
                    .ok_or_else(|| ParseError::UnterminatedBlock {
                        line: open_line,
                        path: path.clone(),
                    })?;
                let body = lines[i + 1..close]
                    .iter()
                    .map(|(_, l)| *l)
                    .collect::<Vec<_>>()
                    .join("\n");
                i = close + 1;
                Some(body)
            } else {
                if lines.get(i).and_then(|(_, l)| Fence::open(l)).is_some() {
                    return Err(ParseError::UnexpectedContent {
                        line: lines[i].0,
                        path,
                    });
                }
                None
            };

            let key = identity_key(&path);
            if seen.contains_key(&key) {
                return Err(ParseError::DuplicatePath {
                    line: line_no,
                    path,
                });
            }
            seen.insert(key, line_no);

            changes.push(FileChange {
                path,
                action,
                content,
            });
            continue;
        }

        // Headers or fences outside a file block mean a block lost its path.
        if ACTION_RE.is_match(trimmed) || Fence::open(line).is_some() {
            return Err(ParseError::MissingPath { line: line_no });
        }

        i += 1;
    }

    Ok(changes)
}

fn skip_blank(lines: &[(usize, &str)], mut i: usize) -> usize {
    while i < lines.len() && lines[i].1.trim().is_empty() {
        i += 1;
    }
    i
}

fn clean_path(raw: &str) -> String {
    raw.trim()
        .trim_matches('`')
        .trim_matches('*')
        .trim_matches('"')
        .trim()
        .to_string()
}

/// An open fenced code block (```` ``` ```` or `~~~`, at least three long).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fence {
    marker: u8,
    len: usize,
}

impl Fence {
    fn open(line: &str) -> Option<Self> {
        let trimmed = line.trim_start();
        let marker = *trimmed.as_bytes().first()?;
        if marker != b'`' && marker != b'~' {
            return None;
        }
        let len = trimmed.bytes().take_while(|b| *b == marker).count();
        if len < 3 {
            return None;
        }
        // Backtick fence info strings may not contain backticks.
        if marker == b'`' && trimmed[len..].contains('`') {
            return None;
        }
        Some(Self { marker, len })
    }

    fn is_closed_by(&self, line: &str) -> bool {
        let trimmed = line.trim();
        let run = trimmed.bytes().take_while(|b| *b == self.marker).count();
        run >= self.len && run == trimmed.len()
    }
}
