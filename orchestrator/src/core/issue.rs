//! Read-only issue snapshot and its merged event timeline.

use serde::{Deserialize, Serialize};

use crate::core::commands::{has_marker, is_command_only};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub body: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelAction {
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEvent {
    pub label: String,
    pub action: LabelAction,
    #[serde(default)]
    pub actor: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub author: String,
    /// Platform reaction name (`+1`, `heart`, ...) or the emoji itself.
    pub content: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<u64>,
}

impl Reaction {
    pub fn is_thumbs_up(&self) -> bool {
        matches!(self.content.as_str(), "+1" | "👍" | "thumbsup" | "thumbs_up")
    }
}

/// Snapshot of an issue handed to the orchestrator by the hosting platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueContext {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// Labels currently on the issue.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub label_events: Vec<LabelEvent>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

impl IssueContext {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Human discussion worth showing a model: no orchestrator reports, no
    /// bot comments, no comments that only carry commands.
    pub fn discussion(&self, bot_login: Option<&str>) -> Vec<&Comment> {
        self.comments
            .iter()
            .filter(|c| bot_login != Some(c.author.as_str()))
            .filter(|c| !has_marker(&c.body) && !is_command_only(&c.body))
            .filter(|c| !c.body.trim().is_empty() && c.body.trim() != "👍")
            .collect()
    }

    /// Comments, label events, and reactions merged into one chronological
    /// sequence.
    ///
    /// The sort is stable: items with equal timestamps keep the order label
    /// events, comments, reactions, and within each kind their input order.
    pub fn timeline(&self) -> Vec<TimelineItem<'_>> {
        let mut items: Vec<TimelineItem<'_>> = self
            .label_events
            .iter()
            .map(TimelineItem::Label)
            .chain(self.comments.iter().map(TimelineItem::Comment))
            .chain(self.reactions.iter().map(TimelineItem::Reaction))
            .collect();
        items.sort_by_key(|item| sort_key(item.created_at()));
        items
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineItem<'a> {
    Label(&'a LabelEvent),
    Comment(&'a Comment),
    Reaction(&'a Reaction),
}

impl<'a> TimelineItem<'a> {
    pub fn created_at(&self) -> &'a str {
        match self {
            Self::Label(event) => &event.created_at,
            Self::Comment(comment) => &comment.created_at,
            Self::Reaction(reaction) => &reaction.created_at,
        }
    }
}

/// Sort key for an RFC 3339 timestamp: UTC milliseconds, or `i64::MAX` for an
/// unparseable value so it sorts last.
fn sort_key(raw: &str) -> i64 {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(i64::MAX)
}
