//! Canonical entities shared by both platform adapters.
//!
//! Both adapters normalize their upstream schemas into these types; nothing
//! downstream of the adapters ever sees a platform-native payload. Authors
//! are always present; upstream records without one fall back to the
//! `unknown` sentinel because comment rendering assumes a real author.

use serde::{Deserialize, Serialize};

pub const UNKNOWN_USERNAME: &str = "unknown";
pub const UNKNOWN_DISPLAY_NAME: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Repository identity resolved once per run and owned by the run context.
pub struct Repository {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
}

impl Repository {
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// The human (or bot) behind an event, comment, or review.
pub struct Actor {
    pub username: String,
    pub display_name: String,
}

impl Actor {
    pub fn new(username: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            display_name: display_name.into(),
        }
    }

    /// Sentinel actor used when the upstream record carries no author.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_USERNAME, UNKNOWN_DISPLAY_NAME)
    }

    /// Builds an actor from optional upstream fields, falling back per part.
    pub fn from_parts(username: Option<String>, display_name: Option<String>) -> Self {
        let username = match username {
            Some(value) if !value.trim().is_empty() => value,
            _ => UNKNOWN_USERNAME.to_string(),
        };
        let display_name = match display_name {
            Some(value) if !value.trim().is_empty() => value,
            _ => UNKNOWN_DISPLAY_NAME.to_string(),
        };
        Self {
            username,
            display_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A normalized discussion comment. System/automated notes are excluded
/// before normalization reaches this type.
pub struct Comment {
    pub id: u64,
    pub body: String,
    pub author: Actor,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

impl CommitAuthor {
    pub fn from_parts(name: Option<String>, email: Option<String>) -> Self {
        Self {
            name: name
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_USERNAME.to_string()),
            email: email.unwrap_or_default(),
        }
    }

    pub fn unknown() -> Self {
        Self::from_parts(None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    pub author: CommitAuthor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates how a file changed within a merge request or branch diff.
pub enum ChangeType {
    Added,
    Removed,
    Renamed,
    Modified,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Renamed => "renamed",
            Self::Modified => "modified",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub additions: u64,
    pub deletions: u64,
    pub change_type: ChangeType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A path/line-anchored comment attached to a review.
pub struct ReviewComment {
    pub path: String,
    pub line: Option<u64>,
    pub body: String,
    pub author: Actor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A code review. One platform cannot surface these; an empty review list
/// is a valid value, not an error.
pub struct Review {
    pub id: u64,
    pub author: Actor,
    pub body: String,
    pub state: String,
    pub submitted_at: String,
    pub comments: Vec<ReviewComment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    Open,
    Closed,
    Merged,
}

impl EntityState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Merged => "merged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub description: String,
    pub author: Actor,
    pub created_at: String,
    pub state: EntityState,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub number: u64,
    pub title: String,
    pub description: String,
    pub author: Actor,
    pub source_branch: String,
    pub target_branch: String,
    pub head_sha: String,
    pub created_at: String,
    pub additions: u64,
    pub deletions: u64,
    pub state: EntityState,
    pub commits: Vec<Commit>,
    pub files: Vec<FileChange>,
    pub comments: Vec<Comment>,
    pub reviews: Vec<Review>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Issue,
    MergeRequest,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::MergeRequest => "merge_request",
        }
    }

    pub fn is_issue(self) -> bool {
        matches!(self, Self::Issue)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Exactly one of issue or merge request; a fetch that matches neither
/// fails before this value is constructed.
pub enum Entity {
    Issue(Issue),
    MergeRequest(MergeRequest),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Issue(_) => EntityKind::Issue,
            Self::MergeRequest(_) => EntityKind::MergeRequest,
        }
    }

    pub fn number(&self) -> u64 {
        match self {
            Self::Issue(issue) => issue.number,
            Self::MergeRequest(merge_request) => merge_request.number,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Issue(issue) => &issue.title,
            Self::MergeRequest(merge_request) => &merge_request.title,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Issue(issue) => &issue.description,
            Self::MergeRequest(merge_request) => &merge_request.description,
        }
    }

    pub fn comments(&self) -> &[Comment] {
        match self {
            Self::Issue(issue) => &issue.comments,
            Self::MergeRequest(merge_request) => &merge_request.comments,
        }
    }

    pub fn as_issue(&self) -> Option<&Issue> {
        match self {
            Self::Issue(issue) => Some(issue),
            Self::MergeRequest(_) => None,
        }
    }

    pub fn as_merge_request(&self) -> Option<&MergeRequest> {
        match self {
            Self::Issue(_) => None,
            Self::MergeRequest(merge_request) => Some(merge_request),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Normalized result of one run's data fetch.
pub struct RunData {
    pub repository: Repository,
    pub entity: Entity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Result of comparing a working branch against its base.
pub struct BranchComparison {
    pub commits: Vec<Commit>,
    pub files: Vec<FileChange>,
}

impl BranchComparison {
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty() && self.files.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Resolved branch triple for a run. `claude_branch` is set only when the
/// branch was created (or reused) specifically for this run, which is what
/// gates later cleanup.
pub struct BranchPlan {
    pub base_branch: String,
    pub current_branch: String,
    pub claude_branch: Option<String>,
}
