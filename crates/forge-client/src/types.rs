//! Forge API data transfer objects
//!
//! These types represent the data the bot consumes from the forge.
//! They are intentionally separate from the bot's domain logic to keep
//! this crate pure and reusable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A forge user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    /// Stable user id on the forge
    pub id: u64,

    /// Login name (e.g. "duke")
    pub username: String,

    /// Full display name, may equal the username if unset
    pub full_name: String,
}

impl User {
    pub fn new(id: u64, username: &str) -> Self {
        Self {
            id,
            username: username.to_string(),
            full_name: username.to_string(),
        }
    }
}

/// State of a pull request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestState {
    #[default]
    Open,
    Closed,
}

/// A pull request from the forge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    /// PR number (e.g., 123)
    pub number: u64,

    /// PR title
    pub title: String,

    /// PR body/description
    pub body: String,

    /// Author of the PR
    pub author: User,

    /// Open or closed
    pub state: PullRequestState,

    /// Whether the PR is marked as a draft
    pub draft: bool,

    /// HEAD commit SHA
    pub head_hash: String,

    /// Target (base) branch name (e.g., "master")
    pub target_ref: String,

    /// Source (head) branch name (e.g., "feature/foo")
    pub source_ref: String,

    /// Label names currently present, unordered
    pub labels: Vec<String>,

    /// When the PR was created
    pub created_at: DateTime<Utc>,

    /// When the PR was last updated
    pub updated_at: DateTime<Utc>,
}

impl PullRequest {
    /// Whether a label is currently present
    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l == name)
    }
}

/// A comment on a pull request or commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    /// Forge comment id, unique within the repository
    pub id: String,

    /// Comment author
    pub author: User,

    /// Comment body text
    pub body: String,

    /// When the comment was created
    pub created_at: DateTime<Utc>,
}

/// Verdict of a review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    /// Changes are approved
    Approved,
    /// More changes needed
    ChangesRequested,
    /// Comment only
    None,
}

/// A review on a pull request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    /// The reviewing user
    pub reviewer: User,

    /// Approve / request changes / comment
    pub verdict: ReviewVerdict,

    /// The head hash the review was made against
    pub hash: String,

    /// When the review was submitted
    pub created_at: DateTime<Utc>,
}

/// Status of a check run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunStatus {
    /// Check is in progress
    InProgress,
    /// Check has completed
    Completed,
}

/// Conclusion of a completed check run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    /// Check passed
    Success,
    /// Check failed
    Failure,
}

/// A file/line annotation attached to a check run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAnnotation {
    /// File path relative to the repository root
    pub path: String,

    /// Line number the annotation points at
    pub line: u32,

    /// Annotation message
    pub message: String,
}

/// A check run as stored on the forge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRunInfo {
    /// Name of the check (e.g., "policy")
    pub name: String,

    /// The commit the check applies to
    pub head_hash: String,

    /// Current status
    pub status: CheckRunStatus,

    /// Conclusion (only set when status is Completed)
    pub conclusion: Option<CheckConclusion>,

    /// Short title shown next to the status
    pub title: String,

    /// Free-text summary
    pub summary: String,

    /// Opaque metadata string owned by the bot (fingerprint storage)
    pub metadata: Option<String>,

    /// File annotations
    pub annotations: Vec<FileAnnotation>,

    /// When the check completed, if it did
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields of a check run the bot may change on update
#[derive(Debug, Clone, Default)]
pub struct CheckRunUpdate {
    pub status: Option<CheckRunStatus>,
    pub conclusion: Option<CheckConclusion>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub metadata: Option<String>,
    pub annotations: Option<Vec<FileAnnotation>>,
}

/// Metadata of a commit fetched by hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Commit hash
    pub hash: String,

    /// Author name as recorded in the commit
    pub author_name: String,

    /// Author email as recorded in the commit
    pub author_email: String,

    /// Committer name as recorded in the commit
    pub committer_name: String,

    /// Committer email as recorded in the commit
    pub committer_email: String,

    /// Full commit message
    pub message: String,

    /// Parent hashes; more than one marks a merge commit
    #[serde(default)]
    pub parents: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_request_serialization() {
        let pr = PullRequest {
            number: 42,
            title: "123: Fix bug".to_string(),
            body: "Description".to_string(),
            author: User::new(7, "duke"),
            state: PullRequestState::Open,
            draft: false,
            head_hash: "0123456789012345678901234567890123456789".to_string(),
            target_ref: "master".to_string(),
            source_ref: "fix".to_string(),
            labels: vec!["rfr".to_string()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&pr).unwrap();
        let deserialized: PullRequest = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.number, 42);
        assert_eq!(deserialized.author.username, "duke");
        assert!(deserialized.has_label("rfr"));
        assert!(!deserialized.has_label("ready"));
    }

    #[test]
    fn test_state_serde() {
        assert_eq!(
            serde_json::to_string(&PullRequestState::Open).unwrap(),
            "\"open\""
        );
        assert_eq!(
            serde_json::to_string(&ReviewVerdict::ChangesRequested).unwrap(),
            "\"changes_requested\""
        );
    }
}
