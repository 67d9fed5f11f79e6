//! Forge client trait
//!
//! This module defines the core `ForgeClient` trait that all client
//! implementations must satisfy. It is the complete surface the bot
//! consumes from the code-review host; everything else (merge
//! algorithms, transport retries, authentication) lives behind it.

use crate::types::{
    CheckRunInfo, CheckRunUpdate, Comment, CommitInfo, PullRequest, PullRequestState, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Forge API client trait
///
/// Defines the interface for interacting with the forge. All state the
/// bot keeps is reconstructible from this surface: it has no private
/// database, only comments and check metadata stored on the forge.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow sharing across
/// async tasks.
#[async_trait]
pub trait ForgeClient: Send + Sync {
    /// The user the bot authenticates as. Used to recognize the bot's
    /// own comments when scanning for markers.
    fn current_user(&self) -> User;

    /// List all pull requests, open and closed
    async fn list_pull_requests(&self) -> anyhow::Result<Vec<PullRequest>>;

    /// List pull requests updated at or after the given watermark
    async fn list_pull_requests_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PullRequest>>;

    /// Fetch a single pull request by number
    async fn pull_request(&self, number: u64) -> anyhow::Result<PullRequest>;

    /// Fetch all comments on a pull request, in creation order
    async fn comments(&self, number: u64) -> anyhow::Result<Vec<Comment>>;

    /// Post a new comment on a pull request
    async fn add_comment(&self, number: u64, body: &str) -> anyhow::Result<Comment>;

    /// Replace the body of an existing comment
    async fn update_comment(&self, number: u64, comment_id: &str, body: &str)
        -> anyhow::Result<()>;

    /// Fetch all reviews on a pull request, in submission order
    async fn reviews(&self, number: u64) -> anyhow::Result<Vec<crate::types::Review>>;

    /// Add a label to a pull request
    async fn add_label(&self, number: u64, label: &str) -> anyhow::Result<()>;

    /// Remove a label from a pull request
    async fn remove_label(&self, number: u64, label: &str) -> anyhow::Result<()>;

    /// Fetch the named check run for a commit, if one exists
    async fn check_run(&self, head_hash: &str, name: &str)
        -> anyhow::Result<Option<CheckRunInfo>>;

    /// Create a check run in in-progress state for a commit
    async fn create_check_run(&self, check: CheckRunInfo) -> anyhow::Result<()>;

    /// Update the named check run for a commit
    async fn update_check_run(
        &self,
        head_hash: &str,
        name: &str,
        update: CheckRunUpdate,
    ) -> anyhow::Result<()>;

    /// Set the title of a pull request
    async fn set_title(&self, number: u64, title: &str) -> anyhow::Result<()>;

    /// Set the body of a pull request
    async fn set_body(&self, number: u64, body: &str) -> anyhow::Result<()>;

    /// Open or close a pull request
    async fn set_state(&self, number: u64, state: PullRequestState) -> anyhow::Result<()>;

    /// Fetch a commit by hash; None if the forge does not know it
    async fn commit(&self, hash: &str) -> anyhow::Result<Option<CommitInfo>>;

    /// Create a git ref (`refs/tags/...` or `refs/heads/...`) pointing
    /// at a commit
    async fn create_ref(&self, name: &str, hash: &str) -> anyhow::Result<()>;

    /// List comments made directly on commits, paired with the commit
    /// hash they were made on
    async fn commit_comments(&self) -> anyhow::Result<Vec<(String, Comment)>>;

    /// Post a comment on a commit
    async fn add_commit_comment(&self, hash: &str, body: &str) -> anyhow::Result<()>;

    /// Open a new pull request from `source_ref` in the given fork
    /// against `target_ref` in this repository. Used for backports.
    async fn create_pull_request(
        &self,
        fork: &str,
        source_ref: &str,
        target_ref: &str,
        title: &str,
        body: &str,
    ) -> anyhow::Result<PullRequest>;
}
