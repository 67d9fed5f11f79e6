//! In-memory forge
//!
//! `MockForge` implements the full `ForgeClient` trait against plain
//! in-memory maps. The bot's tests drive entire work-item scenarios
//! against it, and assert on the comments, labels and checks it ends
//! up holding.

use crate::client::ForgeClient;
use crate::types::{
    CheckRunInfo, CheckRunUpdate, Comment, CommitInfo, PullRequest, PullRequestState, Review, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Default)]
struct MockState {
    prs: BTreeMap<u64, PullRequest>,
    comments: HashMap<u64, Vec<Comment>>,
    reviews: HashMap<u64, Vec<Review>>,
    /// Keyed by (head hash, check name)
    checks: HashMap<(String, String), CheckRunInfo>,
    commits: HashMap<String, CommitInfo>,
    commit_comments: Vec<(String, Comment)>,
    /// Created refs as (name, hash) pairs
    refs: Vec<(String, String)>,
    next_comment_id: u64,
    next_pr_number: u64,
}

/// In-memory `ForgeClient` implementation for tests
pub struct MockForge {
    bot_user: User,
    state: Mutex<MockState>,
}

impl MockForge {
    pub fn new(bot_user: User) -> Self {
        Self {
            bot_user,
            state: Mutex::new(MockState {
                next_pr_number: 1,
                ..Default::default()
            }),
        }
    }

    /// Seed a pull request
    pub fn add_pull_request(&self, pr: PullRequest) {
        let mut state = self.state.lock().unwrap();
        state.next_pr_number = state.next_pr_number.max(pr.number + 1);
        state.prs.insert(pr.number, pr);
    }

    /// Seed a commit known to the forge
    pub fn add_commit(&self, commit: CommitInfo) {
        let mut state = self.state.lock().unwrap();
        state.commits.insert(commit.hash.clone(), commit);
    }

    /// Seed a review
    pub fn add_review(&self, number: u64, review: Review) {
        let mut state = self.state.lock().unwrap();
        state.reviews.entry(number).or_default().push(review);
        if let Some(pr) = state.prs.get_mut(&number) {
            pr.updated_at = Utc::now();
        }
    }

    /// Post a comment as an arbitrary user (simulating a human)
    pub fn add_comment_from(&self, user: &User, number: u64, body: &str) -> Comment {
        let mut state = self.state.lock().unwrap();
        state.next_comment_id += 1;
        let comment = Comment {
            id: state.next_comment_id.to_string(),
            author: user.clone(),
            body: body.to_string(),
            created_at: Utc::now(),
        };
        state
            .comments
            .entry(number)
            .or_default()
            .push(comment.clone());
        if let Some(pr) = state.prs.get_mut(&number) {
            pr.updated_at = Utc::now();
        }
        comment
    }

    /// Post a commit comment as an arbitrary user
    pub fn add_commit_comment_from(&self, user: &User, hash: &str, body: &str) {
        let mut state = self.state.lock().unwrap();
        state.next_comment_id += 1;
        let comment = Comment {
            id: state.next_comment_id.to_string(),
            author: user.clone(),
            body: body.to_string(),
            created_at: Utc::now(),
        };
        state.commit_comments.push((hash.to_string(), comment));
    }

    /// Current labels on a PR, sorted (test assertion helper)
    pub fn labels_of(&self, number: u64) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut labels = state
            .prs
            .get(&number)
            .map(|pr| pr.labels.clone())
            .unwrap_or_default();
        labels.sort();
        labels
    }

    /// Current comments on a PR (test assertion helper)
    pub fn comments_of(&self, number: u64) -> Vec<Comment> {
        let state = self.state.lock().unwrap();
        state.comments.get(&number).cloned().unwrap_or_default()
    }

    /// Refs created on the forge (test assertion helper)
    pub fn refs(&self) -> Vec<(String, String)> {
        let state = self.state.lock().unwrap();
        state.refs.clone()
    }

    /// Stored check run (test assertion helper)
    pub fn check_of(&self, head_hash: &str, name: &str) -> Option<CheckRunInfo> {
        let state = self.state.lock().unwrap();
        state
            .checks
            .get(&(head_hash.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl ForgeClient for MockForge {
    fn current_user(&self) -> User {
        self.bot_user.clone()
    }

    async fn list_pull_requests(&self) -> anyhow::Result<Vec<PullRequest>> {
        let state = self.state.lock().unwrap();
        Ok(state.prs.values().cloned().collect())
    }

    async fn list_pull_requests_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PullRequest>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .prs
            .values()
            .filter(|pr| pr.updated_at >= since)
            .cloned()
            .collect())
    }

    async fn pull_request(&self, number: u64) -> anyhow::Result<PullRequest> {
        let state = self.state.lock().unwrap();
        state
            .prs
            .get(&number)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such pull request: {}", number))
    }

    async fn comments(&self, number: u64) -> anyhow::Result<Vec<Comment>> {
        let state = self.state.lock().unwrap();
        Ok(state.comments.get(&number).cloned().unwrap_or_default())
    }

    async fn add_comment(&self, number: u64, body: &str) -> anyhow::Result<Comment> {
        Ok(self.add_comment_from(&self.bot_user, number, body))
    }

    async fn update_comment(
        &self,
        number: u64,
        comment_id: &str,
        body: &str,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let comments = state
            .comments
            .get_mut(&number)
            .ok_or_else(|| anyhow::anyhow!("no comments on pull request {}", number))?;
        let comment = comments
            .iter_mut()
            .find(|c| c.id == comment_id)
            .ok_or_else(|| anyhow::anyhow!("no such comment: {}", comment_id))?;
        comment.body = body.to_string();
        if let Some(pr) = state.prs.get_mut(&number) {
            pr.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn reviews(&self, number: u64) -> anyhow::Result<Vec<Review>> {
        let state = self.state.lock().unwrap();
        Ok(state.reviews.get(&number).cloned().unwrap_or_default())
    }

    async fn add_label(&self, number: u64, label: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let pr = state
            .prs
            .get_mut(&number)
            .ok_or_else(|| anyhow::anyhow!("no such pull request: {}", number))?;
        if !pr.labels.iter().any(|l| l == label) {
            pr.labels.push(label.to_string());
            pr.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn remove_label(&self, number: u64, label: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let pr = state
            .prs
            .get_mut(&number)
            .ok_or_else(|| anyhow::anyhow!("no such pull request: {}", number))?;
        pr.labels.retain(|l| l != label);
        pr.updated_at = Utc::now();
        Ok(())
    }

    async fn check_run(
        &self,
        head_hash: &str,
        name: &str,
    ) -> anyhow::Result<Option<CheckRunInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .checks
            .get(&(head_hash.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_check_run(&self, check: CheckRunInfo) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .checks
            .insert((check.head_hash.clone(), check.name.clone()), check);
        Ok(())
    }

    async fn update_check_run(
        &self,
        head_hash: &str,
        name: &str,
        update: CheckRunUpdate,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let check = state
            .checks
            .get_mut(&(head_hash.to_string(), name.to_string()))
            .ok_or_else(|| anyhow::anyhow!("no check run named '{}' on {}", name, head_hash))?;
        if let Some(status) = update.status {
            check.status = status;
            if status == crate::types::CheckRunStatus::Completed {
                check.completed_at = Some(Utc::now());
            }
        }
        if let Some(conclusion) = update.conclusion {
            check.conclusion = Some(conclusion);
        }
        if let Some(title) = update.title {
            check.title = title;
        }
        if let Some(summary) = update.summary {
            check.summary = summary;
        }
        if let Some(metadata) = update.metadata {
            check.metadata = Some(metadata);
        }
        if let Some(annotations) = update.annotations {
            check.annotations = annotations;
        }
        Ok(())
    }

    async fn set_title(&self, number: u64, title: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let pr = state
            .prs
            .get_mut(&number)
            .ok_or_else(|| anyhow::anyhow!("no such pull request: {}", number))?;
        pr.title = title.to_string();
        pr.updated_at = Utc::now();
        Ok(())
    }

    async fn set_body(&self, number: u64, body: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let pr = state
            .prs
            .get_mut(&number)
            .ok_or_else(|| anyhow::anyhow!("no such pull request: {}", number))?;
        pr.body = body.to_string();
        pr.updated_at = Utc::now();
        Ok(())
    }

    async fn set_state(&self, number: u64, new_state: PullRequestState) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let pr = state
            .prs
            .get_mut(&number)
            .ok_or_else(|| anyhow::anyhow!("no such pull request: {}", number))?;
        pr.state = new_state;
        pr.updated_at = Utc::now();
        Ok(())
    }

    async fn commit(&self, hash: &str) -> anyhow::Result<Option<CommitInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state.commits.get(hash).cloned())
    }

    async fn create_ref(&self, name: &str, hash: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.refs.iter().any(|(n, _)| n == name) {
            anyhow::bail!("ref already exists: {}", name);
        }
        state.refs.push((name.to_string(), hash.to_string()));
        Ok(())
    }

    async fn commit_comments(&self) -> anyhow::Result<Vec<(String, Comment)>> {
        let state = self.state.lock().unwrap();
        Ok(state.commit_comments.clone())
    }

    async fn add_commit_comment(&self, hash: &str, body: &str) -> anyhow::Result<()> {
        self.add_commit_comment_from(&self.bot_user, hash, body);
        Ok(())
    }

    async fn create_pull_request(
        &self,
        _fork: &str,
        source_ref: &str,
        target_ref: &str,
        title: &str,
        body: &str,
    ) -> anyhow::Result<PullRequest> {
        let mut state = self.state.lock().unwrap();
        let number = state.next_pr_number;
        state.next_pr_number += 1;
        let pr = PullRequest {
            number,
            title: title.to_string(),
            body: body.to_string(),
            author: self.bot_user.clone(),
            state: PullRequestState::Open,
            draft: false,
            head_hash: format!("{:040x}", number),
            target_ref: target_ref.to_string(),
            source_ref: source_ref.to_string(),
            labels: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        state.prs.insert(number, pr.clone());
        Ok(pr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pr(number: u64) -> PullRequest {
        PullRequest {
            number,
            title: "123: Fix bug".to_string(),
            body: String::new(),
            author: User::new(1, "author"),
            state: PullRequestState::Open,
            draft: false,
            head_hash: "a".repeat(40),
            target_ref: "master".to_string(),
            source_ref: "fix".to_string(),
            labels: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_label_roundtrip() {
        let forge = MockForge::new(User::new(99, "bot"));
        forge.add_pull_request(test_pr(1));

        forge.add_label(1, "rfr").await.unwrap();
        forge.add_label(1, "ready").await.unwrap();
        forge.add_label(1, "rfr").await.unwrap();
        assert_eq!(forge.labels_of(1), vec!["ready", "rfr"]);

        forge.remove_label(1, "ready").await.unwrap();
        assert_eq!(forge.labels_of(1), vec!["rfr"]);
    }

    #[tokio::test]
    async fn test_comment_update_bumps_pr() {
        let forge = MockForge::new(User::new(99, "bot"));
        forge.add_pull_request(test_pr(1));
        let before = forge.pull_request(1).await.unwrap().updated_at;

        let comment = forge.add_comment(1, "hello").await.unwrap();
        forge.update_comment(1, &comment.id, "edited").await.unwrap();

        let comments = forge.comments_of(1);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].body, "edited");
        assert!(forge.pull_request(1).await.unwrap().updated_at >= before);
    }
}
