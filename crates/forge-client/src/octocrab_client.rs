//! Octocrab-based forge client
//!
//! Direct implementation of the `ForgeClient` trait using the octocrab
//! library. Endpoints octocrab does not model (check-run metadata,
//! commit comments) are reached through its raw route methods.

use crate::client::ForgeClient;
use crate::types::{
    CheckConclusion, CheckRunInfo, CheckRunStatus, CheckRunUpdate, Comment, CommitInfo,
    PullRequest, PullRequestState, Review, ReviewVerdict, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use octocrab::Octocrab;
use serde_json::json;
use std::sync::Arc;

/// Direct forge client backed by the GitHub API
#[derive(Debug, Clone)]
pub struct OctocrabForge {
    octocrab: Arc<Octocrab>,
    owner: String,
    repo: String,
    bot_user: User,
}

impl OctocrabForge {
    /// Create a new client for a repository
    pub fn new(octocrab: Arc<Octocrab>, owner: &str, repo: &str, bot_user: User) -> Self {
        Self {
            octocrab,
            owner: owner.to_string(),
            repo: repo.to_string(),
            bot_user,
        }
    }

    /// Resolve the authenticated user, for passing to `new`
    pub async fn authenticated_user(octocrab: &Octocrab) -> anyhow::Result<User> {
        let author = octocrab.current().user().await?;
        Ok(User {
            id: author.id.0,
            username: author.login.clone(),
            full_name: author.login,
        })
    }

    fn repo_route(&self, tail: &str) -> String {
        format!("/repos/{}/{}/{}", self.owner, self.repo, tail)
    }
}

#[async_trait]
impl ForgeClient for OctocrabForge {
    fn current_user(&self) -> User {
        self.bot_user.clone()
    }

    async fn list_pull_requests(&self) -> anyhow::Result<Vec<PullRequest>> {
        debug!("Listing all PRs for {}/{}", self.owner, self.repo);

        let mut prs = Vec::new();
        let mut page_num = 1u32;
        const PER_PAGE: u8 = 100;

        loop {
            let page = self
                .octocrab
                .pulls(&self.owner, &self.repo)
                .list()
                .state(octocrab::params::State::All)
                .per_page(PER_PAGE)
                .page(page_num)
                .send()
                .await?;

            if page.items.is_empty() {
                break;
            }
            for pr in &page.items {
                prs.push(convert_pull_request(pr));
            }
            if page.next.is_none() {
                break;
            }
            page_num += 1;
        }

        debug!("Fetched {} PRs for {}/{}", prs.len(), self.owner, self.repo);
        Ok(prs)
    }

    async fn list_pull_requests_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PullRequest>> {
        debug!(
            "Listing PRs for {}/{} updated since {}",
            self.owner, self.repo, since
        );

        let mut prs = Vec::new();
        let mut page_num = 1u32;

        'outer: loop {
            let page = self
                .octocrab
                .pulls(&self.owner, &self.repo)
                .list()
                .state(octocrab::params::State::All)
                .sort(octocrab::params::pulls::Sort::Updated)
                .direction(octocrab::params::Direction::Descending)
                .per_page(100)
                .page(page_num)
                .send()
                .await?;

            if page.items.is_empty() {
                break;
            }
            for pr in &page.items {
                let converted = convert_pull_request(pr);
                if converted.updated_at < since {
                    // Sorted by update time, nothing older is relevant
                    break 'outer;
                }
                prs.push(converted);
            }
            if page.next.is_none() {
                break;
            }
            page_num += 1;
        }

        Ok(prs)
    }

    async fn pull_request(&self, number: u64) -> anyhow::Result<PullRequest> {
        let pr = self
            .octocrab
            .pulls(&self.owner, &self.repo)
            .get(number)
            .await?;
        Ok(convert_pull_request(&pr))
    }

    async fn comments(&self, number: u64) -> anyhow::Result<Vec<Comment>> {
        let mut comments = Vec::new();
        let mut page_num = 1u32;

        loop {
            let page = self
                .octocrab
                .issues(&self.owner, &self.repo)
                .list_comments(number)
                .per_page(100)
                .page(page_num)
                .send()
                .await?;

            if page.items.is_empty() {
                break;
            }
            for comment in &page.items {
                comments.push(convert_comment(comment));
            }
            if page.next.is_none() {
                break;
            }
            page_num += 1;
        }

        Ok(comments)
    }

    async fn add_comment(&self, number: u64, body: &str) -> anyhow::Result<Comment> {
        let comment = self
            .octocrab
            .issues(&self.owner, &self.repo)
            .create_comment(number, body)
            .await?;
        Ok(convert_comment(&comment))
    }

    async fn update_comment(
        &self,
        _number: u64,
        comment_id: &str,
        body: &str,
    ) -> anyhow::Result<()> {
        let id: u64 = comment_id.parse()?;
        self.octocrab
            .issues(&self.owner, &self.repo)
            .update_comment(octocrab::models::CommentId(id), body)
            .await?;
        Ok(())
    }

    async fn reviews(&self, number: u64) -> anyhow::Result<Vec<Review>> {
        let page = self
            .octocrab
            .pulls(&self.owner, &self.repo)
            .list_reviews(number)
            .per_page(100)
            .send()
            .await?;

        let mut reviews: Vec<Review> = page.items.iter().filter_map(convert_review).collect();
        reviews.sort_by_key(|r| r.created_at);
        Ok(reviews)
    }

    async fn add_label(&self, number: u64, label: &str) -> anyhow::Result<()> {
        self.octocrab
            .issues(&self.owner, &self.repo)
            .add_labels(number, &[label.to_string()])
            .await?;
        Ok(())
    }

    async fn remove_label(&self, number: u64, label: &str) -> anyhow::Result<()> {
        self.octocrab
            .issues(&self.owner, &self.repo)
            .remove_label(number, label)
            .await?;
        Ok(())
    }

    async fn check_run(
        &self,
        head_hash: &str,
        name: &str,
    ) -> anyhow::Result<Option<CheckRunInfo>> {
        let route = self.repo_route(&format!("commits/{}/check-runs", head_hash));
        let response: serde_json::Value = self.octocrab.get(route, None::<&()>).await?;

        let runs = response["check_runs"].as_array().cloned().unwrap_or_default();
        for run in runs {
            if run["name"].as_str() == Some(name) {
                return Ok(Some(convert_check_run(&run, head_hash)));
            }
        }
        Ok(None)
    }

    async fn create_check_run(&self, check: CheckRunInfo) -> anyhow::Result<()> {
        let route = self.repo_route("check-runs");
        let body = json!({
            "name": check.name,
            "head_sha": check.head_hash,
            "status": "in_progress",
            "external_id": check.metadata.unwrap_or_default(),
            "output": {
                "title": check.title,
                "summary": check.summary,
            },
        });
        let _: serde_json::Value = self.octocrab.post(route, Some(&body)).await?;
        Ok(())
    }

    async fn update_check_run(
        &self,
        head_hash: &str,
        name: &str,
        update: CheckRunUpdate,
    ) -> anyhow::Result<()> {
        // The REST API updates by check run id, so look it up first
        let route = self.repo_route(&format!("commits/{}/check-runs", head_hash));
        let response: serde_json::Value = self.octocrab.get(route, None::<&()>).await?;
        let id = response["check_runs"]
            .as_array()
            .and_then(|runs| {
                runs.iter()
                    .find(|run| run["name"].as_str() == Some(name))
                    .and_then(|run| run["id"].as_u64())
            })
            .ok_or_else(|| anyhow::anyhow!("no check run named '{}' on {}", name, head_hash))?;

        let mut body = serde_json::Map::new();
        if let Some(status) = update.status {
            let status = match status {
                CheckRunStatus::InProgress => "in_progress",
                CheckRunStatus::Completed => "completed",
            };
            body.insert("status".into(), json!(status));
        }
        if let Some(conclusion) = update.conclusion {
            let conclusion = match conclusion {
                CheckConclusion::Success => "success",
                CheckConclusion::Failure => "failure",
            };
            body.insert("conclusion".into(), json!(conclusion));
        }
        if let Some(metadata) = update.metadata {
            body.insert("external_id".into(), json!(metadata));
        }
        let mut output = serde_json::Map::new();
        if let Some(title) = update.title {
            output.insert("title".into(), json!(title));
        }
        if let Some(summary) = update.summary {
            output.insert("summary".into(), json!(summary));
        }
        if let Some(annotations) = update.annotations {
            let annotations: Vec<_> = annotations
                .iter()
                .map(|a| {
                    json!({
                        "path": a.path,
                        "start_line": a.line,
                        "end_line": a.line,
                        "annotation_level": "failure",
                        "message": a.message,
                    })
                })
                .collect();
            output.insert("annotations".into(), json!(annotations));
        }
        if !output.is_empty() {
            body.insert("output".into(), serde_json::Value::Object(output));
        }

        let route = self.repo_route(&format!("check-runs/{}", id));
        let _: serde_json::Value = self
            .octocrab
            .patch(route, Some(&serde_json::Value::Object(body)))
            .await?;
        Ok(())
    }

    async fn set_title(&self, number: u64, title: &str) -> anyhow::Result<()> {
        self.octocrab
            .pulls(&self.owner, &self.repo)
            .update(number)
            .title(title)
            .send()
            .await?;
        Ok(())
    }

    async fn set_body(&self, number: u64, body: &str) -> anyhow::Result<()> {
        self.octocrab
            .pulls(&self.owner, &self.repo)
            .update(number)
            .body(body)
            .send()
            .await?;
        Ok(())
    }

    async fn set_state(&self, number: u64, state: PullRequestState) -> anyhow::Result<()> {
        let state = match state {
            PullRequestState::Open => octocrab::params::pulls::State::Open,
            PullRequestState::Closed => octocrab::params::pulls::State::Closed,
        };
        self.octocrab
            .pulls(&self.owner, &self.repo)
            .update(number)
            .state(state)
            .send()
            .await?;
        Ok(())
    }

    async fn commit(&self, hash: &str) -> anyhow::Result<Option<CommitInfo>> {
        let route = self.repo_route(&format!("commits/{}", hash));
        let response: Result<serde_json::Value, _> = self.octocrab.get(route, None::<&()>).await;
        match response {
            Ok(commit) => Ok(Some(convert_commit(&commit))),
            Err(octocrab::Error::GitHub { source, .. })
                if source.status_code.as_u16() == 404 =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn commit_comments(&self) -> anyhow::Result<Vec<(String, Comment)>> {
        let route = self.repo_route("comments");
        let response: Vec<serde_json::Value> = self.octocrab.get(route, None::<&()>).await?;
        let comments = response
            .iter()
            .filter_map(|c| {
                let hash = c["commit_id"].as_str()?.to_string();
                Some((hash, convert_raw_comment(c)))
            })
            .collect();
        Ok(comments)
    }

    async fn create_ref(&self, name: &str, hash: &str) -> anyhow::Result<()> {
        let route = self.repo_route("git/refs");
        let _: serde_json::Value = self
            .octocrab
            .post(route, Some(&json!({ "ref": name, "sha": hash })))
            .await?;
        Ok(())
    }

    async fn add_commit_comment(&self, hash: &str, body: &str) -> anyhow::Result<()> {
        let route = self.repo_route(&format!("commits/{}/comments", hash));
        let _: serde_json::Value = self
            .octocrab
            .post(route, Some(&json!({ "body": body })))
            .await?;
        Ok(())
    }

    async fn create_pull_request(
        &self,
        fork: &str,
        source_ref: &str,
        target_ref: &str,
        title: &str,
        body: &str,
    ) -> anyhow::Result<PullRequest> {
        // Cross-repository head refs use the "owner:branch" form
        let fork_owner = fork.split('/').next().unwrap_or(fork);
        let head = format!("{}:{}", fork_owner, source_ref);
        let pr = self
            .octocrab
            .pulls(&self.owner, &self.repo)
            .create(title, head, target_ref)
            .body(body)
            .send()
            .await?;
        Ok(convert_pull_request(&pr))
    }
}

/// Convert octocrab PullRequest to our PullRequest type
fn convert_pull_request(pr: &octocrab::models::pulls::PullRequest) -> PullRequest {
    let author = pr
        .user
        .as_ref()
        .map(|u| User {
            id: u.id.0,
            username: u.login.clone(),
            full_name: u.login.clone(),
        })
        .unwrap_or_else(|| User::new(0, "unknown"));

    PullRequest {
        number: pr.number,
        title: pr.title.clone().unwrap_or_default(),
        body: pr.body.clone().unwrap_or_default(),
        author,
        state: match pr.state {
            Some(octocrab::models::IssueState::Closed) => PullRequestState::Closed,
            _ => PullRequestState::Open,
        },
        draft: pr.draft.unwrap_or(false),
        head_hash: pr.head.sha.clone(),
        target_ref: pr.base.ref_field.clone(),
        source_ref: pr.head.ref_field.clone(),
        labels: pr
            .labels
            .as_ref()
            .map(|labels| labels.iter().map(|l| l.name.clone()).collect())
            .unwrap_or_default(),
        created_at: pr.created_at.unwrap_or_else(Utc::now),
        updated_at: pr.updated_at.unwrap_or_else(Utc::now),
    }
}

fn convert_comment(comment: &octocrab::models::issues::Comment) -> Comment {
    Comment {
        id: comment.id.0.to_string(),
        author: User {
            id: comment.user.id.0,
            username: comment.user.login.clone(),
            full_name: comment.user.login.clone(),
        },
        body: comment.body.clone().unwrap_or_default(),
        created_at: comment.created_at,
    }
}

fn convert_raw_comment(comment: &serde_json::Value) -> Comment {
    Comment {
        id: comment["id"].as_u64().unwrap_or_default().to_string(),
        author: User::new(
            comment["user"]["id"].as_u64().unwrap_or_default(),
            comment["user"]["login"].as_str().unwrap_or("unknown"),
        ),
        body: comment["body"].as_str().unwrap_or_default().to_string(),
        created_at: comment["created_at"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(Utc::now),
    }
}

fn convert_review(review: &octocrab::models::pulls::Review) -> Option<Review> {
    let verdict = match review.state {
        Some(octocrab::models::pulls::ReviewState::Approved) => ReviewVerdict::Approved,
        Some(octocrab::models::pulls::ReviewState::ChangesRequested) => {
            ReviewVerdict::ChangesRequested
        }
        _ => ReviewVerdict::None,
    };
    Some(Review {
        reviewer: review.user.as_ref().map(|u| User {
            id: u.id.0,
            username: u.login.clone(),
            full_name: u.login.clone(),
        })?,
        verdict,
        hash: review.commit_id.clone().unwrap_or_default(),
        created_at: review.submitted_at.unwrap_or_else(Utc::now),
    })
}

fn convert_check_run(run: &serde_json::Value, head_hash: &str) -> CheckRunInfo {
    let status = match run["status"].as_str() {
        Some("completed") => CheckRunStatus::Completed,
        _ => CheckRunStatus::InProgress,
    };
    let conclusion = match run["conclusion"].as_str() {
        Some("success") => Some(CheckConclusion::Success),
        Some("failure") => Some(CheckConclusion::Failure),
        _ => None,
    };
    CheckRunInfo {
        name: run["name"].as_str().unwrap_or_default().to_string(),
        head_hash: head_hash.to_string(),
        status,
        conclusion,
        title: run["output"]["title"].as_str().unwrap_or_default().to_string(),
        summary: run["output"]["summary"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        metadata: run["external_id"].as_str().map(|s| s.to_string()),
        annotations: Vec::new(),
        completed_at: run["completed_at"].as_str().and_then(|s| s.parse().ok()),
    }
}

fn convert_commit(commit: &serde_json::Value) -> CommitInfo {
    let c = &commit["commit"];
    CommitInfo {
        hash: commit["sha"].as_str().unwrap_or_default().to_string(),
        author_name: c["author"]["name"].as_str().unwrap_or_default().to_string(),
        author_email: c["author"]["email"].as_str().unwrap_or_default().to_string(),
        committer_name: c["committer"]["name"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        committer_email: c["committer"]["email"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        message: c["message"].as_str().unwrap_or_default().to_string(),
        parents: commit["parents"]
            .as_array()
            .map(|parents| {
                parents
                    .iter()
                    .filter_map(|p| p["sha"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
    }
}
