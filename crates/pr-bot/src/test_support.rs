//! Shared test doubles for the work item and scheduler tests.

use crate::census::StaticCensus;
use crate::check::checker::{CheckIssue, CheckerError, PolicyChecker};
use crate::commands::CommandRegistry;
use crate::context::{BotContext, BotState};
use crate::integration_lock::IntegrationLocks;
use crate::repo::{LocalRepository, MergeOutcome, RepositoryPool};
use crate::tracker::{IssueTracker, TrackedIssue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forge_client::{CommitInfo, MockForge, PullRequest, User};
use pr_bot_config::BotConfig;
use std::sync::{Arc, Mutex};

pub fn bot_user() -> User {
    User::new(1, "prbot")
}

/// A census with one of each role, plus the bot as committer.
pub fn default_census() -> StaticCensus {
    StaticCensus::from_toml(
        r#"
        [contributors.prbot]
        role = "committer"

        [contributors.author]
        full_name = "An Author"
        role = "author"

        [contributors.committer]
        full_name = "A Committer"
        role = "committer"

        [contributors.reviewer]
        full_name = "A Reviewer"
        role = "reviewer"
        "#,
    )
    .unwrap()
}

/// In-memory repository double. Every materialized clone shares the
/// same backing state, so tests can inspect pushes.
#[derive(Default)]
pub struct FakeRepoState {
    pub target_hash: String,
    pub conflict: Option<String>,
    pub commits: Vec<CommitInfo>,
    pub changed_files: Vec<String>,
    /// Hashes recorded as ancestors of the target
    pub integrated: Vec<String>,
    pub pushes: Vec<(String, String)>,
    /// Hash produced by the next squash
    pub next_squash: String,
    /// Author (name, email) pairs passed to squash
    pub squash_authors: Vec<(String, String)>,
}

#[derive(Clone, Default)]
pub struct FakeRepoPool {
    pub state: Arc<Mutex<FakeRepoState>>,
}

impl FakeRepoPool {
    pub fn new() -> Self {
        let pool = Self::default();
        {
            let mut state = pool.state.lock().unwrap();
            state.target_hash = "4567ef01".to_string();
            state.next_squash = "89abcdef".to_string();
        }
        pool
    }
}

#[async_trait]
impl RepositoryPool for FakeRepoPool {
    async fn materialize(&self, _pr: &PullRequest) -> anyhow::Result<Box<dyn LocalRepository>> {
        Ok(Box::new(FakeRepo {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeRepo {
    state: Arc<Mutex<FakeRepoState>>,
}

impl LocalRepository for FakeRepo {
    fn target_hash(&self) -> anyhow::Result<String> {
        Ok(self.state.lock().unwrap().target_hash.clone())
    }

    fn is_ancestor(&self, ancestor: &str, _descendant: &str) -> anyhow::Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .integrated
            .iter()
            .any(|h| h == ancestor))
    }

    fn merge_target(&self, _name: &str, _email: &str) -> anyhow::Result<MergeOutcome> {
        let state = self.state.lock().unwrap();
        match &state.conflict {
            Some(message) => Ok(MergeOutcome::Conflict {
                message: message.clone(),
            }),
            None => Ok(MergeOutcome::Merged {
                hash: state.target_hash.clone(),
            }),
        }
    }

    fn squash(
        &self,
        _message: &str,
        author: (&str, &str),
        _committer: (&str, &str),
    ) -> anyhow::Result<String> {
        let mut state = self.state.lock().unwrap();
        state
            .squash_authors
            .push((author.0.to_string(), author.1.to_string()));
        Ok(state.next_squash.clone())
    }

    fn commits_since_target(&self) -> anyhow::Result<Vec<CommitInfo>> {
        Ok(self.state.lock().unwrap().commits.clone())
    }

    fn changed_files(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.state.lock().unwrap().changed_files.clone())
    }

    fn branch_contains(&self, _branch: &str, hash: &str) -> anyhow::Result<bool> {
        self.is_ancestor(hash, "")
    }

    fn push(&self, hash: &str, target_ref: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.pushes.push((hash.to_string(), target_ref.to_string()));
        state.integrated.push(hash.to_string());
        Ok(())
    }
}

/// Checker returning a fixed issue list.
pub struct StubChecker {
    pub issues: Mutex<Vec<CheckIssue>>,
    pub config_error: Option<String>,
}

impl StubChecker {
    pub fn passing() -> Self {
        Self {
            issues: Mutex::new(Vec::new()),
            config_error: None,
        }
    }

    pub fn failing(issues: Vec<CheckIssue>) -> Self {
        Self {
            issues: Mutex::new(issues),
            config_error: None,
        }
    }
}

impl PolicyChecker for StubChecker {
    fn check(
        &self,
        _repo: &dyn LocalRepository,
        _pr: &PullRequest,
    ) -> Result<Vec<CheckIssue>, CheckerError> {
        if let Some(message) = &self.config_error {
            return Err(CheckerError::Configuration(message.clone()));
        }
        Ok(self.issues.lock().unwrap().clone())
    }
}

/// Tracker with a fixed set of issues. Label and comment mutations
/// are recorded for inspection.
#[derive(Default)]
pub struct FakeTracker {
    pub issues: Mutex<Vec<TrackedIssue>>,
    pub labeled: Mutex<Vec<(String, String)>>,
    pub unlabeled: Mutex<Vec<(String, String)>>,
    pub comments: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl IssueTracker for FakeTracker {
    async fn issue(&self, id: &str) -> anyhow::Result<Option<TrackedIssue>> {
        Ok(self
            .issues
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == id)
            .cloned())
    }

    async fn csr_for(&self, id: &str) -> anyhow::Result<Option<TrackedIssue>> {
        self.issue(&format!("csr-{id}")).await
    }

    async fn jep(&self, number: &str) -> anyhow::Result<Option<TrackedIssue>> {
        self.issue(number).await
    }

    async fn issues_updated_since(
        &self,
        since: DateTime<Utc>,
        issue_type: &str,
    ) -> anyhow::Result<Vec<TrackedIssue>> {
        Ok(self
            .issues
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.issue_type == issue_type && i.updated_at >= since)
            .cloned()
            .collect())
    }

    async fn add_label(&self, id: &str, label: &str) -> anyhow::Result<()> {
        self.labeled
            .lock()
            .unwrap()
            .push((id.to_string(), label.to_string()));
        Ok(())
    }

    async fn remove_label(&self, id: &str, label: &str) -> anyhow::Result<()> {
        self.unlabeled
            .lock()
            .unwrap()
            .push((id.to_string(), label.to_string()));
        Ok(())
    }

    async fn add_comment(&self, id: &str, body: &str) -> anyhow::Result<()> {
        self.comments
            .lock()
            .unwrap()
            .push((id.to_string(), body.to_string()));
        Ok(())
    }
}

pub struct TestSetup {
    pub forge: Arc<MockForge>,
    pub repos: FakeRepoPool,
    pub checker: Arc<StubChecker>,
    pub ctx: Arc<BotContext>,
}

pub fn minimal_config() -> BotConfig {
    BotConfig::from_toml(
        r#"
        [repository]
        owner = "openjdk"
        name = "jdk"
        "#,
    )
    .unwrap()
}

/// Wire up a context around a mock forge with passing defaults.
pub fn setup_with(config: BotConfig, checker: StubChecker) -> TestSetup {
    setup_full(config, checker, None)
}

pub fn setup_full(
    config: BotConfig,
    checker: StubChecker,
    tracker: Option<Arc<FakeTracker>>,
) -> TestSetup {
    let forge = Arc::new(MockForge::new(bot_user()));
    let repos = FakeRepoPool::new();
    let checker = Arc::new(checker);
    let ctx = Arc::new(BotContext {
        config,
        forge: forge.clone(),
        census: Arc::new(default_census()),
        tracker: tracker.map(|t| t as Arc<dyn IssueTracker>),
        repos: Arc::new(repos.clone()),
        checker: checker.clone(),
        registry: Arc::new(CommandRegistry::standard()),
        integration_locks: IntegrationLocks::new(),
        state: BotState::default(),
    });
    TestSetup {
        forge,
        repos,
        checker,
        ctx,
    }
}

pub fn setup() -> TestSetup {
    setup_with(minimal_config(), StubChecker::passing())
}

/// An open pull request with a well-formed title.
pub fn open_pr(number: u64, author: &User) -> PullRequest {
    PullRequest {
        number,
        title: "8123456: Fix the frobnicator".to_string(),
        body: "A description of the change".to_string(),
        author: author.clone(),
        state: forge_client::PullRequestState::Open,
        draft: false,
        head_hash: "0123abcd".to_string(),
        target_ref: "master".to_string(),
        source_ref: "fix".to_string(),
        labels: Vec::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}
