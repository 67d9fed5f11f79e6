//! Forge API client
//!
//! This crate defines the narrow interface the bot consumes from the
//! code-review host: listing and mutating pull requests, comments,
//! reviews, labels and check runs. The `ForgeClient` trait has two
//! implementations: `OctocrabForge` backed by the GitHub API, and
//! `MockForge`, an in-memory forge used by the bot's tests.

pub mod client;
pub mod mock;
pub mod octocrab_client;
pub mod types;

pub use client::ForgeClient;
pub use mock::MockForge;
pub use octocrab_client::OctocrabForge;
pub use types::{
    CheckConclusion, CheckRunInfo, CheckRunStatus, CheckRunUpdate, Comment, CommitInfo,
    FileAnnotation, PullRequest, PullRequestState, Review, ReviewVerdict, User,
};

// Re-export octocrab for consumers that need to construct the client
pub use octocrab;
