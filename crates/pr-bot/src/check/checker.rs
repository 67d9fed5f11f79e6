//! Policy checker seam
//!
//! The checker examines the actual change in a materialized clone and
//! reports a closed set of issues. Severities are fixed per issue
//! kind, so the distinction between "blocks integration" and "worth a
//! note" cannot drift between call sites.

use crate::repo::LocalRepository;
use crate::tracker::parse_issue_title;
use forge_client::{CommitInfo, FileAnnotation, PullRequest};
use thiserror::Error;

/// A checker failure. A broken policy configuration is reported to
/// the pull request; anything else is an infrastructure error.
#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("policy configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Blocks integration
    Error,
    /// Reported but does not block
    Warning,
}

/// Everything the policy evaluation can find wrong with a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckIssue {
    /// Another open pull request solves the same issue
    DuplicateIssue { id: String, other: u64 },

    /// The author has approved their own change
    SelfReview,

    /// Not enough qualified approvals
    TooFewReviewers { required: usize, found: usize, role: String },

    /// Trailing whitespace or tabs where forbidden
    Whitespace { path: String, line: u32 },

    /// The title does not reference an issue
    MissingIssueReference,

    /// A file has the executable bit set
    ExecutableFile { path: String },

    /// A binary file was added
    BinaryFile { path: String },

    /// A symbolic link was added
    SymlinkFile { path: String },

    /// The title promises a merge but the change is not shaped like one
    MergeCommitShape { message: String },

    /// The non-merge commits in the change have differing authors
    InconsistentAuthors { authors: Vec<String> },

    /// A copyright header is malformed or outdated
    CopyrightFormat { path: String },

    /// A commit message does not follow the required format
    CommitMessageFormat { message: String },
}

impl CheckIssue {
    pub fn severity(&self) -> Severity {
        match self {
            CheckIssue::CopyrightFormat { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn message(&self) -> String {
        match self {
            CheckIssue::DuplicateIssue { id, other } => format!(
                "Issue {id} is already solved by open pull request #{other}"
            ),
            CheckIssue::SelfReview => {
                "The author of a change may not review it themselves".to_string()
            }
            CheckIssue::TooFewReviewers {
                required,
                found,
                role,
            } => format!(
                "Too few reviewers with at least role `{role}` found (have {found}, need at least {required})"
            ),
            CheckIssue::Whitespace { path, line } => {
                format!("Whitespace error in {path} on line {line}")
            }
            CheckIssue::MissingIssueReference => {
                "The pull request title must start with an issue id (`<id>: <description>`)"
                    .to_string()
            }
            CheckIssue::ExecutableFile { path } => {
                format!("Executable files are not allowed ({path})")
            }
            CheckIssue::BinaryFile { path } => format!("Binary files are not allowed ({path})"),
            CheckIssue::SymlinkFile { path } => {
                format!("Symbolic links are not allowed ({path})")
            }
            CheckIssue::MergeCommitShape { message } => format!(
                "The title says this is a merge, but the change is not: {message}"
            ),
            CheckIssue::InconsistentAuthors { authors } => format!(
                "All commits in a pull request must have the same author (found {})",
                authors.join(", ")
            ),
            CheckIssue::CopyrightFormat { path } => {
                format!("Copyright header in {path} is not in the required format")
            }
            CheckIssue::CommitMessageFormat { message } => {
                format!("Commit message is not in the required format: {message}")
            }
        }
    }

    /// Annotation shown inline in the diff, when the issue points at a
    /// file location.
    pub fn annotation(&self) -> Option<FileAnnotation> {
        match self {
            CheckIssue::Whitespace { path, line } => Some(FileAnnotation {
                path: path.clone(),
                line: *line,
                message: self.message(),
            }),
            CheckIssue::CopyrightFormat { path } => Some(FileAnnotation {
                path: path.clone(),
                line: 1,
                message: self.message(),
            }),
            _ => None,
        }
    }
}

/// Runs the repository's policy rules against a materialized change.
pub trait PolicyChecker: Send + Sync {
    fn check(
        &self,
        repo: &dyn LocalRepository,
        pr: &PullRequest,
    ) -> Result<Vec<CheckIssue>, CheckerError>;
}

/// Built-in checker covering the rules that can be evaluated from
/// commit metadata alone. Repositories with a full rule engine plug
/// it in behind the same trait.
pub struct CommitMetadataChecker;

impl PolicyChecker for CommitMetadataChecker {
    fn check(
        &self,
        repo: &dyn LocalRepository,
        pr: &PullRequest,
    ) -> Result<Vec<CheckIssue>, CheckerError> {
        let mut issues = Vec::new();
        let is_merge_title = pr.title.trim_start().starts_with("Merge ");
        if !is_merge_title && parse_issue_title(&pr.title).is_none() {
            issues.push(CheckIssue::MissingIssueReference);
        }
        let commits = repo.commits_since_target().map_err(CheckerError::Other)?;
        if is_merge_title {
            check_merge_shape(repo, &pr.title, &commits, &mut issues)?;
        }
        let mut authors: Vec<String> = Vec::new();
        for commit in &commits {
            if commit.author_email.is_empty() || !commit.author_email.contains('@') {
                issues.push(CheckIssue::CommitMessageFormat {
                    message: format!("commit {} has no valid author email", commit.hash),
                });
            }
            // Merge commits are authored by whoever performed the merge
            if commit.parents.len() < 2 {
                let author = format!("{} <{}>", commit.author_name, commit.author_email);
                if !authors.contains(&author) {
                    authors.push(author);
                }
            }
        }
        if authors.len() > 1 {
            issues.push(CheckIssue::InconsistentAuthors { authors });
        }
        Ok(issues)
    }
}

/// A "Merge ..." title must come with an actual merge commit on top,
/// and the merged commits must come from the branch the title names
/// (the part after `:` of a `repo:branch` source).
fn check_merge_shape(
    repo: &dyn LocalRepository,
    title: &str,
    commits: &[CommitInfo],
    issues: &mut Vec<CheckIssue>,
) -> Result<(), CheckerError> {
    let source = title
        .trim_start()
        .strip_prefix("Merge ")
        .unwrap_or_default()
        .trim()
        .trim_matches('`');
    let Some(top) = commits.first().filter(|c| c.parents.len() >= 2) else {
        issues.push(CheckIssue::MergeCommitShape {
            message: "the change does not contain a merge commit".to_string(),
        });
        return Ok(());
    };
    let branch = source.rsplit(':').next().unwrap_or(source);
    if branch.is_empty() {
        issues.push(CheckIssue::MergeCommitShape {
            message: "the title does not name the branch being merged".to_string(),
        });
        return Ok(());
    }
    let contained = repo
        .branch_contains(branch, &top.parents[1])
        .map_err(CheckerError::Other)?;
    if !contained {
        issues.push(CheckIssue::MergeCommitShape {
            message: format!("the merged commits are not from `{source}`"),
        });
    }
    Ok(())
}
