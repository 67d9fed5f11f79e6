//! Local repository materialization
//!
//! Integration needs an actual clone: merging with the latest target,
//! squashing to the final commit and pushing all happen locally. The
//! bot treats version control as an external collaborator behind two
//! narrow traits; the shipped implementation shells out to the `git`
//! binary. Policy logic never sees a working tree, only the results.

use anyhow::{bail, Context};
use async_trait::async_trait;
use forge_client::{CommitInfo, PullRequest};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Result of bringing a change up to date with its target branch.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// The change now sits on top of the latest target
    Merged { hash: String },

    /// The change conflicts with the target; the message describes
    /// the conflicting paths
    Conflict { message: String },
}

/// A materialized clone of one pull request, checked out at its head.
pub trait LocalRepository: Send + Sync {
    /// Current hash of the target branch in this clone
    fn target_hash(&self) -> anyhow::Result<String>;

    /// Whether `ancestor` is reachable from `descendant`
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> anyhow::Result<bool>;

    /// Merge the latest target into the checked out change
    fn merge_target(&self, committer_name: &str, committer_email: &str)
        -> anyhow::Result<MergeOutcome>;

    /// Squash everything since the merge base into one commit with the
    /// given message, author and committer. Returns the new hash.
    fn squash(
        &self,
        message: &str,
        author: (&str, &str),
        committer: (&str, &str),
    ) -> anyhow::Result<String>;

    /// Commits the change adds on top of the target, newest first
    fn commits_since_target(&self) -> anyhow::Result<Vec<CommitInfo>>;

    /// Paths touched by the change relative to the merge base
    fn changed_files(&self) -> anyhow::Result<Vec<String>>;

    /// Whether the named branch on the upstream contains the hash
    fn branch_contains(&self, branch: &str, hash: &str) -> anyhow::Result<bool>;

    /// Push `hash` to the given branch on the upstream
    fn push(&self, hash: &str, target_ref: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait RepositoryPool: Send + Sync {
    /// Materialize a clone for the pull request, fetching its head and
    /// target branch. Clones are cached per pull request under the
    /// scratch directory.
    async fn materialize(&self, pr: &PullRequest) -> anyhow::Result<Box<dyn LocalRepository>>;
}

/// Pool of clones backed by the `git` command line tool.
pub struct GitRepositoryPool {
    remote_url: String,
    scratch_root: PathBuf,
}

impl GitRepositoryPool {
    pub fn new(remote_url: &str, scratch_root: &Path) -> Self {
        Self {
            remote_url: remote_url.to_string(),
            scratch_root: scratch_root.to_path_buf(),
        }
    }
}

#[async_trait]
impl RepositoryPool for GitRepositoryPool {
    async fn materialize(&self, pr: &PullRequest) -> anyhow::Result<Box<dyn LocalRepository>> {
        let dir = self.scratch_root.join(format!("pr-{}", pr.number));
        let repo = GitRepository {
            dir,
            target_ref: pr.target_ref.clone(),
        };
        if !repo.dir.join(".git").exists() {
            std::fs::create_dir_all(&repo.dir)
                .with_context(|| format!("creating scratch dir {}", repo.dir.display()))?;
            git_in(
                &repo.dir,
                &["clone", "--no-checkout", &self.remote_url, "."],
            )?;
        }
        repo.git(&[
            "fetch",
            "--force",
            "origin",
            &format!("+refs/heads/{0}:refs/remotes/origin/{0}", pr.target_ref),
            &format!("+refs/pull/{0}/head:refs/pr/{0}", pr.number),
        ])?;
        repo.git(&["checkout", "--force", "--detach", &pr.head_hash])?;
        Ok(Box::new(repo))
    }
}

struct GitRepository {
    dir: PathBuf,
    target_ref: String,
}

impl GitRepository {
    fn git(&self, args: &[&str]) -> anyhow::Result<String> {
        git_in(&self.dir, args)
    }

    fn target(&self) -> String {
        format!("origin/{}", self.target_ref)
    }
}

fn git_in(dir: &Path, args: &[&str]) -> anyhow::Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("running git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

impl LocalRepository for GitRepository {
    fn target_hash(&self) -> anyhow::Result<String> {
        self.git(&["rev-parse", &self.target()])
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> anyhow::Result<bool> {
        let status = Command::new("git")
            .args(["merge-base", "--is-ancestor", ancestor, descendant])
            .current_dir(&self.dir)
            .status()
            .context("running git merge-base")?;
        Ok(status.success())
    }

    fn merge_target(
        &self,
        committer_name: &str,
        committer_email: &str,
    ) -> anyhow::Result<MergeOutcome> {
        let target = self.target();
        let merge = Command::new("git")
            .args(["merge", "--no-edit", &target])
            .env("GIT_COMMITTER_NAME", committer_name)
            .env("GIT_COMMITTER_EMAIL", committer_email)
            .env("GIT_AUTHOR_NAME", committer_name)
            .env("GIT_AUTHOR_EMAIL", committer_email)
            .current_dir(&self.dir)
            .output()
            .context("running git merge")?;
        if merge.status.success() {
            let hash = self.git(&["rev-parse", "HEAD"])?;
            return Ok(MergeOutcome::Merged { hash });
        }
        let conflicts = self
            .git(&["diff", "--name-only", "--diff-filter=U"])
            .unwrap_or_default();
        self.git(&["merge", "--abort"])?;
        Ok(MergeOutcome::Conflict {
            message: if conflicts.is_empty() {
                String::from_utf8_lossy(&merge.stdout).trim().to_string()
            } else {
                conflicts
            },
        })
    }

    fn squash(
        &self,
        message: &str,
        author: (&str, &str),
        committer: (&str, &str),
    ) -> anyhow::Result<String> {
        let base = self.git(&["merge-base", "HEAD", &self.target()])?;
        self.git(&["reset", "--soft", &base])?;
        let output = Command::new("git")
            .args([
                "commit",
                "--message",
                message,
                "--author",
                &format!("{} <{}>", author.0, author.1),
            ])
            .env("GIT_COMMITTER_NAME", committer.0)
            .env("GIT_COMMITTER_EMAIL", committer.1)
            .current_dir(&self.dir)
            .output()
            .context("running git commit")?;
        if !output.status.success() {
            bail!(
                "git commit failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        self.git(&["rev-parse", "HEAD"])
    }

    fn commits_since_target(&self) -> anyhow::Result<Vec<CommitInfo>> {
        let range = format!("{}..HEAD", self.target());
        let log = self.git(&[
            "log",
            "--format=%H%x1f%an%x1f%ae%x1f%cn%x1f%ce%x1f%P%x1f%B%x1e",
            &range,
        ])?;
        Ok(parse_commit_log(&log))
    }

    fn changed_files(&self) -> anyhow::Result<Vec<String>> {
        let range = format!("{}...HEAD", self.target());
        let diff = self.git(&["diff", "--name-only", &range])?;
        Ok(diff.lines().map(str::to_string).collect())
    }

    fn branch_contains(&self, branch: &str, hash: &str) -> anyhow::Result<bool> {
        self.git(&[
            "fetch",
            "origin",
            &format!("+refs/heads/{0}:refs/remotes/origin/{0}", branch),
        ])?;
        self.is_ancestor(hash, &format!("origin/{branch}"))
    }

    fn push(&self, hash: &str, target_ref: &str) -> anyhow::Result<()> {
        self.git(&["push", "origin", &format!("{hash}:refs/heads/{target_ref}")])?;
        Ok(())
    }
}

/// Parse `git log` output with unit/record separator delimiters.
fn parse_commit_log(log: &str) -> Vec<CommitInfo> {
    log.split('\u{1e}')
        .filter_map(|record| {
            let fields: Vec<&str> = record.trim().split('\u{1f}').collect();
            if fields.len() != 7 {
                return None;
            }
            Some(CommitInfo {
                hash: fields[0].to_string(),
                author_name: fields[1].to_string(),
                author_email: fields[2].to_string(),
                committer_name: fields[3].to_string(),
                committer_email: fields[4].to_string(),
                parents: fields[5].split_whitespace().map(str::to_string).collect(),
                message: fields[6].trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commit_log() {
        let log = "abc\u{1f}An Author\u{1f}a@b.c\u{1f}A Committer\u{1f}c@b.c\u{1f}p1 p2\u{1f}Merge master\n\u{1e}\n\
                   def\u{1f}Other\u{1f}o@b.c\u{1f}Other\u{1f}o@b.c\u{1f}p3\u{1f}9: More\n\nDetails\n\u{1e}";
        let commits = parse_commit_log(log);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].hash, "abc");
        assert_eq!(commits[0].author_email, "a@b.c");
        assert_eq!(commits[0].parents, vec!["p1", "p2"]);
        assert_eq!(commits[0].message, "Merge master");
        assert_eq!(commits[1].parents, vec!["p3"]);
        assert_eq!(commits[1].message, "9: More\n\nDetails");
    }

    #[test]
    fn test_parse_commit_log_empty() {
        assert!(parse_commit_log("").is_empty());
    }
}
