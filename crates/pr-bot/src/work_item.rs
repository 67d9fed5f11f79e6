//! Work items
//!
//! A work item is one bounded unit of bot work. Items never recurse:
//! running an item returns the successors it wants scheduled, and the
//! scheduler decides when they run. Two items may run in parallel
//! unless they touch the same target (the same pull request, or the
//! repository as a whole for repo-wide items).

use crate::check;
use crate::commands::{extract_commands, CommandInvocation, CommandReply};
use crate::context::BotContext;
use crate::fingerprint;
use crate::trackers;
use async_trait::async_trait;
use chrono::Utc;
use forge_client::{Comment, PullRequest, PullRequestState};
use log::{debug, info, warn};
use std::sync::Arc;

/// What an item operates on; equal targets must not run concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    PullRequest(u64),
    Repository,
}

#[async_trait]
pub trait WorkItem: Send + Sync {
    fn target(&self) -> Target;

    /// Short description used in log lines
    fn describe(&self) -> String;

    /// Symmetric concurrency predicate
    fn concurrent_with(&self, other: &dyn WorkItem) -> bool {
        self.target() != other.target()
    }

    /// Run the item, returning successors to schedule
    async fn run(&self, ctx: &Arc<BotContext>) -> anyhow::Result<Vec<Box<dyn WorkItem>>>;
}

/// Evaluates the policy check for one pull request.
pub struct CheckWorkItem {
    pub number: u64,
    /// Ignore the stored fingerprint and evaluate unconditionally
    pub force: bool,
}

#[async_trait]
impl WorkItem for CheckWorkItem {
    fn target(&self) -> Target {
        Target::PullRequest(self.number)
    }

    fn describe(&self) -> String {
        format!("check #{}", self.number)
    }

    async fn run(&self, ctx: &Arc<BotContext>) -> anyhow::Result<Vec<Box<dyn WorkItem>>> {
        let pr = ctx.forge.pull_request(self.number).await?;
        if pr.state != PullRequestState::Open {
            return Ok(Vec::new());
        }
        let comments = ctx.forge.comments(self.number).await?;
        let reviews = ctx.forge.reviews(self.number).await?;

        let stored = ctx
            .forge
            .check_run(&pr.head_hash, &ctx.config.check_name)
            .await?
            .and_then(|c| c.metadata);
        let fresh = check::metadata(ctx, &pr, &comments, &reviews, None).await?;
        let unchanged = stored
            .as_deref()
            .is_some_and(|s| fingerprint::is_current(s, &fresh, Utc::now()));
        if unchanged && !self.force {
            debug!("{}: fingerprint match, skipping evaluation", self.describe());
        } else {
            let outcome = check::execute(ctx, &pr, &comments, &reviews).await?;
            info!("{}: evaluated, ready={}", self.describe(), outcome.ready);
        }

        // Commands are always dispatched after a check pass; a new
        // command comment does not change the fingerprint
        Ok(vec![Box::new(CommandWorkItem { number: self.number })])
    }
}

/// Dispatches the first unhandled command on a pull request.
pub struct CommandWorkItem {
    pub number: u64,
}

fn pending_invocations(
    ctx: &BotContext,
    pr: &PullRequest,
    comments: &[Comment],
) -> Vec<(CommandInvocation, bool)> {
    let bot = ctx.bot_user();
    let mut invocations: Vec<(CommandInvocation, bool)> = Vec::new();

    // The body may carry commands too, issued by the author
    let body_id = format!("body-{}", pr.number);
    for invocation in extract_commands(
        &ctx.registry,
        &pr.body,
        &body_id,
        &pr.author,
        pr.created_at,
    ) {
        invocations.push((invocation, true));
    }

    for comment in comments {
        if comment.author.username == bot.username && !trackers::is_valid_self_command(comment) {
            continue;
        }
        for invocation in extract_commands(
            &ctx.registry,
            &comment.body,
            &comment.id,
            &comment.author,
            comment.created_at,
        ) {
            invocations.push((invocation, false));
        }
    }
    invocations
}

#[async_trait]
impl WorkItem for CommandWorkItem {
    fn target(&self) -> Target {
        Target::PullRequest(self.number)
    }

    fn describe(&self) -> String {
        format!("command #{}", self.number)
    }

    async fn run(&self, ctx: &Arc<BotContext>) -> anyhow::Result<Vec<Box<dyn WorkItem>>> {
        let pr = ctx.forge.pull_request(self.number).await?;
        let comments = ctx.forge.comments(self.number).await?;
        let bot = ctx.bot_user();
        let replied = trackers::replied_command_ids(&comments, &bot);

        let next = pending_invocations(ctx, &pr, &comments)
            .into_iter()
            .filter(|(invocation, _)| !replied.contains(&invocation.id))
            .find(|(invocation, _)| {
                // External commands belong to other bots entirely
                !ctx.config.external_pr_commands.contains_key(&invocation.name)
            });

        let Some((invocation, from_body)) = next else {
            // Nothing to dispatch; give the auto labeler a chance once
            if pr.state == PullRequestState::Open
                && !ctx.config.label_rules.is_empty()
                && trackers::find_marked_comment(&comments, &bot, trackers::INITIAL_LABEL_MARKER)
                    .is_none()
            {
                return Ok(vec![Box::new(LabelerWorkItem { number: self.number })]);
            }
            return Ok(Vec::new());
        };

        info!(
            "{}: dispatching /{} from @{} ({})",
            self.describe(),
            invocation.name,
            invocation.user.username,
            invocation.id
        );

        let mut reply = CommandReply::new(&invocation.user);
        match ctx.registry.get(&invocation.name) {
            None => reply.line(&format!(
                "Unknown command `{}` - for a list of valid commands use `/help`.",
                invocation.name
            )),
            Some(handler) if !handler.allowed_in_pull_request() => reply.line(&format!(
                "The `/{}` command can not be used in pull requests.",
                invocation.name
            )),
            Some(handler) if from_body && !handler.allowed_in_body() => reply.line(&format!(
                "The `/{}` command can not be used in the pull request body. \
                 Please use it in a new comment.",
                invocation.name
            )),
            Some(handler) => {
                handler
                    .handle(ctx, &pr, &comments, &invocation, &mut reply)
                    .await?
            }
        }

        // Reply first: the reply marker is what makes dispatch
        // idempotent. Label changes follow; losing them to a crash is
        // recoverable, running a command twice is not.
        ctx.forge
            .add_comment(
                self.number,
                &format!("{}\n{}", trackers::reply_marker(&invocation.id), reply.text()),
            )
            .await?;
        for label in &reply.labels_to_add {
            if !pr.has_label(label) {
                ctx.forge.add_label(self.number, label).await?;
            }
        }
        for label in &reply.labels_to_remove {
            if pr.has_label(label) {
                ctx.forge.remove_label(self.number, label).await?;
            }
        }

        if reply.integrated {
            return Ok(Vec::new());
        }
        Ok(vec![Box::new(CheckWorkItem {
            number: self.number,
            force: reply.force_check,
        })])
    }
}

/// Applies the configured path-based labels, once per pull request.
pub struct LabelerWorkItem {
    pub number: u64,
}

#[async_trait]
impl WorkItem for LabelerWorkItem {
    fn target(&self) -> Target {
        Target::PullRequest(self.number)
    }

    fn describe(&self) -> String {
        format!("labeler #{}", self.number)
    }

    async fn run(&self, ctx: &Arc<BotContext>) -> anyhow::Result<Vec<Box<dyn WorkItem>>> {
        let pr = ctx.forge.pull_request(self.number).await?;
        if pr.state != PullRequestState::Open {
            return Ok(Vec::new());
        }
        let comments = ctx.forge.comments(self.number).await?;
        let bot = ctx.bot_user();
        if trackers::find_marked_comment(&comments, &bot, trackers::INITIAL_LABEL_MARKER).is_some() {
            return Ok(Vec::new());
        }

        let repo = ctx.repos.materialize(&pr).await?;
        let files = repo.changed_files()?;
        let decisions = trackers::label_decisions(&comments, &bot);
        let mut applied = Vec::new();
        for rule in &ctx.config.label_rules {
            if pr.has_label(&rule.label) || decisions.removed.contains(&rule.label) {
                continue;
            }
            if files
                .iter()
                .any(|f| rule.paths.iter().any(|p| f.starts_with(p.as_str())))
            {
                ctx.forge.add_label(self.number, &rule.label).await?;
                applied.push(rule.label.clone());
            }
        }

        let text = if applied.is_empty() {
            format!(
                "{}\nNo classification labels matched the changed paths.",
                trackers::INITIAL_LABEL_MARKER
            )
        } else {
            format!(
                "{}\nThe following labels will be automatically applied to this pull request:\n\n\
                 `{}`\n\nApplied labels can be changed with the `/label` command.",
                trackers::INITIAL_LABEL_MARKER,
                applied.join("`, `")
            )
        };
        ctx.forge.add_comment(self.number, &text).await?;

        if applied.is_empty() {
            return Ok(Vec::new());
        }
        // Labels changed, so the fingerprint changed too
        Ok(vec![Box::new(CheckWorkItem {
            number: self.number,
            force: false,
        })])
    }
}

/// Scans comments made directly on commits for commands. Repo-wide;
/// only one instance runs at a time.
pub struct CommitCommentsWorkItem;

#[async_trait]
impl WorkItem for CommitCommentsWorkItem {
    fn target(&self) -> Target {
        Target::Repository
    }

    fn describe(&self) -> String {
        "commit comments".to_string()
    }

    async fn run(&self, ctx: &Arc<BotContext>) -> anyhow::Result<Vec<Box<dyn WorkItem>>> {
        let bot = ctx.bot_user();
        let all = ctx.forge.commit_comments().await?;

        for (hash, comment) in &all {
            if comment.author.username == bot.username && !trackers::is_valid_self_command(comment)
            {
                continue;
            }
            let siblings: Vec<Comment> = all
                .iter()
                .filter(|(h, _)| h == hash)
                .map(|(_, c)| c.clone())
                .collect();
            let replied = trackers::replied_command_ids(&siblings, &bot);

            for invocation in extract_commands(
                &ctx.registry,
                &comment.body,
                &comment.id,
                &comment.author,
                comment.created_at,
            ) {
                if replied.contains(&invocation.id)
                    || ctx
                        .config
                        .external_commit_commands
                        .contains_key(&invocation.name)
                {
                    continue;
                }
                info!(
                    "commit {}: dispatching /{} from @{}",
                    hash, invocation.name, invocation.user.username
                );
                let mut reply = CommandReply::new(&invocation.user);
                match ctx.registry.get(&invocation.name) {
                    None => reply.line(&format!(
                        "Unknown command `{}` - for a list of valid commands use `/help`.",
                        invocation.name
                    )),
                    Some(handler) if !handler.allowed_in_commit() => reply.line(&format!(
                        "The `/{}` command can only be used in pull requests.",
                        invocation.name
                    )),
                    Some(handler) => {
                        handler
                            .handle_commit(ctx, hash, &invocation, &mut reply)
                            .await?
                    }
                }
                ctx.forge
                    .add_commit_comment(
                        hash,
                        &format!(
                            "{}\n{}",
                            trackers::reply_marker(&invocation.id),
                            reply.text()
                        ),
                    )
                    .await?;
            }
        }
        Ok(Vec::new())
    }
}

/// Polls the issue tracker for gating issues (CSRs) that changed, and
/// re-checks the pull requests they affect.
pub struct IssuePollWorkItem;

#[async_trait]
impl WorkItem for IssuePollWorkItem {
    fn target(&self) -> Target {
        Target::Repository
    }

    fn describe(&self) -> String {
        "issue poll".to_string()
    }

    async fn run(&self, ctx: &Arc<BotContext>) -> anyhow::Result<Vec<Box<dyn WorkItem>>> {
        let Some(tracker) = &ctx.tracker else {
            return Ok(Vec::new());
        };
        let now = Utc::now();
        let since = {
            let watermark = ctx
                .state
                .issue_poll_watermark
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match *watermark {
                Some(at) => at,
                None => now,
            }
        };

        let updated = tracker.issues_updated_since(since, "csr").await?;
        let mut successors: Vec<Box<dyn WorkItem>> = Vec::new();
        if !updated.is_empty() {
            let bot = ctx.bot_user();
            for pr in ctx.forge.list_pull_requests().await? {
                if pr.state != PullRequestState::Open {
                    continue;
                }
                let mut ids: Vec<String> = Vec::new();
                if let Some((id, _)) = crate::tracker::parse_issue_title(&pr.title) {
                    ids.push(id.to_string());
                }
                let comments = ctx.forge.comments(pr.number).await?;
                ids.extend(
                    trackers::solved_issues(&comments, &bot)
                        .into_iter()
                        .map(|(id, _)| id),
                );
                let affected = updated.iter().any(|issue| ids.iter().any(|i| *i == issue.id));
                if affected {
                    info!("issue poll: re-checking #{}", pr.number);
                    ctx.state.schedule_recheck(pr.number);
                    successors.push(Box::new(CheckWorkItem {
                        number: pr.number,
                        force: true,
                    }));
                }
            }
        }

        if let Ok(mut watermark) = ctx.state.issue_poll_watermark.lock() {
            *watermark = Some(now);
        } else {
            warn!("issue poll watermark lock poisoned");
        }
        Ok(successors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_predicate() {
        let check = CheckWorkItem {
            number: 1,
            force: false,
        };
        let command_same = CommandWorkItem { number: 1 };
        let command_other = CommandWorkItem { number: 2 };
        let commits = CommitCommentsWorkItem;
        let poll = IssuePollWorkItem;

        assert!(!check.concurrent_with(&command_same));
        assert!(check.concurrent_with(&command_other));
        // Repo-wide items exclude each other but not per-PR items
        assert!(!commits.concurrent_with(&poll));
        assert!(commits.concurrent_with(&check));
    }
}
