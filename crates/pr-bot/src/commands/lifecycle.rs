//! Lifecycle commands: `/open`, `/touch`, `/clean`, `/backport`,
//! `/tag` and `/branch`

use crate::check::{BACKPORT_LABEL, CLEAN_LABEL, INTEGRATED_LABEL};
use crate::commands::{require_author, require_committer, CommandHandler, CommandInvocation, CommandReply};
use crate::context::BotContext;
use async_trait::async_trait;
use forge_client::{Comment, PullRequest, PullRequestState};
use regex::Regex;

/// `/open` reopens a closed, not yet integrated pull request.
pub struct OpenCommand;

#[async_trait]
impl CommandHandler for OpenCommand {
    fn name(&self) -> &'static str {
        "open"
    }

    fn description(&self) -> &'static str {
        "reopens a closed pull request"
    }

    async fn handle(
        &self,
        ctx: &BotContext,
        pr: &PullRequest,
        _comments: &[Comment],
        invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        if !require_author(pr, invocation, reply) {
            return Ok(());
        }
        if pr.state == PullRequestState::Open {
            reply.line("This pull request is already open.");
            return Ok(());
        }
        if pr.has_label(INTEGRATED_LABEL) {
            reply.line("This pull request has already been integrated and cannot be reopened.");
            return Ok(());
        }
        ctx.forge.set_state(pr.number, PullRequestState::Open).await?;
        reply.line("This pull request is now open.");
        reply.force_check = true;
        Ok(())
    }
}

/// `/touch` (alias `/keepalive`) re-runs the checks without any other
/// change, e.g. after an external gating condition has been resolved.
pub struct TouchCommand;

#[async_trait]
impl CommandHandler for TouchCommand {
    fn name(&self) -> &'static str {
        "touch"
    }

    fn description(&self) -> &'static str {
        "re-evaluates the pull request"
    }

    async fn handle(
        &self,
        ctx: &BotContext,
        pr: &PullRequest,
        _comments: &[Comment],
        invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        let is_author = invocation.user.username == pr.author.username;
        if !is_author && !ctx.census.is_committer(&invocation.user).await? {
            reply.line("only the author and Committers can re-evaluate this pull request.");
            return Ok(());
        }
        if pr.state != PullRequestState::Open {
            reply.line("Closed pull requests cannot be re-evaluated.");
            return Ok(());
        }
        reply.line("The pull request is being re-evaluated and the checks will be run again.");
        reply.force_check = true;
        Ok(())
    }
}

/// `/clean` marks a backport pull request as a faithful copy of the
/// original change, which lets it keep the original review coverage.
pub struct CleanCommand;

#[async_trait]
impl CommandHandler for CleanCommand {
    fn name(&self) -> &'static str {
        "clean"
    }

    fn description(&self) -> &'static str {
        "marks a backport pull request as a clean copy"
    }

    async fn handle(
        &self,
        ctx: &BotContext,
        pr: &PullRequest,
        _comments: &[Comment],
        invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        if !require_committer(ctx, invocation, reply).await? {
            return Ok(());
        }
        if !pr.has_label(BACKPORT_LABEL) {
            reply.line("The `/clean` command can only be used on backport pull requests.");
            return Ok(());
        }
        if pr.has_label(CLEAN_LABEL) {
            reply.line("This backport pull request is already marked as clean.");
            return Ok(());
        }
        reply.add_label(CLEAN_LABEL);
        reply.line("This backport pull request is now marked as clean.");
        reply.force_check = true;
        Ok(())
    }
}

/// `/backport <branch>` on an integrated commit opens a backport pull
/// request against the given branch, using the configured writeable
/// fork as staging area.
pub struct BackportCommand;

#[async_trait]
impl CommandHandler for BackportCommand {
    fn name(&self) -> &'static str {
        "backport"
    }

    fn description(&self) -> &'static str {
        "creates a backport pull request for an integrated commit"
    }

    fn allowed_in_pull_request(&self) -> bool {
        false
    }

    fn allowed_in_commit(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        _ctx: &BotContext,
        _pr: &PullRequest,
        _comments: &[Comment],
        _invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        reply.line("The `/backport` command can only be used in commit comments.");
        Ok(())
    }

    async fn handle_commit(
        &self,
        ctx: &BotContext,
        hash: &str,
        invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        if !require_committer(ctx, invocation, reply).await? {
            return Ok(());
        }
        let branch = invocation.args.trim().trim_start_matches(':');
        if branch.is_empty() {
            reply.line("Syntax: `/backport <branch>`");
            return Ok(());
        }
        let allowed = Regex::new(&ctx.config.allowed_target_branches)?;
        if !allowed.is_match(branch) {
            reply.line(&format!(
                "The branch `{branch}` is not a valid target for backports."
            ));
            return Ok(());
        }
        let Some(fork) = ctx.config.forks.get(&ctx.repository()) else {
            reply.line("No writeable fork is configured; backports cannot be created here.");
            return Ok(());
        };
        let Some(commit) = ctx.forge.commit(hash).await? else {
            reply.line(&format!("The commit `{hash}` is not known to this repository."));
            return Ok(());
        };
        let short = &hash[..hash.len().min(8)];
        let source_ref = format!("backport-{}-{}", invocation.user.username, short);
        let title = match commit.message.lines().next() {
            Some(first) => format!("Backport: {first}"),
            None => format!("Backport {short}"),
        };
        let body = format!(
            "This backport pull request was created from commit {hash} on behalf of @{}.",
            invocation.user.username
        );
        let backport = ctx
            .forge
            .create_pull_request(fork, &source_ref, branch, &title, &body)
            .await?;
        reply.line(&format!(
            "A backport pull request targeting `{}` has been created: #{}.",
            branch, backport.number
        ));
        Ok(())
    }
}

/// `/tag <name>` on an integrated commit creates a tag pointing at it.
pub struct TagCommand;

#[async_trait]
impl CommandHandler for TagCommand {
    fn name(&self) -> &'static str {
        "tag"
    }

    fn description(&self) -> &'static str {
        "creates a tag for an integrated commit"
    }

    fn allowed_in_pull_request(&self) -> bool {
        false
    }

    fn allowed_in_commit(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        _ctx: &BotContext,
        _pr: &PullRequest,
        _comments: &[Comment],
        _invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        reply.line("The `/tag` command can only be used in commit comments.");
        Ok(())
    }

    async fn handle_commit(
        &self,
        ctx: &BotContext,
        hash: &str,
        invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        if !require_committer(ctx, invocation, reply).await? {
            return Ok(());
        }
        let name = invocation.args.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            reply.line("Syntax: `/tag <name>`");
            return Ok(());
        }
        if ctx.forge.commit(hash).await?.is_none() {
            reply.line(&format!("The commit `{hash}` is not known to this repository."));
            return Ok(());
        }
        ctx.forge
            .create_ref(&format!("refs/tags/{name}"), hash)
            .await?;
        reply.line(&format!(
            "The tag `{name}` was successfully created, pointing at commit {hash}."
        ));
        Ok(())
    }
}

/// `/branch <name>` on an integrated commit creates a branch starting
/// from it.
pub struct BranchCommand;

#[async_trait]
impl CommandHandler for BranchCommand {
    fn name(&self) -> &'static str {
        "branch"
    }

    fn description(&self) -> &'static str {
        "creates a branch starting from an integrated commit"
    }

    fn allowed_in_pull_request(&self) -> bool {
        false
    }

    fn allowed_in_commit(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        _ctx: &BotContext,
        _pr: &PullRequest,
        _comments: &[Comment],
        _invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        reply.line("The `/branch` command can only be used in commit comments.");
        Ok(())
    }

    async fn handle_commit(
        &self,
        ctx: &BotContext,
        hash: &str,
        invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        if !require_committer(ctx, invocation, reply).await? {
            return Ok(());
        }
        let name = invocation.args.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            reply.line("Syntax: `/branch <name>`");
            return Ok(());
        }
        if ctx.forge.commit(hash).await?.is_none() {
            reply.line(&format!("The commit `{hash}` is not known to this repository."));
            return Ok(());
        }
        ctx.forge
            .create_ref(&format!("refs/heads/{name}"), hash)
            .await?;
        reply.line(&format!(
            "The branch `{name}` was successfully created, starting from commit {hash}."
        ));
        Ok(())
    }
}
