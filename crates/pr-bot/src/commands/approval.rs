//! Gating commands: CSR, JEP and maintainer approval
//!
//! These commands raise or clear gating labels. The labels themselves
//! are listed under `blocking_labels` in the configuration, so the
//! check run reports them as integration blockers until cleared.

use crate::commands::{CommandHandler, CommandInvocation, CommandReply};
use crate::context::BotContext;
use crate::tracker::parse_issue_title;
use async_trait::async_trait;
use forge_client::{Comment, PullRequest};

pub const CSR_LABEL: &str = "csr";
pub const JEP_LABEL: &str = "jep";
pub const APPROVAL_LABEL: &str = "approval";

/// Label mirrored onto the tracked issue while a CSR is required.
pub const CSR_REQUEST_LABEL: &str = "csr-request";

/// `/csr [needed|unneeded]`, Reviewers only.
pub struct CsrCommand;

#[async_trait]
impl CommandHandler for CsrCommand {
    fn name(&self) -> &'static str {
        "csr"
    }

    fn description(&self) -> &'static str {
        "require a compatibility and specification review for this PR"
    }

    async fn handle(
        &self,
        ctx: &BotContext,
        pr: &PullRequest,
        _comments: &[Comment],
        invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        if !ctx.config.enable_csr {
            reply.line("This repository does not have the CSR process enabled.");
            return Ok(());
        }
        if !ctx.census.is_reviewer(&invocation.user).await? {
            reply.line(
                "only [Reviewers](https://openjdk.org/bylaws#reviewer) can determine \
                 whether a CSR is needed.",
            );
            return Ok(());
        }
        let issue_id = parse_issue_title(&pr.title).map(|(id, _)| id);
        match invocation.args.as_str() {
            "" | "needed" => {
                if pr.has_label(CSR_LABEL) {
                    reply.line("A CSR request is already required for this pull request.");
                } else {
                    reply.add_label(CSR_LABEL);
                    if let (Some(tracker), Some(id)) = (&ctx.tracker, issue_id) {
                        tracker.add_label(id, CSR_REQUEST_LABEL).await?;
                    }
                    reply.line(
                        "This pull request will not be integrated until an approved \
                         [CSR](https://wiki.openjdk.org/display/csr/Main) request is present.",
                    );
                }
            }
            "unneeded" => {
                if pr.has_label(CSR_LABEL) {
                    reply.remove_label(CSR_LABEL);
                    if let (Some(tracker), Some(id)) = (&ctx.tracker, issue_id) {
                        tracker.remove_label(id, CSR_REQUEST_LABEL).await?;
                    }
                }
                reply.line(
                    "determined that a CSR request is not needed for this pull request.",
                );
            }
            _ => reply.line("Syntax: `/csr [needed|unneeded]`"),
        }
        Ok(())
    }
}

/// `/jep JEP-<number>` or `/jep unneeded`, author only.
pub struct JepCommand;

#[async_trait]
impl CommandHandler for JepCommand {
    fn name(&self) -> &'static str {
        "jep"
    }

    fn description(&self) -> &'static str {
        "require a targeted JEP for this PR"
    }

    async fn handle(
        &self,
        ctx: &BotContext,
        pr: &PullRequest,
        _comments: &[Comment],
        invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        if !ctx.config.enable_jep {
            reply.line("This repository does not have the JEP process enabled.");
            return Ok(());
        }
        if invocation.user.username != pr.author.username {
            reply.line("only the author of the pull request can set its JEP.");
            return Ok(());
        }
        if invocation.args == "unneeded" {
            if pr.has_label(JEP_LABEL) {
                reply.remove_label(JEP_LABEL);
            }
            reply.line("determined that a JEP request is not needed for this pull request.");
            return Ok(());
        }
        let number = invocation
            .args
            .strip_prefix("JEP-")
            .unwrap_or(&invocation.args);
        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
            reply.line("Syntax: `/jep JEP-<number>` or `/jep unneeded`");
            return Ok(());
        }
        let Some(tracker) = &ctx.tracker else {
            reply.line("The JEP status cannot be verified: no issue tracker is configured.");
            return Ok(());
        };
        match tracker.jep(number).await? {
            Some(jep) if jep.approved => {
                if pr.has_label(JEP_LABEL) {
                    reply.remove_label(JEP_LABEL);
                }
                reply.line(&format!(
                    "JEP {} (`{}`) is already targeted, no additional approval is needed.",
                    number, jep.title
                ));
            }
            Some(jep) => {
                reply.add_label(JEP_LABEL);
                reply.line(&format!(
                    "This pull request will not be integrated until JEP {} (`{}`) has been targeted.",
                    number, jep.title
                ));
            }
            None => reply.line(&format!(
                "JEP {number} was not found in the issue tracker - make sure you have entered it correctly."
            )),
        }
        Ok(())
    }
}

/// `/approve (yes|no)` for branches where a maintainer must sign off
/// on every change. Restricted to the configured integrators, or to
/// Reviewers when none are configured.
pub struct ApproveCommand;

#[async_trait]
impl CommandHandler for ApproveCommand {
    fn name(&self) -> &'static str {
        "approve"
    }

    fn description(&self) -> &'static str {
        "approve a change for integration to a maintained branch"
    }

    async fn handle(
        &self,
        ctx: &BotContext,
        pr: &PullRequest,
        _comments: &[Comment],
        invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        let allowed = if ctx.config.integrators.is_empty() {
            ctx.census.is_reviewer(&invocation.user).await?
        } else {
            ctx.config
                .integrators
                .iter()
                .any(|i| i == &invocation.user.username)
        };
        if !allowed {
            reply.line("you are not allowed to approve changes in this repository.");
            return Ok(());
        }
        match invocation.args.as_str() {
            "" | "yes" => {
                if !pr.has_label(APPROVAL_LABEL) {
                    reply.add_label(APPROVAL_LABEL);
                }
                reply.line(&format!(
                    "@{} this change has been approved for integration.",
                    pr.author.username
                ));
            }
            "no" => {
                if pr.has_label(APPROVAL_LABEL) {
                    reply.remove_label(APPROVAL_LABEL);
                }
                reply.line(&format!(
                    "@{} this change has not been approved for integration.",
                    pr.author.username
                ));
            }
            _ => reply.line("Syntax: `/approve [yes|no]`"),
        }
        Ok(())
    }
}
