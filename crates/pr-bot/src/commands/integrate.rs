//! `/integrate` and `/sponsor`
//!
//! Integration is the only irreversible operation the bot performs.
//! The protocol is built around a pre-push marker comment: the hash
//! about to be pushed is recorded on the forge before the push
//! happens, so a crash at any point can be recovered by checking
//! whether a recorded hash is already an ancestor of the target.

use crate::check::{
    review_coverage, CheckerError, Severity, AUTO_LABEL, DELEGATED_LABEL, INTEGRATED_LABEL,
    READY_LABEL, RFR_LABEL, SPONSOR_LABEL,
};
use crate::commands::{require_committer, CommandHandler, CommandInvocation, CommandReply};
use crate::context::BotContext;
use crate::integration_lock;
use crate::repo::MergeOutcome;
use crate::trackers;
use async_trait::async_trait;
use forge_client::{
    CheckConclusion, CheckRunStatus, Comment, PullRequest, PullRequestState, Review,
    ReviewVerdict, User,
};
use log::{info, warn};

pub struct IntegrateCommand;

#[async_trait]
impl CommandHandler for IntegrateCommand {
    fn name(&self) -> &'static str {
        "integrate"
    }

    fn description(&self) -> &'static str {
        "performs integration of the changes in the PR"
    }

    async fn handle(
        &self,
        ctx: &BotContext,
        pr: &PullRequest,
        _comments: &[Comment],
        invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        if pr.state != PullRequestState::Open {
            reply.line("The change cannot be integrated because the pull request is closed.");
            return Ok(());
        }

        let is_author = invocation.user.username == pr.author.username;
        let is_bot = invocation.user.username == ctx.bot_user().username;

        match invocation.args.as_str() {
            "auto" => {
                if !is_author {
                    reply.line("Only the author can enable automatic integration.");
                } else {
                    reply.add_label(AUTO_LABEL);
                    reply.line(
                        "This pull request will be automatically integrated when it is ready.",
                    );
                }
                return Ok(());
            }
            "manual" => {
                if !is_author {
                    reply.line("Only the author can disable automatic integration.");
                } else {
                    if pr.has_label(AUTO_LABEL) {
                        reply.remove_label(AUTO_LABEL);
                    }
                    reply.line("This pull request will have to be integrated manually.");
                }
                return Ok(());
            }
            verb @ ("delegate" | "defer") => {
                if !is_author {
                    reply.line("Only the author can delegate integration.");
                } else {
                    reply.add_label(DELEGATED_LABEL);
                    if verb == "defer" {
                        reply.line("`/integrate defer` is deprecated, use `/integrate delegate`.");
                    }
                    reply.line(
                        "Integration of this pull request has been delegated and may be \
                         completed by any project Committer.",
                    );
                }
                return Ok(());
            }
            verb @ ("undelegate" | "undefer") => {
                if !is_author {
                    reply.line("Only the author can revoke a delegation.");
                } else {
                    if pr.has_label(DELEGATED_LABEL) {
                        reply.remove_label(DELEGATED_LABEL);
                    }
                    if verb == "undefer" {
                        reply
                            .line("`/integrate undefer` is deprecated, use `/integrate undelegate`.");
                    }
                    reply.line("Integration may now only be completed by the author.");
                }
                return Ok(());
            }
            _ => {}
        }

        // Plain /integrate, optionally with the expected head hash
        let delegated = pr.has_label(DELEGATED_LABEL)
            && ctx.census.is_committer(&invocation.user).await?;
        if !is_author && !is_bot && !delegated {
            reply.line("only the author of the pull request can issue the `integrate` command.");
            return Ok(());
        }

        if !invocation.args.is_empty() && invocation.args != pr.head_hash {
            reply.line(&format!(
                "The head of this pull request is `{}`, not `{}` as expected. \
                 Please inspect the latest changes and issue the command again.",
                pr.head_hash, invocation.args
            ));
            return Ok(());
        }

        if !pr.has_label(READY_LABEL) {
            reply.line(
                "This pull request has not yet been marked as ready for integration; \
                 see the check results for what is still missing.",
            );
            return Ok(());
        }

        // Authors without commit rights request sponsoring instead of
        // pushing themselves
        let author_is_committer = ctx.census.is_committer(&pr.author).await?;
        if is_author && !author_is_committer {
            reply.line(&trackers::sponsor_marker(&pr.head_hash));
            reply.line(&format!(
                "Your change (at version {}) is now ready to be sponsored by a Committer.",
                pr.head_hash
            ));
            reply.add_label(SPONSOR_LABEL);
            return Ok(());
        }

        perform_integration(ctx, pr, &invocation.user, reply).await
    }
}

/// `/sponsor` lets a Committer push a change authored by someone
/// without commit rights, once the author has asked for it.
pub struct SponsorCommand;

#[async_trait]
impl CommandHandler for SponsorCommand {
    fn name(&self) -> &'static str {
        "sponsor"
    }

    fn description(&self) -> &'static str {
        "performs integration of a PR that is authored by a non-committer"
    }

    async fn handle(
        &self,
        ctx: &BotContext,
        pr: &PullRequest,
        comments: &[Comment],
        invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        if pr.state != PullRequestState::Open {
            reply.line("The change cannot be sponsored because the pull request is closed.");
            return Ok(());
        }
        if !require_committer(ctx, invocation, reply).await? {
            return Ok(());
        }
        let requests = trackers::sponsor_requests(comments, &ctx.bot_user());
        if requests.is_empty() {
            reply.line(&format!(
                "The change author (@{}) must issue the `integrate` command before \
                 the change can be sponsored.",
                pr.author.username
            ));
            return Ok(());
        }
        if !requests.iter().any(|h| h == &pr.head_hash) {
            reply.line(
                "The head of this pull request has changed since integration was requested. \
                 The author must issue the `integrate` command again.",
            );
            return Ok(());
        }
        if !pr.has_label(READY_LABEL) {
            reply.line("This pull request is no longer ready for integration.");
            return Ok(());
        }
        perform_integration(ctx, pr, &invocation.user, reply).await
    }
}

/// Build the final commit message from the pull request title and the
/// metadata reconstructed from the comment history.
pub fn commit_message(
    title: &str,
    summary: Option<&str>,
    contributors: &[String],
    reviewed_by: &[String],
) -> String {
    let mut message = title.trim().to_string();
    if let Some(summary) = summary {
        message.push_str("\n\n");
        message.push_str(summary);
    }
    if !contributors.is_empty() {
        message.push('\n');
        for contributor in contributors {
            message.push_str(&format!("\nCo-authored-by: {contributor}"));
        }
    }
    if !reviewed_by.is_empty() {
        message.push_str(&format!("\n\nReviewed-by: {}", reviewed_by.join(", ")));
    }
    message
}

/// Usernames to credit in `Reviewed-by`: everyone with an active
/// approval plus manually credited reviewers, in first-seen order.
fn reviewed_by(
    reviews: &[Review],
    credited: &[String],
    head_hash: &str,
    ignore_stale: bool,
) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for review in reviews {
        if review.verdict != ReviewVerdict::Approved {
            continue;
        }
        if ignore_stale && review.hash != head_hash {
            continue;
        }
        if !names.contains(&review.reviewer.username) {
            names.push(review.reviewer.username.clone());
        }
    }
    for name in credited {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names
}

/// The integration protocol. The caller has verified authorization
/// and readiness against its own snapshot; everything is re-validated
/// on fresh state once the lock is held, and the push happens exactly
/// once.
pub async fn perform_integration(
    ctx: &BotContext,
    pr: &PullRequest,
    integrator: &User,
    reply: &mut CommandReply,
) -> anyhow::Result<()> {
    let repository = ctx.repository();
    let Some(_guard) = ctx
        .integration_locks
        .acquire(&repository, integration_lock::DEFAULT_TIMEOUT)
        .await
    else {
        warn!("{repository}#{}: integration lock timed out", pr.number);
        reply.line(
            "Another integration is currently in progress and did not finish in time. \
             Please issue the command again later.",
        );
        return Ok(());
    };

    // The lock may have been held for a while; the snapshot the caller
    // judged readiness on can be stale by now
    let pr = &ctx.forge.pull_request(pr.number).await?;
    let comments = &ctx.forge.comments(pr.number).await?;
    let reviews = ctx.forge.reviews(pr.number).await?;

    let repo = ctx.repos.materialize(pr).await?;

    // Crash recovery: a previously recorded push may already have
    // landed. If so, finish the bookkeeping instead of pushing again.
    for recorded in trackers::prepush_hashes(comments, &ctx.bot_user()) {
        if repo.is_ancestor(&recorded, &repo.target_hash()?)? {
            info!(
                "{repository}#{}: recorded push {recorded} already integrated, recovering",
                pr.number
            );
            mark_integrated_and_closed(ctx, pr).await?;
            notify_tracker(ctx, pr, &recorded).await?;
            reply.line(&format!("Pushed as commit {recorded}."));
            reply.integrated = true;
            return Ok(());
        }
    }

    if pr.state != PullRequestState::Open || !pr.has_label(READY_LABEL) {
        reply.line("This pull request is no longer ready for integration.");
        return Ok(());
    }

    // The most recent run of the required check must have passed for
    // the current head
    let check = ctx
        .forge
        .check_run(&pr.head_hash, &ctx.config.check_name)
        .await?;
    let check_passed = check.is_some_and(|c| {
        c.status == CheckRunStatus::Completed && c.conclusion == Some(CheckConclusion::Success)
    });
    if !check_passed {
        reply.line(&format!(
            "The required `{}` check has not passed for the current head of this \
             pull request; integration is not possible.",
            ctx.config.check_name
        ));
        return Ok(());
    }

    let merged = match repo.merge_target(&integrator.full_name, &integrator_email(integrator))? {
        MergeOutcome::Merged { hash } => hash,
        MergeOutcome::Conflict { message } => {
            reply.line(
                "The change could not be brought up to date with the target branch \
                 due to a merge conflict:",
            );
            reply.line("```");
            reply.line(&message);
            reply.line("```");
            reply.line("Please merge the latest target branch changes and try again.");
            return Ok(());
        }
    };

    // The full policy check runs again on the rebased result; nothing
    // irreversible happens on the strength of the pre-lock snapshot
    let issues = match ctx.checker.check(repo.as_ref(), pr) {
        Ok(issues) => issues,
        Err(CheckerError::Configuration(message)) => {
            reply.line(&format!(
                "The policy configuration for this repository is broken and \
                 integration is not possible:\n```\n{message}\n```"
            ));
            return Ok(());
        }
        Err(CheckerError::Other(e)) => return Err(e),
    };
    let coverage = review_coverage::evaluate(ctx, pr, comments, &reviews).await?;
    let failed = issues.iter().any(|i| i.severity() == Severity::Error) || !coverage.satisfied;
    if failed {
        reply.line(
            "The change is no longer ready for integration - check the PR body for details.",
        );
        reply.force_check = true;
        return Ok(());
    }

    let commits = repo.commits_since_target()?;
    // An explicit `/author` override beats whatever the commits say
    let (author_name, author_email) = trackers::overriding_author(comments, &ctx.bot_user())
        .and_then(|entry| split_author_entry(&entry))
        .or_else(|| {
            commits
                .last()
                .map(|c| (c.author_name.clone(), c.author_email.clone()))
        })
        .unwrap_or_else(|| (pr.author.full_name.clone(), integrator_email(&pr.author)));

    let message = commit_message(
        &pr.title,
        trackers::summary(comments, &ctx.bot_user()).as_deref(),
        &trackers::contributors(comments, &ctx.bot_user()),
        &reviewed_by(
            &reviews,
            &trackers::credited_reviewers(comments, &ctx.bot_user()),
            &pr.head_hash,
            ctx.config.ignore_stale_reviews,
        ),
    );

    let final_hash = repo.squash(
        &message,
        (&author_name, &author_email),
        (&integrator.full_name, &integrator_email(integrator)),
    )?;
    info!(
        "{repository}#{}: merged {} into {} as {final_hash}",
        pr.number, pr.head_hash, merged
    );

    // Record the push before it happens. If the process dies between
    // here and the close below, the next attempt finds the marker and
    // recovers without pushing twice.
    ctx.forge
        .add_comment(
            pr.number,
            &format!(
                "{}\nGoing to push as commit {final_hash}.",
                trackers::prepush_marker(&final_hash)
            ),
        )
        .await?;

    repo.push(&final_hash, &pr.target_ref)?;
    info!("{repository}#{}: pushed {final_hash} to {}", pr.number, pr.target_ref);

    mark_integrated_and_closed(ctx, pr).await?;
    notify_tracker(ctx, pr, &final_hash).await?;
    reply.line(&format!("Pushed as commit {final_hash}."));
    reply.integrated = true;
    Ok(())
}

/// Leave a note on the resolved issue pointing at the integration
/// commit, when an issue tracker is configured.
async fn notify_tracker(ctx: &BotContext, pr: &PullRequest, hash: &str) -> anyhow::Result<()> {
    let Some(tracker) = &ctx.tracker else {
        return Ok(());
    };
    let Some((id, _)) = crate::tracker::parse_issue_title(&pr.title) else {
        return Ok(());
    };
    tracker
        .add_comment(
            id,
            &format!(
                "Changeset: {hash} integrated via {}#{}.",
                ctx.repository(),
                pr.number
            ),
        )
        .await
}

fn integrator_email(user: &User) -> String {
    format!("{}@users.noreply.invalid", user.username)
}

/// Split a `Full Name <email>` entry into its name and email parts
fn split_author_entry(entry: &str) -> Option<(String, String)> {
    let (name, rest) = entry.split_once('<')?;
    let email = rest.trim_end().trim_end_matches('>');
    Some((name.trim().to_string(), email.to_string()))
}

/// Fixed ordering: the `integrated` label goes on first so an
/// interrupted run is still recognizable as integrated, then the PR
/// is closed, then the workflow labels come off.
async fn mark_integrated_and_closed(ctx: &BotContext, pr: &PullRequest) -> anyhow::Result<()> {
    if !pr.has_label(INTEGRATED_LABEL) {
        ctx.forge.add_label(pr.number, INTEGRATED_LABEL).await?;
    }
    ctx.forge
        .set_state(pr.number, PullRequestState::Closed)
        .await?;
    for label in [READY_LABEL, RFR_LABEL, DELEGATED_LABEL, SPONSOR_LABEL] {
        if pr.has_label(label) {
            ctx.forge.remove_label(pr.number, label).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_commit_message_full() {
        let message = commit_message(
            "8123456: Fix the frobnicator",
            Some("A careful refactoring"),
            &["Duke Mascot <duke@openjdk.org>".to_string()],
            &["alice".to_string(), "bob".to_string()],
        );
        assert_eq!(
            message,
            "8123456: Fix the frobnicator\n\nA careful refactoring\n\n\
             Co-authored-by: Duke Mascot <duke@openjdk.org>\n\nReviewed-by: alice, bob"
        );
    }

    #[test]
    fn test_commit_message_minimal() {
        assert_eq!(
            commit_message("8123456: Fix", None, &[], &[]),
            "8123456: Fix"
        );
    }

    #[test]
    fn test_reviewed_by_filters_stale_and_duplicates() {
        let approved = |name: &str, hash: &str| Review {
            reviewer: User::new(1, name),
            verdict: ReviewVerdict::Approved,
            hash: hash.to_string(),
            created_at: Utc::now(),
        };
        let reviews = vec![
            approved("alice", "old"),
            approved("alice", "head"),
            approved("bob", "old"),
            Review {
                reviewer: User::new(3, "carol"),
                verdict: ReviewVerdict::ChangesRequested,
                hash: "head".to_string(),
                created_at: Utc::now(),
            },
        ];
        let strict = reviewed_by(&reviews, &[], "head", true);
        assert_eq!(strict, vec!["alice"]);

        let lenient = reviewed_by(&reviews, &["dave".to_string()], "head", false);
        assert_eq!(lenient, vec!["alice", "bob", "dave"]);
    }
}
