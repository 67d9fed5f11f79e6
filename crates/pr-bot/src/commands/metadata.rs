//! Commands editing change metadata
//!
//! These commands never touch the forge directly. They emit durable
//! markers into their reply and the state is reconstructed from the
//! comment history by the folds in `trackers`.

use crate::commands::{
    require_author, require_committer, CommandHandler, CommandInvocation, CommandReply,
};
use crate::context::BotContext;
use crate::tracker::parse_issue_title;
use crate::trackers;
use async_trait::async_trait;
use forge_client::{Comment, PullRequest};

/// `/contributor (add|remove) Full Name <email>`
pub struct ContributorCommand;

fn parse_contributor(args: &str) -> Option<(&str, &str)> {
    let (verb, rest) = args.split_once(char::is_whitespace)?;
    let rest = rest.trim();
    if !matches!(verb, "add" | "remove") {
        return None;
    }
    // Only the "Full Name <email>" form is accepted
    if !rest.contains('<') || !rest.ends_with('>') {
        return None;
    }
    Some((verb, rest))
}

#[async_trait]
impl CommandHandler for ContributorCommand {
    fn name(&self) -> &'static str {
        "contributor"
    }

    fn description(&self) -> &'static str {
        "adds or removes additional contributors for a PR"
    }

    async fn handle(
        &self,
        ctx: &BotContext,
        pr: &PullRequest,
        comments: &[Comment],
        invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        if !require_author(pr, invocation, reply) {
            return Ok(());
        }
        let Some((verb, entry)) = parse_contributor(&invocation.args) else {
            reply.line("Syntax: `/contributor (add|remove) Full Name <email>`");
            return Ok(());
        };
        let current = trackers::contributors(comments, &ctx.bot_user());
        match verb {
            "add" => {
                reply.line(&trackers::add_contributor_marker(entry));
                reply.line(&format!("Contributor `{entry}` successfully added."));
            }
            _ => {
                if current.iter().any(|c| c == entry) {
                    reply.line(&trackers::remove_contributor_marker(entry));
                    reply.line(&format!("Contributor `{entry}` successfully removed."));
                } else if current.is_empty() {
                    reply.line(
                        "There are no additional contributors associated with this pull request.",
                    );
                } else {
                    reply.line(&format!(
                        "Contributor `{entry}` was not found. Current additional contributors:"
                    ));
                    for c in current {
                        reply.line(&format!(" * `{c}`"));
                    }
                }
            }
        }
        Ok(())
    }
}

/// `/summary` followed by free-form lines. The summary ends up in the
/// final commit message.
pub struct SummaryCommand;

#[async_trait]
impl CommandHandler for SummaryCommand {
    fn name(&self) -> &'static str {
        "summary"
    }

    fn description(&self) -> &'static str {
        "updates the summary in the commit message"
    }

    fn multi_line(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        ctx: &BotContext,
        pr: &PullRequest,
        comments: &[Comment],
        invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        if !require_author(pr, invocation, reply) {
            return Ok(());
        }
        if invocation.args.is_empty() {
            if trackers::summary(comments, &ctx.bot_user()).is_some() {
                reply.line(&trackers::summary_marker(""));
                reply.line("Removing existing summary.");
            } else {
                reply.line("There is currently no summary to remove.");
            }
            return Ok(());
        }
        reply.line(&trackers::summary_marker(&invocation.args));
        reply.line("Setting summary to:");
        reply.blank();
        reply.line("```");
        reply.line(&invocation.args);
        reply.line("```");
        Ok(())
    }
}

/// `/author (set Full Name <email>|remove)` overrides the author
/// recorded on the final squashed commit.
pub struct AuthorCommand;

#[async_trait]
impl CommandHandler for AuthorCommand {
    fn name(&self) -> &'static str {
        "author"
    }

    fn description(&self) -> &'static str {
        "sets an overriding author for the final commit"
    }

    async fn handle(
        &self,
        ctx: &BotContext,
        pr: &PullRequest,
        comments: &[Comment],
        invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        if !require_author(pr, invocation, reply) {
            return Ok(());
        }
        if invocation.args == "remove" {
            if trackers::overriding_author(comments, &ctx.bot_user()).is_some() {
                reply.line(&trackers::author_marker(""));
                reply.line("Removing the overriding author.");
            } else {
                reply.line("There is currently no overriding author to remove.");
            }
            return Ok(());
        }
        let entry = invocation
            .args
            .strip_prefix("set ")
            .unwrap_or(&invocation.args)
            .trim();
        if !entry.contains('<') || !entry.ends_with('>') {
            reply.line("Syntax: `/author (set Full Name <email>|remove)`");
            return Ok(());
        }
        reply.line(&trackers::author_marker(entry));
        reply.line(&format!(
            "Setting overriding author to `{entry}`. When this pull request is integrated, \
             the overriding author will be the author of the final commit."
        ));
        Ok(())
    }
}

/// `/issue [add|remove] id[,id...]`, alias `/solves`
pub struct IssueCommand;

fn parse_issue_args<'a>(args: &'a str, project: Option<&str>) -> (&'a str, Vec<(String, String)>) {
    let (verb, rest) = match args.split_once(char::is_whitespace) {
        Some((v @ ("add" | "remove" | "delete"), rest)) => {
            (if v == "add" { "add" } else { "remove" }, rest)
        }
        _ => ("add", args),
    };
    let entries = rest
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(|entry| {
            let (id, title) = match entry.split_once(':') {
                Some((id, title)) => (id.trim(), title.trim()),
                None => (entry, ""),
            };
            let id = match project {
                Some(p) => id.strip_prefix(&format!("{p}-")).unwrap_or(id),
                None => id,
            };
            (id.to_string(), title.to_string())
        })
        .collect();
    (verb, entries)
}

#[async_trait]
impl CommandHandler for IssueCommand {
    fn name(&self) -> &'static str {
        "issue"
    }

    fn description(&self) -> &'static str {
        "edits the list of issues that this PR solves"
    }

    async fn handle(
        &self,
        ctx: &BotContext,
        pr: &PullRequest,
        comments: &[Comment],
        invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        if !require_author(pr, invocation, reply) {
            return Ok(());
        }
        if invocation.args.is_empty() {
            reply.line("Syntax: `/issue [add|remove] <id>[,<id>,...]`");
            return Ok(());
        }
        let (verb, entries) =
            parse_issue_args(&invocation.args, ctx.config.issue_project.as_deref());
        if entries.is_empty() {
            reply.line("Syntax: `/issue [add|remove] <id>[,<id>,...]`");
            return Ok(());
        }
        let primary = parse_issue_title(&pr.title).map(|(id, _)| id.to_string());
        for (id, given_title) in entries {
            if Some(&id) == primary.as_ref() {
                reply.line(&format!(
                    "The primary solved issue {id} cannot be changed with this command. \
                     Modify the title of this pull request instead."
                ));
                continue;
            }
            match verb {
                "add" => {
                    let title = match &ctx.tracker {
                        Some(tracker) => match tracker.issue(&id).await? {
                            Some(issue) => issue.title,
                            None => {
                                reply.line(&format!(
                                    "The issue `{id}` was not found in the issue tracker - \
                                     make sure you have entered it correctly."
                                ));
                                continue;
                            }
                        },
                        None => given_title.clone(),
                    };
                    reply.line(&trackers::add_issue_marker(&id, &title));
                    reply.line(&format!(
                        "Adding additional issue to solves list: `{id}: {title}`."
                    ));
                }
                _ => {
                    let solved = trackers::solved_issues(comments, &ctx.bot_user());
                    if solved.iter().any(|(s, _)| s == &id) {
                        reply.line(&trackers::remove_issue_marker(&id));
                        reply.line(&format!(
                            "Removing additional issue from solves list: `{id}`."
                        ));
                    } else {
                        reply.line(&format!(
                            "The issue `{id}` is not part of the additional solves list."
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// `/reviewer (credit|remove) @user` manually credits a review made
/// outside the forge.
pub struct ReviewerCommand;

#[async_trait]
impl CommandHandler for ReviewerCommand {
    fn name(&self) -> &'static str {
        "reviewer"
    }

    fn description(&self) -> &'static str {
        "manage additional reviewers for a PR"
    }

    async fn handle(
        &self,
        ctx: &BotContext,
        pr: &PullRequest,
        comments: &[Comment],
        invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        if !require_committer(ctx, invocation, reply).await? {
            return Ok(());
        }
        let Some((verb, user)) = invocation.args.split_once(char::is_whitespace) else {
            reply.line("Syntax: `/reviewer (credit|remove) @user`");
            return Ok(());
        };
        let username = user.trim().trim_start_matches('@');
        if username.is_empty() || !matches!(verb, "credit" | "remove") {
            reply.line("Syntax: `/reviewer (credit|remove) @user`");
            return Ok(());
        }
        let known = ctx
            .census
            .contributor(&forge_client::User::new(0, username))
            .await?;
        let Some(contributor) = known else {
            reply.line(&format!(
                "`{username}` is not a known contributor and cannot be credited as a reviewer."
            ));
            return Ok(());
        };
        let credited = trackers::credited_reviewers(comments, &ctx.bot_user());
        match verb {
            "credit" => {
                if username == pr.author.username {
                    reply.line("The author of a change cannot be credited as its reviewer.");
                } else if credited.iter().any(|r| r == username) {
                    reply.line(&format!(
                        "Reviewer `{username}` has already been credited."
                    ));
                } else {
                    reply.line(&trackers::add_reviewer_marker(username));
                    reply.line(&format!(
                        "Reviewer `{}` ({}) successfully credited.",
                        username, contributor.full_name
                    ));
                }
            }
            _ => {
                if credited.iter().any(|r| r == username) {
                    reply.line(&trackers::remove_reviewer_marker(username));
                    reply.line(&format!("Reviewer `{username}` successfully removed."));
                } else {
                    reply.line(&format!(
                        "Reviewer `{username}` has not been credited on this pull request."
                    ));
                }
            }
        }
        Ok(())
    }
}

/// `/reviewers N [role]` raises the review requirement for this PR.
pub struct ReviewersCommand;

#[async_trait]
impl CommandHandler for ReviewersCommand {
    fn name(&self) -> &'static str {
        "reviewers"
    }

    fn description(&self) -> &'static str {
        "sets the number of required reviewers for this PR"
    }

    async fn handle(
        &self,
        ctx: &BotContext,
        _pr: &PullRequest,
        _comments: &[Comment],
        invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        if !ctx.census.is_reviewer(&invocation.user).await? {
            reply.line(
                "only [Reviewers](https://openjdk.org/bylaws#reviewer) are allowed to \
                 change the number of required reviewers.",
            );
            return Ok(());
        }
        let mut parts = invocation.args.split_whitespace();
        let count: Option<usize> = parts.next().and_then(|n| n.parse().ok());
        let role = parts.next().unwrap_or("reviewer");
        let Some(count @ 1..=10) = count else {
            reply.line("Syntax: `/reviewers <N> [<role>]` where N is between 1 and 10");
            return Ok(());
        };
        if !matches!(role, "author" | "committer" | "reviewer" | "lead") {
            reply.line(&format!(
                "Unknown role `{role}`. Known roles are `author`, `committer`, `reviewer` and `lead`."
            ));
            return Ok(());
        }
        reply.line(&trackers::reviewers_marker(count, role));
        reply.line(&format!(
            "The number of required reviews for this PR is now set to {count} (with at least one of role `{role}`)."
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_contributor() {
        assert_eq!(
            parse_contributor("add Duke Mascot <duke@openjdk.org>"),
            Some(("add", "Duke Mascot <duke@openjdk.org>"))
        );
        assert_eq!(
            parse_contributor("remove Duke <duke@openjdk.org>"),
            Some(("remove", "Duke <duke@openjdk.org>"))
        );
        assert!(parse_contributor("add duke").is_none());
        assert!(parse_contributor("credit Duke <d@o.org>").is_none());
        assert!(parse_contributor("").is_none());
    }

    #[test]
    fn test_parse_issue_args() {
        let (verb, entries) = parse_issue_args("add 8123456,8123457: Title", Some("JDK"));
        assert_eq!(verb, "add");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ("8123456".to_string(), String::new()));
        assert_eq!(entries[1], ("8123457".to_string(), "Title".to_string()));

        let (verb, entries) = parse_issue_args("JDK-8000000", Some("JDK"));
        assert_eq!(verb, "add");
        assert_eq!(entries[0].0, "8000000");

        let (verb, _) = parse_issue_args("remove 8123456", None);
        assert_eq!(verb, "remove");
        let (verb, _) = parse_issue_args("delete 8123456", None);
        assert_eq!(verb, "remove");
    }
}
