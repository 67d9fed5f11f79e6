//! `/label` command, alias `/cc`
//!
//! Lets the author and committers classify a pull request with the
//! labels configured for the repository. Manual decisions are recorded
//! as markers so the automatic path labeler never overrides them.

use crate::commands::{CommandHandler, CommandInvocation, CommandReply};
use crate::context::BotContext;
use crate::trackers;
use async_trait::async_trait;
use forge_client::{Comment, PullRequest};

pub struct LabelCommand;

fn parse_label_args(args: &str) -> (&'static str, Vec<String>) {
    let (verb, rest) = match args.split_once(char::is_whitespace) {
        Some(("add", rest)) => ("add", rest),
        Some(("remove", rest)) => ("remove", rest),
        _ => ("add", args),
    };
    let labels = rest
        .split([' ', ','])
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    (verb, labels)
}

#[async_trait]
impl CommandHandler for LabelCommand {
    fn name(&self) -> &'static str {
        "label"
    }

    fn description(&self) -> &'static str {
        "adds or removes additional classification labels"
    }

    fn allowed_in_body(&self) -> bool {
        true
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
            reply.line("only the pull request author and Committers are allowed to modify labels.");
            return Ok(());
        }

        let allowed: Vec<&str> = ctx
            .config
            .label_rules
            .iter()
            .map(|r| r.label.as_str())
            .collect();
        let (verb, labels) = parse_label_args(&invocation.args);
        if labels.is_empty() {
            reply.line("Syntax: `/label [add|remove] <label>[, <label>, ...]`");
            if !allowed.is_empty() {
                reply.line(&format!("Available labels: `{}`.", allowed.join("`, `")));
            }
            return Ok(());
        }

        for label in labels {
            if !allowed.iter().any(|a| *a == label) {
                reply.line(&format!(
                    "The label `{}` is not a valid label. Available labels: `{}`.",
                    label,
                    allowed.join("`, `")
                ));
                continue;
            }
            if verb == "add" {
                if pr.has_label(&label) {
                    reply.line(&format!("The `{label}` label was already applied."));
                } else {
                    reply.line(&trackers::add_label_marker(&label));
                    reply.line(&format!("The `{label}` label was successfully added."));
                    reply.add_label(&label);
                }
            } else if pr.has_label(&label) {
                reply.line(&trackers::remove_label_marker(&label));
                reply.line(&format!("The `{label}` label was successfully removed."));
                reply.remove_label(&label);
            } else {
                reply.line(&format!(
                    "The `{label}` label was not set, so it cannot be removed."
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_label_args() {
        assert_eq!(
            parse_label_args("add core, net"),
            ("add", vec!["core".to_string(), "net".to_string()])
        );
        assert_eq!(
            parse_label_args("remove core"),
            ("remove", vec!["core".to_string()])
        );
        // Bare list defaults to add
        assert_eq!(
            parse_label_args("core net"),
            ("add", vec!["core".to_string(), "net".to_string()])
        );
        assert_eq!(parse_label_args(""), ("add", vec![]));
    }
}
