//! Command extraction
//!
//! Commands are lines starting with `/` in pull request bodies,
//! comments and commit comments. A comment may carry several commands,
//! and a multi-line command (such as `/summary`) swallows the lines
//! that follow it until the next command starts.

use crate::commands::CommandRegistry;
use chrono::{DateTime, Utc};
use forge_client::User;
use regex::Regex;
use std::sync::OnceLock;

/// A single command as found in a comment or body, before dispatch.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    /// Stable id: the id of the containing comment, with `:<n>`
    /// appended for the second and later command in one comment.
    /// Reply markers use this id, which makes dispatch idempotent.
    pub id: String,

    /// Command name, lowercased, without the leading slash
    pub name: String,

    /// Argument text, possibly spanning several lines
    pub args: String,

    /// Who issued the command
    pub user: User,

    /// When the containing comment was created
    pub created_at: DateTime<Utc>,
}

fn command_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*/([A-Za-z-]+)(?:\s+(.*))?$")
            .unwrap_or_else(|e| panic!("bad command pattern: {e}"))
    })
}

/// Extract every command from a block of text. `base_id` is the id of
/// the containing comment (or a synthetic id for the body).
pub fn extract_commands(
    registry: &CommandRegistry,
    text: &str,
    base_id: &str,
    user: &User,
    created_at: DateTime<Utc>,
) -> Vec<CommandInvocation> {
    let mut commands: Vec<CommandInvocation> = Vec::new();
    let mut in_multi_line = false;

    for line in text.lines() {
        if let Some(cap) = command_re().captures(line) {
            let name = cap[1].to_lowercase();
            let args = cap.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
            let id = if commands.is_empty() {
                base_id.to_string()
            } else {
                format!("{}:{}", base_id, commands.len())
            };
            in_multi_line = registry.is_multi_line(&name);
            commands.push(CommandInvocation {
                id,
                name,
                args: args.to_string(),
                user: user.clone(),
                created_at,
            });
        } else if in_multi_line {
            if let Some(current) = commands.last_mut() {
                if !current.args.is_empty() || !line.trim().is_empty() {
                    if !current.args.is_empty() {
                        current.args.push('\n');
                    }
                    current.args.push_str(line);
                }
            }
        }
    }

    for command in &mut commands {
        command.args = command.args.trim().to_string();
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandRegistry;

    fn registry() -> CommandRegistry {
        CommandRegistry::standard()
    }

    fn duke() -> User {
        User::new(2, "duke")
    }

    #[test]
    fn test_single_command_uses_base_id() {
        let found = extract_commands(&registry(), "/integrate", "12", &duke(), Utc::now());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "12");
        assert_eq!(found[0].name, "integrate");
        assert_eq!(found[0].args, "");
    }

    #[test]
    fn test_multiple_commands_get_sub_indices() {
        let text = "Looks good!\n/reviewers 2\n/label add core";
        let found = extract_commands(&registry(), text, "12", &duke(), Utc::now());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, "12");
        assert_eq!(found[0].name, "reviewers");
        assert_eq!(found[0].args, "2");
        assert_eq!(found[1].id, "12:1");
        assert_eq!(found[1].name, "label");
        assert_eq!(found[1].args, "add core");
    }

    #[test]
    fn test_multi_line_command_swallows_following_lines() {
        let text = "/summary\nThis is the first line\nand the second\n/integrate";
        let found = extract_commands(&registry(), text, "7", &duke(), Utc::now());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "summary");
        assert_eq!(
            found[0].args,
            "This is the first line\nand the second"
        );
        assert_eq!(found[1].name, "integrate");
    }

    #[test]
    fn test_plain_text_after_single_line_command_is_ignored() {
        let text = "/integrate\nthanks everyone";
        let found = extract_commands(&registry(), text, "7", &duke(), Utc::now());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].args, "");
    }

    #[test]
    fn test_leading_whitespace_and_case() {
        let found = extract_commands(&registry(), "  /Integrate auto", "3", &duke(), Utc::now());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "integrate");
        assert_eq!(found[0].args, "auto");
    }

    #[test]
    fn test_unknown_commands_are_still_extracted() {
        let found = extract_commands(&registry(), "/frobnicate hard", "3", &duke(), Utc::now());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "frobnicate");
    }

    #[test]
    fn test_slash_mid_line_is_not_a_command() {
        let found = extract_commands(
            &registry(),
            "see src/integrate.rs for details",
            "3",
            &duke(),
            Utc::now(),
        );
        assert!(found.is_empty());
    }
}
