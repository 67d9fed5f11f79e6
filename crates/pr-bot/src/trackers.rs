//! Durable comment markers
//!
//! The bot never stores state locally. Instead it embeds invisible
//! HTML comment markers in the comments it posts and reconstructs
//! state by folding over the comment history on every pass. This
//! module owns every marker format and every fold.
//!
//! Folds only ever consider comments authored by the bot itself;
//! markers pasted by other users have no effect.

use forge_client::{Comment, User};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::OnceLock;

/// Marker identifying a self-comment the bot posts on its own behalf
/// (e.g. the `/integrate` comment in auto mode). Without this marker a
/// command in a bot comment is ignored.
pub const SELF_COMMAND_MARKER: &str = "<!-- Valid self-command -->";

/// Marker below which the bot rewrites the pull request body on every
/// check. Text above it belongs to the author.
pub const PROGRESS_MARKER: &str =
    "<!-- Anything below this marker will be automatically updated, please do not edit manually! -->";

/// Marker on the single comment announcing that a pull request is
/// ready for integration.
pub const MERGE_READY_MARKER: &str = "<!-- PullRequestBot merge is ready comment -->";

/// Marker on the comment reporting a broken policy configuration.
pub const CONFIG_ERROR_MARKER: &str = "<!-- PullRequestBot configuration error comment -->";

/// Marker recording that the automatic path labeler has already run
/// on this pull request.
pub const INITIAL_LABEL_MARKER: &str = "<!-- PullRequestBot initial label comment -->";

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap_or_else(|e| panic!("bad marker pattern: {e}")))
}

/// Marker tying a bot reply to the command comment it answers.
pub fn reply_marker(command_id: &str) -> String {
    format!("<!-- Jmerge command reply message ({command_id}) -->")
}

fn reply_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"<!-- Jmerge command reply message \(([-.:\w]+)\) -->")
}

/// Ids of every command that already has a bot reply.
pub fn replied_command_ids(comments: &[Comment], bot: &User) -> HashSet<String> {
    comments
        .iter()
        .filter(|c| c.author.username == bot.username)
        .filter_map(|c| reply_re().captures(&c.body))
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Whether a bot-authored comment is a deliberate self-command.
pub fn is_valid_self_command(comment: &Comment) -> bool {
    comment.body.contains(SELF_COMMAND_MARKER)
}

/// Marker recording a push attempt before it happens, keyed by the
/// hash about to be pushed. Crash recovery starts here.
pub fn prepush_marker(hash: &str) -> String {
    format!("<!-- prepush {hash} -->")
}

fn prepush_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"<!-- prepush ([0-9a-f]+) -->")
}

/// Hashes of every recorded push attempt, oldest first.
pub fn prepush_hashes(comments: &[Comment], bot: &User) -> Vec<String> {
    bot_captures(comments, bot, prepush_re())
}

/// Marker recording that a non-committer author has asked for the
/// current head to be sponsored.
pub fn sponsor_marker(head_hash: &str) -> String {
    format!("<!-- integration requested: '{head_hash}' -->")
}

fn sponsor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"<!-- integration requested: '([0-9a-f]+)' -->")
}

/// Head hashes for which sponsoring has been requested.
pub fn sponsor_requests(comments: &[Comment], bot: &User) -> Vec<String> {
    bot_captures(comments, bot, sponsor_re())
}

pub fn add_reviewer_marker(username: &str) -> String {
    format!("<!-- add reviewer: '{username}' -->")
}

pub fn remove_reviewer_marker(username: &str) -> String {
    format!("<!-- remove reviewer: '{username}' -->")
}

fn reviewer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"<!-- (add|remove) reviewer: '([^']+)' -->")
}

/// Manually credited reviewers, after folding additions and removals.
pub fn credited_reviewers(comments: &[Comment], bot: &User) -> Vec<String> {
    fold_add_remove(comments, bot, reviewer_re())
}

pub fn add_contributor_marker(entry: &str) -> String {
    format!("<!-- add contributor: '{entry}' -->")
}

pub fn remove_contributor_marker(entry: &str) -> String {
    format!("<!-- remove contributor: '{entry}' -->")
}

fn contributor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"<!-- (add|remove) contributor: '([^']+)' -->")
}

/// Additional contributors ("Full Name <email>") credited on the change.
pub fn contributors(comments: &[Comment], bot: &User) -> Vec<String> {
    fold_add_remove(comments, bot, contributor_re())
}

pub fn summary_marker(summary: &str) -> String {
    format!("<!-- summary: '{}' -->", summary.replace('\n', "\\n"))
}

fn summary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"<!-- summary: '([^']*)' -->")
}

/// The current summary text, if one is set. The last marker wins and
/// an empty marker clears the summary.
pub fn summary(comments: &[Comment], bot: &User) -> Option<String> {
    bot_captures(comments, bot, summary_re())
        .into_iter()
        .last()
        .map(|s| s.replace("\\n", "\n"))
        .filter(|s| !s.is_empty())
}

pub fn author_marker(entry: &str) -> String {
    format!("<!-- overriding author: '{entry}' -->")
}

fn author_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"<!-- overriding author: '([^']*)' -->")
}

/// The overriding commit author ("Full Name <email>"), if one is set.
/// The last marker wins and an empty marker clears the override.
pub fn overriding_author(comments: &[Comment], bot: &User) -> Option<String> {
    bot_captures(comments, bot, author_re())
        .into_iter()
        .last()
        .filter(|s| !s.is_empty())
}

pub fn add_issue_marker(id: &str, title: &str) -> String {
    format!("<!-- add solves: '{id}: {title}' -->")
}

pub fn remove_issue_marker(id: &str) -> String {
    format!("<!-- remove solves: '{id}' -->")
}

fn issue_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"<!-- (add|remove) solves: '([^']+)' -->")
}

/// Additional issues the change solves, as `(id, title)` pairs.
pub fn solved_issues(comments: &[Comment], bot: &User) -> Vec<(String, String)> {
    let mut entries: BTreeMap<String, String> = BTreeMap::new();
    for c in comments.iter().filter(|c| c.author.username == bot.username) {
        for cap in issue_re().captures_iter(&c.body) {
            match &cap[1] {
                "add" => {
                    let (id, title) = cap[2].split_once(": ").unwrap_or((&cap[2], ""));
                    entries.insert(id.to_string(), title.to_string());
                }
                _ => {
                    entries.remove(&cap[2]);
                }
            }
        }
    }
    entries.into_iter().collect()
}

pub fn add_label_marker(label: &str) -> String {
    format!("<!-- add label: '{label}' -->")
}

pub fn remove_label_marker(label: &str) -> String {
    format!("<!-- remove label: '{label}' -->")
}

fn label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"<!-- (add|remove) label: '([^']+)' -->")
}

/// Labels a human has explicitly added or removed via commands. The
/// automatic labeler must not override these decisions.
#[derive(Debug, Default, Clone)]
pub struct LabelDecisions {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

pub fn label_decisions(comments: &[Comment], bot: &User) -> LabelDecisions {
    let mut decisions = LabelDecisions::default();
    for c in comments.iter().filter(|c| c.author.username == bot.username) {
        for cap in label_re().captures_iter(&c.body) {
            let label = cap[2].to_string();
            if &cap[1] == "add" {
                decisions.removed.remove(&label);
                decisions.added.insert(label);
            } else {
                decisions.added.remove(&label);
                decisions.removed.insert(label);
            }
        }
    }
    decisions
}

pub fn reviewers_marker(count: usize, role: &str) -> String {
    format!("<!-- additional required reviewers: {count} of role '{role}' -->")
}

fn reviewers_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"<!-- additional required reviewers: (\d+) of role '(\w+)' -->",
    )
}

/// The raised review requirement, if one has been set. Last one wins.
pub fn additional_required_reviewers(comments: &[Comment], bot: &User) -> Option<(usize, String)> {
    comments
        .iter()
        .filter(|c| c.author.username == bot.username)
        .flat_map(|c| reviewers_re().captures_iter(&c.body))
        .filter_map(|cap| Some((cap[1].parse().ok()?, cap[2].to_string())))
        .last()
}

/// Find the bot comment carrying the given marker, if any.
pub fn find_marked_comment<'a>(
    comments: &'a [Comment],
    bot: &User,
    marker: &str,
) -> Option<&'a Comment> {
    comments
        .iter()
        .find(|c| c.author.username == bot.username && c.body.contains(marker))
}

/// All marker lines in bot comments that carry durable state. These
/// feed the check fingerprint: a state change through a command must
/// invalidate the stored evaluation.
pub fn metadata_marker_lines(comments: &[Comment], bot: &User) -> Vec<String> {
    let patterns = [
        reviewer_re(),
        contributor_re(),
        summary_re(),
        author_re(),
        issue_re(),
        label_re(),
        reviewers_re(),
        sponsor_re(),
    ];
    comments
        .iter()
        .filter(|c| c.author.username == bot.username)
        .flat_map(|c| c.body.lines())
        .filter(|line| patterns.iter().any(|re| re.is_match(line)))
        .map(str::to_string)
        .collect()
}

fn bot_captures(comments: &[Comment], bot: &User, re: &Regex) -> Vec<String> {
    comments
        .iter()
        .filter(|c| c.author.username == bot.username)
        .flat_map(|c| re.captures_iter(&c.body).collect::<Vec<_>>())
        .map(|cap| cap[1].to_string())
        .collect()
}

fn fold_add_remove(comments: &[Comment], bot: &User, re: &Regex) -> Vec<String> {
    let mut entries: Vec<String> = Vec::new();
    for c in comments.iter().filter(|c| c.author.username == bot.username) {
        for cap in re.captures_iter(&c.body) {
            let value = cap[2].to_string();
            if &cap[1] == "add" {
                if !entries.contains(&value) {
                    entries.push(value);
                }
            } else {
                entries.retain(|e| e != &value);
            }
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bot() -> User {
        User::new(1, "bot")
    }

    fn comment(author: &User, body: &str) -> Comment {
        Comment {
            id: "c1".to_string(),
            author: author.clone(),
            body: body.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_reply_ids_only_counted_from_bot() {
        let user = User::new(2, "duke");
        let comments = vec![
            comment(&bot(), &reply_marker("12:0")),
            comment(&user, &reply_marker("99")),
        ];
        let ids = replied_command_ids(&comments, &bot());
        assert!(ids.contains("12:0"));
        assert!(!ids.contains("99"));
    }

    #[test]
    fn test_reviewer_fold_add_then_remove() {
        let comments = vec![
            comment(&bot(), &add_reviewer_marker("alice")),
            comment(&bot(), &add_reviewer_marker("bob")),
            comment(&bot(), &remove_reviewer_marker("alice")),
        ];
        assert_eq!(credited_reviewers(&comments, &bot()), vec!["bob"]);
    }

    #[test]
    fn test_summary_last_marker_wins_and_empty_clears() {
        let comments = vec![
            comment(&bot(), &summary_marker("first\nsecond")),
            comment(&bot(), &summary_marker("only")),
        ];
        assert_eq!(summary(&comments, &bot()), Some("only".to_string()));

        let cleared = vec![
            comment(&bot(), &summary_marker("text")),
            comment(&bot(), &summary_marker("")),
        ];
        assert_eq!(summary(&cleared, &bot()), None);
    }

    #[test]
    fn test_overriding_author_last_marker_wins() {
        let comments = vec![
            comment(&bot(), &author_marker("Duke <duke@openjdk.org>")),
            comment(&bot(), &author_marker("Tux <tux@kernel.invalid>")),
        ];
        assert_eq!(
            overriding_author(&comments, &bot()),
            Some("Tux <tux@kernel.invalid>".to_string())
        );

        let cleared = vec![
            comment(&bot(), &author_marker("Duke <duke@openjdk.org>")),
            comment(&bot(), &author_marker("")),
        ];
        assert_eq!(overriding_author(&cleared, &bot()), None);
    }

    #[test]
    fn test_solved_issues_fold() {
        let comments = vec![
            comment(&bot(), &add_issue_marker("4567", "Another bug")),
            comment(&bot(), &add_issue_marker("8901", "Gone")),
            comment(&bot(), &remove_issue_marker("8901")),
        ];
        assert_eq!(
            solved_issues(&comments, &bot()),
            vec![("4567".to_string(), "Another bug".to_string())]
        );
    }

    #[test]
    fn test_label_decisions_latest_wins() {
        let comments = vec![
            comment(&bot(), &add_label_marker("core")),
            comment(&bot(), &remove_label_marker("core")),
            comment(&bot(), &add_label_marker("net")),
        ];
        let d = label_decisions(&comments, &bot());
        assert!(d.added.contains("net"));
        assert!(d.removed.contains("core"));
        assert!(!d.added.contains("core"));
    }

    #[test]
    fn test_additional_reviewers_marker_roundtrip() {
        let comments = vec![comment(&bot(), &reviewers_marker(2, "reviewer"))];
        assert_eq!(
            additional_required_reviewers(&comments, &bot()),
            Some((2, "reviewer".to_string()))
        );
    }

    #[test]
    fn test_prepush_and_sponsor_markers() {
        let comments = vec![
            comment(&bot(), &prepush_marker("deadbeef")),
            comment(&bot(), &sponsor_marker("cafe01")),
        ];
        assert_eq!(prepush_hashes(&comments, &bot()), vec!["deadbeef"]);
        assert_eq!(sponsor_requests(&comments, &bot()), vec!["cafe01"]);
    }

    #[test]
    fn test_metadata_marker_lines_ignore_other_users() {
        let user = User::new(2, "duke");
        let comments = vec![
            comment(&bot(), &add_reviewer_marker("alice")),
            comment(&user, &add_reviewer_marker("mallory")),
        ];
        let lines = metadata_marker_lines(&comments, &bot());
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("alice"));
    }
}
