//! Issue tracker integration
//!
//! Pull requests reference issues by id in their title. The bot
//! resolves those ids for duplicate detection, CSR/JEP gating and the
//! body's issue list. As with the census, the concrete tracker sits
//! behind a narrow trait; the bot works without one, it just cannot
//! resolve titles or approval states then.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// An issue as seen by the bot.
#[derive(Debug, Clone)]
pub struct TrackedIssue {
    /// Issue id without project prefix (e.g. "8123456")
    pub id: String,

    /// Issue title
    pub title: String,

    /// Kind of issue ("bug", "enhancement", "csr", "jep", ...)
    pub issue_type: String,

    /// Whether the issue is still open
    pub open: bool,

    /// Whether the issue has been approved. Only meaningful for
    /// gating issue types such as CSRs and JEPs.
    pub approved: bool,

    /// Last update time on the tracker
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Resolve an issue by id; `None` if the tracker does not know it.
    async fn issue(&self, id: &str) -> anyhow::Result<Option<TrackedIssue>>;

    /// The CSR issue linked to the given issue, if any.
    async fn csr_for(&self, id: &str) -> anyhow::Result<Option<TrackedIssue>>;

    /// The JEP issue with the given JEP number, if any.
    async fn jep(&self, number: &str) -> anyhow::Result<Option<TrackedIssue>>;

    /// Issues of the given type updated at or after the watermark.
    /// Drives the poll item that re-checks pull requests whose gating
    /// issues changed state.
    async fn issues_updated_since(
        &self,
        since: DateTime<Utc>,
        issue_type: &str,
    ) -> anyhow::Result<Vec<TrackedIssue>>;

    /// Add a label to an issue on the tracker.
    async fn add_label(&self, id: &str, label: &str) -> anyhow::Result<()>;

    /// Remove a label from an issue on the tracker.
    async fn remove_label(&self, id: &str, label: &str) -> anyhow::Result<()>;

    /// Post a comment on an issue on the tracker.
    async fn add_comment(&self, id: &str, body: &str) -> anyhow::Result<()>;
}

/// Split a pull request title of the form `"8123456: Fix it"` into
/// issue id and remaining title. Multiple leading ids are allowed.
pub fn parse_issue_title(title: &str) -> Option<(&str, &str)> {
    let (id, rest) = title.split_once(':')?;
    let id = id.trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((id, rest.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_issue_title() {
        assert_eq!(
            parse_issue_title("8123456: Fix the frobnicator"),
            Some(("8123456", "Fix the frobnicator"))
        );
        assert_eq!(parse_issue_title("Fix the frobnicator"), None);
        assert_eq!(parse_issue_title("JDK-8123456: Fix"), None);
        assert_eq!(parse_issue_title(": no id"), None);
    }
}
