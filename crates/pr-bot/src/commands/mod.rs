//! Command handling
//!
//! Every slash command is a `CommandHandler`. The registry is built
//! once at startup and injected through the context; the set of
//! commands never changes while the bot runs, so handlers can be
//! looked up without locking.
//!
//! Handlers never talk to the forge to post their reply. They write
//! into a `CommandReply` accumulator and the dispatcher posts the
//! reply first, then applies label changes. A crash between the two
//! loses at most the labels, and the reply marker prevents the
//! command from running twice.

pub mod approval;
pub mod extractor;
pub mod integrate;
pub mod labels;
pub mod lifecycle;
pub mod metadata;

use crate::context::BotContext;
use async_trait::async_trait;
use forge_client::{Comment, PullRequest, User};
use std::collections::HashMap;
use std::sync::Arc;

pub use extractor::{extract_commands, CommandInvocation};

/// Accumulates the effects of one command: the reply text and the
/// label changes to apply after the reply has been posted.
#[derive(Debug, Default)]
pub struct CommandReply {
    text: String,
    pub labels_to_add: Vec<String>,
    pub labels_to_remove: Vec<String>,

    /// Forces the follow-up check to ignore its stored fingerprint
    pub force_check: bool,

    /// Set when the command integrated and closed the pull request
    pub integrated: bool,
}

impl CommandReply {
    /// A reply addressed to the user who issued the command. Every
    /// reply opens with the @-mention of the issuer, so handlers only
    /// write the substance.
    pub fn new(user: &User) -> Self {
        Self {
            text: format!("@{} ", user.username),
            ..Default::default()
        }
    }

    pub fn line(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
    }

    pub fn blank(&mut self) {
        self.text.push('\n');
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn add_label(&mut self, label: &str) {
        if !self.labels_to_add.iter().any(|l| l == label) {
            self.labels_to_add.push(label.to_string());
        }
    }

    pub fn remove_label(&mut self, label: &str) {
        if !self.labels_to_remove.iter().any(|l| l == label) {
            self.labels_to_remove.push(label.to_string());
        }
    }
}

/// One slash command. Implementations are stateless; everything they
/// need arrives through the context and the invocation.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Whether lines following the command belong to its arguments
    fn multi_line(&self) -> bool {
        false
    }

    /// Whether the command may appear in the pull request body
    fn allowed_in_body(&self) -> bool {
        false
    }

    /// Whether the command works in pull request context
    fn allowed_in_pull_request(&self) -> bool {
        true
    }

    /// Whether the command works as a comment on an integrated commit
    fn allowed_in_commit(&self) -> bool {
        false
    }

    async fn handle(
        &self,
        ctx: &BotContext,
        pr: &PullRequest,
        comments: &[Comment],
        invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()>;

    /// Commit comment context. Only called when `allowed_in_commit`.
    async fn handle_commit(
        &self,
        _ctx: &BotContext,
        _hash: &str,
        _invocation: &CommandInvocation,
        _reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Immutable command registry. Aliases map to the same handler.
pub struct CommandRegistry {
    by_name: HashMap<&'static str, Arc<dyn CommandHandler>>,
    handlers: Vec<Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    /// The full built-in command set.
    pub fn standard() -> Self {
        let mut registry = Self {
            by_name: HashMap::new(),
            handlers: Vec::new(),
        };
        registry.register(Arc::new(HelpCommand), &[]);
        registry.register(Arc::new(integrate::IntegrateCommand), &[]);
        registry.register(Arc::new(integrate::SponsorCommand), &[]);
        registry.register(Arc::new(metadata::AuthorCommand), &[]);
        registry.register(Arc::new(metadata::ContributorCommand), &[]);
        registry.register(Arc::new(metadata::SummaryCommand), &[]);
        registry.register(Arc::new(metadata::IssueCommand), &["solves"]);
        registry.register(Arc::new(metadata::ReviewerCommand), &[]);
        registry.register(Arc::new(metadata::ReviewersCommand), &[]);
        registry.register(Arc::new(labels::LabelCommand), &["cc"]);
        registry.register(Arc::new(approval::CsrCommand), &[]);
        registry.register(Arc::new(approval::JepCommand), &[]);
        registry.register(Arc::new(approval::ApproveCommand), &[]);
        registry.register(Arc::new(lifecycle::OpenCommand), &[]);
        registry.register(Arc::new(lifecycle::TouchCommand), &["keepalive"]);
        registry.register(Arc::new(lifecycle::CleanCommand), &[]);
        registry.register(Arc::new(lifecycle::BackportCommand), &[]);
        registry.register(Arc::new(lifecycle::TagCommand), &[]);
        registry.register(Arc::new(lifecycle::BranchCommand), &[]);
        registry
    }

    fn register(&mut self, handler: Arc<dyn CommandHandler>, aliases: &[&'static str]) {
        self.by_name.insert(handler.name(), Arc::clone(&handler));
        for alias in aliases {
            self.by_name.insert(alias, Arc::clone(&handler));
        }
        self.handlers.push(handler);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CommandHandler>> {
        self.by_name.get(name)
    }

    pub fn is_multi_line(&self, name: &str) -> bool {
        self.by_name.get(name).is_some_and(|h| h.multi_line())
    }

    /// Handlers in registration order, primary names only.
    pub fn handlers(&self) -> &[Arc<dyn CommandHandler>] {
        &self.handlers
    }
}

/// `/help` lists every available command, including external commands
/// answered by other bots.
struct HelpCommand;

#[async_trait]
impl CommandHandler for HelpCommand {
    fn name(&self) -> &'static str {
        "help"
    }

    fn description(&self) -> &'static str {
        "shows this text"
    }

    fn allowed_in_commit(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        ctx: &BotContext,
        _pr: &PullRequest,
        _comments: &[Comment],
        _invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        reply.line("Available commands:");
        for handler in ctx
            .registry
            .handlers()
            .iter()
            .filter(|h| h.allowed_in_pull_request())
        {
            reply.line(&format!(" * `/{}` - {}", handler.name(), handler.description()));
        }
        let mut external: Vec<_> = ctx.config.external_pr_commands.iter().collect();
        external.sort();
        for (name, description) in external {
            reply.line(&format!(" * `/{name}` - {description}"));
        }
        Ok(())
    }

    async fn handle_commit(
        &self,
        ctx: &BotContext,
        _hash: &str,
        _invocation: &CommandInvocation,
        reply: &mut CommandReply,
    ) -> anyhow::Result<()> {
        reply.line("Available commands:");
        for handler in ctx
            .registry
            .handlers()
            .iter()
            .filter(|h| h.allowed_in_commit())
        {
            reply.line(&format!(" * `/{}` - {}", handler.name(), handler.description()));
        }
        let mut external: Vec<_> = ctx.config.external_commit_commands.iter().collect();
        external.sort();
        for (name, description) in external {
            reply.line(&format!(" * `/{name}` - {description}"));
        }
        Ok(())
    }
}

/// Shared authorization check: the issuing user must be a known
/// committer. Writes the rejection into the reply and returns false
/// when not; a policy rejection is normal control flow, not an error.
pub(crate) async fn require_committer(
    ctx: &BotContext,
    invocation: &CommandInvocation,
    reply: &mut CommandReply,
) -> anyhow::Result<bool> {
    if ctx.census.is_committer(&invocation.user).await? {
        return Ok(true);
    }
    reply.line(&format!(
        "only [Committers](https://openjdk.org/bylaws#committer) are allowed to use the `{}` command.",
        invocation.name
    ));
    Ok(false)
}

/// The issuing user must be the pull request author.
pub(crate) fn require_author(
    pr: &PullRequest,
    invocation: &CommandInvocation,
    reply: &mut CommandReply,
) -> bool {
    if invocation.user.username == pr.author.username {
        return true;
    }
    reply.line(&format!(
        "only the author of the pull request can use the `{}` command.",
        invocation.name
    ));
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolves_aliases() {
        let registry = CommandRegistry::standard();
        assert_eq!(registry.get("cc").map(|h| h.name()), Some("label"));
        assert_eq!(registry.get("solves").map(|h| h.name()), Some("issue"));
        assert_eq!(registry.get("keepalive").map(|h| h.name()), Some("touch"));
        assert!(registry.get("frobnicate").is_none());
    }

    #[test]
    fn test_multi_line_capability() {
        let registry = CommandRegistry::standard();
        assert!(registry.is_multi_line("summary"));
        assert!(!registry.is_multi_line("integrate"));
        assert!(!registry.is_multi_line("unknown"));
    }

    #[test]
    fn test_reply_accumulates_without_duplicate_labels() {
        let mut reply = CommandReply::default();
        reply.line("first");
        reply.add_label("rfr");
        reply.add_label("rfr");
        reply.remove_label("sponsor");
        assert_eq!(reply.text(), "first\n");
        assert_eq!(reply.labels_to_add, vec!["rfr"]);
        assert_eq!(reply.labels_to_remove, vec!["sponsor"]);
    }

    #[test]
    fn test_reply_opens_with_the_issuer_mention() {
        let mut reply = CommandReply::new(&User::new(7, "duke"));
        reply.line("your change has been integrated.");
        assert_eq!(reply.text(), "@duke your change has been integrated.\n");
    }
}
