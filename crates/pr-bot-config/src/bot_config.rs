//! Bot configuration
//!
//! Configuration loaded from pr-bot.toml file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The repository the bot governs
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RepositoryConfig {
    /// Repository owner (user or organization)
    pub owner: String,

    /// Repository name
    pub name: String,
}

impl RepositoryConfig {
    /// Full "owner/name" form, as used in log messages and work item ids
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// A path-prefix based auto-labelling rule
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LabelRule {
    /// Label to apply
    pub label: String,

    /// Path prefixes that trigger this label
    pub paths: Vec<String>,
}

/// Bot configuration loaded from pr-bot.toml
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BotConfig {
    /// Repository to govern
    pub repository: RepositoryConfig,

    /// Name of the check run the bot posts on the forge
    #[serde(default = "default_check_name")]
    pub check_name: String,

    /// Issue tracker project key (e.g. "JDK"); None disables issue lookups
    #[serde(default)]
    pub issue_project: Option<String>,

    /// Labels that must be present before any check is scheduled
    #[serde(default)]
    pub ready_labels: Vec<String>,

    /// Required approval comments, keyed by username, valued by a regex
    /// that must match one of that user's comments
    #[serde(default)]
    pub ready_comments: HashMap<String, String>,

    /// Labels that block integration, mapped to the message shown
    #[serde(default)]
    pub blocking_labels: HashMap<String, String>,

    /// Labels that suggest waiting for a second reviewer
    #[serde(default)]
    pub two_reviewers_labels: Vec<String>,

    /// Commands answered by external bots in pull request context,
    /// mapped to their help descriptions. Never dispatched locally.
    #[serde(default)]
    pub external_pr_commands: HashMap<String, String>,

    /// Commands answered by external bots in commit comment context
    #[serde(default)]
    pub external_commit_commands: HashMap<String, String>,

    /// Users allowed to integrate regardless of authorship; empty means
    /// any committer
    #[serde(default)]
    pub integrators: Vec<String>,

    /// Whether approvals made for an older head hash still count
    #[serde(default)]
    pub ignore_stale_reviews: bool,

    /// Whether CSR gating is enabled
    #[serde(default)]
    pub enable_csr: bool,

    /// Whether JEP gating is enabled
    #[serde(default)]
    pub enable_jep: bool,

    /// Regex restricting which target branches PRs may use
    #[serde(default = "default_allowed_target_branches")]
    pub allowed_target_branches: String,

    /// Path-prefix based auto-labelling rules
    #[serde(default)]
    pub label_rules: Vec<LabelRule>,

    /// Writeable forks for backport PR creation, keyed by upstream
    /// "owner/name"
    #[serde(default)]
    pub forks: HashMap<String, String>,

    /// Seconds between scheduler ticks
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Maximum seconds between full scans of all open PRs
    #[serde(default = "default_full_scan_interval_secs")]
    pub full_scan_interval_secs: u64,
}

fn default_check_name() -> String {
    "policy".to_string()
}

fn default_allowed_target_branches() -> String {
    ".*".to_string()
}

fn default_tick_interval_secs() -> u64 {
    10
}

fn default_full_scan_interval_secs() -> u64 {
    600
}

impl Default for BotConfig {
    fn default() -> Self {
        toml::from_str("[repository]\nowner = \"\"\nname = \"\"\n")
            .expect("default BotConfig must parse")
    }
}

impl BotConfig {
    /// Parse configuration from TOML content
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: BotConfig =
            toml::from_str(content).context("Failed to parse bot configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.repository.owner.is_empty() || self.repository.name.is_empty() {
            anyhow::bail!("repository.owner and repository.name must be set");
        }
        regex::Regex::new(&self.allowed_target_branches)
            .context("allowed_target_branches is not a valid regex")?;
        for (user, pattern) in &self.ready_comments {
            regex::Regex::new(pattern).with_context(|| {
                format!("ready_comments pattern for '{}' is not a valid regex", user)
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config = BotConfig::from_toml(
            r#"
            [repository]
            owner = "openjdk"
            name = "jdk"
            "#,
        )
        .unwrap();

        assert_eq!(config.repository.full_name(), "openjdk/jdk");
        assert_eq!(config.check_name, "policy");
        assert!(!config.ignore_stale_reviews);
        assert!(config.ready_labels.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = BotConfig::from_toml(
            r#"
            issue_project = "JDK"
            ready_labels = ["approved"]
            integrators = ["duke"]
            ignore_stale_reviews = true
            enable_csr = true
            allowed_target_branches = "master|jfx\\d+"

            [repository]
            owner = "openjdk"
            name = "jfx"

            [ready_comments]
            reviewbot = "LGTM"

            [blocking_labels]
            csr = "The CSR for this change is not yet approved"

            [[label_rules]]
            label = "compiler"
            paths = ["src/hotspot/share/opto"]

            [forks]
            "openjdk/jfx" = "bots/jfx-mirror"
            "#,
        )
        .unwrap();

        assert!(config.enable_csr);
        assert!(config.ignore_stale_reviews);
        assert_eq!(config.issue_project.as_deref(), Some("JDK"));
        assert_eq!(config.label_rules.len(), 1);
        assert_eq!(
            config.blocking_labels.get("csr").unwrap(),
            "The CSR for this change is not yet approved"
        );
        assert_eq!(config.forks.get("openjdk/jfx").unwrap(), "bots/jfx-mirror");
    }

    #[test]
    fn test_missing_repository_rejected() {
        assert!(BotConfig::from_toml("check_name = \"policy\"").is_err());
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let result = BotConfig::from_toml(
            r#"
            allowed_target_branches = "["

            [repository]
            owner = "o"
            name = "r"
            "#,
        );
        assert!(result.is_err());
    }
}
