//! Contributor census
//!
//! The census maps forge users to project roles. Authorization of
//! commands and the weight of approvals both depend on it. The bot
//! consumes it through a narrow trait so the backing store (a file, a
//! service, a repository at a pinned ref) stays swappable.

use async_trait::async_trait;
use forge_client::User;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Project role of a contributor, ordered from least to most trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Author,
    Committer,
    Reviewer,
    Lead,
}

/// A contributor known to the census.
#[derive(Debug, Clone)]
pub struct Contributor {
    pub username: String,
    pub full_name: String,
    pub role: Role,
}

impl Contributor {
    pub fn is_committer(&self) -> bool {
        self.role >= Role::Committer
    }

    pub fn is_reviewer(&self) -> bool {
        self.role >= Role::Reviewer
    }
}

#[async_trait]
pub trait CensusClient: Send + Sync {
    /// Look up a forge user in the census. `None` means the user is
    /// not a known contributor at all.
    async fn contributor(&self, user: &User) -> anyhow::Result<Option<Contributor>>;

    async fn is_committer(&self, user: &User) -> anyhow::Result<bool> {
        Ok(self
            .contributor(user)
            .await?
            .is_some_and(|c| c.is_committer()))
    }

    async fn is_reviewer(&self, user: &User) -> anyhow::Result<bool> {
        Ok(self
            .contributor(user)
            .await?
            .is_some_and(|c| c.is_reviewer()))
    }
}

#[derive(Debug, Deserialize)]
struct CensusEntry {
    #[serde(default)]
    full_name: Option<String>,
    role: Role,
}

#[derive(Debug, Deserialize)]
struct CensusFile {
    #[serde(default)]
    contributors: HashMap<String, CensusEntry>,
}

/// Census backed by a TOML file mapping usernames to roles:
///
/// ```toml
/// [contributors.duke]
/// full_name = "Duke Mascot"
/// role = "reviewer"
/// ```
pub struct StaticCensus {
    contributors: HashMap<String, Contributor>,
}

impl StaticCensus {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let file: CensusFile = toml::from_str(text)?;
        let contributors = file
            .contributors
            .into_iter()
            .map(|(username, entry)| {
                let contributor = Contributor {
                    full_name: entry.full_name.unwrap_or_else(|| username.clone()),
                    username: username.clone(),
                    role: entry.role,
                };
                (username, contributor)
            })
            .collect();
        Ok(Self { contributors })
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// An empty census; nobody is a known contributor.
    pub fn empty() -> Self {
        Self {
            contributors: HashMap::new(),
        }
    }
}

#[async_trait]
impl CensusClient for StaticCensus {
    async fn contributor(&self, user: &User) -> anyhow::Result<Option<Contributor>> {
        Ok(self.contributors.get(&user.username).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_census_lookup() {
        let census = StaticCensus::from_toml(
            r#"
            [contributors.duke]
            full_name = "Duke Mascot"
            role = "reviewer"

            [contributors.newbie]
            role = "author"
            "#,
        )
        .unwrap();

        let duke = census
            .contributor(&User::new(1, "duke"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(duke.full_name, "Duke Mascot");
        assert!(duke.is_reviewer());
        assert!(duke.is_committer());

        assert!(!census.is_committer(&User::new(2, "newbie")).await.unwrap());
        assert!(census
            .contributor(&User::new(3, "stranger"))
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_role_ordering() {
        assert!(Role::Lead > Role::Reviewer);
        assert!(Role::Reviewer > Role::Committer);
        assert!(Role::Committer > Role::Author);
    }
}
