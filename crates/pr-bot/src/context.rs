//! Shared bot context
//!
//! One `BotContext` is built at startup and shared by every work item.
//! All collaborators are trait objects so tests can swap in doubles,
//! and the command registry is immutable after construction: the set
//! of commands never changes while the bot runs.

use crate::census::CensusClient;
use crate::check::PolicyChecker;
use crate::commands::CommandRegistry;
use crate::integration_lock::IntegrationLocks;
use crate::repo::RepositoryPool;
use crate::tracker::IssueTracker;
use chrono::{DateTime, Utc};
use forge_client::ForgeClient;
use pr_bot_config::BotConfig;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Mutable state shared across passes. Everything here is a cache or
/// a scheduling hint; losing it is safe.
#[derive(Default)]
pub struct BotState {
    /// Pull requests that must be visited on the next pass even if
    /// the forge reports no update
    pub force_recheck: Mutex<HashSet<u64>>,

    /// Pull requests to revisit at a given time (expiring reviews,
    /// failed work items backing off)
    pub retry_at: Mutex<HashMap<u64, DateTime<Utc>>>,

    /// Watermark for polling gating issues on the tracker
    pub issue_poll_watermark: Mutex<Option<DateTime<Utc>>>,
}

impl BotState {
    pub fn schedule_recheck(&self, number: u64) {
        if let Ok(mut set) = self.force_recheck.lock() {
            set.insert(number);
        }
    }

    pub fn schedule_retry(&self, number: u64, at: DateTime<Utc>) {
        if let Ok(mut map) = self.retry_at.lock() {
            let entry = map.entry(number).or_insert(at);
            if at < *entry {
                *entry = at;
            }
        }
    }
}

pub struct BotContext {
    pub config: BotConfig,
    pub forge: Arc<dyn ForgeClient>,
    pub census: Arc<dyn CensusClient>,
    pub tracker: Option<Arc<dyn IssueTracker>>,
    pub repos: Arc<dyn RepositoryPool>,
    pub checker: Arc<dyn PolicyChecker>,
    pub registry: Arc<CommandRegistry>,
    pub integration_locks: IntegrationLocks,
    pub state: BotState,
}

impl BotContext {
    /// The user the bot acts as on the forge.
    pub fn bot_user(&self) -> forge_client::User {
        self.forge.current_user()
    }

    /// Repository identity used for work item conflict detection and
    /// the integration lock.
    pub fn repository(&self) -> String {
        self.config.repository.full_name()
    }
}
