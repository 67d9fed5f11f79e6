//! Scheduler
//!
//! The periodic pass over the repository: poll for changed pull
//! requests, turn them into work items and execute those, chasing
//! successors until the pass settles. Polling alternates between
//! cheap incremental scans (updated since a watermark) and a bounded
//! full scan that catches anything the increments missed.

use crate::context::BotContext;
use crate::work_item::{
    CheckWorkItem, CommandWorkItem, CommitCommentsWorkItem, IssuePollWorkItem, Target, WorkItem,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use forge_client::PullRequestState;
use log::{debug, error, info, warn};
use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Overlap added to incremental scans so a slow forge clock cannot
/// hide an update between two passes.
const SCAN_PADDING_MINUTES: i64 = 5;

/// Upper bound on items executed in one pass, including successors.
const MAX_ITEMS_PER_PASS: usize = 256;

pub struct Scheduler {
    ctx: Arc<BotContext>,
    update_cache: HashMap<u64, DateTime<Utc>>,
    last_full_scan: Option<Instant>,
    watermark: Option<DateTime<Utc>>,
}

impl Scheduler {
    pub fn new(ctx: Arc<BotContext>) -> Self {
        Self {
            ctx,
            update_cache: HashMap::new(),
            last_full_scan: None,
            watermark: None,
        }
    }

    /// Run forever, one pass per tick interval.
    pub async fn run(mut self) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.ctx.config.tick_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let executed = self.tick().await;
            debug!("pass complete, {executed} item(s) executed");
        }
    }

    /// One full pass. Returns the number of items executed.
    pub async fn tick(&mut self) -> usize {
        let items = match self.collect_items().await {
            Ok(items) => items,
            Err(e) => {
                error!("failed to poll {}: {e:#}", self.ctx.repository());
                return 0;
            }
        };
        self.execute(items).await
    }

    async fn collect_items(&mut self) -> anyhow::Result<Vec<Box<dyn WorkItem>>> {
        let config = &self.ctx.config;
        let now = Utc::now();
        let full = self
            .last_full_scan
            .is_none_or(|at| at.elapsed() >= Duration::from_secs(config.full_scan_interval_secs));

        let prs = if full {
            self.ctx.forge.list_pull_requests().await?
        } else {
            let since = self.watermark.unwrap_or(now)
                - ChronoDuration::minutes(SCAN_PADDING_MINUTES);
            self.ctx.forge.list_pull_requests_updated_since(since).await?
        };
        if full {
            self.last_full_scan = Some(Instant::now());
            info!("full scan of {}: {} pull request(s)", self.ctx.repository(), prs.len());
        }
        self.watermark = Some(now);

        let mut forced: HashSet<u64> = match self.ctx.state.force_recheck.lock() {
            Ok(mut set) => set.drain().collect(),
            Err(poisoned) => poisoned.into_inner().drain().collect(),
        };
        if let Ok(mut retries) = self.ctx.state.retry_at.lock() {
            let due: Vec<u64> = retries
                .iter()
                .filter(|(_, at)| **at <= now)
                .map(|(n, _)| *n)
                .collect();
            for number in due {
                retries.remove(&number);
                forced.insert(number);
            }
        }

        let mut items: Vec<Box<dyn WorkItem>> = Vec::new();
        for pr in &prs {
            let seen = self.update_cache.get(&pr.number) == Some(&pr.updated_at);
            let force = forced.remove(&pr.number);
            if seen && !force {
                continue;
            }
            self.update_cache.insert(pr.number, pr.updated_at);
            match pr.state {
                PullRequestState::Open => {
                    if self.meets_preconditions(pr).await? {
                        items.push(Box::new(CheckWorkItem {
                            number: pr.number,
                            force,
                        }));
                    }
                }
                // Commands still get answered after closing
                PullRequestState::Closed => {
                    items.push(Box::new(CommandWorkItem { number: pr.number }))
                }
            }
        }
        // Forced rechecks not covered by this scan
        for number in forced {
            items.push(Box::new(CheckWorkItem {
                number,
                force: true,
            }));
        }

        items.push(Box::new(CommitCommentsWorkItem));
        if self.ctx.tracker.is_some() && config.enable_csr {
            items.push(Box::new(IssuePollWorkItem));
        }
        Ok(items)
    }

    /// A pull request enters the check pipeline only once the
    /// configured readiness signals are present.
    async fn meets_preconditions(&self, pr: &forge_client::PullRequest) -> anyhow::Result<bool> {
        let config = &self.ctx.config;
        for label in &config.ready_labels {
            if !pr.has_label(label) {
                debug!("#{}: missing ready label `{label}`", pr.number);
                return Ok(false);
            }
        }
        if !config.ready_comments.is_empty() {
            let comments = self.ctx.forge.comments(pr.number).await?;
            for (user, pattern) in &config.ready_comments {
                let re = Regex::new(pattern)?;
                let found = comments
                    .iter()
                    .any(|c| &c.author.username == user && re.is_match(&c.body));
                if !found {
                    debug!("#{}: missing ready comment from `{user}`", pr.number);
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Execute a batch, running concurrency-compatible items in
    /// parallel and scheduling successors as items finish.
    async fn execute(&mut self, items: Vec<Box<dyn WorkItem>>) -> usize {
        let mut pending: VecDeque<Box<dyn WorkItem>> = items.into();
        let mut running: JoinSet<(Target, String, anyhow::Result<Vec<Box<dyn WorkItem>>>)> =
            JoinSet::new();
        let mut active: Vec<Target> = Vec::new();
        // Task id to target, for releasing the right target when a
        // task dies without returning one
        let mut spawned: HashMap<tokio::task::Id, Target> = HashMap::new();
        let mut executed = 0;

        loop {
            // Start everything not conflicting with a running item
            let mut deferred: VecDeque<Box<dyn WorkItem>> = VecDeque::new();
            while let Some(item) = pending.pop_front() {
                let target = item.target();
                if active.contains(&target) {
                    deferred.push_back(item);
                    continue;
                }
                if executed >= MAX_ITEMS_PER_PASS {
                    warn!("item budget exhausted, deferring {}", item.describe());
                    deferred.push_back(item);
                    continue;
                }
                active.push(target);
                executed += 1;
                let ctx = Arc::clone(&self.ctx);
                let handle = running.spawn(async move {
                    let description = item.describe();
                    let result = item.run(&ctx).await;
                    (target, description, result)
                });
                spawned.insert(handle.id(), target);
            }
            pending = deferred;

            let Some(joined) = running.join_next_with_id().await else {
                break;
            };
            match joined {
                Ok((id, (target, description, result))) => {
                    spawned.remove(&id);
                    active.retain(|t| *t != target);
                    match result {
                        Ok(successors) => pending.extend(successors),
                        Err(e) => {
                            error!("{description} failed: {e:#}");
                            // Invalidate the cache entry so the next
                            // pass picks the pull request up again
                            if let Target::PullRequest(number) = target {
                                self.update_cache.remove(&number);
                                self.ctx.state.schedule_retry(
                                    number,
                                    Utc::now()
                                        + ChronoDuration::seconds(
                                            self.ctx.config.tick_interval_secs as i64 * 3,
                                        ),
                                );
                            }
                        }
                    }
                }
                Err(e) => {
                    // Only the dead task's target is released; the
                    // other running items keep their exclusivity
                    error!("work item task panicked: {e}");
                    if let Some(target) = spawned.remove(&e.id()) {
                        active.retain(|t| *t != target);
                    }
                }
            }
        }
        executed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowItem {
        running: Arc<AtomicUsize>,
        overlaps: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WorkItem for SlowItem {
        fn target(&self) -> Target {
            Target::PullRequest(1)
        }

        fn describe(&self) -> String {
            "slow item".to_string()
        }

        async fn run(&self, _ctx: &Arc<BotContext>) -> anyhow::Result<Vec<Box<dyn WorkItem>>> {
            if self.running.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    struct PanickingItem;

    #[async_trait]
    impl WorkItem for PanickingItem {
        fn target(&self) -> Target {
            Target::PullRequest(2)
        }

        fn describe(&self) -> String {
            "panicking item".to_string()
        }

        async fn run(&self, _ctx: &Arc<BotContext>) -> anyhow::Result<Vec<Box<dyn WorkItem>>> {
            panic!("work item died");
        }
    }

    #[tokio::test]
    async fn test_dead_task_releases_only_its_own_target() {
        let setup = setup();
        let mut scheduler = Scheduler::new(setup.ctx.clone());

        // Two items for the same pull request around a task that dies
        // for another one; the death must not let the second item start
        // while the first is still running
        let running = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let items: Vec<Box<dyn WorkItem>> = vec![
            Box::new(SlowItem {
                running: running.clone(),
                overlaps: overlaps.clone(),
            }),
            Box::new(PanickingItem),
            Box::new(SlowItem {
                running: running.clone(),
                overlaps: overlaps.clone(),
            }),
        ];
        let executed = scheduler.execute(items).await;

        assert_eq!(executed, 3);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
