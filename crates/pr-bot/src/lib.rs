//! Pull request governance bot
//!
//! The bot watches pull requests on a forge, evaluates them against a
//! review policy, extracts and executes slash commands from comments,
//! reconciles state labels and performs the final integration push.
//!
//! Everything the bot knows is reconstructed from the forge on every
//! pass: comments carry durable markers, check runs carry a fingerprint
//! of the evaluated state. There is no local database, so a crashed or
//! restarted instance resumes cleanly.

pub mod census;
pub mod check;
pub mod commands;
pub mod context;
pub mod fingerprint;
pub mod integration_lock;
pub mod logger;
pub mod repo;
pub mod scheduler;
pub mod tracker;
pub mod trackers;
pub mod work_item;

#[cfg(test)]
mod test_support;

pub use context::BotContext;
pub use scheduler::Scheduler;
pub use work_item::WorkItem;
