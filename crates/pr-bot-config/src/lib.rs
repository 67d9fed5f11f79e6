//! Configuration and file management for pr-bot
//!
//! This crate provides:
//! - File path utilities for config, cache and scratch directories
//! - Configuration file loading (TOML)
//! - Bot configuration (BotConfig)

pub mod bot_config;
pub mod config_file;
pub mod paths;

pub use bot_config::{BotConfig, LabelRule, RepositoryConfig};
pub use config_file::load_config_file;
pub use paths::{cache_dir, config_dir, scratch_dir};
