//! Configuration and data directory paths
//!
//! Uses XDG directories via `dirs` crate with fallbacks.
//!
//! Platform-specific locations:
//! - Linux: `~/.config/pr-bot/`, `~/.cache/pr-bot/`
//! - macOS: `~/Library/Application Support/pr-bot/`, `~/Library/Caches/pr-bot/`

use anyhow::{Context, Result};
use std::path::PathBuf;

const APP_NAME: &str = "pr-bot";

/// Get the application config directory
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("Could not determine config directory")?;
    let dir = base.join(APP_NAME);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Get the application cache directory
pub fn cache_dir() -> Result<PathBuf> {
    let base = dirs::cache_dir().context("Could not determine cache directory")?;
    let dir = base.join(APP_NAME);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Get the scratch directory used for per-work-item local repository
/// materialization. Each work item derives its own subdirectory, so
/// concurrent items never share a working tree.
pub fn scratch_dir() -> Result<PathBuf> {
    let dir = cache_dir()?.join("scratch");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_exists() {
        let dir = config_dir().unwrap();
        assert!(dir.exists());
        assert!(dir.ends_with(APP_NAME));
    }

    #[test]
    fn test_scratch_dir_under_cache() {
        let dir = scratch_dir().unwrap();
        assert!(dir.exists());
        assert!(dir.starts_with(cache_dir().unwrap()));
    }
}
