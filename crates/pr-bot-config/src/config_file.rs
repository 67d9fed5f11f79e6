use std::{env, path::PathBuf};

const CONFIG_FILE: &str = "pr-bot.toml";
const HOME_CONFIG_FILE: &str = ".pr-bot.toml";

/// Load config file content from CWD first, then home directory
///
/// Searches for pr-bot.toml in:
/// 1. Current working directory
/// 2. Home directory as .pr-bot.toml
///
/// Returns the file content if found, None otherwise.
pub fn load_config_file() -> Option<String> {
    // Try current directory first
    if let Ok(content) = std::fs::read_to_string(CONFIG_FILE) {
        log::debug!("Loaded config from {}", CONFIG_FILE);
        return Some(content);
    }

    // Try home directory
    if let Some(home_config) = get_home_config_path() {
        if let Ok(content) = std::fs::read_to_string(&home_config) {
            log::debug!("Loaded config from {}", home_config.display());
            return Some(content);
        }
    }

    None
}

/// Get the path to the config file in the home directory
fn get_home_config_path() -> Option<PathBuf> {
    env::var_os("HOME").map(|home| PathBuf::from(home).join(HOME_CONFIG_FILE))
}
