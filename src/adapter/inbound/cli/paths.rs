//! Default file locations.
//!
//! User files live under `~/.tradeline/`:
//! - `~/.tradeline/config.toml` - main configuration

use std::path::PathBuf;

/// Returns the tradeline home directory (`~/.tradeline/`).
pub fn home_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tradeline")
}

/// Returns the default config file path (`~/.tradeline/config.toml`).
pub fn default_config() -> PathBuf {
    home_dir().join("config.toml")
}
