//! Path utilities for encore configuration and state files

use std::path::PathBuf;

/// Get the default configuration directory
///
/// Returns: `~/.config/encore` (platform equivalent via `dirs`)
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("encore")
}

/// Get the default config file path for a given file name
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}

/// Get the default location of the persisted playback state
///
/// Returns: `~/.local/share/encore/state.yaml` (platform equivalent)
pub fn default_state_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("encore"))
        .unwrap_or_else(default_config_dir)
        .join("state.yaml")
}
