//! XDG Base Directory paths for pulse.
//!
//! The control plane and its plugins use XDG paths on every platform, so a
//! plugin log or config file lives in the same place on Linux and macOS.

use std::path::PathBuf;

const APP: &str = "pulse";

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    if let Ok(dir) = std::env::var(var) {
        PathBuf::from(dir).join(APP)
    } else if let Some(home) = dirs::home_dir() {
        home.join(fallback).join(APP)
    } else {
        PathBuf::from(fallback).join(APP)
    }
}

/// Get the pulse config directory.
///
/// Returns `$XDG_CONFIG_HOME/pulse` if set, otherwise `~/.config/pulse`.
///
/// # Examples
///
/// ```
/// use pulse_paths::config_dir;
///
/// let config_file = config_dir().join("config.toml");
/// ```
pub fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

/// Directory plugins write their log files to.
///
/// Returns `$XDG_STATE_HOME/pulse/plugins` if set, otherwise
/// `~/.local/state/pulse/plugins`.
pub fn plugin_log_dir() -> PathBuf {
    xdg_dir("XDG_STATE_HOME", ".local/state").join("plugins")
}
