//! Control plane configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for a [`crate::PluginManager`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// How long a plugin has to answer the handshake
    pub handshake_timeout_ms: u64,
    /// Upper bound on a single call to a plugin
    pub call_timeout_ms: u64,
    /// Directory plugins write logs to
    pub plugin_log_path: PathBuf,
    /// Whether plugins keep serving after the handshake
    pub run_as_daemon: bool,
    /// Sign plugin tokens with the control key
    pub sign_sessions: bool,
    /// PKCS#8 PEM file for the control key; a fresh key is generated per
    /// process when unset
    pub key_path: Option<PathBuf>,
    /// Ping each plugin on this interval; 0 disables keepalive
    ///
    /// Must stay below the plugins' heartbeat timeout or idle daemons
    /// stop themselves.
    pub ping_interval_ms: Option<u64>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 3000,
            call_timeout_ms: 5000,
            plugin_log_path: pulse_paths::plugin_log_dir(),
            run_as_daemon: true,
            sign_sessions: false,
            key_path: None,
            ping_interval_ms: Some(3000),
        }
    }
}

impl ControlConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        self.ping_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
