use super::types::{PluginsConfig, PulseConfig, RawControlConfig, RawPluginsConfig, RawPulseConfig};
use anyhow::{Context, Result};
use pulse_control::ControlConfig;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user, then project, then `extra`)
    pub fn load(extra: Option<&Path>) -> Result<PulseConfig> {
        let mut raw = RawPulseConfig::default();

        // Layer 1: User config
        let user_path = Self::user_config_path();
        if user_path.exists() {
            raw = Self::merge_raw(raw, Self::read_raw(&user_path)?);
        }

        // Layer 2: Project config
        let project_path = Self::project_config_path();
        if project_path.exists() {
            raw = Self::merge_raw(raw, Self::read_raw(&project_path)?);
        }

        // Layer 3: --config, which must exist when given
        if let Some(path) = extra {
            raw = Self::merge_raw(raw, Self::read_raw(path)?);
        }

        Ok(Self::finalize(raw))
    }

    /// Get user config path (`$XDG_CONFIG_HOME/pulse/config.toml`)
    pub fn user_config_path() -> PathBuf {
        pulse_paths::config_dir().join("config.toml")
    }

    /// Get project config path
    /// Can be overridden with PULSE_PROJECT_CONFIG_DIR env var (useful for isolated tests)
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("PULSE_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".pulse/config.toml")
        }
    }

    fn read_raw(path: &Path) -> Result<RawPulseConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawPulseConfig, overlay: RawPulseConfig) -> RawPulseConfig {
        RawPulseConfig {
            control: RawControlConfig {
                handshake_timeout_ms: overlay
                    .control
                    .handshake_timeout_ms
                    .or(base.control.handshake_timeout_ms),
                call_timeout_ms: overlay
                    .control
                    .call_timeout_ms
                    .or(base.control.call_timeout_ms),
                plugin_log_path: overlay
                    .control
                    .plugin_log_path
                    .or(base.control.plugin_log_path),
                run_as_daemon: overlay.control.run_as_daemon.or(base.control.run_as_daemon),
                sign_sessions: overlay.control.sign_sessions.or(base.control.sign_sessions),
                key_path: overlay.control.key_path.or(base.control.key_path),
                ping_interval_ms: overlay
                    .control
                    .ping_interval_ms
                    .or(base.control.ping_interval_ms),
            },
            plugins: RawPluginsConfig {
                autoload: overlay.plugins.autoload.or(base.plugins.autoload),
            },
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawPulseConfig) -> PulseConfig {
        let defaults = ControlConfig::default();
        PulseConfig {
            control: ControlConfig {
                handshake_timeout_ms: raw
                    .control
                    .handshake_timeout_ms
                    .unwrap_or(defaults.handshake_timeout_ms),
                call_timeout_ms: raw
                    .control
                    .call_timeout_ms
                    .unwrap_or(defaults.call_timeout_ms),
                plugin_log_path: raw
                    .control
                    .plugin_log_path
                    .unwrap_or(defaults.plugin_log_path),
                run_as_daemon: raw.control.run_as_daemon.unwrap_or(defaults.run_as_daemon),
                sign_sessions: raw.control.sign_sessions.unwrap_or(defaults.sign_sessions),
                key_path: raw.control.key_path.or(defaults.key_path),
                ping_interval_ms: raw.control.ping_interval_ms.or(defaults.ping_interval_ms),
            },
            plugins: PluginsConfig {
                autoload: raw.plugins.autoload.unwrap_or_default(),
            },
        }
    }
}
