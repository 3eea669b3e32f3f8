use pulse_control::ControlConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawPulseConfig {
    #[serde(default)]
    pub control: RawControlConfig,

    #[serde(default)]
    pub plugins: RawPluginsConfig,
}

/// Control settings as stored in TOML (optional fields for proper merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawControlConfig {
    pub handshake_timeout_ms: Option<u64>,
    pub call_timeout_ms: Option<u64>,
    pub plugin_log_path: Option<PathBuf>,
    pub run_as_daemon: Option<bool>,
    pub sign_sessions: Option<bool>,
    pub key_path: Option<PathBuf>,
    pub ping_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawPluginsConfig {
    pub autoload: Option<Vec<PathBuf>>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PulseConfig {
    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub plugins: PluginsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PluginsConfig {
    /// Plugin executables loaded when the control plane starts
    #[serde(default)]
    pub autoload: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = PulseConfig::default();
        assert_eq!(config.control.handshake_timeout_ms, 3000);
        assert!(config.control.run_as_daemon);
        assert!(config.plugins.autoload.is_empty());
    }

    #[test]
    fn test_raw_config_partial_parsing() {
        let toml_str = r#"
[control]
sign_sessions = true
"#;
        let raw: RawPulseConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(raw.control.sign_sessions, Some(true));
        assert!(raw.control.handshake_timeout_ms.is_none());
        assert!(raw.plugins.autoload.is_none());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = PulseConfig::default();
        config.control.ping_interval_ms = Some(2000);
        config.plugins.autoload = vec![PathBuf::from("/opt/pulse/cpu")];

        let toml_str = toml::to_string(&config).unwrap();
        let parsed: PulseConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.control.ping_interval_ms, Some(2000));
        assert_eq!(parsed.plugins.autoload, vec![PathBuf::from("/opt/pulse/cpu")]);
    }
}
