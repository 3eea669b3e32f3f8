//! Records of plugins known to the control plane

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pulse_plugin::{PluginMeta, PluginType, Response};
use serde::Serialize;

use crate::error::ControlError;

/// Lifecycle state of a plugin record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// A load was requested, nothing has been spawned yet
    Detected,
    /// The process is running and the handshake is in progress
    Loading,
    /// The handshake succeeded
    Loaded,
    /// The plugin was removed
    Unloaded,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Unloaded => "unloaded",
        }
    }

    /// Whether a record may move from `self` to `next`
    pub fn can_transition_to(&self, next: PluginState) -> bool {
        matches!(
            (self, next),
            (Self::Detected, Self::Loading)
                | (Self::Loading, Self::Loaded)
                | (Self::Loaded, Self::Unloaded)
        )
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plugin as seen by the control plane
#[derive(Debug, Clone, Serialize)]
pub struct LoadedPlugin {
    pub meta: PluginMeta,
    pub path: PathBuf,
    /// Known once the handshake succeeds
    pub plugin_type: Option<PluginType>,
    pub state: PluginState,
    /// Credential generated by the plugin
    #[serde(skip_serializing)]
    pub token: String,
    pub loaded_time: Option<DateTime<Utc>>,
    pub listen_address: Option<String>,
}

impl LoadedPlugin {
    /// Stub record for a plugin about to be launched
    pub fn detected(path: impl AsRef<Path>) -> Self {
        Self {
            meta: PluginMeta::default(),
            path: path.as_ref().to_path_buf(),
            plugin_type: None,
            state: PluginState::Detected,
            token: String::new(),
            loaded_time: None,
            listen_address: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn is_loaded(&self) -> bool {
        self.state == PluginState::Loaded
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition(&mut self, next: PluginState) -> Result<(), ControlError> {
        if !self.state.can_transition_to(next) {
            return Err(ControlError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Fill in what the plugin reported and mark the record loaded
    pub fn admit(&mut self, response: Response) -> Result<(), ControlError> {
        self.transition(PluginState::Loaded)?;
        self.meta = response.meta;
        self.plugin_type = Some(response.plugin_type);
        self.token = response.token;
        self.listen_address = response.listen_address;
        self.loaded_time = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> Response {
        Response::success(
            PluginMeta::new("mock", 1),
            PluginType::Collector,
            "tok",
            Some("127.0.0.1:9".into()),
        )
    }

    #[test]
    fn detected_record_is_a_stub() {
        let record = LoadedPlugin::detected("/opt/plugins/mock");
        assert_eq!(record.state, PluginState::Detected);
        assert!(record.plugin_type.is_none());
        assert!(record.token.is_empty());
        assert!(record.loaded_time.is_none());
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        let mut record = LoadedPlugin::detected("/p");
        record.transition(PluginState::Loading).unwrap();
        record.admit(response()).unwrap();
        record.transition(PluginState::Unloaded).unwrap();

        let err = record.transition(PluginState::Loaded).unwrap_err();
        assert!(err.to_string().contains("from unloaded to loaded"));
    }

    #[test]
    fn admit_requires_loading() {
        let mut record = LoadedPlugin::detected("/p");
        assert!(record.admit(response()).is_err());
        assert_eq!(record.state, PluginState::Detected);
        assert!(record.token.is_empty());
    }

    #[test]
    fn admit_populates_record() {
        let before = Utc::now();
        let mut record = LoadedPlugin::detected("/p");
        record.transition(PluginState::Loading).unwrap();
        record.admit(response()).unwrap();

        assert!(record.is_loaded());
        assert_eq!(record.name(), "mock");
        assert_eq!(record.plugin_type, Some(PluginType::Collector));
        assert_eq!(record.token, "tok");
        assert!(record.loaded_time.unwrap() >= before);
    }

    #[test]
    fn token_is_not_serialized() {
        let mut record = LoadedPlugin::detected("/p");
        record.token = "secret".into();
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"state\":\"detected\""));
    }
}
