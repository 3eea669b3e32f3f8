//! Event type definitions

use std::path::PathBuf;

use pulse_plugin::PluginType;
use serde::{Deserialize, Serialize};

/// Events emitted by the control plane
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    /// A metric gained a subscriber. `count` is the count after the change.
    MetricSubscription { namespace: Vec<String>, count: u64 },

    /// A metric lost a subscriber. `count` is the count after the change.
    MetricUnsubscription { namespace: Vec<String>, count: u64 },

    /// A plugin completed its handshake and was admitted
    PluginLoaded {
        name: String,
        version: u32,
        plugin_type: PluginType,
        path: PathBuf,
    },

    /// A plugin was removed from the control plane
    PluginUnloaded { name: String, version: u32 },
}

impl ControlEvent {
    /// Dot-joined metric key for subscription events
    pub fn metric_key(&self) -> Option<String> {
        match self {
            Self::MetricSubscription { namespace, .. }
            | Self::MetricUnsubscription { namespace, .. } => Some(namespace.join(".")),
            _ => None,
        }
    }

    /// Plugin name for lifecycle events
    pub fn plugin_name(&self) -> Option<&str> {
        match self {
            Self::PluginLoaded { name, .. } | Self::PluginUnloaded { name, .. } => Some(name),
            _ => None,
        }
    }
}
