//! Plugin types shared across the process boundary
//!
//! Everything in this module is serialized: [`Arg`] travels from the control
//! plane to the plugin as the first command-line argument, and [`Response`]
//! travels back as the first line the plugin writes to stdout.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// Category of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginType {
    /// Produces metrics
    Collector,
    /// Ships metrics somewhere
    Publisher,
    /// Transforms metrics in flight
    Processor,
}

impl PluginType {
    /// Get the type name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collector => "collector",
            Self::Publisher => "publisher",
            Self::Processor => "processor",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity a plugin declares about itself during the handshake
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMeta {
    /// Plugin name (used for identification and log file naming)
    pub name: String,
    /// Plugin version
    pub version: u32,
    /// Capabilities the plugin advertises
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl PluginMeta {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            capabilities: Vec::new(),
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

/// Launch configuration the control plane hands to a plugin process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arg {
    /// Control plane public key (base64url SEC1 point). When present the
    /// plugin only accepts calls signed by the matching private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_public_key: Option<String>,
    /// Directory the plugin writes its logs to
    pub plugin_log_path: PathBuf,
    /// Keep serving after the handshake. When false the plugin answers the
    /// handshake and exits.
    pub run_as_daemon: bool,
}

impl Arg {
    pub fn new(plugin_log_path: impl Into<PathBuf>, run_as_daemon: bool) -> Self {
        Self {
            control_public_key: None,
            plugin_log_path: plugin_log_path.into(),
            run_as_daemon,
        }
    }

    pub fn with_control_public_key(mut self, key: impl Into<String>) -> Self {
        self.control_public_key = Some(key.into());
        self
    }

    /// Encode for passing on a command line
    pub fn to_json(&self) -> Result<String, PluginError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode an argument produced by [`Arg::to_json`]
    pub fn from_json(raw: &str) -> Result<Self, PluginError> {
        serde_json::from_str(raw).map_err(|e| PluginError::InvalidArg(e.to_string()))
    }

    /// Parse the argument from a process argument list (`argv[1]`)
    pub fn from_args<I>(args: I) -> Result<Self, PluginError>
    where
        I: IntoIterator<Item = String>,
    {
        let raw = args
            .into_iter()
            .nth(1)
            .ok_or_else(|| PluginError::InvalidArg("missing launch argument".to_string()))?;
        Self::from_json(&raw)
    }

    /// Parse the argument from this process's command line
    pub fn from_env_args() -> Result<Self, PluginError> {
        Self::from_args(std::env::args())
    }
}

/// Outcome reported in a handshake response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseState {
    Success,
    Failure,
}

/// Self-description a plugin writes to stdout once it has started
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub meta: PluginMeta,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    pub state: ResponseState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Credential generated by the plugin
    #[serde(default)]
    pub token: String,
    /// Address the plugin serves RPC on (absent for non-daemon runs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_address: Option<String>,
}

impl Response {
    pub fn success(
        meta: PluginMeta,
        plugin_type: PluginType,
        token: impl Into<String>,
        listen_address: Option<String>,
    ) -> Self {
        Self {
            meta,
            plugin_type,
            state: ResponseState::Success,
            error_message: None,
            token: token.into(),
            listen_address,
        }
    }

    pub fn failure(meta: PluginMeta, plugin_type: PluginType, message: impl Into<String>) -> Self {
        Self {
            meta,
            plugin_type,
            state: ResponseState::Failure,
            error_message: Some(message.into()),
            token: String::new(),
            listen_address: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == ResponseState::Success
    }

    /// Encode as a single line (no trailing newline)
    pub fn to_line(&self) -> Result<String, PluginError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A metric value flowing through collectors, processors and publishers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetric {
    pub namespace: Vec<String>,
    pub data: serde_json::Value,
}

impl PluginMetric {
    pub fn new<S: AsRef<str>>(namespace: &[S], data: impl Into<serde_json::Value>) -> Self {
        Self {
            namespace: namespace.iter().map(|s| s.as_ref().to_string()).collect(),
            data: data.into(),
        }
    }

    /// Dot-joined namespace
    pub fn key(&self) -> String {
        self.namespace.join(".")
    }
}

/// A metric a collector can produce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricType {
    pub namespace: Vec<String>,
    pub last_advertised: DateTime<Utc>,
}

impl MetricType {
    pub fn new<S: AsRef<str>>(namespace: &[S]) -> Self {
        Self {
            namespace: namespace.iter().map(|s| s.as_ref().to_string()).collect(),
            last_advertised: Utc::now(),
        }
    }
}
