//! Error types for pulse-control

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of a [`ControlError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The control subsystem was not in a state to accept the operation
    Precondition,
    /// The plugin process could not be started
    Spawn,
    /// The plugin did not answer the handshake in time
    HandshakeTimeout,
    /// The plugin answered the handshake with a failure
    HandshakeRejected,
    /// The handshake broke down for any other reason
    HandshakeFailed,
    /// More unsubscribes than subscribes for a metric
    SubscriptionUnderflow,
    /// A call to a running plugin failed
    RpcCall,
    /// A plugin lifecycle operation was not valid
    Lifecycle,
    /// Control keypair problem
    Security,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Precondition => "precondition",
            Self::Spawn => "spawn",
            Self::HandshakeTimeout => "handshake_timeout",
            Self::HandshakeRejected => "handshake_rejected",
            Self::HandshakeFailed => "handshake_failed",
            Self::SubscriptionUnderflow => "subscription_underflow",
            Self::RpcCall => "rpc_call",
            Self::Lifecycle => "lifecycle",
            Self::Security => "security",
        };
        f.write_str(name)
    }
}

/// Top-level error type for pulse-control
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Control subsystem not started")]
    NotStarted,

    #[error("Failed to spawn plugin {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Plugins are not supported on {0}")]
    UnsupportedPlatform(&'static str),

    #[error("Plugin {path} did not complete the handshake within {timeout_ms}ms")]
    HandshakeTimeout { path: PathBuf, timeout_ms: u64 },

    #[error("Plugin {path} rejected the handshake: {message}")]
    HandshakeRejected { path: PathBuf, message: String },

    #[error("Plugin {path} exited before the handshake (status {code:?})")]
    PluginExited { path: PathBuf, code: Option<i32> },

    #[error("Handshake with {path} failed: {source}")]
    HandshakeTransport {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Plugin {path} sent an invalid handshake response: {message}")]
    InvalidResponse { path: PathBuf, message: String },

    #[error("Plugin {path} did not provide a session token")]
    MissingToken { path: PathBuf },

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    Rpc(#[from] RpcCallError),

    #[error("Plugin already loaded: {name} v{version}")]
    AlreadyLoaded { name: String, version: u32 },

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Control key error: {0}")]
    Key(String),
}

impl ControlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotStarted => ErrorKind::Precondition,
            Self::Spawn { .. } | Self::UnsupportedPlatform(_) => ErrorKind::Spawn,
            Self::HandshakeTimeout { .. } => ErrorKind::HandshakeTimeout,
            Self::HandshakeRejected { .. } => ErrorKind::HandshakeRejected,
            Self::PluginExited { .. }
            | Self::HandshakeTransport { .. }
            | Self::InvalidResponse { .. }
            | Self::MissingToken { .. } => ErrorKind::HandshakeFailed,
            Self::Subscription(_) => ErrorKind::SubscriptionUnderflow,
            Self::Rpc(_) => ErrorKind::RpcCall,
            Self::AlreadyLoaded { .. }
            | Self::NotFound(_)
            | Self::InvalidStateTransition { .. } => ErrorKind::Lifecycle,
            Self::Key(_) => ErrorKind::Security,
        }
    }

    /// Whether the error came out of the handshake
    pub fn is_handshake(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::HandshakeTimeout | ErrorKind::HandshakeRejected | ErrorKind::HandshakeFailed
        )
    }
}

/// Errors from the subscription registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("Subscription underflow: {key} has no subscribers")]
    Underflow { key: String },
}

/// A call to a plugin that did not succeed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{call} call error: {cause}")]
pub struct RpcCallError {
    /// Call name (`Publish`, `CollectMetrics`, ...)
    pub call: &'static str,
    pub cause: String,
}

impl RpcCallError {
    pub fn new(call: &'static str, cause: impl fmt::Display) -> Self {
        Self {
            call,
            cause: cause.to_string(),
        }
    }
}
