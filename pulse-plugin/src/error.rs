//! Error types for plugin authors

use thiserror::Error;

/// Errors that plugins and the plugin runtime can return
#[derive(Error, Debug)]
pub enum PluginError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The launch argument passed by the control plane was missing or malformed
    #[error("Invalid launch argument: {0}")]
    InvalidArg(String),

    /// A request did not carry this session's token
    #[error("Unauthorized: session token mismatch")]
    Unauthorized,

    /// A request's control signature was missing or did not verify
    #[error("Unauthorized: {0}")]
    InvalidSignature(String),

    /// The control public key could not be decoded
    #[error("Invalid control public key: {0}")]
    InvalidPublicKey(String),

    /// The call is not served by this plugin type
    #[error("{method} is not supported by {plugin_type} plugins")]
    UnsupportedCall { method: String, plugin_type: String },

    /// Logging could not be initialized
    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// Custom error with message
    #[error("{0}")]
    Custom(String),
}

impl PluginError {
    /// Create a custom error with a message
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Whether the error means the caller failed authentication
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::InvalidSignature(_))
    }
}
