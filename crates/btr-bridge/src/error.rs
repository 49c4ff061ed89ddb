//! Error types for the call bridge.
//!
//! Remote failures only ever carry a message string across the context
//! boundary, so [`RemoteError`] is a plain message wrapper rather than a
//! resurrected error value.

use std::sync::Arc;
use thiserror::Error;

/// A wrapped function failed while executing in the background context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Main error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    // Transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    // Codec errors
    #[error("Parse error: {message}")]
    Parse {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Unsupported value type: {type_name}")]
    UnsupportedType { type_name: String },

    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout")]
    Timeout,

    // File system errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    /// A memoized outcome handed to a caller other than the one that produced it.
    #[error(transparent)]
    Shared(Arc<BridgeError>),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BridgeError::Timeout
        } else {
            BridgeError::Network {
                message: err.to_string(),
                cause: std::error::Error::source(&err).map(|s| s.to_string()),
            }
        }
    }
}

impl BridgeError {
    pub fn transport(message: impl Into<String>) -> Self {
        BridgeError::Transport {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        BridgeError::Parse {
            message: message.into(),
            source: None,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        BridgeError::InvalidParams {
            message: message.into(),
        }
    }

    /// The remote message, if this error (or the memoized error it replays)
    /// came back from the other context.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            BridgeError::Remote(remote) => Some(&remote.message),
            BridgeError::Shared(inner) => inner.remote_message(),
            _ => None,
        }
    }

    /// Convert to a JSON-RPC style error code for the TCP transport.
    ///
    /// - -32700: Parse error
    /// - -32601: Procedure not found
    /// - -32602: Invalid params
    /// - -32000: Network/connectivity error
    /// - -32603: Internal error
    pub fn wire_code(&self) -> i32 {
        match self {
            BridgeError::Parse { .. } | BridgeError::Json { .. } => -32700,
            BridgeError::Transport { .. } => -32601,
            BridgeError::InvalidParams { .. } | BridgeError::UnsupportedType { .. } => -32602,
            BridgeError::Network { .. } | BridgeError::Timeout => -32000,
            BridgeError::Shared(inner) => inner.wire_code(),
            _ => -32603,
        }
    }
}
