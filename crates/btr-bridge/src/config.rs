//! Centralized configuration for the bridge.
//!
//! Constants for procedure naming, the value codec, HTTP behavior and the
//! TCP transport, plus the [`Context`] capability resolved once at startup.

use reqwest::StatusCode;
use std::time::Duration;

/// Procedure naming and codec markers.
pub struct BridgeConfig;

impl BridgeConfig {
    pub const DEFAULT_NAMESPACE: &'static str = "RobloxApi";
    pub const IDENTITY_SEPARATOR: char = '.';
    pub const TYPE_MARKER_KEY: &'static str = "__btrType";
    pub const PLACEHOLDER_PREFIX: &'static str = "$btr_async_value_";
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const USER_AGENT: &'static str = "BTR-Bridge/0.1";
    pub const XSRF_HEADER: &'static str = "X-CSRF-TOKEN";
    pub const XSRF_REJECTED_STATUS: StatusCode = StatusCode::FORBIDDEN;
}

/// TCP transport limits.
pub struct IpcConfig;

impl IpcConfig {
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024; // 64MB
    pub const MAX_CONNECTIONS: usize = 32;
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
}

/// Which side of the bridge this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// UI-facing; can only proxy calls.
    Foreground,
    /// Holds credentials and registers procedures.
    Background,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Foreground => "foreground",
            Role::Background => "background",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Execution context capability, resolved once and injected into the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub role: Role,
    /// Transport carries structured binary values, so the codec passes them through.
    pub transport_supports_binary: bool,
}

impl Context {
    pub fn foreground() -> Self {
        Self {
            role: Role::Foreground,
            transport_supports_binary: false,
        }
    }

    pub fn background() -> Self {
        Self {
            role: Role::Background,
            transport_supports_binary: false,
        }
    }

    pub fn with_binary_transport(mut self, supported: bool) -> Self {
        self.transport_supports_binary = supported;
        self
    }

    pub fn is_background(&self) -> bool {
        self.role == Role::Background
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_defaults_to_text_payloads() {
        assert!(!Context::foreground().transport_supports_binary);
        assert!(Context::background().is_background());
        assert!(Context::background().with_binary_transport(true).transport_supports_binary);
    }

    #[test]
    fn test_ipc_limits_are_reasonable() {
        assert!(IpcConfig::MAX_MESSAGE_SIZE > 1024);
        assert!(IpcConfig::CONNECT_TIMEOUT > Duration::ZERO);
    }
}
