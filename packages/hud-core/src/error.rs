//! Centralized error types for the HUD audio fusion server.
//!
//! Per the error taxonomy, almost nothing in the hot per-frame path raises
//! through this type — frame, queue, and connector errors are logged and
//! swallowed at the point they occur (see `ingress`, `stt`, `haptics`).
//! `HudError` exists for the small set of paths that legitimately cross a
//! task boundary: process startup and configuration loading.

use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for status/log output.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the HUD server.
#[derive(Debug, Error)]
pub enum HudError {
    /// Failed to bind the WebSocket listener.
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),

    /// Configuration file could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required setting was missing or invalid at startup.
    #[error("invalid startup configuration: {0}")]
    InvalidStartup(String),
}

impl ErrorCode for HudError {
    fn code(&self) -> &'static str {
        match self {
            Self::Bind(_) => "bind_failed",
            Self::Configuration(_) => "configuration_error",
            Self::InvalidStartup(_) => "invalid_startup_configuration",
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type HudResult<T> = Result<T, HudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_reports_expected_code() {
        let err = HudError::Configuration("missing array geometry".into());
        assert_eq!(err.code(), "configuration_error");
    }
}
