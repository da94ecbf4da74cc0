//! Error types
//!
//! [`NativeError`] is what the native collaborator reports. [`TransportError`]
//! is what the transport layer hands back to callers; apart from
//! [`TransportError::DisconnectedDuringOperation`] and the state errors, every
//! variant carries the native error unchanged.

use std::fmt;
use thiserror::Error;

/// Error reported by the native device-access layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct NativeError {
    pub message: String,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Session state that rejected an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidState {
    /// A close() has been accepted and is still running
    Closing,
    /// The session handle has been released
    Closed,
}

impl fmt::Display for InvalidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closing => f.write_str("session closing"),
            Self::Closed => f.write_str("session closed"),
        }
    }
}

/// Errors surfaced by the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("{0}")]
    Enumeration(NativeError),

    #[error("{0}")]
    Open(NativeError),

    /// The device went away while an exchange was running
    #[error("Device disconnected during operation: {0}")]
    DisconnectedDuringOperation(String),

    #[error("{0}")]
    Exchange(NativeError),

    #[error("{0}")]
    Close(NativeError),

    /// Error event surfaced by the platform hot-plug source
    #[error("{0}")]
    Notification(NativeError),

    /// A subscriber fell behind the live feed and missed events
    #[error("Missed {0} device events")]
    Lagged(u64),

    #[error("Invalid session state: {0}")]
    InvalidState(InvalidState),

    #[error("No device found")]
    NoDeviceFound,

    #[error("Transport not supported in this environment")]
    Unsupported,
}

impl TransportError {
    /// True when the error means the device was unplugged mid-command
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::DisconnectedDuringOperation(_))
    }

    /// The native message, for variants that carry one
    pub fn native_message(&self) -> Option<&str> {
        match self {
            Self::Enumeration(e)
            | Self::Open(e)
            | Self::Exchange(e)
            | Self::Close(e)
            | Self::Notification(e) => Some(&e.message),
            Self::DisconnectedDuringOperation(message) => Some(message),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_errors_display_verbatim() {
        let err = TransportError::Open(NativeError::new("device busy"));
        assert_eq!(err.to_string(), "device busy");
        assert_eq!(err.native_message(), Some("device busy"));
    }

    #[test]
    fn test_disconnect_error() {
        let err = TransportError::DisconnectedDuringOperation("I/O error".to_string());
        assert!(err.is_disconnect());
        assert!(err.to_string().contains("I/O error"));
        assert!(!TransportError::Exchange(NativeError::new("I/O error")).is_disconnect());
    }

    #[test]
    fn test_lagged_has_no_native_message() {
        let err = TransportError::Lagged(3);
        assert_eq!(err.to_string(), "Missed 3 device events");
        assert_eq!(err.native_message(), None);
    }

    #[test]
    fn test_invalid_state_display() {
        let msg = TransportError::InvalidState(InvalidState::Closing).to_string();
        assert!(msg.contains("session closing"));
    }
}
