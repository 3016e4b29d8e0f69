//! Error types for leafee-core.
//!
//! This module defines the errors that BLE operations against a Mag can
//! produce. None of them ever reach the host platform: the connection
//! manager turns every failure into a "retry later" outcome recorded in a
//! [`crate::ConnectReport`].
//!
//! # Error Handling Policy
//!
//! | Error | Where it shows up | What happens |
//! |-------|-------------------|--------------|
//! | [`Error::Timeout`] | scan, connect, read | Attempt aborted (or read ignored), retried on a later poll |
//! | [`Error::Bluetooth`] | any adapter call | Same as timeout |
//! | [`Error::DeviceNotFound`] | scan, connect | Attempt aborted, retried after the retry interval |
//! | [`Error::CharacteristicNotFound`] | read, subscribe | Read ignored; subscribe failure aborts the attempt |
//! | [`Error::InvalidData`] | payload decode | Notification dropped, previous state kept |
//! | [`Error::NotConnected`] | operations on a released handle | Swallowed on disconnect |

use std::time::Duration;

use thiserror::Error;

/// Errors raised by adapter calls and payload handling.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Error from the btleplug stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The device could not be located.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// The connection was already released.
    #[error("Not connected to device")]
    NotConnected,

    /// A characteristic the Mag should expose is missing.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// A payload could not be decoded.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A bounded operation ran out of time.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// The connect call was refused.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// The device address that failed to connect.
        device_id: Option<String>,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// Options failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Why a connect call failed before reaching the device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// The backend cannot connect with the requested address type.
    UnsupportedAddressType,
    /// Anything else, with a description.
    Other(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedAddressType => write!(f, "address type not supported"),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Why a device could not be located.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// No peripheral with this address.
    NotFound { identifier: String },
    /// Scan finished without seeing the device.
    ScanTimeout { duration: Duration },
    /// The host has no Bluetooth adapter.
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { identifier } => write!(f, "device '{}' not found", identifier),
            Self::ScanTimeout { duration } => write!(f, "scan timed out after {:?}", duration),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            identifier: identifier.into(),
        })
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a connection failure with structured reason.
    pub fn connection_failed(device_id: Option<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed { device_id, reason }
    }
}

impl From<leafee_types::ParseError> for Error {
    fn from(err: leafee_types::ParseError) -> Self {
        Error::InvalidData(err.to_string())
    }
}

/// Result alias for adapter and connection operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::device_not_found("AA:BB:CC:DD:EE:FF");
        assert!(err.to_string().contains("AA:BB:CC:DD:EE:FF"));

        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected to device");

        let err = Error::characteristic_not_found("0x2A19", 3);
        assert!(err.to_string().contains("0x2A19"));
        assert!(err.to_string().contains("3 services"));

        let err = Error::timeout("connect", Duration::from_secs(10));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("10s"));
    }

    #[test]
    fn test_device_not_found_reasons() {
        let err = Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter);
        assert!(err.to_string().contains("no Bluetooth adapter"));

        let err = Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
            duration: Duration::from_secs(10),
        });
        assert!(err.to_string().contains("10s"));
    }

    #[test]
    fn test_connection_failed_display() {
        let err = Error::connection_failed(
            Some("AA:BB:CC:DD:EE:FF".to_string()),
            ConnectionFailureReason::UnsupportedAddressType,
        );
        assert_eq!(
            err.to_string(),
            "Connection failed: address type not supported"
        );
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: Error = leafee_types::ParseError::Empty.into();
        assert!(matches!(err, Error::InvalidData(_)));
        assert!(err.to_string().contains("Empty payload"));
    }

    #[test]
    fn test_btleplug_error_conversion() {
        // btleplug::Error has no public constructors for most variants
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }
}
