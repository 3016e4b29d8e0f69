//! Error types for payload decoding and identity parsing in leafee-types.

use thiserror::Error;

/// Errors that can occur when decoding Mag payloads or parsing identities.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in leafee-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The payload was empty.
    #[error("Empty payload")]
    Empty,

    /// The payload had an unexpected number of bytes.
    #[error("Unexpected payload length: expected {expected}, got {actual}")]
    UnexpectedLength {
        /// Human-readable description of the accepted lengths.
        expected: &'static str,
        /// Number of bytes actually received.
        actual: usize,
    },

    /// A device address could not be parsed.
    #[error("Invalid device address '{0}'")]
    InvalidAddress(String),
}

/// Result type alias using leafee-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
