//! Error types for payload decoding in airq-types.

use thiserror::Error;

/// Errors that can occur when decoding sensor payloads.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in airq-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The payload is shorter than its field layout requires.
    #[error("Malformed {layout} payload: requires {expected} bytes, got {actual}")]
    MalformedPayload {
        /// Name of the layout being decoded.
        layout: &'static str,
        /// Minimum number of bytes the layout requires.
        expected: usize,
        /// Number of bytes received.
        actual: usize,
    },
}

/// Result type alias using airq-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
