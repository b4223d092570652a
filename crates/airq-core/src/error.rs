//! Error types for airq-core.
//!
//! Only caller-facing request failures are reported through [`Error`].
//! Protocol-level failures (a connection that could not be established, a
//! link that dropped) are reported as the terminal
//! [`ConnectionState::Disconnected`](crate::machine::ConnectionState::Disconnected)
//! state carrying a [`DisconnectReason`](crate::events::DisconnectReason), so
//! callers observe them by reading state rather than by catching errors.
//!
//! | Error | Meaning | State change |
//! |-------|---------|--------------|
//! | [`Error::AdapterUnavailable`] | Radio powered off | none |
//! | [`Error::PeripheralNotFound`] | Identifier unknown to the radio layer | none |
//! | [`Error::SessionActive`] | A connection already exists | none |
//! | [`Error::NotConnected`] | Operation needs a connected peripheral | none |
//! | [`Error::MalformedPayload`] | Notification shorter than its layout | none, sample dropped |

use thiserror::Error;

use crate::machine::ConnectionState;
use crate::machine::CharacteristicRole;

/// Errors that can occur when driving the air-quality engine.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error from the platform stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The radio is powered off or no adapter is present.
    #[error("Bluetooth adapter unavailable")]
    AdapterUnavailable,

    /// Connect requested for an identifier the radio layer cannot resolve.
    #[error("Peripheral not found: {0}")]
    PeripheralNotFound(String),

    /// A connection session already exists.
    #[error("A connection is already active (state: {state})")]
    SessionActive {
        /// The state of the existing session.
        state: ConnectionState,
    },

    /// Operation requires a connected peripheral.
    #[error("Not connected to a peripheral")]
    NotConnected,

    /// A characteristic needed for the operation was not discovered.
    #[error("Characteristic not found for role {role:?}")]
    CharacteristicNotFound {
        /// The role that has no resolved characteristic.
        role: CharacteristicRole,
    },

    /// A notification payload could not be decoded.
    #[error(transparent)]
    MalformedPayload(#[from] airq_types::ParseError),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The engine task has stopped and can no longer accept requests.
    #[error("Engine stopped")]
    EngineStopped,

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a peripheral not found error for a specific identifier.
    pub fn peripheral_not_found(identifier: impl Into<String>) -> Self {
        Self::PeripheralNotFound(identifier.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result type alias using airq-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
