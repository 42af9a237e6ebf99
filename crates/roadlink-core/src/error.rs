//! Core error types.

use roadlink_proto::ProtocolError;
use thiserror::Error;

/// Errors from session, device and correlation state.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No live session with this id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// No registered device with this phone.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// A command with the same correlation key is already awaiting its
    /// response.
    #[error("command already in flight for {phone} msg {msg_id:#06x} serial {serial}")]
    DuplicateInflight {
        /// Target terminal phone.
        phone: String,
        /// Request message id.
        msg_id: u16,
        /// Request serial number.
        serial: u16,
    },

    /// An incomplete fragment group expired.
    #[error("fragment group for msg {msg_id:#06x} timed out with {missing} slots empty")]
    FragmentTimeout {
        /// Original message id of the group.
        msg_id: u16,
        /// Unfilled slots at eviction.
        missing: usize,
    },

    /// The peer went away (EOF, reset, or forced close).
    #[error("connection closed")]
    ConnectionClosed,

    /// A wire codec error bubbled up.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
