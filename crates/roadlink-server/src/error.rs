//! Server error types.

use std::fmt;

use roadlink_core::CoreError;
use roadlink_proto::ProtocolError;

/// Errors that can occur in the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, bad tunables).
    ///
    /// Fatal; fix the configuration and restart.
    Config(String),

    /// Transport/network error (bind failure, I/O error).
    ///
    /// May be transient (network issues) or fatal (address in use).
    Transport(String),

    /// Wire codec error.
    ///
    /// The frame or body was malformed. Fatal for that frame; the
    /// connection survives.
    Protocol(ProtocolError),

    /// Session/device/correlation state error.
    Core(CoreError),

    /// A message handler failed.
    ///
    /// The terminal receives a generic ack with result 1.
    HandlerFailed(String),

    /// A server-initiated command got no response in time.
    ///
    /// The pending entry has been evicted; the same command may be sent
    /// again.
    Timeout {
        /// Target terminal phone.
        phone: String,
        /// Message id of the unanswered request.
        msg_id: u16,
    },

    /// The terminal's connection went away mid-exchange.
    ConnectionClosed,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(err) => write!(f, "protocol error: {err}"),
            Self::Core(err) => write!(f, "core error: {err}"),
            Self::HandlerFailed(msg) => write!(f, "handler failed: {msg}"),
            Self::Timeout { phone, msg_id } => {
                write!(f, "command {msg_id:#06x} to {phone} timed out")
            }
            Self::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(err) => Some(err),
            Self::Core(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<CoreError> for ServerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionClosed => Self::ConnectionClosed,
            other => Self::Core(other),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
