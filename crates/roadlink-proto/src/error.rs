//! Protocol error types.

use thiserror::Error;

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding JT/T 808 wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The buffer holds no complete flag-delimited frame.
    #[error("no frame flag (0x7e) delimits the buffer")]
    FlagMissing,

    /// An escape byte (0x7d) was followed by something other than 0x01/0x02,
    /// or a bare flag byte appeared inside the escaped region.
    #[error("invalid escape sequence at offset {0}")]
    EscapeInvalid(usize),

    /// XOR checksum over header+body did not match the trailing byte.
    #[error("checksum mismatch: computed {computed:#04x}, frame carried {carried:#04x}")]
    ChecksumMismatch {
        /// XOR over the unescaped header+body bytes.
        computed: u8,
        /// Checksum byte carried on the wire.
        carried: u8,
    },

    /// A read ran past the end of the input.
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the read required.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// Header fields overran the frame or were internally inconsistent.
    #[error("invalid message header: {0}")]
    InvalidHeader(&'static str),

    /// A protocol version outside {2011, 2013, 2019}.
    #[error("unknown protocol version {0}")]
    VersionUnknown(u8),

    /// A BCD field contained a nibble above 9, or a non-digit was written.
    #[error("invalid BCD digit in {0:?}")]
    InvalidBcd(String),

    /// A string field was not valid GBK (or could not be represented in GBK).
    #[error("string is not valid GBK: {0}")]
    DecodeString(String),

    /// The message body did not match its declared layout.
    #[error("failed to decode body of message {msg_id:#06x}: {reason}")]
    DecodeFailed {
        /// Message the body belongs to.
        msg_id: u16,
        /// What went wrong.
        reason: String,
    },

    /// No codec entry exists for this message ID.
    #[error("unsupported message id {0:#06x}")]
    UnsupportedMsgId(u16),

    /// No codec entry exists for this parameter ID (fatal on encode only).
    #[error("unknown parameter id {0:#06x}")]
    UnknownParamId(u32),

    /// A fragment index of 0 or above the declared total.
    #[error("fragment index {index} out of range 1..={total}")]
    InvalidFragment {
        /// 1-based index carried on the wire.
        index: u16,
        /// Declared number of fragments.
        total: u16,
    },
}

impl ProtocolError {
    /// Wrap a lower-level codec error as a body-decode failure for `msg_id`.
    #[must_use]
    pub fn body(msg_id: u16, inner: &ProtocolError) -> Self {
        Self::DecodeFailed { msg_id, reason: inner.to_string() }
    }
}
