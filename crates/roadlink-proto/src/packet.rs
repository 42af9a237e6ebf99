//! Packet type combining a header with raw body bytes.
//!
//! A `Packet` is the unit the transport layer works with: the header is
//! decoded eagerly so the pipeline can route (fragment reassembly, session
//! binding) without touching the body; body decoding happens later via
//! [`Packet::body`].

use bytes::Bytes;

use crate::{
    body::Body,
    codec::{BodyReader, BodyWriter},
    error::{ProtocolError, Result},
    framing,
    header::Header,
};

/// A decoded header plus its raw body bytes.
///
/// # Invariants
///
/// On encode, `header.attr.body_length` is recomputed from the actual body
/// length, so the two cannot disagree on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Decoded message header.
    pub header: Header,
    /// Raw body bytes, not yet decoded.
    pub body: Bytes,
}

impl Packet {
    /// Build a packet from parts. The header's body length is fixed up on
    /// encode, not here.
    #[must_use]
    pub fn new(header: Header, body: impl Into<Bytes>) -> Self {
        Self { header, body: body.into() }
    }

    /// Build an outgoing packet by encoding `body` under the header's
    /// edition.
    pub fn from_body(header: Header, body: &Body) -> Result<Self> {
        let encoded = body.encode(header.version())?;
        Ok(Self { header, body: Bytes::from(encoded) })
    }

    /// Decode a complete on-wire frame (including both flags).
    ///
    /// The body is everything between the header and the checksum. A
    /// declared body length larger than what the frame carries is a decode
    /// failure; a shorter declaration is tolerated and trimmed.
    pub fn decode(wire: &[u8]) -> Result<Self> {
        let unescaped = framing::decode_frame(wire)?;
        let mut reader = BodyReader::new(&unescaped);
        let header = Header::decode(&mut reader)?;

        let declared = header.attr.body_length as usize;
        let rest = reader.read_to_end();
        if declared > rest.len() {
            return Err(ProtocolError::DecodeFailed {
                msg_id: header.msg_id,
                reason: format!(
                    "declared body length {declared} exceeds {} remaining bytes",
                    rest.len()
                ),
            });
        }
        Ok(Self { header, body: Bytes::copy_from_slice(&rest[..declared]) })
    }

    /// Encode to a complete on-wire frame, patching the header's body
    /// length first.
    pub fn encode(&self) -> Result<Bytes> {
        let mut header = self.header.clone();
        header.attr.body_length = self.body.len() as u16;

        let mut writer = BodyWriter::new();
        header.encode(&mut writer)?;
        writer.write_bytes(&self.body);
        Ok(framing::encode_frame(&writer.into_bytes()))
    }

    /// Decode the body under the header's message ID and edition.
    pub fn body(&self) -> Result<Body> {
        Body::decode(self.header.msg_id, self.header.version(), &self.body)
    }
}
