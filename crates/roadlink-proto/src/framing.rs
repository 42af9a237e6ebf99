//! Frame delimiting, byte escaping and the XOR checksum.
//!
//! On the wire every message is `0x7E <escaped(header || body || checksum)>
//! 0x7E`. Inside the flags, `0x7D` is escaped as `0x7D 0x01` and `0x7E` as
//! `0x7D 0x02`; the checksum is the XOR of all unescaped header+body bytes.

use bytes::{Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// Frame delimiter byte.
pub const FLAG: u8 = 0x7E;

/// Escape introducer byte.
pub const ESCAPE: u8 = 0x7D;

/// XOR of every byte in `data`.
#[must_use]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// Escape every `0x7D`/`0x7E` occurrence in `raw`.
#[must_use]
pub fn escape(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + raw.len() / 8);
    for &b in raw {
        match b {
            ESCAPE => out.extend_from_slice(&[ESCAPE, 0x01]),
            FLAG => out.extend_from_slice(&[ESCAPE, 0x02]),
            _ => out.push(b),
        }
    }
    out
}

/// Reverse [`escape`]. Rejects dangling escapes, unknown escape codes and
/// bare flag bytes inside the escaped region.
pub fn unescape(escaped: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(escaped.len());
    let mut i = 0;
    while i < escaped.len() {
        match escaped[i] {
            ESCAPE => {
                let code = escaped.get(i + 1).ok_or(ProtocolError::EscapeInvalid(i))?;
                match code {
                    0x01 => out.push(ESCAPE),
                    0x02 => out.push(FLAG),
                    _ => return Err(ProtocolError::EscapeInvalid(i)),
                }
                i += 2;
            }
            FLAG => return Err(ProtocolError::EscapeInvalid(i)),
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Ok(out)
}

/// Wrap an unescaped header+body into a complete on-wire frame.
///
/// Appends the XOR checksum, escapes, and adds the delimiting flags.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut unescaped = Vec::with_capacity(payload.len() + 1);
    unescaped.extend_from_slice(payload);
    unescaped.push(checksum(payload));

    let escaped = escape(&unescaped);
    let mut frame = Vec::with_capacity(escaped.len() + 2);
    frame.push(FLAG);
    frame.extend_from_slice(&escaped);
    frame.push(FLAG);
    Bytes::from(frame)
}

/// Unwrap a complete on-wire frame back to its unescaped header+body.
///
/// `frame` must include both delimiting flags.
///
/// # Errors
///
/// - [`ProtocolError::FlagMissing`] if either delimiter is absent
/// - [`ProtocolError::EscapeInvalid`] on malformed escape sequences
/// - [`ProtocolError::ChecksumMismatch`] if the trailing XOR does not match
pub fn decode_frame(frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() < 2 || frame[0] != FLAG || frame[frame.len() - 1] != FLAG {
        return Err(ProtocolError::FlagMissing);
    }

    let mut unescaped = unescape(&frame[1..frame.len() - 1])?;
    let carried = unescaped.pop().ok_or(ProtocolError::FlagMissing)?;

    let computed = checksum(&unescaped);
    if computed != carried {
        return Err(ProtocolError::ChecksumMismatch { computed, carried });
    }
    Ok(unescaped)
}

/// Pull the next complete flag-delimited frame out of a read buffer.
///
/// Leading bytes before the first flag are discarded as line noise, and
/// empty frames (back-to-back flags, which some terminals emit between
/// messages) are skipped. Returns the raw frame including both flags, or
/// `None` when the buffer holds no complete frame yet.
pub fn next_frame(buf: &mut BytesMut) -> Option<Bytes> {
    loop {
        let start = buf.iter().position(|&b| b == FLAG)?;
        if start > 0 {
            let _ = buf.split_to(start);
        }

        let end = buf[1..].iter().position(|&b| b == FLAG)? + 1;
        if end == 1 {
            // Adjacent flags carry no frame; the second one may open the
            // next message.
            let _ = buf.split_to(1);
            continue;
        }
        return Some(buf.split_to(end + 1).freeze());
    }
}
