//! Per-message-ID body codec table.
//!
//! [`Body`] holds one variant per supported message; decode dispatches on
//! the header's message ID and encode walks the variant's field layout.
//! Register and Authenticate carry version-dependent field widths, so both
//! directions take the header's protocol edition.

use crate::{
    codec::{BodyReader, BodyWriter},
    error::{ProtocolError, Result},
    header::Version,
    location::Location,
    params::ParameterSet,
};

/// Terminal generic ack.
pub const MSG_TERMINAL_ACK: u16 = 0x0001;
/// Heartbeat.
pub const MSG_HEARTBEAT: u16 = 0x0002;
/// Terminal deregistration.
pub const MSG_DEREGISTER: u16 = 0x0003;
/// Terminal registration.
pub const MSG_REGISTER: u16 = 0x0100;
/// Terminal authentication.
pub const MSG_AUTHENTICATE: u16 = 0x0102;
/// Query-parameters response.
pub const MSG_PARAMS_REPLY: u16 = 0x0104;
/// Position report.
pub const MSG_LOCATION: u16 = 0x0200;
/// Platform generic ack.
pub const MSG_PLATFORM_ACK: u16 = 0x8001;
/// Registration response.
pub const MSG_REGISTER_ACK: u16 = 0x8100;
/// Set device parameters.
pub const MSG_SET_PARAMS: u16 = 0x8103;
/// Query device parameters.
pub const MSG_QUERY_PARAMS: u16 = 0x8104;

/// Generic-ack result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckResult {
    /// Success / confirmed.
    #[default]
    Success,
    /// The handler failed.
    Failure,
    /// The message was malformed.
    BadMessage,
    /// The message is not supported.
    Unsupported,
    /// A code outside the standard set, carried through verbatim.
    Other(u8),
}

impl AckResult {
    /// Wire value of this result code.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::BadMessage => 2,
            Self::Unsupported => 3,
            Self::Other(code) => code,
        }
    }

    /// Parse a wire result code.
    #[must_use]
    pub fn from_u8(code: u8) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::Failure,
            2 => Self::BadMessage,
            3 => Self::Unsupported,
            other => Self::Other(other),
        }
    }
}

/// Generic acknowledgement, used in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Serial number of the message being answered.
    pub answer_serial: u16,
    /// ID of the message being answered.
    pub answer_msg_id: u16,
    /// Outcome.
    pub result: AckResult,
}

/// Terminal registration (`0x0100`).
///
/// The manufacturer/model/terminal-id fields are NUL-padded ASCII whose
/// widths differ by edition: 5/20/7 bytes for 2013, 11/30/30 for 2019.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    /// Province ID per GB/T 2260.
    pub province_id: u16,
    /// City ID per GB/T 2260.
    pub city_id: u16,
    /// Manufacturer code.
    pub manufacturer: String,
    /// Terminal model.
    pub model: String,
    /// Terminal ID.
    pub terminal_id: String,
    /// Plate colour per JT/T 415.
    pub plate_color: u8,
    /// Licence plate, GBK.
    pub plate: String,
}

impl Register {
    fn widths(version: Version) -> (usize, usize, usize) {
        match version {
            Version::V2011 | Version::V2013 => (5, 20, 7),
            Version::V2019 => (11, 30, 30),
        }
    }

    fn decode(reader: &mut BodyReader<'_>, version: Version) -> Result<Self> {
        let (mw, ow, tw) = Self::widths(version);
        Ok(Self {
            province_id: reader.read_u16()?,
            city_id: reader.read_u16()?,
            manufacturer: reader.read_ascii(mw)?,
            model: reader.read_ascii(ow)?,
            terminal_id: reader.read_ascii(tw)?,
            plate_color: reader.read_u8()?,
            plate: crate::codec::decode_gbk(reader.read_to_end())?,
        })
    }

    fn encode(&self, writer: &mut BodyWriter, version: Version) -> Result<()> {
        let (mw, ow, tw) = Self::widths(version);
        writer.write_u16(self.province_id);
        writer.write_u16(self.city_id);
        writer.write_ascii_padded(&self.manufacturer, mw)?;
        writer.write_ascii_padded(&self.model, ow)?;
        writer.write_ascii_padded(&self.terminal_id, tw)?;
        writer.write_u8(self.plate_color);
        writer.write_gbk(&self.plate)
    }
}

/// Registration response (`0x8100`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterAck {
    /// Serial number of the registration being answered.
    pub answer_serial: u16,
    /// 0 success; non-zero registration failure codes.
    pub result: u8,
    /// Authentication code, present iff `result == 0`.
    pub auth_code: Option<String>,
}

/// Terminal authentication (`0x0102`).
///
/// 2013 carries the bare auth code; 2019 length-prefixes it and appends the
/// IMEI and software version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticate {
    /// Authentication code issued at registration.
    pub auth_code: String,
    /// Terminal IMEI (2019 only, 15 ASCII bytes).
    pub imei: String,
    /// Software version (2019 only, 20 ASCII bytes).
    pub software_version: String,
}

impl Authenticate {
    fn decode(reader: &mut BodyReader<'_>, version: Version) -> Result<Self> {
        match version {
            Version::V2011 | Version::V2013 => Ok(Self {
                auth_code: crate::codec::decode_gbk(reader.read_to_end())?,
                imei: String::new(),
                software_version: String::new(),
            }),
            Version::V2019 => {
                let len = reader.read_u8()? as usize;
                Ok(Self {
                    auth_code: reader.read_gbk(len)?,
                    imei: reader.read_ascii(15)?,
                    software_version: reader.read_ascii(20)?,
                })
            }
        }
    }

    fn encode(&self, writer: &mut BodyWriter, version: Version) -> Result<()> {
        match version {
            Version::V2011 | Version::V2013 => writer.write_gbk(&self.auth_code),
            Version::V2019 => {
                let code = crate::codec::encode_gbk(&self.auth_code)?;
                writer.write_u8(code.len() as u8);
                writer.write_bytes(&code);
                writer.write_ascii_padded(&self.imei, 15)?;
                writer.write_ascii_padded(&self.software_version, 20)
            }
        }
    }
}

/// Query-parameters response (`0x0104`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamsReply {
    /// Serial number of the query being answered.
    pub answer_serial: u16,
    /// Parameters the terminal reported.
    pub params: ParameterSet,
}

/// A decoded message body. One variant per supported message ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// `0x0001`, terminal to platform.
    TerminalAck(Ack),
    /// `0x0002`, empty body.
    Heartbeat,
    /// `0x0003`, empty body.
    Deregister,
    /// `0x0100`.
    Register(Register),
    /// `0x0102`.
    Authenticate(Authenticate),
    /// `0x0104`.
    ParamsReply(ParamsReply),
    /// `0x0200`.
    Location(Location),
    /// `0x8001`, platform to terminal.
    PlatformAck(Ack),
    /// `0x8100`.
    RegisterAck(RegisterAck),
    /// `0x8103`.
    SetParams(ParameterSet),
    /// `0x8104`, empty body.
    QueryParams,
}

impl Body {
    /// The canonical message ID of this body.
    #[must_use]
    pub fn msg_id(&self) -> u16 {
        match self {
            Self::TerminalAck(_) => MSG_TERMINAL_ACK,
            Self::Heartbeat => MSG_HEARTBEAT,
            Self::Deregister => MSG_DEREGISTER,
            Self::Register(_) => MSG_REGISTER,
            Self::Authenticate(_) => MSG_AUTHENTICATE,
            Self::ParamsReply(_) => MSG_PARAMS_REPLY,
            Self::Location(_) => MSG_LOCATION,
            Self::PlatformAck(_) => MSG_PLATFORM_ACK,
            Self::RegisterAck(_) => MSG_REGISTER_ACK,
            Self::SetParams(_) => MSG_SET_PARAMS,
            Self::QueryParams => MSG_QUERY_PARAMS,
        }
    }

    /// Decode a body for `msg_id` under the header's edition.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::UnsupportedMsgId`] when no codec entry exists
    /// - [`ProtocolError::DecodeFailed`] when the body does not match its
    ///   layout
    pub fn decode(msg_id: u16, version: Version, body: &[u8]) -> Result<Self> {
        let mut reader = BodyReader::new(body);
        let decoded = match msg_id {
            MSG_TERMINAL_ACK => Self::TerminalAck(decode_ack(&mut reader, msg_id)?),
            MSG_HEARTBEAT => Self::Heartbeat,
            MSG_DEREGISTER => Self::Deregister,
            MSG_REGISTER => Self::Register(
                Register::decode(&mut reader, version).map_err(|e| ProtocolError::body(msg_id, &e))?,
            ),
            MSG_AUTHENTICATE => Self::Authenticate(
                Authenticate::decode(&mut reader, version)
                    .map_err(|e| ProtocolError::body(msg_id, &e))?,
            ),
            MSG_PARAMS_REPLY => {
                let answer_serial =
                    reader.read_u16().map_err(|e| ProtocolError::body(msg_id, &e))?;
                let count = reader.read_u8().map_err(|e| ProtocolError::body(msg_id, &e))?;
                let params = ParameterSet::decode(&mut reader, count)
                    .map_err(|e| ProtocolError::body(msg_id, &e))?;
                Self::ParamsReply(ParamsReply { answer_serial, params })
            }
            MSG_LOCATION => Self::Location(
                Location::decode(&mut reader).map_err(|e| ProtocolError::body(msg_id, &e))?,
            ),
            MSG_PLATFORM_ACK => Self::PlatformAck(decode_ack(&mut reader, msg_id)?),
            MSG_REGISTER_ACK => {
                let answer_serial =
                    reader.read_u16().map_err(|e| ProtocolError::body(msg_id, &e))?;
                let result = reader.read_u8().map_err(|e| ProtocolError::body(msg_id, &e))?;
                let auth_code = if result == 0 {
                    Some(crate::codec::decode_gbk(reader.read_to_end())?)
                } else {
                    None
                };
                Self::RegisterAck(RegisterAck { answer_serial, result, auth_code })
            }
            MSG_SET_PARAMS => {
                let count = reader.read_u8().map_err(|e| ProtocolError::body(msg_id, &e))?;
                Self::SetParams(
                    ParameterSet::decode(&mut reader, count)
                        .map_err(|e| ProtocolError::body(msg_id, &e))?,
                )
            }
            MSG_QUERY_PARAMS => Self::QueryParams,
            other => return Err(ProtocolError::UnsupportedMsgId(other)),
        };
        Ok(decoded)
    }

    /// Encode this body under `version`.
    pub fn encode(&self, version: Version) -> Result<Vec<u8>> {
        let mut writer = BodyWriter::new();
        match self {
            Self::TerminalAck(ack) | Self::PlatformAck(ack) => {
                writer.write_u16(ack.answer_serial);
                writer.write_u16(ack.answer_msg_id);
                writer.write_u8(ack.result.as_u8());
            }
            Self::Heartbeat | Self::Deregister | Self::QueryParams => {}
            Self::Register(register) => register.encode(&mut writer, version)?,
            Self::Authenticate(auth) => auth.encode(&mut writer, version)?,
            Self::ParamsReply(reply) => {
                writer.write_u16(reply.answer_serial);
                reply.params.encode(&mut writer)?;
            }
            Self::Location(location) => location.encode(&mut writer)?,
            Self::RegisterAck(ack) => {
                writer.write_u16(ack.answer_serial);
                writer.write_u8(ack.result);
                if let Some(code) = &ack.auth_code {
                    writer.write_gbk(code)?;
                }
            }
            Self::SetParams(params) => params.encode(&mut writer)?,
        }
        Ok(writer.into_bytes())
    }
}

fn decode_ack(reader: &mut BodyReader<'_>, msg_id: u16) -> Result<Ack> {
    let wrap = |e: ProtocolError| ProtocolError::body(msg_id, &e);
    Ok(Ack {
        answer_serial: reader.read_u16().map_err(wrap)?,
        answer_msg_id: reader.read_u16().map_err(wrap)?,
        result: AckResult::from_u8(reader.read_u8().map_err(wrap)?),
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn round_trip(body: &Body, version: Version) -> Body {
        let bytes = body.encode(version).unwrap();
        Body::decode(body.msg_id(), version, &bytes).unwrap()
    }

    #[test]
    fn empty_bodies_round_trip() {
        for body in [Body::Heartbeat, Body::Deregister, Body::QueryParams] {
            assert!(body.encode(Version::V2013).unwrap().is_empty());
            assert_eq!(round_trip(&body, Version::V2013), body);
        }
    }

    #[test]
    fn ack_round_trips_in_both_directions() {
        let ack = Ack { answer_serial: 7, answer_msg_id: MSG_HEARTBEAT, result: AckResult::Success };
        assert_eq!(round_trip(&Body::TerminalAck(ack), Version::V2013), Body::TerminalAck(ack));
        assert_eq!(round_trip(&Body::PlatformAck(ack), Version::V2019), Body::PlatformAck(ack));
    }

    #[test]
    fn register_widths_differ_by_edition() {
        let register = Register {
            province_id: 31,
            city_id: 100,
            manufacturer: "RDLNK".into(),
            model: "RL-100".into(),
            terminal_id: "T000001".into(),
            plate_color: 1,
            plate: "\u{4eac}A12345".into(),
        };

        let b2013 = Body::Register(register.clone()).encode(Version::V2013).unwrap();
        let b2019 = Body::Register(register.clone()).encode(Version::V2019).unwrap();
        // 2 + 2 + widths + 1 + GBK plate (2 bytes for the han character)
        assert_eq!(b2013.len(), 4 + 5 + 20 + 7 + 1 + 8);
        assert_eq!(b2019.len(), 4 + 11 + 30 + 30 + 1 + 8);

        let body = Body::Register(register);
        assert_eq!(round_trip(&body, Version::V2013), body);
        assert_eq!(round_trip(&body, Version::V2019), body);
    }

    #[test]
    fn register_ack_omits_auth_code_on_failure() {
        let ok = Body::RegisterAck(RegisterAck {
            answer_serial: 1,
            result: 0,
            auth_code: Some("a9f3c2".into()),
        });
        let failed =
            Body::RegisterAck(RegisterAck { answer_serial: 1, result: 2, auth_code: None });

        assert_eq!(round_trip(&ok, Version::V2013), ok);
        assert_eq!(failed.encode(Version::V2013).unwrap().len(), 3);
        assert_eq!(round_trip(&failed, Version::V2013), failed);
    }

    #[test]
    fn authenticate_2019_carries_imei_and_version() {
        let auth = Authenticate {
            auth_code: "a9f3c2".into(),
            imei: "123456789012345".into(),
            software_version: "1.2.3".into(),
        };
        let body = Body::Authenticate(auth);
        let bytes = body.encode(Version::V2019).unwrap();
        assert_eq!(bytes.len(), 1 + 6 + 15 + 20);
        assert_eq!(round_trip(&body, Version::V2019), body);
    }

    #[test]
    fn authenticate_2013_is_bare_code() {
        let auth = Authenticate {
            auth_code: "a9f3c2".into(),
            imei: String::new(),
            software_version: String::new(),
        };
        let body = Body::Authenticate(auth);
        assert_eq!(body.encode(Version::V2013).unwrap(), b"a9f3c2");
        assert_eq!(round_trip(&body, Version::V2013), body);
    }

    #[test]
    fn unknown_msg_id_is_unsupported() {
        assert_eq!(
            Body::decode(0x8801, Version::V2013, &[]),
            Err(ProtocolError::UnsupportedMsgId(0x8801))
        );
    }

    #[test]
    fn truncated_ack_is_a_decode_failure() {
        assert!(matches!(
            Body::decode(MSG_TERMINAL_ACK, Version::V2013, &[0x00]),
            Err(ProtocolError::DecodeFailed { msg_id: MSG_TERMINAL_ACK, .. })
        ));
    }

    proptest! {
        #[test]
        fn generic_ack_round_trip(
            answer_serial in any::<u16>(),
            answer_msg_id in any::<u16>(),
            result in 0u8..4,
        ) {
            let body = Body::TerminalAck(Ack {
                answer_serial,
                answer_msg_id,
                result: AckResult::from_u8(result),
            });
            prop_assert_eq!(round_trip(&body, Version::V2013), body);
        }
    }
}
