//! Message header codec.
//!
//! The header carries the message ID, a bit-packed body-attribute word, the
//! terminal phone number (BCD), a per-session serial number, and an optional
//! fragmentation tuple. The attribute word's version-sign bit selects the
//! 2013 layout (6 BCD phone bytes) or the 2019 layout (a protocol-revision
//! byte followed by 10 BCD phone bytes).

use crate::{
    codec::{BodyReader, BodyWriter},
    error::{ProtocolError, Result},
};

/// Protocol edition spoken by a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Version {
    /// 2011 edition. Indistinguishable from 2013 on the wire.
    V2011,
    /// 2013 edition (version-sign bit clear).
    #[default]
    V2013,
    /// 2019 edition (version-sign bit set).
    V2019,
}

impl Version {
    /// Map the header's one-bit version sign to an edition.
    #[must_use]
    pub fn from_sign(sign: bool) -> Self {
        if sign { Self::V2019 } else { Self::V2013 }
    }

    /// The version-sign bit value for this edition.
    #[must_use]
    pub fn sign(self) -> bool {
        matches!(self, Self::V2019)
    }

    /// Parse a numeric edition year suffix (11, 13, 19).
    pub fn from_year(year: u8) -> Result<Self> {
        match year {
            11 => Ok(Self::V2011),
            13 => Ok(Self::V2013),
            19 => Ok(Self::V2019),
            other => Err(ProtocolError::VersionUnknown(other)),
        }
    }

    /// Phone field width in BCD bytes for this edition.
    #[must_use]
    pub fn phone_width(self) -> usize {
        match self {
            Self::V2011 | Self::V2013 => 6,
            Self::V2019 => 10,
        }
    }
}

/// Body encryption mode (bits 10..=12 of the attribute word).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encryption {
    /// Plaintext body.
    #[default]
    None,
    /// RSA-encrypted body. The bit exists; bodies are currently plaintext.
    Rsa,
    /// Reserved mode values 2..=7.
    Other(u8),
}

impl Encryption {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::None,
            1 => Self::Rsa,
            other => Self::Other(other),
        }
    }

    fn bits(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Rsa => 1,
            Self::Other(other) => other & 0b111,
        }
    }
}

const BODY_LENGTH_BITS: u16 = 0b0000_0011_1111_1111;
const ENCRYPTION_BITS: u16 = 0b0001_1100_0000_0000;
const FRAGMENTED_BIT: u16 = 0b0010_0000_0000_0000;
const VERSION_SIGN_BIT: u16 = 0b0100_0000_0000_0000;
const RESERVED_BIT: u16 = 0b1000_0000_0000_0000;

/// Bit-packed body-attribute word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BodyAttr {
    /// Body length in bytes (bits 0..=9).
    pub body_length: u16,
    /// Encryption mode (bits 10..=12).
    pub encryption: Encryption,
    /// Fragmentation flag (bit 13).
    pub fragmented: bool,
    /// Version sign (bit 14): clear for 2013, set for 2019.
    pub version_sign: bool,
    /// Reserved (bit 15).
    pub reserved: bool,
}

impl BodyAttr {
    /// Unpack the attribute word.
    #[must_use]
    pub fn from_word(word: u16) -> Self {
        Self {
            body_length: word & BODY_LENGTH_BITS,
            encryption: Encryption::from_bits(((word & ENCRYPTION_BITS) >> 10) as u8),
            fragmented: word & FRAGMENTED_BIT != 0,
            version_sign: word & VERSION_SIGN_BIT != 0,
            reserved: word & RESERVED_BIT != 0,
        }
    }

    /// Pack the attribute word.
    #[must_use]
    pub fn to_word(self) -> u16 {
        let mut word = self.body_length & BODY_LENGTH_BITS;
        word |= u16::from(self.encryption.bits()) << 10;
        if self.fragmented {
            word |= FRAGMENTED_BIT;
        }
        if self.version_sign {
            word |= VERSION_SIGN_BIT;
        }
        if self.reserved {
            word |= RESERVED_BIT;
        }
        word
    }

    /// Edition implied by the version-sign bit.
    #[must_use]
    pub fn version(self) -> Version {
        Version::from_sign(self.version_sign)
    }
}

/// Fragmentation tuple following the serial number when bit 13 is set.
///
/// `index` is 1-based on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    /// Total number of fragments the message was split into.
    pub total: u16,
    /// This fragment's 1-based position.
    pub index: u16,
}

/// Decoded message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Message ID selecting the body codec.
    pub msg_id: u16,
    /// Bit-packed body attributes.
    pub attr: BodyAttr,
    /// Protocol revision byte. Only on the wire for 2019 headers.
    pub protocol_version: u8,
    /// Terminal phone number as a decimal digit string (12 or 20 digits).
    pub phone: String,
    /// Per-session serial number.
    pub serial: u16,
    /// Fragmentation tuple, present iff `attr.fragmented`.
    pub fragment: Option<Fragment>,
}

impl Header {
    /// Build an unfragmented header for an outgoing message.
    #[must_use]
    pub fn new(version: Version, phone: impl Into<String>, msg_id: u16, serial: u16) -> Self {
        Self {
            msg_id,
            attr: BodyAttr { version_sign: version.sign(), ..BodyAttr::default() },
            protocol_version: if version == Version::V2019 { 1 } else { 0 },
            phone: phone.into(),
            serial,
            fragment: None,
        }
    }

    /// Edition this header was encoded with.
    #[must_use]
    pub fn version(&self) -> Version {
        self.attr.version()
    }

    /// Decode the header prefix of an unescaped frame. The reader is left
    /// positioned at the first body byte.
    pub fn decode(reader: &mut BodyReader<'_>) -> Result<Self> {
        let invalid = |_| ProtocolError::InvalidHeader("field overran the frame");

        let msg_id = reader.read_u16().map_err(invalid)?;
        let attr = BodyAttr::from_word(reader.read_u16().map_err(invalid)?);
        let version = attr.version();

        let protocol_version =
            if version == Version::V2019 { reader.read_u8().map_err(invalid)? } else { 0 };

        let phone = reader
            .read_bcd(version.phone_width())
            .map_err(|e| match e {
                ProtocolError::InvalidBcd(_) => ProtocolError::InvalidHeader("phone is not BCD"),
                _ => ProtocolError::InvalidHeader("field overran the frame"),
            })?;

        let serial = reader.read_u16().map_err(invalid)?;

        let fragment = if attr.fragmented {
            Some(Fragment {
                total: reader.read_u16().map_err(invalid)?,
                index: reader.read_u16().map_err(invalid)?,
            })
        } else {
            None
        };

        Ok(Self { msg_id, attr, protocol_version, phone, serial, fragment })
    }

    /// Encode the header. `attr.body_length` must already hold the body
    /// length; the fragmented bit is derived from `fragment`.
    pub fn encode(&self, writer: &mut BodyWriter) -> Result<()> {
        let mut attr = self.attr;
        attr.fragmented = self.fragment.is_some();

        writer.write_u16(self.msg_id);
        writer.write_u16(attr.to_word());
        let version = attr.version();
        if version == Version::V2019 {
            writer.write_u8(self.protocol_version);
        }
        writer
            .write_bcd_padded(&self.phone, version.phone_width())
            .map_err(|_| ProtocolError::InvalidHeader("phone is not BCD"))?;
        writer.write_u16(self.serial);
        if let Some(frag) = self.fragment {
            writer.write_u16(frag.total);
            writer.write_u16(frag.index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn round_trip(header: &Header) -> Header {
        let mut w = BodyWriter::new();
        header.encode(&mut w).unwrap();
        let bytes = w.into_bytes();
        let mut r = BodyReader::new(&bytes);
        let parsed = Header::decode(&mut r).unwrap();
        assert!(r.is_empty());
        parsed
    }

    #[test]
    fn attr_bit_layout() {
        let attr = BodyAttr::from_word(0b0110_0100_0000_0101);
        assert_eq!(attr.body_length, 5);
        assert_eq!(attr.encryption, Encryption::Rsa);
        assert!(attr.fragmented);
        assert!(attr.version_sign);
        assert!(!attr.reserved);
        assert_eq!(attr.to_word(), 0b0110_0100_0000_0101);
    }

    #[test]
    fn header_2013_phone_is_six_bytes() {
        let header = Header::new(Version::V2013, "013812345678", 0x0002, 1);
        let mut w = BodyWriter::new();
        header.encode(&mut w).unwrap();
        // msg id + attr + phone + serial
        assert_eq!(w.len(), 2 + 2 + 6 + 2);
        assert_eq!(round_trip(&header), header);
    }

    #[test]
    fn header_2019_carries_revision_and_wide_phone() {
        let mut header = Header::new(Version::V2019, "013812345678", 0x0100, 7);
        header.protocol_version = 1;
        let mut w = BodyWriter::new();
        header.encode(&mut w).unwrap();
        assert_eq!(w.len(), 2 + 2 + 1 + 10 + 2);

        let parsed = round_trip(&header);
        // The 10-byte BCD field zero-extends the phone to 20 digits.
        assert_eq!(parsed.phone, "00000000013812345678");
        assert_eq!(parsed.msg_id, header.msg_id);
        assert_eq!(parsed.protocol_version, 1);
    }

    #[test]
    fn truncated_header_is_invalid() {
        let mut r = BodyReader::new(&[0x00, 0x02, 0x00]);
        assert_eq!(
            Header::decode(&mut r),
            Err(ProtocolError::InvalidHeader("field overran the frame"))
        );
    }

    #[test]
    fn fragment_tuple_follows_serial() {
        let mut header = Header::new(Version::V2013, "013900000001", 0x0200, 9);
        header.fragment = Some(Fragment { total: 2, index: 1 });
        let parsed = round_trip(&header);
        assert!(parsed.attr.fragmented);
        assert_eq!(parsed.fragment, Some(Fragment { total: 2, index: 1 }));
    }

    prop_compose! {
        fn arb_phone()(digits in prop::collection::vec(0u8..=9, 12)) -> String {
            digits.into_iter().map(|d| char::from(b'0' + d)).collect()
        }
    }

    proptest! {
        #[test]
        fn header_round_trip(
            msg_id in any::<u16>(),
            body_length in 0u16..1024,
            phone in arb_phone(),
            serial in any::<u16>(),
            version_sign in any::<bool>(),
            frag in prop::option::of((1u16..64, 1u16..64)),
        ) {
            let version = Version::from_sign(version_sign);
            let mut header = Header::new(version, phone, msg_id, serial);
            header.attr.body_length = body_length;
            header.fragment = frag.map(|(total, index)| Fragment { total, index });

            let parsed = round_trip(&header);
            prop_assert_eq!(parsed.msg_id, header.msg_id);
            prop_assert_eq!(parsed.attr.body_length, header.attr.body_length);
            prop_assert_eq!(parsed.serial, header.serial);
            prop_assert_eq!(parsed.fragment, header.fragment);
            // Decoded phones carry the full BCD width.
            prop_assert!(parsed.phone.ends_with(&header.phone));
        }
    }
}
