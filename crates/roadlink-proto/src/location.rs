//! Position reports (message `0x0200`) and their typed alarm attachments.
//!
//! After the fixed 28-byte prefix the body carries `(id, length, body)`
//! triples. An id of 0 terminates the list, and a triple whose declared
//! length overruns the remaining body stops parsing without error, because
//! malformed terminals are common in this domain. Recognised ids decode
//! into typed records; anything else is kept as raw bytes.

use bytes::Bytes;
use serde::{Serialize, Serializer};

use crate::{
    codec::{BodyReader, BodyWriter},
    error::Result,
};

/// Attachment id carrying an ADAS alarm.
pub const ATTACH_ADAS: u8 = 0x64;
/// Attachment id carrying a driver-state-monitor alarm.
pub const ATTACH_DSM: u8 = 0x65;
/// Attachment id carrying a tyre-pressure alarm.
pub const ATTACH_TPMS: u8 = 0x66;
/// Attachment id carrying a blind-spot alarm.
pub const ATTACH_BSD: u8 = 0x67;

/// A decoded position report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Alarm flag bits.
    pub alarm_sign: u32,
    /// Status flag bits.
    pub status_sign: u32,
    /// Latitude in degrees times 10^6.
    pub latitude: u32,
    /// Longitude in degrees times 10^6.
    pub longitude: u32,
    /// Altitude in metres.
    pub altitude: u16,
    /// Speed in 0.1 km/h.
    pub speed: u16,
    /// Heading, 0..=359 degrees clockwise from north.
    pub direction: u16,
    /// Report time as 12 BCD digits, YY-MM-DD-hh-mm-ss in GMT+8.
    pub time: String,
    /// Trailing alarm attachments.
    pub attachments: Vec<Attachment>,
}

impl Location {
    /// Decode a position-report body.
    pub fn decode(reader: &mut BodyReader<'_>) -> Result<Self> {
        let alarm_sign = reader.read_u32()?;
        let status_sign = reader.read_u32()?;
        let latitude = reader.read_u32()?;
        let longitude = reader.read_u32()?;
        let altitude = reader.read_u16()?;
        let speed = reader.read_u16()?;
        let direction = reader.read_u16()?;
        let time = reader.read_bcd(6)?;

        let mut attachments = Vec::new();
        while reader.remaining() >= 2 {
            let id = reader.read_u8()?;
            if id == 0 {
                break;
            }
            let len = reader.read_u8()? as usize;
            if len > reader.remaining() {
                // Declared length overruns the body. Stop, keep what parsed.
                break;
            }
            attachments.push(Attachment::decode(id, reader.read_bytes(len)?));
        }

        Ok(Self {
            alarm_sign,
            status_sign,
            latitude,
            longitude,
            altitude,
            speed,
            direction,
            time,
            attachments,
        })
    }

    /// Encode a position-report body.
    pub fn encode(&self, writer: &mut BodyWriter) -> Result<()> {
        writer.write_u32(self.alarm_sign);
        writer.write_u32(self.status_sign);
        writer.write_u32(self.latitude);
        writer.write_u32(self.longitude);
        writer.write_u16(self.altitude);
        writer.write_u16(self.speed);
        writer.write_u16(self.direction);
        writer.write_bcd_padded(&self.time, 6)?;

        for attachment in &self.attachments {
            let body = attachment.encode()?;
            writer.write_u8(attachment.id());
            writer.write_u8(body.len() as u8);
            writer.write_bytes(&body);
        }
        Ok(())
    }

    /// First typed attachment, if the report carries one.
    #[must_use]
    pub fn typed_attachment(&self) -> Option<&Attachment> {
        self.attachments.iter().find(|a| !matches!(a, Attachment::Raw { .. }))
    }
}

/// Vehicle-state bitfield carried inside alarm attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CarState(pub u16);

impl CarState {
    /// ACC (ignition) on.
    #[must_use]
    pub fn acc(self) -> bool {
        self.0 & (1 << 0) != 0
    }

    /// Left-turn indicator on.
    #[must_use]
    pub fn left_turn(self) -> bool {
        self.0 & (1 << 1) != 0
    }

    /// Right-turn indicator on.
    #[must_use]
    pub fn right_turn(self) -> bool {
        self.0 & (1 << 2) != 0
    }

    /// Wiper running.
    #[must_use]
    pub fn wiper(self) -> bool {
        self.0 & (1 << 3) != 0
    }

    /// Brake applied.
    #[must_use]
    pub fn brake(self) -> bool {
        self.0 & (1 << 4) != 0
    }

    /// Driver card inserted.
    #[must_use]
    pub fn card_inserted(self) -> bool {
        self.0 & (1 << 5) != 0
    }

    /// GPS fix acquired (bit 10).
    #[must_use]
    pub fn located(self) -> bool {
        self.0 & (1 << 10) != 0
    }
}

impl Serialize for CarState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("CarState", 7)?;
        s.serialize_field("acc", &self.acc())?;
        s.serialize_field("leftTurn", &self.left_turn())?;
        s.serialize_field("rightTurn", &self.right_turn())?;
        s.serialize_field("wiper", &self.wiper())?;
        s.serialize_field("brake", &self.brake())?;
        s.serialize_field("cardInserted", &self.card_inserted())?;
        s.serialize_field("located", &self.located())?;
        s.end()
    }
}

fn hex_bytes<S: Serializer>(bytes: &[u8; 7], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    serializer.serialize_str(&hex)
}

/// Location context shared by every typed attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmPosition {
    /// Speed in km/h.
    pub speed: u8,
    /// Altitude in metres.
    pub altitude: u16,
    /// Latitude in degrees times 10^6.
    pub latitude: u32,
    /// Longitude in degrees times 10^6.
    pub longitude: u32,
    /// Alarm time, 12 BCD digits.
    pub time: String,
    /// Vehicle-state bits at alarm time.
    #[serde(rename = "carState")]
    pub car_state: CarState,
}

impl AlarmPosition {
    fn decode(reader: &mut BodyReader<'_>) -> Result<Self> {
        Ok(Self {
            speed: reader.read_u8()?,
            altitude: reader.read_u16()?,
            latitude: reader.read_u32()?,
            longitude: reader.read_u32()?,
            time: reader.read_bcd(6)?,
            car_state: CarState(reader.read_u16()?),
        })
    }

    fn encode(&self, writer: &mut BodyWriter) -> Result<()> {
        writer.write_u8(self.speed);
        writer.write_u16(self.altitude);
        writer.write_u32(self.latitude);
        writer.write_u32(self.longitude);
        writer.write_bcd_padded(&self.time, 6)?;
        writer.write_u16(self.car_state.0);
        Ok(())
    }
}

/// The 16-byte alarm-identity block closing every typed attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmIdentity {
    /// Terminal id, 7 raw bytes (hex in JSON).
    #[serde(serialize_with = "hex_bytes")]
    pub terminal_id: [u8; 7],
    /// Identity timestamp, 12 BCD digits.
    pub time: String,
    /// Alarm sequence number within this terminal and timestamp.
    pub sequence: u8,
    /// Number of media attachments that will follow out of band.
    pub attachment_count: u8,
    /// Reserved.
    pub reserved: u8,
}

impl AlarmIdentity {
    fn decode(reader: &mut BodyReader<'_>) -> Result<Self> {
        let raw = reader.read_bytes(7)?;
        let mut terminal_id = [0u8; 7];
        terminal_id.copy_from_slice(raw);
        Ok(Self {
            terminal_id,
            time: reader.read_bcd(6)?,
            sequence: reader.read_u8()?,
            attachment_count: reader.read_u8()?,
            reserved: reader.read_u8()?,
        })
    }

    fn encode(&self, writer: &mut BodyWriter) -> Result<()> {
        writer.write_bytes(&self.terminal_id);
        writer.write_bcd_padded(&self.time, 6)?;
        writer.write_u8(self.sequence);
        writer.write_u8(self.attachment_count);
        writer.write_u8(self.reserved);
        Ok(())
    }
}

/// Driver-state-monitor alarm (id `0x65`), 47 bytes fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DsmAlarm {
    /// Alarm id assigned by the terminal.
    pub alarm_id: u32,
    /// 0 unavailable, 1 start, 2 end.
    pub flag: u8,
    /// Alarm type (fatigue, phone call, smoking, ...).
    #[serde(rename = "type")]
    pub alarm_type: u8,
    /// Alarm level, 1 or 2.
    pub level: u8,
    /// Fatigue degree.
    pub fatigue: u8,
    /// Reserved.
    #[serde(skip)]
    pub reserved: [u8; 4],
    /// Location context.
    #[serde(flatten)]
    pub position: AlarmPosition,
    /// Identity block.
    pub identity: AlarmIdentity,
}

impl DsmAlarm {
    /// Fixed encoded size in bytes.
    pub const WIRE_LEN: usize = 47;

    fn decode(reader: &mut BodyReader<'_>) -> Result<Self> {
        let alarm_id = reader.read_u32()?;
        let flag = reader.read_u8()?;
        let alarm_type = reader.read_u8()?;
        let level = reader.read_u8()?;
        let fatigue = reader.read_u8()?;
        let raw = reader.read_bytes(4)?;
        let mut reserved = [0u8; 4];
        reserved.copy_from_slice(raw);
        Ok(Self {
            alarm_id,
            flag,
            alarm_type,
            level,
            fatigue,
            reserved,
            position: AlarmPosition::decode(reader)?,
            identity: AlarmIdentity::decode(reader)?,
        })
    }

    fn encode(&self, writer: &mut BodyWriter) -> Result<()> {
        writer.write_u32(self.alarm_id);
        writer.write_u8(self.flag);
        writer.write_u8(self.alarm_type);
        writer.write_u8(self.level);
        writer.write_u8(self.fatigue);
        writer.write_bytes(&self.reserved);
        self.position.encode(writer)?;
        self.identity.encode(writer)
    }
}

/// Advanced-driver-assistance alarm (id `0x64`), 47 bytes fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdasAlarm {
    /// Alarm id assigned by the terminal.
    pub alarm_id: u32,
    /// 0 unavailable, 1 start, 2 end.
    pub flag: u8,
    /// Alarm type (forward collision, lane departure, ...).
    #[serde(rename = "type")]
    pub alarm_type: u8,
    /// Alarm level, 1 or 2.
    pub level: u8,
    /// Speed of the vehicle in front, km/h.
    pub front_speed: u8,
    /// Distance to the vehicle in front, 100 ms units.
    pub front_distance: u8,
    /// Lane-departure side, 1 left, 2 right.
    pub deviate_type: u8,
    /// Recognised road-sign kind.
    pub road_sign_type: u8,
    /// Recognised road-sign value.
    pub road_sign_data: u8,
    /// Location context.
    #[serde(flatten)]
    pub position: AlarmPosition,
    /// Identity block.
    pub identity: AlarmIdentity,
}

impl AdasAlarm {
    fn decode(reader: &mut BodyReader<'_>) -> Result<Self> {
        Ok(Self {
            alarm_id: reader.read_u32()?,
            flag: reader.read_u8()?,
            alarm_type: reader.read_u8()?,
            level: reader.read_u8()?,
            front_speed: reader.read_u8()?,
            front_distance: reader.read_u8()?,
            deviate_type: reader.read_u8()?,
            road_sign_type: reader.read_u8()?,
            road_sign_data: reader.read_u8()?,
            position: AlarmPosition::decode(reader)?,
            identity: AlarmIdentity::decode(reader)?,
        })
    }

    fn encode(&self, writer: &mut BodyWriter) -> Result<()> {
        writer.write_u32(self.alarm_id);
        writer.write_u8(self.flag);
        writer.write_u8(self.alarm_type);
        writer.write_u8(self.level);
        writer.write_u8(self.front_speed);
        writer.write_u8(self.front_distance);
        writer.write_u8(self.deviate_type);
        writer.write_u8(self.road_sign_type);
        writer.write_u8(self.road_sign_data);
        self.position.encode(writer)?;
        self.identity.encode(writer)
    }
}

/// One tyre record inside a TPMS alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tire {
    /// Tyre position number.
    pub no: u8,
    /// Alarm kind bits.
    pub alarm_kind: u16,
    /// Pressure in kPa.
    pub pressure: u16,
    /// Temperature in degrees C.
    pub temperature: u16,
    /// Sensor battery level, percent.
    pub battery: u16,
}

/// Tyre-pressure alarm (id `0x66`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TpmsAlarm {
    /// Alarm id assigned by the terminal.
    pub alarm_id: u32,
    /// 0 unavailable, 1 start, 2 end.
    pub flag: u8,
    /// Location context.
    #[serde(flatten)]
    pub position: AlarmPosition,
    /// Identity block.
    pub identity: AlarmIdentity,
    /// Per-tyre records.
    pub tires: Vec<Tire>,
}

impl TpmsAlarm {
    fn decode(reader: &mut BodyReader<'_>) -> Result<Self> {
        let alarm_id = reader.read_u32()?;
        let flag = reader.read_u8()?;
        let position = AlarmPosition::decode(reader)?;
        let identity = AlarmIdentity::decode(reader)?;
        let count = reader.read_u8()?;
        let mut tires = Vec::with_capacity(count as usize);
        for _ in 0..count {
            tires.push(Tire {
                no: reader.read_u8()?,
                alarm_kind: reader.read_u16()?,
                pressure: reader.read_u16()?,
                temperature: reader.read_u16()?,
                battery: reader.read_u16()?,
            });
        }
        Ok(Self { alarm_id, flag, position, identity, tires })
    }

    fn encode(&self, writer: &mut BodyWriter) -> Result<()> {
        writer.write_u32(self.alarm_id);
        writer.write_u8(self.flag);
        self.position.encode(writer)?;
        self.identity.encode(writer)?;
        writer.write_u8(self.tires.len() as u8);
        for tire in &self.tires {
            writer.write_u8(tire.no);
            writer.write_u16(tire.alarm_kind);
            writer.write_u16(tire.pressure);
            writer.write_u16(tire.temperature);
            writer.write_u16(tire.battery);
        }
        Ok(())
    }
}

/// Blind-spot-detection alarm (id `0x67`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BsdAlarm {
    /// Alarm id assigned by the terminal.
    pub alarm_id: u32,
    /// 0 unavailable, 1 start, 2 end.
    pub flag: u8,
    /// 1 rear approach, 2 left, 3 right.
    #[serde(rename = "type")]
    pub alarm_type: u8,
    /// Location context.
    #[serde(flatten)]
    pub position: AlarmPosition,
    /// Identity block.
    pub identity: AlarmIdentity,
}

impl BsdAlarm {
    fn decode(reader: &mut BodyReader<'_>) -> Result<Self> {
        Ok(Self {
            alarm_id: reader.read_u32()?,
            flag: reader.read_u8()?,
            alarm_type: reader.read_u8()?,
            position: AlarmPosition::decode(reader)?,
            identity: AlarmIdentity::decode(reader)?,
        })
    }

    fn encode(&self, writer: &mut BodyWriter) -> Result<()> {
        writer.write_u32(self.alarm_id);
        writer.write_u8(self.flag);
        writer.write_u8(self.alarm_type);
        self.position.encode(writer)?;
        self.identity.encode(writer)
    }
}

/// A position-report attachment: typed where the id is recognised and the
/// body matches its schema, raw bytes otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Attachment {
    /// ADAS alarm (`0x64`).
    Adas(AdasAlarm),
    /// Driver-state-monitor alarm (`0x65`).
    Dsm(DsmAlarm),
    /// Tyre-pressure alarm (`0x66`).
    Tpms(TpmsAlarm),
    /// Blind-spot alarm (`0x67`).
    Bsd(BsdAlarm),
    /// Unrecognised or malformed attachment, kept verbatim.
    Raw {
        /// Attachment id.
        id: u8,
        /// Body bytes.
        #[serde(skip)]
        data: Bytes,
    },
}

impl Attachment {
    /// Decode one attachment body. A recognised id whose body does not
    /// match its schema falls back to [`Attachment::Raw`] rather than
    /// failing the whole report.
    #[must_use]
    pub fn decode(id: u8, data: &[u8]) -> Self {
        let mut reader = BodyReader::new(data);
        let typed = match id {
            ATTACH_ADAS => AdasAlarm::decode(&mut reader).map(Self::Adas),
            ATTACH_DSM => DsmAlarm::decode(&mut reader).map(Self::Dsm),
            ATTACH_TPMS => TpmsAlarm::decode(&mut reader).map(Self::Tpms),
            ATTACH_BSD => BsdAlarm::decode(&mut reader).map(Self::Bsd),
            _ => return Self::Raw { id, data: Bytes::copy_from_slice(data) },
        };
        match typed {
            Ok(attachment) if reader.is_empty() => attachment,
            _ => Self::Raw { id, data: Bytes::copy_from_slice(data) },
        }
    }

    /// The wire id of this attachment.
    #[must_use]
    pub fn id(&self) -> u8 {
        match self {
            Self::Adas(_) => ATTACH_ADAS,
            Self::Dsm(_) => ATTACH_DSM,
            Self::Tpms(_) => ATTACH_TPMS,
            Self::Bsd(_) => ATTACH_BSD,
            Self::Raw { id, .. } => *id,
        }
    }

    /// Encode the attachment body (without the id/length prefix).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = BodyWriter::new();
        match self {
            Self::Adas(a) => a.encode(&mut w)?,
            Self::Dsm(a) => a.encode(&mut w)?,
            Self::Tpms(a) => a.encode(&mut w)?,
            Self::Bsd(a) => a.encode(&mut w)?,
            Self::Raw { data, .. } => w.write_bytes(data),
        }
        Ok(w.into_bytes())
    }
}
