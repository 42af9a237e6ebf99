//! Configuration-parameter codec table.
//!
//! Every parameter ID maps to exactly one value kind, so values live in a
//! closed sum ([`ParamValue`]) instead of being re-inferred at encode time.
//! The structured DSM-settings record (id `0xF365`) is serialised by walking
//! its field schema explicitly, field by field in declaration order.
//!
//! Unknown IDs are skipped (length consumed) during decode because fleets
//! mix firmware revisions freely; encoding an unknown ID is a hard error.

use serde::{Deserialize, Serialize};
use serde_json::{Value as Json, json};

use crate::{
    codec::{BodyReader, BodyWriter},
    error::{ProtocolError, Result},
};

/// Value kind a parameter ID is declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Single byte.
    Byte,
    /// Big-endian 16-bit word.
    Word,
    /// Big-endian 32-bit word.
    DWord,
    /// Packed decimal digits.
    Bcd,
    /// GBK-encoded text.
    Gbk,
    /// Plain ASCII text.
    Ascii,
    /// Structured DSM-settings record.
    Dsm,
}

/// Look up the declared kind for a parameter ID.
#[must_use]
pub fn param_kind(id: u32) -> Option<ParamKind> {
    let kind = match id {
        // Heartbeat / answer-timeout / retry counters
        0x0001..=0x0007 => ParamKind::DWord,
        // APN, dial-up credentials, server addresses
        0x0010..=0x0017 | 0x001A | 0x001D | 0x0023..=0x0026 => ParamKind::Gbk,
        // 2013 TCP/UDP ports, IC-card auth ports
        0x0018 | 0x0019 | 0x001B | 0x001C => ParamKind::DWord,
        // Position-report strategy and intervals
        0x0020..=0x0022 | 0x0027..=0x0030 => ParamKind::DWord,
        // Electronic-fence radius
        0x0031 => ParamKind::Word,
        // Illegal-driving time window (hour/minute pairs)
        0x0032 => ParamKind::Bcd,
        // Platform / reset / factory-reset / SMS phone numbers
        0x0040..=0x0044 | 0x0048 | 0x0049 => ParamKind::Gbk,
        // Call-answer strategy, call-duration limits
        0x0045..=0x0047 => ParamKind::DWord,
        // Alarm masks and driving thresholds
        0x0050..=0x005A => ParamKind::DWord,
        // Warning deltas and collision/rollover parameters
        0x005B..=0x005E => ParamKind::Word,
        // Timed / distance photo parameters
        0x0064 | 0x0065 => ParamKind::DWord,
        // Video quality, brightness, contrast, saturation, chroma
        0x0070..=0x0074 => ParamKind::DWord,
        // JT1078 audio/video parameter blocks
        0x0075..=0x0077 | 0x0079..=0x007C => ParamKind::Bcd,
        // Odometer reading
        0x0080 => ParamKind::DWord,
        // Province / city IDs
        0x0081 | 0x0082 => ParamKind::Word,
        // Licence plate
        0x0083 => ParamKind::Gbk,
        // Plate colour
        0x0084 => ParamKind::Byte,
        // GNSS mode, baud rate, output frequency
        0x0090..=0x0092 => ParamKind::Byte,
        // GNSS collection frequency
        0x0093 => ParamKind::DWord,
        // GNSS upload mode / setting
        0x0094 => ParamKind::Byte,
        0x0095 => ParamKind::DWord,
        // CAN bus channel intervals
        0x0100 | 0x0102 => ParamKind::DWord,
        0x0101 | 0x0103 => ParamKind::Word,
        // CAN ID collection setting
        0x0110 => ParamKind::Ascii,
        // Driver-state-monitor settings record
        0xF365 => ParamKind::Dsm,
        _ => return None,
    };
    Some(kind)
}

/// A decoded parameter value. Each parameter ID maps to exactly one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Single byte.
    Byte(u8),
    /// 16-bit word.
    Word(u16),
    /// 32-bit word.
    DWord(u32),
    /// Packed decimal digits.
    Bcd(String),
    /// GBK text.
    Gbk(String),
    /// ASCII text.
    Ascii(String),
    /// Structured DSM settings.
    Dsm(Box<DsmSettings>),
}

impl ParamValue {
    /// Decode `len` bytes of value data for parameter `id`.
    pub fn decode(id: u32, reader: &mut BodyReader<'_>, len: usize) -> Result<Self> {
        let kind = param_kind(id).ok_or(ProtocolError::UnknownParamId(id))?;
        let value = match kind {
            ParamKind::Byte => Self::Byte(reader.read_u8()?),
            ParamKind::Word => Self::Word(reader.read_u16()?),
            ParamKind::DWord => Self::DWord(reader.read_u32()?),
            ParamKind::Bcd => Self::Bcd(reader.read_bcd(len)?),
            ParamKind::Gbk => Self::Gbk(reader.read_gbk(len)?),
            ParamKind::Ascii => Self::Ascii(reader.read_ascii(len)?),
            ParamKind::Dsm => Self::Dsm(Box::new(DsmSettings::decode(reader)?)),
        };
        Ok(value)
    }

    /// Encode the value. The length byte is recomputed by the caller from
    /// the returned byte count.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = BodyWriter::new();
        match self {
            Self::Byte(v) => w.write_u8(*v),
            Self::Word(v) => w.write_u16(*v),
            Self::DWord(v) => w.write_u32(*v),
            Self::Bcd(v) => w.write_bcd(v)?,
            Self::Gbk(v) => w.write_gbk(v)?,
            Self::Ascii(v) => {
                w.write_ascii_padded(v, v.len())?;
            }
            Self::Dsm(v) => v.encode(&mut w),
        }
        Ok(w.into_bytes())
    }

    /// JSON form of the value: numbers for integer kinds, strings for text
    /// kinds, an object for the DSM record.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::Byte(v) => json!(v),
            Self::Word(v) => json!(v),
            Self::DWord(v) => json!(v),
            Self::Bcd(v) | Self::Gbk(v) | Self::Ascii(v) => json!(v),
            Self::Dsm(v) => serde_json::to_value(v).unwrap_or(Json::Null),
        }
    }

    /// Interpret a JSON value according to the kind declared for `id`.
    pub fn from_json(id: u32, value: &Json) -> Result<Self> {
        let kind = param_kind(id).ok_or(ProtocolError::UnknownParamId(id))?;
        let mismatch = || ProtocolError::DecodeFailed {
            msg_id: 0x8103,
            reason: format!("parameter {id:#06x} value does not match its declared kind"),
        };

        let parsed = match kind {
            ParamKind::Byte => {
                Self::Byte(value.as_u64().and_then(|v| u8::try_from(v).ok()).ok_or_else(mismatch)?)
            }
            ParamKind::Word => Self::Word(
                value.as_u64().and_then(|v| u16::try_from(v).ok()).ok_or_else(mismatch)?,
            ),
            ParamKind::DWord => Self::DWord(
                value.as_u64().and_then(|v| u32::try_from(v).ok()).ok_or_else(mismatch)?,
            ),
            ParamKind::Bcd => Self::Bcd(value.as_str().ok_or_else(mismatch)?.to_owned()),
            ParamKind::Gbk => Self::Gbk(value.as_str().ok_or_else(mismatch)?.to_owned()),
            ParamKind::Ascii => Self::Ascii(value.as_str().ok_or_else(mismatch)?.to_owned()),
            ParamKind::Dsm => Self::Dsm(Box::new(
                serde_json::from_value(value.clone()).map_err(|_| mismatch())?,
            )),
        };
        Ok(parsed)
    }
}

/// One `(id, value)` parameter entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Parameter ID.
    pub id: u32,
    /// Typed value.
    pub value: ParamValue,
}

/// An ordered list of configuration parameters.
///
/// Wire form: `count u8`, then `id u32 | len u8 | value` triples. The length
/// byte is always recomputed from the encoded value on write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParameterSet {
    /// Entries in wire order (sorted ascending after [`Self::update`]).
    pub params: Vec<Param>,
}

impl ParameterSet {
    /// Decode `count` parameter triples.
    pub fn decode(reader: &mut BodyReader<'_>, count: u8) -> Result<Self> {
        let mut params = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = reader.read_u32()?;
            let len = reader.read_u8()? as usize;
            match ParamValue::decode(id, reader, len) {
                Ok(value) => params.push(Param { id, value }),
                Err(ProtocolError::UnknownParamId(_)) => {
                    tracing::warn!(id = format_args!("{id:#06x}"), "unknown parameter id, skipped");
                    let _ = reader.read_bytes(len)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Self { params })
    }

    /// Encode as `count` + triples.
    pub fn encode(&self, writer: &mut BodyWriter) -> Result<()> {
        writer.write_u8(self.params.len() as u8);
        for param in &self.params {
            let value = param.value.encode()?;
            writer.write_u32(param.id);
            writer.write_u8(value.len() as u8);
            writer.write_bytes(&value);
        }
        Ok(())
    }

    /// Merge `incoming` into this set: entries whose ID already exists are
    /// replaced, IDs the terminal does not expose are ignored, and the
    /// result is sorted ascending by ID.
    pub fn update(&mut self, incoming: &ParameterSet) {
        for new in &incoming.params {
            if let Some(existing) = self.params.iter_mut().find(|p| p.id == new.id) {
                existing.value = new.value.clone();
            }
        }
        self.params.sort_by_key(|p| p.id);
    }

    /// Look up an entry by ID.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<&ParamValue> {
        self.params.iter().find(|p| p.id == id).map(|p| &p.value)
    }

    /// JSON form: `{"total": n, "settings": [{"id", "length", "value"}]}`.
    pub fn to_json(&self) -> Result<Json> {
        let mut settings = Vec::with_capacity(self.params.len());
        for param in &self.params {
            let encoded = param.value.encode()?;
            settings.push(json!({
                "id": param.id,
                "length": encoded.len() as u8,
                "value": param.value.to_json(),
            }));
        }
        Ok(json!({ "total": self.params.len() as u8, "settings": settings }))
    }

    /// Parse the JSON form. `length` and `desc` entries are advisory and
    /// ignored; the value is re-encoded from its typed form.
    pub fn from_json(value: &Json) -> Result<Self> {
        let bad = |reason: &str| ProtocolError::DecodeFailed {
            msg_id: 0x8103,
            reason: reason.to_owned(),
        };

        let settings = value
            .get("settings")
            .and_then(Json::as_array)
            .ok_or_else(|| bad("missing settings array"))?;

        let mut params = Vec::with_capacity(settings.len());
        for setting in settings {
            let id = setting
                .get("id")
                .and_then(Json::as_u64)
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| bad("setting is missing a numeric id"))?;
            let raw = setting.get("value").ok_or_else(|| bad("setting is missing a value"))?;
            params.push(Param { id, value: ParamValue::from_json(id, raw)? });
        }
        Ok(Self { params })
    }
}

/// Driver-state-monitor settings (parameter `0xF365`).
///
/// Fixed record layout; fields are read and written in declaration order
/// with widths of 1, 2 or 4 bytes. The sentinels `0xFF`/`0xFFFF`/
/// `0xFFFFFFFF` mean "do not modify this field" and are carried through
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DsmSettings {
    /// Speed above which alarms are raised, km/h (0..=60).
    pub alarm_speed_threshold: u8,
    /// Prompt volume, 0 (mute) ..= 8.
    pub alarm_volume: u8,
    /// 0 off, 1 timed, 2 by distance, 3 on card insert.
    pub proactive_photo_strategy: u8,
    /// Timed-photo interval, seconds.
    pub proactive_photo_interval: u16,
    /// Distance-photo interval, metres.
    pub proactive_photo_distance_interval: u16,
    /// Photos per capture (1..=10).
    pub proactive_photo_count: u8,
    /// Interval between photos in one capture, 100 ms units.
    pub proactive_photo_interval_time: u8,
    /// Photo resolution code.
    pub photo_resolution: u8,
    /// Video resolution code.
    pub video_resolution: u8,
    /// Per-alarm enable bits.
    pub alarm_enabled: u32,
    /// Per-event enable bits.
    pub event_enabled: u32,
    /// Smoking-alarm debounce, seconds.
    pub smoking_alarm_interval: u16,
    /// Phone-call-alarm debounce, seconds.
    pub phone_call_alarm_interval: u16,
    /// Reserved.
    pub reserved_field1: u8,
    /// Reserved.
    pub reserved_field2: u8,
    /// Reserved.
    pub reserved_field3: u8,
    /// Speed splitting level-1 from level-2 fatigue alarms, km/h.
    pub fatigue_driving_speed_threshold: u8,
    /// Video seconds recorded around a fatigue alarm.
    pub fatigue_driving_video_recording_time: u8,
    /// Photos captured on a fatigue alarm.
    pub fatigue_driving_photo_count: u8,
    /// Interval between fatigue-alarm photos, 100 ms units.
    pub fatigue_driving_photo_interval: u8,
    /// Speed splitting level-1 from level-2 phone-call alarms, km/h.
    pub phone_call_alarm_speed_threshold: u8,
    /// Video seconds recorded around a phone-call alarm.
    pub phone_call_alarm_video_recording_time: u8,
    /// Driver-face photos captured on a phone-call alarm.
    pub phone_call_driver_face_photo_count: u8,
    /// Interval between those photos, 100 ms units.
    pub phone_call_driver_face_feature_interval: u8,
    /// Speed splitting level-1 from level-2 smoking alarms, km/h.
    pub smoking_alarm_speed_threshold: u8,
    /// Video seconds recorded around a smoking alarm.
    pub smoking_alarm_video_recording_time: u8,
    /// Driver-face photos captured on a smoking alarm.
    pub smoking_alarm_driver_face_photo_count: u8,
    /// Interval between those photos, 100 ms units.
    pub smoking_alarm_driver_face_photo_interval: u8,
    /// Speed splitting level-1 from level-2 distraction alarms, km/h.
    pub distracted_driving_speed_threshold: u8,
    /// Video seconds recorded around a distraction alarm.
    pub distracted_driving_video_recording_time: u8,
    /// Photos captured on a distraction alarm.
    pub distracted_driving_photo_count: u8,
    /// Interval between distraction-alarm photos, 100 ms units.
    pub distracted_driving_photo_interval: u8,
    /// Speed splitting level-1 from level-2 abnormal-driving alarms, km/h.
    pub abnormal_driving_speed_threshold: u8,
    /// Video seconds recorded around an abnormal-driving alarm.
    pub abnormal_driving_video_recording_time: u8,
    /// Photos captured on an abnormal-driving alarm.
    pub abnormal_driving_snap_photo_count: u8,
    /// Interval between abnormal-driving photos, 100 ms units.
    pub abnormal_driving_snap_photo_interval: u8,
    /// 0 off, 1 timed, 2 by distance, 3 on card insert.
    pub driver_identification_trigger: u8,
    /// Reserved.
    pub reserved_field4: u8,
    /// Reserved.
    pub reserved_field5: u8,
}

impl DsmSettings {
    /// Encoded size of the record in bytes.
    pub const WIRE_LEN: usize = 49;

    /// Read the record field by field in declaration order.
    pub fn decode(reader: &mut BodyReader<'_>) -> Result<Self> {
        Ok(Self {
            alarm_speed_threshold: reader.read_u8()?,
            alarm_volume: reader.read_u8()?,
            proactive_photo_strategy: reader.read_u8()?,
            proactive_photo_interval: reader.read_u16()?,
            proactive_photo_distance_interval: reader.read_u16()?,
            proactive_photo_count: reader.read_u8()?,
            proactive_photo_interval_time: reader.read_u8()?,
            photo_resolution: reader.read_u8()?,
            video_resolution: reader.read_u8()?,
            alarm_enabled: reader.read_u32()?,
            event_enabled: reader.read_u32()?,
            smoking_alarm_interval: reader.read_u16()?,
            phone_call_alarm_interval: reader.read_u16()?,
            reserved_field1: reader.read_u8()?,
            reserved_field2: reader.read_u8()?,
            reserved_field3: reader.read_u8()?,
            fatigue_driving_speed_threshold: reader.read_u8()?,
            fatigue_driving_video_recording_time: reader.read_u8()?,
            fatigue_driving_photo_count: reader.read_u8()?,
            fatigue_driving_photo_interval: reader.read_u8()?,
            phone_call_alarm_speed_threshold: reader.read_u8()?,
            phone_call_alarm_video_recording_time: reader.read_u8()?,
            phone_call_driver_face_photo_count: reader.read_u8()?,
            phone_call_driver_face_feature_interval: reader.read_u8()?,
            smoking_alarm_speed_threshold: reader.read_u8()?,
            smoking_alarm_video_recording_time: reader.read_u8()?,
            smoking_alarm_driver_face_photo_count: reader.read_u8()?,
            smoking_alarm_driver_face_photo_interval: reader.read_u8()?,
            distracted_driving_speed_threshold: reader.read_u8()?,
            distracted_driving_video_recording_time: reader.read_u8()?,
            distracted_driving_photo_count: reader.read_u8()?,
            distracted_driving_photo_interval: reader.read_u8()?,
            abnormal_driving_speed_threshold: reader.read_u8()?,
            abnormal_driving_video_recording_time: reader.read_u8()?,
            abnormal_driving_snap_photo_count: reader.read_u8()?,
            abnormal_driving_snap_photo_interval: reader.read_u8()?,
            driver_identification_trigger: reader.read_u8()?,
            reserved_field4: reader.read_u8()?,
            reserved_field5: reader.read_u8()?,
        })
    }

    /// Write the record field by field in declaration order.
    pub fn encode(&self, writer: &mut BodyWriter) {
        writer.write_u8(self.alarm_speed_threshold);
        writer.write_u8(self.alarm_volume);
        writer.write_u8(self.proactive_photo_strategy);
        writer.write_u16(self.proactive_photo_interval);
        writer.write_u16(self.proactive_photo_distance_interval);
        writer.write_u8(self.proactive_photo_count);
        writer.write_u8(self.proactive_photo_interval_time);
        writer.write_u8(self.photo_resolution);
        writer.write_u8(self.video_resolution);
        writer.write_u32(self.alarm_enabled);
        writer.write_u32(self.event_enabled);
        writer.write_u16(self.smoking_alarm_interval);
        writer.write_u16(self.phone_call_alarm_interval);
        writer.write_u8(self.reserved_field1);
        writer.write_u8(self.reserved_field2);
        writer.write_u8(self.reserved_field3);
        writer.write_u8(self.fatigue_driving_speed_threshold);
        writer.write_u8(self.fatigue_driving_video_recording_time);
        writer.write_u8(self.fatigue_driving_photo_count);
        writer.write_u8(self.fatigue_driving_photo_interval);
        writer.write_u8(self.phone_call_alarm_speed_threshold);
        writer.write_u8(self.phone_call_alarm_video_recording_time);
        writer.write_u8(self.phone_call_driver_face_photo_count);
        writer.write_u8(self.phone_call_driver_face_feature_interval);
        writer.write_u8(self.smoking_alarm_speed_threshold);
        writer.write_u8(self.smoking_alarm_video_recording_time);
        writer.write_u8(self.smoking_alarm_driver_face_photo_count);
        writer.write_u8(self.smoking_alarm_driver_face_photo_interval);
        writer.write_u8(self.distracted_driving_speed_threshold);
        writer.write_u8(self.distracted_driving_video_recording_time);
        writer.write_u8(self.distracted_driving_photo_count);
        writer.write_u8(self.distracted_driving_photo_interval);
        writer.write_u8(self.abnormal_driving_speed_threshold);
        writer.write_u8(self.abnormal_driving_video_recording_time);
        writer.write_u8(self.abnormal_driving_snap_photo_count);
        writer.write_u8(self.abnormal_driving_snap_photo_interval);
        writer.write_u8(self.driver_identification_trigger);
        writer.write_u8(self.reserved_field4);
        writer.write_u8(self.reserved_field5);
    }
}
