//! Property-based tests for the wire codec.
//!
//! These verify the round-trip laws for ALL valid inputs, not just specific
//! examples: full packets (framing + escaping + checksum + header), every
//! supported message body, every parameter kind over its legal value
//! domain, and the BCD/GBK primitive encodings.

use proptest::prelude::*;
use roadlink_proto::{
    Ack, AckResult, AlarmIdentity, AlarmPosition, Attachment, Authenticate, Body, CarState,
    DsmAlarm, Fragment, Header, Location, Packet, Param, ParamValue, ParameterSet, ParamsReply,
    Register, RegisterAck, Version,
    codec::{BodyReader, BodyWriter, decode_gbk, encode_gbk},
};

fn arbitrary_version() -> impl Strategy<Value = Version> {
    prop_oneof![Just(Version::V2013), Just(Version::V2019)]
}

fn arbitrary_phone() -> impl Strategy<Value = String> {
    prop::collection::vec(0u8..=9, 12)
        .prop_map(|digits| digits.into_iter().map(|d| char::from(b'0' + d)).collect())
}

fn arbitrary_bcd_time() -> impl Strategy<Value = String> {
    prop::collection::vec(0u8..=9, 12)
        .prop_map(|digits| digits.into_iter().map(|d| char::from(b'0' + d)).collect())
}

fn arbitrary_ascii(max: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(proptest::char::range('0', 'z').prop_filter("ascii alnum", |c| {
        c.is_ascii_alphanumeric()
    }), 1..=max)
    .prop_map(|chars| chars.into_iter().collect())
}

// Code points every GBK table contains: ASCII plus common CJK.
fn arbitrary_gbk_text() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            proptest::char::range('0', 'z')
                .prop_filter("ascii alnum", |c| c.is_ascii_alphanumeric()),
            proptest::char::range('\u{4e00}', '\u{4eff}'),
        ],
        0..12,
    )
    .prop_map(|chars| chars.into_iter().collect())
}

fn arbitrary_position() -> impl Strategy<Value = AlarmPosition> {
    (any::<u8>(), any::<u16>(), any::<u32>(), any::<u32>(), arbitrary_bcd_time(), any::<u16>())
        .prop_map(|(speed, altitude, latitude, longitude, time, state)| AlarmPosition {
            speed,
            altitude,
            latitude,
            longitude,
            time,
            car_state: CarState(state),
        })
}

fn arbitrary_identity() -> impl Strategy<Value = AlarmIdentity> {
    (any::<[u8; 7]>(), arbitrary_bcd_time(), any::<u8>(), any::<u8>())
        .prop_map(|(terminal_id, time, sequence, attachment_count)| AlarmIdentity {
            terminal_id,
            time,
            sequence,
            attachment_count,
            reserved: 0,
        })
}

fn arbitrary_dsm_attachment() -> impl Strategy<Value = Attachment> {
    (any::<u32>(), 0u8..=2, any::<u8>(), 1u8..=2, any::<u8>(), arbitrary_position(), arbitrary_identity())
        .prop_map(|(alarm_id, flag, alarm_type, level, fatigue, position, identity)| {
            Attachment::Dsm(DsmAlarm {
                alarm_id,
                flag,
                alarm_type,
                level,
                fatigue,
                reserved: [0; 4],
                position,
                identity,
            })
        })
}

fn arbitrary_location() -> impl Strategy<Value = Location> {
    (
        any::<u32>(),
        any::<u32>(),
        any::<u32>(),
        any::<u32>(),
        any::<u16>(),
        any::<u16>(),
        0u16..360,
        arbitrary_bcd_time(),
        prop::collection::vec(arbitrary_dsm_attachment(), 0..3),
    )
        .prop_map(
            |(alarm_sign, status_sign, latitude, longitude, altitude, speed, direction, time, attachments)| {
                Location {
                    alarm_sign,
                    status_sign,
                    latitude,
                    longitude,
                    altitude,
                    speed,
                    direction,
                    time,
                    attachments,
                }
            },
        )
}

fn arbitrary_param() -> impl Strategy<Value = Param> {
    prop_oneof![
        (any::<u32>()).prop_map(|v| Param { id: 0x0001, value: ParamValue::DWord(v) }),
        (any::<u32>()).prop_map(|v| Param { id: 0x0029, value: ParamValue::DWord(v) }),
        (any::<u16>()).prop_map(|v| Param { id: 0x0031, value: ParamValue::Word(v) }),
        (any::<u8>()).prop_map(|v| Param { id: 0x0084, value: ParamValue::Byte(v) }),
        arbitrary_gbk_text().prop_map(|v| Param { id: 0x0013, value: ParamValue::Gbk(v) }),
        prop::collection::vec(0u8..=9, 2..=8).prop_filter("even digits", |d| d.len() % 2 == 0)
            .prop_map(|digits| Param {
                id: 0x0032,
                value: ParamValue::Bcd(
                    digits.into_iter().map(|d| char::from(b'0' + d)).collect(),
                ),
            }),
        arbitrary_ascii(16).prop_map(|v| Param { id: 0x0110, value: ParamValue::Ascii(v) }),
    ]
}

fn arbitrary_parameter_set() -> impl Strategy<Value = ParameterSet> {
    prop::collection::vec(arbitrary_param(), 0..6).prop_map(|mut params| {
        // One entry per id; duplicate ids are legal on the wire but make
        // equality assertions ambiguous.
        params.sort_by_key(|p| p.id);
        params.dedup_by_key(|p| p.id);
        ParameterSet { params }
    })
}

fn arbitrary_body() -> impl Strategy<Value = Body> {
    let ack = (any::<u16>(), any::<u16>(), 0u8..4).prop_map(|(serial, id, result)| Ack {
        answer_serial: serial,
        answer_msg_id: id,
        result: AckResult::from_u8(result),
    });

    prop_oneof![
        ack.clone().prop_map(Body::TerminalAck),
        ack.prop_map(Body::PlatformAck),
        Just(Body::Heartbeat),
        Just(Body::Deregister),
        Just(Body::QueryParams),
        (
            any::<u16>(),
            any::<u16>(),
            arbitrary_ascii(5),
            arbitrary_ascii(20),
            arbitrary_ascii(7),
            any::<u8>(),
            arbitrary_gbk_text(),
        )
            .prop_map(|(province_id, city_id, manufacturer, model, terminal_id, plate_color, plate)| {
                Body::Register(Register {
                    province_id,
                    city_id,
                    manufacturer,
                    model,
                    terminal_id,
                    plate_color,
                    plate,
                })
            }),
        (any::<u16>(), arbitrary_ascii(16)).prop_map(|(serial, code)| {
            Body::RegisterAck(RegisterAck {
                answer_serial: serial,
                result: 0,
                auth_code: Some(code),
            })
        }),
        arbitrary_ascii(16).prop_map(|code| {
            Body::Authenticate(Authenticate {
                auth_code: code,
                imei: String::new(),
                software_version: String::new(),
            })
        }),
        arbitrary_location().prop_map(Body::Location),
        arbitrary_parameter_set().prop_map(Body::SetParams),
        (any::<u16>(), arbitrary_parameter_set()).prop_map(|(serial, params)| {
            Body::ParamsReply(ParamsReply { answer_serial: serial, params })
        }),
    ]
}

#[test]
fn prop_body_encode_decode_roundtrip() {
    proptest!(|(body in arbitrary_body())| {
        // Register/Authenticate widths are edition-dependent; the generated
        // field lengths fit the narrower 2013 layout.
        let bytes = body.encode(Version::V2013).expect("encode should succeed");
        let decoded = Body::decode(body.msg_id(), Version::V2013, &bytes)
            .expect("decode should succeed");
        prop_assert_eq!(decoded, body);
    });
}

#[test]
fn prop_packet_roundtrip_is_byte_exact() {
    proptest!(|(
        body in arbitrary_body(),
        version in arbitrary_version(),
        phone in arbitrary_phone(),
        serial in any::<u16>(),
    )| {
        let header = Header::new(version, phone, body.msg_id(), serial);
        let packet = Packet::from_body(header, &body).expect("packet should build");

        let wire = packet.encode().expect("encode should succeed");
        let parsed = Packet::decode(&wire).expect("decode should succeed");

        prop_assert_eq!(parsed.header.msg_id, packet.header.msg_id);
        prop_assert_eq!(parsed.header.serial, packet.header.serial);
        prop_assert_eq!(parsed.header.attr.body_length as usize, packet.body.len());
        prop_assert_eq!(&parsed.body, &packet.body);

        // Re-encoding the parsed packet reproduces the wire bytes exactly.
        let rewire = parsed.encode().expect("re-encode should succeed");
        prop_assert_eq!(rewire, wire);
    });
}

#[test]
fn prop_fragmented_header_roundtrip() {
    proptest!(|(
        phone in arbitrary_phone(),
        serial in any::<u16>(),
        total in 2u16..=16,
        index in 1u16..=16,
        version in arbitrary_version(),
    )| {
        prop_assume!(index <= total);
        let mut header = Header::new(version, phone, 0x0200, serial);
        header.fragment = Some(Fragment { total, index });

        let mut w = BodyWriter::new();
        header.encode(&mut w).expect("encode should succeed");
        let bytes = w.into_bytes();
        let mut r = BodyReader::new(&bytes);
        let parsed = Header::decode(&mut r).expect("decode should succeed");

        prop_assert!(parsed.attr.fragmented);
        prop_assert_eq!(parsed.fragment, Some(Fragment { total, index }));
    });
}

#[test]
fn prop_bcd_roundtrip_even_digit_strings() {
    proptest!(|(digits in prop::collection::vec(0u8..=9, 1..16))| {
        let text: String = digits.iter().map(|&d| char::from(b'0' + d)).collect();
        let mut w = BodyWriter::new();
        w.write_bcd(&text).expect("digits encode");
        let bytes = w.into_bytes();

        let mut r = BodyReader::new(&bytes);
        let parsed = r.read_bcd(bytes.len()).expect("bcd decodes");

        // Odd-length input gains one leading zero from padding.
        if text.len() % 2 == 0 {
            prop_assert_eq!(parsed, text);
        } else {
            prop_assert_eq!(parsed, format!("0{text}"));
        }
    });
}

#[test]
fn prop_gbk_roundtrip() {
    proptest!(|(text in arbitrary_gbk_text())| {
        let raw = encode_gbk(&text).expect("text lies in GBK");
        prop_assert_eq!(decode_gbk(&raw).expect("bytes decode"), text);
    });
}

#[test]
fn prop_unsupported_msg_ids_are_rejected() {
    proptest!(|(msg_id in any::<u16>())| {
        let known = [
            0x0001u16, 0x0002, 0x0003, 0x0100, 0x0102, 0x0104, 0x0200, 0x8001, 0x8100, 0x8103,
            0x8104,
        ];
        prop_assume!(!known.contains(&msg_id));
        prop_assert!(Body::decode(msg_id, Version::V2013, &[]).is_err());
    });
}
