//! Per-message handlers.
//!
//! [`dispatch`] selects a handler by the decoded body and returns what the
//! pipeline should answer with: a semantically specific reply, the default
//! generic ack, or nothing (responses to server-initiated commands are
//! never themselves acked). Handlers are pure with respect to I/O: input
//! is `(core, session-id, header, body)`, output is a [`Reply`] plus
//! registry mutations.

use roadlink_core::{AlarmMessage, Core, Device, DeviceStatus};
use roadlink_core::PendingKey;
use roadlink_proto::{
    Ack, Authenticate, Body, Header, Location, MSG_QUERY_PARAMS, ParamValue, ParamsReply,
    ProtocolError, Register, RegisterAck,
};

use crate::error::ServerError;

/// What the pipeline should send back for a handled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Send nothing (the message was itself a response).
    None,
    /// Send the default platform generic ack with result 0.
    Default,
    /// Send this message instead of the generic ack.
    Message(Body),
}

/// Route a decoded message to its handler.
///
/// Messages that only the platform may send are rejected as unsupported;
/// the pipeline answers those with result 3.
pub fn dispatch(
    core: &Core,
    session_id: &str,
    header: &Header,
    body: Body,
) -> Result<Reply, ServerError> {
    match body {
        Body::Register(register) => handle_register(core, session_id, header, register),
        Body::Authenticate(auth) => handle_authenticate(core, session_id, header, &auth),
        Body::Heartbeat => handle_heartbeat(core, header),
        Body::Deregister => handle_deregister(core, header),
        Body::Location(location) => handle_location(core, header, &location),
        Body::TerminalAck(ack) => handle_terminal_ack(core, header, ack),
        Body::ParamsReply(reply) => handle_params_reply(core, header, reply),
        // Platform-direction messages arriving inbound.
        Body::PlatformAck(_)
        | Body::RegisterAck(_)
        | Body::SetParams(_)
        | Body::QueryParams => {
            Err(ServerError::Protocol(ProtocolError::UnsupportedMsgId(header.msg_id)))
        }
    }
}

/// Registration creates (or refreshes) the device, binds the phone to this
/// session and answers with an auth code.
fn handle_register(
    core: &Core,
    session_id: &str,
    header: &Header,
    register: Register,
) -> Result<Reply, ServerError> {
    let phone = &header.phone;
    let auth_code = phone.clone();

    let mut device = core.devices.get_by_phone(phone).unwrap_or_default();
    device.phone = phone.clone();
    device.plate = register.plate;
    device.province_id = register.province_id;
    device.city_id = register.city_id;
    device.plate_color = register.plate_color;
    device.version = header.version();
    device.protocol_version = header.protocol_version;
    device.session_id = Some(session_id.to_owned());
    device.auth_code = auth_code.clone();
    core.devices.upsert(device);

    bind_session(core, session_id, phone)?;
    core.devices.set_status(phone, DeviceStatus::Online)?;

    tracing::info!(phone, session_id, "terminal registered");
    Ok(Reply::Message(Body::RegisterAck(RegisterAck {
        answer_serial: header.serial,
        result: 0,
        auth_code: Some(auth_code),
    })))
}

/// Authentication verifies the code issued at registration. A terminal
/// unknown to the registry (the server restarted; terminals keep their
/// code) is admitted and recorded.
fn handle_authenticate(
    core: &Core,
    session_id: &str,
    header: &Header,
    auth: &Authenticate,
) -> Result<Reply, ServerError> {
    let phone = &header.phone;

    match core.devices.get_by_phone(phone) {
        Ok(device) => {
            if !device.auth_code.is_empty() && device.auth_code != auth.auth_code {
                return Err(ServerError::HandlerFailed(format!(
                    "auth code mismatch for {phone}"
                )));
            }
            core.devices.update(phone, |d| d.session_id = Some(session_id.to_owned()))?;
        }
        Err(_) => {
            core.devices.upsert(Device {
                phone: phone.clone(),
                version: header.version(),
                protocol_version: header.protocol_version,
                session_id: Some(session_id.to_owned()),
                auth_code: auth.auth_code.clone(),
                ..Device::default()
            });
        }
    }

    bind_session(core, session_id, phone)?;
    core.devices.set_status(phone, DeviceStatus::Online)?;

    tracing::info!(phone, session_id, "terminal authenticated");
    Ok(Reply::Default)
}

fn handle_heartbeat(core: &Core, header: &Header) -> Result<Reply, ServerError> {
    if core.devices.has_phone(&header.phone) {
        core.devices.set_status(&header.phone, DeviceStatus::Online)?;
    }
    tracing::debug!(phone = header.phone, serial = header.serial, "heartbeat");
    Ok(Reply::Default)
}

/// Deregistration destroys the device record and its cached telemetry.
fn handle_deregister(core: &Core, header: &Header) -> Result<Reply, ServerError> {
    let phone = &header.phone;
    if core.devices.remove(phone).is_ok() {
        core.alarms.remove(phone);
        tracing::info!(phone, "terminal deregistered");
    }
    Ok(Reply::Default)
}

/// Position reports feed the location ring; alarming reports additionally
/// feed the alarm cache, which fires the embedder hook.
fn handle_location(core: &Core, header: &Header, location: &Location) -> Result<Reply, ServerError> {
    let phone = &header.phone;
    core.geo.push(phone, location.clone());

    if let Some(message) = AlarmMessage::from_location(phone, location) {
        tracing::debug!(phone, alarm_id = message.alarm.id, "alarm reported");
        core.alarms.store(message);
    }

    if core.devices.has_phone(phone) {
        core.devices.set_status(phone, DeviceStatus::Online)?;
    }
    Ok(Reply::Default)
}

/// A terminal generic ack answers an earlier server command.
fn handle_terminal_ack(core: &Core, header: &Header, ack: Ack) -> Result<Reply, ServerError> {
    let key = PendingKey {
        phone: header.phone.clone(),
        msg_id: ack.answer_msg_id,
        serial: ack.answer_serial,
    };
    if !core.pending.complete(&key, Body::TerminalAck(ack)) {
        tracing::debug!(
            phone = header.phone,
            msg_id = format_args!("{:#06x}", ack.answer_msg_id),
            serial = ack.answer_serial,
            "unsolicited terminal ack"
        );
    }
    Ok(Reply::None)
}

/// A query-parameters response refreshes the device's cached parameter
/// set before waking the command that asked.
fn handle_params_reply(core: &Core, header: &Header, reply: ParamsReply) -> Result<Reply, ServerError> {
    let phone = &header.phone;

    if core.devices.has_phone(phone) {
        core.devices.update(phone, |device| {
            device.params = reply.params.clone();
            if let Some(ParamValue::DWord(secs)) = reply.params.get(0x0001) {
                device.keepalive_secs = *secs;
            }
        })?;
    }

    let key = PendingKey {
        phone: phone.clone(),
        msg_id: MSG_QUERY_PARAMS,
        serial: reply.answer_serial,
    };
    if !core.pending.complete(&key, Body::ParamsReply(reply)) {
        tracing::debug!(phone, "unsolicited query-parameters response");
    }
    Ok(Reply::None)
}

fn bind_session(core: &Core, session_id: &str, phone: &str) -> Result<(), ServerError> {
    if let Some(evicted) = core.sessions.bind_phone(session_id, phone)? {
        tracing::info!(phone, evicted, session_id, "phone rebound, closed earlier session");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use roadlink_core::CoreError;
    use roadlink_proto::{AckResult, Param, ParameterSet, Version};
    use tokio::sync::mpsc;

    use super::*;

    fn core_with_session(session_id: &str) -> (Core, mpsc::UnboundedReceiver<Bytes>) {
        let core = Core::default();
        let (tx, rx) = mpsc::unbounded_channel();
        core.sessions.insert(session_id, tx);
        (core, rx)
    }

    fn header(msg_id: u16, phone: &str, serial: u16) -> Header {
        Header::new(Version::V2013, phone, msg_id, serial)
    }

    fn register_body() -> Register {
        Register {
            province_id: 31,
            city_id: 100,
            manufacturer: "RDLNK".into(),
            model: "RL-100".into(),
            terminal_id: "T000001".into(),
            plate_color: 1,
            plate: "\u{4eac}A12345".into(),
        }
    }

    #[test]
    fn register_creates_device_and_replies_with_auth_code() {
        let (core, _rx) = core_with_session("s1");
        let header = header(0x0100, "013812345678", 5);

        let reply =
            dispatch(&core, "s1", &header, Body::Register(register_body())).unwrap();

        let Reply::Message(Body::RegisterAck(ack)) = reply else {
            panic!("expected a register ack, got {reply:?}");
        };
        assert_eq!(ack.answer_serial, 5);
        assert_eq!(ack.result, 0);
        assert!(ack.auth_code.is_some());

        let device = core.devices.get_by_phone("013812345678").unwrap();
        assert_eq!(device.status, DeviceStatus::Online);
        assert_eq!(device.plate, "\u{4eac}A12345");
        assert_eq!(core.sessions.phone_of("s1").as_deref(), Some("013812345678"));
    }

    #[test]
    fn second_registration_for_same_phone_evicts_first_session() {
        let (core, _rx1) = core_with_session("s1");
        let (tx2, _rx2) = mpsc::unbounded_channel();
        core.sessions.insert("s2", tx2);

        dispatch(&core, "s1", &header(0x0100, "013812345678", 1), Body::Register(register_body()))
            .unwrap();
        dispatch(&core, "s2", &header(0x0100, "013812345678", 1), Body::Register(register_body()))
            .unwrap();

        assert!(!core.sessions.contains("s1"));
        assert_eq!(core.sessions.session_for_phone("013812345678").as_deref(), Some("s2"));
    }

    #[test]
    fn authenticate_accepts_issued_code_and_rejects_wrong_one() {
        let (core, _rx) = core_with_session("s1");
        let reply = dispatch(
            &core,
            "s1",
            &header(0x0100, "013812345678", 1),
            Body::Register(register_body()),
        )
        .unwrap();
        let Reply::Message(Body::RegisterAck(ack)) = reply else { panic!() };
        let code = ack.auth_code.unwrap();

        let good = Authenticate {
            auth_code: code,
            imei: String::new(),
            software_version: String::new(),
        };
        assert_eq!(
            dispatch(&core, "s1", &header(0x0102, "013812345678", 2), Body::Authenticate(good))
                .unwrap(),
            Reply::Default
        );

        let bad = Authenticate {
            auth_code: "wrong".into(),
            imei: String::new(),
            software_version: String::new(),
        };
        assert!(matches!(
            dispatch(&core, "s1", &header(0x0102, "013812345678", 3), Body::Authenticate(bad)),
            Err(ServerError::HandlerFailed(_))
        ));
    }

    #[test]
    fn authenticate_admits_unknown_terminal() {
        let (core, _rx) = core_with_session("s1");
        let auth = Authenticate {
            auth_code: "carried-over".into(),
            imei: String::new(),
            software_version: String::new(),
        };

        let reply =
            dispatch(&core, "s1", &header(0x0102, "013812345678", 1), Body::Authenticate(auth))
                .unwrap();
        assert_eq!(reply, Reply::Default);
        assert_eq!(
            core.devices.get_by_phone("013812345678").unwrap().status,
            DeviceStatus::Online
        );
    }

    #[test]
    fn heartbeat_gets_default_ack() {
        let (core, _rx) = core_with_session("s1");
        let reply = dispatch(&core, "s1", &header(0x0002, "013812345678", 1), Body::Heartbeat)
            .unwrap();
        assert_eq!(reply, Reply::Default);
    }

    #[test]
    fn deregister_destroys_the_device() {
        let (core, _rx) = core_with_session("s1");
        dispatch(&core, "s1", &header(0x0100, "013812345678", 1), Body::Register(register_body()))
            .unwrap();

        dispatch(&core, "s1", &header(0x0003, "013812345678", 2), Body::Deregister).unwrap();
        assert!(matches!(
            core.devices.get_by_phone("013812345678"),
            Err(CoreError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn location_feeds_the_geo_ring() {
        let (core, _rx) = core_with_session("s1");
        let location = Location {
            alarm_sign: 0,
            status_sign: 2,
            latitude: 31_000_000,
            longitude: 121_000_000,
            altitude: 15,
            speed: 500,
            direction: 180,
            time: "240101120000".into(),
            attachments: vec![],
        };

        dispatch(&core, "s1", &header(0x0200, "013812345678", 1), Body::Location(location))
            .unwrap();
        assert_eq!(core.geo.latest("013812345678").unwrap().speed, 500);
        assert!(core.alarms.get("013812345678").is_none());
    }

    #[test]
    fn terminal_ack_completes_the_pending_command() {
        let (core, _rx) = core_with_session("s1");
        let key = PendingKey { phone: "013812345678".into(), msg_id: 0x8103, serial: 9 };
        let waiter = core.pending.register(key).unwrap();

        let ack = Ack { answer_serial: 9, answer_msg_id: 0x8103, result: AckResult::Success };
        let reply =
            dispatch(&core, "s1", &header(0x0001, "013812345678", 1), Body::TerminalAck(ack))
                .unwrap();
        assert_eq!(reply, Reply::None);
        assert!(waiter.blocking_recv().is_ok());
    }

    #[test]
    fn params_reply_refreshes_device_cache() {
        let (core, _rx) = core_with_session("s1");
        dispatch(&core, "s1", &header(0x0100, "013812345678", 1), Body::Register(register_body()))
            .unwrap();

        let params = ParameterSet {
            params: vec![Param { id: 0x0001, value: ParamValue::DWord(45) }],
        };
        let reply = ParamsReply { answer_serial: 7, params };
        dispatch(&core, "s1", &header(0x0104, "013812345678", 2), Body::ParamsReply(reply))
            .unwrap();

        let device = core.devices.get_by_phone("013812345678").unwrap();
        assert_eq!(device.keepalive_secs, 45);
        assert_eq!(device.params.get(0x0001), Some(&ParamValue::DWord(45)));
    }

    #[test]
    fn platform_direction_messages_are_unsupported_inbound() {
        let (core, _rx) = core_with_session("s1");
        let result =
            dispatch(&core, "s1", &header(0x8104, "013812345678", 1), Body::QueryParams);
        assert!(matches!(
            result,
            Err(ServerError::Protocol(ProtocolError::UnsupportedMsgId(0x8104)))
        ));
    }
}
