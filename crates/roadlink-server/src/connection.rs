//! Per-connection pipeline.
//!
//! One task per accepted socket drives the state machine
//! `read frame -> decode header -> reassemble? -> decode body -> handle ->
//! ack -> write`. The read path is strictly serialised: one message at a
//! time, and the ack for message N is queued before message N+1 is looked
//! at. Writes (acks and dispatcher commands alike) funnel through the
//! session's outbound channel, so whole frames never interleave.
//!
//! Failure classification:
//! - framing errors drop the frame and keep the connection
//! - header errors are logged and dropped (there is no phone to answer)
//! - body-decode failures answer with result 2, unknown ids with 3,
//!   handler failures with 1
//! - EOF/reset tears the session down, which marks the device offline and
//!   fails every pending command for its phone

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use roadlink_core::{Core, CoreError, Reassembler};
use roadlink_proto::{
    Ack, AckResult, Body, Header, Packet, ProtocolError, codec::BodyReader, framing,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use crate::handlers::{self, Reply};
use crate::error::ServerError;

/// Fragment-reassembly sweep cadence.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Drive one terminal connection until EOF, eviction or shutdown.
pub async fn serve(
    core: Arc<Core>,
    mut stream: TcpStream,
    session_id: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Bytes>();
    if !core.sessions.insert(&session_id, outbound_tx) {
        tracing::warn!(session_id, "duplicate session id, dropping connection");
        return;
    }
    tracing::debug!(session_id, "connection accepted");

    let mut reassembler = Reassembler::new(core.config.fragment_timeout);
    let mut buf = BytesMut::with_capacity(4096);
    let mut tick = tokio::time::interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let (mut reader, mut writer) = stream.split();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::debug!(session_id, "shutdown requested");
                break;
            }

            queued = outbound_rx.recv() => {
                match queued {
                    Some(frame) => {
                        if let Err(e) = writer.write_all(&frame).await {
                            tracing::debug!(session_id, error = %e, "write failed");
                            break;
                        }
                    }
                    // Sender dropped: the session was evicted by a rebind.
                    None => {
                        tracing::debug!(session_id, "session evicted");
                        break;
                    }
                }
            }

            _ = tick.tick() => {
                for evicted in reassembler.sweep(Instant::now()) {
                    tracing::warn!(session_id, error = %evicted, "fragment group evicted");
                }
            }

            read = reader.read_buf(&mut buf) => {
                match read {
                    Ok(0) => {
                        tracing::debug!(session_id, "peer closed the connection");
                        break;
                    }
                    Ok(_) => {
                        while let Some(raw) = framing::next_frame(&mut buf) {
                            process_frame(&core, &session_id, &mut reassembler, &raw);
                        }
                    }
                    Err(e) => {
                        tracing::debug!(session_id, error = %e, "read failed");
                        break;
                    }
                }
            }
        }
    }

    // Flush anything the handlers queued before teardown.
    while let Ok(frame) = outbound_rx.try_recv() {
        let _ = writer.write_all(&frame).await;
    }
    let _ = writer.shutdown().await;

    if let Some(phone) = core.close_session(&session_id) {
        tracing::info!(session_id, phone, "session closed");
    } else {
        tracing::debug!(session_id, "session closed");
    }
}

/// Run one raw frame through the pipeline, queueing any reply on the
/// session's outbound channel.
fn process_frame(core: &Core, session_id: &str, reassembler: &mut Reassembler, raw: &[u8]) {
    // Framing errors: drop the frame, stay connected.
    let payload = match framing::decode_frame(raw) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(session_id, error = %e, "bad frame dropped");
            return;
        }
    };

    // Header errors: there is no phone to answer; log and drop.
    let mut reader = BodyReader::new(&payload);
    let header = match Header::decode(&mut reader) {
        Ok(header) => header,
        Err(e) => {
            tracing::warn!(session_id, error = %e, "bad header dropped");
            return;
        }
    };

    let rest = reader.read_to_end();
    let declared = header.attr.body_length as usize;
    if declared > rest.len() {
        tracing::warn!(
            session_id,
            declared,
            carried = rest.len(),
            "declared body length overruns the frame"
        );
        queue_ack(core, session_id, &header, AckResult::BadMessage);
        return;
    }
    let body = Bytes::copy_from_slice(&rest[..declared]);

    // Reassembly: individual fragments produce no reply; the synthetic
    // unfragmented message re-enters the pipeline here.
    let packet = if header.attr.fragmented {
        match reassembler.insert(&header, body, Instant::now()) {
            Ok(Some(complete)) => complete,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "invalid fragment dropped");
                return;
            }
        }
    } else {
        Packet::new(header, body)
    };

    let header = packet.header.clone();
    let decoded = match packet.body() {
        Ok(decoded) => decoded,
        Err(ProtocolError::UnsupportedMsgId(id)) => {
            tracing::debug!(session_id, msg_id = format_args!("{id:#06x}"), "unsupported message");
            queue_ack(core, session_id, &header, AckResult::Unsupported);
            return;
        }
        Err(e) => {
            tracing::warn!(session_id, error = %e, "body decode failed");
            queue_ack(core, session_id, &header, AckResult::BadMessage);
            return;
        }
    };

    match handlers::dispatch(core, session_id, &header, decoded) {
        Ok(Reply::None) => {}
        Ok(Reply::Default) => queue_ack(core, session_id, &header, AckResult::Success),
        Ok(Reply::Message(reply)) => queue_message(core, session_id, &header, &reply),
        Err(ServerError::Protocol(ProtocolError::UnsupportedMsgId(_))) => {
            queue_ack(core, session_id, &header, AckResult::Unsupported);
        }
        Err(ServerError::Protocol(_)) => {
            queue_ack(core, session_id, &header, AckResult::BadMessage);
        }
        Err(e) => {
            tracing::warn!(session_id, error = %e, "handler failed");
            queue_ack(core, session_id, &header, AckResult::Failure);
        }
    }
}

/// Queue the platform generic ack for an incoming message.
fn queue_ack(core: &Core, session_id: &str, incoming: &Header, result: AckResult) {
    let body = Body::PlatformAck(Ack {
        answer_serial: incoming.serial,
        answer_msg_id: incoming.msg_id,
        result,
    });
    queue_message(core, session_id, incoming, &body);
}

/// Encode `body` under the incoming header's edition and queue it.
fn queue_message(core: &Core, session_id: &str, incoming: &Header, body: &Body) {
    let serial = match core.sessions.next_serial(session_id) {
        Ok(serial) => serial,
        Err(_) => return, // session already torn down
    };

    let mut header =
        Header::new(incoming.version(), incoming.phone.clone(), body.msg_id(), serial);
    header.protocol_version = incoming.protocol_version;

    let frame = Packet::from_body(header, body).and_then(|p| p.encode());
    match frame {
        Ok(frame) => {
            if let Err(CoreError::ConnectionClosed) = core.sessions.send(session_id, frame) {
                tracing::debug!(session_id, "reply dropped, connection closing");
            }
        }
        Err(e) => tracing::error!(session_id, error = %e, "failed to encode reply"),
    }
}
