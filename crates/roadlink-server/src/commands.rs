//! Outgoing-command dispatcher.
//!
//! Server-initiated commands travel the session's write path and await the
//! terminal's answer through the pending-command table. Correlation is by
//! `(phone, request msg-id, request serial)`: a generic terminal ack names
//! the request directly, and a typed reply (query-parameters response)
//! carries the request serial.
//!
//! At most one command per key is in flight; a duplicate send fails
//! immediately. Timeouts evict the pending entry so the same command can
//! be retried; a session closing mid-wait fails the command with
//! `ConnectionClosed`.

use std::sync::Arc;
use std::time::Duration;

use roadlink_core::{Core, PendingKey};
use roadlink_proto::{Body, Header, Packet};
use tokio::task::JoinSet;

use crate::error::ServerError;

/// Send `body` to the terminal bound to `phone` and await its response.
pub async fn send_command(
    core: &Core,
    phone: &str,
    body: Body,
    timeout: Duration,
) -> Result<Body, ServerError> {
    let device = core.devices.get_by_phone(phone)?;
    let session_id =
        core.sessions.session_for_phone(phone).ok_or(ServerError::ConnectionClosed)?;

    let serial = core.sessions.next_serial(&session_id)?;
    let msg_id = body.msg_id();
    let key = PendingKey { phone: phone.to_owned(), msg_id, serial };
    let waiter = core.pending.register(key.clone())?;

    let mut header = Header::new(device.version, phone, msg_id, serial);
    header.protocol_version = device.protocol_version;

    let frame = match Packet::from_body(header, &body).and_then(|p| p.encode()) {
        Ok(frame) => frame,
        Err(e) => {
            core.pending.remove(&key);
            return Err(e.into());
        }
    };
    if let Err(e) = core.sessions.send(&session_id, frame) {
        core.pending.remove(&key);
        return Err(e.into());
    }

    tracing::debug!(phone, msg_id = format_args!("{msg_id:#06x}"), serial, "command sent");

    match tokio::time::timeout(timeout, waiter).await {
        Ok(Ok(response)) => Ok(response),
        // The pending entry was dropped by session teardown.
        Ok(Err(_)) => Err(ServerError::ConnectionClosed),
        Err(_) => {
            core.pending.remove(&key);
            Err(ServerError::Timeout { phone: phone.to_owned(), msg_id })
        }
    }
}

/// Send `body` to every registered device, await all responses within one
/// timeout, and return the per-phone outcomes.
pub async fn broadcast(
    core: &Arc<Core>,
    body: &Body,
    timeout: Duration,
) -> Vec<(String, Result<Body, ServerError>)> {
    let mut tasks = JoinSet::new();
    for phone in core.devices.phones() {
        let core = Arc::clone(core);
        let body = body.clone();
        tasks.spawn(async move {
            let result = send_command(&core, &phone, body, timeout).await;
            (phone, result)
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => tracing::error!(error = %e, "broadcast task panicked"),
        }
    }
    outcomes.sort_by(|a, b| a.0.cmp(&b.0));
    outcomes
}
