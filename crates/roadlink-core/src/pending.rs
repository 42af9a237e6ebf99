//! Pending-command table for request/response correlation.
//!
//! Server-initiated commands are keyed by `(phone, msg-id, serial)` of the
//! *request*; the terminal's answer (a generic ack, or a typed reply such
//! as a query-parameters response) names that key and fires the waiter
//! exactly once.
//!
//! # Invariants
//!
//! - At most one entry per key; a duplicate send is rejected at the call
//!   site.
//! - Timeout eviction is the sender's job ([`PendingTable::remove`]).
//! - On session close every entry for the phone is dropped, which wakes
//!   its waiter with a closed-channel error.

use std::collections::HashMap;
use std::sync::Mutex;

use roadlink_proto::Body;
use tokio::sync::oneshot;

use crate::error::CoreError;

/// Correlation key of an in-flight command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingKey {
    /// Target terminal phone.
    pub phone: String,
    /// Message id of the request.
    pub msg_id: u16,
    /// Serial number the request was sent with.
    pub serial: u16,
}

/// Table of commands awaiting their terminal response.
#[derive(Debug, Default)]
pub struct PendingTable {
    inner: Mutex<HashMap<PendingKey, oneshot::Sender<Body>>>,
}

impl PendingTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PendingKey, oneshot::Sender<Body>>> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register an in-flight command and get the receiver its response
    /// will arrive on.
    ///
    /// # Errors
    ///
    /// [`CoreError::DuplicateInflight`] when the key is already occupied.
    pub fn register(&self, key: PendingKey) -> Result<oneshot::Receiver<Body>, CoreError> {
        let mut inner = self.lock();
        if inner.contains_key(&key) {
            return Err(CoreError::DuplicateInflight {
                phone: key.phone,
                msg_id: key.msg_id,
                serial: key.serial,
            });
        }
        let (tx, rx) = oneshot::channel();
        inner.insert(key, tx);
        Ok(rx)
    }

    /// Deliver a response to the waiter for `key`, removing the entry.
    ///
    /// Returns `false` when no command was waiting under that key, which
    /// happens for unsolicited acks and for responses arriving after a
    /// timeout eviction.
    pub fn complete(&self, key: &PendingKey, body: Body) -> bool {
        let Some(tx) = self.lock().remove(key) else {
            return false;
        };
        // A dropped receiver means the sender gave up (timeout race); the
        // entry is gone either way.
        let _ = tx.send(body);
        true
    }

    /// Evict an entry without responding (timeout path).
    pub fn remove(&self, key: &PendingKey) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Drop every entry for `phone`. Their waiters observe a closed
    /// channel, which the sender reports as a closed connection.
    pub fn evict_phone(&self, phone: &str) -> usize {
        let mut inner = self.lock();
        let before = inner.len();
        inner.retain(|key, _| key.phone != phone);
        before - inner.len()
    }

    /// Entries currently awaiting a response.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
