//! Session registry: live connections, phone binding and serial numbers.
//!
//! Maintains bidirectional mappings (session id -> state, phone -> session
//! id) behind a single lock so that binding and teardown are atomic. A
//! session id is the connection's remote-address string.
//!
//! # Invariants
//!
//! - A session holds at most one device binding and a device (phone) holds
//!   at most one session binding. Rebinding a phone closes the earlier
//!   session first, because terminals disconnect uncleanly and reconnect.
//! - Serial numbers are drawn per session by post-increment and wrap at
//!   2^16.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::CoreError;

/// State for one live terminal connection.
#[derive(Debug)]
struct Session {
    /// Outbound frame queue. The connection's writer drains this; dropping
    /// the sender closes the connection.
    outbound: mpsc::UnboundedSender<Bytes>,
    /// Phone bound by Register/Authenticate. `None` until then.
    phone: Option<String>,
    /// Next serial number to hand out.
    serial: u16,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    by_phone: HashMap<String, String>,
}

/// Registry of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned registry lock means a panic mid-mutation; the maps are
        // only inserted/removed atomically, so the state is still usable.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a freshly accepted connection.
    ///
    /// Returns `false` if the id is already present.
    pub fn insert(&self, session_id: &str, outbound: mpsc::UnboundedSender<Bytes>) -> bool {
        let mut inner = self.lock();
        if inner.sessions.contains_key(session_id) {
            return false;
        }
        inner
            .sessions
            .insert(session_id.to_owned(), Session { outbound, phone: None, serial: 0 });
        true
    }

    /// Remove a session, clearing both mappings in one critical section.
    ///
    /// Returns the phone that was bound to it, if any.
    pub fn remove(&self, session_id: &str) -> Option<String> {
        let mut inner = self.lock();
        let session = inner.sessions.remove(session_id)?;
        if let Some(phone) = &session.phone {
            inner.by_phone.remove(phone);
        }
        session.phone
    }

    /// Bind `phone` to `session_id`.
    ///
    /// If another live session already claims the phone, that session is
    /// closed first (its outbound channel is dropped, which ends its
    /// connection task) and its id is returned.
    pub fn bind_phone(&self, session_id: &str, phone: &str) -> Result<Option<String>, CoreError> {
        let mut inner = self.lock();
        if !inner.sessions.contains_key(session_id) {
            return Err(CoreError::SessionNotFound(session_id.to_owned()));
        }

        let evicted = match inner.by_phone.get(phone) {
            Some(prior) if prior != session_id => {
                let prior = prior.clone();
                inner.sessions.remove(&prior);
                Some(prior)
            }
            _ => None,
        };

        inner.by_phone.insert(phone.to_owned(), session_id.to_owned());
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.phone = Some(phone.to_owned());
        }
        Ok(evicted)
    }

    /// Allocate the next serial number for a session (post-increment,
    /// wrapping).
    pub fn next_serial(&self, session_id: &str) -> Result<u16, CoreError> {
        let mut inner = self.lock();
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| CoreError::SessionNotFound(session_id.to_owned()))?;
        let serial = session.serial;
        session.serial = session.serial.wrapping_add(1);
        Ok(serial)
    }

    /// Queue a frame on a session's outbound channel.
    pub fn send(&self, session_id: &str, frame: Bytes) -> Result<(), CoreError> {
        let inner = self.lock();
        let session = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| CoreError::SessionNotFound(session_id.to_owned()))?;
        session.outbound.send(frame).map_err(|_| CoreError::ConnectionClosed)
    }

    /// Queue a frame for the session bound to `phone`.
    pub fn send_to_phone(&self, phone: &str, frame: Bytes) -> Result<(), CoreError> {
        let inner = self.lock();
        let session_id = inner
            .by_phone
            .get(phone)
            .ok_or_else(|| CoreError::SessionNotFound(phone.to_owned()))?;
        let session = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| CoreError::SessionNotFound(session_id.clone()))?;
        session.outbound.send(frame).map_err(|_| CoreError::ConnectionClosed)
    }

    /// Session currently bound to `phone`.
    #[must_use]
    pub fn session_for_phone(&self, phone: &str) -> Option<String> {
        self.lock().by_phone.get(phone).cloned()
    }

    /// Phone bound to `session_id`.
    #[must_use]
    pub fn phone_of(&self, session_id: &str) -> Option<String> {
        self.lock().sessions.get(session_id).and_then(|s| s.phone.clone())
    }

    /// True while the session is registered. Connection tasks poll this to
    /// notice they were evicted by a rebind.
    #[must_use]
    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().sessions.contains_key(session_id)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    /// True when no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (mpsc::UnboundedSender<Bytes>, mpsc::UnboundedReceiver<Bytes>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn insert_and_remove() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = channel();

        assert!(registry.insert("10.0.0.1:5000", tx.clone()));
        assert!(!registry.insert("10.0.0.1:5000", tx));
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.remove("10.0.0.1:5000"), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn serials_increment_and_wrap() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = channel();
        registry.insert("s1", tx);

        assert_eq!(registry.next_serial("s1").unwrap(), 0);
        assert_eq!(registry.next_serial("s1").unwrap(), 1);

        for _ in 2..u16::MAX {
            registry.next_serial("s1").unwrap();
        }
        assert_eq!(registry.next_serial("s1").unwrap(), u16::MAX);
        assert_eq!(registry.next_serial("s1").unwrap(), 0);
    }

    #[test]
    fn bind_phone_updates_both_maps() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = channel();
        registry.insert("s1", tx);

        assert_eq!(registry.bind_phone("s1", "013812345678").unwrap(), None);
        assert_eq!(registry.session_for_phone("013812345678").as_deref(), Some("s1"));
        assert_eq!(registry.phone_of("s1").as_deref(), Some("013812345678"));

        assert_eq!(registry.remove("s1").as_deref(), Some("013812345678"));
        assert_eq!(registry.session_for_phone("013812345678"), None);
    }

    #[test]
    fn rebinding_phone_evicts_earlier_session() {
        let registry = SessionRegistry::new();
        let (tx1, mut rx1) = channel();
        let (tx2, _rx2) = channel();
        registry.insert("s1", tx1);
        registry.insert("s2", tx2);

        registry.bind_phone("s1", "013812345678").unwrap();
        let evicted = registry.bind_phone("s2", "013812345678").unwrap();

        assert_eq!(evicted.as_deref(), Some("s1"));
        assert!(!registry.contains("s1"));
        assert_eq!(registry.session_for_phone("013812345678").as_deref(), Some("s2"));
        // The evicted session's channel is closed.
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn rebinding_same_session_is_a_no_op() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = channel();
        registry.insert("s1", tx);

        registry.bind_phone("s1", "013812345678").unwrap();
        assert_eq!(registry.bind_phone("s1", "013812345678").unwrap(), None);
        assert!(registry.contains("s1"));
    }

    #[test]
    fn send_reaches_the_outbound_channel() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = channel();
        registry.insert("s1", tx);
        registry.bind_phone("s1", "013812345678").unwrap();

        registry.send("s1", Bytes::from_static(b"ack")).unwrap();
        registry.send_to_phone("013812345678", Bytes::from_static(b"cmd")).unwrap();

        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"ack"));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"cmd"));
    }

    #[test]
    fn send_to_unknown_session_fails() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.send("nope", Bytes::new()),
            Err(CoreError::SessionNotFound(_))
        ));
    }
}
