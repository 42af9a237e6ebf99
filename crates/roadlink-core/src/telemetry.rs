//! Telemetry caches: last alarm per phone and a per-phone ring of recent
//! position reports, each with a set-once observer hook.
//!
//! Hooks fire after the cache write has committed and are invoked
//! synchronously from the reporting path, so they must return promptly.
//! A panicking hook is contained.

use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, OnceLock};

use roadlink_proto::{Attachment, Location};
use serde::Serialize;
use serde_json::Value as Json;

/// Default number of position reports retained per phone.
pub const DEFAULT_GEO_CAPACITY: usize = 16;

/// Correlation header of an alarm notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlarmRef {
    /// Terminal-assigned alarm id (the header alarm-sign word when the
    /// report carried no typed attachment).
    pub id: u32,
    /// Alarm sequence number from the attachment identity block.
    pub sn: u8,
    /// Attachment id the detail was decoded from, 0 for sign-only alarms.
    #[serde(rename = "attachmentId")]
    pub attachment_id: u8,
}

/// The alarm notification handed to the embedder hook and cached per
/// phone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmMessage {
    /// Reporting terminal.
    pub phone: String,
    /// Correlation header.
    pub alarm: AlarmRef,
    /// Typed attachment (or the bare location for sign-only alarms) as
    /// JSON.
    pub detail: Json,
}

impl AlarmMessage {
    /// Build a notification from a position report.
    ///
    /// Returns `None` when the report carries neither alarm-sign bits nor
    /// a typed attachment.
    #[must_use]
    pub fn from_location(phone: &str, location: &Location) -> Option<Self> {
        if let Some(attachment) = location.typed_attachment() {
            let (id, sn) = match attachment {
                Attachment::Adas(a) => (a.alarm_id, a.identity.sequence),
                Attachment::Dsm(a) => (a.alarm_id, a.identity.sequence),
                Attachment::Tpms(a) => (a.alarm_id, a.identity.sequence),
                Attachment::Bsd(a) => (a.alarm_id, a.identity.sequence),
                Attachment::Raw { .. } => (0, 0),
            };
            return Some(Self {
                phone: phone.to_owned(),
                alarm: AlarmRef { id, sn, attachment_id: attachment.id() },
                detail: serde_json::to_value(attachment).unwrap_or(Json::Null),
            });
        }

        if location.alarm_sign != 0 {
            return Some(Self {
                phone: phone.to_owned(),
                alarm: AlarmRef { id: location.alarm_sign, sn: 0, attachment_id: 0 },
                detail: serde_json::to_value(location).unwrap_or(Json::Null),
            });
        }
        None
    }
}

/// Observer invoked after an alarm is cached.
pub type AlarmHook = dyn Fn(&str, &AlarmMessage) + Send + Sync;

/// Last alarm per phone.
#[derive(Default)]
pub struct AlarmCache {
    inner: Mutex<HashMap<String, AlarmMessage>>,
    hook: OnceLock<Box<AlarmHook>>,
}

impl AlarmCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the alarm observer. Only the first call takes effect.
    pub fn set_alarm_hook(&self, hook: Box<AlarmHook>) {
        let _ = self.hook.set(hook);
    }

    /// Store the latest alarm for its phone, then fire the observer.
    pub fn store(&self, message: AlarmMessage) {
        let phone = message.phone.clone();
        {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            inner.insert(phone.clone(), message.clone());
        }
        if let Some(hook) = self.hook.get() {
            if catch_unwind(AssertUnwindSafe(|| hook(&phone, &message))).is_err() {
                tracing::error!(phone, "alarm hook panicked");
            }
        }
    }

    /// Last alarm reported by `phone`.
    #[must_use]
    pub fn get(&self, phone: &str) -> Option<AlarmMessage> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(phone)
            .cloned()
    }

    /// Drop the cached alarm for `phone`.
    pub fn remove(&self, phone: &str) {
        let _ = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(phone);
    }
}

impl std::fmt::Debug for AlarmCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len();
        f.debug_struct("AlarmCache").field("phones", &len).finish()
    }
}

/// Fixed-capacity ring of recent position reports per phone.
#[derive(Debug)]
pub struct GeoRing {
    inner: Mutex<HashMap<String, VecDeque<Location>>>,
    capacity: usize,
}

impl Default for GeoRing {
    fn default() -> Self {
        Self::new(DEFAULT_GEO_CAPACITY)
    }
}

impl GeoRing {
    /// Create a ring buffer retaining `capacity` reports per phone.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(HashMap::new()), capacity: capacity.max(1) }
    }

    /// Append a report, discarding the oldest when the ring is full.
    pub fn push(&self, phone: &str, location: Location) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let ring = inner.entry(phone.to_owned()).or_default();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(location);
    }

    /// Most recent report from `phone`.
    #[must_use]
    pub fn latest(&self, phone: &str) -> Option<Location> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(phone)
            .and_then(|ring| ring.back().cloned())
    }

    /// All retained reports for `phone`, oldest first.
    #[must_use]
    pub fn history(&self, phone: &str) -> Vec<Location> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(phone)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }
}
