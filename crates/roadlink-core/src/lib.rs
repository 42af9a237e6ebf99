//! Sans-I/O state for the JT/T 808 access server.
//!
//! This crate owns everything the server remembers between frames and
//! nothing that touches a socket: live sessions, registered devices,
//! fragment reassembly, the last-alarm and recent-location caches, and
//! the pending-command table used for request/response correlation.
//!
//! All of it hangs off a single [`Core`] context constructed once at
//! listener start and passed down to handlers by reference, which keeps
//! tests hermetic and avoids initialisation-order hazards.
//!
//! Lock discipline: each registry carries its own lock; when more than one
//! is needed the order is session -> device -> alarm. The fragment
//! reassembler is per-session and needs no locking at all.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod device;
mod error;
mod fragment;
mod pending;
mod session;
mod telemetry;

use std::time::Duration;

pub use device::{Device, DeviceRegistry, DeviceStatus, StatusHook, Transport};
pub use error::CoreError;
pub use fragment::{DEFAULT_TIMEOUT as DEFAULT_FRAGMENT_TIMEOUT, Reassembler};
pub use pending::{PendingKey, PendingTable};
pub use session::SessionRegistry;
pub use telemetry::{
    AlarmCache, AlarmHook, AlarmMessage, AlarmRef, DEFAULT_GEO_CAPACITY, GeoRing,
};

/// Tunables for the core state.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Eviction timeout for incomplete fragment groups.
    pub fragment_timeout: Duration,
    /// Position reports retained per phone.
    pub geo_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self { fragment_timeout: DEFAULT_FRAGMENT_TIMEOUT, geo_capacity: DEFAULT_GEO_CAPACITY }
    }
}

/// The server's shared state, constructed once and passed down by
/// reference.
#[derive(Debug)]
pub struct Core {
    /// Live connections.
    pub sessions: SessionRegistry,
    /// Registered terminals.
    pub devices: DeviceRegistry,
    /// Last alarm per phone.
    pub alarms: AlarmCache,
    /// Recent position reports per phone.
    pub geo: GeoRing,
    /// Commands awaiting their terminal response.
    pub pending: PendingTable,
    /// Tunables.
    pub config: CoreConfig,
}

impl Core {
    /// Build the core state from its tunables.
    #[must_use]
    pub fn new(config: CoreConfig) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            devices: DeviceRegistry::new(),
            alarms: AlarmCache::new(),
            geo: GeoRing::new(config.geo_capacity),
            pending: PendingTable::new(),
            config,
        }
    }

    /// Tear down a session: clear the binding, mark the device offline and
    /// fail every pending command for its phone.
    ///
    /// Returns the phone that was bound, if any.
    pub fn close_session(&self, session_id: &str) -> Option<String> {
        let phone = self.sessions.remove(session_id)?;
        let evicted = self.pending.evict_phone(&phone);
        if evicted > 0 {
            tracing::debug!(phone, evicted, "failed pending commands on session close");
        }
        if let Err(e) = self.devices.set_status(&phone, DeviceStatus::Offline) {
            tracing::debug!(phone, error = %e, "device vanished before going offline");
        }
        Some(phone)
    }
}

impl Default for Core {
    fn default() -> Self {
        Self::new(CoreConfig::default())
    }
}
