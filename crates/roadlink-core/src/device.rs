//! Device registry: terminals indexed by phone and licence plate.
//!
//! Records are shared between both indices; status transitions fire a
//! set-once observer hook after the mutation has committed. A panicking
//! hook is contained and logged so embedder bugs cannot poison protocol
//! handling.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, OnceLock};

use roadlink_proto::{ParameterSet, Version};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Transport a terminal connected over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// TCP stream.
    #[default]
    Tcp,
    /// UDP datagrams.
    Udp,
}

/// Lifecycle state of a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// No live connection.
    #[default]
    Offline,
    /// Registered or authenticated on a live connection.
    Online,
    /// Reported sleeping.
    Sleeping,
}

/// A known terminal.
#[derive(Debug, Clone, Default)]
pub struct Device {
    /// Terminal SIM number; the stable identifier on the protocol.
    pub phone: String,
    /// Licence plate.
    pub plate: String,
    /// Province id from registration.
    pub province_id: u16,
    /// City id from registration.
    pub city_id: u16,
    /// Plate colour from registration.
    pub plate_color: u8,
    /// Protocol edition the terminal speaks.
    pub version: Version,
    /// Raw protocol-revision byte (2019 headers).
    pub protocol_version: u8,
    /// Transport the terminal connected over.
    pub transport: Transport,
    /// Keepalive interval in seconds.
    pub keepalive_secs: u32,
    /// Current lifecycle state.
    pub status: DeviceStatus,
    /// Bound session id while online.
    pub session_id: Option<String>,
    /// Authentication code issued at registration.
    pub auth_code: String,
    /// Last known parameter set.
    pub params: ParameterSet,
}

/// Observer invoked after a status transition commits.
pub type StatusHook = dyn Fn(&str, DeviceStatus) + Send + Sync;

/// In-memory index of terminals by phone and licence plate.
#[derive(Default)]
pub struct DeviceRegistry {
    inner: Mutex<Inner>,
    hook: OnceLock<Box<StatusHook>>,
}

#[derive(Default)]
struct Inner {
    by_phone: HashMap<String, Device>,
    phone_by_plate: HashMap<String, String>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Install the status observer. Only the first call takes effect.
    pub fn set_status_hook(&self, hook: Box<StatusHook>) {
        let _ = self.hook.set(hook);
    }

    /// Insert or replace a device, keeping the plate index consistent.
    pub fn upsert(&self, device: Device) {
        let mut inner = self.lock();
        if let Some(old) = inner.by_phone.get(&device.phone) {
            if old.plate != device.plate {
                let old_plate = old.plate.clone();
                inner.phone_by_plate.remove(&old_plate);
            }
        }
        if !device.plate.is_empty() {
            inner.phone_by_plate.insert(device.plate.clone(), device.phone.clone());
        }
        inner.by_phone.insert(device.phone.clone(), device);
    }

    /// Look up by phone.
    pub fn get_by_phone(&self, phone: &str) -> Result<Device, CoreError> {
        self.lock()
            .by_phone
            .get(phone)
            .cloned()
            .ok_or_else(|| CoreError::DeviceNotFound(phone.to_owned()))
    }

    /// Look up by licence plate.
    pub fn get_by_plate(&self, plate: &str) -> Result<Device, CoreError> {
        let inner = self.lock();
        inner
            .phone_by_plate
            .get(plate)
            .and_then(|phone| inner.by_phone.get(phone))
            .cloned()
            .ok_or_else(|| CoreError::DeviceNotFound(plate.to_owned()))
    }

    /// True when a device with this phone is registered.
    #[must_use]
    pub fn has_phone(&self, phone: &str) -> bool {
        self.lock().by_phone.contains_key(phone)
    }

    /// Snapshot of all registered devices.
    #[must_use]
    pub fn list(&self) -> Vec<Device> {
        self.lock().by_phone.values().cloned().collect()
    }

    /// Phones of all registered devices.
    #[must_use]
    pub fn phones(&self) -> Vec<String> {
        self.lock().by_phone.keys().cloned().collect()
    }

    /// Remove a device from both indices.
    pub fn remove(&self, phone: &str) -> Result<Device, CoreError> {
        let mut inner = self.lock();
        let device = inner
            .by_phone
            .remove(phone)
            .ok_or_else(|| CoreError::DeviceNotFound(phone.to_owned()))?;
        inner.phone_by_plate.remove(&device.plate);
        Ok(device)
    }

    /// Apply `mutate` to the device record under the lock.
    pub fn update<F>(&self, phone: &str, mutate: F) -> Result<(), CoreError>
    where
        F: FnOnce(&mut Device),
    {
        let mut inner = self.lock();
        let device = inner
            .by_phone
            .get_mut(phone)
            .ok_or_else(|| CoreError::DeviceNotFound(phone.to_owned()))?;
        mutate(device);
        Ok(())
    }

    /// Transition a device's status and fire the observer hook.
    ///
    /// The hook runs after the mutation has committed and outside the
    /// registry lock; a panic inside it is contained.
    pub fn set_status(&self, phone: &str, status: DeviceStatus) -> Result<(), CoreError> {
        let changed = {
            let mut inner = self.lock();
            let device = inner
                .by_phone
                .get_mut(phone)
                .ok_or_else(|| CoreError::DeviceNotFound(phone.to_owned()))?;
            let changed = device.status != status;
            device.status = status;
            changed
        };

        if changed {
            if let Some(hook) = self.hook.get() {
                let result = catch_unwind(AssertUnwindSafe(|| hook(phone, status)));
                if result.is_err() {
                    tracing::error!(phone, ?status, "status hook panicked");
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.lock().by_phone.len())
            .field("hook_set", &self.hook.get().is_some())
            .finish()
    }
}
