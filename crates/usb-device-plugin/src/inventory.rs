//! Device inventory.
//!
//! The inventory is the set of devices found by the most recent completed scan. Each scan
//! builds a fresh [`Inventory`] and hands it to [`InventoryStore::replace`], which swaps it
//! in as one immutable snapshot. Readers take an [`Arc`] to the current snapshot and never
//! see a map that is still being built.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::RwLock;

use serde::Serialize;

/// Device health as reported to the kubelet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Health {
    Healthy,
    Unhealthy,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Healthy => "Healthy",
            Health::Unhealthy => "Unhealthy",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discovered hardware unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    /// vendor serial number
    pub id: String,
    pub health: Health,
    /// usbfs node, e.g. `/dev/bus/usb/001/004`
    pub host_path: String,
}

impl DeviceRecord {
    pub fn new(id: impl Into<String>, bus: u32, address: u32) -> Self {
        Self {
            id: id.into(),
            health: Health::Healthy,
            host_path: usb_host_path(bus, address),
        }
    }
}

/// Path of the usbfs node for a device at `bus`/`address`.
pub fn usb_host_path(bus: u32, address: u32) -> String {
    format!("/dev/bus/usb/{bus:03}/{address:03}")
}

/// Devices keyed by id. Ordered so that advertisements are stable between scans.
pub type Inventory = BTreeMap<String, DeviceRecord>;

/// Holds the current inventory snapshot.
#[derive(Debug, Default)]
pub struct InventoryStore {
    current: RwLock<Arc<Inventory>>,
}

impl InventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot. The returned map is never modified afterwards.
    pub fn snapshot(&self) -> Arc<Inventory> {
        self.current.read().expect("poisoned").clone()
    }

    /// Install `inventory` as the current snapshot, returning the previous one.
    pub fn replace(&self, inventory: Inventory) -> Arc<Inventory> {
        let next = Arc::new(inventory);
        std::mem::replace(&mut *self.current.write().expect("poisoned"), next)
    }
}
