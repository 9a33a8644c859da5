//! The process-wide table of remote Bluetooth devices.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::device::BtDevice;
use super::monitoring::BtCommander;
use super::types::ObjectPath;

/// Table of remote Bluetooth endpoints keyed by object path.
///
/// Owns every [`BtDevice`] and the commander used to issue asynchronous
/// method calls against the host bus.
pub struct BtRegistry {
    devices: HashMap<ObjectPath, BtDevice>,
    commander: Arc<dyn BtCommander>,
}

impl BtRegistry {
    /// Creates an empty registry issuing bus calls through `commander`.
    pub fn new(commander: Arc<dyn BtCommander>) -> Self {
        Self {
            devices: HashMap::new(),
            commander,
        }
    }

    /// The device at `path`.
    pub fn get(&self, path: &str) -> Option<&BtDevice> {
        self.devices.get(path)
    }

    /// Mutable access to the device at `path`.
    pub fn get_mut(&mut self, path: &str) -> Option<&mut BtDevice> {
        self.devices.get_mut(path)
    }

    /// True if a device is registered at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.devices.contains_key(path)
    }

    /// Returns the device at `path`, creating it on first announcement.
    pub fn get_or_create(&mut self, path: &str) -> &mut BtDevice {
        self.devices
            .entry(path.to_string())
            .or_insert_with(|| {
                debug!(%path, "registering Bluetooth device");
                BtDevice::new(path)
            })
    }

    /// Drops the entry at `path`. The caller is responsible for having
    /// torn down attached iodevs first.
    pub fn remove_entry(&mut self, path: &str) -> Option<BtDevice> {
        self.devices.remove(path)
    }

    /// Object paths of all registered devices.
    pub fn paths(&self) -> Vec<ObjectPath> {
        self.devices.keys().cloned().collect()
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True when no devices are registered.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Drops every entry.
    pub fn reset(&mut self) {
        self.devices.clear();
    }

    /// Asks the remote stack to connect one profile of a device. Fire and
    /// forget; the outcome arrives as a property change.
    pub fn request_connect_profile(&self, path: &str, uuid: &str) {
        debug!(%path, %uuid, "requesting profile connect");
        self.commander.connect_profile(path, uuid);
    }

    /// Forces a device to disconnect. Fire and forget.
    pub fn request_disconnect(&self, path: &str) {
        debug!(%path, "requesting disconnect");
        self.commander.disconnect(path);
    }
}

impl std::fmt::Debug for BtRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtRegistry")
            .field("devices", &self.devices)
            .finish()
    }
}
