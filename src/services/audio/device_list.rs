//! The set of devices known to the server.
//!
//! Owns every [`IoDevice`] and tracks which are enabled for routing. The
//! Bluetooth policy engine drives suspend/resume by index when a profile
//! switch or transport failure requires a device to leave the routing set
//! temporarily.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use super::error::AudioError;
use super::iodev::{DeviceIndex, IoDevice};

/// Ordered table of devices keyed by index.
#[derive(Debug, Default)]
pub struct DeviceList {
    devices: BTreeMap<DeviceIndex, IoDevice>,
    suspended: HashSet<DeviceIndex>,
    next_idx: u32,
}

impl DeviceList {
    /// Creates an empty device list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a device, assigning it the next free index.
    pub fn add_dev(&mut self, mut dev: IoDevice) -> DeviceIndex {
        let idx = DeviceIndex(self.next_idx);
        self.next_idx += 1;
        dev.set_index(idx);
        debug!(?idx, name = %dev.info().name, "adding device");
        self.devices.insert(idx, dev);
        idx
    }

    /// Removes a device, closing it first if it is open.
    pub fn rm_dev(&mut self, idx: DeviceIndex) -> Option<IoDevice> {
        self.suspended.remove(&idx);
        let mut dev = self.devices.remove(&idx)?;
        if dev.is_open() {
            if let Err(e) = dev.close() {
                warn!(?idx, "close while removing failed: {e}");
            }
        }
        Some(dev)
    }

    /// The device at `idx`.
    pub fn get(&self, idx: DeviceIndex) -> Option<&IoDevice> {
        self.devices.get(&idx)
    }

    /// Mutable access to the device at `idx`.
    pub fn get_mut(&mut self, idx: DeviceIndex) -> Option<&mut IoDevice> {
        self.devices.get_mut(&idx)
    }

    /// Number of devices in the list.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True when no devices are present.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Marks a device enabled for routing.
    pub fn enable_dev(&mut self, idx: DeviceIndex) -> Result<(), AudioError> {
        self.devices
            .get_mut(&idx)
            .map(|d| d.set_enabled(true))
            .ok_or(AudioError::DeviceNotFound(idx))
    }

    /// Removes a device from routing without suspending it.
    pub fn disable_dev(&mut self, idx: DeviceIndex) -> Result<(), AudioError> {
        self.devices
            .get_mut(&idx)
            .map(|d| d.set_enabled(false))
            .ok_or(AudioError::DeviceNotFound(idx))
    }

    /// Takes a device out of service: closes it, detaching its streams,
    /// and drops it from routing until [`resume_dev`](Self::resume_dev).
    ///
    /// Suspending an already-suspended or unknown device is a no-op.
    pub fn suspend_dev(&mut self, idx: DeviceIndex) {
        let Some(dev) = self.devices.get_mut(&idx) else {
            debug!(?idx, "suspend for unknown device ignored");
            return;
        };
        dev.set_enabled(false);
        if dev.is_open() {
            if let Err(e) = dev.close() {
                warn!(?idx, "close while suspending failed: {e}");
            }
        }
        self.suspended.insert(idx);
    }

    /// Puts a suspended device back into routing. The audio thread reopens
    /// it when a stream next needs it.
    pub fn resume_dev(&mut self, idx: DeviceIndex) {
        if !self.suspended.remove(&idx) {
            debug!(?idx, "resume for device that was not suspended");
        }
        if let Some(dev) = self.devices.get_mut(&idx) {
            dev.set_enabled(true);
        }
    }

    /// True while the device is suspended.
    pub fn is_suspended(&self, idx: DeviceIndex) -> bool {
        self.suspended.contains(&idx)
    }

    /// Indices of devices currently enabled for routing.
    pub fn enabled_devices(&self) -> impl Iterator<Item = DeviceIndex> + '_ {
        self.devices
            .iter()
            .filter(|(_, d)| d.is_enabled())
            .map(|(idx, _)| *idx)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::super::backend::StubBackend;
    use super::super::format::{AudioFormat, SampleFormat};
    use super::super::iodev::Direction;
    use super::super::node::{IoNode, NodeType};
    use super::*;

    fn make_dev() -> (IoDevice, std::sync::Arc<std::sync::Mutex<super::super::backend::StubState>>)
    {
        let (backend, state) = StubBackend::new();
        let mut dev = IoDevice::new("Dev", Direction::Output, Box::new(backend), 4096);
        let mut node = IoNode::new(0, NodeType::InternalSpeaker, "Speaker");
        node.plugged = true;
        dev.add_node(node);
        (dev, state)
    }

    #[tokio::test(start_paused = true)]
    async fn indices_are_stable_and_unique() {
        let mut list = DeviceList::new();
        let (d1, _) = make_dev();
        let (d2, _) = make_dev();

        let i1 = list.add_dev(d1);
        let i2 = list.add_dev(d2);
        assert_ne!(i1, i2);

        list.rm_dev(i1).unwrap();
        let (d3, _) = make_dev();
        let i3 = list.add_dev(d3);
        assert_ne!(i3, i2);
    }

    #[tokio::test(start_paused = true)]
    async fn suspend_closes_and_disables() {
        let mut list = DeviceList::new();
        let (mut dev, state) = make_dev();
        dev.set_format(&AudioFormat::new(48_000, 2, SampleFormat::S16LE))
            .unwrap();
        dev.open(256).unwrap();
        dev.set_enabled(true);
        let idx = list.add_dev(dev);

        list.suspend_dev(idx);

        let dev = list.get(idx).unwrap();
        assert!(!dev.is_enabled());
        assert!(!dev.is_open());
        assert!(list.is_suspended(idx));
        assert_eq!(state.lock().unwrap().close_count, 1);

        list.resume_dev(idx);
        assert!(list.get(idx).unwrap().is_enabled());
        assert!(!list.is_suspended(idx));
    }

    #[tokio::test(start_paused = true)]
    async fn suspend_unknown_device_is_noop() {
        let mut list = DeviceList::new();
        list.suspend_dev(DeviceIndex(42));
        assert!(!list.is_suspended(DeviceIndex(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn enabled_devices_filter() {
        let mut list = DeviceList::new();
        let (d1, _) = make_dev();
        let (d2, _) = make_dev();
        let i1 = list.add_dev(d1);
        let i2 = list.add_dev(d2);

        list.enable_dev(i1).unwrap();
        assert_eq!(list.enabled_devices().collect::<Vec<_>>(), vec![i1]);

        list.enable_dev(i2).unwrap();
        list.disable_dev(i1).unwrap();
        assert_eq!(list.enabled_devices().collect::<Vec<_>>(), vec![i2]);
    }
}
