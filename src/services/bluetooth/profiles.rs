//! A2DP and HFP audio gateway collaborators.
//!
//! The policy engine starts and suspends profile transports through these
//! traits. The managers here own the iodev bookkeeping: a transport's
//! backend is injected through a factory, so the codec and socket plumbing
//! live with the transport implementation, not with policy.

use tracing::{debug, info};

use crate::services::audio::{
    DeviceBackend, DeviceList, Direction, IoDevice, IoNode, NodeType, StubBackend,
};

use super::device::BtDevice;
use super::error::BtError;

/// Creates the backend serving a profile transport for a device.
pub type BackendFactory = Box<dyn FnMut(&BtDevice) -> Box<dyn DeviceBackend> + Send>;

/// The A2DP media collaborator driven by the policy engine.
pub trait A2dpPolicy: Send {
    /// Brings up A2DP audio for a device whose profile transport is
    /// connected.
    fn start(&mut self, device: &mut BtDevice, devices: &mut DeviceList) -> Result<(), BtError>;

    /// Tears down A2DP audio for the device, detaching its iodev.
    fn suspend_connected_device(&mut self, device: &mut BtDevice, devices: &mut DeviceList);
}

/// The HFP audio gateway collaborator driven by the policy engine.
pub trait HfpAgPolicy: Send {
    /// Brings up the audio gateway for a device whose HFP transport is
    /// connected.
    fn start(&mut self, device: &mut BtDevice, devices: &mut DeviceList) -> Result<(), BtError>;

    /// Tears down the audio gateway, detaching both iodevs.
    fn suspend_connected_device(&mut self, device: &mut BtDevice, devices: &mut DeviceList);
}

const A2DP_BUFFER_FRAMES: u64 = 4096;
const HFP_BUFFER_FRAMES: u64 = 1024;

fn bt_iodev(device: &BtDevice, direction: Direction, backend: Box<dyn DeviceBackend>, buffer: u64) -> IoDevice {
    let label = if device.name().is_empty() {
        device.address().to_string()
    } else {
        device.name().to_string()
    };
    let mut dev = IoDevice::new(label.clone(), direction, backend, buffer);
    dev.add_node(IoNode::new(0, NodeType::Bluetooth, label));
    dev
}

/// Default A2DP manager: creates the playback iodev for a started device
/// and removes it on suspend.
pub struct A2dpManager {
    factory: BackendFactory,
}

impl A2dpManager {
    /// Creates a manager whose transports run on the in-memory stub
    /// backend. Real deployments wire the A2DP transport backend through
    /// [`with_factory`](Self::with_factory).
    pub fn new() -> Self {
        Self::with_factory(Box::new(|_| Box::new(StubBackend::new().0)))
    }

    /// Creates a manager producing transport backends from `factory`.
    pub fn with_factory(factory: BackendFactory) -> Self {
        Self { factory }
    }
}

impl Default for A2dpManager {
    fn default() -> Self {
        Self::new()
    }
}

impl A2dpPolicy for A2dpManager {
    fn start(&mut self, device: &mut BtDevice, devices: &mut DeviceList) -> Result<(), BtError> {
        if device.iodev(Direction::Output).is_some() {
            debug!(path = %device.object_path(), "A2DP already started");
            return Ok(());
        }
        let backend = (self.factory)(device);
        let idx = devices.add_dev(bt_iodev(device, Direction::Output, backend, A2DP_BUFFER_FRAMES));
        device.append_iodev(Direction::Output, idx);
        info!(path = %device.object_path(), ?idx, "A2DP started");
        Ok(())
    }

    fn suspend_connected_device(&mut self, device: &mut BtDevice, devices: &mut DeviceList) {
        if let Some(idx) = device.rm_iodev(Direction::Output) {
            devices.rm_dev(idx);
            info!(path = %device.object_path(), ?idx, "A2DP suspended");
        }
    }
}

/// Default HFP audio gateway manager: creates the capture and playback
/// iodevs of the gateway and removes them on suspend.
pub struct HfpAgManager {
    factory: BackendFactory,
}

impl HfpAgManager {
    /// Creates a manager whose transports run on the in-memory stub
    /// backend. Real deployments wire the SCO transport backend through
    /// [`with_factory`](Self::with_factory).
    pub fn new() -> Self {
        Self::with_factory(Box::new(|_| Box::new(StubBackend::new().0)))
    }

    /// Creates a manager producing transport backends from `factory`.
    pub fn with_factory(factory: BackendFactory) -> Self {
        Self { factory }
    }
}

impl Default for HfpAgManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HfpAgPolicy for HfpAgManager {
    fn start(&mut self, device: &mut BtDevice, devices: &mut DeviceList) -> Result<(), BtError> {
        for direction in Direction::all() {
            if device.iodev(direction).is_some() {
                continue;
            }
            let backend = (self.factory)(device);
            let idx = devices.add_dev(bt_iodev(device, direction, backend, HFP_BUFFER_FRAMES));
            device.append_iodev(direction, idx);
        }
        info!(path = %device.object_path(), "HFP audio gateway started");
        Ok(())
    }

    fn suspend_connected_device(&mut self, device: &mut BtDevice, devices: &mut DeviceList) {
        for direction in Direction::all() {
            if let Some(idx) = device.rm_iodev(direction) {
                devices.rm_dev(idx);
            }
        }
        info!(path = %device.object_path(), "HFP audio gateway suspended");
    }
}
