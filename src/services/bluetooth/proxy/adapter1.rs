//! BlueZ Adapter1 interface.

use zbus::proxy;

/// Local Bluetooth adapter.
#[proxy(
    default_service = "org.bluez",
    interface = "org.bluez.Adapter1",
    assume_defaults = false
)]
pub trait Adapter1 {
    /// Starts device discovery.
    fn start_discovery(&self) -> zbus::Result<()>;

    /// Stops device discovery.
    fn stop_discovery(&self) -> zbus::Result<()>;

    /// Removes a remote device and its pairing information.
    ///
    /// # Arguments
    /// * `device` - Object path of the device to remove.
    fn remove_device(&self, device: &zbus::zvariant::ObjectPath<'_>) -> zbus::Result<()>;

    /// The adapter address.
    #[zbus(property)]
    fn address(&self) -> zbus::Result<String>;

    /// The adapter system name.
    #[zbus(property)]
    fn name(&self) -> zbus::Result<String>;

    /// Whether the adapter is powered.
    #[zbus(property)]
    fn powered(&self) -> zbus::Result<bool>;

    /// Powers the adapter on or off.
    #[zbus(property)]
    fn set_powered(&self, powered: bool) -> zbus::Result<()>;
}
