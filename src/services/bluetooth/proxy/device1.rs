//! BlueZ Device1 interface.

use zbus::proxy;
use zbus::zvariant::OwnedObjectPath;

/// Remote Bluetooth device.
///
/// Connection state, pairing and advertised services of one remote
/// endpoint. Paths are handed out by the object manager.
#[proxy(
    default_service = "org.bluez",
    interface = "org.bluez.Device1",
    assume_defaults = false
)]
pub trait Device1 {
    /// Connects all profiles the remote device supports.
    fn connect(&self) -> zbus::Result<()>;

    /// Disconnects all connected profiles.
    fn disconnect(&self) -> zbus::Result<()>;

    /// Connects a specific profile by advertising UUID.
    ///
    /// # Arguments
    /// * `uuid` - The profile UUID to connect.
    fn connect_profile(&self, uuid: &str) -> zbus::Result<()>;

    /// Disconnects a specific profile by advertising UUID.
    ///
    /// # Arguments
    /// * `uuid` - The profile UUID to disconnect.
    fn disconnect_profile(&self, uuid: &str) -> zbus::Result<()>;

    /// Pairs with the remote device.
    fn pair(&self) -> zbus::Result<()>;

    /// The Bluetooth device address.
    #[zbus(property)]
    fn address(&self) -> zbus::Result<String>;

    /// The friendly name of the device.
    #[zbus(property)]
    fn name(&self) -> zbus::Result<String>;

    /// The adapter the device belongs to.
    #[zbus(property)]
    fn adapter(&self) -> zbus::Result<OwnedObjectPath>;

    /// Whether the device is paired.
    #[zbus(property)]
    fn paired(&self) -> zbus::Result<bool>;

    /// Whether the device is trusted.
    #[zbus(property)]
    fn trusted(&self) -> zbus::Result<bool>;

    /// Whether the baseband connection is up.
    #[zbus(property)]
    fn connected(&self) -> zbus::Result<bool>;

    /// Advertised service UUIDs.
    #[zbus(property, name = "UUIDs")]
    fn uuids(&self) -> zbus::Result<Vec<String>>;
}
