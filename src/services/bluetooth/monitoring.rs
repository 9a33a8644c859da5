//! Host-bus monitoring and asynchronous command issue.
//!
//! A background task watches the object manager of the Bluetooth daemon
//! and translates its signals into main messages; the registry never
//! blocks on a bus reply. Outgoing calls (ConnectProfile, Disconnect) go
//! through [`BtCommander`], whose bus implementation fires the call from a
//! spawned task.

use std::collections::HashMap;

use tokio_stream::StreamExt;
use tracing::{debug, warn};
use zbus::zvariant::{OwnedObjectPath, OwnedValue};
use zbus::{Connection, MatchRule, MessageStream};

use crate::server::message::{MainMessage, MainSender};

use super::device::DeviceProperties;
use super::error::BtError;
use super::proxy::Device1Proxy;
use super::types::ObjectPath;

const DEVICE_INTERFACE: &str = "org.bluez.Device1";
const BLUEZ_SERVICE: &str = "org.bluez";

/// A host-bus notification about a remote Bluetooth object, as delivered
/// to the main thread.
#[derive(Debug)]
pub enum BusEvent {
    /// A device interface appeared with its initial property set.
    InterfacesAdded {
        /// Object path of the device.
        path: ObjectPath,
        /// Initial properties.
        properties: DeviceProperties,
    },
    /// A device interface disappeared.
    InterfacesRemoved {
        /// Object path of the device.
        path: ObjectPath,
    },
    /// Properties of a known device changed.
    PropertiesChanged {
        /// Object path of the device.
        path: ObjectPath,
        /// Changed properties.
        changed: DeviceProperties,
        /// Keys whose values are no longer valid.
        invalidated: Vec<String>,
    },
}

/// Issues asynchronous method calls against remote Bluetooth objects.
///
/// Implementations must not block the caller; results surface as bus
/// signals, never as synchronous replies.
pub trait BtCommander: Send + Sync {
    /// Asks the remote stack to connect one profile of a device.
    fn connect_profile(&self, path: &str, uuid: &str);

    /// Forces a device to disconnect.
    fn disconnect(&self, path: &str);
}

/// Commander that logs and drops every request. Used when the daemon runs
/// without a host bus.
pub struct NullCommander;

impl BtCommander for NullCommander {
    fn connect_profile(&self, path: &str, uuid: &str) {
        debug!(%path, %uuid, "no host bus; dropping ConnectProfile");
    }

    fn disconnect(&self, path: &str) {
        debug!(%path, "no host bus; dropping Disconnect");
    }
}

/// Commander backed by the system bus.
pub struct ZbusCommander {
    conn: Connection,
}

impl ZbusCommander {
    /// Creates a commander issuing calls on `conn`.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl BtCommander for ZbusCommander {
    fn connect_profile(&self, path: &str, uuid: &str) {
        let conn = self.conn.clone();
        let path = path.to_string();
        let uuid = uuid.to_string();
        tokio::spawn(async move {
            let result: zbus::Result<()> = async {
                let proxy = Device1Proxy::builder(&conn)
                    .path(path.clone())?
                    .build()
                    .await?;
                proxy.connect_profile(&uuid).await
            }
            .await;
            if let Err(e) = result {
                warn!(%path, %uuid, "ConnectProfile failed: {e}");
            }
        });
    }

    fn disconnect(&self, path: &str) {
        let conn = self.conn.clone();
        let path = path.to_string();
        tokio::spawn(async move {
            let result: zbus::Result<()> = async {
                let proxy = Device1Proxy::builder(&conn)
                    .path(path.clone())?
                    .build()
                    .await?;
                proxy.disconnect().await
            }
            .await;
            if let Err(e) = result {
                warn!(%path, "Disconnect failed: {e}");
            }
        });
    }
}

/// Watches the Bluetooth object manager and forwards device signals to
/// the main thread.
pub struct BtMonitor;

impl BtMonitor {
    /// Subscribes to the object-manager signals and spawns the forwarding
    /// task.
    ///
    /// # Errors
    /// Returns error if a signal subscription cannot be established.
    pub async fn start(connection: &Connection, sender: MainSender) -> Result<(), BtError> {
        let added_rule = MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .sender(BLUEZ_SERVICE)?
            .interface("org.freedesktop.DBus.ObjectManager")?
            .member("InterfacesAdded")?
            .build();
        let removed_rule = MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .sender(BLUEZ_SERVICE)?
            .interface("org.freedesktop.DBus.ObjectManager")?
            .member("InterfacesRemoved")?
            .build();
        let props_rule = MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .interface("org.freedesktop.DBus.Properties")?
            .member("PropertiesChanged")?
            .path_namespace("/org/bluez")?
            .build();

        let mut added = MessageStream::for_match_rule(added_rule, connection, None).await?;
        let mut removed = MessageStream::for_match_rule(removed_rule, connection, None).await?;
        let mut props = MessageStream::for_match_rule(props_rule, connection, None).await?;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = added.next() => {
                        if let Ok(msg) = msg {
                            Self::forward_added(&msg, &sender);
                        }
                    }
                    Some(msg) = removed.next() => {
                        if let Ok(msg) = msg {
                            Self::forward_removed(&msg, &sender);
                        }
                    }
                    Some(msg) = props.next() => {
                        if let Ok(msg) = msg {
                            Self::forward_properties(&msg, &sender);
                        }
                    }
                    else => break,
                }
            }
            debug!("host bus monitor stopped");
        });

        Ok(())
    }

    fn forward_added(msg: &zbus::Message, sender: &MainSender) {
        type Body = (OwnedObjectPath, HashMap<String, HashMap<String, OwnedValue>>);
        let (path, interfaces): Body = match msg.body().deserialize() {
            Ok(body) => body,
            Err(e) => {
                warn!("malformed InterfacesAdded: {e}");
                return;
            }
        };
        let Some(props) = interfaces.get(DEVICE_INTERFACE) else {
            return;
        };
        let event = BusEvent::InterfacesAdded {
            path: path.to_string(),
            properties: DeviceProperties::from_dict(props),
        };
        let _ = sender.send(MainMessage::BtBus(event));
    }

    fn forward_removed(msg: &zbus::Message, sender: &MainSender) {
        type Body = (OwnedObjectPath, Vec<String>);
        let (path, interfaces): Body = match msg.body().deserialize() {
            Ok(body) => body,
            Err(e) => {
                warn!("malformed InterfacesRemoved: {e}");
                return;
            }
        };
        if !interfaces.iter().any(|i| i == DEVICE_INTERFACE) {
            return;
        }
        let event = BusEvent::InterfacesRemoved {
            path: path.to_string(),
        };
        let _ = sender.send(MainMessage::BtBus(event));
    }

    fn forward_properties(msg: &zbus::Message, sender: &MainSender) {
        type Body = (String, HashMap<String, OwnedValue>, Vec<String>);
        let header = msg.header();
        let Some(path) = header.path() else {
            return;
        };
        let path = path.to_string();
        let (interface, changed, invalidated): Body = match msg.body().deserialize() {
            Ok(body) => body,
            Err(e) => {
                warn!("malformed PropertiesChanged: {e}");
                return;
            }
        };
        if interface != DEVICE_INTERFACE {
            return;
        }
        let event = BusEvent::PropertiesChanged {
            path,
            changed: DeviceProperties::from_dict(&changed),
            invalidated,
        };
        let _ = sender.send(MainMessage::BtBus(event));
    }
}
