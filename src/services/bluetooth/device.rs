//! Remote Bluetooth audio endpoints.

use std::collections::HashMap;

use tracing::{debug, warn};
use zbus::zvariant::OwnedValue;

use crate::metrics::{self, ScoErrorType};
use crate::services::audio::{DeviceIndex, Direction};

use super::error::BtError;
use super::types::{ObjectPath, Profile, ScoCodec};

/// Typed view of a `Device1` property batch.
///
/// Each field is `Some` when the batch carried that key. Built from the
/// raw variant dictionary the host bus delivers.
#[derive(Debug, Default, Clone)]
pub struct DeviceProperties {
    /// MAC address.
    pub address: Option<String>,
    /// Friendly name.
    pub name: Option<String>,
    /// Pairing state.
    pub paired: Option<bool>,
    /// Trust state.
    pub trusted: Option<bool>,
    /// Baseband connection state.
    pub connected: Option<bool>,
    /// Advertised service UUIDs.
    pub uuids: Option<Vec<String>>,
    /// Owning adapter object path.
    pub adapter: Option<ObjectPath>,
}

impl DeviceProperties {
    /// Parses the variant dictionary of a properties batch. Unknown keys
    /// and values of unexpected types are skipped.
    pub fn from_dict(dict: &HashMap<String, OwnedValue>) -> Self {
        let mut props = Self::default();
        for (key, value) in dict {
            let cloned = || value.try_clone().ok();
            match key.as_str() {
                "Address" => props.address = cloned().and_then(|v| String::try_from(v).ok()),
                "Name" => props.name = cloned().and_then(|v| String::try_from(v).ok()),
                "Paired" => props.paired = cloned().and_then(|v| bool::try_from(v).ok()),
                "Trusted" => props.trusted = cloned().and_then(|v| bool::try_from(v).ok()),
                "Connected" => props.connected = cloned().and_then(|v| bool::try_from(v).ok()),
                "UUIDs" => props.uuids = cloned().and_then(|v| Vec::<String>::try_from(v).ok()),
                "Adapter" => {
                    props.adapter = cloned()
                        .and_then(|v| zbus::zvariant::OwnedObjectPath::try_from(v).ok())
                        .map(|p| p.to_string());
                }
                _ => {}
            }
        }
        props
    }
}

/// What a property update changed, for the policy glue above the
/// registry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSummary {
    /// The baseband connection came up.
    pub became_connected: bool,
    /// The baseband connection went down.
    pub became_disconnected: bool,
    /// The device newly advertised an audio profile.
    pub gained_audio_profile: bool,
}

/// One remote Bluetooth endpoint, keyed by object path.
#[derive(Debug)]
pub struct BtDevice {
    object_path: ObjectPath,
    adapter_path: ObjectPath,
    address: String,
    name: String,
    paired: bool,
    trusted: bool,
    connected: bool,
    supported_profiles: Profile,
    connected_profiles: Profile,
    active_profile: Profile,
    bt_iodevs: [Option<DeviceIndex>; Direction::COUNT],
    use_hardware_volume: bool,
    sco_ref: u32,
    sco_codec: Option<ScoCodec>,
}

impl BtDevice {
    /// Creates a device first announced at `object_path`.
    pub fn new(object_path: impl Into<ObjectPath>) -> Self {
        Self {
            object_path: object_path.into(),
            adapter_path: ObjectPath::new(),
            address: String::new(),
            name: String::new(),
            paired: false,
            trusted: false,
            connected: false,
            supported_profiles: Profile::empty(),
            connected_profiles: Profile::empty(),
            active_profile: Profile::empty(),
            bt_iodevs: [None; Direction::COUNT],
            use_hardware_volume: false,
            sco_ref: 0,
            sco_codec: None,
        }
    }

    /// The object path identifying this device.
    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    /// The owning adapter's object path.
    pub fn adapter_path(&self) -> &str {
        &self.adapter_path
    }

    /// MAC address as reported by the host bus.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Friendly name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when paired.
    pub fn paired(&self) -> bool {
        self.paired
    }

    /// True when trusted.
    pub fn trusted(&self) -> bool {
        self.trusted
    }

    /// True when the baseband link is up.
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Applies a property batch plus a list of invalidated keys, returning
    /// what changed in policy-relevant terms.
    pub fn update_properties(
        &mut self,
        changed: &DeviceProperties,
        invalidated: &[String],
    ) -> UpdateSummary {
        let was_connected = self.connected;
        let old_profiles = self.supported_profiles;

        if let Some(address) = &changed.address {
            self.address = address.clone();
        }
        if let Some(name) = &changed.name {
            self.name = name.clone();
        }
        if let Some(adapter) = &changed.adapter {
            self.adapter_path = adapter.clone();
        }
        if let Some(paired) = changed.paired {
            self.paired = paired;
        }
        if let Some(trusted) = changed.trusted {
            self.trusted = trusted;
        }
        if let Some(uuids) = &changed.uuids {
            self.supported_profiles = Profile::from_uuids(uuids.iter().map(String::as_str));
        }
        if let Some(connected) = changed.connected {
            self.set_connected(connected);
        }

        for key in invalidated {
            match key.as_str() {
                "Paired" => self.paired = false,
                "Trusted" => self.trusted = false,
                "Connected" => self.set_connected(false),
                "UUIDs" => self.supported_profiles = Profile::empty(),
                "Name" => self.name.clear(),
                _ => {}
            }
        }

        let added = self.supported_profiles & !old_profiles;
        UpdateSummary {
            became_connected: !was_connected && self.connected,
            became_disconnected: was_connected && !self.connected,
            gained_audio_profile: added.intersects(Profile::audio()),
        }
    }

    /// Sets the baseband connection state. A drop resets every piece of
    /// transport state the link carried.
    pub fn set_connected(&mut self, connected: bool) {
        if self.connected == connected {
            return;
        }
        self.connected = connected;
        if !connected {
            self.connected_profiles = Profile::empty();
            self.active_profile = Profile::empty();
            self.sco_ref = 0;
            self.sco_codec = None;
        }
    }

    /// True if the device claims support for `profile`.
    pub fn supports_profile(&self, profile: Profile) -> bool {
        self.supported_profiles.intersects(profile)
    }

    /// The full supported-profile mask.
    pub fn supported_profiles(&self) -> Profile {
        self.supported_profiles
    }

    /// True if `profile` has a live transport.
    pub fn is_profile_connected(&self, profile: Profile) -> bool {
        self.connected_profiles.intersects(profile)
    }

    /// Marks a profile transport up or down. Returns true if the mask
    /// changed.
    pub fn set_profile_connected(&mut self, profile: Profile, connected: bool) -> bool {
        let before = self.connected_profiles;
        if connected {
            self.connected_profiles |= profile;
        } else {
            self.connected_profiles &= !profile;
        }
        before != self.connected_profiles
    }

    /// The profile mask currently carrying audio.
    pub fn active_profile(&self) -> Profile {
        self.active_profile
    }

    /// Records which profile carries audio now.
    pub fn set_active_profile(&mut self, profile: Profile) {
        self.active_profile = profile;
    }

    /// True when the remote prefers absolute (hardware) volume.
    pub fn use_hardware_volume(&self) -> bool {
        self.use_hardware_volume
    }

    /// Sets the hardware-volume preference.
    pub fn set_use_hardware_volume(&mut self, use_hardware_volume: bool) {
        self.use_hardware_volume = use_hardware_volume;
    }

    /// The iodev attached for `direction`, if any.
    pub fn iodev(&self, direction: Direction) -> Option<DeviceIndex> {
        self.bt_iodevs[direction.index()]
    }

    /// Both iodev slots, indexed by direction.
    pub fn iodevs(&self) -> [Option<DeviceIndex>; Direction::COUNT] {
        self.bt_iodevs
    }

    /// Attaches an iodev for `direction`.
    pub fn append_iodev(&mut self, direction: Direction, idx: DeviceIndex) {
        if let Some(existing) = self.bt_iodevs[direction.index()] {
            warn!(
                path = %self.object_path,
                ?existing,
                "replacing iodev slot for {direction:?}"
            );
        }
        self.bt_iodevs[direction.index()] = Some(idx);
    }

    /// Detaches the iodev for `direction`.
    pub fn rm_iodev(&mut self, direction: Direction) -> Option<DeviceIndex> {
        self.bt_iodevs[direction.index()].take()
    }

    /// Establishes or references the SCO link.
    ///
    /// The first call brings the link up with `codec`; later calls only
    /// increment the refcount. A failure leaves the count untouched.
    ///
    /// # Errors
    /// Returns error if the device is not connected.
    pub fn get_sco(&mut self, codec: ScoCodec) -> Result<u32, BtError> {
        if !self.connected {
            metrics::hfp_sco_connection_error(ScoErrorType::ConnectError);
            return Err(BtError::NotConnected(self.object_path.clone()));
        }
        if self.sco_ref == 0 {
            debug!(path = %self.object_path, ?codec, "establishing SCO link");
            self.sco_codec = Some(codec);
            metrics::hfp_sco_connection_error(ScoErrorType::Success);
        }
        self.sco_ref += 1;
        Ok(self.sco_ref)
    }

    /// Releases one SCO reference; the last release tears the link down.
    /// Returns true when the link was torn down.
    pub fn put_sco(&mut self) -> bool {
        if self.sco_ref == 0 {
            warn!(path = %self.object_path, "put_sco without matching get_sco");
            return false;
        }
        self.sco_ref -= 1;
        if self.sco_ref == 0 {
            debug!(path = %self.object_path, "tearing down SCO link");
            self.sco_codec = None;
            return true;
        }
        false
    }

    /// The codec on the live SCO link, if one is up.
    pub fn sco_codec(&self) -> Option<ScoCodec> {
        self.sco_codec
    }

    /// Current SCO reference count.
    pub fn sco_ref(&self) -> u32 {
        self.sco_ref
    }
}
