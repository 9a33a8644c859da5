//! Bluetooth profile and transport types.

use bitflags::bitflags;

/// D-Bus object path used as device identity.
pub type ObjectPath = String;

/// Advertising UUID of the A2DP source profile.
pub const A2DP_SOURCE_UUID: &str = "0000110a-0000-1000-8000-00805f9b34fb";
/// Advertising UUID of the A2DP sink profile.
pub const A2DP_SINK_UUID: &str = "0000110b-0000-1000-8000-00805f9b34fb";
/// Advertising UUID of the AVRCP remote role.
pub const AVRCP_REMOTE_UUID: &str = "0000110e-0000-1000-8000-00805f9b34fb";
/// Advertising UUID of the AVRCP target role.
pub const AVRCP_TARGET_UUID: &str = "0000110c-0000-1000-8000-00805f9b34fb";
/// Advertising UUID of the HFP hands-free role.
pub const HFP_HF_UUID: &str = "0000111e-0000-1000-8000-00805f9b34fb";
/// Advertising UUID of the HFP audio gateway role.
pub const HFP_AG_UUID: &str = "0000111f-0000-1000-8000-00805f9b34fb";
/// Advertising UUID of the HSP headset role.
pub const HSP_HS_UUID: &str = "00001108-0000-1000-8000-00805f9b34fb";
/// Advertising UUID of the HSP audio gateway role.
pub const HSP_AG_UUID: &str = "00001112-0000-1000-8000-00805f9b34fb";

bitflags! {
    /// Bluetooth audio profiles a remote device may support or have
    /// connected.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Profile: u32 {
        /// A2DP media source.
        const A2DP_SOURCE = 1 << 0;
        /// A2DP media sink.
        const A2DP_SINK = 1 << 1;
        /// AVRCP remote control.
        const AVRCP_REMOTE = 1 << 2;
        /// AVRCP remote control target.
        const AVRCP_TARGET = 1 << 3;
        /// HFP hands-free unit.
        const HFP_HANDSFREE = 1 << 4;
        /// HFP audio gateway.
        const HFP_AUDIOGATEWAY = 1 << 5;
        /// HSP headset.
        const HSP_HEADSET = 1 << 6;
        /// HSP audio gateway.
        const HSP_AUDIOGATEWAY = 1 << 7;
    }
}

impl Profile {
    /// Maps an advertising UUID to its profile bit.
    pub fn from_uuid(uuid: &str) -> Option<Profile> {
        match uuid {
            A2DP_SOURCE_UUID => Some(Profile::A2DP_SOURCE),
            A2DP_SINK_UUID => Some(Profile::A2DP_SINK),
            AVRCP_REMOTE_UUID => Some(Profile::AVRCP_REMOTE),
            AVRCP_TARGET_UUID => Some(Profile::AVRCP_TARGET),
            HFP_HF_UUID => Some(Profile::HFP_HANDSFREE),
            HFP_AG_UUID => Some(Profile::HFP_AUDIOGATEWAY),
            HSP_HS_UUID => Some(Profile::HSP_HEADSET),
            HSP_AG_UUID => Some(Profile::HSP_AUDIOGATEWAY),
            _ => None,
        }
    }

    /// Collects the profile bits of a UUID list.
    pub fn from_uuids<'a>(uuids: impl IntoIterator<Item = &'a str>) -> Profile {
        uuids
            .into_iter()
            .filter_map(Profile::from_uuid)
            .fold(Profile::empty(), |acc, p| acc | p)
    }

    /// The profiles that carry audio and drive policy decisions.
    pub fn audio() -> Profile {
        Profile::A2DP_SINK | Profile::HFP_HANDSFREE | Profile::HSP_HEADSET
    }
}

/// Codec negotiated on an SCO link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScoCodec {
    /// Narrowband CVSD, codec id 1.
    Cvsd = 1,
    /// Wideband mSBC, codec id 2.
    Msbc = 2,
}

/// SCO packet size in bytes for audio I/O.
///
/// On a USB transport the core-spec recommendation for the codec applies;
/// elsewhere the MTU the driver filled into the socket is authoritative.
pub fn sco_packet_size(codec: ScoCodec, mtu: u32, usb_transport: bool) -> u32 {
    if usb_transport {
        match codec {
            ScoCodec::Cvsd => 48,
            ScoCodec::Msbc => 60,
        }
    } else {
        mtu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_mapping_round_trip() {
        assert_eq!(Profile::from_uuid(A2DP_SINK_UUID), Some(Profile::A2DP_SINK));
        assert_eq!(
            Profile::from_uuid(HFP_HF_UUID),
            Some(Profile::HFP_HANDSFREE)
        );
        assert_eq!(Profile::from_uuid("not-a-uuid"), None);
    }

    #[test]
    fn uuid_list_folds_to_mask() {
        let mask = Profile::from_uuids([A2DP_SINK_UUID, HFP_HF_UUID, "junk"]);
        assert_eq!(mask, Profile::A2DP_SINK | Profile::HFP_HANDSFREE);
        assert!(mask.intersects(Profile::audio()));
    }

    #[test]
    fn sco_packet_sizes() {
        assert_eq!(sco_packet_size(ScoCodec::Cvsd, 128, true), 48);
        assert_eq!(sco_packet_size(ScoCodec::Msbc, 128, true), 60);
        assert_eq!(sco_packet_size(ScoCodec::Cvsd, 128, false), 128);
    }
}
