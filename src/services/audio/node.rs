//! Selectable endpoints within a device.
//!
//! A node is a control that can be switched on and off, such as headphones
//! or speakers. A device owns its nodes; exactly one is active while the
//! device is open.

use tokio::time::Instant;

use super::softvol::SoftvolCurve;

/// User-visible node type. The ordering of `priority` drives automatic
/// node selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// Built-in speaker
    InternalSpeaker,
    /// Analog headphone jack
    Headphone,
    /// Line out jack
    Lineout,
    /// HDMI audio sink
    Hdmi,
    /// External microphone jack
    Mic,
    /// Built-in microphone
    InternalMic,
    /// USB audio endpoint
    Usb,
    /// Bluetooth profile endpoint
    Bluetooth,
    /// Unclassified
    Unknown,
}

impl NodeType {
    /// Selection priority; larger wins.
    pub fn priority(self) -> u32 {
        match self {
            NodeType::Headphone | NodeType::Lineout | NodeType::Mic => 4,
            NodeType::Usb | NodeType::Bluetooth => 3,
            NodeType::Hdmi => 2,
            NodeType::InternalSpeaker | NodeType::InternalMic => 1,
            NodeType::Unknown => 0,
        }
    }
}

/// Mutable node attribute, set through
/// [`IoDevice::set_node_attr`](super::iodev::IoDevice::set_node_attr).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeAttr {
    /// Plug or unplug the node.
    Plugged(bool),
    /// Output volume, 0-100.
    Volume(u32),
    /// Capture gain in hundredths of a dB.
    CaptureGain(i64),
    /// Swap left and right output channels.
    SwapLeftRight(bool),
}

/// One selectable endpoint of a device.
#[derive(Debug)]
pub struct IoNode {
    /// Index unique within the owning device.
    pub idx: u32,
    /// True if the endpoint is physically present.
    pub plugged: bool,
    /// When the node was last plugged.
    pub plugged_time: Option<Instant>,
    /// Output volume, 0-100.
    pub volume: u32,
    /// Capture gain in hundredths of a dB.
    pub capture_gain: i64,
    /// Left and right output channels are swapped.
    pub left_right_swapped: bool,
    /// User-visible type.
    pub node_type: NodeType,
    /// Whitespace-separated microphone coordinates, "x1 y1 z1 ..." in
    /// meters, for microphone-array nodes.
    pub mic_positions: String,
    /// User-visible name.
    pub name: String,
    /// Volume-step scaler table when software volume applies.
    pub softvol_curve: Option<SoftvolCurve>,
    /// True if the node's volume range needs software help.
    pub software_volume_needed: bool,
    /// Ceiling for software gain, hundredths of a dB.
    pub max_software_gain: i64,
    /// Identifier stable across unplug/replug.
    pub stable_id: u32,
}

impl IoNode {
    /// Creates an unplugged node at full volume.
    pub fn new(idx: u32, node_type: NodeType, name: impl Into<String>) -> Self {
        Self {
            idx,
            plugged: false,
            plugged_time: None,
            volume: 100,
            capture_gain: 0,
            left_right_swapped: false,
            node_type,
            mic_positions: String::new(),
            name: name.into(),
            softvol_curve: None,
            software_volume_needed: false,
            max_software_gain: 0,
            stable_id: idx,
        }
    }

    /// Handles a plug event, stamping the plug time.
    pub fn plug_event(&mut self, plugged: bool, now: Instant) {
        self.plugged = plugged;
        if plugged {
            self.plugged_time = Some(now);
        }
    }

    /// True if this node is preferred over `other`.
    ///
    /// Ranks by type priority, then most recent plug, then highest stable
    /// id.
    pub fn better(&self, other: &IoNode) -> bool {
        let own = self.node_type.priority();
        let theirs = other.node_type.priority();
        if own != theirs {
            return own > theirs;
        }
        if self.plugged_time != other.plugged_time {
            return self.plugged_time > other.plugged_time;
        }
        self.stable_id > other.stable_id
    }
}
