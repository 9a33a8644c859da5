//! The I/O device core.
//!
//! An iodev represents one playback or capture endpoint. The audio thread
//! attaches to it to move samples; everything else - format negotiation,
//! node selection, volume, stream bookkeeping - happens on the main
//! thread. The hardware itself sits behind a [`DeviceBackend`].

use tokio::time::{Duration, Instant};
use tracing::warn;

use crate::metrics;

use super::backend::DeviceBackend;
use super::buffer_share::{BufferShare, StreamId};
use super::dsp::{DspContext, LoopbackHook};
use super::error::AudioError;
use super::format::{AudioFormat, SupportedFormats};
use super::node::{IoNode, NodeAttr};
use super::rate_estimator::{RateEstimator, DEFAULT_SMOOTH_FACTOR, DEFAULT_WINDOW};
use super::softvol::{self, SoftvolCurve};

/// Index of a device in the device list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceIndex(pub u32);

/// Whether a device captures or plays back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Capture device
    Input,
    /// Playback device
    Output,
}

impl Direction {
    /// Number of directions, for slot arrays indexed by direction.
    pub const COUNT: usize = 2;

    /// Array index for this direction.
    pub fn index(self) -> usize {
        match self {
            Direction::Input => 0,
            Direction::Output => 1,
        }
    }

    /// Both directions, input first.
    pub fn all() -> [Direction; 2] {
        [Direction::Input, Direction::Output]
    }
}

/// Unique identity of a device: index and user-visible name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoDeviceInfo {
    /// Index in the device list.
    pub idx: DeviceIndex,
    /// User-visible name.
    pub name: String,
}

/// One playback or capture device.
pub struct IoDevice {
    info: IoDeviceInfo,
    direction: Direction,
    backend: Box<dyn DeviceBackend>,
    supported: SupportedFormats,
    format: Option<AudioFormat>,
    ext_format: Option<AudioFormat>,
    nodes: Vec<IoNode>,
    active_node: Option<usize>,
    buffer_size: u64,
    min_buffer_level: u64,
    min_cb_level: u64,
    max_cb_level: u64,
    streams: BufferShare,
    rate_est: RateEstimator,
    dsp_name: String,
    dsp_context: Option<DspContext>,
    pre_dsp_hook: Option<LoopbackHook>,
    post_dsp_hook: Option<LoopbackHook>,
    enabled: bool,
    software_volume_needed: bool,
    software_volume_scaler: f64,
    software_gain_scaler: f64,
    idle_timeout: Option<Instant>,
}

impl IoDevice {
    /// Creates a closed device over `backend` with a ring of
    /// `buffer_size` frames.
    pub fn new(
        name: impl Into<String>,
        direction: Direction,
        backend: Box<dyn DeviceBackend>,
        buffer_size: u64,
    ) -> Self {
        Self {
            info: IoDeviceInfo {
                idx: DeviceIndex(0),
                name: name.into(),
            },
            direction,
            backend,
            supported: SupportedFormats::default(),
            format: None,
            ext_format: None,
            nodes: Vec::new(),
            active_node: None,
            buffer_size,
            min_buffer_level: 0,
            min_cb_level: 0,
            max_cb_level: 0,
            streams: BufferShare::new(buffer_size),
            rate_est: RateEstimator::new(48_000, DEFAULT_WINDOW, DEFAULT_SMOOTH_FACTOR),
            dsp_name: String::new(),
            dsp_context: None,
            pre_dsp_hook: None,
            post_dsp_hook: None,
            enabled: false,
            software_volume_needed: false,
            software_volume_scaler: 1.0,
            software_gain_scaler: 1.0,
            idle_timeout: None,
        }
    }

    /// Device identity.
    pub fn info(&self) -> &IoDeviceInfo {
        &self.info
    }

    /// Reassigns the device index. Called by the device list on insert.
    pub(crate) fn set_index(&mut self, idx: DeviceIndex) {
        self.info.idx = idx;
    }

    /// Capture or playback.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// True when the device participates in routing.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enables or disables routing to this device.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Ring buffer size in frames.
    pub fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    /// Extra frames to keep queued in addition to what streams request.
    pub fn min_buffer_level(&self) -> u64 {
        self.min_buffer_level
    }

    /// Sets the minimum queued level.
    pub fn set_min_buffer_level(&mut self, level: u64) {
        self.min_buffer_level = level;
    }

    /// Smallest callback level of any attached stream.
    pub fn min_cb_level(&self) -> u64 {
        self.min_cb_level
    }

    /// Largest callback level of any attached stream.
    pub fn max_cb_level(&self) -> u64 {
        self.max_cb_level
    }

    /// Deadline for closing the device after going idle, if armed.
    pub fn idle_timeout(&self) -> Option<Instant> {
        self.idle_timeout
    }

    /// Arms or clears the idle-close deadline.
    pub fn set_idle_timeout(&mut self, deadline: Option<Instant>) {
        self.idle_timeout = deadline;
    }

    // ---- Nodes ----

    /// Appends a node to the device's node list.
    pub fn add_node(&mut self, node: IoNode) {
        self.nodes.push(node);
    }

    /// Removes a node, clearing the active selection if it pointed at it.
    pub fn rm_node(&mut self, node_idx: u32) -> Option<IoNode> {
        let pos = self.nodes.iter().position(|n| n.idx == node_idx)?;
        match self.active_node {
            Some(active) if active == pos => self.active_node = None,
            Some(active) if active > pos => self.active_node = Some(active - 1),
            _ => {}
        }
        Some(self.nodes.remove(pos))
    }

    /// The node with the given index.
    pub fn node(&self, node_idx: u32) -> Option<&IoNode> {
        self.nodes.iter().find(|n| n.idx == node_idx)
    }

    /// Mutable access to a node.
    pub fn node_mut(&mut self, node_idx: u32) -> Option<&mut IoNode> {
        self.nodes.iter_mut().find(|n| n.idx == node_idx)
    }

    /// All nodes of the device.
    pub fn nodes(&self) -> &[IoNode] {
        &self.nodes
    }

    /// The currently selected node.
    pub fn active_node(&self) -> Option<&IoNode> {
        self.active_node.map(|i| &self.nodes[i])
    }

    /// Selects a node. No-op when it is already active.
    pub fn set_active_node(&mut self, node_idx: u32) -> Result<(), AudioError> {
        let pos = self
            .nodes
            .iter()
            .position(|n| n.idx == node_idx)
            .ok_or(AudioError::NodeNotFound(node_idx))?;
        if self.active_node != Some(pos) {
            self.active_node = Some(pos);
        }
        Ok(())
    }

    /// Index of the preferred node: best plugged node, falling back to the
    /// best node overall.
    pub fn best_node_idx(&self) -> Option<u32> {
        fn best<'a>(nodes: impl Iterator<Item = &'a IoNode>) -> Option<&'a IoNode> {
            let mut best: Option<&IoNode> = None;
            for node in nodes {
                best = match best {
                    Some(current) if current.better(node) => Some(current),
                    _ => Some(node),
                };
            }
            best
        }
        best(self.nodes.iter().filter(|n| n.plugged))
            .or_else(|| best(self.nodes.iter()))
            .map(|n| n.idx)
    }

    /// Handles a plug event on a node.
    pub fn plug_event(&mut self, node_idx: u32, plugged: bool) -> Result<(), AudioError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.idx == node_idx)
            .ok_or(AudioError::NodeNotFound(node_idx))?;
        node.plug_event(plugged, Instant::now());
        Ok(())
    }

    /// Sets one node attribute, fanning out to the backend where the
    /// attribute is realized in hardware.
    pub fn set_node_attr(&mut self, node_idx: u32, attr: NodeAttr) -> Result<(), AudioError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.idx == node_idx)
            .ok_or(AudioError::NodeNotFound(node_idx))?;
        match attr {
            NodeAttr::Plugged(plugged) => node.plug_event(plugged, Instant::now()),
            NodeAttr::Volume(volume) => node.volume = volume.min(100),
            NodeAttr::CaptureGain(gain) => node.capture_gain = gain,
            NodeAttr::SwapLeftRight(enable) => {
                if node.left_right_swapped != enable {
                    self.backend.set_swap_mode_for_node(node_idx, enable)?;
                    node.left_right_swapped = enable;
                }
            }
        }
        Ok(())
    }

    /// Tells the backend the node selection changed. This is the only
    /// legal way for it to learn.
    pub fn update_active_node(&mut self, node_idx: u32, dev_enabled: bool) {
        self.backend.update_active_node(node_idx, dev_enabled);
    }

    // ---- Format ----

    /// Negotiates a hardware format for the requested one.
    ///
    /// The closest supported rate, channel count and encoding are chosen;
    /// the external format keeps the request so conversion happens in the
    /// per-stream mixer layer. No-op if a format is already set.
    pub fn set_format(&mut self, requested: &AudioFormat) -> Result<(), AudioError> {
        if self.format.is_some() {
            return Ok(());
        }
        self.supported = self.backend.update_supported_formats()?;
        let mut hw = self.supported.negotiate(requested);
        self.backend.update_channel_layout(&mut hw)?;
        self.rate_est.reset(hw.frame_rate);
        self.ext_format = Some(requested.clone());
        self.format = Some(hw);
        self.update_dsp();
        Ok(())
    }

    /// Clears the negotiated format.
    pub fn free_format(&mut self) {
        self.format = None;
        self.ext_format = None;
    }

    /// The hardware format, once negotiated.
    pub fn format(&self) -> Option<&AudioFormat> {
        self.format.as_ref()
    }

    /// The format visible to the rest of the system.
    pub fn ext_format(&self) -> Option<&AudioFormat> {
        self.ext_format.as_ref()
    }

    // ---- DSP ----

    /// Sets the DSP pipeline name and reloads the context.
    pub fn set_dsp_name(&mut self, name: impl Into<String>) {
        self.dsp_name = name.into();
        self.update_dsp();
    }

    /// Reloads the DSP context from the configured name.
    pub fn update_dsp(&mut self) {
        self.dsp_context = if self.dsp_name.is_empty() {
            None
        } else {
            Some(DspContext::new(self.dsp_name.clone()))
        };
    }

    /// The DSP context, when a pipeline is configured.
    pub fn dsp_context_mut(&mut self) -> Option<&mut DspContext> {
        self.dsp_context.as_mut()
    }

    /// Registers the hook observing mixed-but-unprocessed playback
    /// frames. Pass `None` to clear.
    pub fn register_pre_dsp_hook(&mut self, hook: Option<LoopbackHook>) {
        self.pre_dsp_hook = hook;
    }

    /// Registers the hook observing the final frames sent to hardware.
    /// Pass `None` to clear.
    pub fn register_post_dsp_hook(&mut self, hook: Option<LoopbackHook>) {
        self.post_dsp_hook = hook;
    }

    // ---- Open/close ----

    /// Opens the device for streaming.
    ///
    /// Requires a negotiated format. Selects the best node when none is
    /// active, resets the rate estimator and seeds the callback levels
    /// from `cb_level`.
    pub fn open(&mut self, cb_level: u64) -> Result<(), AudioError> {
        if self.is_open() {
            return Ok(());
        }
        let frame_rate = self.format.as_ref().ok_or(AudioError::NoFormat)?.frame_rate;
        if self.active_node.is_none() {
            let best = self.best_node_idx().ok_or(AudioError::NoActiveNode)?;
            self.set_active_node(best)?;
        }
        if let Err(e) = self.backend.open_dev() {
            metrics::device_open_failure();
            return Err(e);
        }
        self.rate_est.reset(frame_rate);
        self.min_cb_level = cb_level.min(self.buffer_size / 2);
        self.max_cb_level = self.min_cb_level;
        Ok(())
    }

    /// Closes the device, detaching every stream.
    pub fn close(&mut self) -> Result<(), AudioError> {
        if !self.is_open() {
            return Ok(());
        }
        self.backend.close_dev()?;
        self.streams.clear();
        self.min_cb_level = 0;
        self.max_cb_level = 0;
        Ok(())
    }

    /// True if the device is open.
    pub fn is_open(&self) -> bool {
        self.backend.is_open()
    }

    /// True iff hardware is actively moving samples.
    pub fn dev_running(&self) -> bool {
        self.backend.dev_running()
    }

    // ---- Streams ----

    /// Attaches a stream with the given callback level.
    pub fn add_stream(&mut self, id: StreamId, cb_level: u64) -> Result<(), AudioError> {
        if !self.streams.add_id(id) {
            return Err(AudioError::StreamExists(id));
        }
        if self.streams.len() == 1 {
            self.min_cb_level = cb_level.min(self.buffer_size / 2);
            self.max_cb_level = cb_level;
        } else {
            self.min_cb_level = self.min_cb_level.min(cb_level);
            self.max_cb_level = self.max_cb_level.max(cb_level);
        }
        Ok(())
    }

    /// Detaches a stream, leaving other streams' accounting untouched.
    pub fn rm_stream(&mut self, id: StreamId) -> Result<(), AudioError> {
        if !self.streams.rm_id(id) {
            return Err(AudioError::StreamNotFound(id));
        }
        Ok(())
    }

    /// Number of attached streams.
    pub fn attached_streams(&self) -> usize {
        self.streams.len()
    }

    /// Advances a stream's write offset by `frames`.
    pub fn stream_written(&mut self, id: StreamId, frames: u64) {
        self.streams.offset_update(id, frames);
    }

    /// Frames fully mixed by every stream, committable to hardware.
    /// Rotates the accounting origin by the returned amount.
    pub fn all_streams_written(&mut self) -> u64 {
        self.streams.get_new_write_point()
    }

    /// A stream's offset into the device buffer.
    pub fn stream_offset(&self, id: StreamId) -> Option<u64> {
        self.streams.offset(id)
    }

    /// The largest stream offset; used for latency diagnostics.
    pub fn max_stream_offset(&self) -> u64 {
        self.streams.max_offset()
    }

    // ---- Buffer and latency ----

    /// Frames currently in the hardware buffer.
    pub fn frames_queued(&self) -> Result<u64, AudioError> {
        self.backend.frames_queued()
    }

    /// Writable space given the current hardware level.
    pub fn buffer_avail(&self, hw_level: u64) -> u64 {
        self.buffer_size
            .saturating_sub(hw_level)
            .saturating_sub(self.min_buffer_level)
    }

    /// Drops queued audio, returning the number of frames flushed.
    pub fn flush_buffer(&mut self) -> u64 {
        self.backend.flush_buffer()
    }

    /// Total delay of the next sample: hardware plus DSP pipeline.
    pub fn delay_frames(&self) -> Result<u64, AudioError> {
        let dsp = self.dsp_context.as_ref().map_or(0, DspContext::delay_frames);
        Ok(self.backend.delay_frames()? + dsp)
    }

    /// Feeds a hardware buffer-level observation to the rate estimator.
    pub fn update_rate(&mut self, level: u64, now: Instant) -> bool {
        self.rate_est.update(level, now)
    }

    /// Ratio of the estimated device rate to the nominal rate.
    pub fn est_rate_ratio(&self) -> f64 {
        self.rate_est.ratio()
    }

    /// Fills playback frames through `fill` and commits them, running the
    /// loopback hooks in between.
    ///
    /// `fill` receives the writable region and the hardware format and
    /// returns how many frames it produced. Called only from the audio
    /// thread.
    pub fn write_output<F>(&mut self, nframes: u64, fill: F) -> Result<u64, AudioError>
    where
        F: FnOnce(&mut [u8], &AudioFormat) -> u64,
    {
        let fmt = self.format.clone().ok_or(AudioError::NoFormat)?;
        let frame_bytes = fmt.frame_bytes() as u64;

        let area = self.backend.get_buffer()?;
        let granted = area.frame_count.min(nframes);
        let nbytes = (granted * frame_bytes).min(area.frames.len() as u64) as usize;
        let buf = &mut area.frames[..nbytes];

        let written = fill(buf, &fmt).min(granted);
        let wbytes = ((written * frame_bytes) as usize).min(buf.len());
        if let Some(hook) = self.pre_dsp_hook.as_mut() {
            hook(&buf[..wbytes], written, &fmt);
        }
        // The DSP pipeline transforms frames in place here; its latency is
        // reported through delay_frames.
        if let Some(hook) = self.post_dsp_hook.as_mut() {
            hook(&buf[..wbytes], written, &fmt);
        }
        drop(area);

        self.backend.put_buffer(written)?;
        self.rate_est.add_frames(written);
        Ok(written)
    }

    /// Reads captured frames through `consume` and releases them.
    ///
    /// Called only from the audio thread.
    pub fn read_input<F>(&mut self, nframes: u64, consume: F) -> Result<u64, AudioError>
    where
        F: FnOnce(&[u8], u64, &AudioFormat),
    {
        let fmt = self.format.clone().ok_or(AudioError::NoFormat)?;
        let frame_bytes = fmt.frame_bytes() as u64;

        let area = self.backend.get_buffer()?;
        let granted = area.frame_count.min(nframes);
        let nbytes = (granted * frame_bytes).min(area.frames.len() as u64) as usize;
        consume(&area.frames[..nbytes], granted, &fmt);
        drop(area);

        self.backend.put_buffer(granted)?;
        self.rate_est.add_frames(granted);
        Ok(granted)
    }

    // ---- Volume and gain ----

    /// True if volume must be applied in software for the current node.
    pub fn software_volume_needed(&self) -> bool {
        self.software_volume_needed
            || self
                .active_node()
                .is_some_and(|n| n.software_volume_needed)
    }

    /// Forces software volume regardless of node flags.
    pub fn set_software_volume_needed(&mut self, needed: bool) {
        self.software_volume_needed = needed;
    }

    /// Software gain ceiling in hundredths of a dB; zero when software
    /// gain does not apply.
    pub fn maximum_software_gain(&self) -> i64 {
        if !self.software_volume_needed() {
            return 0;
        }
        self.active_node().map_or(0, |n| n.max_software_gain)
    }

    /// System volume adjusted by the active node's range:
    /// `max(0, system - (100 - node))`.
    pub fn effective_volume(&self, system_volume: u32) -> u32 {
        match self.active_node() {
            Some(node) => adjust_node_volume(node, system_volume),
            None => system_volume,
        }
    }

    /// Applies a system volume change: in hardware through the backend,
    /// or by updating the software scaler when the node needs it.
    pub fn apply_system_volume(&mut self, system_volume: u32) {
        let effective = self.effective_volume(system_volume);
        if self.software_volume_needed() {
            let scaler = match self.active_node().and_then(|n| n.softvol_curve.as_ref()) {
                Some(curve) => curve.scaler(effective),
                None => SoftvolCurve::default().scaler(effective),
            };
            self.software_volume_scaler = scaler;
        } else {
            self.backend.set_volume(effective);
            self.software_volume_scaler = 1.0;
        }
    }

    /// Applies a system mute change. Always fans out to the backend.
    pub fn apply_system_mute(&mut self, mute: bool) {
        self.backend.set_mute(mute);
    }

    /// System gain plus the active node's capture gain, hundredths of a
    /// dB.
    pub fn adjusted_capture_gain(&self, system_gain: i64) -> i64 {
        match self.active_node() {
            Some(node) => node.capture_gain + system_gain,
            None => system_gain,
        }
    }

    /// Applies a capture gain change: in hardware, or as a software
    /// scaler clamped at the node's ceiling.
    pub fn apply_capture_gain(&mut self, system_gain: i64) {
        let adjusted = self.adjusted_capture_gain(system_gain);
        if self.software_volume_needed() {
            let clamped = adjusted.min(self.maximum_software_gain());
            self.software_gain_scaler = softvol::gain_scaler(clamped);
        } else {
            self.backend.set_capture_gain(adjusted);
            self.software_gain_scaler = 1.0;
        }
    }

    /// Applies a capture mute change. Always fans out to the backend.
    pub fn apply_capture_mute(&mut self, mute: bool) {
        self.backend.set_capture_mute(mute);
    }

    /// Current software volume scaler; 1.0 when hardware volume applies.
    pub fn software_volume_scaler(&self) -> f64 {
        self.software_volume_scaler
    }

    /// Current software gain scaler; 1.0 when hardware gain applies.
    pub fn software_gain_scaler(&self) -> f64 {
        self.software_gain_scaler
    }
}

impl std::fmt::Debug for IoDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoDevice")
            .field("info", &self.info)
            .field("direction", &self.direction)
            .field("open", &self.is_open())
            .field("enabled", &self.enabled)
            .field("nodes", &self.nodes.len())
            .field("streams", &self.streams.len())
            .finish()
    }
}

impl Drop for IoDevice {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.backend.close_dev() {
                warn!(device = %self.info.name, "close on drop failed: {e}");
            }
        }
    }
}

/// System volume adjusted by a node's range: `max(0, system - (100 - node))`.
pub fn adjust_node_volume(node: &IoNode, system_volume: u32) -> u32 {
    let offset = 100 - node.volume.min(100);
    system_volume.saturating_sub(offset)
}

/// The time it takes the device to play or capture `frames` at `rate`.
pub fn fill_time_from_frames(frames: u64, frame_rate: u32) -> Duration {
    if frame_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(frames as f64 / f64::from(frame_rate))
}

/// When the next queued sample will reach the speaker: now advanced by the
/// playback latency.
pub fn playback_timestamp(frame_rate: u32, delay_frames: u64, now: Instant) -> Instant {
    now + fill_time_from_frames(delay_frames, frame_rate)
}

/// When the first buffered sample hit the microphone: now retreated by the
/// capture latency.
pub fn capture_timestamp(frame_rate: u32, delay_frames: u64, now: Instant) -> Instant {
    now.checked_sub(fill_time_from_frames(delay_frames, frame_rate))
        .unwrap_or(now)
}
