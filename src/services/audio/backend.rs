//! The polymorphic contract every hardware backend implements.
//!
//! Concrete backends (ALSA, Bluetooth A2DP, HFP audio gateway, the stub)
//! supply this capability set behind one handle; the iodev core is backend
//! agnostic. Only `frames_queued`, `delay_frames`, `get_buffer` and
//! `put_buffer` may be called from the audio thread; everything else is
//! main-thread-only.

use std::sync::{Arc, Mutex};

use super::error::AudioError;
use super::format::{AudioFormat, SampleFormat, SupportedFormats};

/// A contiguous audio region granted by [`DeviceBackend::get_buffer`].
#[derive(Debug)]
pub struct AudioArea<'a> {
    /// Raw sample bytes, `frame_count * frame_bytes` long.
    pub frames: &'a mut [u8],
    /// Frames available to read or write.
    pub frame_count: u64,
}

/// Capability set realized by every device backend.
///
/// Contract:
/// - `open_dev` leaves the device ready to serve
///   `frames_queued >= min_buffer_level`.
/// - `get_buffer` grants a contiguous area; a second call before
///   `put_buffer` is not permitted.
/// - `put_buffer(n)` commits at most what `get_buffer` granted.
/// - `update_active_node` is the only way the backend learns that node
///   selection changed.
pub trait DeviceBackend: Send {
    /// Opens the device.
    fn open_dev(&mut self) -> Result<(), AudioError>;

    /// Closes the device if it is open.
    fn close_dev(&mut self) -> Result<(), AudioError>;

    /// True if the device has been opened.
    fn is_open(&self) -> bool;

    /// Refreshes and returns supported rates, channel counts and sample
    /// encodings.
    fn update_supported_formats(&mut self) -> Result<SupportedFormats, AudioError>;

    /// Frames currently in the hardware buffer.
    fn frames_queued(&self) -> Result<u64, AudioError>;

    /// Hardware delay of the next sample, in frames.
    fn delay_frames(&self) -> Result<u64, AudioError>;

    /// Grants a buffer to read from or write to.
    fn get_buffer(&mut self) -> Result<AudioArea<'_>, AudioError>;

    /// Commits `nwritten` frames of the granted buffer.
    fn put_buffer(&mut self, nwritten: u64) -> Result<(), AudioError>;

    /// Drops whatever is queued, returning the number of frames flushed.
    fn flush_buffer(&mut self) -> u64;

    /// True iff hardware is actively moving samples.
    fn dev_running(&self) -> bool;

    /// Tells the backend the active node selection changed.
    fn update_active_node(&mut self, node_idx: u32, dev_enabled: bool);

    /// Fills the best available channel ordering for the chosen format.
    fn update_channel_layout(&mut self, format: &mut AudioFormat) -> Result<(), AudioError>;

    /// Applies a hardware volume, 0-100.
    fn set_volume(&mut self, _volume: u32) {}

    /// Applies the mute state.
    fn set_mute(&mut self, _mute: bool) {}

    /// Applies a hardware capture gain in hundredths of a dB.
    fn set_capture_gain(&mut self, _gain: i64) {}

    /// Applies the capture mute state.
    fn set_capture_mute(&mut self, _mute: bool) {}

    /// Enables or disables channel swap for a node.
    fn set_swap_mode_for_node(&mut self, _node_idx: u32, _enable: bool) -> Result<(), AudioError> {
        Err(AudioError::NotSupported)
    }
}

/// Observable state of a [`StubBackend`], shared with the creator.
#[derive(Debug, Default)]
pub struct StubState {
    /// Device is open.
    pub open: bool,
    /// Hardware is "running".
    pub running: bool,
    /// Frames currently queued.
    pub queued: u64,
    /// Reported hardware delay.
    pub delay: u64,
    /// Last hardware volume applied.
    pub volume: Option<u32>,
    /// Last mute state applied.
    pub muted: Option<bool>,
    /// Last hardware capture gain applied.
    pub capture_gain: Option<i64>,
    /// Last capture mute state applied.
    pub capture_muted: Option<bool>,
    /// Every `update_active_node` call, in order.
    pub active_node_updates: Vec<(u32, bool)>,
    /// Every swap-mode call, in order.
    pub swap_mode_calls: Vec<(u32, bool)>,
    /// Number of open calls.
    pub open_count: u32,
    /// Number of close calls.
    pub close_count: u32,
    /// Force the next open to fail.
    pub fail_open: bool,
}

/// In-memory backend.
///
/// Serves as the null sink device and as the recording double behind the
/// iodev tests: every control call lands in a [`StubState`] the creator
/// keeps a handle to.
pub struct StubBackend {
    state: Arc<Mutex<StubState>>,
    supported: SupportedFormats,
    buffer: Vec<u8>,
    buffer_frames: u64,
    frame_bytes: usize,
    granted: Option<u64>,
}

impl StubBackend {
    /// Default ring size in frames.
    pub const DEFAULT_BUFFER_FRAMES: u64 = 4096;

    /// Creates a stub with the default stereo S16 format set.
    pub fn new() -> (Self, Arc<Mutex<StubState>>) {
        Self::with_supported(SupportedFormats {
            rates: vec![44_100, 48_000],
            channel_counts: vec![2],
            sample_formats: vec![SampleFormat::S16LE],
        })
    }

    /// Creates a stub advertising the given formats.
    pub fn with_supported(supported: SupportedFormats) -> (Self, Arc<Mutex<StubState>>) {
        let state = Arc::new(Mutex::new(StubState::default()));
        let frame_bytes = 4;
        let backend = Self {
            state: Arc::clone(&state),
            supported,
            buffer: vec![0; (Self::DEFAULT_BUFFER_FRAMES as usize) * frame_bytes],
            buffer_frames: Self::DEFAULT_BUFFER_FRAMES,
            frame_bytes,
            granted: None,
        };
        (backend, state)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DeviceBackend for StubBackend {
    fn open_dev(&mut self) -> Result<(), AudioError> {
        let mut st = self.state();
        if st.fail_open {
            return Err(AudioError::Backend("stub open failure".to_string()));
        }
        st.open = true;
        st.running = true;
        st.open_count += 1;
        Ok(())
    }

    fn close_dev(&mut self) -> Result<(), AudioError> {
        {
            let mut st = self.state();
            st.open = false;
            st.running = false;
            st.queued = 0;
            st.close_count += 1;
        }
        self.granted = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state().open
    }

    fn update_supported_formats(&mut self) -> Result<SupportedFormats, AudioError> {
        Ok(self.supported.clone())
    }

    fn frames_queued(&self) -> Result<u64, AudioError> {
        Ok(self.state().queued)
    }

    fn delay_frames(&self) -> Result<u64, AudioError> {
        Ok(self.state().delay)
    }

    fn get_buffer(&mut self) -> Result<AudioArea<'_>, AudioError> {
        if self.granted.is_some() {
            return Err(AudioError::BufferBusy);
        }
        let queued = self.state().queued;
        let avail = self.buffer_frames.saturating_sub(queued);
        self.granted = Some(avail);
        let nbytes = (avail as usize) * self.frame_bytes;
        Ok(AudioArea {
            frames: &mut self.buffer[..nbytes],
            frame_count: avail,
        })
    }

    fn put_buffer(&mut self, nwritten: u64) -> Result<(), AudioError> {
        let granted = self.granted.take().ok_or(AudioError::NotOpen)?;
        if nwritten > granted {
            return Err(AudioError::BufferOvercommit {
                committed: nwritten,
                granted,
            });
        }
        self.state().queued += nwritten;
        Ok(())
    }

    fn flush_buffer(&mut self) -> u64 {
        let mut st = self.state();
        let flushed = st.queued;
        st.queued = 0;
        flushed
    }

    fn dev_running(&self) -> bool {
        self.state().running
    }

    fn update_active_node(&mut self, node_idx: u32, dev_enabled: bool) {
        self.state().active_node_updates.push((node_idx, dev_enabled));
    }

    fn update_channel_layout(&mut self, _format: &mut AudioFormat) -> Result<(), AudioError> {
        Ok(())
    }

    fn set_volume(&mut self, volume: u32) {
        self.state().volume = Some(volume);
    }

    fn set_mute(&mut self, mute: bool) {
        self.state().muted = Some(mute);
    }

    fn set_capture_gain(&mut self, gain: i64) {
        self.state().capture_gain = Some(gain);
    }

    fn set_capture_mute(&mut self, mute: bool) {
        self.state().capture_muted = Some(mute);
    }

    fn set_swap_mode_for_node(&mut self, node_idx: u32, enable: bool) -> Result<(), AudioError> {
        self.state().swap_mode_calls.push((node_idx, enable));
        Ok(())
    }
}
