/// Device backend contract and the in-memory stub
pub mod backend;
/// Per-stream write accounting
pub mod buffer_share;
/// The set of devices known to the server
pub mod device_list;
/// DSP context and loopback hooks
pub mod dsp;
/// Audio error types
pub mod error;
/// Sample formats and negotiation
pub mod format;
/// The I/O device core
pub mod iodev;
/// Selectable device endpoints
pub mod node;
/// Sample rate estimation
pub mod rate_estimator;
/// Software volume curves
pub mod softvol;

pub use backend::{AudioArea, DeviceBackend, StubBackend, StubState};
pub use buffer_share::{BufferShare, StreamId};
pub use device_list::DeviceList;
pub use dsp::{DspContext, LoopbackHook};
pub use error::AudioError;
pub use format::{AudioFormat, SampleFormat, SupportedFormats};
pub use iodev::{DeviceIndex, Direction, IoDevice, IoDeviceInfo};
pub use node::{IoNode, NodeAttr, NodeType};
pub use rate_estimator::RateEstimator;
pub use softvol::SoftvolCurve;
