use super::{buffer_share::StreamId, iodev::DeviceIndex};

/// Audio device layer errors
#[derive(thiserror::Error, Debug)]
pub enum AudioError {
    /// No format has been negotiated for the device
    #[error("no format negotiated for device")]
    NoFormat,

    /// The device has no active node
    #[error("device has no active node")]
    NoActiveNode,

    /// Device not found in the device list
    #[error("device {0:?} not found")]
    DeviceNotFound(DeviceIndex),

    /// Stream not attached to the device
    #[error("stream {0:?} not found")]
    StreamNotFound(StreamId),

    /// Stream already attached to the device
    #[error("stream {0:?} already attached")]
    StreamExists(StreamId),

    /// Node index not present on the device
    #[error("node {0} not found")]
    NodeNotFound(u32),

    /// More frames committed than the backend granted
    #[error("buffer overcommit: put {committed} frames, granted {granted}")]
    BufferOvercommit {
        /// Frames the caller tried to commit
        committed: u64,
        /// Frames granted by the last get_buffer
        granted: u64,
    },

    /// A buffer is already checked out from the backend
    #[error("buffer already checked out")]
    BufferBusy,

    /// The device is not open
    #[error("device is not open")]
    NotOpen,

    /// Operation not supported by this backend
    #[error("operation not supported by backend")]
    NotSupported,

    /// Backend reported a failure
    #[error("device backend failure: {0}")]
    Backend(String),
}
