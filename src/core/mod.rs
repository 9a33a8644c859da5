use thiserror::Error;

use crate::services::{audio::AudioError, bluetooth::BtError};

/// Error types for the aurad daemon.
///
/// This enum aggregates the per-service error types so that callers above
/// the service layer can propagate failures with a single type.
#[derive(Error, Debug)]
pub enum AuradError {
    /// Audio device layer error
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Bluetooth layer error
    #[error(transparent)]
    Bluetooth(#[from] BtError),

    /// Configuration loading or validation error
    #[error("configuration error at '{location}': {details}")]
    Config {
        /// File path or "defaults" when no file was involved
        location: String,
        /// Underlying error details
        details: String,
    },

    /// The main message bus has shut down
    #[error("main message bus is closed")]
    BusClosed,

    /// Standard I/O operation error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for aurad operations.
///
/// This type alias simplifies error handling by defaulting the error type
/// to `AuradError` for all daemon-level operations.
pub type Result<T> = std::result::Result<T, AuradError>;
