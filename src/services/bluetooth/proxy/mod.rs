//! Proxy interfaces for the host Bluetooth daemon.

/// Adapter interface.
pub mod adapter1;
/// Remote device interface.
pub mod device1;

pub use adapter1::Adapter1Proxy;
pub use device1::Device1Proxy;
