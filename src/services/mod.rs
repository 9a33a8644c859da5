/// Audio device service
pub mod audio;
/// Bluetooth registry and policy service
pub mod bluetooth;
