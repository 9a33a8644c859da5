/// Bluetooth layer errors
#[derive(thiserror::Error, Debug)]
pub enum BtError {
    /// Device not present in the registry
    #[error("unknown Bluetooth device '{0}'")]
    UnknownDevice(String),

    /// Operation requires a connected device
    #[error("Bluetooth device '{0}' is not connected")]
    NotConnected(String),

    /// SCO link operation on a device with no SCO established
    #[error("no SCO link on device '{0}'")]
    NoScoLink(String),

    /// Profile transport failed to start
    #[error("profile start failed for '{path}': {details}")]
    ProfileStart {
        /// Device object path
        path: String,
        /// Underlying failure
        details: String,
    },

    /// Host bus failure
    #[error("host bus error: {0}")]
    Bus(#[from] zbus::Error),
}
