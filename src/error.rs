//! Custom error types for Corsair Link devices.
//!
//! This module provides fine-grained error handling for device communication,
//! protocol encoding/decoding, and configuration persistence.

use thiserror::Error;

/// Main error type for Corsair Link operations.
#[derive(Error, Debug)]
pub enum LinkError {
    /// No Link hub found during enumeration.
    #[error("No Corsair Link hub found. Check USB connection and permissions.")]
    DeviceNotFound,

    /// HID communication error.
    #[error("HID communication error: {0}")]
    HidError(#[from] hidapi::HidError),

    /// Timeout waiting for a response report.
    #[error("Timeout waiting for device response")]
    Timeout,

    /// The underlying HID stream failed and the unit is no longer usable.
    #[error("Device disconnected")]
    Disconnected,

    /// Invalid or malformed response from device.
    #[error("Invalid response from device: {message}")]
    InvalidResponse { message: String },

    /// Device ident byte with no entry in the model table.
    #[error("Unsupported device ident 0x{ident:02X}")]
    UnsupportedDevice { ident: u8 },

    /// Packet does not fit the unit's report size.
    #[error("Packet of {len} bytes exceeds report capacity of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// Fan or channel index outside the device's population.
    #[error("No such {kind} index {index}")]
    NoSuchSlot { kind: &'static str, index: usize },

    /// Generic invalid input error.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration file I/O error.
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file parse error.
    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Link operations.
pub type Result<T> = std::result::Result<T, LinkError>;
