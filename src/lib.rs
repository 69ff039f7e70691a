//! Corsair Rust Devices Library
//!
//! A Rust driver for Corsair Link liquid coolers and fan hubs.
//!
//! # Features
//!
//! - Discover all attached Link hubs and the devices behind their channels
//! - Read temperatures, fan and pump speeds
//! - Command fan speeds: fixed duty, fixed RPM, or firmware default
//!
//! # Example
//!
//! ```no_run
//! use corsair_rust_devices::device::{DeviceDirectory, LogSink};
//! use corsair_rust_devices::transport::HidBackend;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = DeviceDirectory::new(Box::new(HidBackend::new()?));
//!     let mut sink = LogSink;
//!     directory.scan(&mut sink);
//!
//!     for (path, unit) in directory.units() {
//!         let mut unit = unit.lock().unwrap();
//!         unit.update(&mut sink)?;
//!         for device in unit.channels() {
//!             println!("{}: {}", path, device.model().name);
//!             for temp in device.temps() {
//!                 if let Some(value) = temp.value() {
//!                     println!("  {}: {:.1} C", temp.id(), value);
//!                 }
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use device::{ChannelDevice, DeviceDirectory, HubUnit};
pub use error::{LinkError, Result};
pub use protocol::{Dialect, FirmwareVersion, Model};
