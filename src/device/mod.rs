//! Device layer for Corsair Link hubs.
//!
//! Provides the per-channel devices, the hub units that own them, and the
//! directory that tracks attached units.

pub mod channel;
pub mod directory;
pub mod hub;
pub mod sensor;

pub use channel::{ChannelDevice, ControlMode, ControlUpdate, FanControl, FanSlot};
pub use directory::DeviceDirectory;
pub use hub::HubUnit;
pub use sensor::{Activation, LogSink, SensorId, SensorKind, SensorSink, SensorSlot};
