//! Transport layer: HID streams and the bounded request/response exchange.

pub mod hid;
pub mod link;
#[cfg(test)]
pub(crate) mod mock;

pub use hid::{HidBackend, HidPacketIo, LinkBackend, PacketIo};
pub use link::LinkTransport;
