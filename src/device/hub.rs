//! One physical Link hub and the channel devices behind it.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tracing::{debug, info};

use crate::device::channel::{ChannelDevice, ControlUpdate};
use crate::device::sensor::SensorSink;
use crate::error::{LinkError, Result};
use crate::protocol::codec::RequestBuilder;
use crate::protocol::{
    CHANNEL_POPULATED, DEFAULT_REPORT_LENGTH, FirmwareVersion, MAX_LINK_CHANNELS, NODE_STATUS_LEN,
    REG_DEVICE_ID, REG_FIRMWARE_VERSION, REG_NODE_STATUS,
};
use crate::transport::{LinkTransport, PacketIo};

/// A hub unit: one HID stream and every supported device found behind it.
pub struct HubUnit {
    path: Arc<str>,
    transport: LinkTransport,
    channels: Vec<ChannelDevice>,
}

impl HubUnit {
    /// Probe an opened stream and assemble the unit.
    ///
    /// Channel 0 is identified first; a transport failure there aborts the
    /// probe. Channels flagged populated in the node status block are
    /// identified next; unknown or silent ones are skipped. A hub carrying
    /// no supported device at all is rejected.
    pub fn open(path: &str, io: Box<dyn PacketIo>) -> Result<Self> {
        let path: Arc<str> = Arc::from(path);
        let mut transport = LinkTransport::new(io, DEFAULT_REPORT_LENGTH);
        let mut channels = Vec::new();

        let (ident, firmware) = Self::read_identity(&mut transport, 0)?;
        Self::push_channel(&mut channels, 0, ident, firmware, &path)?;

        let mut builder = RequestBuilder::new(0, transport.report_len());
        let status = builder.read_block(REG_NODE_STATUS, NODE_STATUS_LEN);
        let request = builder.finish()?;
        let response = transport.send_receive(&request)?;
        let markers = response.block(status)?.to_vec();

        for channel in 1..MAX_LINK_CHANNELS {
            if markers.get(channel as usize) != Some(&CHANNEL_POPULATED) {
                continue;
            }
            match Self::read_identity(&mut transport, channel) {
                Ok((ident, firmware)) => {
                    Self::push_channel(&mut channels, channel, ident, firmware, &path)?;
                }
                Err(LinkError::Timeout) | Err(LinkError::InvalidResponse { .. }) => {
                    debug!(%path, channel, "populated channel did not identify, skipping");
                }
                Err(err) => return Err(err),
            }
        }

        if channels.is_empty() {
            return Err(LinkError::DeviceNotFound);
        }
        info!(%path, channels = channels.len(), "hub unit ready");
        Ok(HubUnit { path, transport, channels })
    }

    fn read_identity(
        transport: &mut LinkTransport,
        channel: u8,
    ) -> Result<(u8, FirmwareVersion)> {
        let mut builder = RequestBuilder::new(channel, transport.report_len());
        let ident = builder.read_byte(REG_DEVICE_ID);
        let firmware = builder.read_word(REG_FIRMWARE_VERSION);
        let request = builder.finish()?;
        let response = transport.send_receive(&request)?;
        Ok((
            response.byte(ident)?,
            FirmwareVersion::from_word(response.word(firmware)?),
        ))
    }

    fn push_channel(
        channels: &mut Vec<ChannelDevice>,
        channel: u8,
        ident: u8,
        firmware: FirmwareVersion,
        path: &Arc<str>,
    ) -> Result<()> {
        match ChannelDevice::new(channel, ident, firmware, Arc::clone(path)) {
            Ok(device) => {
                debug!(
                    channel,
                    model = device.model().name,
                    %firmware,
                    "channel identified"
                );
                channels.push(device);
                Ok(())
            }
            Err(LinkError::UnsupportedDevice { ident }) => {
                debug!(channel, ident = format_args!("0x{ident:02X}"), "unsupported ident, skipping channel");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Platform path of the underlying stream.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Devices found behind this hub, in channel order.
    pub fn channels(&self) -> &[ChannelDevice] {
        &self.channels
    }

    /// Shared liveness flag, cleared by the transport on stream failure.
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        self.transport.connected_flag()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Refresh every channel device once.
    ///
    /// A transient failure skips the rest of that channel's cycle only;
    /// a dead stream aborts the pass and leaves the unit flagged for
    /// eviction.
    pub fn update(&mut self, sink: &mut dyn SensorSink) -> Result<()> {
        let HubUnit { transport, channels, .. } = self;
        for device in channels.iter_mut() {
            if let Err(err) = device.update(transport, sink) {
                if matches!(err, LinkError::Disconnected) {
                    return Err(err);
                }
                debug!(channel = device.channel(), %err, "update cycle failed");
            }
        }
        Ok(())
    }

    /// Command a fan behind one of the channels.
    pub fn set_fan_speed(&mut self, channel: u8, fan: usize, value: Option<f32>) -> Result<()> {
        let HubUnit { transport, channels, .. } = self;
        let device = channels
            .iter_mut()
            .find(|d| d.channel() == channel)
            .ok_or(LinkError::NoSuchSlot { kind: "channel", index: channel as usize })?;
        device.set_fan_speed(transport, fan, value)
    }

    /// Apply a host-side control change to a fan behind one of the channels.
    pub fn apply_control(&mut self, channel: u8, fan: usize, update: ControlUpdate) -> Result<()> {
        let HubUnit { transport, channels, .. } = self;
        let device = channels
            .iter_mut()
            .find(|d| d.channel() == channel)
            .ok_or(LinkError::NoSuchSlot { kind: "channel", index: channel as usize })?;
        device.apply_control(transport, fan, update)
    }

    /// Tear down every exposed sensor, e.g. before eviction.
    pub fn close(&mut self, sink: &mut dyn SensorSink) {
        for device in &mut self.channels {
            device.close(sink);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sensor::RecordingSink;
    use crate::protocol::{OP_READ_BLOCK, OP_READ_BYTE, OP_READ_WORD};
    use crate::transport::mock::{MockPacketIo, MockReply};

    fn report(segments: &[Vec<u8>]) -> Vec<u8> {
        let mut data = vec![0u8];
        for segment in segments {
            data.extend_from_slice(segment);
        }
        data.resize(DEFAULT_REPORT_LENGTH, 0);
        data
    }

    fn identity_reply(ident: u8, firmware: u16) -> MockReply {
        MockReply::Respond(report(&[
            vec![1, OP_READ_BYTE, ident],
            vec![2, OP_READ_WORD, firmware as u8, (firmware >> 8) as u8],
        ]))
    }

    fn node_status_reply(markers: [u8; 8]) -> MockReply {
        let mut segment = vec![1, OP_READ_BLOCK];
        segment.extend_from_slice(&markers);
        MockReply::Respond(report(&[segment]))
    }

    #[test]
    fn test_open_single_channel_hub() {
        let (io, _writes) = MockPacketIo::new(vec![
            identity_reply(0x3A, 0x1102),
            node_status_reply([CHANNEL_POPULATED, 0, 0, 0, 0, 0, 0, 0]),
        ]);

        let hub = HubUnit::open("mock-path", Box::new(io)).unwrap();
        assert_eq!(hub.path(), "mock-path");
        assert_eq!(hub.channels().len(), 1);

        let device = &hub.channels()[0];
        assert_eq!(device.model().name, "H100");
        assert_eq!(device.firmware().to_string(), "1.1.2");
        assert_eq!(device.parent_path(), "mock-path");
    }

    #[test]
    fn test_open_identifies_populated_secondaries() {
        let (io, _writes) = MockPacketIo::new(vec![
            identity_reply(0x3D, 0x2001),
            node_status_reply([CHANNEL_POPULATED, 0, CHANNEL_POPULATED, 0, 0, 0, 0, 0]),
            identity_reply(0x3C, 0x1007),
        ]);

        let hub = HubUnit::open("mock-path", Box::new(io)).unwrap();
        assert_eq!(hub.channels().len(), 2);
        assert_eq!(hub.channels()[0].model().name, "Commander Mini");
        assert_eq!(hub.channels()[1].channel(), 2);
        assert_eq!(hub.channels()[1].model().name, "H100i");
    }

    #[test]
    fn test_open_skips_unknown_secondary_ident() {
        let (io, _writes) = MockPacketIo::new(vec![
            identity_reply(0x3A, 0x1102),
            node_status_reply([CHANNEL_POPULATED, CHANNEL_POPULATED, 0, 0, 0, 0, 0, 0]),
            // Channel 1 carries a Lighting Node, which this driver skips.
            identity_reply(0x39, 0x0100),
        ]);

        let hub = HubUnit::open("mock-path", Box::new(io)).unwrap();
        assert_eq!(hub.channels().len(), 1);
        assert_eq!(hub.channels()[0].channel(), 0);
    }

    #[test]
    fn test_open_requires_channel0_identity() {
        let (io, _writes) = MockPacketIo::new(vec![MockReply::Silent]);
        assert!(matches!(
            HubUnit::open("mock-path", Box::new(io)),
            Err(LinkError::Timeout)
        ));
    }

    #[test]
    fn test_open_rejects_hub_with_no_supported_channels() {
        let (io, _writes) = MockPacketIo::new(vec![
            identity_reply(0x39, 0x0100),
            node_status_reply([CHANNEL_POPULATED, 0, 0, 0, 0, 0, 0, 0]),
        ]);
        assert!(matches!(
            HubUnit::open("mock-path", Box::new(io)),
            Err(LinkError::DeviceNotFound)
        ));
    }

    #[test]
    fn test_dead_stream_flags_unit_for_eviction() {
        let (io, _writes) = MockPacketIo::new(vec![
            identity_reply(0x40, 0x1102),
            node_status_reply([CHANNEL_POPULATED, 0, 0, 0, 0, 0, 0, 0]),
            MockReply::WriteFail,
        ]);
        let mut hub = HubUnit::open("mock-path", Box::new(io)).unwrap();
        let flag = hub.connected_flag();
        let mut sink = RecordingSink::new();

        assert!(matches!(hub.update(&mut sink), Err(LinkError::Disconnected)));
        assert!(!flag.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_set_fan_speed_requires_known_channel() {
        let (io, _writes) = MockPacketIo::new(vec![
            identity_reply(0x3A, 0x1102),
            node_status_reply([CHANNEL_POPULATED, 0, 0, 0, 0, 0, 0, 0]),
        ]);
        let mut hub = HubUnit::open("mock-path", Box::new(io)).unwrap();

        assert!(matches!(
            hub.set_fan_speed(3, 0, Some(50.0)),
            Err(LinkError::NoSuchSlot { kind: "channel", index: 3 })
        ));
    }
}
