//! Protocol definitions for the Corsair Link hub family.
//!
//! Every transaction is a batch of sub-operations packed into one fixed-size
//! HID report; the device answers with one report echoing the batch in order.
//! Register maps come in two dialects: the flat strided map of the first
//! generation bridges and the select-register map of the later coolers.

// =============================================================================
// Constants
// =============================================================================

/// Corsair Vendor ID.
pub const CORSAIR_VID: u16 = 0x1B1C;

/// Link hub (CoolIT bridge) Product ID.
pub const LINK_HUB_PID: u16 = 0x0C04;

/// Default HID report length for this family, report id byte included.
pub const DEFAULT_REPORT_LENGTH: usize = 64;

/// Maximum time to wait for a response report, in milliseconds.
pub const RESPONSE_TIMEOUT_MS: u64 = 500;

/// Link channels addressable behind one hub.
pub const MAX_LINK_CHANNELS: u8 = 8;

/// Marker byte reported for a populated channel in the node status block.
pub const CHANNEL_POPULATED: u8 = 5;

// =============================================================================
// Sub-operation opcodes
// =============================================================================

/// Write a single register byte.
pub const OP_WRITE_BYTE: u8 = 0x06;

/// Read a single register byte.
pub const OP_READ_BYTE: u8 = 0x07;

/// Write a little-endian register word.
pub const OP_WRITE_WORD: u8 = 0x08;

/// Read a little-endian register word.
pub const OP_READ_WORD: u8 = 0x09;

/// Write a block of register bytes.
pub const OP_WRITE_BLOCK: u8 = 0x0A;

/// Read a block of register bytes.
pub const OP_READ_BLOCK: u8 = 0x0B;

/// Combine an opcode with a link channel into the sub-operation flag byte.
/// The channel index occupies the high nibble.
pub const fn channel_flag(opcode: u8, channel: u8) -> u8 {
    opcode | (channel << 4)
}

// =============================================================================
// Registers common to both dialects
// =============================================================================

/// Model ident byte.
pub const REG_DEVICE_ID: u8 = 0x00;

/// Firmware version word (hi byte: major nibble, minor nibble; lo: revision).
pub const REG_FIRMWARE_VERSION: u8 = 0x01;

/// Node status block, channel 0 only. One marker byte per link channel.
pub const REG_NODE_STATUS: u8 = 0x03;

/// Length of the node status block.
pub const NODE_STATUS_LEN: u8 = MAX_LINK_CHANNELS;

// =============================================================================
// Modern dialect registers (select, then access)
// =============================================================================

/// Select the temperature sensor for subsequent reads.
pub const REG_TEMP_SELECT: u8 = 0x0C;

/// Temperature of the selected sensor, signed 1/256 °C word.
pub const REG_TEMP_VALUE: u8 = 0x0E;

/// Select the fan slot for subsequent reads/writes.
pub const REG_FAN_SELECT: u8 = 0x10;

/// Mode byte of the selected fan slot.
pub const REG_FAN_MODE: u8 = 0x12;

/// Fixed PWM duty byte of the selected fan slot.
pub const REG_FAN_FIXED_PWM: u8 = 0x13;

/// Fixed RPM target word of the selected fan slot.
pub const REG_FAN_FIXED_RPM: u8 = 0x14;

/// Current RPM word of the selected fan slot.
pub const REG_FAN_RPM: u8 = 0x16;

/// Maximum RPM word of the selected fan slot.
pub const REG_FAN_MAX_RPM: u8 = 0x17;

// =============================================================================
// Legacy dialect registers (flat strided map)
// =============================================================================

/// First temperature word register; sensors follow at 2-byte stride.
pub const LEGACY_TEMP_BASE: u8 = 0x10;

/// First fan slot register block; slots follow at [`LEGACY_FAN_STRIDE`].
pub const LEGACY_FAN_BASE: u8 = 0x20;

/// Register distance between consecutive legacy fan slot blocks.
pub const LEGACY_FAN_STRIDE: u8 = 0x08;

/// Mode byte offset within a legacy fan slot block.
pub const LEGACY_FAN_MODE: u8 = 0x00;

/// Fixed PWM byte offset within a legacy fan slot block.
pub const LEGACY_FAN_FIXED_PWM: u8 = 0x01;

/// Fixed RPM word offset within a legacy fan slot block.
pub const LEGACY_FAN_FIXED_RPM: u8 = 0x02;

/// Current RPM word offset within a legacy fan slot block.
pub const LEGACY_FAN_RPM: u8 = 0x04;

/// Maximum RPM word offset within a legacy fan slot block.
pub const LEGACY_FAN_MAX_RPM: u8 = 0x06;

/// Register of legacy temperature sensor `index`.
pub const fn legacy_temp_register(index: u8) -> u8 {
    LEGACY_TEMP_BASE + 2 * index
}

/// Register of `field` within legacy fan slot `slot`.
pub const fn legacy_fan_register(slot: u8, field: u8) -> u8 {
    LEGACY_FAN_BASE + LEGACY_FAN_STRIDE * slot + field
}

// =============================================================================
// Fan mode byte
// =============================================================================

/// Set in the mode byte when the slot has a device attached.
pub const FAN_PRESENT_BIT: u8 = 0x80;

/// Bits of the mode byte that select the control mode.
pub const FAN_MODE_MASK: u8 = 0x0E;

/// Hardware control mode of a fan slot, as encoded in the mode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanHwMode {
    /// Firmware-managed default behavior.
    Default,
    /// Fixed PWM duty set by the host.
    FixedPwm,
    /// Fixed RPM target set by the host.
    FixedRpm,
}

impl FanHwMode {
    /// Decode the control mode from a raw mode byte. Unknown mode bits are
    /// treated as the firmware default.
    pub fn from_byte(mode: u8) -> Self {
        match mode & FAN_MODE_MASK {
            0x02 => FanHwMode::FixedPwm,
            0x04 => FanHwMode::FixedRpm,
            _ => FanHwMode::Default,
        }
    }

    /// Encode the control mode into the mode byte bits.
    pub const fn as_byte(&self) -> u8 {
        match self {
            FanHwMode::FixedPwm => 0x02,
            FanHwMode::FixedRpm => 0x04,
            FanHwMode::Default => 0x06,
        }
    }
}

/// Whether a mode byte reports the slot as populated.
pub const fn fan_present(mode: u8) -> bool {
    mode & FAN_PRESENT_BIT != 0
}

// =============================================================================
// Model table
// =============================================================================

/// Register dialect spoken by a channel device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Flat strided map of the first generation bridges.
    Legacy,
    /// Select-register map of the later coolers and the Commander Mini.
    Modern,
}

/// Static description of a supported channel device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Model {
    /// Ident byte reported in [`REG_DEVICE_ID`].
    pub ident: u8,
    /// Marketing name.
    pub name: &'static str,
    /// Register dialect.
    pub dialect: Dialect,
    /// Number of temperature sensors.
    pub temp_count: usize,
    /// Number of controllable fan slots.
    pub fan_count: usize,
    /// Whether a pump follows the fan slots.
    pub has_pump: bool,
}

impl Model {
    /// Total monitored slots: fans plus the trailing pump slot if present.
    pub const fn slot_count(&self) -> usize {
        self.fan_count + self.has_pump as usize
    }
}

/// All device idents this driver knows how to drive.
///
/// Idents missing from the table (e.g. 0x39, the Lighting Node) have no
/// cooling sensors and their channels are skipped during hub construction.
pub const MODELS: &[Model] = &[
    Model { ident: 0x37, name: "H80", dialect: Dialect::Legacy, temp_count: 1, fan_count: 4, has_pump: true },
    Model { ident: 0x38, name: "Cooling Node", dialect: Dialect::Legacy, temp_count: 4, fan_count: 5, has_pump: false },
    Model { ident: 0x3A, name: "H100", dialect: Dialect::Legacy, temp_count: 1, fan_count: 4, has_pump: true },
    Model { ident: 0x3B, name: "H80i", dialect: Dialect::Modern, temp_count: 1, fan_count: 4, has_pump: true },
    Model { ident: 0x3C, name: "H100i", dialect: Dialect::Modern, temp_count: 1, fan_count: 4, has_pump: true },
    Model { ident: 0x3D, name: "Commander Mini", dialect: Dialect::Modern, temp_count: 4, fan_count: 6, has_pump: false },
    Model { ident: 0x3E, name: "H100i GT", dialect: Dialect::Modern, temp_count: 1, fan_count: 2, has_pump: true },
    Model { ident: 0x40, name: "H110i", dialect: Dialect::Modern, temp_count: 1, fan_count: 2, has_pump: true },
    Model { ident: 0x41, name: "H110i GT", dialect: Dialect::Modern, temp_count: 1, fan_count: 2, has_pump: true },
];

/// Look up the model for an ident byte.
pub fn model_for_ident(ident: u8) -> Option<&'static Model> {
    MODELS.iter().find(|m| m.ident == ident)
}

// =============================================================================
// Firmware version
// =============================================================================

/// Firmware version as packed into [`REG_FIRMWARE_VERSION`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub revision: u8,
}

impl FirmwareVersion {
    /// Decode the version word: high byte packs major and minor nibbles,
    /// low byte is the revision.
    pub const fn from_word(word: u16) -> Self {
        let hi = (word >> 8) as u8;
        FirmwareVersion {
            major: hi >> 4,
            minor: hi & 0x0F,
            revision: word as u8,
        }
    }
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_flag() {
        assert_eq!(channel_flag(OP_READ_BYTE, 0), 0x07);
        assert_eq!(channel_flag(OP_READ_BYTE, 2), 0x27);
        assert_eq!(channel_flag(OP_WRITE_WORD, 7), 0x78);
    }

    #[test]
    fn test_model_lookup() {
        let h100 = model_for_ident(0x3A).unwrap();
        assert_eq!(h100.name, "H100");
        assert_eq!(h100.dialect, Dialect::Legacy);
        assert_eq!(h100.temp_count, 1);
        assert_eq!(h100.fan_count, 4);
        assert!(h100.has_pump);
        assert_eq!(h100.slot_count(), 5);

        let mini = model_for_ident(0x3D).unwrap();
        assert_eq!(mini.name, "Commander Mini");
        assert_eq!(mini.dialect, Dialect::Modern);
        assert_eq!(mini.temp_count, 4);
        assert_eq!(mini.fan_count, 6);
        assert!(!mini.has_pump);
        assert_eq!(mini.slot_count(), 6);

        // Lighting Node has no cooling sensors and is not driven.
        assert!(model_for_ident(0x39).is_none());
    }

    #[test]
    fn test_legacy_registers() {
        assert_eq!(legacy_temp_register(0), 0x10);
        assert_eq!(legacy_temp_register(3), 0x16);
        assert_eq!(legacy_fan_register(0, LEGACY_FAN_MODE), 0x20);
        assert_eq!(legacy_fan_register(2, LEGACY_FAN_RPM), 0x34);
    }

    #[test]
    fn test_fan_mode_byte() {
        assert!(fan_present(0x82));
        assert!(!fan_present(0x02));
        assert_eq!(FanHwMode::from_byte(0x82), FanHwMode::FixedPwm);
        assert_eq!(FanHwMode::from_byte(0x84), FanHwMode::FixedRpm);
        assert_eq!(FanHwMode::from_byte(0x86), FanHwMode::Default);
        // Unconfigured mode bits fall back to the firmware default.
        assert_eq!(FanHwMode::from_byte(0x80), FanHwMode::Default);
    }

    #[test]
    fn test_firmware_version() {
        let fw = FirmwareVersion::from_word(0x2105);
        assert_eq!(fw.major, 2);
        assert_eq!(fw.minor, 1);
        assert_eq!(fw.revision, 5);
        assert_eq!(fw.to_string(), "2.1.5");
    }
}
