//! Per-channel device behind a Link hub.
//!
//! A `ChannelDevice` owns the sensor slots of one cooler or fan node and
//! knows how to refresh and command them in the register dialect its model
//! speaks. All transactions go through the owning hub's transport.

use std::sync::Arc;

use tracing::{debug, info};

use crate::device::sensor::{Activation, SensorId, SensorKind, SensorSink, SensorSlot};
use crate::error::{LinkError, Result};
use crate::protocol::codec::RequestBuilder;
use crate::protocol::values::{decode_pwm, decode_temp, encode_pwm, temp_present};
use crate::protocol::{
    fan_present, legacy_fan_register, legacy_temp_register, Dialect, FanHwMode, FirmwareVersion,
    Model, model_for_ident, LEGACY_FAN_FIXED_PWM, LEGACY_FAN_FIXED_RPM, LEGACY_FAN_MAX_RPM,
    LEGACY_FAN_MODE, LEGACY_FAN_RPM, REG_FAN_FIXED_PWM, REG_FAN_FIXED_RPM, REG_FAN_MAX_RPM,
    REG_FAN_MODE, REG_FAN_RPM, REG_FAN_SELECT, REG_TEMP_SELECT, REG_TEMP_VALUE,
};
use crate::transport::LinkTransport;

// =============================================================================
// Fan control state
// =============================================================================

/// Who decides a fan's speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// Firmware-managed default behavior.
    Default,
    /// Host-commanded fixed speed.
    Software,
}

/// Control state of one fan slot.
///
/// `value` carries the last commanded or hardware-observed target: a duty
/// percentage up to 100, an RPM target above that.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FanControl {
    pub mode: ControlMode,
    pub value: Option<f32>,
}

impl Default for FanControl {
    fn default() -> Self {
        FanControl {
            mode: ControlMode::Default,
            value: None,
        }
    }
}

impl FanControl {
    /// Seed the control state from the mode the hardware is already in,
    /// so attaching to a running unit does not override its settings.
    fn from_hardware(reading: &FanReading) -> Self {
        match FanHwMode::from_byte(reading.mode) {
            FanHwMode::FixedPwm => FanControl {
                mode: ControlMode::Software,
                value: Some(decode_pwm(reading.fixed_pwm)),
            },
            FanHwMode::FixedRpm => FanControl {
                mode: ControlMode::Software,
                value: Some(reading.fixed_rpm as f32),
            },
            FanHwMode::Default => FanControl::default(),
        }
    }
}

/// One host-side control change. Within one update the mode change applies
/// before the value change, and at most one command goes to the device.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlUpdate {
    pub mode: Option<ControlMode>,
    pub value: Option<f32>,
}

/// A fan slot: its sensor plus the control state riding along.
#[derive(Debug)]
pub struct FanSlot {
    sensor: SensorSlot,
    control: FanControl,
    seeded: bool,
    max_rpm: u16,
}

impl FanSlot {
    fn new(id: SensorId) -> Self {
        FanSlot {
            sensor: SensorSlot::new(id),
            control: FanControl::default(),
            seeded: false,
            max_rpm: 0,
        }
    }

    pub fn sensor(&self) -> &SensorSlot {
        &self.sensor
    }

    pub fn control(&self) -> FanControl {
        self.control
    }

    /// Fastest speed this slot has reported or declared.
    pub fn max_rpm(&self) -> u16 {
        self.max_rpm
    }

    /// Current speed as a percentage of the fastest seen.
    pub fn percent(&self) -> Option<f32> {
        match (self.sensor.value(), self.max_rpm) {
            (Some(rpm), max) if max > 0 => Some(rpm / max as f32 * 100.0),
            _ => None,
        }
    }
}

/// All register values describing one fan slot in one cycle.
#[derive(Debug, Clone, Copy)]
struct FanReading {
    mode: u8,
    fixed_pwm: u8,
    fixed_rpm: u16,
    rpm: u16,
    max_rpm: u16,
}

// =============================================================================
// ChannelDevice
// =============================================================================

/// One cooler or fan node on a link channel.
pub struct ChannelDevice {
    channel: u8,
    model: &'static Model,
    firmware: FirmwareVersion,
    parent_path: Arc<str>,
    temps: Vec<SensorSlot>,
    fans: Vec<FanSlot>,
    pump: Option<SensorSlot>,
}

impl ChannelDevice {
    /// Build the device for an identified channel.
    ///
    /// # Errors
    /// Returns `UnsupportedDevice` for idents missing from the model table;
    /// the hub is expected to have filtered those out.
    pub fn new(
        channel: u8,
        ident: u8,
        firmware: FirmwareVersion,
        parent_path: Arc<str>,
    ) -> Result<Self> {
        let model = model_for_ident(ident).ok_or(LinkError::UnsupportedDevice { ident })?;

        let temps = (0..model.temp_count)
            .map(|index| {
                SensorSlot::new(SensorId {
                    channel,
                    kind: SensorKind::Temperature,
                    index: index as u8,
                })
            })
            .collect();
        let fans = (0..model.fan_count)
            .map(|index| {
                FanSlot::new(SensorId {
                    channel,
                    kind: SensorKind::Fan,
                    index: index as u8,
                })
            })
            .collect();
        let pump = model.has_pump.then(|| {
            SensorSlot::new(SensorId {
                channel,
                kind: SensorKind::Pump,
                index: 0,
            })
        });

        Ok(ChannelDevice {
            channel,
            model,
            firmware,
            parent_path,
            temps,
            fans,
            pump,
        })
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn model(&self) -> &'static Model {
        self.model
    }

    pub fn firmware(&self) -> FirmwareVersion {
        self.firmware
    }

    /// Platform path of the hub this device sits behind.
    pub fn parent_path(&self) -> &str {
        &self.parent_path
    }

    pub fn temps(&self) -> &[SensorSlot] {
        &self.temps
    }

    pub fn fans(&self) -> &[FanSlot] {
        &self.fans
    }

    pub fn pump(&self) -> Option<&SensorSlot> {
        self.pump.as_ref()
    }

    /// Monitored fan-style slots: fans plus the trailing pump slot.
    fn slot_count(&self) -> usize {
        self.model.slot_count()
    }

    // =========================================================================
    // Update cycle
    // =========================================================================

    /// Refresh every slot from the hardware.
    ///
    /// The first failed transaction aborts the remainder of the cycle;
    /// slots already applied keep their new state, the rest are untouched.
    pub fn update(&mut self, transport: &mut LinkTransport, sink: &mut dyn SensorSink) -> Result<()> {
        match self.model.dialect {
            Dialect::Modern => self.update_modern(transport, sink),
            Dialect::Legacy => self.update_legacy(transport, sink),
        }
    }

    fn update_modern(
        &mut self,
        transport: &mut LinkTransport,
        sink: &mut dyn SensorSink,
    ) -> Result<()> {
        if !self.temps.is_empty() {
            let mut builder = RequestBuilder::new(self.channel, transport.report_len());
            let mut fields = Vec::with_capacity(self.temps.len());
            for index in 0..self.temps.len() {
                builder.write_byte(REG_TEMP_SELECT, index as u8);
                fields.push(builder.read_word(REG_TEMP_VALUE));
            }
            let request = builder.finish()?;
            let response = transport.send_receive(&request)?;
            for (slot, field) in self.temps.iter_mut().zip(fields) {
                let value = decode_temp(response.word(field)?);
                slot.observe_immediate(temp_present(value).then_some(value), sink);
            }
        }

        for index in 0..self.slot_count() {
            let mut builder = RequestBuilder::new(self.channel, transport.report_len());
            builder.write_byte(REG_FAN_SELECT, index as u8);
            let mode = builder.read_byte(REG_FAN_MODE);
            let fixed_pwm = builder.read_byte(REG_FAN_FIXED_PWM);
            let fixed_rpm = builder.read_word(REG_FAN_FIXED_RPM);
            let rpm = builder.read_word(REG_FAN_RPM);
            let max_rpm = builder.read_word(REG_FAN_MAX_RPM);
            let request = builder.finish()?;
            let response = transport.send_receive(&request)?;

            let reading = FanReading {
                mode: response.byte(mode)?,
                fixed_pwm: response.byte(fixed_pwm)?,
                fixed_rpm: response.word(fixed_rpm)?,
                rpm: response.word(rpm)?,
                max_rpm: response.word(max_rpm)?,
            };
            self.apply_fan_reading(index, &reading, sink);
        }
        Ok(())
    }

    fn update_legacy(
        &mut self,
        transport: &mut LinkTransport,
        sink: &mut dyn SensorSink,
    ) -> Result<()> {
        let slots = self.slot_count();

        // Configuration pass: temperatures plus mode and duty bytes.
        let mut builder = RequestBuilder::new(self.channel, transport.report_len());
        let mut temp_fields = Vec::with_capacity(self.temps.len());
        for index in 0..self.temps.len() {
            temp_fields.push(builder.read_word(legacy_temp_register(index as u8)));
        }
        let mut cfg_fields = Vec::with_capacity(slots);
        for slot in 0..slots {
            let mode = builder.read_byte(legacy_fan_register(slot as u8, LEGACY_FAN_MODE));
            let pwm = builder.read_byte(legacy_fan_register(slot as u8, LEGACY_FAN_FIXED_PWM));
            cfg_fields.push((mode, pwm));
        }
        let request = builder.finish()?;
        let response = transport.send_receive(&request)?;

        for (slot, field) in self.temps.iter_mut().zip(temp_fields) {
            let value = decode_temp(response.word(field)?);
            slot.observe_immediate(temp_present(value).then_some(value), sink);
        }
        let mut configs = Vec::with_capacity(slots);
        for (mode, pwm) in cfg_fields {
            configs.push((response.byte(mode)?, response.byte(pwm)?));
        }

        // Speed pass: the word registers of every slot.
        let mut builder = RequestBuilder::new(self.channel, transport.report_len());
        let mut speed_fields = Vec::with_capacity(slots);
        for slot in 0..slots {
            let fixed_rpm = builder.read_word(legacy_fan_register(slot as u8, LEGACY_FAN_FIXED_RPM));
            let rpm = builder.read_word(legacy_fan_register(slot as u8, LEGACY_FAN_RPM));
            let max_rpm = builder.read_word(legacy_fan_register(slot as u8, LEGACY_FAN_MAX_RPM));
            speed_fields.push((fixed_rpm, rpm, max_rpm));
        }
        let request = builder.finish()?;
        let response = transport.send_receive(&request)?;

        for (index, ((mode, fixed_pwm), (fixed_rpm, rpm, max_rpm))) in
            configs.into_iter().zip(speed_fields).enumerate()
        {
            let reading = FanReading {
                mode,
                fixed_pwm,
                fixed_rpm: response.word(fixed_rpm)?,
                rpm: response.word(rpm)?,
                max_rpm: response.word(max_rpm)?,
            };
            self.apply_fan_reading(index, &reading, sink);
        }
        Ok(())
    }

    fn apply_fan_reading(&mut self, index: usize, reading: &FanReading, sink: &mut dyn SensorSink) {
        let present = fan_present(reading.mode);
        let value = present.then_some(reading.rpm as f32);

        if index < self.fans.len() {
            let fan = &mut self.fans[index];
            if present {
                if !fan.seeded {
                    fan.control = FanControl::from_hardware(reading);
                    fan.seeded = true;
                    debug!(
                        sensor = %fan.sensor.id(),
                        control = ?fan.control,
                        "seeded fan control from hardware state"
                    );
                }
                fan.max_rpm = fan.max_rpm.max(reading.max_rpm).max(reading.rpm);
            }
            fan.sensor.observe_debounced(value, sink);
            if fan.sensor.state() == Activation::Inactive && fan.seeded {
                // Whatever reappears on this slot may be a different fan.
                fan.control = FanControl::default();
                fan.seeded = false;
                fan.max_rpm = 0;
            }
        } else if let Some(pump) = &mut self.pump {
            pump.observe_debounced(value, sink);
        }
    }

    // =========================================================================
    // Fan commands
    // =========================================================================

    /// Command a fan slot.
    ///
    /// `None` reverts the slot to the firmware default. Values up to 100 are
    /// a fixed duty percentage, values above are a fixed RPM target. The
    /// pump slot is not commandable.
    pub fn set_fan_speed(
        &mut self,
        transport: &mut LinkTransport,
        fan: usize,
        value: Option<f32>,
    ) -> Result<()> {
        if fan >= self.fans.len() {
            return Err(LinkError::NoSuchSlot { kind: "fan", index: fan });
        }
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(LinkError::InvalidInput(format!(
                    "Fan speed {v} is not a valid duty or RPM target"
                )));
            }
        }

        let mut builder = RequestBuilder::new(self.channel, transport.report_len());
        let mut acks = Vec::new();
        match self.model.dialect {
            Dialect::Modern => {
                acks.push(builder.write_byte(REG_FAN_SELECT, fan as u8));
                match value {
                    None => {
                        acks.push(builder.write_byte(REG_FAN_MODE, FanHwMode::Default.as_byte()));
                    }
                    Some(v) if v <= 100.0 => {
                        acks.push(builder.write_byte(REG_FAN_MODE, FanHwMode::FixedPwm.as_byte()));
                        acks.push(builder.write_byte(REG_FAN_FIXED_PWM, encode_pwm(v)));
                    }
                    Some(v) => {
                        acks.push(builder.write_byte(REG_FAN_MODE, FanHwMode::FixedRpm.as_byte()));
                        acks.push(builder.write_word(REG_FAN_FIXED_RPM, rpm_word(v)));
                    }
                }
            }
            Dialect::Legacy => {
                let slot = fan as u8;
                let mode_reg = legacy_fan_register(slot, LEGACY_FAN_MODE);
                match value {
                    None => {
                        acks.push(builder.write_byte(mode_reg, FanHwMode::Default.as_byte()));
                    }
                    Some(v) if v <= 100.0 => {
                        acks.push(builder.write_byte(mode_reg, FanHwMode::FixedPwm.as_byte()));
                        acks.push(builder.write_byte(
                            legacy_fan_register(slot, LEGACY_FAN_FIXED_PWM),
                            encode_pwm(v),
                        ));
                    }
                    Some(v) => {
                        acks.push(builder.write_byte(mode_reg, FanHwMode::FixedRpm.as_byte()));
                        acks.push(builder.write_word(
                            legacy_fan_register(slot, LEGACY_FAN_FIXED_RPM),
                            rpm_word(v),
                        ));
                    }
                }
            }
        }
        let request = builder.finish()?;
        let response = transport.send_receive(&request)?;
        for ack in acks {
            response.ack(ack)?;
        }

        let control = &mut self.fans[fan].control;
        match value {
            None => control.mode = ControlMode::Default,
            Some(v) => {
                control.mode = ControlMode::Software;
                control.value = Some(v);
            }
        }
        info!(channel = self.channel, fan, ?value, "fan speed command applied");
        Ok(())
    }

    /// Apply a host-side control change to a fan slot.
    ///
    /// The mode change applies before the value change. A value that arrives
    /// while the slot is in default mode is recorded and transmitted once
    /// the mode flips to software control.
    pub fn apply_control(
        &mut self,
        transport: &mut LinkTransport,
        fan: usize,
        update: ControlUpdate,
    ) -> Result<()> {
        if fan >= self.fans.len() {
            return Err(LinkError::NoSuchSlot { kind: "fan", index: fan });
        }

        let current = self.fans[fan].control;
        let mode = update.mode.unwrap_or(current.mode);
        let value = update.value.or(current.value);

        match mode {
            ControlMode::Default => {
                if update.mode == Some(ControlMode::Default) {
                    self.set_fan_speed(transport, fan, None)?;
                }
                if let Some(v) = update.value {
                    self.fans[fan].control.value = Some(v);
                }
            }
            ControlMode::Software => match value {
                Some(v) => self.set_fan_speed(transport, fan, Some(v))?,
                None => self.fans[fan].control.mode = ControlMode::Software,
            },
        }
        Ok(())
    }

    /// Tear down every exposed slot, e.g. when the hub goes away.
    pub fn close(&mut self, sink: &mut dyn SensorSink) {
        for slot in &mut self.temps {
            slot.force_deactivate(sink);
        }
        for fan in &mut self.fans {
            fan.sensor.force_deactivate(sink);
        }
        if let Some(pump) = &mut self.pump {
            pump.force_deactivate(sink);
        }
    }
}

fn rpm_word(value: f32) -> u16 {
    value.round().min(u16::MAX as f32) as u16
}
