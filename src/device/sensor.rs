//! Sensor slot lifecycle.
//!
//! Each channel device owns a fixed set of slots. A slot only surfaces to the
//! host while hardware is attached behind it: temperature inputs follow their
//! reading directly, fan and pump slots are debounced so one glitched cycle
//! does not tear the sensor down.

use tracing::info;

/// What a sensor slot measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Temperature,
    Fan,
    Pump,
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::Temperature => write!(f, "temp"),
            SensorKind::Fan => write!(f, "fan"),
            SensorKind::Pump => write!(f, "pump"),
        }
    }
}

/// Stable identity of one sensor slot behind a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SensorId {
    /// Link channel the owning device sits on.
    pub channel: u8,
    pub kind: SensorKind,
    /// Slot index within the kind.
    pub index: u8,
}

impl std::fmt::Display for SensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch{}/{}{}", self.channel, self.kind, self.index)
    }
}

/// Lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Nothing attached; not surfaced to the host.
    Inactive,
    /// Attached and surfaced.
    Active,
    /// Reported absent once; surfaced until the absence repeats.
    PendingDeactivate,
}

/// Receives slot lifecycle changes.
///
/// The driver calls `activate` exactly once when a slot surfaces and
/// `deactivate` exactly once when it is torn down again.
pub trait SensorSink {
    fn activate(&mut self, sensor: SensorId);
    fn deactivate(&mut self, sensor: SensorId);
}

/// Sink that records lifecycle changes to the log and nothing else.
pub struct LogSink;

impl SensorSink for LogSink {
    fn activate(&mut self, sensor: SensorId) {
        info!(%sensor, "sensor connected");
    }

    fn deactivate(&mut self, sensor: SensorId) {
        info!(%sensor, "sensor disconnected");
    }
}

/// One sensor slot and its last reading.
#[derive(Debug)]
pub struct SensorSlot {
    id: SensorId,
    state: Activation,
    value: Option<f32>,
}

impl SensorSlot {
    pub fn new(id: SensorId) -> Self {
        SensorSlot {
            id,
            state: Activation::Inactive,
            value: None,
        }
    }

    pub fn id(&self) -> SensorId {
        self.id
    }

    pub fn state(&self) -> Activation {
        self.state
    }

    /// Whether the host currently sees this slot.
    pub fn is_exposed(&self) -> bool {
        self.state != Activation::Inactive
    }

    /// Last reading while exposed.
    pub fn value(&self) -> Option<f32> {
        self.value
    }

    /// Apply one cycle's observation with immediate teardown.
    /// Temperature inputs use this: absence removes the sensor at once.
    pub fn observe_immediate(&mut self, value: Option<f32>, sink: &mut dyn SensorSink) {
        match value {
            Some(v) => {
                self.value = Some(v);
                if self.state == Activation::Inactive {
                    self.state = Activation::Active;
                    sink.activate(self.id);
                }
            }
            None => {
                if self.state != Activation::Inactive {
                    self.state = Activation::Inactive;
                    self.value = None;
                    sink.deactivate(self.id);
                }
            }
        }
    }

    /// Apply one cycle's observation with two-phase teardown.
    /// Fan and pump slots use this: removal needs two consecutive absent
    /// cycles, and a reappearance in between cancels it.
    pub fn observe_debounced(&mut self, value: Option<f32>, sink: &mut dyn SensorSink) {
        match (self.state, value) {
            (Activation::Inactive, Some(v)) => {
                self.value = Some(v);
                self.state = Activation::Active;
                sink.activate(self.id);
            }
            (Activation::Active, Some(v)) => self.value = Some(v),
            (Activation::PendingDeactivate, Some(v)) => {
                self.value = Some(v);
                self.state = Activation::Active;
            }
            // The last value stays visible for this one cycle.
            (Activation::Active, None) => self.state = Activation::PendingDeactivate,
            (Activation::PendingDeactivate, None) => {
                self.state = Activation::Inactive;
                self.value = None;
                sink.deactivate(self.id);
            }
            (Activation::Inactive, None) => {}
        }
    }

    /// Tear the slot down unconditionally, notifying the sink if exposed.
    pub fn force_deactivate(&mut self, sink: &mut dyn SensorSink) {
        if self.state != Activation::Inactive {
            self.state = Activation::Inactive;
            self.value = None;
            sink.deactivate(self.id);
        }
    }
}

#[cfg(test)]
pub(crate) struct RecordingSink {
    pub activated: Vec<SensorId>,
    pub deactivated: Vec<SensorId>,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn new() -> Self {
        RecordingSink {
            activated: Vec::new(),
            deactivated: Vec::new(),
        }
    }
}

#[cfg(test)]
impl SensorSink for RecordingSink {
    fn activate(&mut self, sensor: SensorId) {
        self.activated.push(sensor);
    }

    fn deactivate(&mut self, sensor: SensorId) {
        self.deactivated.push(sensor);
    }
}
