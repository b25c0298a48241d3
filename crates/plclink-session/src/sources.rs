//! Auxiliary sources that take over outgoing slots while active.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use plclink_frame::{to_unsigned_int16, DEBUG_ECHO_SLOT, DEBUG_SOURCE_SLOT, MOCAP_SLOTS};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::builder::AuxSource;
use crate::lock;

/// Echoes one incoming value back to the device.
///
/// While enabled, the last value seen in incoming slot 9 is sent in
/// outgoing slot 6, letting a test device measure the round trip. Nothing
/// is echoed until a value has been received.
#[derive(Debug)]
pub struct DebugEcho {
    slot: usize,
    source_slot: usize,
    enabled: AtomicBool,
    last: Mutex<Option<u16>>,
}

impl Default for DebugEcho {
    fn default() -> Self {
        Self::new(DEBUG_ECHO_SLOT, DEBUG_SOURCE_SLOT)
    }
}

impl DebugEcho {
    /// Echo incoming `source_slot` into outgoing `slot`. Starts disabled.
    pub fn new(slot: usize, source_slot: usize) -> Self {
        Self {
            slot,
            source_slot,
            enabled: AtomicBool::new(false),
            last: Mutex::new(None),
        }
    }

    /// Enable or disable echoing. Disabling forgets the last value.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            *lock(&self.last) = None;
        }
        debug!(enabled, "debug echo toggled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Record the integer slots of an incoming frame. Ignored while disabled.
    pub fn record(&self, ints: &[u16]) {
        if !self.is_enabled() {
            return;
        }
        if let Some(value) = ints.get(self.source_slot) {
            *lock(&self.last) = Some(*value);
        }
    }

    /// Last recorded value.
    pub fn last_received(&self) -> Option<u16> {
        *lock(&self.last)
    }
}

impl AuxSource for DebugEcho {
    fn name(&self) -> &'static str {
        "debug-echo"
    }

    fn is_active(&self) -> bool {
        self.is_enabled() && self.last_received().is_some()
    }

    fn slot_range(&self) -> Range<usize> {
        self.slot..self.slot + 1
    }

    fn values_for(&self, slots: Range<usize>) -> Vec<u16> {
        let value = self.last_received().unwrap_or(0);
        slots.map(|_| value).collect()
    }
}

/// One rigid-body position sample from a motion-capture system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MocapSample {
    /// Position in millimetres, X/Y/Z.
    pub position: [f64; 3],
    /// False when the tracker lost the body; such samples are skipped.
    pub tracking_valid: bool,
    pub timestamp: Instant,
}

/// Processed motion-capture values for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MocapReading {
    /// Offset position, rounded, in millimetres.
    pub position: [i64; 3],
    /// Velocity, rounded, in millimetres per second.
    pub velocity: [i64; 3],
    /// Wire values for the six motion-capture slots.
    pub wire: [u16; 6],
}

/// User-configured offsets added to every position, in millimetres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MocapOffsets {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

#[derive(Debug, Default)]
struct MocapState {
    enabled: bool,
    offsets: MocapOffsets,
    last_position: [f64; 3],
    last_timestamp: Option<Instant>,
    wire: [u16; 6],
}

/// Turns motion-capture samples into position and velocity slot values.
///
/// Slots 10-12 carry the offset position and slots 13-15 the velocity
/// derived from consecutive samples. Both are signed quantities carried as
/// two's-complement u16.
#[derive(Debug)]
pub struct MotionCapture {
    slots: Range<usize>,
    state: Mutex<MocapState>,
}

impl Default for MotionCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionCapture {
    /// Processor for the default slots. Starts disabled.
    pub fn new() -> Self {
        Self {
            slots: MOCAP_SLOTS,
            state: Mutex::new(MocapState::default()),
        }
    }

    /// Enable or disable. Either way velocity history restarts.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = lock(&self.state);
        state.enabled = enabled;
        state.last_timestamp = None;
        state.wire = [0; 6];
        debug!(enabled, "motion capture toggled");
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.state).enabled
    }

    pub fn set_offsets(&self, offsets: MocapOffsets) {
        lock(&self.state).offsets = offsets;
    }

    pub fn offsets(&self) -> MocapOffsets {
        lock(&self.state).offsets
    }

    /// Process a sample. Returns `None` while disabled or when tracking is invalid.
    pub fn update(&self, sample: MocapSample) -> Option<MocapReading> {
        let mut state = lock(&self.state);
        if !state.enabled || !sample.tracking_valid {
            return None;
        }

        let dt = state
            .last_timestamp
            .map(|last| sample.timestamp.saturating_duration_since(last).as_secs_f64())
            .unwrap_or(0.0);
        let mut velocity = [0.0f64; 3];
        if dt > 0.0 {
            for axis in 0..3 {
                velocity[axis] = (sample.position[axis] - state.last_position[axis]) / dt;
            }
        }
        state.last_position = sample.position;
        state.last_timestamp = Some(sample.timestamp);

        let offsets = [state.offsets.x, state.offsets.y, state.offsets.z];
        let position: [i64; 3] =
            std::array::from_fn(|axis| round_half_up(sample.position[axis] + offsets[axis]));
        let velocity: [i64; 3] = std::array::from_fn(|axis| round_half_up(velocity[axis]));

        let mut wire = [0u16; 6];
        for axis in 0..3 {
            wire[axis] = to_unsigned_int16(position[axis]);
            wire[axis + 3] = to_unsigned_int16(velocity[axis]);
        }
        state.wire = wire;
        trace!(?position, ?velocity, "motion capture sample processed");

        Some(MocapReading {
            position,
            velocity,
            wire,
        })
    }

    /// Current wire values for the six slots.
    pub fn wire_values(&self) -> [u16; 6] {
        lock(&self.state).wire
    }
}

impl AuxSource for MotionCapture {
    fn name(&self) -> &'static str {
        "motion-capture"
    }

    fn is_active(&self) -> bool {
        self.is_enabled()
    }

    fn slot_range(&self) -> Range<usize> {
        self.slots.clone()
    }

    fn values_for(&self, slots: Range<usize>) -> Vec<u16> {
        let wire = self.wire_values();
        slots
            .map(|slot| {
                slot.checked_sub(self.slots.start)
                    .and_then(|index| wire.get(index).copied())
                    .unwrap_or(0)
            })
            .collect()
    }
}

/// Round to nearest, halves towards positive infinity. NaN becomes 0.
fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}
