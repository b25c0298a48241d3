//! Well-known slot indices and display labels.
//!
//! Outgoing slots 0-15 are u16 values sent to the device; incoming slots
//! 0-9 and flags 0-39 are reported back.

use std::ops::Range;

/// Outgoing slot carrying the current command code (0 = none).
pub const COMMAND_SLOT: usize = 9;

/// Incoming slot echoing the command code the device has accepted.
pub const ACK_SLOT: usize = 9;

/// Outgoing slot that echoes the debug value in debug mode. Also the
/// tension target in normal operation.
pub const DEBUG_ECHO_SLOT: usize = 6;

/// Incoming slot whose value is echoed back in debug mode.
pub const DEBUG_SOURCE_SLOT: usize = 9;

/// Outgoing slots filled by motion capture: position X/Y/Z then velocity X/Y/Z.
pub const MOCAP_SLOTS: Range<usize> = 10..16;

/// Outgoing slot carrying the tension target (newtons × 100).
pub const TENSION_TARGET_SLOT: usize = 6;

/// Incoming slot carrying the tension reading (newtons × 100).
pub const TENSION_READING_SLOT: usize = 8;

/// Fixed-point scale of tension values on the wire.
pub const TENSION_SCALE: f64 = 100.0;

const FLAG_LABELS: [&str; 21] = [
    "X Pos Complete",
    "Y Pos Complete",
    "Z Pos Complete",
    "X Calibrated",
    "Y Calibrated",
    "Z Status",
    "X Servo Active",
    "Y Servo Active",
    "Z Servo Active",
    "X+ Hard Limit",
    "X- Hard Limit",
    "Y+ Hard Limit",
    "Y- Hard Limit",
    "X+ Soft Limit",
    "X- Soft Limit",
    "Y Soft Status",
    "Z Soft Status",
    "Force Exp Active",
    "Precision Align",
    "Abs Pos Move",
    "Emergency Stop",
];

const INT_LABELS: [&str; 6] = [
    "Current X Pos",
    "Current Y Pos",
    "Current Z Pos",
    "Current Speed",
    "Force Value",
    "Tension Value",
];

/// Returns a human-readable label for an incoming status flag.
pub fn flag_label(index: usize) -> String {
    match FLAG_LABELS.get(index) {
        Some(label) => (*label).to_string(),
        None => format!("Status {index}"),
    }
}

/// Returns a human-readable label for an incoming integer slot.
pub fn int_label(index: usize) -> String {
    match INT_LABELS.get(index) {
        Some(label) => (*label).to_string(),
        None => format!("Status Int {index}"),
    }
}

/// Returns a human-readable name for an outgoing slot.
pub fn outgoing_slot_name(index: usize) -> &'static str {
    match index {
        COMMAND_SLOT => "COMMAND",
        TENSION_TARGET_SLOT => "TENSION_TARGET",
        10 => "MOCAP_POS_X",
        11 => "MOCAP_POS_Y",
        12 => "MOCAP_POS_Z",
        13 => "MOCAP_VEL_X",
        14 => "MOCAP_VEL_Y",
        15 => "MOCAP_VEL_Z",
        0..=8 => "PARAMETER",
        _ => "UNKNOWN",
    }
}

/// Convert a tension target in newtons to its wire value.
pub fn tension_to_wire(newtons: f64) -> u16 {
    crate::codec::clamp_u16((newtons * TENSION_SCALE).round() as i64)
}

/// Tension reading in newtons from an incoming frame's integer slots.
pub fn tension_reading(ints: &[u16]) -> Option<f64> {
    ints.get(TENSION_READING_SLOT)
        .map(|raw| f64::from(*raw) / TENSION_SCALE)
}
