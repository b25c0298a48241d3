//! Panel session for fixed-frame PLC links.
//!
//! Owns the periodic command stream to a device, the command
//! acknowledgment state machine and the inbound telemetry path. Start a
//! [`Session`] on a connected link and drive it with commands and
//! parameter updates.

pub mod ack;
pub mod builder;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod sender;
pub mod session;
pub mod sources;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use ack::{AckState, Acknowledgment, CommandAckStateMachine, PendingCommand};
pub use builder::{AuxSource, MemoryParameterStore, OutgoingFrameBuilder, ParameterStore};
pub use command::{
    joystick_command, slider_command, Command, CommandClass, CommandTable, JOYSTICK_DEADZONE,
};
pub use config::SessionConfig;
pub use device::{AckMode, DeviceSimulator, DEFAULT_ACK_DELAY_CYCLES};
pub use error::{Result, SessionError};
pub use sender::{PeriodicSender, DEFAULT_INTERVAL, MAX_INTERVAL, MIN_INTERVAL};
pub use session::{Session, SessionEvent, SessionStats};
pub use sources::{DebugEcho, MocapOffsets, MocapReading, MocapSample, MotionCapture};

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
