//! Operator panel link for PLCs speaking a fixed binary frame format.
//!
//! A panel streams 16-value command frames to the device at a fixed rate
//! and reads back 40 status flags and 10 integers per reply. Commands are
//! tracked until the device echoes them.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP and UDP links behind one stream type
//! - [`frame`]: wire codecs, reframing readers and slot layout
//! - [`session`]: periodic sender, acknowledgment tracking and the device
//!   simulator (behind `session` feature)

/// Re-export transport types.
pub mod transport {
    pub use plclink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use plclink_frame::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use plclink_session::*;
}
