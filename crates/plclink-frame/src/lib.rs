//! Fixed-size binary frames exchanged with a PLC-style device.
//!
//! Two frame shapes travel on the link:
//! - Panel → device: 16 big-endian u16 slots (32 bytes), slot 9 the command
//! - Device → panel: 40 packed status flags, 1 padding byte, then 10
//!   big-endian u16 slots (26 bytes), slot 9 the command acknowledgment
//!
//! Readers reassemble frames from TCP chunking; datagram links deliver one
//! frame per read.

pub mod codec;
pub mod error;
#[cfg(feature = "async")]
pub mod framed;
pub mod reader;
pub mod slot;
pub mod writer;

pub use codec::{
    clamp_u16, decode_incoming, decode_outgoing, encode_incoming, encode_outgoing,
    encode_outgoing_clamped, from_unsigned_int16, to_unsigned_int16, FrameConfig, Framing,
    IncomingFrame, OutgoingValues, FLAG_COUNT, INCOMING_FRAME_LEN, INCOMING_SLOTS,
    OUTGOING_FRAME_LEN, OUTGOING_SLOTS,
};
pub use error::{FrameError, Result};
#[cfg(feature = "async")]
pub use framed::{DeviceCodec, PanelCodec};
pub use reader::FrameReader;
pub use slot::{ACK_SLOT, COMMAND_SLOT, DEBUG_ECHO_SLOT, DEBUG_SOURCE_SLOT, MOCAP_SLOTS};
pub use writer::FrameWriter;
