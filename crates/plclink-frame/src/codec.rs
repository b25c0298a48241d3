use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Number of u16 slots in a panel → device frame.
pub const OUTGOING_SLOTS: usize = 16;

/// Wire size of a panel → device frame: 16 × u16 big-endian.
pub const OUTGOING_FRAME_LEN: usize = OUTGOING_SLOTS * 2;

/// Number of packed status flags in a device → panel frame.
pub const FLAG_COUNT: usize = 40;

/// Bytes carrying the packed flags.
pub const FLAG_BYTES: usize = FLAG_COUNT / 8;

/// Byte offset of the first integer slot (flags + 1 padding byte).
pub const INT_OFFSET: usize = FLAG_BYTES + 1;

/// Number of u16 slots in a device → panel frame.
pub const INCOMING_SLOTS: usize = 10;

/// Minimum wire size of a device → panel frame. Longer frames are accepted
/// and the extra bytes ignored.
pub const INCOMING_FRAME_LEN: usize = INT_OFFSET + INCOMING_SLOTS * 2;

/// The 16 values of a panel → device frame.
pub type OutgoingValues = [u16; OUTGOING_SLOTS];

/// A decoded device → panel frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncomingFrame {
    /// Status flags, index `i*8 + b` is bit `b` of byte `i`.
    pub flags: [bool; FLAG_COUNT],
    /// Integer status slots.
    pub ints: [u16; INCOMING_SLOTS],
}

impl Default for IncomingFrame {
    fn default() -> Self {
        Self {
            flags: [false; FLAG_COUNT],
            ints: [0; INCOMING_SLOTS],
        }
    }
}

impl IncomingFrame {
    /// Create a frame from flags and integer slots.
    pub fn new(flags: [bool; FLAG_COUNT], ints: [u16; INCOMING_SLOTS]) -> Self {
        Self { flags, ints }
    }

    /// Number of flags currently set.
    pub fn active_flags(&self) -> usize {
        self.flags.iter().filter(|flag| **flag).count()
    }
}

/// Clamp any integer into the u16 wire range. Never wraps.
pub fn clamp_u16(value: i64) -> u16 {
    value.clamp(0, u16::MAX as i64) as u16
}

/// Carry a signed quantity in an unsigned slot.
///
/// The input is clamped to the i16 range and then reinterpreted as two's
/// complement: `-1` becomes `65535`, `-32768` becomes `32768`.
pub fn to_unsigned_int16(signed: i64) -> u16 {
    let clamped = signed.clamp(i16::MIN as i64, i16::MAX as i64);
    if clamped < 0 {
        (65536 + clamped) as u16
    } else {
        clamped as u16
    }
}

/// Inverse of [`to_unsigned_int16`]: values ≥ 32768 are negative.
pub fn from_unsigned_int16(value: u16) -> i16 {
    if value >= 32768 {
        (value as i32 - 65536) as i16
    } else {
        value as i16
    }
}

/// Encode a panel → device frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────┬─────┬───────────┐
/// │ slot 0   │ slot 1   │ ... │ slot 15   │
/// │ (2B BE)  │ (2B BE)  │     │ (2B BE)   │
/// └──────────┴──────────┴─────┴───────────┘
/// ```
pub fn encode_outgoing(values: &OutgoingValues) -> [u8; OUTGOING_FRAME_LEN] {
    let mut out = [0u8; OUTGOING_FRAME_LEN];
    for (slot, value) in values.iter().enumerate() {
        out[slot * 2..slot * 2 + 2].copy_from_slice(&value.to_be_bytes());
    }
    out
}

/// Encode values from a caller that has not clamped them.
///
/// Out-of-range values are clamped into `[0, 65535]`, never wrapped.
pub fn encode_outgoing_clamped(values: &[i64; OUTGOING_SLOTS]) -> [u8; OUTGOING_FRAME_LEN] {
    let mut clamped = [0u16; OUTGOING_SLOTS];
    for (dst, value) in clamped.iter_mut().zip(values) {
        *dst = clamp_u16(*value);
    }
    encode_outgoing(&clamped)
}

/// Append an encoded panel → device frame to `dst`.
pub fn put_outgoing(values: &OutgoingValues, dst: &mut BytesMut) {
    dst.reserve(OUTGOING_FRAME_LEN);
    for value in values {
        dst.put_u16(*value);
    }
}

/// Decode a panel → device frame. Used on the device side.
pub fn decode_outgoing(bytes: &[u8]) -> Result<OutgoingValues> {
    if bytes.len() < OUTGOING_FRAME_LEN {
        return Err(FrameError::InsufficientLength {
            expected: OUTGOING_FRAME_LEN,
            actual: bytes.len(),
        });
    }

    let mut src = &bytes[..OUTGOING_FRAME_LEN];
    let mut values = [0u16; OUTGOING_SLOTS];
    for value in values.iter_mut() {
        *value = src.get_u16();
    }
    Ok(values)
}

/// Encode a device → panel frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────────────┬─────────┬──────────────────┐
/// │ Flags (5B)    │ Pad (1B)│ 10 × u16 (20B BE) │
/// │ LSB-first     │ 0x00    │                   │
/// └───────────────┴─────────┴──────────────────┘
/// ```
pub fn encode_incoming(frame: &IncomingFrame) -> [u8; INCOMING_FRAME_LEN] {
    let mut out = [0u8; INCOMING_FRAME_LEN];
    for (index, flag) in frame.flags.iter().enumerate() {
        if *flag {
            out[index / 8] |= 1 << (index % 8);
        }
    }
    for (slot, value) in frame.ints.iter().enumerate() {
        let offset = INT_OFFSET + slot * 2;
        out[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }
    out
}

/// Append an encoded device → panel frame to `dst`.
pub fn put_incoming(frame: &IncomingFrame, dst: &mut BytesMut) {
    dst.put_slice(&encode_incoming(frame));
}

/// Decode a device → panel frame.
///
/// Fails with `InsufficientLength` below 26 bytes. Byte 5 is padding and
/// bytes past 26 are ignored.
pub fn decode_incoming(bytes: &[u8]) -> Result<IncomingFrame> {
    if bytes.len() < INCOMING_FRAME_LEN {
        return Err(FrameError::InsufficientLength {
            expected: INCOMING_FRAME_LEN,
            actual: bytes.len(),
        });
    }

    let mut frame = IncomingFrame::default();
    for (byte_index, byte) in bytes[..FLAG_BYTES].iter().enumerate() {
        for bit in 0..8 {
            frame.flags[byte_index * 8 + bit] = byte & (1 << bit) != 0;
        }
    }

    let mut src = &bytes[INT_OFFSET..INCOMING_FRAME_LEN];
    for value in frame.ints.iter_mut() {
        *value = src.get_u16();
    }
    Ok(frame)
}

/// Split one fixed-length frame off the front of a stream buffer.
///
/// Returns `None` if the buffer doesn't hold `frame_len` bytes yet.
/// On success, consumes the frame bytes from the buffer.
pub fn split_frame(src: &mut BytesMut, frame_len: usize) -> Option<Bytes> {
    if frame_len == 0 || src.len() < frame_len {
        return None; // Need more data
    }
    Some(src.split_to(frame_len).freeze())
}

/// How frames are delimited on the underlying link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Byte stream (TCP): frames are cut at a fixed length, whatever the
    /// chunking of individual reads.
    Stream { frame_len: usize },
    /// Message-oriented link (UDP): each read is one frame.
    Datagram,
}

/// Configuration for frame readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Frame delimiting. Default: stream framing of incoming (26-byte) frames.
    pub framing: Framing,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            framing: Framing::Stream {
                frame_len: INCOMING_FRAME_LEN,
            },
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl FrameConfig {
    /// Configuration for reading frames of `frame_len` bytes from a link,
    /// picking datagram framing when the link is message-oriented.
    pub fn for_link(datagram: bool, frame_len: usize) -> Self {
        let framing = if datagram {
            Framing::Datagram
        } else {
            Framing::Stream { frame_len }
        };
        Self {
            framing,
            ..Self::default()
        }
    }
}
