//! Device-side simulator.
//!
//! Answers every outgoing frame with an incoming frame, the way the bench
//! test servers do, so a panel can be exercised without hardware.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use plclink_frame::{
    decode_outgoing, FrameConfig, FrameError, FrameReader, FrameWriter, IncomingFrame,
    OutgoingValues, ACK_SLOT, COMMAND_SLOT, FLAG_COUNT, INCOMING_SLOTS, OUTGOING_FRAME_LEN,
    OUTGOING_SLOTS,
};
use plclink_transport::LinkStream;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::Result;

/// Consecutive frames a command must be seen before it is acknowledged.
pub const DEFAULT_ACK_DELAY_CYCLES: u32 = 10;

/// What the simulator puts in the acknowledgment slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Echo the command code after it has been held for the ack delay.
    #[default]
    Echo,
    /// A counter cycling 1..=65535, for round-trip measurements.
    DebugCounter,
}

/// Frame-by-frame device behaviour.
#[derive(Debug, Clone)]
pub struct DeviceSimulator {
    mode: AckMode,
    ack_delay_cycles: u32,
    command_slot: usize,
    ack_slot: usize,
    last_command: u16,
    repeats: u32,
    counter: u16,
}

impl Default for DeviceSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceSimulator {
    pub fn new() -> Self {
        Self {
            mode: AckMode::Echo,
            ack_delay_cycles: DEFAULT_ACK_DELAY_CYCLES,
            command_slot: COMMAND_SLOT,
            ack_slot: ACK_SLOT,
            last_command: 0,
            repeats: 0,
            counter: 1,
        }
    }

    pub fn with_mode(mut self, mode: AckMode) -> Self {
        self.mode = mode;
        self
    }

    /// Frames a command must be repeated before it is echoed. 0 and 1 both
    /// acknowledge on the first frame.
    pub fn with_ack_delay(mut self, cycles: u32) -> Self {
        self.ack_delay_cycles = cycles;
        self
    }

    pub fn mode(&self) -> AckMode {
        self.mode
    }

    pub fn ack_delay(&self) -> u32 {
        self.ack_delay_cycles
    }

    /// Produce the reply to one outgoing frame.
    pub fn respond(&mut self, out: &OutgoingValues) -> IncomingFrame {
        let flags: [bool; FLAG_COUNT] =
            std::array::from_fn(|i| i % 2 == 0 || out[i % OUTGOING_SLOTS] > 100);
        let mut ints: [u16; INCOMING_SLOTS] =
            std::array::from_fn(|i| out[i].wrapping_add(out[OUTGOING_SLOTS - 1 - i]));

        ints[self.ack_slot] = match self.mode {
            AckMode::Echo => self.echo_ack(out[self.command_slot]),
            AckMode::DebugCounter => self.next_counter(),
        };

        IncomingFrame::new(flags, ints)
    }

    fn echo_ack(&mut self, command: u16) -> u16 {
        if command == 0 {
            self.last_command = 0;
            self.repeats = 0;
            return 0;
        }
        if command == self.last_command {
            self.repeats = self.repeats.saturating_add(1);
        } else {
            self.last_command = command;
            self.repeats = 1;
        }
        if self.repeats >= self.ack_delay_cycles {
            command
        } else {
            0
        }
    }

    fn next_counter(&mut self) -> u16 {
        let value = self.counter;
        self.counter = if self.counter == u16::MAX {
            1
        } else {
            self.counter + 1
        };
        value
    }

    /// Answer frames on `link` until the peer leaves, `stop` is set, or
    /// `limit` frames have been answered. Returns the number answered.
    ///
    /// Short frames are logged and skipped.
    pub fn serve(
        &mut self,
        link: LinkStream,
        stop: &AtomicBool,
        limit: Option<u64>,
    ) -> Result<u64> {
        let datagram = link.is_datagram();
        let writer_link = link.try_clone()?;

        let mut read_config = FrameConfig::for_link(datagram, OUTGOING_FRAME_LEN);
        read_config.read_timeout = Some(Duration::from_millis(100));
        let mut reader = FrameReader::with_config_link(link, read_config)?;
        let mut writer = FrameWriter::with_config_link(writer_link, FrameConfig::default())?;

        let mut served = 0u64;
        while !stop.load(Ordering::SeqCst) {
            if limit.is_some_and(|limit| served >= limit) {
                break;
            }
            let raw = match reader.read_frame() {
                Ok(raw) => raw,
                Err(err) if err.is_timeout() => continue,
                Err(err) if is_hangup(&err) => {
                    info!(served, "panel disconnected");
                    break;
                }
                Err(err) => return Err(err.into()),
            };

            let out = match decode_outgoing(&raw) {
                Ok(out) => out,
                Err(err) => {
                    warn!(len = raw.len(), error = %err, "short frame from panel skipped");
                    continue;
                }
            };
            let reply = self.respond(&out);
            trace!(command = out[self.command_slot], ack = reply.ints[self.ack_slot], "frame answered");
            match writer.send_incoming(&reply) {
                Ok(()) => served += 1,
                Err(err) if is_hangup(&err) => {
                    info!(served, "panel disconnected");
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        debug!(served, "simulator loop finished");
        Ok(served)
    }
}

fn is_hangup(err: &FrameError) -> bool {
    match err {
        FrameError::ConnectionClosed => true,
        FrameError::Io(io) => matches!(
            io.kind(),
            ErrorKind::BrokenPipe
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
        ),
        FrameError::InsufficientLength { .. } => false,
    }
}
