use std::time::Duration;

use plclink_frame::{ACK_SLOT, COMMAND_SLOT, DEBUG_ECHO_SLOT, INCOMING_FRAME_LEN, OUTGOING_SLOTS};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::sender::validate_interval;

/// Runtime configuration of a panel session.
///
/// Every field has a default, so a partial JSON document is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Auto-send tick interval in milliseconds (1..=10000). Default: 20.
    pub interval_ms: u64,
    /// Outgoing slot carrying the command code. Default: 9.
    pub command_slot: usize,
    /// Incoming slot echoing the acknowledged command. Default: 9.
    pub ack_slot: usize,
    /// Outgoing slot used by debug echo. Default: 6.
    pub debug_echo_slot: usize,
    /// Wire length of incoming frames when reframing a TCP stream. Default: 26.
    ///
    /// TCP frames are cut at exactly this length. A device that sends longer
    /// frames over TCP must have its length set here, or every frame after
    /// the first is misaligned. Bytes past the first 26 are then ignored when
    /// decoding. UDP ignores this setting, since each datagram is one frame.
    pub incoming_frame_len: usize,
    /// Poll interval of the inbound reader, bounding how fast it notices a stop. Default: 100.
    pub read_timeout_ms: u64,
    /// Write timeout for a single frame. Default: 1000.
    pub write_timeout_ms: u64,
    /// Log a warning when a command stays unacknowledged this long. Default: off.
    pub ack_warn_after_ms: Option<u64>,
    /// Start auto-send as soon as the session starts. Default: true.
    pub auto_send: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 20,
            command_slot: COMMAND_SLOT,
            ack_slot: ACK_SLOT,
            debug_echo_slot: DEBUG_ECHO_SLOT,
            incoming_frame_len: INCOMING_FRAME_LEN,
            read_timeout_ms: 100,
            write_timeout_ms: 1000,
            ack_warn_after_ms: None,
            auto_send: true,
        }
    }
}

impl SessionConfig {
    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        validate_interval(self.interval())?;
        if self.command_slot >= OUTGOING_SLOTS {
            return Err(SessionError::InvalidSlot {
                slot: self.command_slot,
                len: OUTGOING_SLOTS,
            });
        }
        if self.debug_echo_slot >= OUTGOING_SLOTS {
            return Err(SessionError::InvalidSlot {
                slot: self.debug_echo_slot,
                len: OUTGOING_SLOTS,
            });
        }
        if self.ack_slot >= plclink_frame::INCOMING_SLOTS {
            return Err(SessionError::InvalidSlot {
                slot: self.ack_slot,
                len: plclink_frame::INCOMING_SLOTS,
            });
        }
        if self.incoming_frame_len < INCOMING_FRAME_LEN {
            return Err(SessionError::Frame(plclink_frame::FrameError::InsufficientLength {
                expected: INCOMING_FRAME_LEN,
                actual: self.incoming_frame_len,
            }));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }

    pub fn ack_warn_after(&self) -> Option<Duration> {
        self.ack_warn_after_ms.map(Duration::from_millis)
    }
}
