//! Command acknowledgment state machine.
//!
//! The periodic sender keeps transmitting the pending code on every tick,
//! which is the only retry mechanism. The device echoes a code back in the
//! acknowledgment slot once it has accepted it; an echo is accepted only if
//! it equals the code currently pending, so echoes of superseded commands
//! are ignored without any timer.
//!
//! ```text
//!            issue(c)              ack == c
//!   Idle ─────────────▶ Issued ──────────────▶ Acknowledged ──release()──▶ Idle
//!    ▲                    │  ▲                  (continuous: held)
//!    │                    │  └── issue(c') replaces ──┘
//!    └── momentary: cleared on ack ◀──────────┘
//! ```

use std::time::{Duration, Instant};

use plclink_frame::ACK_SLOT;
use serde::Serialize;
use tracing::{debug, info};

use crate::command::{Command, CommandClass};

/// Observable state of the pending command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckState {
    /// No command pending (code 0 on the wire).
    Idle,
    /// A command is being sent and has not been echoed yet.
    Issued,
    /// A continuous command has been echoed and is held until release.
    Acknowledged,
}

/// The single live command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommand {
    pub code: u16,
    pub class: CommandClass,
    pub issued_at: Instant,
    pub acknowledged: bool,
}

/// Emitted once when a pending command is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgment {
    pub code: u16,
    pub class: CommandClass,
    /// Time from issue to acknowledgment.
    pub latency: Duration,
    /// True if the command was cleared (momentary), false if now held.
    pub cleared: bool,
}

/// Tracks at most one pending command through issue, acknowledgment and release.
#[derive(Debug, Clone)]
pub struct CommandAckStateMachine {
    ack_slot: usize,
    pending: Option<PendingCommand>,
    acknowledged_code: u16,
    overdue_reported: bool,
}

impl Default for CommandAckStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandAckStateMachine {
    /// State machine reading the echo from the default acknowledgment slot.
    pub fn new() -> Self {
        Self::with_ack_slot(ACK_SLOT)
    }

    /// State machine reading the echo from `ack_slot`.
    pub fn with_ack_slot(ack_slot: usize) -> Self {
        Self {
            ack_slot,
            pending: None,
            acknowledged_code: 0,
            overdue_reported: false,
        }
    }

    /// Issue a command code.
    ///
    /// Code 0 and the code already pending are no-ops (use [`release`] to go
    /// back to neutral). Any other code replaces the pending command and
    /// clears the acknowledgment flag. Returns true if the pending command changed.
    ///
    /// [`release`]: Self::release
    pub fn issue(&mut self, code: u16, class: CommandClass) -> bool {
        self.issue_at(code, class, Instant::now())
    }

    /// Issue a named command with its own class.
    pub fn issue_command(&mut self, command: Command) -> bool {
        self.issue(command.code(), command.class())
    }

    pub(crate) fn issue_at(&mut self, code: u16, class: CommandClass, now: Instant) -> bool {
        if code == 0 || self.pending_code() == code {
            return false;
        }

        if let Some(previous) = self.pending {
            debug!(previous = previous.code, code, "pending command superseded");
        }
        self.pending = Some(PendingCommand {
            code,
            class,
            issued_at: now,
            acknowledged: false,
        });
        self.acknowledged_code = 0;
        self.overdue_reported = false;
        debug!(code, ?class, "command issued");
        true
    }

    /// Feed the integer slots of an incoming frame.
    ///
    /// Returns the acknowledgment if this frame completed one. A held
    /// continuous command is acknowledged only once.
    pub fn on_incoming_frame(&mut self, ints: &[u16]) -> Option<Acknowledgment> {
        self.on_incoming_frame_at(ints, Instant::now())
    }

    pub(crate) fn on_incoming_frame_at(
        &mut self,
        ints: &[u16],
        now: Instant,
    ) -> Option<Acknowledgment> {
        let ack = *ints.get(self.ack_slot)?;
        let pending = self.pending.as_mut()?;
        if ack == 0 || ack != pending.code || pending.acknowledged {
            return None;
        }

        let latency = now.saturating_duration_since(pending.issued_at);
        let acknowledgment = Acknowledgment {
            code: pending.code,
            class: pending.class,
            latency,
            cleared: pending.class == CommandClass::Momentary,
        };

        pending.acknowledged = true;
        if acknowledgment.cleared {
            self.pending = None;
        }
        self.acknowledged_code = acknowledgment.code;

        info!(
            code = acknowledgment.code,
            latency_ms = latency.as_millis() as u64,
            cleared = acknowledgment.cleared,
            "command acknowledged"
        );
        Some(acknowledgment)
    }

    /// Return to neutral: pending code 0, acknowledgment flag cleared.
    ///
    /// Returns the code that was pending, if any.
    pub fn release(&mut self) -> Option<u16> {
        let previous = self.pending.take().map(|pending| pending.code);
        self.acknowledged_code = 0;
        self.overdue_reported = false;
        if let Some(code) = previous {
            debug!(code, "command released");
        }
        previous
    }

    /// Code to place in the outgoing command slot (0 if none).
    pub fn pending_code(&self) -> u16 {
        self.pending.map_or(0, |pending| pending.code)
    }

    /// The pending command, if any.
    pub fn pending(&self) -> Option<&PendingCommand> {
        self.pending.as_ref()
    }

    /// Last acknowledged code, cleared by a new issue or a release.
    pub fn acknowledged_code(&self) -> u16 {
        self.acknowledged_code
    }

    pub fn state(&self) -> AckState {
        match self.pending {
            None => AckState::Idle,
            Some(pending) if pending.acknowledged => AckState::Acknowledged,
            Some(_) => AckState::Issued,
        }
    }

    pub fn ack_slot(&self) -> usize {
        self.ack_slot
    }

    /// True if a command has been waiting longer than `timeout` for its echo.
    pub fn is_overdue(&self, now: Instant, timeout: Duration) -> bool {
        match self.pending {
            Some(pending) if !pending.acknowledged => {
                now.saturating_duration_since(pending.issued_at) >= timeout
            }
            _ => false,
        }
    }

    /// Like [`is_overdue`](Self::is_overdue), but reports each command only once.
    ///
    /// The command stays pending; overdue is a flag, not a transition.
    pub fn take_overdue(&mut self, now: Instant, timeout: Duration) -> Option<PendingCommand> {
        if self.overdue_reported || !self.is_overdue(now, timeout) {
            return None;
        }
        self.overdue_reported = true;
        self.pending
    }
}
