use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use plclink_frame::{
    decode_incoming, FrameConfig, FrameError, FrameReader, FrameWriter, IncomingFrame,
    OutgoingValues,
};
use plclink_transport::LinkStream;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ack::{AckState, Acknowledgment, CommandAckStateMachine};
use crate::builder::{AuxSource, OutgoingFrameBuilder};
use crate::command::{Command, CommandClass, CommandTable};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::lock;
use crate::sender::PeriodicSender;
use crate::sources::DebugEcho;

/// Something the session observed, delivered on the event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A decoded device frame.
    Telemetry(IncomingFrame),
    /// The pending command was acknowledged.
    CommandAcknowledged(Acknowledgment),
    /// A command has waited longer than the configured warning threshold.
    CommandOverdue { code: u16, waited: Duration },
    /// A device frame was too short to decode and was dropped.
    FrameDropped { len: usize },
    /// The link is gone. Auto-send has stopped and the command was released.
    Disconnected { reason: String },
}

/// Counters since the session started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub send_failures: u64,
    pub acknowledgments: u64,
}

#[derive(Default)]
struct Counters {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    send_failures: AtomicU64,
    acknowledgments: AtomicU64,
}

struct Shared {
    state: Mutex<CommandAckStateMachine>,
    builder: Mutex<OutgoingFrameBuilder>,
    writer: Mutex<FrameWriter<LinkStream>>,
    /// Handle used only to shut the link down, outside the writer lock.
    control: LinkStream,
    sender: Mutex<Option<PeriodicSender>>,
    last_telemetry: Mutex<Option<IncomingFrame>>,
    commands: CommandTable,
    debug_echo: Arc<DebugEcho>,
    connected: AtomicBool,
    counters: Counters,
    events: Sender<SessionEvent>,
    ack_warn_after: Option<Duration>,
    datagram: bool,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn tick(&self) -> Result<OutgoingValues> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SessionError::Disconnected("link closed".to_string()));
        }

        let code = {
            let mut state = lock(&self.state);
            if let Some(limit) = self.ack_warn_after {
                if let Some(pending) = state.take_overdue(Instant::now(), limit) {
                    let waited = pending.issued_at.elapsed();
                    warn!(
                        code = pending.code,
                        waited_ms = waited.as_millis() as u64,
                        "command not acknowledged"
                    );
                    self.emit(SessionEvent::CommandOverdue {
                        code: pending.code,
                        waited,
                    });
                }
            }
            state.pending_code()
        };

        let values = lock(&self.builder).build_frame(code);
        match lock(&self.writer).send_outgoing(&values) {
            Ok(()) => {
                self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                Ok(values)
            }
            Err(err) => {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                Err(err.into())
            }
        }
    }

    fn handle_frame(&self, raw: &[u8]) {
        let frame = match decode_incoming(raw) {
            Ok(frame) => frame,
            Err(err) => {
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(len = raw.len(), error = %err, "incoming frame dropped");
                self.emit(SessionEvent::FrameDropped { len: raw.len() });
                return;
            }
        };

        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
        self.debug_echo.record(&frame.ints);
        *lock(&self.last_telemetry) = Some(frame);

        let acknowledgment = lock(&self.state).on_incoming_frame(&frame.ints);
        self.emit(SessionEvent::Telemetry(frame));
        if let Some(ack) = acknowledgment {
            self.counters.acknowledgments.fetch_add(1, Ordering::Relaxed);
            self.emit(SessionEvent::CommandAcknowledged(ack));
        }
    }

    /// Runs once per session, from whichever side notices first.
    fn mark_disconnected(&self, reason: &str) {
        if self
            .connected
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        // Wakes a tick blocked in a write so the sender thread can be joined.
        if let Err(err) = self.control.shutdown() {
            debug!(error = %err, "link shutdown failed");
        }
        let sender = lock(&self.sender).take();
        if let Some(mut sender) = sender {
            sender.stop();
        }
        let released = lock(&self.state).release();
        info!(reason, ?released, "device link disconnected");
        self.emit(SessionEvent::Disconnected {
            reason: reason.to_string(),
        });
    }
}

/// A live panel session over one device link.
///
/// Two threads run per session: the periodic sender (outbound) and the
/// inbound reader. Both share one command state machine, so issuing a
/// command and reading it for the next tick never interleave.
pub struct Session {
    shared: Arc<Shared>,
    interval: Mutex<Duration>,
    reader: Option<JoinHandle<()>>,
    peer: Option<std::net::SocketAddr>,
}

impl Session {
    /// Start a session on a connected link.
    ///
    /// Returns the session and the receiving end of its event channel.
    /// Auto-send starts immediately when `config.auto_send` is set.
    pub fn start(
        link: LinkStream,
        config: SessionConfig,
        builder: OutgoingFrameBuilder,
    ) -> Result<(Self, Receiver<SessionEvent>)> {
        Self::start_with_commands(link, config, builder, CommandTable::default())
    }

    /// Start a session with an explicit command class table.
    pub fn start_with_commands(
        link: LinkStream,
        config: SessionConfig,
        builder: OutgoingFrameBuilder,
        commands: CommandTable,
    ) -> Result<(Self, Receiver<SessionEvent>)> {
        config.validate()?;

        let datagram = link.is_datagram();
        let peer = link.peer_addr();
        let reader_link = link.try_clone()?;
        let control = link.try_clone()?;

        let mut read_config = FrameConfig::for_link(datagram, config.incoming_frame_len);
        read_config.read_timeout = Some(config.read_timeout());
        let reader = FrameReader::with_config_link(reader_link, read_config)?;

        let write_config = FrameConfig {
            write_timeout: Some(config.write_timeout()),
            ..FrameConfig::default()
        };
        let writer = FrameWriter::with_config_link(link, write_config)?;

        let debug_echo = Arc::new(DebugEcho::new(config.debug_echo_slot, config.ack_slot));
        let mut builder = builder.with_command_slot(config.command_slot);
        builder.add_source(debug_echo.clone());

        let (events_tx, events_rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(CommandAckStateMachine::with_ack_slot(config.ack_slot)),
            builder: Mutex::new(builder),
            writer: Mutex::new(writer),
            control,
            sender: Mutex::new(None),
            last_telemetry: Mutex::new(None),
            commands,
            debug_echo,
            connected: AtomicBool::new(true),
            counters: Counters::default(),
            events: events_tx,
            ack_warn_after: config.ack_warn_after(),
            datagram,
        });

        let reader_shared = Arc::clone(&shared);
        let reader = std::thread::Builder::new()
            .name("plclink-inbound".to_string())
            .spawn(move || inbound_loop(reader_shared, reader))
            .map_err(SessionError::Spawn)?;

        info!(
            ?peer,
            transport = if datagram { "udp" } else { "tcp" },
            interval_ms = config.interval_ms,
            "session started"
        );

        let session = Self {
            shared,
            interval: Mutex::new(config.interval()),
            reader: Some(reader),
            peer,
        };
        if config.auto_send {
            session.start_auto_send()?;
        }
        Ok((session, events_rx))
    }

    /// Issue a named command.
    pub fn issue_command(&self, command: Command) -> bool {
        lock(&self.shared.state).issue_command(command)
    }

    /// Issue a raw code, classed through the session's command table.
    pub fn issue_code(&self, code: u16) -> bool {
        let class = self.shared.commands.class_of(code);
        lock(&self.shared.state).issue(code, class)
    }

    /// Issue a raw code with an explicit class.
    pub fn issue(&self, code: u16, class: CommandClass) -> bool {
        lock(&self.shared.state).issue(code, class)
    }

    /// Return the pending command to neutral.
    pub fn release(&self) -> Option<u16> {
        lock(&self.shared.state).release()
    }

    pub fn pending_code(&self) -> u16 {
        lock(&self.shared.state).pending_code()
    }

    pub fn ack_state(&self) -> AckState {
        lock(&self.shared.state).state()
    }

    pub fn acknowledged_code(&self) -> u16 {
        lock(&self.shared.state).acknowledged_code()
    }

    /// Set a manual parameter slot.
    pub fn set_parameter(&self, slot: usize, value: i64) -> Result<()> {
        lock(&self.shared.builder).set_parameter(slot, value)
    }

    /// Current raw value of a manual parameter slot.
    pub fn parameter(&self, slot: usize) -> Result<i64> {
        lock(&self.shared.builder).parameter(slot)
    }

    /// Register an auxiliary source after start.
    pub fn add_source(&self, source: Arc<dyn AuxSource>) {
        lock(&self.shared.builder).add_source(source);
    }

    /// The debug echo source attached to this session.
    pub fn debug_echo(&self) -> &Arc<DebugEcho> {
        &self.shared.debug_echo
    }

    /// Build and send one frame now, outside the periodic schedule.
    pub fn send_now(&self) -> Result<OutgoingValues> {
        self.shared.tick()
    }

    /// Start periodic sending. A no-op if already running.
    pub fn start_auto_send(&self) -> Result<()> {
        // Checked under the sender lock: disconnection clears `connected`
        // before it takes this lock, so no sender outlives the link.
        let mut slot = lock(&self.shared.sender);
        if !self.is_connected() {
            return Err(SessionError::Disconnected("link closed".to_string()));
        }
        if slot.is_some() {
            return Ok(());
        }

        let interval = *lock(&self.interval);
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let sender = PeriodicSender::start(interval, move || match weak.upgrade() {
            Some(shared) => shared.tick().map(|_| ()),
            None => Err(SessionError::Disconnected("session dropped".to_string())),
        })?;
        *slot = Some(sender);
        Ok(())
    }

    /// Stop periodic sending. Immediate and idempotent.
    pub fn stop_auto_send(&self) {
        let sender = lock(&self.shared.sender).take();
        if let Some(mut sender) = sender {
            sender.stop();
            info!("auto-send stopped");
        }
    }

    pub fn is_auto_sending(&self) -> bool {
        lock(&self.shared.sender).is_some()
    }

    /// Change the tick interval, restarting auto-send if it was running.
    pub fn set_interval(&self, interval: Duration) -> Result<()> {
        crate::sender::validate_interval(interval)?;
        *lock(&self.interval) = interval;
        if self.is_auto_sending() {
            self.stop_auto_send();
            self.start_auto_send()?;
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        *lock(&self.interval)
    }

    /// Most recent decoded device frame.
    pub fn last_telemetry(&self) -> Option<IncomingFrame> {
        *lock(&self.shared.last_telemetry)
    }

    pub fn stats(&self) -> SessionStats {
        let c = &self.shared.counters;
        SessionStats {
            frames_sent: c.frames_sent.load(Ordering::Relaxed),
            frames_received: c.frames_received.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
            acknowledgments: c.acknowledgments.load(Ordering::Relaxed),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Remote address of the device, if known.
    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.peer
    }

    /// Stop sending, release the pending command and close the link.
    ///
    /// Idempotent. Waits for the inbound thread to exit.
    pub fn disconnect(&mut self) {
        self.shared.mark_disconnected("disconnected locally");
        let sender = lock(&self.shared.sender).take();
        if let Some(mut sender) = sender {
            sender.stop();
        }
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .field("auto_send", &self.is_auto_sending())
            .finish()
    }
}

fn inbound_loop(shared: Arc<Shared>, mut reader: FrameReader<LinkStream>) {
    while shared.connected.load(Ordering::SeqCst) {
        match reader.read_frame() {
            Ok(raw) => shared.handle_frame(&raw),
            Err(err) if err.is_timeout() => continue,
            Err(FrameError::Io(io))
                if shared.datagram
                    && matches!(
                        io.kind(),
                        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
                    ) =>
            {
                debug!(error = %io, "datagram receive error ignored");
            }
            Err(FrameError::ConnectionClosed) => {
                shared.mark_disconnected("connection closed by device");
                break;
            }
            Err(FrameError::Io(io)) if io.kind() == ErrorKind::NotConnected => {
                shared.mark_disconnected("link shut down");
                break;
            }
            Err(err) => {
                shared.mark_disconnected(&err.to_string());
                break;
            }
        }
    }
    debug!("inbound reader stopped");
}
