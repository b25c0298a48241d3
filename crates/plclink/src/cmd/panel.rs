use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use plclink_frame::slot::{tension_to_wire, TENSION_TARGET_SLOT};
use plclink_session::{
    joystick_command, slider_command, Command, CommandClass, CommandTable, MemoryParameterStore,
    MocapOffsets, MocapSample, MotionCapture, OutgoingFrameBuilder, Session, SessionConfig,
    SessionEvent, JOYSTICK_DEADZONE,
};
use plclink_transport::{LinkStream, TcpLink, TcpOptions, UdpLink};
use serde::Deserialize;

use crate::cmd::{parse_duration, PanelArgs};
use crate::exit::{
    io_error, session_error, transport_error, CliError, CliResult, DATA_INVALID, FAILURE,
    SUCCESS, TIMEOUT,
};
use crate::output::{print_event, print_stats, print_telemetry, OutputFormat};

/// Contents of `--config FILE`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PanelFile {
    session: SessionConfig,
    /// Manual slot values, keyed by slot index.
    parameters: BTreeMap<usize, i64>,
    debug_echo: bool,
    mocap_offsets: Option<MocapOffsets>,
    /// Tension target in newtons, sent in slot 6.
    tension_n: Option<f64>,
    /// Extra codes held until release instead of cleared on acknowledgment.
    continuous: Vec<u16>,
}

impl PanelFile {
    fn load(path: &Path) -> CliResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        Self::parse(&text)
    }

    fn parse(text: &str) -> CliResult<Self> {
        serde_json::from_str(text)
            .map_err(|err| CliError::new(DATA_INVALID, format!("invalid panel config: {err}")))
    }
}

/// One line of interactive control input.
#[derive(Debug, Clone, PartialEq)]
enum ControlLine {
    Command(u16),
    Release,
    Set { slot: usize, value: i64 },
    Tension(f64),
    Echo(bool),
    Mocap(bool),
    MocapSample([f64; 3]),
    Jog { x: f64, y: f64 },
    Slider(i32),
    Interval(Duration),
    AutoSend(bool),
    Status,
    Quit,
}

pub fn run(args: PanelArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let mut file = match &args.config {
        Some(path) => PanelFile::load(path)?,
        None => PanelFile::default(),
    };
    if let Some(interval) = &args.interval {
        file.session.interval_ms = parse_duration(interval)?.as_millis() as u64;
    }
    for assignment in &args.set {
        let (slot, value) = parse_assignment(assignment)?;
        file.parameters.insert(slot, value);
    }
    if let Some(newtons) = file.tension_n {
        file.parameters
            .insert(TENSION_TARGET_SLOT, i64::from(tension_to_wire(newtons)));
    }
    let target = args.command.as_deref().map(resolve_command).transpose()?;

    let mut commands = CommandTable::default();
    for code in &file.continuous {
        commands.set_class(*code, CommandClass::Continuous);
    }

    let mocap = Arc::new(MotionCapture::new());
    if let Some(offsets) = file.mocap_offsets {
        mocap.set_offsets(offsets);
    }
    let store = MemoryParameterStore::from_values(file.parameters.clone());
    let builder = OutgoingFrameBuilder::new(Box::new(store)).with_source(mocap.clone());

    let link = open_link(&args, timeout)?;
    let (mut session, events) =
        Session::start_with_commands(link, file.session.clone(), builder, commands.clone())
            .map_err(|err| session_error("session start failed", err))?;
    session
        .debug_echo()
        .set_enabled(file.debug_echo || args.debug_echo);

    if let Some(code) = target {
        session.issue_code(code);
        tracing::info!(code, name = %commands.name_of(code), "command issued");
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    let controls = if args.interactive {
        Some(spawn_stdin_reader())
    } else {
        None
    };

    let deadline = (args.until_ack || args.count.is_some()).then(|| Instant::now() + timeout);
    let mut received = 0u64;
    let mut outcome = Ok(SUCCESS);

    'main: while running.load(Ordering::SeqCst) {
        if let Some(controls) = &controls {
            while let Ok(line) = controls.try_recv() {
                if !apply_control(&session, &mocap, line, format) {
                    break 'main;
                }
            }
        }

        match events.recv_timeout(Duration::from_millis(50)) {
            Ok(SessionEvent::Telemetry(frame)) => {
                received += 1;
                if args.telemetry {
                    print_telemetry(&frame, format);
                }
                if args.count.is_some_and(|count| received >= count) {
                    break;
                }
            }
            Ok(event @ SessionEvent::CommandAcknowledged(ack)) => {
                print_event(&event, &commands, format);
                if args.until_ack && Some(ack.code) == target {
                    break;
                }
            }
            Ok(event @ SessionEvent::Disconnected { .. }) => {
                print_event(&event, &commands, format);
                if let SessionEvent::Disconnected { reason } = event {
                    outcome = Err(CliError::new(
                        FAILURE,
                        format!("device disconnected: {reason}"),
                    ));
                }
                break;
            }
            Ok(event) => print_event(&event, &commands, format),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            let waited = if args.until_ack {
                "no acknowledgment"
            } else {
                "not enough telemetry"
            };
            outcome = Err(CliError::new(
                TIMEOUT,
                format!("{waited} within {}", args.timeout),
            ));
            break;
        }
    }

    session.disconnect();
    print_stats(&session.stats(), format);
    outcome
}

fn open_link(args: &PanelArgs, timeout: Duration) -> CliResult<LinkStream> {
    if args.udp {
        return UdpLink::bind(&args.listen, &args.addr)
            .map_err(|err| transport_error("udp bind failed", err));
    }
    let options = TcpOptions {
        connect_timeout: timeout,
        ..TcpOptions::default()
    };
    TcpLink::connect_with_options(&args.addr, &options)
        .map_err(|err| transport_error("connect failed", err))
}

/// A command by name or by raw non-zero code.
fn resolve_command(input: &str) -> CliResult<u16> {
    if let Ok(code) = input.trim().parse::<u16>() {
        if code == 0 {
            return Err(CliError::usage("command code 0 is neutral, not a command"));
        }
        return Ok(code);
    }
    Command::from_str(input)
        .map(Command::code)
        .map_err(|err| session_error("bad --command", err))
}

fn parse_assignment(input: &str) -> CliResult<(usize, i64)> {
    let (slot, value) = input
        .split_once('=')
        .ok_or_else(|| CliError::usage(format!("expected SLOT=VALUE, got {input:?}")))?;
    let slot = slot
        .trim()
        .parse()
        .map_err(|_| CliError::usage(format!("invalid slot in {input:?}")))?;
    let value = value
        .trim()
        .parse()
        .map_err(|_| CliError::usage(format!("invalid value in {input:?}")))?;
    Ok((slot, value))
}

fn parse_switch(word: Option<&str>) -> Result<bool, String> {
    match word {
        Some("on") | Some("1") | Some("true") => Ok(true),
        Some("off") | Some("0") | Some("false") => Ok(false),
        other => Err(format!("expected on/off, got {other:?}")),
    }
}

fn parse_number<T: FromStr>(word: Option<&str>, what: &str) -> Result<T, String> {
    word.ok_or_else(|| format!("missing {what}"))?
        .parse()
        .map_err(|_| format!("invalid {what}"))
}

/// Parse one control line. Blank lines and `#` comments yield `None`.
fn parse_control_line(line: &str) -> Result<Option<ControlLine>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_ascii_lowercase();
    let parsed = match verb.as_str() {
        "cmd" | "command" => {
            let rest: Vec<&str> = words.collect();
            if rest.is_empty() {
                return Err("missing command".to_string());
            }
            ControlLine::Command(resolve_command(&rest.join(" ")).map_err(|err| err.message)?)
        }
        "release" | "stop" => ControlLine::Release,
        "set" => ControlLine::Set {
            slot: parse_number(words.next(), "slot")?,
            value: parse_number(words.next(), "value")?,
        },
        "tension" => ControlLine::Tension(parse_number(words.next(), "tension")?),
        "echo" => ControlLine::Echo(parse_switch(words.next())?),
        "mocap" => match words.next() {
            Some(word @ ("on" | "off")) => ControlLine::Mocap(word == "on"),
            first => ControlLine::MocapSample([
                parse_number(first, "x")?,
                parse_number(words.next(), "y")?,
                parse_number(words.next(), "z")?,
            ]),
        },
        "jog" => ControlLine::Jog {
            x: parse_number(words.next(), "x")?,
            y: parse_number(words.next(), "y")?,
        },
        "slider" => ControlLine::Slider(parse_number(words.next(), "slider position")?),
        "interval" => {
            let word = words.next().ok_or("missing interval")?;
            ControlLine::Interval(parse_duration(word).map_err(|err| err.message)?)
        }
        "send" => ControlLine::AutoSend(parse_switch(words.next())?),
        "status" => ControlLine::Status,
        "quit" | "exit" => ControlLine::Quit,
        other => return Err(format!("unknown control {other:?}")),
    };
    Ok(Some(parsed))
}

/// Apply a control line to the session. Returns false to quit.
fn apply_control(
    session: &Session,
    mocap: &MotionCapture,
    line: ControlLine,
    format: OutputFormat,
) -> bool {
    let result = match line {
        ControlLine::Command(code) => {
            session.issue_code(code);
            Ok(())
        }
        ControlLine::Release => {
            session.release();
            Ok(())
        }
        ControlLine::Set { slot, value } => session.set_parameter(slot, value),
        ControlLine::Tension(newtons) => {
            session.set_parameter(TENSION_TARGET_SLOT, i64::from(tension_to_wire(newtons)))
        }
        ControlLine::Echo(enabled) => {
            session.debug_echo().set_enabled(enabled);
            Ok(())
        }
        ControlLine::Mocap(enabled) => {
            mocap.set_enabled(enabled);
            Ok(())
        }
        ControlLine::MocapSample(position) => {
            let sample = MocapSample {
                position,
                tracking_valid: true,
                timestamp: Instant::now(),
            };
            if mocap.update(sample).is_none() {
                tracing::warn!("motion capture disabled; sample ignored");
            }
            Ok(())
        }
        ControlLine::Jog { x, y } => {
            jog(session, joystick_command(x, y, JOYSTICK_DEADZONE));
            Ok(())
        }
        ControlLine::Slider(position) => {
            jog(session, slider_command(position));
            Ok(())
        }
        ControlLine::Interval(interval) => session.set_interval(interval),
        ControlLine::AutoSend(true) => session.start_auto_send(),
        ControlLine::AutoSend(false) => {
            session.stop_auto_send();
            Ok(())
        }
        ControlLine::Status => {
            print_stats(&session.stats(), format);
            Ok(())
        }
        ControlLine::Quit => return false,
    };
    if let Err(err) = result {
        tracing::warn!(error = %err, "control line rejected");
    }
    true
}

/// Hold a jog direction, or return to neutral when there is none.
fn jog(session: &Session, command: Option<Command>) {
    match command {
        Some(command) => {
            session.issue_command(command);
        }
        None => {
            session.release();
        }
    }
}

/// Read control lines from stdin on a helper thread. End of input quits.
fn spawn_stdin_reader() -> Receiver<ControlLine> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match parse_control_line(&line) {
                Ok(Some(control)) => {
                    if tx.send(control).is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(line = %line, error = %err, "bad control line"),
            }
        }
        let _ = tx.send(ControlLine::Quit);
    });
    rx
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_file_defaults_and_overrides() {
        let file = PanelFile::parse(
            r#"{
                "session": { "interval_ms": 40 },
                "parameters": { "0": 1500, "3": -2 },
                "debug_echo": true,
                "mocap_offsets": { "x": 10.0 },
                "continuous": [20]
            }"#,
        )
        .expect("config should parse");
        assert_eq!(file.session.interval_ms, 40);
        assert_eq!(file.session.command_slot, 9);
        assert_eq!(file.parameters.get(&0), Some(&1500));
        assert_eq!(file.parameters.get(&3), Some(&-2));
        assert!(file.debug_echo);
        assert_eq!(file.mocap_offsets.map(|o| o.x), Some(10.0));
        assert_eq!(file.continuous, vec![20]);
    }

    #[test]
    fn panel_file_rejects_unknown_keys() {
        let err = PanelFile::parse(r#"{ "sesion": {} }"#).unwrap_err();
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn commands_by_name_or_code() {
        assert_eq!(resolve_command("start").unwrap(), 2);
        assert_eq!(resolve_command("Servo Module ON").unwrap(), 5);
        assert_eq!(resolve_command("Z-").unwrap(), 12);
        assert_eq!(resolve_command("42").unwrap(), 42);
        assert!(resolve_command("0").is_err());
        assert!(resolve_command("launch").is_err());
    }

    #[test]
    fn assignments() {
        assert_eq!(parse_assignment("4=-7").unwrap(), (4, -7));
        assert!(parse_assignment("4").is_err());
        assert!(parse_assignment("x=1").is_err());
    }

    #[test]
    fn control_lines() {
        assert_eq!(parse_control_line("  ").unwrap(), None);
        assert_eq!(parse_control_line("# note").unwrap(), None);
        assert_eq!(
            parse_control_line("cmd servo module on").unwrap(),
            Some(ControlLine::Command(5))
        );
        assert_eq!(
            parse_control_line("set 2 900").unwrap(),
            Some(ControlLine::Set { slot: 2, value: 900 })
        );
        assert_eq!(
            parse_control_line("echo on").unwrap(),
            Some(ControlLine::Echo(true))
        );
        assert_eq!(
            parse_control_line("mocap 1 -2.5 3").unwrap(),
            Some(ControlLine::MocapSample([1.0, -2.5, 3.0]))
        );
        assert_eq!(
            parse_control_line("mocap off").unwrap(),
            Some(ControlLine::Mocap(false))
        );
        assert_eq!(
            parse_control_line("interval 50ms").unwrap(),
            Some(ControlLine::Interval(Duration::from_millis(50)))
        );
        assert_eq!(
            parse_control_line("jog 0.9 0.1").unwrap(),
            Some(ControlLine::Jog { x: 0.9, y: 0.1 })
        );
        assert_eq!(parse_control_line("QUIT").unwrap(), Some(ControlLine::Quit));
    }

    #[test]
    fn bad_control_lines() {
        assert!(parse_control_line("cmd").is_err());
        assert!(parse_control_line("set 1").is_err());
        assert!(parse_control_line("echo maybe").is_err());
        assert!(parse_control_line("mocap 1 2").is_err());
        assert!(parse_control_line("dance").is_err());
    }
}
