use std::sync::atomic::AtomicBool;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use plclink_session::{
    AckState, Command, DeviceSimulator, OutgoingFrameBuilder, Session, SessionConfig,
    SessionEvent,
};
use plclink_transport::{TcpLink, UdpLink};

fn spawn_tcp_device(ack_delay: u32) -> (String, Arc<AtomicBool>, JoinHandle<u64>) {
    let listener = TcpLink::bind("127.0.0.1:0").expect("device should bind");
    let addr = listener.local_addr().to_string();
    let stop = Arc::new(AtomicBool::new(false));
    let device_stop = Arc::clone(&stop);
    let handle = thread::spawn(move || {
        let link = listener.accept().expect("device should accept");
        DeviceSimulator::new()
            .with_ack_delay(ack_delay)
            .serve(link, &device_stop, None)
            .expect("device loop should finish cleanly")
    });
    (addr, stop, handle)
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        interval_ms: 5,
        read_timeout_ms: 10,
        ..SessionConfig::default()
    }
}

fn wait_for_ack(events: &Receiver<SessionEvent>, timeout: Duration) -> Option<u16> {
    let deadline = Instant::now() + timeout;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(left) {
            Ok(SessionEvent::CommandAcknowledged(ack)) => return Some(ack.code),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

#[test]
fn tcp_momentary_command_is_acknowledged_and_cleared() {
    let (addr, _stop, device) = spawn_tcp_device(10);
    let link = TcpLink::connect(&addr).expect("panel should connect");
    let (mut session, events) =
        Session::start(link, fast_config(), OutgoingFrameBuilder::default())
            .expect("session should start");

    assert!(session.issue_command(Command::Initialize));
    assert_eq!(
        wait_for_ack(&events, Duration::from_secs(3)),
        Some(Command::Initialize.code())
    );
    assert_eq!(session.pending_code(), 0);
    assert_eq!(session.ack_state(), AckState::Idle);
    assert!(session.stats().frames_sent >= 10);

    session.disconnect();
    let served = device.join().expect("device thread should not panic");
    assert!(served >= 10);
}

#[test]
fn tcp_continuous_command_is_held_until_release() {
    let (addr, _stop, device) = spawn_tcp_device(3);
    let link = TcpLink::connect(&addr).expect("panel should connect");
    let (mut session, events) =
        Session::start(link, fast_config(), OutgoingFrameBuilder::default())
            .expect("session should start");

    session.issue_command(Command::YMinus);
    assert_eq!(wait_for_ack(&events, Duration::from_secs(3)), Some(10));
    assert_eq!(session.ack_state(), AckState::Acknowledged);
    assert_eq!(session.pending_code(), 10);

    thread::sleep(Duration::from_millis(50));
    assert_eq!(session.pending_code(), 10);

    assert_eq!(session.release(), Some(10));
    assert_eq!(session.pending_code(), 0);
    assert!(session.last_telemetry().is_some());

    session.disconnect();
    device.join().expect("device thread should not panic");
}

#[test]
fn superseded_command_only_acknowledges_the_latest() {
    let (addr, _stop, device) = spawn_tcp_device(5);
    let link = TcpLink::connect(&addr).expect("panel should connect");
    let (mut session, events) =
        Session::start(link, fast_config(), OutgoingFrameBuilder::default())
            .expect("session should start");

    session.issue_command(Command::DriverPowerOn);
    session.issue_command(Command::ServoModuleOn);
    assert_eq!(
        wait_for_ack(&events, Duration::from_secs(3)),
        Some(Command::ServoModuleOn.code())
    );

    session.disconnect();
    device.join().expect("device thread should not panic");
}

#[test]
fn device_exit_forces_release() {
    let listener = TcpLink::bind("127.0.0.1:0").expect("device should bind");
    let addr = listener.local_addr().to_string();
    let device = thread::spawn(move || {
        let link = listener.accept().expect("device should accept");
        let stop = AtomicBool::new(false);
        DeviceSimulator::new()
            .with_ack_delay(u32::MAX)
            .serve(link, &stop, Some(5))
            .expect("device loop should finish cleanly")
    });

    let link = TcpLink::connect(&addr).expect("panel should connect");
    let (session, events) = Session::start(link, fast_config(), OutgoingFrameBuilder::default())
        .expect("session should start");
    session.issue_command(Command::XPlus);

    assert_eq!(device.join().expect("device thread should not panic"), 5);

    let deadline = Instant::now() + Duration::from_secs(3);
    let mut disconnected = false;
    while Instant::now() < deadline {
        if let Ok(SessionEvent::Disconnected { .. }) =
            events.recv_timeout(Duration::from_millis(100))
        {
            disconnected = true;
            break;
        }
    }
    assert!(disconnected);
    assert_eq!(session.pending_code(), 0);
    assert!(!session.is_auto_sending());
}

#[test]
fn udp_link_round_trip() {
    let device_link = UdpLink::bind_responder("127.0.0.1:0").expect("device should bind");
    let device_addr = device_link
        .local_addr()
        .expect("device address should be known")
        .to_string();
    let stop = Arc::new(AtomicBool::new(false));
    let device_stop = Arc::clone(&stop);
    let device = thread::spawn(move || {
        DeviceSimulator::new()
            .serve(device_link, &device_stop, None)
            .expect("device loop should finish cleanly")
    });

    let link = UdpLink::bind("127.0.0.1:0", &device_addr).expect("panel should bind");
    let (mut session, events) =
        Session::start(link, fast_config(), OutgoingFrameBuilder::default())
            .expect("session should start");

    session.set_parameter(0, 150).expect("slot 0 is manual");
    session.issue_command(Command::Start);
    assert_eq!(wait_for_ack(&events, Duration::from_secs(3)), Some(2));

    let telemetry = session.last_telemetry().expect("telemetry should arrive");
    assert!(telemetry.flags[0]);
    assert!(telemetry.flags[16]);
    assert_eq!(telemetry.ints[0], 150);

    session.disconnect();
    stop.store(true, std::sync::atomic::Ordering::SeqCst);
    device.join().expect("device thread should not panic");
}
