//! Loopback session: a simulated device and a panel in one process.
//!
//! Run with:
//!   cargo run --example loopback-session --features session
//!
//! The panel issues Servo Module ON, waits for the device to acknowledge
//! it, then jogs X+ until the jog is held and releases it.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use plclink::session::{
    Command, DeviceSimulator, OutgoingFrameBuilder, Session, SessionConfig, SessionEvent,
};
use plclink::transport::TcpLink;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpLink::bind("127.0.0.1:0")?;
    let addr = listener.local_addr().to_string();
    eprintln!("[device] listening on {addr}");

    let stop = Arc::new(AtomicBool::new(false));
    let device_stop = Arc::clone(&stop);
    let device = thread::spawn(
        move || -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
            let link = listener.accept()?;
            let served = DeviceSimulator::new().serve(link, &device_stop, None)?;
            Ok(served)
        },
    );

    let link = TcpLink::connect(&addr)?;
    let (mut session, events) =
        Session::start(link, SessionConfig::default(), OutgoingFrameBuilder::default())?;
    session.set_parameter(0, 1500)?;

    for command in [Command::ServoModuleOn, Command::XPlus] {
        session.issue_command(command);
        eprintln!("[panel] issued {command}");
        loop {
            match events.recv_timeout(Duration::from_secs(2))? {
                SessionEvent::CommandAcknowledged(ack) => {
                    eprintln!(
                        "[panel] {} acknowledged after {:?} ({})",
                        command,
                        ack.latency,
                        if ack.cleared { "cleared" } else { "held" }
                    );
                    break;
                }
                SessionEvent::Disconnected { reason } => return Err(reason.into()),
                _ => {}
            }
        }
    }

    thread::sleep(Duration::from_millis(200));
    eprintln!("[panel] releasing {:?}", session.release());
    eprintln!("[panel] stats: {:?}", session.stats());

    session.disconnect();
    let served = device
        .join()
        .map_err(|_| "device thread panicked")?
        .map_err(|err| err.to_string())?;
    eprintln!("[device] answered {served} frames");
    Ok(())
}
