use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use plclink_session::{AckMode, DeviceSimulator};
use plclink_transport::{TcpLink, UdpLink};

use crate::cmd::SimulateArgs;
use crate::exit::{session_error, transport_error, CliError, CliResult, SUCCESS};
use crate::output::{print_simulator_summary, OutputFormat};

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    let mode = if args.debug_counter {
        AckMode::DebugCounter
    } else {
        AckMode::Echo
    };
    let mut simulator = DeviceSimulator::new()
        .with_mode(mode)
        .with_ack_delay(args.ack_delay);
    let stop = Arc::new(AtomicBool::new(false));

    let served = match (&args.tcp, &args.udp) {
        (_, Some(addr)) => {
            let link =
                UdpLink::bind_responder(addr).map_err(|err| transport_error("bind failed", err))?;
            install_ctrlc_handler(stop.clone(), None)?;
            tracing::info!(%addr, ?mode, ack_delay = args.ack_delay, "simulator ready (udp)");
            simulator
                .serve(link, &stop, args.count)
                .map_err(|err| session_error("simulator failed", err))?
        }
        (Some(addr), None) => {
            let listener = TcpLink::bind(addr).map_err(|err| transport_error("bind failed", err))?;
            install_ctrlc_handler(stop.clone(), Some(listener.local_addr()))?;
            tracing::info!(
                addr = %listener.local_addr(),
                ?mode,
                ack_delay = args.ack_delay,
                "simulator ready (tcp)"
            );
            serve_tcp(&listener, &mut simulator, &stop, args.count)?
        }
        (None, None) => return Err(CliError::usage("one of --tcp or --udp is required")),
    };

    print_simulator_summary(served, format);
    Ok(SUCCESS)
}

/// Serve panels one connection at a time until stopped or `limit` frames
/// have been answered in total.
fn serve_tcp(
    listener: &TcpLink,
    simulator: &mut DeviceSimulator,
    stop: &AtomicBool,
    limit: Option<u64>,
) -> CliResult<u64> {
    let mut served = 0u64;
    while !stop.load(Ordering::SeqCst) {
        let link = listener
            .accept()
            .map_err(|err| transport_error("accept failed", err))?;
        if stop.load(Ordering::SeqCst) {
            break;
        }
        tracing::info!(peer = ?link.peer_addr(), "panel connected");

        let remaining = limit.map(|limit| limit.saturating_sub(served));
        served += simulator
            .serve(link, stop, remaining)
            .map_err(|err| session_error("simulator failed", err))?;
        if limit.is_some_and(|limit| served >= limit) {
            break;
        }
    }
    Ok(served)
}

fn install_ctrlc_handler(stop: Arc<AtomicBool>, wake: Option<SocketAddr>) -> CliResult<()> {
    let wake = wake.map(loopback_for);
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
        // A blocked accept only returns when someone connects.
        if let Some(addr) = wake {
            let _ = std::net::TcpStream::connect(addr);
        }
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}

fn loopback_for(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}
