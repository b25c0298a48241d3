use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult};
use crate::output::OutputFormat;

pub mod decode;
pub mod encode;
pub mod panel;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Drive a device: stream command frames and watch its replies.
    Panel(PanelArgs),
    /// Run a device simulator that answers panel frames.
    Simulate(SimulateArgs),
    /// Decode a frame given as hex.
    Decode(DecodeArgs),
    /// Encode 16 outgoing values as a hex frame.
    Encode(EncodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Panel(args) => panel::run(args, format),
        Command::Simulate(args) => simulate::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Encode(args) => encode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct PanelArgs {
    /// Device address (host:port).
    pub addr: String,
    /// Use UDP instead of TCP.
    #[arg(long)]
    pub udp: bool,
    /// Local UDP address to receive device replies on.
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:8081", requires = "udp")]
    pub listen: String,
    /// Send interval (e.g. 20ms, 1s). Overrides the config file.
    #[arg(long)]
    pub interval: Option<String>,
    /// JSON file with session settings, parameters and sources.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Command to issue after connecting, by name or code (e.g. start, 5, X+).
    #[arg(long, allow_hyphen_values = true)]
    pub command: Option<String>,
    /// Manual parameter SLOT=VALUE (repeatable).
    #[arg(long = "set", value_name = "SLOT=VALUE")]
    pub set: Vec<String>,
    /// Echo incoming int9 back in outgoing slot 6.
    #[arg(long)]
    pub debug_echo: bool,
    /// Exit once the issued command is acknowledged.
    #[arg(long, requires = "command")]
    pub until_ack: bool,
    /// Print every telemetry frame.
    #[arg(long)]
    pub telemetry: bool,
    /// Exit after receiving N telemetry frames.
    #[arg(long)]
    pub count: Option<u64>,
    /// Give up after this long (e.g. 5s, 500ms). Also bounds the TCP connect.
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Read control lines from stdin (cmd, release, set, echo, interval, quit).
    #[arg(long, conflicts_with = "until_ack")]
    pub interactive: bool,
}

#[derive(Args, Debug)]
#[command(group(clap::ArgGroup::new("link").required(true).args(["tcp", "udp"])))]
pub struct SimulateArgs {
    /// Listen for a panel over TCP on ADDR.
    #[arg(long, value_name = "ADDR")]
    pub tcp: Option<String>,
    /// Answer panel datagrams on ADDR.
    #[arg(long, value_name = "ADDR")]
    pub udp: Option<String>,
    /// Frames a command must repeat before it is acknowledged.
    #[arg(long, default_value_t = plclink_session::DEFAULT_ACK_DELAY_CYCLES)]
    pub ack_delay: u32,
    /// Put a cycling counter in the acknowledgment slot instead of echoing.
    #[arg(long)]
    pub debug_counter: bool,
    /// Exit after answering N frames in total.
    #[arg(long)]
    pub count: Option<u64>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Frame bytes as hex (spaces and colons allowed).
    pub hex: String,
    /// Decode a panel → device frame instead of a device reply.
    #[arg(long)]
    pub outgoing: bool,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Sixteen comma-separated values, slot 0 first.
    #[arg(value_delimiter = ',', allow_hyphen_values = true, required = true)]
    pub values: Vec<i64>,
    /// Treat values as signed 16-bit (two's complement) instead of clamping to 0..=65535.
    #[arg(long)]
    pub signed: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `2s` or a bare number of seconds.
pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
