use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use plclink_frame::slot::{flag_label, int_label, outgoing_slot_name, tension_reading};
use plclink_frame::{encode_incoming, encode_outgoing, IncomingFrame, OutgoingValues, ACK_SLOT};
use plclink_session::{CommandTable, SessionEvent, SessionStats};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct TelemetryOutput {
    kind: &'static str,
    flags: Vec<bool>,
    active_flags: Vec<usize>,
    ints: Vec<u16>,
    ack: u16,
    tension_n: Option<f64>,
    timestamp: String,
}

impl TelemetryOutput {
    fn new(frame: &IncomingFrame) -> Self {
        Self {
            kind: "telemetry",
            flags: frame.flags.to_vec(),
            active_flags: active_flags(frame),
            ints: frame.ints.to_vec(),
            ack: frame.ints[ACK_SLOT],
            tension_n: tension_reading(&frame.ints),
            timestamp: now_unix_millis(),
        }
    }
}

pub fn print_telemetry(frame: &IncomingFrame, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&TelemetryOutput::new(frame)),
        OutputFormat::Table => {
            let mut table = new_table(vec!["SLOT", "LABEL", "VALUE"]);
            for (index, value) in frame.ints.iter().enumerate() {
                table.add_row(vec![
                    format!("int{index}"),
                    int_label(index),
                    value.to_string(),
                ]);
            }
            let active: Vec<String> = active_flags(frame)
                .into_iter()
                .map(|index| format!("{index}:{}", flag_label(index)))
                .collect();
            table.add_row(vec![
                "flags".to_string(),
                format!("{} active", active.len()),
                active.join(", "),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "flags={} ints={:?} ack={}",
                flag_bits(frame),
                frame.ints,
                frame.ints[ACK_SLOT]
            );
        }
        OutputFormat::Raw => print_raw(&encode_incoming(frame)),
    }
}

#[derive(Serialize)]
struct OutgoingOutput<'a> {
    kind: &'static str,
    values: &'a [u16],
    command: u16,
    hex: String,
}

pub fn print_outgoing(values: &OutgoingValues, command_slot: usize, format: OutputFormat) {
    let bytes = encode_outgoing(values);
    match format {
        OutputFormat::Json => print_json(&OutgoingOutput {
            kind: "outgoing",
            values,
            command: values.get(command_slot).copied().unwrap_or(0),
            hex: hex::encode(bytes),
        }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["SLOT", "NAME", "VALUE"]);
            for (index, value) in values.iter().enumerate() {
                table.add_row(vec![
                    index.to_string(),
                    outgoing_slot_name(index).to_string(),
                    value.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", hex::encode(bytes)),
        OutputFormat::Raw => print_raw(&bytes),
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cleared: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    timestamp: String,
}

impl<'a> EventOutput<'a> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            code: None,
            name: None,
            elapsed_ms: None,
            cleared: None,
            len: None,
            reason: None,
            timestamp: now_unix_millis(),
        }
    }

    fn describe(&self) -> String {
        let mut parts = vec![self.kind.to_string()];
        if let (Some(code), Some(name)) = (self.code, &self.name) {
            parts.push(format!("code={code} ({name})"));
        }
        if let Some(ms) = self.elapsed_ms {
            parts.push(format!("after={ms}ms"));
        }
        if let Some(cleared) = self.cleared {
            parts.push(if cleared { "cleared" } else { "held" }.to_string());
        }
        if let Some(len) = self.len {
            parts.push(format!("len={len}"));
        }
        if let Some(reason) = self.reason {
            parts.push(format!("reason={reason}"));
        }
        parts.join(" ")
    }
}

/// Print a non-telemetry session event. Telemetry goes through
/// [`print_telemetry`].
pub fn print_event(event: &SessionEvent, commands: &CommandTable, format: OutputFormat) {
    let out = match event {
        SessionEvent::Telemetry(frame) => return print_telemetry(frame, format),
        SessionEvent::CommandAcknowledged(ack) => EventOutput {
            code: Some(ack.code),
            name: Some(commands.name_of(ack.code)),
            elapsed_ms: Some(ack.latency.as_millis() as u64),
            cleared: Some(ack.cleared),
            ..EventOutput::new("acknowledged")
        },
        SessionEvent::CommandOverdue { code, waited } => EventOutput {
            code: Some(*code),
            name: Some(commands.name_of(*code)),
            elapsed_ms: Some(waited.as_millis() as u64),
            ..EventOutput::new("overdue")
        },
        SessionEvent::FrameDropped { len } => EventOutput {
            len: Some(*len),
            ..EventOutput::new("frame_dropped")
        },
        SessionEvent::Disconnected { reason } => EventOutput {
            reason: Some(reason.as_str()),
            ..EventOutput::new("disconnected")
        },
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = new_table(vec!["EVENT", "DETAIL"]);
            let detail = out.describe();
            let detail = detail
                .strip_prefix(out.kind)
                .map(str::trim_start)
                .unwrap_or(&detail)
                .to_string();
            table.add_row(vec![out.kind.to_string(), detail]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", out.describe()),
        OutputFormat::Raw => {}
    }
}

#[derive(Serialize)]
struct StatsOutput<'a> {
    kind: &'static str,
    #[serde(flatten)]
    stats: &'a SessionStats,
}

pub fn print_stats(stats: &SessionStats, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&StatsOutput {
            kind: "summary",
            stats,
        }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["SENT", "RECEIVED", "DROPPED", "SEND FAILURES", "ACKS"]);
            table.add_row(vec![
                stats.frames_sent.to_string(),
                stats.frames_received.to_string(),
                stats.frames_dropped.to_string(),
                stats.send_failures.to_string(),
                stats.acknowledgments.to_string(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!(
            "sent={} received={} dropped={} send_failures={} acks={}",
            stats.frames_sent,
            stats.frames_received,
            stats.frames_dropped,
            stats.send_failures,
            stats.acknowledgments
        ),
        OutputFormat::Raw => {}
    }
}

#[derive(Serialize)]
struct SimulatorOutput {
    kind: &'static str,
    frames_served: u64,
}

pub fn print_simulator_summary(frames_served: u64, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&SimulatorOutput {
            kind: "simulator_summary",
            frames_served,
        }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["FRAMES SERVED"]);
            table.add_row(vec![frames_served.to_string()]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("frames_served={frames_served}"),
        OutputFormat::Raw => {}
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn active_flags(frame: &IncomingFrame) -> Vec<usize> {
    frame
        .flags
        .iter()
        .enumerate()
        .filter_map(|(index, set)| set.then_some(index))
        .collect()
}

/// Flags as a 0/1 string, flag 0 first.
fn flag_bits(frame: &IncomingFrame) -> String {
    frame
        .flags
        .iter()
        .map(|set| if *set { '1' } else { '0' })
        .collect()
}

fn now_unix_millis() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> IncomingFrame {
        let mut frame = IncomingFrame::default();
        frame.flags[0] = true;
        frame.flags[39] = true;
        frame.ints[8] = 1250;
        frame.ints[9] = 3;
        frame
    }

    #[test]
    fn telemetry_json_shape() {
        let value = serde_json::to_value(TelemetryOutput::new(&frame())).unwrap();
        assert_eq!(value["kind"], "telemetry");
        assert_eq!(value["active_flags"], serde_json::json!([0, 39]));
        assert_eq!(value["ack"], 3);
        assert_eq!(value["tension_n"], 12.5);
        assert_eq!(value["flags"].as_array().map(Vec::len), Some(40));
    }

    #[test]
    fn flag_bits_start_at_flag_zero() {
        let bits = flag_bits(&frame());
        assert_eq!(bits.len(), 40);
        assert!(bits.starts_with('1'));
        assert!(bits.ends_with('1'));
        assert_eq!(bits.matches('1').count(), 2);
    }

    #[test]
    fn stats_flatten_into_summary() {
        let stats = SessionStats {
            frames_sent: 4,
            acknowledgments: 1,
            ..SessionStats::default()
        };
        let value = serde_json::to_value(StatsOutput {
            kind: "summary",
            stats: &stats,
        })
        .unwrap();
        assert_eq!(value["kind"], "summary");
        assert_eq!(value["frames_sent"], 4);
        assert_eq!(value["acknowledgments"], 1);
    }

    #[test]
    fn event_description_is_compact() {
        let out = EventOutput {
            code: Some(2),
            name: Some("Start".to_string()),
            elapsed_ms: Some(180),
            cleared: Some(true),
            ..EventOutput::new("acknowledged")
        };
        assert_eq!(out.describe(), "acknowledged code=2 (Start) after=180ms cleared");
    }
}
