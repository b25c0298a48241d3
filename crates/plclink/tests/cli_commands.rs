#![cfg(feature = "cli")]

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn plclink() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_plclink"));
    cmd.arg("--log-level").arg("error");
    cmd
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("ephemeral bind should succeed");
    listener
        .local_addr()
        .expect("bound listener should have an address")
        .port()
}

fn wait_for_listener(addr: &str, timeout: Duration) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        thread::sleep(Duration::from_millis(25));
    }
    panic!("simulator did not start listening on {addr}");
}

fn spawn_simulator(addr: &str, extra: &[&str]) -> Child {
    let child = plclink()
        .arg("--format")
        .arg("json")
        .arg("simulate")
        .arg("--tcp")
        .arg(addr)
        .args(extra)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("simulator should start");
    wait_for_listener(addr, Duration::from_secs(5));
    child
}

fn json_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("stdout line should be json"))
        .collect()
}

#[test]
fn encode_clamps_and_prints_hex() {
    let output = plclink()
        .args(["--format", "json", "encode", "-5,70000,0,0,0,0,0,0,0,2,0,0,0,0,0,1"])
        .output()
        .expect("encode should run");
    assert!(output.status.success());

    let lines = json_lines(&output);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["kind"], "outgoing");
    assert_eq!(lines[0]["command"], 2);
    assert_eq!(
        lines[0]["hex"],
        "0000ffff00000000000000000000000000000002000000000000000000000001"
    );
}

#[test]
fn encode_rejects_wrong_value_count() {
    let output = plclink()
        .args(["encode", "1,2,3"])
        .output()
        .expect("encode should run");
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn decode_incoming_frame() {
    // Flags 0 and 9 set; int0 = 0x1234, int9 = 2.
    let hex = "0102000000001234000000000000000000000000000000000002";
    let output = plclink()
        .args(["--format", "json", "decode", hex])
        .output()
        .expect("decode should run");
    assert!(output.status.success());

    let lines = json_lines(&output);
    assert_eq!(lines[0]["kind"], "telemetry");
    assert_eq!(lines[0]["active_flags"], serde_json::json!([0, 9]));
    assert_eq!(lines[0]["ints"][0], 0x1234);
    assert_eq!(lines[0]["ack"], 2);
}

#[test]
fn decode_short_frame_is_data_invalid() {
    let output = plclink()
        .args(["decode", "0102"])
        .output()
        .expect("decode should run");
    assert_eq!(output.status.code(), Some(60));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("insufficient frame length"));
}

#[test]
fn panel_until_ack_against_simulator() {
    let addr = format!("127.0.0.1:{}", free_port());
    let mut simulator = spawn_simulator(&addr, &["--ack-delay", "3"]);

    let output = plclink()
        .args([
            "--format",
            "json",
            "panel",
            &addr,
            "--command",
            "start",
            "--until-ack",
            "--interval",
            "10ms",
            "--timeout",
            "5s",
        ])
        .output()
        .expect("panel should run");

    let _ = simulator.kill();
    let _ = simulator.wait();

    assert!(
        output.status.success(),
        "panel failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let lines = json_lines(&output);
    let ack = lines
        .iter()
        .find(|line| line["kind"] == "acknowledged")
        .expect("acknowledgment should be printed");
    assert_eq!(ack["code"], 2);
    assert_eq!(ack["name"], "Start");
    assert_eq!(ack["cleared"], true);

    let summary = lines.last().expect("summary should be printed");
    assert_eq!(summary["kind"], "summary");
    assert!(summary["frames_sent"].as_u64().unwrap_or(0) >= 3);
}

#[test]
fn panel_times_out_without_acknowledgment() {
    let addr = format!("127.0.0.1:{}", free_port());
    let mut simulator = spawn_simulator(&addr, &["--ack-delay", "100000"]);

    let output = plclink()
        .args([
            "panel",
            &addr,
            "--command",
            "1",
            "--until-ack",
            "--timeout",
            "300ms",
        ])
        .output()
        .expect("panel should run");

    let _ = simulator.kill();
    let _ = simulator.wait();

    assert_eq!(output.status.code(), Some(124));
}

#[test]
fn panel_connect_refused_is_transport_error() {
    let addr = format!("127.0.0.1:{}", free_port());
    let output = plclink()
        .args(["panel", &addr, "--timeout", "1s"])
        .output()
        .expect("panel should run");
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn interactive_panel_reads_control_lines() {
    let addr = format!("127.0.0.1:{}", free_port());
    let mut simulator = spawn_simulator(&addr, &["--ack-delay", "2"]);

    let mut panel = plclink()
        .args(["--format", "json", "panel", &addr, "--interactive"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("panel should start");

    {
        let stdin = panel.stdin.as_mut().expect("stdin should be piped");
        writeln!(stdin, "set 0 150").expect("stdin write should succeed");
        writeln!(stdin, "cmd servo module on").expect("stdin write should succeed");
    }
    thread::sleep(Duration::from_millis(500));
    {
        let stdin = panel.stdin.as_mut().expect("stdin should be piped");
        writeln!(stdin, "quit").expect("stdin write should succeed");
    }

    let output = panel.wait_with_output().expect("panel should exit");
    let _ = simulator.kill();
    let _ = simulator.wait();

    assert!(output.status.success());
    let lines = json_lines(&output);
    assert!(lines
        .iter()
        .any(|line| line["kind"] == "acknowledged" && line["code"] == 5));
    assert_eq!(lines.last().map(|line| line["kind"].clone()), Some("summary".into()));
}
