#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use portlink_host::{Bridge, HostError, PortName};
use portlink_transport::Endpoint;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/portlink-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn spawn_simulator(sock: &Path, once: bool) -> Child {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_portlink"));
    cmd.arg("--log-level")
        .arg("error")
        .arg("simulate")
        .arg(sock)
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if once {
        cmd.arg("--once");
    }
    cmd.spawn().expect("simulate command should start")
}

fn wait_for_bridge(sock: &Path, timeout: Duration) -> Result<Bridge, HostError> {
    let endpoint = Endpoint::Unix(sock.to_path_buf());
    let start = Instant::now();
    loop {
        match Bridge::connect(&endpoint) {
            Ok(bridge) => return Ok(bridge),
            Err(err) => {
                if start.elapsed() >= timeout {
                    return Err(err);
                }
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

#[test]
fn version_reports_crate_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_portlink"))
        .arg("version")
        .output()
        .expect("version command should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn simulator_serves_a_gpio_round_trip() {
    let dir = unique_temp_dir("roundtrip");
    let sock = dir.join("board.sock");
    let mut child = spawn_simulator(&sock, true);

    let mut bridge = wait_for_bridge(&sock, Duration::from_secs(3))
        .expect("bridge should connect to the simulator");

    bridge.set_high(PortName::A, 2).expect("gpio high");
    assert!(bridge.read_pin(PortName::A, 2).expect("gpio read"));

    bridge.set_low(PortName::A, 2).expect("gpio low");
    assert!(!bridge.read_pin(PortName::A, 2).expect("gpio read"));

    bridge.close().expect("close");

    let status = child.wait().expect("simulator should exit after --once");
    assert!(status.success());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn gpio_read_cli_reports_level() {
    let dir = unique_temp_dir("gpio-cli");
    let sock = dir.join("board.sock");
    let mut child = spawn_simulator(&sock, false);

    // Wait until the simulator accepts connections.
    wait_for_bridge(&sock, Duration::from_secs(3))
        .expect("simulator should come up")
        .close()
        .expect("close");

    let output = Command::new(env!("CARGO_BIN_EXE_portlink"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json")
        .arg("gpio")
        .arg(&sock)
        .arg("--pin")
        .arg("2")
        .arg("read")
        .output()
        .expect("gpio command should run");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"level\":\"low\""), "stdout: {stdout}");

    child.kill().expect("simulator should be killable");
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn probe_cli_measures_sync_round_trips() {
    let dir = unique_temp_dir("probe-cli");
    let sock = dir.join("board.sock");
    let mut child = spawn_simulator(&sock, false);

    wait_for_bridge(&sock, Duration::from_secs(3))
        .expect("simulator should come up")
        .close()
        .expect("close");

    let output = Command::new(env!("CARGO_BIN_EXE_portlink"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json")
        .arg("probe")
        .arg(&sock)
        .output()
        .expect("probe command should run");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("port_a_rtt_us"), "stdout: {stdout}");
    assert!(stdout.contains("port_b_rtt_us"), "stdout: {stdout}");

    child.kill().expect("simulator should be killable");
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn gpio_cli_rejects_bad_endpoint() {
    let output = Command::new(env!("CARGO_BIN_EXE_portlink"))
        .arg("gpio")
        .arg("tcp://not-an-address")
        .arg("--pin")
        .arg("2")
        .arg("high")
        .output()
        .expect("gpio command should run");
    assert!(!output.status.success());
}
