use std::fs;
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Runs `kvs-client -o <operation>` until the server answers, returning stdout.
fn send_when_ready(addr: &str, operation: &str) -> String {
    for _ in 0..50 {
        let output = Command::cargo_bin("kvs-client")
            .unwrap()
            .args(["-a", addr, "-o", operation])
            .output()
            .unwrap();
        if output.status.success() {
            return String::from_utf8_lossy(&output.stdout).into_owned();
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("server at {addr} never accepted connections");
}

// `kvs-client` with no mode should fail
#[test]
fn client_cli_no_args() {
    Command::cargo_bin("kvs-client").unwrap().assert().failure();
}

#[test]
fn client_cli_conflicting_modes() {
    Command::cargo_bin("kvs-client")
        .unwrap()
        .args(["-a", "127.0.0.1", "-g", "-p"])
        .assert()
        .failure();
}

#[test]
fn client_cli_version() {
    Command::cargo_bin("kvs-client")
        .unwrap()
        .arg("-V")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn server_cli_version() {
    Command::cargo_bin("kvs-server")
        .unwrap()
        .arg("-V")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn client_cli_unreachable_server() {
    let port = free_port();
    Command::cargo_bin("kvs-client")
        .unwrap()
        .args(["-a", &format!("127.0.0.1:{port}"), "-o", "GET:station.1"])
        .assert()
        .failure();
}

#[test]
fn server_cli_rejects_tiny_queue() {
    let temp_dir = TempDir::new().unwrap();
    Command::cargo_bin("kvs-server")
        .unwrap()
        .args(["--queue-capacity", "1", "--port", &free_port().to_string()])
        .current_dir(&temp_dir)
        .assert()
        .failure()
        .stderr(contains("queue_capacity"));
}

#[test]
fn server_cli_missing_config_file() {
    let temp_dir = TempDir::new().unwrap();
    Command::cargo_bin("kvs-server")
        .unwrap()
        .args(["--config", "missing.json"])
        .current_dir(&temp_dir)
        .assert()
        .failure();
}

#[test]
fn server_cli_invalid_config_file() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("kvs.json"), r#"{ "worker_count": 0 }"#).unwrap();
    Command::cargo_bin("kvs-server")
        .unwrap()
        .args(["--config", "kvs.json", "--port", &free_port().to_string()])
        .current_dir(&temp_dir)
        .assert()
        .failure()
        .stderr(contains("worker_count"));
}

#[test]
fn server_cli_read_only_without_store() {
    let temp_dir = TempDir::new().unwrap();
    Command::cargo_bin("kvs-server")
        .unwrap()
        .args(["--open-mode", "read-only", "--port", &free_port().to_string()])
        .current_dir(&temp_dir)
        .assert()
        .failure()
        .stderr(contains("Listening on").not());
}

#[test]
fn cli_put_then_get_against_running_server() {
    let temp_dir = TempDir::new().unwrap();
    let port = free_port();
    let addr = format!("127.0.0.1:{port}");

    let mut server = Command::cargo_bin("kvs-server")
        .unwrap()
        .args(["--host", "127.0.0.1", "--port", &port.to_string()])
        .args(["--store", "store", "--workers", "2", "--queue-capacity", "2"])
        .current_dir(&temp_dir)
        .spawn()
        .unwrap();

    let stdout = send_when_ready(&addr, "PUT:station.1:42");
    assert!(stdout.contains("Result: PUT OK"));

    Command::cargo_bin("kvs-client")
        .unwrap()
        .args(["-a", &addr, "-o", "GET:station.1"])
        .assert()
        .success()
        .stdout(contains("Operation: GET:station.1"))
        .stdout(contains("Result: GET OK: 42"));

    Command::cargo_bin("kvs-client")
        .unwrap()
        .args(["-a", &addr, "-o", "FOO:bar"])
        .assert()
        .success()
        .stdout(contains("Result: FORMAT ERROR"));

    Command::cargo_bin("kvs-client")
        .unwrap()
        .args(["-a", "127.0.0.1", "--port", &port.to_string(), "-p", "-i", "2"])
        .assert()
        .success()
        .stdout(contains("sent: 258, ok: 258, rejected: 0, errors: 0"));

    server.kill().expect("server exited before killed");
    server.wait().unwrap();
}

#[cfg(unix)]
fn spawn_server(dir: &TempDir, port: u16, open_mode: &str) -> Child {
    Command::cargo_bin("kvs-server")
        .unwrap()
        .args(["--host", "127.0.0.1", "--port", &port.to_string()])
        .args(["--store", "store", "--open-mode", open_mode])
        .current_dir(dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap()
}

#[cfg(unix)]
fn terminate(server: &Child) {
    let status = Command::new("kill")
        .args(["-TERM", &server.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());
}

#[cfg(unix)]
#[test]
fn cli_sigterm_drains_reports_stats_and_keeps_data() {
    let temp_dir = TempDir::new().unwrap();
    let port = free_port();
    let addr = format!("127.0.0.1:{port}");

    let server = spawn_server(&temp_dir, port, "read-write-create");
    assert!(send_when_ready(&addr, "GET:station.1").contains("Result: GET ERROR"));
    assert!(send_when_ready(&addr, "PUT:station.1:42").contains("Result: PUT OK"));
    assert!(send_when_ready(&addr, "GET:station.1").contains("Result: GET OK: 42"));

    terminate(&server);
    let output = server.wait_with_output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("completed-requests: 3"), "stdout: {stdout}");
    assert!(stdout.contains("avg-service-time:"));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains(&format!("Listening on {addr}")), "stderr: {stderr}");

    // The store was closed cleanly and opens as an existing store.
    let server = spawn_server(&temp_dir, port, "read-write");
    assert!(send_when_ready(&addr, "GET:station.1").contains("Result: GET OK: 42"));
    terminate(&server);
    let output = server.wait_with_output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("completed-requests: 1"));
}
