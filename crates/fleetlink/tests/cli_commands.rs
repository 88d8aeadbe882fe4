#![cfg(unix)]

use std::io::{BufRead, BufReader};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::time::Duration;

use serde_json::{json, Value};

fn fleetlink(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_fleetlink"));
    cmd.current_dir(dir)
        .env_remove("FLEETLINK_DATA")
        .env_remove("FLEETLINK_CONFIG")
        .env_remove("FLEETLINK_PORT")
        .env("FLEETLINK_WORKER", env!("CARGO_BIN_EXE_fleetlink-worker"));
    cmd
}

fn run_json(dir: &Path, args: &[&str]) -> Output {
    fleetlink(dir)
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .output()
        .expect("fleetlink should run")
}

fn stdout_json(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).expect("stdout should be JSON")
}

fn write_json(path: &Path, value: &Value) {
    std::fs::write(path, serde_json::to_string_pretty(value).expect("serialize"))
        .expect("file should be written");
}

fn sample_data(url: &str, project: &str) -> Value {
    json!({
        "repos": [{"type": "git", "url": url}],
        "projects": [{
            "name": project,
            "repository": {"type": "git", "url": url},
            "path": format!("/src/{project}"),
            "language": "java"
        }]
    })
}

struct Server {
    child: Child,
    address: String,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn start_server(dir: &Path) -> Server {
    let mut child = fleetlink(dir)
        .args(["--log-level", "error", "--format", "json"])
        .arg("serve")
        .arg("--bind")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve should start");

    let stdout = child.stdout.take().expect("stdout should be piped");
    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .expect("serve should announce its address");
    let event: Value = serde_json::from_str(line.trim()).expect("listening event should be JSON");
    assert_eq!(event["event"], "listening");
    let address = event["address"]
        .as_str()
        .expect("address should be a string")
        .to_string();
    Server { child, address }
}

#[test]
fn version_prints_package_version() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let output = fleetlink(dir.path())
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("fleetlink {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn data_and_config_print_local_state() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    write_json(&dir.path().join("data.json"), &sample_data("https://git.test/a", "billing"));
    write_json(
        &dir.path().join("config.json"),
        &json!({"rootPath": "/srv/fleet", "remotes": [{"name": "lab", "url": "10.0.0.7"}]}),
    );

    let output = run_json(dir.path(), &["data"]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["projects"][0]["name"], "billing");

    let output = run_json(dir.path(), &["remote", "list"]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output), json!([{"name": "lab", "url": "10.0.0.7"}]));

    let output = run_json(dir.path(), &["config"]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["rootPath"], "/srv/fleet");
}

#[test]
fn missing_files_are_empty_state() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let output = run_json(dir.path(), &["data"]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output), json!({"repos": [], "projects": []}));
}

#[test]
fn corrupt_data_file_returns_60() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    std::fs::write(dir.path().join("data.json"), "{broken").expect("write");
    let output = run_json(dir.path(), &["data"]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn unknown_remote_returns_64() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let output = run_json(dir.path(), &["push", "nowhere"]);
    assert_eq!(output.status.code(), Some(64));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown remote: nowhere"));
}

#[test]
fn push_then_pull_syncs_between_instances() {
    let server_dir = tempfile::tempdir().expect("tempdir should be created");
    write_json(
        &server_dir.path().join("data.json"),
        &sample_data("https://git.test/a", "billing"),
    );
    let server = start_server(server_dir.path());

    let client_dir = tempfile::tempdir().expect("tempdir should be created");
    write_json(
        &client_dir.path().join("data.json"),
        &sample_data("https://git.test/b", "search"),
    );
    write_json(
        &client_dir.path().join("config.json"),
        &json!({"remotes": [{"name": "lab", "url": server.address.as_str()}]}),
    );

    let output = run_json(client_dir.path(), &["push", "lab"]);
    assert!(output.status.success(), "push failed: {output:?}");
    assert_eq!(stdout_json(&output)["action"], "pushed");

    let served: Value = serde_json::from_str(
        &std::fs::read_to_string(server_dir.path().join("data.json")).expect("read"),
    )
    .expect("server data should be JSON");
    assert_eq!(served["projects"].as_array().map(Vec::len), Some(2));

    let fresh_dir = tempfile::tempdir().expect("tempdir should be created");
    write_json(
        &fresh_dir.path().join("config.json"),
        &json!({"remotes": [{"name": "lab", "url": server.address.as_str()}]}),
    );
    let output = run_json(fresh_dir.path(), &["pull", "lab"]);
    assert!(output.status.success(), "pull failed: {output:?}");

    let output = run_json(fresh_dir.path(), &["data"]);
    let pulled = stdout_json(&output);
    let mut names: Vec<&str> = pulled["projects"]
        .as_array()
        .expect("projects should be an array")
        .iter()
        .filter_map(|p| p["name"].as_str())
        .collect();
    names.sort_unstable();
    assert_eq!(names, ["billing", "search"]);
}

#[test]
fn pull_that_cannot_save_prints_nothing() {
    let server_dir = tempfile::tempdir().expect("tempdir should be created");
    write_json(
        &server_dir.path().join("data.json"),
        &sample_data("https://git.test/a", "billing"),
    );
    let server = start_server(server_dir.path());

    let dir = tempfile::tempdir().expect("tempdir should be created");
    write_json(
        &dir.path().join("config.json"),
        &json!({"remotes": [{"name": "lab", "url": server.address.as_str()}]}),
    );
    // The store writes through this path before renaming.
    std::fs::create_dir(dir.path().join("data.json.tmp")).expect("dir should be created");

    let output = run_json(dir.path(), &["pull", "lab"]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty(), "unexpected output: {output:?}");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to save data"), "{stderr}");
}

#[test]
fn pull_from_unreachable_peer_returns_transport_error() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    write_json(
        &dir.path().join("config.json"),
        &json!({"remotes": [{"name": "gone", "url": format!("127.0.0.1:{port}")}]}),
    );

    let output = run_json(dir.path(), &["pull", "gone"]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn serve_on_busy_port_is_not_fatal() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let taken = std::net::TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let port = taken.local_addr().expect("addr").port().to_string();

    let output = fleetlink(dir.path())
        .args(["--log-level", "warn", "serve", "--bind", "127.0.0.1", "--port", &port])
        .output()
        .expect("serve should run");

    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("already in use"));
}

fn write_manifest(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("extension.json");
    write_json(
        &path,
        &json!({
            "name": "greeter",
            "operations": [
                {"name": "greet", "args": ["who"], "description": "say hello",
                 "command": ["echo", "hello"]},
                {"name": "fail", "command": ["false"]}
            ]
        }),
    );
    path
}

#[test]
fn run_lists_registered_operations() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    write_manifest(dir.path());

    let output = run_json(dir.path(), &["run", "extension.json"]);
    assert!(output.status.success(), "run failed: {output:?}");
    let operations = stdout_json(&output);
    assert_eq!(operations[0]["name"], "greet");
    assert_eq!(operations[0]["args"], json!(["who"]));
    assert_eq!(operations[1]["name"], "fail");
}

#[test]
fn run_executes_an_operation_in_the_worker() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    write_manifest(dir.path());

    let output = run_json(dir.path(), &["run", "extension.json", "greet", "world"]);
    assert!(output.status.success(), "run failed: {output:?}");
    let result = stdout_json(&output);
    assert_eq!(result["status"], 0);
    assert_eq!(result["stdout"], "hello world\n");

    let output = run_json(dir.path(), &["run", "extension.json", "fail"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn run_rejects_unknown_operations_and_missing_args() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    write_manifest(dir.path());

    let output = run_json(dir.path(), &["run", "extension.json", "deploy"]);
    assert_eq!(output.status.code(), Some(64));

    let output = run_json(dir.path(), &["run", "extension.json", "greet"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn run_with_invalid_manifest_returns_60() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    write_json(&dir.path().join("extension.json"), &json!({"operations": "nope"}));

    let output = run_json(dir.path(), &["run", "extension.json"]);
    assert_eq!(output.status.code(), Some(60));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load extension"));
}

#[test]
fn run_times_out_when_worker_never_connects() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    write_manifest(dir.path());

    let silent = dir.path().join("silent-worker.sh");
    std::fs::write(&silent, "#!/bin/sh\nexec sleep 30\n").expect("script should be written");
    std::fs::set_permissions(&silent, std::fs::Permissions::from_mode(0o755))
        .expect("script should be executable");

    let started = std::time::Instant::now();
    let output = fleetlink(dir.path())
        .env("FLEETLINK_WORKER", &silent)
        .args(["--log-level", "error", "run", "--startup-timeout", "300ms", "extension.json"])
        .output()
        .expect("run should execute");

    assert_eq!(output.status.code(), Some(124));
    assert!(started.elapsed() < Duration::from_secs(10));
}
