use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Output, Stdio};

use serde_json::{json, Value};
use spec_metrics_protocol::PROTOCOL_VERSION;
use tempfile::TempDir;

struct ServeGuard {
    child: Child,
}

impl Drop for ServeGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn command(home: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_spec-metrics"));
    command.env("HOME", home).env_remove("RUST_LOG");
    command
}

fn spawn_serve(home: &Path, project: &Path) -> (ServeGuard, ChildStdin, BufReader<ChildStdout>) {
    let mut child = command(home)
        .arg("serve")
        .arg("--project")
        .arg(project)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn spec-metrics serve");
    let stdin = child.stdin.take().expect("stdin");
    let stdout = BufReader::new(child.stdout.take().expect("stdout"));
    (ServeGuard { child }, stdin, stdout)
}

fn send(stdin: &mut ChildStdin, method: &str, params: Value) {
    let request = json!({
        "protocol_version": PROTOCOL_VERSION,
        "method": method,
        "id": method,
        "params": params,
    });
    writeln!(stdin, "{}", request).expect("Failed to write request");
    stdin.flush().expect("Failed to flush request");
}

fn read_message(stdout: &mut BufReader<ChildStdout>) -> Value {
    let mut line = String::new();
    stdout.read_line(&mut line).expect("Failed to read response");
    serde_json::from_str(&line).expect("Failed to parse response JSON")
}

fn run(home: &Path, args: &[&str]) -> Output {
    command(home).args(args).output().expect("Failed to run spec-metrics")
}

#[test]
fn serve_answers_health_and_records_sessions() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let (_guard, mut stdin, mut stdout) = spawn_serve(home.path(), project.path());

    send(&mut stdin, "get_health", Value::Null);
    let health = read_message(&mut stdout);
    assert_eq!(health["ok"], json!(true));
    assert_eq!(health["data"]["status"], json!("ok"));
    assert_eq!(health["data"]["protocol_version"], json!(PROTOCOL_VERSION));

    send(
        &mut stdin,
        "record_human_session",
        json!({"spec_id": "auth", "start": "2025-01-15T10:00:00Z", "end": "2025-01-15T10:00:45Z"}),
    );
    let recorded = read_message(&mut stdout);
    assert_eq!(recorded["ok"], json!(true));
    assert_eq!(recorded["data"]["record"]["ms"], json!(45_000));

    let notification = read_message(&mut stdout);
    assert_eq!(
        notification,
        json!({"notification": "metrics_updated", "spec_id": "auth"})
    );

    send(&mut stdin, "get_spec_metrics", json!({"spec_id": "auth"}));
    let metrics = read_message(&mut stdout);
    assert_eq!(metrics["data"]["totalHumanTimeMs"], json!(45_000));
    assert_eq!(metrics["data"]["totalElapsedMs"], Value::Null);
}

#[test]
fn serve_rejects_bad_requests_and_keeps_running() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let (_guard, mut stdin, mut stdout) = spawn_serve(home.path(), project.path());

    writeln!(stdin, "not json").unwrap();
    stdin.flush().unwrap();
    let response = read_message(&mut stdout);
    assert_eq!(response["ok"], json!(false));
    assert_eq!(response["error"]["code"], json!("invalid_json"));

    send(&mut stdin, "start_ai_session", json!({"spec_id": "auth"}));
    let response = read_message(&mut stdout);
    assert_eq!(response["error"]["code"], json!("invalid_params"));

    send(&mut stdin, "get_project_metrics", Value::Null);
    let response = read_message(&mut stdout);
    assert_eq!(response["ok"], json!(true));
    assert_eq!(response["data"]["completedSpecCount"], json!(0));
}

#[test]
fn open_ai_session_survives_restart_via_checkpoint() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();

    {
        let (mut guard, mut stdin, mut stdout) = spawn_serve(home.path(), project.path());
        send(
            &mut stdin,
            "start_ai_session",
            json!({"spec_id": "auth", "phase": "impl"}),
        );
        assert_eq!(read_message(&mut stdout)["ok"], json!(true));
        // Closing stdin is a clean shutdown that checkpoints the open session.
        drop(stdin);
        guard.child.wait().expect("serve did not exit");
    }

    let output = run(
        home.path(),
        &["recover", "--project", project.path().to_str().unwrap()],
    );
    assert!(output.status.success());
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["aiSessionsRecovered"], json!(1));
    assert_eq!(report["humanSessionsRecovered"], json!(0));

    let output = run(
        home.path(),
        &["log", "--project", project.path().to_str().unwrap(), "--spec-id", "auth"],
    );
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["type"], json!("ai"));
    assert_eq!(lines[0]["phase"], json!("impl"));
}

#[test]
fn record_human_then_query_from_cli() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let project_arg = project.path().to_str().unwrap();

    let output = run(
        home.path(),
        &[
            "record-human",
            "--project",
            project_arg,
            "--spec-id",
            "auth",
            "--start",
            "2025-01-15T10:00:00Z",
            "--end",
            "2025-01-15T10:01:00Z",
        ],
    );
    assert!(output.status.success());

    let output = run(home.path(), &["project", "--project", project_arg]);
    let project_metrics: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(project_metrics["totalHumanTimeMs"], json!(60_000));
    assert_eq!(project_metrics["inProgressSpecCount"], json!(1));

    let output = run(
        home.path(),
        &["spec", "--project", project_arg, "--spec-id", "auth"],
    );
    let spec: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(spec["specId"], json!("auth"));
    assert_eq!(spec["phaseMetrics"]["requirements"]["humanTimeMs"], json!(60_000));
}

#[test]
fn record_human_rejects_reversed_interval() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();

    let output = run(
        home.path(),
        &[
            "record-human",
            "--project",
            project.path().to_str().unwrap(),
            "--spec-id",
            "auth",
            "--start",
            "2025-01-15T10:01:00Z",
            "--end",
            "2025-01-15T10:00:00Z",
        ],
    );
    assert!(!output.status.success());
}
