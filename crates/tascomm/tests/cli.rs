#![cfg(all(unix, feature = "cli"))]

use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/tascomm-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn tascomm() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_tascomm"));
    command.arg("--log-level").arg("error");
    command
}

/// Start a simulated game that dials `socket` until a studio appears.
fn spawn_game(socket: &PathBuf, extra: &[&str]) -> Child {
    tascomm()
        .arg("game")
        .arg(socket)
        .arg("--fps")
        .arg("100")
        .args(extra)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("game should start")
}

fn run_studio(socket: &PathBuf, extra: &[&str]) -> Output {
    tascomm()
        .arg("--format")
        .arg("json")
        .arg("studio")
        .arg(socket)
        .arg("--timeout")
        .arg("20s")
        .args(extra)
        .output()
        .expect("studio should run")
}

fn stop(mut game: Child, dir: PathBuf) {
    let _ = game.kill();
    let _ = game.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn version_prints_package_version() {
    let output = tascomm().arg("version").output().expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("tascomm {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn extended_version_lists_protocol_facts() {
    let output = tascomm()
        .arg("version")
        .arg("--extended")
        .output()
        .expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("frame_header_bytes: 5"));
    assert!(stdout.contains("message_kinds: 13"));
}

#[test]
fn studio_prints_snapshots_from_game() {
    let dir = unique_temp_dir("state");
    let socket = dir.join("celeste.sock");
    let game = spawn_game(&socket, &["--level", "3A"]);

    let output = run_studio(&socket, &["--count", "2", "--path", "/tas/3A.tas"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    let states: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be json"))
        .collect();
    assert_eq!(states.len(), 2);
    for state in &states {
        assert_eq!(state["event"], "state");
        assert_eq!(state["level_name"], "3A");
        assert_eq!(state["states"], "ENABLE");
    }
    let first = states[0]["current_frame_in_tas"].as_u64().unwrap();
    let second = states[1]["current_frame_in_tas"].as_u64().unwrap();
    assert!(second > first, "{first} then {second}");

    stop(game, dir);
}

#[test]
fn studio_query_is_answered() {
    let dir = unique_temp_dir("query");
    let socket = dir.join("celeste.sock");
    let game = spawn_game(&socket, &[]);

    let output = run_studio(&socket, &["--query", "setting-value:\"CenterCamera\""]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    let query = stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .find(|value| value["event"] == "query")
        .expect("query result should be printed");
    assert_eq!(query["kind"], "setting-value");
    assert_eq!(query["result"], "setting-value:\"CenterCamera\"");

    stop(game, dir);
}

#[test]
fn old_studio_exits_65() {
    let dir = unique_temp_dir("version");
    let socket = dir.join("celeste.sock");
    let game = spawn_game(&socket, &["--min-studio-version", "99.0"]);

    let output = run_studio(&socket, &["--count", "1"]);
    assert_eq!(output.status.code(), Some(65));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("requires studio 99.0"), "{stderr}");

    stop(game, dir);
}

#[test]
fn studio_without_game_times_out() {
    let dir = unique_temp_dir("alone");
    let output = tascomm()
        .arg("studio")
        .arg(dir.join("celeste.sock"))
        .arg("--count")
        .arg("1")
        .arg("--timeout")
        .arg("300ms")
        .output()
        .expect("studio should run");

    assert_eq!(output.status.code(), Some(124));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn unknown_query_kind_is_usage_error() {
    let dir = unique_temp_dir("usage");
    let output = tascomm()
        .arg("studio")
        .arg(dir.join("celeste.sock"))
        .arg("--query")
        .arg("weather")
        .output()
        .expect("studio should run");

    assert_eq!(output.status.code(), Some(64));
    let _ = std::fs::remove_dir_all(&dir);
}
