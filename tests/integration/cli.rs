#[path = "common/mod.rs"]
mod common;

use std::time::Duration;

use assert_cmd::Command;
use common::{send_sigterm, start_collector, wait_for_exit, wait_for_line};
use predicates::str::contains;
use tempfile::tempdir;

#[test]
fn workers_reject_malformed_arguments() {
    let temp = tempdir().expect("failed to create tempdir");

    Command::new(assert_cmd::cargo::cargo_bin!("muxlog-int"))
        .args(["9", "0", "0", "--runtime-dir"])
        .arg(temp.path())
        .assert()
        .failure()
        .stderr(contains("Invalid foreground color '9'"));

    Command::new(assert_cmd::cargo::cargo_bin!("muxlog-float"))
        .args(["1", "2", "soon", "--runtime-dir"])
        .arg(temp.path())
        .assert()
        .failure()
        .stderr(contains("Invalid delay 'soon'"));

    Command::new(assert_cmd::cargo::cargo_bin!("muxlog-string"))
        .args(["1", "2"])
        .assert()
        .failure();

    // Argument errors have no side effects.
    assert_eq!(
        std::fs::read_dir(temp.path())
            .expect("read runtime dir")
            .count(),
        0
    );
}

#[test]
fn string_worker_forwards_stdin_until_eof() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let log = dir.join("collector.log");
    let mut collector = start_collector(dir, &log);

    let output = Command::new(assert_cmd::cargo::cargo_bin!("muxlog-string"))
        .args(["3", "4", "300", "--runtime-dir"])
        .arg(dir)
        .write_stdin("hello\n\nsecond line\n")
        .timeout(Duration::from_secs(10))
        .assert()
        .success()
        .stdout(contains("Enter a string"))
        .get_output()
        .clone();
    assert!(output.status.success());

    wait_for_line(&log, ": hello");
    wait_for_line(&log, ": second line");
    wait_for_line(&log, "Hangup on socket client connection");

    send_sigterm(collector.id());
    assert!(wait_for_exit(&mut collector, Duration::from_secs(5)).success());
}

#[test]
fn int_worker_exits_with_failure_on_invalid_value() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let log = dir.join("collector.log");
    let mut collector = start_collector(dir, &log);

    Command::new(assert_cmd::cargo::cargo_bin!("muxlog-int"))
        .args(["0", "7", "0", "--runtime-dir"])
        .arg(dir)
        .write_stdin("17\nseventeen\n18\n")
        .timeout(Duration::from_secs(10))
        .assert()
        .failure()
        .stdout(contains("Invalid int value 'seventeen'"));

    wait_for_line(&log, ": 17");
    let content = std::fs::read_to_string(&log).expect("read log");
    assert!(!content.contains(": 18"));

    send_sigterm(collector.id());
    assert!(wait_for_exit(&mut collector, Duration::from_secs(5)).success());
}

#[test]
fn worker_without_collector_gives_up() {
    let temp = tempdir().expect("failed to create tempdir");

    Command::new(assert_cmd::cargo::cargo_bin!("muxlog-float"))
        .args(["1", "1", "0", "--runtime-dir"])
        .arg(temp.path())
        .write_stdin("1.5\n")
        .timeout(Duration::from_secs(15))
        .assert()
        .failure()
        .stderr(contains("Failed to connect"));
}
