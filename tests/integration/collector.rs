#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    io::Write,
    os::unix::{fs::FileTypeExt, net::UnixStream},
    time::Duration,
};

use assert_cmd::Command;
use common::{
    is_process_alive, send_sigterm, spawn_collector, start_collector, wait_for_exit,
    wait_for_line, wait_for_path_removed,
};
use muxlog::{
    config::ChannelPaths,
    endpoint::{RetryPolicy, open_fifo_writer, send_record},
    record::{FloatRecord, IntRecord, Record, StringRecord},
};
use predicates::str::contains;
use tempfile::tempdir;

const NO_RETRY: RetryPolicy = RetryPolicy {
    attempts: 1,
    backoff: Duration::from_millis(0),
};

#[test]
fn collector_logs_every_channel_and_cleans_up_on_sigterm() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let log = dir.join("collector.log");
    let paths = ChannelPaths::in_dir(dir);

    let mut collector = start_collector(dir, &log);
    assert!(
        fs::metadata(&paths.int_fifo)
            .expect("int fifo missing")
            .file_type()
            .is_fifo()
    );

    let mut ints = open_fifo_writer(&paths.int_fifo, NO_RETRY).expect("open int fifo");
    let int = Record::Int(IntRecord {
        source_id: 4101,
        value: 42,
    });
    send_record(&mut ints, &int.encode()).expect("send int");

    let mut floats = open_fifo_writer(&paths.float_fifo, NO_RETRY).expect("open float fifo");
    let float = Record::Float(FloatRecord {
        source_id: 4102,
        value: 0.125,
    });
    send_record(&mut floats, &float.encode()).expect("send float");

    let mut socket = UnixStream::connect(&paths.socket).expect("connect socket");
    let text = Record::Text(StringRecord::new(4103, "hello"));
    socket.write_all(&text.encode()).expect("send text");

    assert!(wait_for_line(&log, "int(4101)").ends_with(": 42"));
    assert!(wait_for_line(&log, "float(4102)").ends_with(": 0.125000"));
    assert!(wait_for_line(&log, "text(4103)").ends_with(": hello"));

    send_sigterm(collector.id());
    let status = wait_for_exit(&mut collector, Duration::from_secs(5));
    assert!(status.success(), "collector exited with {status}");

    for path in paths.all() {
        wait_for_path_removed(path);
    }
    wait_for_line(&log, "Cleaning up channel resources");
}

#[test]
fn collector_survives_a_rejected_second_client() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let log = dir.join("collector.log");
    let paths = ChannelPaths::in_dir(dir);
    let mut collector = start_collector(dir, &log);

    let mut first = UnixStream::connect(&paths.socket).expect("connect first");
    wait_for_line(&log, "Accepted socket client connection");
    let _second = UnixStream::connect(&paths.socket).expect("connect second");
    wait_for_line(&log, "Rejected extra socket connection");

    first
        .write_all(&Record::Text(StringRecord::new(7, "first wins")).encode())
        .expect("write first");
    wait_for_line(&log, "text(7): first wins");
    assert!(is_process_alive(collector.id()));

    send_sigterm(collector.id());
    assert!(wait_for_exit(&mut collector, Duration::from_secs(5)).success());
}

#[test]
fn collector_keeps_listening_after_fifos_close() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let log = dir.join("collector.log");
    let paths = ChannelPaths::in_dir(dir);
    let mut collector = start_collector(dir, &log);

    drop(open_fifo_writer(&paths.int_fifo, NO_RETRY).expect("open int fifo"));
    drop(open_fifo_writer(&paths.float_fifo, NO_RETRY).expect("open float fifo"));
    wait_for_line(&log, "int_fifo closed by peer");
    wait_for_line(&log, "float_fifo closed by peer");

    // The listener stays live, so the collector keeps running.
    assert!(is_process_alive(collector.id()));
    send_sigterm(collector.id());
    assert!(wait_for_exit(&mut collector, Duration::from_secs(5)).success());
}

#[test]
fn unwritable_log_fails_without_creating_channels() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let log = dir.join("missing").join("collector.log");

    let mut collector = spawn_collector(dir, &log);
    let status = wait_for_exit(&mut collector, Duration::from_secs(5));
    assert!(!status.success());
    for path in ChannelPaths::in_dir(dir).all() {
        assert!(!path.exists(), "{path:?} should not exist");
    }
}

#[test]
fn second_collector_on_the_same_log_is_refused() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let log = dir.join("collector.log");
    let mut first = start_collector(dir, &log);

    let other = dir.join("other");
    fs::create_dir_all(&other).expect("create second runtime dir");
    Command::new(assert_cmd::cargo::cargo_bin!("muxlog-collector"))
        .arg(&log)
        .arg("--runtime-dir")
        .arg(&other)
        .timeout(Duration::from_secs(5))
        .assert()
        .failure()
        .stderr(contains("locked by another collector"));

    send_sigterm(first.id());
    assert!(wait_for_exit(&mut first, Duration::from_secs(5)).success());
}

#[test]
fn collector_requires_a_log_file_argument() {
    Command::new(assert_cmd::cargo::cargo_bin!("muxlog-collector"))
        .assert()
        .failure()
        .stderr(contains("LOG_FILE"));
}
