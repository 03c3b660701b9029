#[path = "common/mod.rs"]
mod common;

use std::{io::Write, path::Path, time::Duration};

use assert_cmd::Command;
use common::{is_process_alive, wait_for_line, wait_for_path_removed};
use muxlog::{
    config::{ChannelPaths, SupervisorConfig, WorkerSettings},
    process::CommandLauncher,
    supervisor::{ProcessStatus, StartOutcome, StopReport, Supervisor, WorkerRole},
};
use predicates::str::contains;
use tempfile::{TempDir, tempdir};

fn bin_dir() -> &'static Path {
    assert_cmd::cargo::cargo_bin!("muxlog-collector")
        .parent()
        .expect("binary has a parent directory")
}

fn supervisor(temp: &TempDir) -> Supervisor<CommandLauncher> {
    let config = SupervisorConfig {
        runtime_dir: temp.path().to_path_buf(),
        log_file: temp.path().join("collector.log"),
        ..SupervisorConfig::default()
    };
    let launcher = CommandLauncher::new(bin_dir(), temp.path())
        .with_log_level("debug")
        .with_piped_stdin();
    Supervisor::new(launcher, config)
}

fn feed(sup: &mut Supervisor<CommandLauncher>, role: WorkerRole, line: &str) {
    let stdin = sup
        .worker_handle_mut(role)
        .and_then(|handle| handle.stdin())
        .expect("worker stdin is piped");
    stdin.write_all(line.as_bytes()).expect("write worker stdin");
    stdin.flush().expect("flush worker stdin");
}

fn settings() -> WorkerSettings {
    WorkerSettings::parse("2", "0", "0").expect("valid settings")
}

#[test]
fn int_and_string_values_reach_the_log() {
    let temp = tempdir().expect("failed to create tempdir");
    let log = temp.path().join("collector.log");
    let mut sup = supervisor(&temp);

    let StartOutcome::Started { pid: int_pid } = sup
        .start_worker(WorkerRole::IntProducer, settings())
        .expect("start int producer")
    else {
        panic!("int producer should start fresh");
    };
    assert_eq!(sup.collector_status(), ProcessStatus::Running);
    let collector_pid = sup.collector_pid().expect("collector pid");
    assert!(is_process_alive(collector_pid));

    feed(&mut sup, WorkerRole::IntProducer, "42\n");
    let line = wait_for_line(&log, &format!("int({int_pid})"));
    assert!(line.ends_with(": 42"), "unexpected line {line}");

    let StartOutcome::Started { pid: text_pid } = sup
        .start_worker(WorkerRole::StringProducer, settings())
        .expect("start string producer")
    else {
        panic!("string producer should start fresh");
    };
    assert_eq!(sup.collector_pid(), Some(collector_pid));

    feed(&mut sup, WorkerRole::StringProducer, "hello\n");
    let line = wait_for_line(&log, &format!("text({text_pid})"));
    assert!(line.ends_with(": hello"), "unexpected line {line}");

    assert!(matches!(
        sup.stop_worker(WorkerRole::IntProducer),
        Ok(StopReport::Stopped {
            collector: None,
            ..
        })
    ));
    assert!(matches!(
        sup.stop_worker(WorkerRole::StringProducer),
        Ok(StopReport::Stopped {
            collector: Some(_),
            ..
        })
    ));

    assert_eq!(sup.collector_status(), ProcessStatus::Stopped);
    assert!(!is_process_alive(collector_pid));
    for path in ChannelPaths::in_dir(temp.path()).all() {
        wait_for_path_removed(path);
    }
    sup.request_exit().expect("exit permitted once everything stopped");
}

#[test]
fn worker_that_ends_its_input_is_reconciled() {
    let temp = tempdir().expect("failed to create tempdir");
    let mut sup = supervisor(&temp);

    sup.start_worker(WorkerRole::FloatProducer, settings())
        .expect("start float producer");
    let pid = sup
        .worker_pid(WorkerRole::FloatProducer)
        .expect("float producer pid");

    // Invalid input terminates the worker on its own.
    feed(&mut sup, WorkerRole::FloatProducer, "not-a-float\n");
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while is_process_alive(pid) && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }

    let report = sup.status();
    assert_eq!(
        report.workers[1],
        (WorkerRole::FloatProducer, ProcessStatus::Stopped, None)
    );
    assert_eq!(report.collector.0, ProcessStatus::Running);

    sup.request_exit().expect("leftover collector is stopped on exit");
    assert_eq!(sup.collector_status(), ProcessStatus::Stopped);
}

#[test]
fn shutdown_stops_every_process() {
    let temp = tempdir().expect("failed to create tempdir");
    let mut sup = supervisor(&temp);

    sup.start_worker(WorkerRole::IntProducer, settings())
        .expect("start int producer");
    sup.start_worker(WorkerRole::FloatProducer, settings())
        .expect("start float producer");
    let pids: Vec<u32> = [
        sup.worker_pid(WorkerRole::IntProducer),
        sup.worker_pid(WorkerRole::FloatProducer),
        sup.collector_pid(),
    ]
    .into_iter()
    .flatten()
    .collect();
    assert_eq!(pids.len(), 3);

    assert!(sup.request_exit().is_err());
    sup.shutdown().expect("shutdown");
    for pid in pids {
        assert!(!is_process_alive(pid), "PID {pid} still alive");
    }
}

#[test]
fn console_exits_cleanly_with_nothing_running() {
    let temp = tempdir().expect("failed to create tempdir");
    Command::new(assert_cmd::cargo::cargo_bin!("muxlog-supervisor"))
        .arg("--runtime-dir")
        .arg(temp.path())
        .current_dir(temp.path())
        .write_stdin("8\n7\n")
        .timeout(Duration::from_secs(10))
        .assert()
        .success()
        .stdout(contains("collector        stopped"))
        .stdout(contains("Exiting."));
}

#[test]
fn console_rejects_bad_input_and_shuts_down_at_eof() {
    let temp = tempdir().expect("failed to create tempdir");
    Command::new(assert_cmd::cargo::cargo_bin!("muxlog-supervisor"))
        .arg("--runtime-dir")
        .arg(temp.path())
        .current_dir(temp.path())
        .write_stdin("9\n1\n8\n0\n0\n")
        .timeout(Duration::from_secs(10))
        .assert()
        .success()
        .stdout(contains("invalid option '9'"))
        .stdout(contains("Input error"))
        .stdout(contains("Input closed; shutting down."));
}

#[test]
fn console_reports_a_missing_config_file() {
    let temp = tempdir().expect("failed to create tempdir");
    Command::new(assert_cmd::cargo::cargo_bin!("muxlog-supervisor"))
        .arg("--config")
        .arg(temp.path().join("absent.yaml"))
        .write_stdin("7\n")
        .assert()
        .failure()
        .stderr(contains("Failed to read config file"));
}
