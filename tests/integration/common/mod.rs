#![allow(dead_code)]

use std::{
    fs,
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use muxlog::config::ChannelPaths;
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid as NixPid,
};
use sysinfo::{Pid, ProcessesToUpdate, System};

pub const COLLECTOR: &str = "muxlog-collector";

/// Spawns the collector binary against `runtime_dir`, logging to `log_file`.
pub fn spawn_collector(runtime_dir: &Path, log_file: &Path) -> Child {
    Command::new(assert_cmd::cargo::cargo_bin!("muxlog-collector"))
        .arg(log_file)
        .arg("--runtime-dir")
        .arg(runtime_dir)
        .arg("--log-level")
        .arg("debug")
        .stdin(Stdio::null())
        .spawn()
        .expect("failed to spawn collector")
}

/// Spawns the collector and waits until all of its channels exist.
pub fn start_collector(runtime_dir: &Path, log_file: &Path) -> Child {
    let child = spawn_collector(runtime_dir, log_file);
    for path in ChannelPaths::in_dir(runtime_dir).all() {
        wait_for_path(path);
    }
    child
}

pub fn send_sigterm(pid: u32) {
    signal::kill(NixPid::from_raw(pid as i32), Signal::SIGTERM).expect("failed to signal");
}

pub fn wait_for_exit(child: &mut Child, timeout: Duration) -> ExitStatus {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().expect("failed to poll child") {
            return status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("Timed out waiting for PID {} to exit", child.id());
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Waits until some line of `path` contains `needle` and returns that line.
pub fn wait_for_line(path: &Path, needle: &str) -> String {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(content) = fs::read_to_string(path)
            && let Some(line) = content.lines().find(|line| line.contains(needle))
        {
            return line.to_string();
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for '{needle}' in {:?}", path);
        }

        thread::sleep(Duration::from_millis(100));
    }
}

pub fn wait_for_path(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for {:?} to exist", path);
}

pub fn wait_for_path_removed(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if !path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for {:?} to be removed", path);
}

pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
        .process(Pid::from_u32(pid))
        .is_some_and(|process| !matches!(process.status(), sysinfo::ProcessStatus::Zombie))
}
