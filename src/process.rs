//! Process capability set used by the supervisor: launch, probe, stop, kill.
//!
//! The supervisor only talks to [`Launcher`] and [`ProcessHandle`], so its state machine can
//! be exercised against fakes. [`CommandLauncher`] and [`ChildProcess`] are the real thing.
use std::{
    fmt, io,
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tracing::{debug, warn};

use crate::config::{SupervisorConfig, WorkerSettings};
use crate::constants::{COLLECTOR_BIN, PROCESS_CHECK_INTERVAL};
use crate::error::LifecycleError;
use crate::supervisor::WorkerRole;

/// Result of asking a process to terminate gracefully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDelivery {
    Delivered,
    /// The process was already gone.
    AlreadyExited,
}

/// How a process ended up stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// It had exited before the stop request.
    AlreadyExited,
    /// It honored the graceful request in time.
    Terminated,
    /// It had to be forcibly killed.
    Killed,
}

/// A running child process.
pub trait ProcessHandle {
    fn pid(&self) -> u32;

    /// Non-blocking liveness probe. Reaps the process if it has exited.
    fn has_exited(&mut self) -> io::Result<bool>;

    /// Requests graceful termination.
    fn terminate(&mut self) -> io::Result<SignalDelivery>;

    /// Waits up to `timeout` for the process to exit. Returns whether it did.
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Forces termination and blocks until the process is gone.
    fn kill(&mut self) -> io::Result<()>;
}

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    Collector { log_file: PathBuf },
    Worker { role: WorkerRole, settings: WorkerSettings },
}

impl fmt::Display for LaunchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchTarget::Collector { .. } => f.write_str("collector"),
            LaunchTarget::Worker { role, .. } => write!(f, "{role}"),
        }
    }
}

/// Something that can start processes.
pub trait Launcher {
    type Handle: ProcessHandle;

    fn launch(&mut self, target: &LaunchTarget) -> io::Result<Self::Handle>;
}

/// Stops a process: graceful request first, forced kill if it does not exit within
/// `timeout` or the request cannot be delivered.
pub fn stop_process<H>(
    handle: &mut H,
    label: &str,
    timeout: Duration,
) -> Result<StopOutcome, LifecycleError>
where
    H: ProcessHandle + ?Sized,
{
    let pid = handle.pid();
    match handle.terminate() {
        Ok(SignalDelivery::AlreadyExited) => {
            debug!("{label} (PID {pid}) exited before SIGTERM could be delivered");
            return Ok(StopOutcome::AlreadyExited);
        }
        Ok(SignalDelivery::Delivered) => {
            debug!("Sent SIGTERM to {label} (PID {pid})");
            match handle.wait_timeout(timeout) {
                Ok(true) => return Ok(StopOutcome::Terminated),
                Ok(false) => warn!("{label} (PID {pid}) did not exit after SIGTERM; sending SIGKILL"),
                Err(err) => warn!("Failed to wait for {label} (PID {pid}): {err}; sending SIGKILL"),
            }
        }
        Err(err) => warn!("Failed to signal {label} (PID {pid}): {err}; sending SIGKILL"),
    }

    handle.kill().map_err(|source| LifecycleError::StopFailed {
        target: label.to_string(),
        source,
    })?;
    Ok(StopOutcome::Killed)
}

/// A [`ProcessHandle`] over a spawned [`Child`].
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self { child }
    }

    /// The write end of the child's stdin when it was launched with a pipe.
    pub fn stdin(&mut self) -> Option<&mut ChildStdin> {
        self.child.stdin.as_mut()
    }
}

impl ProcessHandle for ChildProcess {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn has_exited(&mut self) -> io::Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }

    fn terminate(&mut self) -> io::Result<SignalDelivery> {
        if self.has_exited()? {
            return Ok(SignalDelivery::AlreadyExited);
        }
        let pid = Pid::from_raw(self.child.id() as i32);
        match signal::kill(pid, Signal::SIGTERM) {
            Ok(()) => Ok(SignalDelivery::Delivered),
            Err(Errno::ESRCH) => Ok(SignalDelivery::AlreadyExited),
            Err(errno) => Err(io::Error::from_raw_os_error(errno as i32)),
        }
    }

    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.child.try_wait()?.is_some() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(PROCESS_CHECK_INTERVAL);
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        if self.has_exited()? {
            return Ok(());
        }
        self.child.kill()?;
        let status = self.child.wait()?;
        debug!("PID {} reaped with {status}", self.child.id());
        Ok(())
    }
}

/// Launches the muxlog binaries that sit next to each other on disk.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    bin_dir: PathBuf,
    runtime_dir: PathBuf,
    log_level: Option<String>,
    piped_stdin: bool,
}

impl CommandLauncher {
    pub fn new(bin_dir: impl Into<PathBuf>, runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            runtime_dir: runtime_dir.into(),
            log_level: None,
            piped_stdin: false,
        }
    }

    /// Uses the configured binary directory, or the directory of the running executable.
    pub fn from_config(config: &SupervisorConfig) -> io::Result<Self> {
        let bin_dir = match &config.bin_dir {
            Some(dir) => dir.clone(),
            None => sibling_dir()?,
        };
        Ok(Self::new(bin_dir, config.runtime_dir.clone()))
    }

    /// Forwards a log level to every child.
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Gives workers a pipe for stdin instead of the supervisor's terminal.
    pub fn with_piped_stdin(mut self) -> Self {
        self.piped_stdin = true;
        self
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    /// Builds the command for `target` without spawning it.
    pub fn command(&self, target: &LaunchTarget) -> Command {
        let binary = match target {
            LaunchTarget::Collector { .. } => COLLECTOR_BIN,
            LaunchTarget::Worker { role, .. } => role.binary_name(),
        };
        let mut cmd = Command::new(self.bin_dir.join(binary));
        cmd.arg("--runtime-dir").arg(&self.runtime_dir);
        if let Some(level) = &self.log_level {
            cmd.arg("--log-level").arg(level);
        }

        match target {
            LaunchTarget::Collector { log_file } => {
                cmd.arg(log_file);
                cmd.stdin(Stdio::null());
            }
            LaunchTarget::Worker { settings, .. } => {
                cmd.args(settings.to_args());
                if self.piped_stdin {
                    cmd.stdin(Stdio::piped());
                } else {
                    cmd.stdin(Stdio::inherit());
                }
            }
        }
        cmd
    }
}

impl Launcher for CommandLauncher {
    type Handle = ChildProcess;

    fn launch(&mut self, target: &LaunchTarget) -> io::Result<ChildProcess> {
        let mut cmd = self.command(target);
        debug!("Launching {target}: {cmd:?}");

        #[cfg(target_os = "linux")]
        {
            use std::os::unix::process::CommandExt;

            // Children follow the supervisor down.
            unsafe {
                cmd.pre_exec(|| {
                    use libc::{PR_SET_PDEATHSIG, SIGTERM, prctl};
                    if prctl(PR_SET_PDEATHSIG, SIGTERM, 0, 0, 0) < 0 {
                        let err = io::Error::last_os_error();
                        eprintln!("muxlog pre_exec: prctl PR_SET_PDEATHSIG failed: {err:?}");
                        return Err(err);
                    }
                    Ok(())
                });
            }
        }

        let child = cmd.spawn()?;
        debug!("{target} started with PID {}", child.id());
        Ok(ChildProcess::new(child))
    }
}

fn sibling_dir() -> io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    exe.parent().map(Path::to_path_buf).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("executable {exe:?} has no parent directory"),
        )
    })
}
