//! Lifecycle state machine for the workers and the collector they depend on.
//!
//! The collector is started on demand by the first worker start and stopped when the last
//! worker stops. Every operation runs on the caller's thread and blocks until the process
//! transition it requested has been confirmed.
use std::{
    fmt,
    path::Path,
    thread,
    time::{Duration, Instant},
};

use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter};
use tracing::{debug, error, info, warn};

use crate::config::{ChannelPaths, SupervisorConfig, WorkerSettings};
use crate::constants::{
    FLOAT_WORKER_BIN, INT_WORKER_BIN, PROCESS_CHECK_INTERVAL, STRING_WORKER_BIN,
};
use crate::endpoint::remove_path;
use crate::error::LifecycleError;
use crate::process::{LaunchTarget, Launcher, ProcessHandle, StopOutcome, stop_process};
use crate::record::RecordKind;

/// The three worker roles, one per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum WorkerRole {
    IntProducer,
    FloatProducer,
    StringProducer,
}

impl WorkerRole {
    pub const fn binary_name(self) -> &'static str {
        match self {
            WorkerRole::IntProducer => INT_WORKER_BIN,
            WorkerRole::FloatProducer => FLOAT_WORKER_BIN,
            WorkerRole::StringProducer => STRING_WORKER_BIN,
        }
    }

    pub const fn record_kind(self) -> RecordKind {
        match self {
            WorkerRole::IntProducer => RecordKind::Int,
            WorkerRole::FloatProducer => RecordKind::Float,
            WorkerRole::StringProducer => RecordKind::Text,
        }
    }

    /// The channel this role writes to.
    pub fn channel_path(self, paths: &ChannelPaths) -> &Path {
        match self {
            WorkerRole::IntProducer => &paths.int_fifo,
            WorkerRole::FloatProducer => &paths.float_fifo,
            WorkerRole::StringProducer => &paths.socket,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ProcessStatus {
    Stopped,
    /// Launched, channels not yet confirmed. Only the collector passes through here.
    Starting,
    Running,
}

/// A supervised process slot.
#[derive(Debug)]
struct Slot<H> {
    handle: Option<H>,
    status: ProcessStatus,
}

impl<H: ProcessHandle> Slot<H> {
    fn empty() -> Self {
        Self {
            handle: None,
            status: ProcessStatus::Stopped,
        }
    }

    fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(ProcessHandle::pid)
    }

    fn is_running(&self) -> bool {
        self.handle.is_some() && self.status == ProcessStatus::Running
    }

    fn record(&mut self, handle: H, status: ProcessStatus) {
        self.handle = Some(handle);
        self.status = status;
    }

    fn clear(&mut self) {
        self.handle = None;
        self.status = ProcessStatus::Stopped;
    }

    /// Clears the slot if its process is gone. Returns whether it was cleared.
    fn reconcile(&mut self, label: &str) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return false;
        };
        let pid = handle.pid();
        match handle.has_exited() {
            Ok(false) => false,
            Ok(true) => {
                info!("{label} (PID {pid}) is no longer running");
                self.clear();
                true
            }
            Err(err) => {
                warn!("Failed to probe {label} (PID {pid}): {err}; marking it stopped");
                self.clear();
                true
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    AlreadyRunning { pid: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReport {
    NotRunning,
    Stopped {
        worker: StopOutcome,
        /// Set when this stop also took the collector down.
        collector: Option<StopOutcome>,
    },
}

/// Point-in-time view of every supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub workers: Vec<(WorkerRole, ProcessStatus, Option<u32>)>,
    pub collector: (ProcessStatus, Option<u32>),
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn line(
            f: &mut fmt::Formatter<'_>,
            name: &str,
            status: ProcessStatus,
            pid: Option<u32>,
        ) -> fmt::Result {
            match pid {
                Some(pid) => writeln!(f, "  {name:<16} {status} (PID {pid})"),
                None => writeln!(f, "  {name:<16} {status}"),
            }
        }

        for (role, status, pid) in &self.workers {
            line(f, role.as_ref(), *status, *pid)?;
        }
        let (status, pid) = self.collector;
        line(f, "collector", status, pid)
    }
}

pub struct Supervisor<L: Launcher> {
    launcher: L,
    config: SupervisorConfig,
    paths: ChannelPaths,
    collector: Slot<L::Handle>,
    workers: Vec<Slot<L::Handle>>,
}

impl<L: Launcher> Supervisor<L> {
    pub fn new(launcher: L, config: SupervisorConfig) -> Self {
        let paths = config.channel_paths();
        Self {
            launcher,
            config,
            paths,
            collector: Slot::empty(),
            workers: WorkerRole::iter().map(|_| Slot::empty()).collect(),
        }
    }

    pub fn worker_status(&self, role: WorkerRole) -> ProcessStatus {
        self.workers[role.index()].status
    }

    pub fn worker_pid(&self, role: WorkerRole) -> Option<u32> {
        self.workers[role.index()].pid()
    }

    /// Direct access to a running worker's handle.
    pub fn worker_handle_mut(&mut self, role: WorkerRole) -> Option<&mut L::Handle> {
        self.workers[role.index()].handle.as_mut()
    }

    pub fn collector_status(&self) -> ProcessStatus {
        self.collector.status
    }

    pub fn collector_pid(&self) -> Option<u32> {
        self.collector.pid()
    }

    /// Roles whose worker is currently recorded as running.
    pub fn running_roles(&self) -> Vec<WorkerRole> {
        WorkerRole::iter()
            .filter(|role| self.workers[role.index()].is_running())
            .collect()
    }

    /// Starts `role`, bringing the collector up first if needed.
    pub fn start_worker(
        &mut self,
        role: WorkerRole,
        settings: WorkerSettings,
    ) -> Result<StartOutcome, LifecycleError> {
        self.reconcile();
        if let Some(pid) = self.workers[role.index()].pid() {
            info!("{role} is already running (PID {pid})");
            return Ok(StartOutcome::AlreadyRunning { pid });
        }

        self.ensure_collector(role)?;

        let target = LaunchTarget::Worker { role, settings };
        let handle = self.launcher.launch(&target).map_err(|source| {
            error!("Failed to start {role}: {source}");
            LifecycleError::SpawnFailed {
                target: role.to_string(),
                source,
            }
        })?;
        let pid = handle.pid();
        self.workers[role.index()].record(handle, ProcessStatus::Running);
        info!("Started {role} (PID {pid})");
        Ok(StartOutcome::Started { pid })
    }

    fn ensure_collector(&mut self, role: WorkerRole) -> Result<(), LifecycleError> {
        if self.collector.is_running() {
            return Ok(());
        }

        info!("Collector not running; starting it before {role}");
        self.remove_stale_channels();
        let target = LaunchTarget::Collector {
            log_file: self.config.log_file.clone(),
        };
        let handle = self.launcher.launch(&target).map_err(|source| {
            error!("Failed to start collector: {source}");
            LifecycleError::SpawnFailed {
                target: target.to_string(),
                source,
            }
        })?;
        let pid = handle.pid();
        self.collector.record(handle, ProcessStatus::Starting);
        debug!("Collector launched (PID {pid}); waiting for its channels");

        if self.await_collector() {
            self.collector.status = ProcessStatus::Running;
            info!("Collector running (PID {pid})");
            Ok(())
        } else {
            error!("Collector (PID {pid}) failed to start; not starting {role}");
            self.collector.clear();
            Err(LifecycleError::CollectorUnavailable { role })
        }
    }

    /// Channels left behind by a collector that never cleaned up would satisfy the grace
    /// wait before the new collector has opened anything.
    fn remove_stale_channels(&self) {
        for path in self.paths.all() {
            if path.exists() {
                debug!("Removing stale channel {:?}", path);
            }
            if let Err(err) = remove_path(path) {
                warn!("Failed to remove stale channel {:?}: {err}", path);
            }
        }
    }

    /// Waits up to the grace period for the collector's channels, then confirms it is alive.
    fn await_collector(&mut self) -> bool {
        let deadline = Instant::now() + self.config.grace_period;
        let Some(handle) = self.collector.handle.as_mut() else {
            return false;
        };

        loop {
            match handle.has_exited() {
                Ok(false) => {}
                Ok(true) => return false,
                Err(err) => {
                    warn!("Failed to probe collector: {err}");
                    return false;
                }
            }
            if self.paths.all_present() {
                return true;
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(PROCESS_CHECK_INTERVAL);
        }

        match handle.has_exited() {
            Ok(false) => {
                warn!(
                    "Collector alive but channels missing after {:?}",
                    self.config.grace_period
                );
                true
            }
            _ => false,
        }
    }

    /// Stops `role`, then the collector if no worker is left running.
    pub fn stop_worker(&mut self, role: WorkerRole) -> Result<StopReport, LifecycleError> {
        self.reconcile();
        let timeout = self.config.worker_stop_timeout;
        let slot = &mut self.workers[role.index()];
        let Some(handle) = slot.handle.as_mut() else {
            info!("{role} is not running");
            return Ok(StopReport::NotRunning);
        };

        let label = role.to_string();
        let worker = stop_process(handle, &label, timeout)?;
        slot.clear();
        info!("Stopped {role} ({worker:?})");

        let collector = if self.running_roles().is_empty() {
            info!("No workers running; stopping collector");
            self.stop_collector()?
        } else {
            None
        };
        Ok(StopReport::Stopped { worker, collector })
    }

    fn stop_collector(&mut self) -> Result<Option<StopOutcome>, LifecycleError> {
        let timeout = self.config.collector_stop_timeout;
        let Some(handle) = self.collector.handle.as_mut() else {
            return Ok(None);
        };
        let outcome = stop_process(handle, "collector", timeout)?;
        self.collector.clear();
        info!("Stopped collector ({outcome:?})");
        Ok(Some(outcome))
    }

    /// Permits exit only with every worker stopped, stopping a leftover collector first.
    pub fn request_exit(&mut self) -> Result<(), LifecycleError> {
        self.reconcile();
        let roles = self.running_roles();
        if !roles.is_empty() {
            warn!("Refusing to exit while workers are running: {roles:?}");
            return Err(LifecycleError::WorkersRunning { roles });
        }

        if let Err(err) = self.stop_collector() {
            error!("{err}");
            return Err(LifecycleError::CollectorStillRunning);
        }
        if self.collector.handle.is_some() {
            return Err(LifecycleError::CollectorStillRunning);
        }
        Ok(())
    }

    /// Stops every worker, then the collector. Keeps going past individual failures and
    /// reports the first one.
    pub fn shutdown(&mut self) -> Result<(), LifecycleError> {
        self.reconcile();
        let mut first_error = None;

        for role in WorkerRole::iter() {
            let timeout = self.config.worker_stop_timeout;
            let slot = &mut self.workers[role.index()];
            let Some(handle) = slot.handle.as_mut() else {
                continue;
            };
            match stop_process(handle, role.as_ref(), timeout) {
                Ok(outcome) => {
                    slot.clear();
                    info!("Stopped {role} ({outcome:?})");
                }
                Err(err) => {
                    error!("{err}");
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Err(err) = self.stop_collector() {
            error!("{err}");
            first_error.get_or_insert(err);
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Clears every recorded process that has exited on its own.
    pub fn reconcile(&mut self) {
        for role in WorkerRole::iter() {
            self.workers[role.index()].reconcile(role.as_ref());
        }
        self.collector.reconcile("collector");
    }

    pub fn status(&mut self) -> StatusReport {
        self.reconcile();
        StatusReport {
            workers: WorkerRole::iter()
                .map(|role| {
                    let slot = &self.workers[role.index()];
                    (role, slot.status, slot.pid())
                })
                .collect(),
            collector: (self.collector.status, self.collector.pid()),
        }
    }
}
