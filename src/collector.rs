//! The collector: owns every channel endpoint, waits for readiness on all of them and
//! records whatever arrives.
//!
//! The loop is single-threaded and only ever blocks inside the bounded readiness wait.
//! Shutdown is level-triggered: a signal handler stores `true` into the flag returned by
//! [`Collector::shutdown_flag`], and the loop notices at its next wait boundary.
use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use nix::{
    errno::Errno,
    poll::{PollFd, PollFlags, PollTimeout, poll},
};
use tracing::{debug, error, info, warn};

use crate::config::ChannelPaths;
use crate::constants::POLL_TIMEOUT;
use crate::endpoint::{Endpoint, EndpointKind, EndpointState, ReadOutcome, remove_path};
use crate::error::CollectorError;
use crate::record::Record;
use crate::sink::LogSink;

/// Why an endpoint was retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireReason {
    /// Zero-byte read: the peer closed its end.
    PeerClosed,
    /// Hangup, error or invalid-descriptor readiness on a connected client.
    Hangup,
    /// A hard I/O error.
    Failed,
}

/// Something observable that happened during one readiness pass.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectorEvent {
    Record(Record),
    Accepted,
    Rejected,
    PartialRead { kind: EndpointKind, bytes: usize },
    Retired { kind: EndpointKind, reason: RetireReason },
}

/// Why the event loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// A shutdown was requested.
    Signalled,
    /// Every endpoint, listener included, has been retired.
    Drained,
}

pub struct Collector {
    paths: ChannelPaths,
    endpoints: Vec<Endpoint>,
    sink: LogSink,
    shutdown: Arc<AtomicBool>,
    poll_timeout: Duration,
    cleaned_up: bool,
}

impl Collector {
    /// Opens the log, then every endpoint. Any failure releases what was already created.
    pub fn start(paths: ChannelPaths, log_file: impl AsRef<Path>) -> Result<Self, CollectorError> {
        Self::start_with_shutdown(paths, log_file, Arc::new(AtomicBool::new(false)))
    }

    /// Like [`Collector::start`], observing a shutdown flag whose signal handler is already
    /// installed, so a signal that arrives while channels are being created is not lost.
    pub fn start_with_shutdown(
        paths: ChannelPaths,
        log_file: impl AsRef<Path>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, CollectorError> {
        let sink = LogSink::open(log_file)?;
        let mut collector = Self {
            paths,
            endpoints: Vec::with_capacity(4),
            sink,
            shutdown,
            poll_timeout: POLL_TIMEOUT,
            cleaned_up: false,
        };

        collector.note(format!("Collector started (PID: {})", std::process::id()));
        if let Err(err) = collector.open_endpoints() {
            error!("Failed to initialize channels: {err}");
            collector.note(format!(
                "CRITICAL: failed to initialize channels: {err}. Terminating."
            ));
            collector.cleanup();
            return Err(err);
        }
        Ok(collector)
    }

    fn open_endpoints(&mut self) -> Result<(), CollectorError> {
        let fifos = [
            (EndpointKind::IntFifo, self.paths.int_fifo.clone()),
            (EndpointKind::FloatFifo, self.paths.float_fifo.clone()),
        ];
        for (kind, path) in fifos {
            let endpoint = Endpoint::open_fifo(kind, &path)?;
            info!("{kind} ready at {:?}", path);
            self.note(format!("{kind} ready at {}", path.display()));
            self.endpoints.push(endpoint);
        }

        let socket = self.paths.socket.clone();
        let listener = Endpoint::listen(&socket)?;
        info!("Socket listening at {:?}", socket);
        self.note(format!("Socket listening at {}", socket.display()));
        self.endpoints.push(listener);
        Ok(())
    }

    /// Overrides the readiness wait bound.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// The flag a signal handler sets to request shutdown.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn log_path(&self) -> &Path {
        self.sink.path()
    }

    pub fn channel_paths(&self) -> &ChannelPaths {
        &self.paths
    }

    /// Number of endpoints still being watched.
    pub fn live_count(&self) -> usize {
        self.endpoints.iter().filter(|e| e.is_live()).count()
    }

    /// State of the first endpoint of `kind`, if one exists.
    pub fn endpoint_state(&self, kind: EndpointKind) -> Option<EndpointState> {
        self.endpoints
            .iter()
            .find(|e| e.kind() == kind)
            .map(Endpoint::state)
    }

    fn client_occupied(&self) -> bool {
        self.endpoints
            .iter()
            .any(|e| e.kind() == EndpointKind::SocketClient && e.is_live())
    }

    /// Runs until shutdown is requested or nothing is left to serve.
    pub fn run(&mut self) -> Result<LoopExit, CollectorError> {
        self.note(format!(
            "Entering event loop with {} descriptors",
            self.live_count()
        ));

        let exit = loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested; leaving event loop");
                break LoopExit::Signalled;
            }
            if self.live_count() == 0 {
                info!("No active channels left; leaving event loop");
                self.note("No active channels left. Exiting loop.");
                break LoopExit::Drained;
            }
            if let Err(err) = self.poll_once(self.poll_timeout) {
                error!("{err}");
                self.note(format!("CRITICAL: {err}"));
                return Err(err);
            }
        };

        self.note("Exited event loop");
        Ok(exit)
    }

    /// One readiness wait followed by handling every endpoint that became ready.
    pub fn poll_once(&mut self, timeout: Duration) -> Result<Vec<CollectorEvent>, CollectorError> {
        let ready = {
            let watched: Vec<(usize, PollFd<'_>)> = self
                .endpoints
                .iter()
                .enumerate()
                .filter_map(|(idx, endpoint)| {
                    endpoint.fd().map(|fd| (idx, PollFd::new(fd, PollFlags::POLLIN)))
                })
                .collect();
            let (indices, mut fds): (Vec<usize>, Vec<PollFd<'_>>) = watched.into_iter().unzip();

            let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
            match poll(&mut fds, PollTimeout::from(millis)) {
                Ok(0) => return Ok(Vec::new()),
                Ok(_) => {}
                Err(Errno::EINTR) => return Ok(Vec::new()),
                Err(errno) => return Err(CollectorError::Poll(errno)),
            }

            indices
                .into_iter()
                .zip(fds.iter())
                .filter_map(|(idx, fd)| {
                    fd.revents()
                        .filter(|revents| !revents.is_empty())
                        .map(|revents| (idx, revents))
                })
                .collect::<Vec<_>>()
        };

        let mut events = Vec::new();
        for (idx, revents) in ready {
            self.dispatch(idx, revents, &mut events);
        }

        // Accepted clients are appended; retired ones are dropped so the slot frees up.
        self.endpoints.retain(|endpoint| {
            endpoint.kind() != EndpointKind::SocketClient || endpoint.is_live()
        });
        Ok(events)
    }

    fn dispatch(&mut self, idx: usize, revents: PollFlags, events: &mut Vec<CollectorEvent>) {
        let kind = self.endpoints[idx].kind();

        if revents.contains(PollFlags::POLLNVAL) {
            warn!("{kind} descriptor is no longer valid");
            self.retire(idx, RetireReason::Failed, events);
            return;
        }

        match kind {
            EndpointKind::SocketListener => {
                if revents.intersects(PollFlags::POLLIN) {
                    self.accept(idx, events);
                } else if revents.intersects(PollFlags::POLLERR | PollFlags::POLLHUP) {
                    warn!("Listener reported {revents:?}");
                    self.retire(idx, RetireReason::Failed, events);
                }
            }
            EndpointKind::SocketClient => {
                if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
                    info!("Hangup on socket client connection");
                    self.note("Hangup on socket client connection");
                    self.retire(idx, RetireReason::Hangup, events);
                } else if revents.intersects(PollFlags::POLLIN) {
                    self.receive(idx, events);
                }
            }
            EndpointKind::IntFifo | EndpointKind::FloatFifo => {
                // A hangup with no buffered data reads as zero bytes.
                if revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
                {
                    self.receive(idx, events);
                }
            }
        }
    }

    fn accept(&mut self, idx: usize, events: &mut Vec<CollectorEvent>) {
        let occupied = self.client_occupied();
        let stream = match self.endpoints[idx].accept() {
            Ok(Some(stream)) => stream,
            Ok(None) => return,
            Err(err) => {
                warn!("Failed to accept socket connection: {err}");
                self.note(format!("Error accepting socket connection: {err}"));
                return;
            }
        };

        if occupied {
            info!("Rejecting extra socket connection; a client is already connected");
            self.note("Rejected extra socket connection");
            drop(stream);
            events.push(CollectorEvent::Rejected);
            return;
        }

        match Endpoint::client(stream) {
            Ok(client) => {
                info!("Accepted socket client connection");
                self.note("Accepted socket client connection");
                self.endpoints.push(client);
                events.push(CollectorEvent::Accepted);
            }
            Err(err) => {
                warn!("Failed to configure accepted connection: {err}");
                self.note(format!("Failed to configure accepted connection: {err}"));
            }
        }
    }

    fn receive(&mut self, idx: usize, events: &mut Vec<CollectorEvent>) {
        let kind = self.endpoints[idx].kind();
        let Some(record_kind) = kind.record_kind() else {
            return;
        };

        match self.endpoints[idx].read_record() {
            ReadOutcome::Full(bytes) => match Record::decode(record_kind, &bytes) {
                Ok(record) => {
                    info!("Received on {kind}: {record}");
                    if let Err(err) = self.sink.record(&record) {
                        error!("Failed to append record to log: {err}");
                    }
                    events.push(CollectorEvent::Record(record));
                }
                Err(err) => warn!("Discarding undecodable record on {kind}: {err}"),
            },
            ReadOutcome::Closed => {
                info!("{kind} closed by peer");
                self.note(format!("{kind} closed by peer (EOF)"));
                self.retire(idx, RetireReason::PeerClosed, events);
            }
            ReadOutcome::Partial(bytes) => {
                warn!(
                    "Partial read on {kind} ({bytes} of {} bytes)",
                    record_kind.wire_size()
                );
                self.note(format!("Warning: partial read on {kind} ({bytes} bytes)"));
                events.push(CollectorEvent::PartialRead { kind, bytes });
            }
            ReadOutcome::WouldBlock => debug!("Spurious readiness on {kind}"),
            ReadOutcome::Failed(err) => {
                error!("Error reading from {kind}: {err}");
                self.note(format!("Error reading from {kind}: {err}"));
                self.retire(idx, RetireReason::Failed, events);
            }
        }
    }

    fn retire(&mut self, idx: usize, reason: RetireReason, events: &mut Vec<CollectorEvent>) {
        let endpoint = &mut self.endpoints[idx];
        let kind = endpoint.kind();
        if endpoint.retire() {
            debug!("Retired {kind} ({reason:?})");
            events.push(CollectorEvent::Retired { kind, reason });
        }
    }

    fn note(&mut self, message: impl AsRef<str>) {
        if let Err(err) = self.sink.note(message.as_ref()) {
            debug!("Skipped log note: {err}");
        }
    }

    /// Closes every descriptor and the log, and removes the channel paths.
    /// Idempotent; also runs on drop.
    pub fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;

        info!("Cleaning up channel resources");
        self.note("Cleaning up channel resources");
        for endpoint in &mut self.endpoints {
            endpoint.retire();
        }
        self.endpoints.clear();
        self.sink.close();

        let paths: Vec<PathBuf> = self.paths.all().iter().map(|p| p.to_path_buf()).collect();
        for path in paths {
            if let Err(err) = remove_path(&path) {
                warn!("Failed to remove {:?}: {err}", path);
            }
        }
        info!("Cleanup complete");
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.cleanup();
    }
}
