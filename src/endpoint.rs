//! Channel endpoints: the collector's server side and the workers' client side.
use std::{
    fs::{self, File, OpenOptions},
    io::{self, ErrorKind, Read, Write},
    os::{
        fd::{AsFd, BorrowedFd},
        unix::{
            fs::{FileTypeExt, OpenOptionsExt, PermissionsExt},
            net::{UnixListener, UnixStream},
        },
    },
    path::Path,
    thread,
    time::Duration,
};

use nix::{sys::stat::Mode, unistd::mkfifo};
use strum_macros::{AsRefStr, Display};
use tracing::{debug, warn};

use crate::constants::{CONNECT_ATTEMPTS, CONNECT_BACKOFF, FIFO_MODE};
use crate::error::CollectorError;
use crate::record::RecordKind;

/// What a collector endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum EndpointKind {
    IntFifo,
    FloatFifo,
    SocketListener,
    SocketClient,
}

impl EndpointKind {
    /// The record kind carried by this endpoint, if it carries data at all.
    pub fn record_kind(self) -> Option<RecordKind> {
        match self {
            EndpointKind::IntFifo => Some(RecordKind::Int),
            EndpointKind::FloatFifo => Some(RecordKind::Float),
            EndpointKind::SocketClient => Some(RecordKind::Text),
            EndpointKind::SocketListener => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum EndpointState {
    Unbound,
    Listening,
    Open,
    Closed,
}

/// The descriptor owned by an endpoint.
#[derive(Debug)]
enum Channel {
    Fifo(File),
    Listener(UnixListener),
    Client(UnixStream),
}

/// One communication resource owned by the collector.
#[derive(Debug)]
pub struct Endpoint {
    kind: EndpointKind,
    state: EndpointState,
    channel: Option<Channel>,
}

/// Result of one fixed-size read attempt.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Exactly one record worth of bytes.
    Full(Vec<u8>),
    /// The peer closed its end.
    Closed,
    /// Fewer bytes than a record.
    Partial(usize),
    /// Nothing to read right now.
    WouldBlock,
    /// A hard I/O error.
    Failed(io::Error),
}

impl Endpoint {
    /// Creates (or reuses) the FIFO at `path` and opens it read-only and non-blocking.
    pub fn open_fifo(kind: EndpointKind, path: &Path) -> Result<Self, CollectorError> {
        debug_assert!(matches!(
            kind,
            EndpointKind::IntFifo | EndpointKind::FloatFifo
        ));

        let mut endpoint = Self::unbound(kind);
        match mkfifo(path, Mode::from_bits_truncate(FIFO_MODE)) {
            Ok(()) => debug!("Created FIFO {:?}", path),
            Err(nix::errno::Errno::EEXIST) => {
                let is_fifo = fs::metadata(path)
                    .map(|meta| meta.file_type().is_fifo())
                    .unwrap_or(false);
                if !is_fifo {
                    return Err(CollectorError::FifoCreate {
                        path: path.to_path_buf(),
                        source: io::Error::new(
                            ErrorKind::AlreadyExists,
                            "path exists and is not a FIFO",
                        ),
                    });
                }
                debug!("Reusing existing FIFO {:?}", path);
            }
            Err(errno) => {
                return Err(CollectorError::FifoCreate {
                    path: path.to_path_buf(),
                    source: errno.into(),
                });
            }
        }

        // mkfifo is subject to the umask.
        if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(FIFO_MODE)) {
            warn!("Failed to relax permissions on {:?}: {err}", path);
        }

        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| CollectorError::FifoOpen {
                path: path.to_path_buf(),
                source,
            })?;

        endpoint.channel = Some(Channel::Fifo(file));
        endpoint.state = EndpointState::Open;
        Ok(endpoint)
    }

    /// Binds a non-blocking Unix stream listener at `path`, replacing a stale socket file.
    pub fn listen(path: &Path) -> Result<Self, CollectorError> {
        let wrap = |source: io::Error| CollectorError::SocketListen {
            path: path.to_path_buf(),
            source,
        };

        match fs::remove_file(path) {
            Ok(()) => debug!("Removed stale socket {:?}", path),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(wrap(err)),
        }

        let listener = UnixListener::bind(path).map_err(wrap)?;
        listener.set_nonblocking(true).map_err(wrap)?;

        let mut endpoint = Self::unbound(EndpointKind::SocketListener);
        endpoint.channel = Some(Channel::Listener(listener));
        endpoint.state = EndpointState::Listening;
        Ok(endpoint)
    }

    /// Wraps an accepted connection as the client endpoint.
    pub fn client(stream: UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            kind: EndpointKind::SocketClient,
            state: EndpointState::Open,
            channel: Some(Channel::Client(stream)),
        })
    }

    fn unbound(kind: EndpointKind) -> Self {
        Self {
            kind,
            state: EndpointState::Unbound,
            channel: None,
        }
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// Whether the endpoint still owns a descriptor worth watching.
    pub fn is_live(&self) -> bool {
        self.channel.is_some()
    }

    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.channel.as_ref().map(|channel| match channel {
            Channel::Fifo(file) => file.as_fd(),
            Channel::Listener(listener) => listener.as_fd(),
            Channel::Client(stream) => stream.as_fd(),
        })
    }

    /// Accepts one pending connection on a listener endpoint.
    pub fn accept(&self) -> io::Result<Option<UnixStream>> {
        match &self.channel {
            Some(Channel::Listener(listener)) => match listener.accept() {
                Ok((stream, _addr)) => Ok(Some(stream)),
                Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
                Err(err) => Err(err),
            },
            _ => Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{} endpoint cannot accept", self.kind),
            )),
        }
    }

    /// Reads exactly one record's worth of bytes in a single call.
    pub fn read_record(&mut self) -> ReadOutcome {
        let Some(record_kind) = self.kind.record_kind() else {
            return ReadOutcome::Failed(io::Error::new(
                ErrorKind::InvalidInput,
                "listener endpoints carry no records",
            ));
        };
        let expected = record_kind.wire_size();
        let mut buf = vec![0u8; expected];

        let result = match self.channel.as_mut() {
            Some(Channel::Fifo(file)) => read_interrupted(file, &mut buf),
            Some(Channel::Client(stream)) => read_interrupted(stream, &mut buf),
            Some(Channel::Listener(_)) | None => {
                return ReadOutcome::Failed(io::Error::new(
                    ErrorKind::NotConnected,
                    "endpoint is not open",
                ));
            }
        };

        match result {
            Ok(0) => ReadOutcome::Closed,
            Ok(n) if n == expected => ReadOutcome::Full(buf),
            Ok(n) => ReadOutcome::Partial(n),
            Err(err) if err.kind() == ErrorKind::WouldBlock => ReadOutcome::WouldBlock,
            Err(err) => ReadOutcome::Failed(err),
        }
    }

    /// Closes the descriptor and marks the endpoint closed. Returns `false` if it already was.
    pub fn retire(&mut self) -> bool {
        if self.channel.take().is_none() {
            return false;
        }
        self.state = EndpointState::Closed;
        true
    }
}

fn read_interrupted(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Removes a filesystem-backed endpoint path, treating "already removed" as success.
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Bounded retry policy for workers reaching a collector that may still be starting.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: CONNECT_ATTEMPTS,
            backoff: CONNECT_BACKOFF,
        }
    }
}

fn with_retries<T>(
    policy: RetryPolicy,
    path: &Path,
    retryable: impl Fn(&io::Error) -> bool,
    mut attempt: impl FnMut() -> io::Result<T>,
) -> io::Result<T> {
    let attempts = policy.attempts.max(1);
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt() {
            Ok(value) => return Ok(value),
            Err(err) if retryable(&err) && tries < attempts => {
                warn!(
                    "{:?} not ready ({err}); retrying in {:?} ({tries}/{attempts})",
                    path, policy.backoff
                );
                thread::sleep(policy.backoff);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Opens a FIFO write-only. A missing path or a missing reader is retried.
pub fn open_fifo_writer(path: &Path, policy: RetryPolicy) -> io::Result<File> {
    with_retries(
        policy,
        path,
        |err| {
            err.kind() == ErrorKind::NotFound || err.raw_os_error() == Some(libc::ENXIO)
        },
        || {
            OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(path)
        },
    )
}

/// Connects to the collector socket. A missing path or refused connection is retried.
pub fn connect_socket(path: &Path, policy: RetryPolicy) -> io::Result<UnixStream> {
    with_retries(
        policy,
        path,
        |err| matches!(err.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused),
        || UnixStream::connect(path),
    )
}

/// Writes one encoded record. A short write is reported as the number of bytes written.
pub fn send_record(writer: &mut impl Write, bytes: &[u8]) -> io::Result<usize> {
    loop {
        match writer.write(bytes) {
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}
