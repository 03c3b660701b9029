//! Error handling for muxlog.
use std::{io, path::PathBuf};

use thiserror::Error;

use crate::record::RecordKind;
use crate::supervisor::WorkerRole;

/// Errors raised while encoding or decoding wire records.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    /// The buffer does not match the fixed wire size of its record kind.
    #[error("{kind} record must be {expected} bytes, got {actual}")]
    Length {
        /// The record kind implied by the endpoint.
        kind: RecordKind,
        /// The fixed wire size for `kind`.
        expected: usize,
        /// The number of bytes actually supplied.
        actual: usize,
    },
}

/// Resource-initialization errors. All of these are fatal to the collector.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The log file could not be opened for appending.
    #[error("Failed to open log file {path:?}: {source}")]
    LogOpen {
        /// Path of the requested log file.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Another collector already holds the log file.
    #[error("Log file {path:?} is locked by another collector")]
    LogLocked {
        /// Path of the contended log file.
        path: PathBuf,
    },

    /// A FIFO could not be created at its well-known path.
    #[error("Failed to create FIFO {path:?}: {source}")]
    FifoCreate {
        /// The FIFO path.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// A FIFO exists but could not be opened for reading.
    #[error("Failed to open FIFO {path:?} for reading: {source}")]
    FifoOpen {
        /// The FIFO path.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The listening socket could not be bound or configured.
    #[error("Failed to listen on socket {path:?}: {source}")]
    SocketListen {
        /// The socket path.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The readiness wait itself failed.
    #[error("Readiness wait failed: {0}")]
    Poll(#[from] nix::errno::Errno),
}

/// Errors raised while loading configuration or validating user input.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    Read(#[from] io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A `${VAR}` reference names a variable that is not set.
    #[error("Missing environment variable: {0}")]
    MissingEnv(String),

    /// A duration string could not be parsed.
    #[error("Invalid duration value: '{0}'")]
    InvalidDuration(String),

    /// A color index is not a number in `0..=7`.
    #[error("Invalid {which} color '{value}' (expected 0-7)")]
    InvalidColor {
        /// Either `foreground` or `background`.
        which: &'static str,
        /// The rejected input.
        value: String,
    },

    /// The inter-cycle delay is not a non-negative integer.
    #[error("Invalid delay '{0}' (expected milliseconds as a non-negative integer)")]
    InvalidDelay(String),
}

/// Process-lifecycle errors reported by the supervisor. None of them is fatal to the
/// supervisor itself.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A process could not be spawned.
    #[error("Failed to start {target}: {source}")]
    SpawnFailed {
        /// Human-readable name of the process.
        target: String,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// A process could not be stopped or confirmed stopped.
    #[error("Failed to stop {target}: {source}")]
    StopFailed {
        /// Human-readable name of the process.
        target: String,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The collector was launched but could not be confirmed alive.
    #[error("Cannot start {role}: the collector is not running or failed to start")]
    CollectorUnavailable {
        /// The worker role whose start was aborted.
        role: WorkerRole,
    },

    /// Exit was requested while workers are still running.
    #[error("Cannot exit while workers are running: {roles:?}")]
    WorkersRunning {
        /// Roles that are still running.
        roles: Vec<WorkerRole>,
    },

    /// Exit was requested but the collector could not be confirmed stopped.
    #[error("The collector could not be confirmed stopped")]
    CollectorStillRunning,
}

/// Errors raised by worker processes.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Error validating the worker's arguments.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The channel could not be established within the retry budget.
    #[error("Failed to connect to {path:?}: {source}")]
    Connect {
        /// Path of the channel endpoint.
        path: PathBuf,
        /// The last error observed.
        #[source]
        source: io::Error,
    },

    /// The termination signal handler could not be installed.
    #[error("Failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    /// Error reading operator input or writing to the console.
    #[error("Worker I/O failed: {0}")]
    Io(#[from] io::Error),
}
