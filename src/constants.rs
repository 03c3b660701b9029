//! Constants and configuration values shared by the collector, supervisor and workers.
//!
//! This module centralizes the magic numbers, file names and timings used throughout
//! muxlog so the processes agree on them.

use std::time::Duration;

// ============================================================================
// Channel Layout
// ============================================================================

/// File name of the integer FIFO inside the runtime directory.
pub const INT_FIFO_NAME: &str = "muxlog_int.fifo";

/// File name of the float FIFO inside the runtime directory.
pub const FLOAT_FIFO_NAME: &str = "muxlog_float.fifo";

/// File name of the string socket inside the runtime directory.
pub const SOCKET_NAME: &str = "muxlog.sock";

/// Permission bits applied to the FIFOs (world read/write).
pub const FIFO_MODE: u32 = 0o666;

// ============================================================================
// Wire Records
// ============================================================================

/// Size of the `source_id` field that leads every record.
pub const SOURCE_ID_LEN: usize = 4;

/// Capacity of the fixed string buffer, including the terminating NUL.
pub const TEXT_CAPACITY: usize = 256;

/// Longest text a string record can carry.
pub const MAX_TEXT_LEN: usize = TEXT_CAPACITY - 1;

/// Wire size of an integer record.
pub const INT_RECORD_SIZE: usize = 8;

/// Wire size of a float record. The `f64` is 8-byte aligned, so four bytes of padding
/// follow the source id.
pub const FLOAT_RECORD_SIZE: usize = 16;

/// Wire size of a string record.
pub const STRING_RECORD_SIZE: usize = SOURCE_ID_LEN + TEXT_CAPACITY;

// ============================================================================
// Collector Timing
// ============================================================================

/// Upper bound on a single readiness wait. Bounds worst-case shutdown latency.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Default log file used when the supervisor launches the collector.
pub const DEFAULT_LOG_FILE: &str = "collector.log";

// ============================================================================
// Worker Timing
// ============================================================================

/// Number of attempts a worker makes to open its channel.
pub const CONNECT_ATTEMPTS: usize = 5;

/// Delay between channel connection attempts.
pub const CONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// How long a worker waits on stdin before rechecking its termination flag.
pub const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Highest valid ANSI color index.
pub const MAX_COLOR_INDEX: u8 = 7;

// ============================================================================
// Supervisor Timing
// ============================================================================

/// How long the supervisor waits for a freshly launched collector to set up its channels.
pub const COLLECTOR_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// How long a process may take to honor a graceful stop before it is killed.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Interval between liveness checks while waiting on a child.
pub const PROCESS_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Default supervisor configuration file, used when present.
pub const DEFAULT_CONFIG_FILE: &str = "muxlog.yaml";

// ============================================================================
// Binaries
// ============================================================================

/// Collector binary name.
pub const COLLECTOR_BIN: &str = "muxlog-collector";

/// Integer producer binary name.
pub const INT_WORKER_BIN: &str = "muxlog-int";

/// Float producer binary name.
pub const FLOAT_WORKER_BIN: &str = "muxlog-float";

/// String producer binary name.
pub const STRING_WORKER_BIN: &str = "muxlog-string";
