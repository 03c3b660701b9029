//! muxlog runs a small supervised pipeline: worker processes read typed values from an
//! operator and forward them over two FIFOs and a Unix socket to a single collector, which
//! multiplexes every channel into one append-only log. A supervisor starts and stops the
//! workers and keeps the collector alive exactly as long as any worker needs it.

/// CLI interface.
pub mod cli;

/// Collector event loop.
pub mod collector;

/// Configuration management.
pub mod config;

/// Shared constants.
pub mod constants;

/// Channel endpoints.
pub mod endpoint;

/// Error handling.
pub mod error;

/// Supervisor console.
pub mod menu;

/// Process launching and termination.
pub mod process;

/// Wire records.
pub mod record;

/// Collector log file.
pub mod sink;

/// Worker and collector lifecycle.
pub mod supervisor;

/// Test helpers shared by unit tests.
#[doc(hidden)]
pub mod test_utils;

/// Worker processes.
pub mod worker;
