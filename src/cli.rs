//! Command-line interfaces for the muxlog binaries.
use std::{path::PathBuf, str::FromStr};

use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::{ChannelPaths, WorkerSettings};
use crate::error::ConfigError;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Installs the global subscriber. `--log-level` wins over `RUST_LOG`, which wins over
/// `info`. Output goes to stderr so it never interleaves with console prompts on stdout.
pub fn init_logging(level: Option<LogLevelArg>) {
    let filter = if let Some(level) = level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Arguments accepted by the collector.
#[derive(Parser, Debug)]
#[command(name = "muxlog-collector", version, author)]
#[command(about = "Multiplexes the muxlog channels into one append-only log", long_about = None)]
pub struct CollectorCli {
    /// Log file to append received records to.
    pub log_file: PathBuf,

    /// Directory holding the FIFOs and the socket.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub runtime_dir: PathBuf,

    /// Override the logging verbosity.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,
}

impl CollectorCli {
    pub fn channel_paths(&self) -> ChannelPaths {
        ChannelPaths::in_dir(&self.runtime_dir)
    }
}

/// Arguments accepted by the supervisor.
#[derive(Parser, Debug)]
#[command(name = "muxlog-supervisor", version, author)]
#[command(about = "Interactive supervisor for the muxlog collector and workers", long_about = None)]
pub struct SupervisorCli {
    /// Path to the configuration file (defaults to `muxlog.yaml` when present).
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override the runtime directory from the configuration.
    #[arg(long, value_name = "DIR")]
    pub runtime_dir: Option<PathBuf>,

    /// Override the logging verbosity. Forwarded to the collector and workers.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,
}

/// Arguments shared by the three worker binaries.
#[derive(Parser, Debug)]
#[command(version, author)]
#[command(about = "Reads values from stdin and forwards them to the muxlog collector", long_about = None)]
pub struct WorkerCli {
    /// Foreground color index (0-7).
    pub foreground: String,

    /// Background color index (0-7).
    pub background: String,

    /// Delay after each sent value, in milliseconds.
    pub delay_ms: String,

    /// Directory holding the FIFOs and the socket.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub runtime_dir: PathBuf,

    /// Override the logging verbosity.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,
}

impl WorkerCli {
    pub fn settings(&self) -> Result<WorkerSettings, ConfigError> {
        WorkerSettings::parse(&self.foreground, &self.background, &self.delay_ms)
    }

    pub fn channel_paths(&self) -> ChannelPaths {
        ChannelPaths::in_dir(&self.runtime_dir)
    }
}
