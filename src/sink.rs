//! Append-only, timestamped log of everything the collector receives.
use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, LineWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{Local, SecondsFormat};
use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::CollectorError;
use crate::record::Record;

/// The collector's log file. Exactly one writer exists per file: opening takes an
/// exclusive advisory lock that is released when the sink is closed.
pub struct LogSink {
    path: PathBuf,
    writer: Option<LineWriter<File>>,
}

impl LogSink {
    /// Opens `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CollectorError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| CollectorError::LogOpen {
                path: path.clone(),
                source,
            })?;

        if file.try_lock_exclusive().is_err() {
            return Err(CollectorError::LogLocked { path });
        }

        debug!("Opened log sink at {:?}", path);
        Ok(Self {
            path,
            writer: Some(LineWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Appends one line for a received record.
    pub fn record(&mut self, record: &Record) -> io::Result<()> {
        self.write_line(record)
    }

    /// Appends a lifecycle note.
    pub fn note(&mut self, message: impl fmt::Display) -> io::Result<()> {
        self.write_line(message)
    }

    fn write_line(&mut self, body: impl fmt::Display) -> io::Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "log sink closed"));
        };
        let stamp = Local::now().to_rfc3339_opts(SecondsFormat::Millis, false);
        writeln!(writer, "[{stamp}] {body}")?;
        writer.flush()
    }

    /// Flushes and closes the file. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.flush() {
                warn!("Failed to flush log sink {:?}: {err}", self.path);
            }
            if let Err(err) = FileExt::unlock(writer.get_ref()) {
                debug!("Failed to unlock log sink {:?}: {err}", self.path);
            }
        }
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        self.close();
    }
}
