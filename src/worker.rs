//! Worker processes: read values from the operator, forward them to the collector.
//!
//! Each worker owns exactly one channel. It prompts in its configured colors, reads one
//! line at a time from stdin, encodes the value with its own pid as the source id and
//! writes the record. Invalid input or end of input ends the session.
use std::{
    fs::File,
    io::{self, BufRead, BufReader, ErrorKind, Write},
    os::fd::AsFd,
    path::Path,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use clap::Parser;
use crossterm::style::{Color, Stylize};
use nix::{
    errno::Errno,
    poll::{PollFd, PollFlags, PollTimeout, poll},
};
use tracing::{debug, error, info, warn};

use crate::cli::{WorkerCli, init_logging};
use crate::config::{ChannelPaths, WorkerSettings};
use crate::constants::INPUT_POLL_INTERVAL;
use crate::endpoint::{RetryPolicy, connect_socket, open_fifo_writer, send_record};
use crate::error::WorkerError;
use crate::record::{FloatRecord, IntRecord, Record, RecordKind, StringRecord};
use crate::supervisor::WorkerRole;

/// Why a worker session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Stdin reached end of file.
    InputClosed,
    /// A line could not be parsed as this worker's value type.
    InvalidInput,
    /// The collector closed its end of the channel.
    ChannelClosed,
    /// A termination signal arrived.
    Terminated,
}

impl WorkerExit {
    pub fn is_success(self) -> bool {
        matches!(self, WorkerExit::InputClosed | WorkerExit::Terminated)
    }
}

/// Maps a `0..=7` color index to the matching ANSI color.
pub fn ansi_color(index: u8) -> Color {
    match index {
        0 => Color::Black,
        1 => Color::DarkRed,
        2 => Color::DarkGreen,
        3 => Color::DarkYellow,
        4 => Color::DarkBlue,
        5 => Color::DarkMagenta,
        6 => Color::DarkCyan,
        _ => Color::Grey,
    }
}

/// Parses one operator line into a record for `kind`. `None` means the line is not a valid
/// value of that kind.
pub fn parse_value(kind: RecordKind, source_id: i32, line: &str) -> Option<Record> {
    match kind {
        RecordKind::Int => line.trim().parse().ok().map(|value| {
            Record::Int(IntRecord { source_id, value })
        }),
        RecordKind::Float => line
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(|value| Record::Float(FloatRecord { source_id, value })),
        RecordKind::Text => Some(Record::Text(StringRecord::new(source_id, line))),
    }
}

/// One read attempt from the operator.
#[derive(Debug, PartialEq, Eq)]
pub enum InputEvent {
    Line(String),
    Eof,
    Terminated,
}

/// Line reader that never blocks for long, so a termination flag is noticed promptly.
pub struct LineInput {
    reader: BufReader<File>,
    poll_interval: Duration,
}

impl LineInput {
    pub fn new(file: File) -> Self {
        Self {
            reader: BufReader::new(file),
            poll_interval: INPUT_POLL_INTERVAL,
        }
    }

    /// Reads from a duplicate of the process's stdin descriptor.
    pub fn stdin() -> io::Result<Self> {
        let fd = io::stdin().as_fd().try_clone_to_owned()?;
        Ok(Self::new(File::from(fd)))
    }

    pub fn next_line(&mut self, terminate: &AtomicBool) -> io::Result<InputEvent> {
        loop {
            if terminate.load(Ordering::SeqCst) {
                return Ok(InputEvent::Terminated);
            }

            // Buffered bytes are invisible to poll.
            if self.reader.buffer().is_empty() && !self.wait_readable()? {
                continue;
            }

            let mut line = String::new();
            return match self.reader.read_line(&mut line) {
                Ok(0) => Ok(InputEvent::Eof),
                Ok(_) => Ok(InputEvent::Line(line)),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => Err(err),
            };
        }
    }

    fn wait_readable(&self) -> io::Result<bool> {
        let millis = u16::try_from(self.poll_interval.as_millis()).unwrap_or(u16::MAX);
        let mut fds = [PollFd::new(self.reader.get_ref().as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) | Err(Errno::EINTR) => Ok(false),
            Ok(_) => Ok(true),
            Err(errno) => Err(io::Error::from_raw_os_error(errno as i32)),
        }
    }
}

/// A connected worker: channel, console and input.
pub struct Session<C, O> {
    role: WorkerRole,
    settings: WorkerSettings,
    source_id: i32,
    channel: C,
    console: O,
    input: LineInput,
    terminate: Arc<AtomicBool>,
}

impl<C: Write, O: Write> Session<C, O> {
    pub fn new(
        role: WorkerRole,
        settings: WorkerSettings,
        channel: C,
        console: O,
        input: LineInput,
        terminate: Arc<AtomicBool>,
    ) -> Self {
        Self {
            role,
            settings,
            source_id: std::process::id() as i32,
            channel,
            console,
            input,
            terminate,
        }
    }

    pub fn source_id(&self) -> i32 {
        self.source_id
    }

    fn prompt(&mut self) -> io::Result<()> {
        let noun = match self.role.record_kind() {
            RecordKind::Int => "an integer",
            RecordKind::Float => "a float",
            RecordKind::Text => "a string",
        };
        let text = format!("[{} {}] Enter {noun}:", self.role, self.source_id)
            .with(ansi_color(self.settings.foreground))
            .on(ansi_color(self.settings.background));
        write!(self.console, "{text} ")?;
        self.console.flush()
    }

    pub fn run(&mut self) -> Result<WorkerExit, WorkerError> {
        let kind = self.role.record_kind();
        loop {
            self.prompt()?;
            let line = match self.input.next_line(&self.terminate)? {
                InputEvent::Line(line) => line,
                InputEvent::Eof => {
                    info!("{} reached end of input", self.role);
                    return Ok(WorkerExit::InputClosed);
                }
                InputEvent::Terminated => {
                    info!("{} received termination signal", self.role);
                    return Ok(WorkerExit::Terminated);
                }
            };

            let line = line.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }

            let Some(record) = parse_value(kind, self.source_id, line) else {
                writeln!(self.console)?;
                writeln!(self.console, "Invalid {kind} value '{line}'; exiting")?;
                warn!("{} received invalid input {line:?}", self.role);
                return Ok(WorkerExit::InvalidInput);
            };

            let bytes = record.encode();
            match send_record(&mut self.channel, &bytes) {
                Ok(sent) if sent == bytes.len() => debug!("Sent {record}"),
                Ok(sent) => warn!("Short write for {record}: {sent} of {} bytes", bytes.len()),
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    error!("Collector closed the channel");
                    return Ok(WorkerExit::ChannelClosed);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    warn!("Channel full; dropped {record}");
                }
                Err(err) => return Err(err.into()),
            }

            if !self.settings.delay.is_zero() {
                thread::sleep(self.settings.delay);
            }
        }
    }
}

fn connect(role: WorkerRole, path: &Path, policy: RetryPolicy) -> io::Result<Box<dyn Write>> {
    Ok(match role {
        WorkerRole::IntProducer | WorkerRole::FloatProducer => {
            Box::new(open_fifo_writer(path, policy)?)
        }
        WorkerRole::StringProducer => Box::new(connect_socket(path, policy)?),
    })
}

/// Runs a worker process to completion: install the signal flag, connect, then serve stdin.
pub fn run(
    role: WorkerRole,
    settings: WorkerSettings,
    paths: &ChannelPaths,
) -> Result<WorkerExit, WorkerError> {
    let terminate = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&terminate);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

    let path = role.channel_path(paths);
    let channel = connect(role, path, RetryPolicy::default()).map_err(|source| {
        WorkerError::Connect {
            path: path.to_path_buf(),
            source,
        }
    })?;
    info!("{role} connected to {:?}", path);

    let input = LineInput::stdin()?;
    let mut session = Session::new(role, settings, channel, io::stdout(), input, terminate);
    let exit = session.run()?;
    info!("{role} (PID {}) exiting: {exit:?}", session.source_id());
    Ok(exit)
}

/// Entry point shared by the worker binaries.
pub fn main(role: WorkerRole) -> ExitCode {
    let args = WorkerCli::parse();
    init_logging(args.log_level);

    let result = args
        .settings()
        .map_err(WorkerError::from)
        .and_then(|settings| run(role, settings, &args.channel_paths()));

    match result {
        Ok(exit) if exit.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            error!("{role} failed: {err}");
            eprintln!("{}: {err}", role.binary_name());
            ExitCode::FAILURE
        }
    }
}
