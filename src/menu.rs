//! Interactive numeric console for the supervisor.
use std::{
    io::{self, BufRead, Write},
    str::FromStr,
};

use strum::IntoEnumIterator;
use tracing::{debug, error};

use crate::config::WorkerSettings;
use crate::process::Launcher;
use crate::supervisor::{StartOutcome, StopReport, Supervisor, WorkerRole};

/// One menu selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Start(WorkerRole),
    Stop(WorkerRole),
    Exit,
    Status,
}

impl FromStr for MenuChoice {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let choice = match value.trim() {
            "1" => MenuChoice::Start(WorkerRole::IntProducer),
            "2" => MenuChoice::Start(WorkerRole::FloatProducer),
            "3" => MenuChoice::Start(WorkerRole::StringProducer),
            "4" => MenuChoice::Stop(WorkerRole::IntProducer),
            "5" => MenuChoice::Stop(WorkerRole::FloatProducer),
            "6" => MenuChoice::Stop(WorkerRole::StringProducer),
            "7" => MenuChoice::Exit,
            "8" => MenuChoice::Status,
            other => return Err(format!("invalid option '{other}' (expected 1-8)")),
        };
        Ok(choice)
    }
}

/// How the console loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// The operator chose exit and it was permitted.
    Exited,
    /// Input ended; everything was shut down.
    InputClosed,
}

pub struct Console<'a, L: Launcher, R, W> {
    supervisor: &'a mut Supervisor<L>,
    input: R,
    output: W,
}

impl<'a, L, R, W> Console<'a, L, R, W>
where
    L: Launcher,
    R: BufRead,
    W: Write,
{
    pub fn new(supervisor: &'a mut Supervisor<L>, input: R, output: W) -> Self {
        Self {
            supervisor,
            input,
            output,
        }
    }

    /// Runs until the operator exits or input ends.
    pub fn run(&mut self) -> io::Result<ConsoleExit> {
        loop {
            self.print_menu()?;
            let Some(line) = self.prompt("Select an option: ")? else {
                return self.close();
            };
            if line.trim().is_empty() {
                continue;
            }

            let choice = match line.parse::<MenuChoice>() {
                Ok(choice) => choice,
                Err(message) => {
                    writeln!(self.output, "{message}")?;
                    continue;
                }
            };
            debug!("Menu choice: {choice:?}");

            match choice {
                MenuChoice::Start(role) => {
                    if !self.start(role)? {
                        return self.close();
                    }
                }
                MenuChoice::Stop(role) => self.stop(role)?,
                MenuChoice::Exit => match self.supervisor.request_exit() {
                    Ok(()) => {
                        writeln!(self.output, "Exiting.")?;
                        return Ok(ConsoleExit::Exited);
                    }
                    Err(err) => writeln!(self.output, "{err}")?,
                },
                MenuChoice::Status => {}
            }
        }
    }

    fn print_menu(&mut self) -> io::Result<()> {
        let status = self.supervisor.status();
        writeln!(self.output)?;
        writeln!(self.output, "==== muxlog supervisor ====")?;
        write!(self.output, "{status}")?;
        for (offset, role) in WorkerRole::iter().enumerate() {
            writeln!(self.output, "{}) Start {}", offset + 1, label(role))?;
        }
        for (offset, role) in WorkerRole::iter().enumerate() {
            writeln!(self.output, "{}) Stop {}", offset + 4, label(role))?;
        }
        writeln!(self.output, "7) Exit")?;
        writeln!(self.output, "8) Refresh status")?;
        Ok(())
    }

    /// Returns `false` when input ended mid-prompt.
    fn start(&mut self, role: WorkerRole) -> io::Result<bool> {
        let Some(foreground) = self.prompt("Foreground color (0-7): ")? else {
            return Ok(false);
        };
        let Some(background) = self.prompt("Background color (0-7): ")? else {
            return Ok(false);
        };
        let Some(delay) = self.prompt("Delay in milliseconds: ")? else {
            return Ok(false);
        };

        let settings = match WorkerSettings::parse(&foreground, &background, &delay) {
            Ok(settings) => settings,
            Err(err) => {
                writeln!(self.output, "Input error: {err}")?;
                return Ok(true);
            }
        };

        match self.supervisor.start_worker(role, settings) {
            Ok(StartOutcome::Started { pid }) => {
                writeln!(self.output, "Started {} (PID {pid})", label(role))?
            }
            Ok(StartOutcome::AlreadyRunning { pid }) => {
                writeln!(self.output, "{} is already running (PID {pid})", label(role))?
            }
            Err(err) => writeln!(self.output, "{err}")?,
        }
        Ok(true)
    }

    fn stop(&mut self, role: WorkerRole) -> io::Result<()> {
        match self.supervisor.stop_worker(role) {
            Ok(StopReport::NotRunning) => {
                writeln!(self.output, "{} is not running", label(role))
            }
            Ok(StopReport::Stopped { collector, .. }) => {
                writeln!(self.output, "Stopped {}", label(role))?;
                if collector.is_some() {
                    writeln!(self.output, "No workers left; collector stopped")?;
                }
                Ok(())
            }
            Err(err) => writeln!(self.output, "{err}"),
        }
    }

    fn close(&mut self) -> io::Result<ConsoleExit> {
        writeln!(self.output)?;
        writeln!(self.output, "Input closed; shutting down.")?;
        if let Err(err) = self.supervisor.shutdown() {
            error!("Shutdown incomplete: {err}");
            writeln!(self.output, "{err}")?;
        }
        Ok(ConsoleExit::InputClosed)
    }

    fn prompt(&mut self, message: &str) -> io::Result<Option<String>> {
        write!(self.output, "{message}")?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

fn label(role: WorkerRole) -> String {
    role.as_ref().replace('_', " ")
}
