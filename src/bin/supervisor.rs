use std::{
    io::{self, Write},
    process::ExitCode,
};

use clap::Parser;
use tracing::{error, info};

use muxlog::{
    cli::{SupervisorCli, init_logging},
    config::load_config,
    menu::{Console, ConsoleExit},
    process::CommandLauncher,
    supervisor::Supervisor,
};

fn main() -> ExitCode {
    let args = SupervisorCli::parse();
    init_logging(args.log_level);

    let mut config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("Failed to load configuration: {err}");
            eprintln!("muxlog-supervisor: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(dir) = args.runtime_dir {
        config.runtime_dir = dir;
    }

    let mut launcher = match CommandLauncher::from_config(&config) {
        Ok(launcher) => launcher,
        Err(err) => {
            eprintln!("muxlog-supervisor: cannot locate binaries: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(level) = args.log_level {
        launcher = launcher.with_log_level(level.as_str());
    }
    info!("Launching binaries from {:?}", launcher.bin_dir());

    let mut supervisor = Supervisor::new(launcher, config);
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let result = Console::new(&mut supervisor, stdin.lock(), &mut stdout).run();
    let _ = stdout.flush();

    match result {
        Ok(ConsoleExit::Exited) | Ok(ConsoleExit::InputClosed) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Console failed: {err}");
            if let Err(err) = supervisor.shutdown() {
                error!("Shutdown incomplete: {err}");
            }
            ExitCode::FAILURE
        }
    }
}
