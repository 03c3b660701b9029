use std::{
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use clap::Parser;
use tracing::{error, info};

use muxlog::{
    cli::{CollectorCli, init_logging},
    collector::Collector,
};

fn main() -> ExitCode {
    let args = CollectorCli::parse();
    init_logging(args.log_level);

    // Installed before any channel exists so an early SIGTERM still reaches cleanup.
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(err) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        error!("Failed to install signal handler: {err}");
        eprintln!("muxlog-collector: {err}");
        return ExitCode::FAILURE;
    }

    let mut collector =
        match Collector::start_with_shutdown(args.channel_paths(), &args.log_file, shutdown) {
            Ok(collector) => collector,
            Err(err) => {
                error!("Collector failed to start: {err}");
                eprintln!("muxlog-collector: {err}");
                return ExitCode::FAILURE;
            }
        };

    info!(
        "Collector (PID {}) logging to {:?}",
        std::process::id(),
        collector.log_path()
    );
    let result = collector.run();
    collector.cleanup();

    match result {
        Ok(exit) => {
            info!("Collector finished ({exit:?})");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("muxlog-collector: {err}");
            ExitCode::FAILURE
        }
    }
}
