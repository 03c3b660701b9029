use std::process::ExitCode;

use muxlog::{supervisor::WorkerRole, worker};

fn main() -> ExitCode {
    worker::main(WorkerRole::IntProducer)
}
