use std::process::ExitCode;

use clap::Parser;
use control::{ControlOptions, handle_control};
use tracing::error;

mod control;

fn main() -> ExitCode {
    let opts = ControlOptions::parse();

    let level = if opts.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match handle_control(opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}: {}", e.kind(), e);
            ExitCode::FAILURE
        }
    }
}
