//! routecheck CLI - client/server parity checker for jape APIs.
//!
//! Usage:
//!   routecheck check [DIR] [--cprefix P] [--sprefix P] [--format text|json]
//!   routecheck routes [DIR]
//!
//! Exits 1 when any diagnostic is reported or the check fails.

use anyhow::Result;
use clap::Parser;
use routecheck::cli::{self, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    match cli::run(Cli::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() -> Result<()> {
    // stdout carries the report; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}
