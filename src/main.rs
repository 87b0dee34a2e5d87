use clap::Parser;
use std::io;
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt, prelude::*};

mod assignment;
mod commands;
mod convergence;
mod em;
mod ensemble;
mod modeller;
mod prog_opts;
mod util;

use crate::prog_opts::{Args, Command};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // set up the logging. The level is taken from the
    // environment variable if it is set; otherwise it
    // follows --quiet / --verbose and defaults to INFO.
    let default_level = if args.quiet {
        LevelFilter::WARN
    } else if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .init();

    match &args.command {
        Command::Cluster(opts) => commands::run_cluster(&args, opts),
        Command::Ensemble(opts) => commands::run_ensemble(&args, opts),
    }
}
