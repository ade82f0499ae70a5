mod classify;
mod cli;
mod error;
mod event;
mod mirror;
mod output;
mod package;
mod session;
mod tracer;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cli::{Cli, Commands};
use output::OutputManager;
use session::Session;
use tracer::Tracer;

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    })
    .context("failed to set signal handler")?;

    let (session, command, output) = match cli.command {
        Commands::Pack(args) => {
            args.validate()?;
            let session = Session::audit(&args.package_dir, args.verbose, args.follow_ssh)
                .context("failed to initialize package")?;
            let output = OutputManager::new(args.output.as_deref(), args.verbose, args.no_color)
                .context("failed to open output")?;
            (session, args.command, output)
        }
        Commands::Exec(args) => {
            args.validate()?;
            let session = Session::exec(&args.package_dir, args.verbose, args.follow_ssh)
                .context("failed to open package")?;
            let output = OutputManager::new(args.output.as_deref(), args.verbose, args.no_color)
                .context("failed to open output")?;
            (session, args.command, output)
        }
    };

    let mut tracer = Tracer::new(session, command, output, shutdown)?;
    let exit_code = tracer.run().context("tracer failed")?;
    std::process::exit(exit_code);
}
