//! partsync - Partition Huge Trees, Copy Them In Parallel
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use partsync::config::{CliArgs, Command, PartArgs, StatusArgs, StatusFormat, SyncArgs};
use partsync::hook::{CommandHook, HookChain};
use partsync::input::InputArguments;
use partsync::partition::{ListingWriter, PartitionRunner};
use partsync::progress::{print_header, print_partition_report, print_summary, ProgressReporter, RunStatus};
use partsync::queue::RunLayout;
use partsync::sync::status::RunOverview;
use partsync::worker::interrupt::{install_status_handler, take_status_request};
use partsync::worker::{Interrupt, InterruptState};
use partsync::{PartitionConfig, SyncConfig, SyncRun};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    match args.command {
        Command::Part(part) => run_part(part),
        Command::Sync(sync) => run_sync(sync),
        Command::Status(status) => run_status(status),
    }
}

/// Partition the inputs and write or print the listings
fn run_part(args: PartArgs) -> Result<ExitCode> {
    let config = PartitionConfig::from_part_args(args).context("Invalid configuration")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let input = InputArguments::open(config.input.as_ref(), config.paths.clone())
        .context("Cannot open input")?;

    let mut chain = HookChain::new()
        .with_listing(ListingWriter::new(config.output.clone()).add_slash(config.add_slash));
    if let Some(cmd) = &config.pre_open {
        chain = chain.with_hook(Box::new(CommandHook::pre_open(cmd)));
    }
    if let Some(cmd) = &config.post_close {
        chain = chain.with_hook(Box::new(CommandHook::post_close(cmd)));
    }

    let report = PartitionRunner::new(config.mode, config.transform, config.crawl.clone())
        .live(config.live)
        .with_shutdown(shutdown)
        .run(input, &mut chain)
        .context("Partitioning failed")?;

    print_partition_report(&report, config.live);

    if chain.failures() > 0 {
        warn!(failures = chain.failures(), "Some hooks or listings failed");
    }
    if report.interrupted {
        info!("Partitioning was interrupted before completion");
        return Ok(ExitCode::FAILURE);
    }
    if report.crawl.errors > 0 || report.crawl.parse_errors > 0 {
        info!(
            errors = report.crawl.errors,
            parse_errors = report.crawl.parse_errors,
            "Partitioning completed with errors"
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// Copy a tree, or resume a run
fn run_sync(args: SyncArgs) -> Result<ExitCode> {
    let config = SyncConfig::from_sync_args(args).context("Invalid configuration")?;
    let show_progress = config.show_progress;

    // First interrupt drains, second kills
    let interrupt = Interrupt::new();
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let interrupt = interrupt.clone();
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
            match interrupt.signal() {
                InterruptState::Draining => eprintln!(
                    "\nInterrupt received, waiting for running jobs (interrupt again to kill them)..."
                ),
                _ => eprintln!("\nInterrupt received, killing running jobs..."),
            }
        })
        .context("Failed to set signal handler")?;
    }
    install_status_handler().context("Failed to set status signal handler")?;

    let sync = SyncRun::prepare(config, interrupt, shutdown).context("Cannot prepare run")?;

    let cfg = sync.config();
    let slots = if cfg.remote_targets.is_empty() {
        "local".to_string()
    } else {
        cfg.remote_targets.join(", ")
    };
    if show_progress {
        print_header(
            &cfg.run,
            &cfg.source.display().to_string(),
            &cfg.destination.display().to_string(),
            cfg.workers,
            &slots,
        );
    }

    let progress = if show_progress {
        Some(ProgressReporter::new())
    } else {
        None
    };

    let report = sync
        .run(|tick| {
            if let Some(ref p) = progress {
                p.update(tick);
            }
            if take_status_request() {
                let line = RunStatus::from_progress(tick).line();
                match progress {
                    Some(ref p) => p.println(&line),
                    None => eprintln!("{}", line),
                }
            }
        })
        .context("Sync failed")?;

    // Finish progress
    if let Some(ref p) = progress {
        if report.is_clean() {
            p.finish("Sync completed");
        } else if report.dispatch.stopped {
            p.finish("Sync interrupted");
        } else {
            p.finish("Sync finished with errors");
        }
    }

    print_summary(&report);

    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        info!(
            failed = report.failures.len(),
            stopped = report.dispatch.stopped,
            "Sync did not complete cleanly"
        );
        Ok(ExitCode::FAILURE)
    }
}

/// Print the state of a run
fn run_status(args: StatusArgs) -> Result<ExitCode> {
    let layout = RunLayout::new(&args.workdir, &args.run);
    let overview = RunOverview::collect(&layout).context("Cannot read run")?;

    match args.format {
        StatusFormat::Text => print!("{}", overview.to_text()),
        StatusFormat::Json => println!("{}", overview.to_json()?),
    }
    Ok(ExitCode::SUCCESS)
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("partsync=debug,warn")
    } else {
        EnvFilter::new("partsync=info,warn")
    };

    // stdout may carry partition listings
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
