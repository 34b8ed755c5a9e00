use anyhow::{Context, Result};
use clap::Parser;
use indicatif::ProgressBar;
use std::future::Future;
use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod args;
mod config;
mod copier;
mod listing;
mod logging;
mod mapping;
#[cfg(test)]
mod memory_store;
mod plan;
mod progress;
mod s3_store;
mod scheduler;
mod session;
mod store;

use args::Args;
use config::RunConfig;
use copier::StreamCopier;
use scheduler::{CopyScheduler, RunOutcome, RunSummary};
use session::Sessions;

/// Configuration, session or listing failure before any copy started.
const EXIT_FATAL: u8 = 2;
/// Second interrupt: running copies are abandoned.
const EXIT_INTERRUPTED: i32 = 130;
const MIB: u64 = 1024 * 1024;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args = Args::parse();
    let bar = progress::batch_bar();

    match run(args, bar.clone()).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            bar.finish_and_clear();
            if tracing::dispatcher::has_been_set() {
                error!("ERROR: {:#}", e);
            } else {
                eprintln!("ERROR: {:#}", e);
            }
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(args: Args, bar: ProgressBar) -> Result<u8> {
    let cfg = RunConfig::from_args(args)?;
    logging::init(&cfg.log_file, bar.clone())?;
    info!("s3_crosscopy {} starting", env!("CARGO_PKG_VERSION"));

    let sessions = Sessions::connect(&cfg).await?;
    info!(
        "Source region {}, destination region {}",
        sessions.source_region, sessions.dest_region
    );

    let plan = plan::build_plan(sessions.source.as_ref(), &cfg).await?;
    plan.log_summary();

    if cfg.dry_run {
        plan.log_pairs();
        info!("Dry run: {} object(s) planned, nothing copied.", plan.tasks.len());
        return Ok(0);
    }

    if !plan::confirm(cfg.assume_yes).await? {
        info!("Copy cancelled by user.");
        return Ok(0);
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if watch_interrupts(tokio::signal::ctrl_c, &cancel).await {
                std::process::exit(EXIT_INTERRUPTED);
            }
        }
    });

    let copier = Arc::new(StreamCopier::new(
        sessions.source.clone(),
        sessions.dest.clone(),
        plan.chunk_size,
        cfg.verify,
    ));
    info!(
        "Starting copy: {} object(s), {} worker(s), {} MB parts, {:?} verification",
        plan.tasks.len(),
        cfg.workers.min(plan.tasks.len()),
        copier.chunk_size() / MIB,
        cfg.verify
    );

    progress::show_batch_bar(&bar, plan.tasks.len(), cfg.quiet);
    let scheduler = CopyScheduler::new(
        copier,
        cfg.workers,
        cfg.progress_interval,
        cfg.heartbeat_interval,
        bar.clone(),
    );
    let summary = scheduler.run(plan.tasks, &cancel).await;
    bar.finish_and_clear();

    summary.log();
    match summary.outcome() {
        RunOutcome::Success => info!("All objects copied and verified."),
        RunOutcome::PartialFailure => error!(
            "{} of {} object(s) failed; see the log for details.",
            summary.failed.len(),
            summary.total
        ),
        RunOutcome::Cancelled => warn!(
            "Interrupted ({}/{} completed). Use nohup for long runs.",
            summary.succeeded + summary.failed.len(),
            summary.total
        ),
    }

    if let Some(path) = &cfg.summary_json {
        if let Err(e) = write_summary(path, &summary) {
            error!("{:#}", e);
        }
    }

    Ok(summary.exit_code())
}

/// The first interrupt cancels `cancel`. Returns true once a second one arrives.
/// A signal listener that fails ends the watch without forcing an exit.
async fn watch_interrupts<F, Fut>(mut next_interrupt: F, cancel: &CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if next_interrupt().await.is_err() {
        return false;
    }
    warn!("Interrupted: letting running copies finish, starting no new ones (Ctrl-C again to exit now)");
    cancel.cancel();

    if next_interrupt().await.is_err() {
        return false;
    }
    warn!("Interrupted again: exiting without waiting for running copies");
    true
}

fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(&summary.to_json())?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write summary to {}", path.display()))?;
    info!("Summary written to {}", path.display());
    Ok(())
}
