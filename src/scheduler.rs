use crate::copier::{CopyError, CopyReport, StreamCopier};
use crate::mapping::CopyTask;
use crate::progress::{CopyProgress, ProgressReporter};
use crate::store::S3Location;
use indicatif::ProgressBar;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    PartialFailure,
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::PartialFailure => "partial_failure",
            RunOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub index: usize,
    pub source: S3Location,
    pub dest: S3Location,
    pub error: String,
}

/// What happened to every task of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<TaskFailure>,
    /// Tasks never started (or stopped before writing) because of cancellation.
    pub not_attempted: usize,
    pub cancelled: bool,
    pub bytes_copied: u64,
    /// Succeeded tasks whose ETags could not be compared; only sizes were checked.
    pub size_only: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            succeeded: 0,
            failed: Vec::new(),
            not_attempted: 0,
            cancelled: false,
            bytes_copied: 0,
            size_only: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Cancellation wins over failures: a cancelled run is never reported as complete.
    pub fn outcome(&self) -> RunOutcome {
        if self.cancelled {
            RunOutcome::Cancelled
        } else if !self.failed.is_empty() {
            RunOutcome::PartialFailure
        } else {
            RunOutcome::Success
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self.outcome() {
            RunOutcome::Success => 0,
            RunOutcome::PartialFailure => 1,
            RunOutcome::Cancelled => 130,
        }
    }

    pub fn log(&self) {
        info!(
            "Summary: {} total, {} succeeded, {} failed, {} bytes copied in {:.1}s",
            self.total,
            self.succeeded,
            self.failed.len(),
            self.bytes_copied,
            self.elapsed.as_secs_f64()
        );
        if self.size_only > 0 {
            info!(
                "{} object(s) verified by size only (ETags not comparable)",
                self.size_only
            );
        }
        for failure in &self.failed {
            error!(
                "[{}/{}] FAILED {} -> {}: {}",
                failure.index, self.total, failure.source, failure.dest, failure.error
            );
        }
        if self.cancelled {
            warn!(
                "Cancelled: {} of {} completed, {} not attempted",
                self.succeeded + self.failed.len(),
                self.total,
                self.not_attempted
            );
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "finished_at": chrono::Utc::now().to_rfc3339(),
            "outcome": self.outcome().as_str(),
            "exit_code": self.exit_code(),
            "total": self.total,
            "succeeded": self.succeeded,
            "failed": self.failed.iter().map(|f| json!({
                "index": f.index,
                "source": f.source.to_string(),
                "dest": f.dest.to_string(),
                "error": f.error,
            })).collect::<Vec<_>>(),
            "not_attempted": self.not_attempted,
            "bytes_copied": self.bytes_copied,
            "size_only_verified": self.size_only,
            "elapsed_secs": self.elapsed.as_secs_f64(),
        })
    }
}

/// Runs copy tasks on a bounded pool of workers.
pub struct CopyScheduler {
    copier: Arc<StreamCopier>,
    workers: usize,
    progress_interval: Duration,
    heartbeat_interval: Duration,
    bar: ProgressBar,
}

impl CopyScheduler {
    pub fn new(
        copier: Arc<StreamCopier>,
        workers: usize,
        progress_interval: Duration,
        heartbeat_interval: Duration,
        bar: ProgressBar,
    ) -> Self {
        Self {
            copier,
            workers: workers.max(1),
            progress_interval,
            heartbeat_interval,
            bar,
        }
    }

    /// Copies every task, at most `workers` at a time.
    ///
    /// A failed task never stops dispatching. Once `cancel` fires no new task
    /// is started; running ones finish and the rest count as not attempted.
    pub async fn run(&self, tasks: Vec<CopyTask>, cancel: &CancellationToken) -> RunSummary {
        let started = Instant::now();
        let mut summary = RunSummary::new(tasks.len());
        let semaphore = Arc::new(Semaphore::new(self.workers.min(tasks.len()).max(1)));
        let mut running: JoinSet<Result<CopyReport, CopyError>> = JoinSet::new();
        let mut in_flight: HashMap<task::Id, CopyTask> = HashMap::new();
        let mut queue = tasks.into_iter();

        while let Some(next) = queue.next() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                summary.cancelled = true;
                summary.not_attempted += 1 + queue.len();
                info!(
                    "Interrupted: not starting {} remaining object(s)",
                    1 + queue.len()
                );
                break;
            };

            while let Some(joined) = running.try_join_next_with_id() {
                self.record(&mut summary, &mut in_flight, joined);
            }

            let handle = running.spawn(run_task(
                self.copier.clone(),
                next.clone(),
                cancel.clone(),
                self.progress_interval,
                self.heartbeat_interval,
                permit,
            ));
            in_flight.insert(handle.id(), next);
        }

        while let Some(joined) = running.join_next_with_id().await {
            self.record(&mut summary, &mut in_flight, joined);
        }

        summary.elapsed = started.elapsed();
        summary
    }

    fn record(
        &self,
        summary: &mut RunSummary,
        in_flight: &mut HashMap<task::Id, CopyTask>,
        joined: Result<(task::Id, Result<CopyReport, CopyError>), JoinError>,
    ) {
        let (id, result) = match joined {
            Ok((id, result)) => (id, result.map_err(Some)),
            Err(join_error) => {
                let id = join_error.id();
                if let Some(task) = in_flight.get(&id) {
                    error!(
                        "{} Copy task for {} stopped unexpectedly: {}",
                        task.tag(),
                        task.source,
                        join_error
                    );
                }
                (id, Err(None))
            }
        };
        let Some(task) = in_flight.remove(&id) else {
            return;
        };
        self.bar.inc(1);

        match result {
            Ok(report) => {
                summary.succeeded += 1;
                summary.bytes_copied += report.bytes_copied;
                if !report.content_verified {
                    summary.size_only += 1;
                }
            }
            Err(Some(CopyError::Cancelled)) => {
                summary.cancelled = true;
                summary.not_attempted += 1;
            }
            Err(e) => summary.failed.push(TaskFailure {
                index: task.index,
                source: task.source,
                dest: task.dest,
                error: e.map_or_else(|| "worker panicked".to_string(), |e| e.to_string()),
            }),
        }
    }
}

/// One task on one worker: the copy itself plus a timer that drives the
/// progress reporter, so a stalled transfer still logs heartbeats.
async fn run_task(
    copier: Arc<StreamCopier>,
    task: CopyTask,
    cancel: CancellationToken,
    progress_interval: Duration,
    heartbeat_interval: Duration,
    _permit: OwnedSemaphorePermit,
) -> Result<CopyReport, CopyError> {
    let tag = task.tag();
    info!("{} Copying {} -> {}", tag, task.source, task.dest);

    let progress = CopyProgress::new();
    let start = Instant::now();
    let mut reporter = ProgressReporter::new(start, progress_interval, heartbeat_interval);
    let mut ticker = tokio::time::interval_at(start + progress_interval, progress_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let copy = copier.copy_one(&task.source, &task.dest, &progress, &cancel);
    tokio::pin!(copy);

    let result = loop {
        tokio::select! {
            result = &mut copy => break result,
            _ = ticker.tick() => {
                if let Some(event) = reporter.poll(
                    Instant::now(),
                    progress.copied_bytes(),
                    progress.total_bytes(),
                ) {
                    info!("{} {}", tag, event.describe());
                }
            }
        }
    };

    match &result {
        Ok(report) => info!(
            "{} Done {} -> {} ({} bytes, {} part(s){}) in {:.1}s",
            tag,
            task.source,
            task.dest,
            report.bytes_copied,
            report.parts,
            if report.content_verified {
                ", checksum verified"
            } else {
                ", size verified"
            },
            start.elapsed().as_secs_f64()
        ),
        Err(CopyError::Cancelled) => info!("{} Not started (cancelled): {}", tag, task.source),
        Err(e) => error!(
            "{} FAILED {} -> {} at {} of {} bytes ({} part(s) uploaded): {}",
            tag,
            task.source,
            task.dest,
            progress.copied_bytes(),
            progress.total_bytes(),
            progress.completed_parts(),
            e
        ),
    }
    result
}
