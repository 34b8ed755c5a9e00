use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

const MIB: f64 = 1024.0 * 1024.0;

/// Batch bar (objects done / total). Starts hidden so log lines printed
/// during planning are not interleaved with an empty bar.
pub fn batch_bar() -> ProgressBar {
    let pb = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden());
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} objects {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    pb
}

/// Sizes the bar for `total` objects and draws it on stderr unless `quiet`.
pub fn show_batch_bar(pb: &ProgressBar, total: usize, quiet: bool) {
    pb.set_length(total as u64);
    pb.set_position(0);
    if !quiet {
        pb.set_draw_target(ProgressDrawTarget::stderr());
        pb.enable_steady_tick(Duration::from_millis(200));
    }
}

/// Byte and part counters for one object copy.
///
/// Written by the copy loop, read by the reporter running in the same task.
#[derive(Debug, Default)]
pub struct CopyProgress {
    copied_bytes: AtomicU64,
    completed_parts: AtomicUsize,
    total_bytes: AtomicU64,
}

impl CopyProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set once the source size has been probed.
    pub fn set_total(&self, bytes: u64) {
        self.total_bytes.store(bytes, Ordering::SeqCst);
    }

    pub fn add_completed(&self, bytes: u64) {
        self.copied_bytes.fetch_add(bytes, Ordering::SeqCst);
        self.completed_parts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn copied_bytes(&self) -> u64 {
        self.copied_bytes.load(Ordering::SeqCst)
    }

    pub fn completed_parts(&self) -> usize {
        self.completed_parts.load(Ordering::SeqCst)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Progress {
        bytes: u64,
        total: u64,
        bytes_per_sec: f64,
    },
    /// Nothing moved for at least the heartbeat interval.
    Heartbeat { bytes: u64, idle: Duration },
}

impl ProgressEvent {
    pub fn describe(&self) -> String {
        match self {
            ProgressEvent::Progress {
                bytes,
                total,
                bytes_per_sec,
            } => {
                let pct = if *total > 0 {
                    *bytes as f64 / *total as f64 * 100.0
                } else {
                    100.0
                };
                format!(
                    "{} / {} bytes ({:.1}%), {:.1} MiB/s",
                    bytes,
                    total,
                    pct,
                    bytes_per_sec / MIB
                )
            }
            ProgressEvent::Heartbeat { bytes, idle } => format!(
                "Still copying... {} bytes so far, no new part for {}s",
                bytes,
                idle.as_secs()
            ),
        }
    }
}

/// Turns byte-counter samples into progress lines and liveness heartbeats.
///
/// `poll` is called on a fixed timer, independently of chunk arrival, so a
/// stalled transfer still produces heartbeats.
#[derive(Debug)]
pub struct ProgressReporter {
    progress_interval: Duration,
    heartbeat_interval: Duration,
    seen_bytes: u64,
    reported_bytes: u64,
    last_report: Instant,
    last_activity: Instant,
    last_heartbeat: Instant,
}

impl ProgressReporter {
    pub fn new(start: Instant, progress_interval: Duration, heartbeat_interval: Duration) -> Self {
        Self {
            progress_interval,
            heartbeat_interval,
            seen_bytes: 0,
            reported_bytes: 0,
            last_report: start,
            last_activity: start,
            last_heartbeat: start,
        }
    }

    pub fn poll(&mut self, now: Instant, bytes: u64, total: u64) -> Option<ProgressEvent> {
        if bytes != self.seen_bytes {
            self.seen_bytes = bytes;
            self.last_activity = now;
        }

        let since_report = now.saturating_duration_since(self.last_report);
        if bytes > self.reported_bytes && since_report >= self.progress_interval {
            let delta = bytes - self.reported_bytes;
            let bytes_per_sec = delta as f64 / since_report.as_secs_f64().max(f64::EPSILON);
            self.reported_bytes = bytes;
            self.last_report = now;
            self.last_heartbeat = now;
            return Some(ProgressEvent::Progress {
                bytes,
                total,
                bytes_per_sec,
            });
        }

        let idle = now.saturating_duration_since(self.last_activity);
        if idle >= self.heartbeat_interval
            && now.saturating_duration_since(self.last_heartbeat) >= self.heartbeat_interval
        {
            self.last_heartbeat = now;
            return Some(ProgressEvent::Heartbeat { bytes, idle });
        }

        None
    }
}
