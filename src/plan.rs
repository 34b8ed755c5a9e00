use crate::config::{RunConfig, chunk_size_for};
use crate::copier::MAX_PARTS;
use crate::listing::{SourceSummary, list_all, summarize};
use crate::mapping::{CopyTask, plan_tasks};
use crate::store::ObjectStore;
use anyhow::{Context, Result, bail};
use std::io::{self, BufRead, Write};
use tracing::info;

const MAX_LISTED_FOLDERS: usize = 20;
const MIB: u64 = 1024 * 1024;

/// Everything decided before the first byte is copied.
#[derive(Debug)]
pub struct Plan {
    pub tasks: Vec<CopyTask>,
    pub summaries: Vec<SourceSummary>,
    /// Run-wide chunk size, possibly raised for the largest object.
    pub chunk_size: u64,
    pub total_bytes: u64,
}

/// Comma-separated folder names, truncated with `...` past the display limit.
pub fn folder_list(folders: &[String]) -> String {
    let mut line = folders
        .iter()
        .take(MAX_LISTED_FOLDERS)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if folders.len() > MAX_LISTED_FOLDERS {
        line.push_str(" ...");
    }
    line
}

/// Lists every source prefix and maps each object to its destination.
///
/// Any listing failure, a key collision or an empty task set is fatal.
pub async fn build_plan(store: &dyn ObjectStore, cfg: &RunConfig) -> Result<Plan> {
    let mut listings = Vec::with_capacity(cfg.sources.len());
    let mut summaries = Vec::with_capacity(cfg.sources.len());

    for source in &cfg.sources {
        info!("Listing {}", source);
        let entries = list_all(store, source).await?;
        summaries.push(summarize(source, &entries));
        listings.push((source.clone(), entries));
    }

    let tasks = plan_tasks(&listings, &cfg.source_base, &cfg.dest)
        .context("Destination keys are not unique")?;

    if tasks.is_empty() {
        bail!("No objects found under any source prefix.");
    }

    let largest = tasks.iter().map(|t| t.listed_size).max().unwrap_or(0);
    let chunk_size = match chunk_size_for(cfg.chunk_size, largest, cfg.auto_chunk_size) {
        Ok(size) => size,
        Err(required) => bail!(
            "Largest object ({} bytes) needs more than {} parts at {} MB per part; use --part-size {} or --auto-part-size",
            largest,
            MAX_PARTS,
            cfg.chunk_size / MIB,
            required.div_ceil(MIB)
        ),
    };
    if chunk_size != cfg.chunk_size {
        info!(
            "Part size raised from {} MB to {} MB to stay within {} parts",
            cfg.chunk_size / MIB,
            chunk_size / MIB,
            MAX_PARTS
        );
    }

    Ok(Plan {
        total_bytes: tasks.iter().map(|t| t.listed_size).sum(),
        tasks,
        summaries,
        chunk_size,
    })
}

impl Plan {
    pub fn log_summary(&self) {
        info!("=== Folders found in source bucket (before copy) ===");
        for summary in &self.summaries {
            info!(
                "  {}: {} objects, {} bytes (largest {}), folders: {}",
                summary.location,
                summary.objects,
                summary.bytes,
                summary.largest,
                folder_list(&summary.folders)
            );
        }
        info!(
            "  Total: {} objects, {} bytes, {} MB parts",
            self.tasks.len(),
            self.total_bytes,
            self.chunk_size / MIB
        );
    }

    pub fn log_pairs(&self) {
        for task in &self.tasks {
            info!("{} {} -> {}", task.tag(), task.source, task.dest);
        }
    }
}

/// `y` or `yes`, any case, surrounding whitespace ignored.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn ask<R: BufRead>(mut input: R) -> io::Result<bool> {
    print!("Proceed with copy? (y/n): ");
    io::stdout().flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(is_affirmative(&answer))
}

/// Asks the operator on stdin unless `assume_yes`.
pub async fn confirm(assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    tokio::task::spawn_blocking(|| ask(io::stdin().lock()))
        .await
        .context("Confirmation prompt failed")?
        .context("Failed to read the confirmation answer")
}
