use crate::copier::VerifyMode;
use clap::Parser;
use std::path::PathBuf;

pub const MIN_PART_SIZE_MB: u64 = 5;
pub const DEFAULT_PART_SIZE_MB: u64 = 100;
pub const MAX_PART_SIZE_MB: u64 = 5 * 1024; // 5GB maximum in MB
pub const DEFAULT_WORKERS: usize = 16;
pub const MAX_WORKERS: usize = 64;
pub const DEFAULT_LOG_FILE: &str = "s3_crosscopy.log";
pub const PROGRESS_INTERVAL_SECS: u64 = 2;
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// CLI arguments for the cross-account S3 prefix copy tool
#[derive(Parser, Debug)]
#[command(name = "s3_crosscopy")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Source prefix as s3://bucket/prefix (repeatable; all sources must share one bucket)
    #[arg(short, long = "source", required = true)]
    pub sources: Vec<String>,

    /// Leading part of the source prefixes to drop when building destination keys
    #[arg(long, default_value = "")]
    pub source_base: String,

    /// Destination as s3://bucket/prefix
    #[arg(short, long)]
    pub dest: String,

    /// AWS profile for reading the source (credential scope)
    #[arg(long)]
    pub source_profile: Option<String>,

    /// AWS profile for writing the destination (credential scope)
    #[arg(long)]
    pub dest_profile: Option<String>,

    /// Region of the source bucket (detected when omitted)
    #[arg(long)]
    pub source_region: Option<String>,

    /// Region of the destination bucket (detected when omitted)
    #[arg(long)]
    pub dest_region: Option<String>,

    /// Part size in MB (default: 100, min: 5, max: 5120)
    #[arg(short = 'p', long, value_parser = clap::value_parser!(u64).range(5..=5120))]
    pub part_size: Option<u64>,

    /// Raise the part size for the whole run if the largest object would exceed 10,000 parts
    #[arg(long, default_value_t = false)]
    pub auto_part_size: bool,

    /// Number of objects copied in parallel (default: 16, max: 64)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Post-copy verification
    #[arg(long, value_enum, default_value_t = VerifyMode::Etag)]
    pub verify: VerifyMode,

    /// Append-only log file
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,

    /// Write the final run summary as JSON to this path
    #[arg(long)]
    pub summary_json: Option<PathBuf>,

    /// List and map keys, print the plan, copy nothing
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Do not ask for confirmation before copying
    #[arg(short, long, default_value_t = false)]
    pub yes: bool,

    /// Hide the progress bar (log lines are still written)
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,
}
