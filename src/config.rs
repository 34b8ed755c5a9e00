use crate::args::{
    Args, DEFAULT_PART_SIZE_MB, DEFAULT_WORKERS, HEARTBEAT_INTERVAL_SECS, MAX_PART_SIZE_MB,
    MAX_WORKERS, MIN_PART_SIZE_MB, PROGRESS_INTERVAL_SECS,
};
use crate::copier::{MAX_PARTS, VerifyMode};
use crate::mapping::{list_prefix, normalize_key};
use crate::store::S3Location;
use anyhow::{Result, bail};
use std::path::PathBuf;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Profile and region used to build one side's client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialScope {
    pub profile: Option<String>,
    pub region: Option<String>,
}

/// Validated, immutable settings for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Source list prefixes (trailing slash added), all in one bucket.
    pub sources: Vec<S3Location>,
    pub source_base: String,
    /// Destination prefix (trailing slash added unless empty).
    pub dest: S3Location,
    pub source_scope: CredentialScope,
    pub dest_scope: CredentialScope,
    pub chunk_size: u64,
    pub auto_chunk_size: bool,
    pub workers: usize,
    pub verify: VerifyMode,
    pub log_file: PathBuf,
    pub summary_json: Option<PathBuf>,
    pub dry_run: bool,
    pub assume_yes: bool,
    pub quiet: bool,
    pub progress_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl RunConfig {
    pub fn from_args(args: Args) -> Result<Self> {
        if args.sources.is_empty() {
            bail!("At least one --source is required");
        }

        let mut sources: Vec<S3Location> = Vec::with_capacity(args.sources.len());
        for raw in &args.sources {
            let Some(location) = S3Location::parse(raw) else {
                bail!("Invalid source S3 URI: {}", raw);
            };
            if let Some(first) = sources.first() {
                if first.bucket != location.bucket {
                    bail!(
                        "All sources must use the same bucket (got {} and {})",
                        location.bucket,
                        first.bucket
                    );
                }
            }
            sources.push(location.with_key(list_prefix(&location.key)));
        }

        let Some(dest) = S3Location::parse(&args.dest) else {
            bail!("Invalid destination S3 URI: {}", args.dest);
        };
        let dest = dest.with_key(list_prefix(&dest.key));

        let part_size_mb = args.part_size.unwrap_or(DEFAULT_PART_SIZE_MB);
        if part_size_mb < MIN_PART_SIZE_MB {
            bail!("Part size must be at least {} MB", MIN_PART_SIZE_MB);
        }
        if part_size_mb > MAX_PART_SIZE_MB {
            bail!("Part size cannot exceed {} MB (5GB)", MAX_PART_SIZE_MB);
        }

        let workers = args.workers.unwrap_or(DEFAULT_WORKERS);
        if workers == 0 || workers > MAX_WORKERS {
            bail!("Workers must be between 1 and {}", MAX_WORKERS);
        }

        Ok(Self {
            sources,
            source_base: normalize_key(&args.source_base),
            dest,
            source_scope: CredentialScope {
                profile: args.source_profile,
                region: args.source_region,
            },
            dest_scope: CredentialScope {
                profile: args.dest_profile,
                region: args.dest_region,
            },
            chunk_size: part_size_mb * MIB,
            auto_chunk_size: args.auto_part_size,
            workers,
            verify: args.verify,
            log_file: args.log_file,
            summary_json: args.summary_json,
            dry_run: args.dry_run,
            assume_yes: args.yes,
            quiet: args.quiet,
            progress_interval: Duration::from_secs(PROGRESS_INTERVAL_SECS),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
        })
    }

    pub fn source_bucket(&self) -> &str {
        &self.sources[0].bucket
    }
}

/// Smallest part size (whole MiB, at least 5 MiB, at most 5 GiB) that keeps
/// `object_size` within `max_parts` parts.
pub fn required_chunk_size(object_size: u64, max_parts: u64) -> u64 {
    let min_size = MIN_PART_SIZE_MB * MIB;
    let max_size = MAX_PART_SIZE_MB * MIB;
    let required = object_size.div_ceil(max_parts.max(1)).max(min_size);
    let required_mib = required.div_ceil(MIB) * MIB;
    required_mib.min(max_size)
}

/// Chunk size to use for a run whose largest object is `largest`.
///
/// Returns `Err` with the minimum workable size when `configured` is too small
/// and raising it was not allowed.
pub fn chunk_size_for(configured: u64, largest: u64, allow_raise: bool) -> Result<u64, u64> {
    if largest.div_ceil(configured) <= MAX_PARTS {
        return Ok(configured);
    }
    let required = required_chunk_size(largest, MAX_PARTS).max(configured);
    if allow_raise {
        Ok(required)
    } else {
        Err(required)
    }
}
