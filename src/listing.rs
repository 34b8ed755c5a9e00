use crate::store::{ObjectEntry, ObjectStore, S3Location, StoreError};
use std::collections::BTreeSet;

/// Listing a source prefix failed; the task set is unknown, so the run cannot start.
#[derive(Debug, thiserror::Error)]
#[error("failed to list {location}: {source}")]
pub struct ListingError {
    pub location: S3Location,
    #[source]
    pub source: StoreError,
}

/// Per-prefix numbers printed before the copy starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub location: S3Location,
    pub objects: usize,
    pub bytes: u64,
    pub largest: u64,
    /// Distinct first path segments below the prefix, sorted.
    pub folders: Vec<String>,
}

/// Complete listing of `prefix`, or an error. Never a truncated result.
pub async fn list_all(
    store: &dyn ObjectStore,
    prefix: &S3Location,
) -> Result<Vec<ObjectEntry>, ListingError> {
    store
        .list_objects(prefix)
        .await
        .map_err(|source| ListingError {
            location: prefix.clone(),
            source,
        })
}

/// First path segment of every key below `list_prefix`.
pub fn top_level_folders(entries: &[ObjectEntry], list_prefix: &str) -> Vec<String> {
    let pre = list_prefix.trim_end_matches('/');
    entries
        .iter()
        .filter_map(|entry| {
            let rest = if pre.is_empty() {
                entry.key.as_str()
            } else {
                entry.key.strip_prefix(pre)?
            };
            let rest = rest.trim_start_matches('/');
            rest.split('/').next().filter(|s| !s.is_empty())
        })
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn summarize(location: &S3Location, entries: &[ObjectEntry]) -> SourceSummary {
    SourceSummary {
        location: location.clone(),
        objects: entries.len(),
        bytes: entries.iter().map(|e| e.size).sum(),
        largest: entries.iter().map(|e| e.size).max().unwrap_or(0),
        folders: top_level_folders(entries, &location.key),
    }
}
