use crate::store::{ObjectEntry, S3Location};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// One object to copy. Built once during planning and never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyTask {
    /// 1-based position in the plan.
    pub index: usize,
    pub total: usize,
    pub source: S3Location,
    pub dest: S3Location,
    /// Size reported by the listing; the copier re-probes before copying.
    pub listed_size: u64,
}

impl CopyTask {
    /// `[index/total]` tag used on every log line of this task.
    pub fn tag(&self) -> String {
        format!("[{}/{}]", self.index, self.total)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{first} and {second} would both be copied to {dest}")]
pub struct MappingCollision {
    pub dest: S3Location,
    pub first: String,
    pub second: String,
}

/// Forward slashes only, no empty segments, no leading slash.
/// A trailing slash (folder placeholder) is kept.
pub fn normalize_key(key: &str) -> String {
    let key = key.replace('\\', "/");
    let trailing = key.ends_with('/');
    let mut out = key
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    if trailing && !out.is_empty() {
        out.push('/');
    }
    out
}

/// Prefix used to list a source path: normalized, with a trailing slash unless empty,
/// so `DB3` lists `DB3/...` but not `DB30/...`.
pub fn list_prefix(prefix: &str) -> String {
    let mut p = normalize_key(prefix);
    if !p.is_empty() && !p.ends_with('/') {
        p.push('/');
    }
    p
}

/// Destination key for `source_key`, listed under `source_list_prefix`.
///
/// The part of the list prefix below `source_base_prefix` is kept as a
/// subpath, so sibling source prefixes land as siblings under `dest_prefix`.
/// When the list prefix is not under the base, the whole list prefix is kept.
pub fn destination_key(
    source_key: &str,
    source_list_prefix: &str,
    source_base_prefix: &str,
    dest_prefix: &str,
) -> String {
    let pre = normalize_key(source_list_prefix);
    let pre = pre.trim_end_matches('/');
    let base = normalize_key(source_base_prefix);
    let base = base.trim_end_matches('/');

    let subpath = if base.is_empty() {
        pre
    } else if pre == base {
        ""
    } else {
        pre.strip_prefix(base)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(pre)
    };

    let relative = if pre.is_empty() {
        source_key
    } else {
        source_key
            .strip_prefix(pre)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(source_key)
    };

    normalize_key(&format!("{}/{}/{}", dest_prefix, subpath, relative))
}

/// Maps every listed object to a task, in listing order.
///
/// A key listed under two overlapping source prefixes is copied once.
/// Two different source keys mapping to one destination key is an error.
/// A folder marker that maps to the bucket root itself (empty key) is skipped.
pub fn plan_tasks(
    listings: &[(S3Location, Vec<ObjectEntry>)],
    source_base_prefix: &str,
    dest: &S3Location,
) -> Result<Vec<CopyTask>, MappingCollision> {
    let mut seen_sources: HashSet<(&str, &str)> = HashSet::new();
    let mut seen_dests: HashMap<String, String> = HashMap::new();
    let mut pairs = Vec::new();

    for (prefix, entries) in listings {
        for entry in entries {
            if !seen_sources.insert((prefix.bucket.as_str(), entry.key.as_str())) {
                continue;
            }
            let dest_key = destination_key(&entry.key, &prefix.key, source_base_prefix, &dest.key);
            if dest_key.is_empty() {
                warn!(
                    "Skipping {}: it maps to the root of {}",
                    prefix.with_key(entry.key.clone()),
                    dest.bucket
                );
                continue;
            }
            if let Some(first) = seen_dests.insert(dest_key.clone(), entry.key.clone()) {
                return Err(MappingCollision {
                    dest: dest.with_key(dest_key),
                    first,
                    second: entry.key.clone(),
                });
            }
            pairs.push((prefix.with_key(entry.key.clone()), dest.with_key(dest_key), entry.size));
        }
    }

    let total = pairs.len();
    Ok(pairs
        .into_iter()
        .enumerate()
        .map(|(i, (source, dest, listed_size))| CopyTask {
            index: i + 1,
            total,
            source,
            dest,
            listed_size,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(keys: &[&str]) -> Vec<ObjectEntry> {
        keys.iter()
            .map(|k| ObjectEntry {
                key: k.to_string(),
                size: 1,
            })
            .collect()
    }

    /// Ten keys under A/B/ with base A/ and destination D/ all land under D/B/.
    #[test]
    fn base_prefix_is_stripped_but_subpath_kept() {
        let keys: Vec<String> = (0..10).map(|i| format!("A/B/part-{i}/data.bin")).collect();
        for key in &keys {
            let rest = key.strip_prefix("A/B/").unwrap();
            assert_eq!(
                destination_key(key, "A/B/", "A/", "D/"),
                format!("D/B/{rest}")
            );
        }
    }

    /// Sibling source prefixes under one base become siblings under the destination.
    #[test]
    fn sibling_prefixes_stay_siblings() {
        assert_eq!(
            destination_key("tgcf/MX/DB3/x.parquet", "tgcf/MX/DB3/", "tgcf/MX/", "MX2/"),
            "MX2/DB3/x.parquet"
        );
        assert_eq!(
            destination_key("tgcf/MX/DB4/maid/y.csv", "tgcf/MX/DB4/", "tgcf/MX/", "MX2/"),
            "MX2/DB4/maid/y.csv"
        );
    }

    /// Mapping is deterministic: the same inputs always yield the same key.
    #[test]
    fn mapping_is_idempotent() {
        let first = destination_key("a/b/c.txt", "a/b", "a", "out");
        let second = destination_key("a/b/c.txt", "a/b", "a", "out");
        assert_eq!(first, second);
        assert_eq!(first, "out/b/c.txt");
    }

    /// Redundant and backslash separators collapse to single forward slashes.
    #[test]
    fn separators_are_normalized() {
        assert_eq!(destination_key("a//b/c", "a/", "", "//dst//"), "dst/a/b/c");
        assert_eq!(normalize_key("x\\y//z/"), "x/y/z/");
        assert_eq!(normalize_key("/"), "");
    }

    /// With no base, the list prefix is kept; with an empty destination the key is relative.
    #[test]
    fn empty_base_and_empty_destination() {
        assert_eq!(destination_key("logs/2024/a", "logs/", "", "backup/"), "backup/logs/2024/a");
        assert_eq!(destination_key("logs/2024/a", "logs/", "logs/", ""), "2024/a");
        assert_eq!(destination_key("top.txt", "", "", "d/"), "d/top.txt");
    }

    /// A base that only matches part of a path segment is not stripped.
    #[test]
    fn base_matches_whole_segments_only() {
        assert_eq!(destination_key("AB/C/f", "AB/C/", "A", "D/"), "D/AB/C/f");
    }

    /// Folder placeholder keys keep their trailing slash.
    #[test]
    fn folder_markers_keep_trailing_slash() {
        assert_eq!(destination_key("A/B/dir/", "A/B/", "A/", "D/"), "D/B/dir/");
    }

    #[test]
    fn list_prefix_adds_trailing_slash() {
        assert_eq!(list_prefix("tgcf/MX/DB3"), "tgcf/MX/DB3/");
        assert_eq!(list_prefix("tgcf/MX/DB3/"), "tgcf/MX/DB3/");
        assert_eq!(list_prefix(""), "");
    }

    /// Tasks are numbered 1..=N in listing order and carry the total.
    #[test]
    fn plan_numbers_tasks() {
        let src = S3Location::new("samples", "A/B/");
        let dest = S3Location::new("archive", "D/");
        let tasks = plan_tasks(&[(src, entries(&["A/B/1", "A/B/2", "A/B/3"]))], "A/", &dest).unwrap();

        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].index, 1);
        assert_eq!(tasks[2].index, 3);
        assert!(tasks.iter().all(|t| t.total == 3));
        assert_eq!(tasks[1].source, S3Location::new("samples", "A/B/2"));
        assert_eq!(tasks[1].dest, S3Location::new("archive", "D/B/2"));
        assert_eq!(tasks[1].tag(), "[2/3]");
    }

    /// Overlapping source prefixes do not copy the same key twice.
    #[test]
    fn overlapping_sources_are_deduplicated() {
        let dest = S3Location::new("archive", "D/");
        let tasks = plan_tasks(
            &[
                (S3Location::new("s", "A/"), entries(&["A/B/1", "A/C/2"])),
                (S3Location::new("s", "A/B/"), entries(&["A/B/1"])),
            ],
            "",
            &dest,
        )
        .unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].total, 2);
    }

    /// The marker of a base-equal prefix copied to a bucket root would have an empty key; it is skipped.
    #[test]
    fn root_marker_is_skipped() {
        let listed = vec![
            ObjectEntry {
                key: "A/".to_string(),
                size: 0,
            },
            ObjectEntry {
                key: "A/f".to_string(),
                size: 3,
            },
        ];
        let tasks = plan_tasks(
            &[(S3Location::new("samples", "A/"), listed)],
            "A/",
            &S3Location::new("archive", ""),
        )
        .unwrap();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].dest, S3Location::new("archive", "f"));
        assert_eq!(tasks[0].index, 1);
        assert_eq!(tasks[0].total, 1);
        assert!(tasks.iter().all(|t| !t.dest.key.is_empty()));
    }

    /// Distinct source keys that collapse to one destination key are rejected.
    #[test]
    fn destination_collisions_are_rejected() {
        let dest = S3Location::new("archive", "D/");
        let result = plan_tasks(
            &[
                (S3Location::new("s", "X/B/"), entries(&["X/B/f"])),
                (S3Location::new("s", "Y/B/"), entries(&["Y/B/f"])),
            ],
            "",
            &dest,
        );
        // Without a base both keep their own subpath, so no collision.
        assert!(result.is_ok());

        let err = plan_tasks(
            &[(S3Location::new("s", "X/"), entries(&["X/a//f", "X/a/f"]))],
            "",
            &dest,
        )
        .unwrap_err();
        assert_eq!(err.dest.key, "D/X/a/f");
    }
}
