//! Reconciles a campaign's tracked files with the filesystem.
//!
//! Discovery walks the literal directory prefix of each (brace-expanded)
//! include pattern and matches files against the pattern. Relative patterns
//! and excludes are matched against base-relative paths, absolute ones
//! against the full path. Excluded directories are pruned from the walk.

use chrono::{DateTime, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::ServiceError;
use crate::models::{Campaign, StructureSnapshot, TrackedFile};
use crate::patterns::{self, ExcludeSet};
use crate::staleness;

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub added_files: Vec<String>,
    pub deleted_files: Vec<String>,
    pub total_files: usize,
    pub snapshot_id: Uuid,
}

/// The directory every relative path of `campaign` is resolved against.
pub fn base_dir(campaign: &Campaign) -> PathBuf {
    let base = match campaign.location.as_deref().map(str::trim) {
        Some(location) if !location.is_empty() => PathBuf::from(location),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    patterns::canonical_or_clean(&base)
}

/// Modification time and size of a file, if it can be read.
pub fn stat(path: &Path) -> Option<(DateTime<Utc>, u64)> {
    let metadata = std::fs::metadata(path).ok()?;
    let modified = metadata.modified().ok().map(DateTime::<Utc>::from)?;
    Some((modified, metadata.len()))
}

fn content_hash(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    Some(format!("{:x}", Sha256::digest(&bytes)))
}

/// Matches `patterns` under `base`, minus `excludes`.
///
/// Returns canonical absolute paths, deduplicated and sorted.
pub fn discover(
    base: &Path,
    include: &[String],
    exclude: &[String],
) -> Result<Vec<PathBuf>, ServiceError> {
    let excludes = ExcludeSet::new(exclude)?;
    let mut seen = HashSet::new();
    let mut found = Vec::new();

    for pattern in include {
        for expanded in patterns::expand_braces(pattern.trim()) {
            if expanded.is_empty() {
                continue;
            }
            let matcher = patterns::compile(&expanded)?;
            let absolute_pattern = Path::new(&expanded).is_absolute();
            let root = if absolute_pattern {
                patterns::literal_root(&expanded)
            } else {
                base.join(patterns::literal_root(&expanded))
            };
            if !root.is_dir() {
                continue;
            }

            let walker = WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| {
                    e.depth() == 0 || !e.file_type().is_dir() || !excludes.prunes_dir(e.file_name())
                });

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping unreadable entry");
                        continue;
                    }
                };
                if entry.file_type().is_dir() {
                    continue;
                }

                let path = entry.path();
                let relative = path.strip_prefix(base).unwrap_or(path);
                let candidate = if absolute_pattern { path } else { relative };
                if !matcher.is_match(candidate) || excludes.is_excluded(relative) {
                    continue;
                }

                let canonical = patterns::canonical_or_clean(path);
                if seen.insert(canonical.clone()) {
                    found.push(canonical);
                }
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Runs one sync of `campaign` against the filesystem.
///
/// `include` overrides the campaign's patterns for this run. When the match
/// count exceeds `max_files` nothing is changed. Existing files are refreshed
/// or marked deleted; visit counters are never touched.
pub fn sync(
    campaign: &mut Campaign,
    include: Option<&[String]>,
    now: DateTime<Utc>,
) -> Result<SyncOutcome, ServiceError> {
    let include: Vec<String> = include
        .filter(|p| !p.is_empty())
        .map(<[String]>::to_vec)
        .unwrap_or_else(|| campaign.patterns.clone());
    if include.iter().all(|p| p.trim().is_empty()) {
        return Err(ServiceError::invalid("patterns must not be empty"));
    }

    let base = base_dir(campaign);
    let matched = discover(&base, &include, &campaign.exclude_patterns)?;

    // Nothing is mutated until the post-sync live set is known to fit.
    let on_disk: Vec<Option<(DateTime<Utc>, u64)>> = campaign
        .tracked_files
        .iter()
        .map(|f| stat(Path::new(&f.absolute_path)))
        .collect();
    let fresh: Vec<&PathBuf> = matched
        .iter()
        .filter(|path| {
            campaign
                .file_by_absolute(&patterns::path_string(path))
                .is_none()
        })
        .collect();
    let live_after = on_disk.iter().filter(|s| s.is_some()).count() + fresh.len();
    if live_after > campaign.max_files {
        return Err(ServiceError::SizeLimit(format!(
            "sync would track {} live files ({} new), exceeding max_files of {}",
            live_after,
            fresh.len(),
            campaign.max_files
        )));
    }

    let mut added_files = Vec::new();
    let mut new_files = Vec::with_capacity(fresh.len());
    for path in fresh {
        let (modified, size) = stat(path).unwrap_or((now, 0));
        let relative = patterns::relative_to(&base, path);
        let mut file = TrackedFile::new(
            relative.clone(),
            patterns::path_string(path),
            modified,
            size,
            now,
        );
        file.content_hash = content_hash(path);
        new_files.push(file);
        added_files.push(relative);
    }

    let mut deleted_files = Vec::new();
    for (file, state) in campaign.tracked_files.iter_mut().zip(on_disk) {
        match state {
            Some((modified, size)) => {
                file.last_modified = modified;
                file.size_bytes = size;
                file.deleted = false;
            }
            None if !file.deleted => {
                file.deleted = true;
                deleted_files.push(file.file_path.clone());
            }
            None => {}
        }
    }
    campaign.tracked_files.extend(new_files);

    let snapshot = StructureSnapshot {
        id: Uuid::new_v4(),
        timestamp: now,
        total_files: campaign.tracked_files.len(),
        new_files: added_files.clone(),
        deleted_files: deleted_files.clone(),
        moved_files: Default::default(),
        snapshot_data: json!({
            "patterns": include,
            "exclude_patterns": campaign.exclude_patterns,
            "base_dir": patterns::path_string(&base),
        })
        .as_object()
        .cloned()
        .unwrap_or_default(),
    };
    let snapshot_id = snapshot.id;
    let total_files = snapshot.total_files;
    campaign.structure_snapshots.push(snapshot);
    staleness::refresh(campaign, now);

    tracing::info!(
        campaign = %campaign.id,
        added = added_files.len(),
        deleted = deleted_files.len(),
        total = total_files,
        "campaign synced"
    );

    Ok(SyncOutcome {
        added_files,
        deleted_files,
        total_files,
        snapshot_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_EXCLUDES;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("pkg")).unwrap();
        fs::create_dir_all(root.join("node_modules/dep")).unwrap();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::write(root.join("a.go"), "package main").unwrap();
        fs::write(root.join("pkg/b.go"), "package pkg").unwrap();
        fs::write(root.join("pkg/readme.md"), "# pkg").unwrap();
        fs::write(root.join("node_modules/dep/c.go"), "package dep").unwrap();
        fs::write(root.join("build/gen.go"), "package gen").unwrap();
        tmp
    }

    fn campaign(root: &Path, patterns: &[&str]) -> Campaign {
        let mut c = Campaign::new(
            "sync",
            patterns.iter().map(|p| p.to_string()).collect(),
            Utc::now(),
        );
        c.location = Some(root.to_string_lossy().to_string());
        c.exclude_patterns = DEFAULT_EXCLUDES.iter().map(|p| p.to_string()).collect();
        c
    }

    fn relative_paths(c: &Campaign) -> Vec<String> {
        let mut paths: Vec<String> = c.tracked_files.iter().map(|f| f.file_path.clone()).collect();
        paths.sort();
        paths
    }

    #[test]
    fn globstar_with_default_excludes() {
        let tmp = tree();
        let mut c = campaign(tmp.path(), &["**/*.go"]);
        let outcome = sync(&mut c, None, Utc::now()).unwrap();
        assert_eq!(relative_paths(&c), vec!["a.go", "pkg/b.go"]);
        assert_eq!(outcome.added_files.len(), 2);
        assert_eq!(c.structure_snapshots.len(), 1);
        assert!(c.tracked_files.iter().all(|f| f.content_hash.is_some()));
    }

    #[test]
    fn repeated_sync_adds_nothing() {
        let tmp = tree();
        let mut c = campaign(tmp.path(), &["**/*.{go,md}"]);
        sync(&mut c, None, Utc::now()).unwrap();
        let first = c.tracked_files.len();
        let outcome = sync(&mut c, None, Utc::now()).unwrap();
        assert_eq!(c.tracked_files.len(), first);
        assert!(outcome.added_files.is_empty());
        assert_eq!(c.structure_snapshots.len(), 2);
    }

    #[test]
    fn single_star_does_not_cross_directories() {
        let tmp = tree();
        let mut c = campaign(tmp.path(), &["*.go"]);
        sync(&mut c, None, Utc::now()).unwrap();
        assert_eq!(relative_paths(&c), vec!["a.go"]);
    }

    #[test]
    fn overlapping_patterns_deduplicate() {
        let tmp = tree();
        let mut c = campaign(tmp.path(), &["**/*.go", "pkg/*.go", "a.go"]);
        sync(&mut c, None, Utc::now()).unwrap();
        assert_eq!(relative_paths(&c), vec!["a.go", "pkg/b.go"]);
    }

    #[test]
    fn exceeding_max_files_changes_nothing() {
        let tmp = tree();
        let mut c = campaign(tmp.path(), &["**/*"]);
        c.max_files = 1;
        let before = c.clone();
        let err = sync(&mut c, None, Utc::now()).unwrap_err();
        assert!(matches!(err, ServiceError::SizeLimit(_)));
        assert_eq!(c, before);
    }

    #[test]
    fn max_files_counts_files_already_tracked() {
        let tmp = tree();
        let mut c = campaign(tmp.path(), &["**/*.go"]);
        c.max_files = 2;
        sync(&mut c, None, Utc::now()).unwrap();
        let before = c.clone();

        let only_md = vec!["**/*.md".to_string()];
        let err = sync(&mut c, Some(&only_md), Utc::now()).unwrap_err();
        assert!(matches!(err, ServiceError::SizeLimit(_)));
        assert_eq!(c, before);

        // A vanished file frees its slot.
        fs::remove_file(tmp.path().join("a.go")).unwrap();
        sync(&mut c, Some(&only_md), Utc::now()).unwrap();
        assert_eq!(c.live_files().count(), 2);
        assert!(c.live_files().count() <= c.max_files);
    }

    #[test]
    fn vanished_files_are_marked_deleted_without_touching_visits() {
        let tmp = tree();
        let mut c = campaign(tmp.path(), &["**/*.go"]);
        sync(&mut c, None, Utc::now()).unwrap();
        let visited_at = Utc::now();
        for f in &mut c.tracked_files {
            f.visit_count = 3;
            f.last_visited = Some(visited_at);
        }

        fs::remove_file(tmp.path().join("pkg/b.go")).unwrap();
        let outcome = sync(&mut c, None, Utc::now()).unwrap();
        assert_eq!(outcome.deleted_files, vec!["pkg/b.go"]);
        let b = c.tracked_files.iter().find(|f| f.file_path == "pkg/b.go").unwrap();
        assert!(b.deleted);
        assert!(c
            .tracked_files
            .iter()
            .all(|f| f.visit_count == 3 && f.last_visited == Some(visited_at)));
    }

    #[test]
    fn override_patterns_apply_to_one_run() {
        let tmp = tree();
        let mut c = campaign(tmp.path(), &["**/*.go"]);
        let only_md = vec!["**/*.md".to_string()];
        sync(&mut c, Some(&only_md), Utc::now()).unwrap();
        assert_eq!(relative_paths(&c), vec!["pkg/readme.md"]);
        assert_eq!(c.patterns, vec!["**/*.go"]);
    }

    #[test]
    fn invalid_glob_is_invalid_input() {
        let tmp = tree();
        let mut c = campaign(tmp.path(), &["src/[.go"]);
        assert!(matches!(
            sync(&mut c, None, Utc::now()),
            Err(ServiceError::InvalidInput(_))
        ));
    }
}
