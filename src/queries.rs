//! Read-side views over a campaign, plus the export filter and import merge.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::models::{round2, percent, Campaign, CampaignStatus, TrackedFile};
use crate::patterns;
use crate::staleness::CRITICAL_THRESHOLD;

pub const DEFAULT_LIMIT: usize = 10;

fn by_score_desc(a: &TrackedFile, b: &TrackedFile) -> Ordering {
    b.staleness_score
        .partial_cmp(&a.staleness_score)
        .unwrap_or(Ordering::Equal)
}

/// Live, non-excluded files with the fewest visits, stalest first on ties.
pub fn least_visited(campaign: &Campaign, limit: usize) -> Vec<TrackedFile> {
    let mut files: Vec<TrackedFile> = campaign
        .live_files()
        .filter(|f| !f.excluded)
        .cloned()
        .collect();
    files.sort_by(|a, b| {
        a.visit_count
            .cmp(&b.visit_count)
            .then_with(|| by_score_desc(a, b))
    });
    files.truncate(limit);
    files
}

#[derive(Debug, Clone)]
pub struct MostStale {
    pub files: Vec<TrackedFile>,
    /// Live files scoring above the critical threshold, regardless of `limit`.
    pub critical_count: usize,
}

pub fn most_stale(campaign: &Campaign, limit: usize, threshold: f64) -> MostStale {
    let mut files: Vec<TrackedFile> = campaign
        .live_files()
        .filter(|f| f.staleness_score >= threshold)
        .cloned()
        .collect();
    files.sort_by(by_score_desc);
    files.truncate(limit);
    let critical_count = campaign
        .live_files()
        .filter(|f| f.staleness_score > CRITICAL_THRESHOLD)
        .count();
    MostStale {
        files,
        critical_count,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Coverage {
    pub campaign_id: Uuid,
    pub total_files: usize,
    pub visited_files: usize,
    pub unvisited_files: usize,
    pub coverage_percent: f64,
    pub average_visits: f64,
    pub average_staleness: f64,
}

pub fn coverage(campaign: &Campaign) -> Coverage {
    let live: Vec<&TrackedFile> = campaign.live_files().collect();
    let total = live.len();
    let visited = live.iter().filter(|f| f.visit_count > 0).count();
    let (visits, staleness) = live.iter().fold((0u64, 0.0f64), |(v, s), f| {
        (v + f.visit_count, s + f.staleness_score)
    });
    let average = |sum: f64| if total == 0 { 0.0 } else { round2(sum / total as f64) };
    Coverage {
        campaign_id: campaign.id,
        total_files: total,
        visited_files: visited,
        unvisited_files: total - visited,
        coverage_percent: percent(visited, total),
        average_visits: average(visits as f64),
        average_staleness: average(staleness),
    }
}

/// Keeps only files whose basename matches one of the comma-separated
/// `patterns`, and the visits that refer to them.
pub fn filter_export(mut campaign: Campaign, patterns: &str) -> Campaign {
    let wanted: Vec<&str> = patterns
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if wanted.is_empty() {
        return campaign;
    }
    campaign
        .tracked_files
        .retain(|f| wanted.iter().any(|p| patterns::basename_matches(p, &f.file_path)));
    let kept: HashSet<Uuid> = campaign.tracked_files.iter().map(|f| f.id).collect();
    campaign.visits.retain(|v| kept.contains(&v.file_id));
    campaign
}

/// Re-identifies an imported campaign: fresh ids for the campaign, every
/// file, visit and snapshot, with visit references remapped.
pub fn fresh_import(mut campaign: Campaign, now: DateTime<Utc>) -> Campaign {
    campaign.id = Uuid::new_v4();
    campaign.status = CampaignStatus::Active;
    campaign.created_at = now;
    campaign.updated_at = now;

    let mut remap = HashMap::new();
    for file in &mut campaign.tracked_files {
        let fresh = Uuid::new_v4();
        remap.insert(file.id, fresh);
        file.id = fresh;
    }
    campaign.visits.retain(|v| remap.contains_key(&v.file_id));
    for visit in &mut campaign.visits {
        visit.id = Uuid::new_v4();
        if let Some(id) = remap.get(&visit.file_id) {
            visit.file_id = *id;
        }
    }
    for snapshot in &mut campaign.structure_snapshots {
        snapshot.id = Uuid::new_v4();
    }
    campaign
}

fn matching_index(target: &Campaign, file: &TrackedFile) -> Option<usize> {
    target
        .file_index_by_absolute(&file.absolute_path)
        .or_else(|| {
            target
                .tracked_files
                .iter()
                .position(|t| t.file_path == file.file_path)
        })
}

/// Merges `imported` into `target`.
///
/// Patterns are replaced. Files matched by path keep the larger visit count
/// and the later `last_visited`; unmatched files are added under fresh ids.
/// Imported visits are appended with remapped file ids, skipping any visit
/// id the target already has.
pub fn merge_import(target: &mut Campaign, imported: Campaign) {
    if !imported.patterns.is_empty() {
        target.patterns = imported.patterns;
    }

    let mut remap = HashMap::new();
    for mut file in imported.tracked_files {
        match matching_index(target, &file) {
            Some(index) => {
                let existing = &mut target.tracked_files[index];
                existing.visit_count = existing.visit_count.max(file.visit_count);
                existing.last_visited = match (existing.last_visited, file.last_visited) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
                remap.insert(file.id, existing.id);
            }
            None => {
                let fresh = Uuid::new_v4();
                remap.insert(file.id, fresh);
                file.id = fresh;
                target.tracked_files.push(file);
            }
        }
    }

    let known: HashSet<Uuid> = target.visits.iter().map(|v| v.id).collect();
    for mut visit in imported.visits {
        if known.contains(&visit.id) {
            continue;
        }
        if let Some(id) = remap.get(&visit.file_id) {
            visit.file_id = *id;
            target.visits.push(visit);
        }
    }
}
