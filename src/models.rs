//! Campaign data model for the visit tracker.
//!
//! A [`Campaign`] is persisted as one JSON document holding its tracked
//! files, the append-only visit log and the append-only snapshot log.
//! [`Visit::file_id`] refers back to [`TrackedFile::id`] by value; there are
//! no pointers between entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const DEFAULT_MAX_FILES: usize = 200;

/// Excludes written into a campaign created without any.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/data/**",
    "**/tmp/**",
    "**/temp/**",
    "**/coverage/**",
    "**/dist/**",
    "**/out/**",
    "**/build/**",
    "**/.git/**",
    "**/node_modules/**",
    "**/__pycache__/**",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    #[default]
    Active,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub from_agent: String,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub status: CampaignStatus,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub tracked_files: Vec<TrackedFile>,
    #[serde(default)]
    pub visits: Vec<Visit>,
    #[serde(default)]
    pub structure_snapshots: Vec<StructureSnapshot>,
}

fn default_max_files() -> usize {
    DEFAULT_MAX_FILES
}

fn default_priority() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedFile {
    pub id: Uuid,
    pub file_path: String,
    pub absolute_path: String,
    #[serde(default)]
    pub visit_count: u64,
    pub first_seen: DateTime<Utc>,
    #[serde(default)]
    pub last_visited: Option<DateTime<Utc>>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub staleness_score: f64,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub excluded: bool,
    #[serde(default = "default_priority")]
    pub priority_weight: f64,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Visit {
    pub id: Uuid,
    pub file_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub findings: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructureSnapshot {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub total_files: usize,
    #[serde(default)]
    pub new_files: Vec<String>,
    #[serde(default)]
    pub deleted_files: Vec<String>,
    #[serde(default)]
    pub moved_files: BTreeMap<String, String>,
    #[serde(default)]
    pub snapshot_data: Map<String, Value>,
}

impl Campaign {
    /// A fresh, empty, active campaign.
    pub fn new(name: impl Into<String>, patterns: Vec<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            patterns,
            exclude_patterns: Vec::new(),
            location: None,
            tag: None,
            notes: String::new(),
            description: String::new(),
            from_agent: String::new(),
            max_files: DEFAULT_MAX_FILES,
            created_at: now,
            updated_at: now,
            status: CampaignStatus::Active,
            metadata: Map::new(),
            tracked_files: Vec::new(),
            visits: Vec::new(),
            structure_snapshots: Vec::new(),
        }
    }

    pub fn file_by_id(&self, id: Uuid) -> Option<&TrackedFile> {
        self.tracked_files.iter().find(|f| f.id == id)
    }

    pub fn file_by_id_mut(&mut self, id: Uuid) -> Option<&mut TrackedFile> {
        self.tracked_files.iter_mut().find(|f| f.id == id)
    }

    pub fn file_by_absolute(&self, absolute: &str) -> Option<&TrackedFile> {
        self.tracked_files
            .iter()
            .find(|f| f.absolute_path == absolute)
    }

    pub fn file_index_by_absolute(&self, absolute: &str) -> Option<usize> {
        self.tracked_files
            .iter()
            .position(|f| f.absolute_path == absolute)
    }

    /// Tracked files that have not been marked deleted.
    pub fn live_files(&self) -> impl Iterator<Item = &TrackedFile> {
        self.tracked_files.iter().filter(|f| !f.deleted)
    }
}

impl TrackedFile {
    pub fn new(
        file_path: String,
        absolute_path: String,
        last_modified: DateTime<Utc>,
        size_bytes: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_path,
            absolute_path,
            visit_count: 0,
            first_seen: now,
            last_visited: None,
            last_modified,
            size_bytes,
            content_hash: None,
            staleness_score: 0.0,
            deleted: false,
            excluded: false,
            priority_weight: 1.0,
            notes: String::new(),
            metadata: Map::new(),
        }
    }
}

/// A campaign as served over the API, with coverage fields computed on read.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignView {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub total_files: usize,
    pub visited_files: usize,
    pub coverage_percent: f64,
}

impl From<Campaign> for CampaignView {
    fn from(campaign: Campaign) -> Self {
        let total_files = campaign.live_files().count();
        let visited_files = campaign.live_files().filter(|f| f.visit_count > 0).count();
        let coverage_percent = percent(visited_files, total_files);
        Self {
            campaign,
            total_files,
            visited_files,
            coverage_percent,
        }
    }
}

/// `100 * part / whole` rounded to two decimals; 0 when `whole` is 0.
pub fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(100.0 * part as f64 / whole as f64)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_computes_coverage_over_live_files() {
        let now = Utc::now();
        let mut campaign = Campaign::new("c", vec!["**/*".into()], now);
        for (i, path) in ["a", "b", "c", "d"].iter().enumerate() {
            let mut file =
                TrackedFile::new(path.to_string(), format!("/r/{}", path), now, 1, now);
            file.visit_count = if i == 0 { 2 } else { 0 };
            file.deleted = i == 3;
            campaign.tracked_files.push(file);
        }
        let view = CampaignView::from(campaign);
        assert_eq!(view.total_files, 3);
        assert_eq!(view.visited_files, 1);
        assert_eq!(view.coverage_percent, 33.33);
    }

    #[test]
    fn lenient_deserialization_fills_defaults() {
        let now = Utc::now();
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "name": "imported",
            "patterns": ["*.rs"],
            "created_at": now,
            "updated_at": now,
            "tracked_files": [{
                "id": Uuid::new_v4(),
                "file_path": "a.rs",
                "absolute_path": "/x/a.rs",
                "first_seen": now,
                "last_modified": now
            }]
        });
        let campaign: Campaign = serde_json::from_value(json).unwrap();
        assert_eq!(campaign.max_files, DEFAULT_MAX_FILES);
        assert_eq!(campaign.status, CampaignStatus::Active);
        assert_eq!(campaign.tracked_files[0].priority_weight, 1.0);
        assert!(campaign.tracked_files[0].last_visited.is_none());
    }
}
