//! Visit recording, manual adjustment and reset.
//!
//! All functions mutate a loaded [`Campaign`] in memory and recompute
//! staleness; callers persist the result with a single `save`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::{Campaign, TrackedFile, Visit};
use crate::patterns;
use crate::staleness;
use crate::sync::{base_dir, stat};

/// A visited file, given either as a bare path or with its own context.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FileRef {
    Path(String),
    Detailed {
        path: String,
        #[serde(default)]
        context: Option<String>,
    },
}

impl FileRef {
    fn path(&self) -> &str {
        match self {
            FileRef::Path(path) => path,
            FileRef::Detailed { path, .. } => path,
        }
    }

    fn context(&self) -> Option<&str> {
        match self {
            FileRef::Path(_) => None,
            FileRef::Detailed { context, .. } => context.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisitRequest {
    pub files: Vec<FileRef>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Stored on each visit as its findings.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub file_notes: BTreeMap<String, String>,
}

/// Returns the index of the tracked file for `input`, enrolling it first
/// when it is not tracked yet.
fn ensure_tracked(
    campaign: &mut Campaign,
    base: &Path,
    input: &str,
    now: DateTime<Utc>,
) -> usize {
    let (relative, absolute) = patterns::resolve(base, input);
    if let Some(index) = campaign.file_index_by_absolute(&absolute) {
        return index;
    }
    let (modified, size) = stat(Path::new(&absolute)).unwrap_or((now, 0));
    campaign
        .tracked_files
        .push(TrackedFile::new(relative, absolute, modified, size, now));
    campaign.tracked_files.len() - 1
}

/// Records one visit per entry in `request.files`. Returns how many were
/// recorded.
pub fn record(
    campaign: &mut Campaign,
    request: &VisitRequest,
    now: DateTime<Utc>,
) -> Result<usize, ServiceError> {
    if request.files.is_empty() {
        return Err(ServiceError::invalid("files must not be empty"));
    }
    if let Some(empty) = request.files.iter().find(|f| f.path().trim().is_empty()) {
        return Err(ServiceError::invalid(format!(
            "file path must not be empty: {:?}",
            empty.path()
        )));
    }

    let base = base_dir(campaign);
    for file_ref in &request.files {
        let index = ensure_tracked(campaign, &base, file_ref.path(), now);
        let file = &mut campaign.tracked_files[index];
        file.visit_count += 1;
        file.last_visited = Some(now);
        let file_id = file.id;

        campaign.visits.push(Visit {
            id: Uuid::new_v4(),
            file_id,
            timestamp: now,
            context: file_ref
                .context()
                .or(request.context.as_deref())
                .map(str::to_string),
            agent: request.agent.clone(),
            conversation_id: request.conversation_id.clone(),
            findings: request.metadata.clone(),
        });
    }

    for (path, note) in &request.file_notes {
        let (_, absolute) = patterns::resolve(&base, path);
        if let Some(index) = campaign.file_index_by_absolute(&absolute) {
            campaign.tracked_files[index].notes = note.clone();
        }
    }

    staleness::refresh(campaign, now);
    Ok(request.files.len())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustAction {
    Increment,
    Decrement,
}

impl AdjustAction {
    fn context(self) -> &'static str {
        match self {
            AdjustAction::Increment => "manual-increment",
            AdjustAction::Decrement => "manual-decrement",
        }
    }
}

/// Manually moves a file's visit counter by one and logs a synthetic visit.
pub fn adjust(
    campaign: &mut Campaign,
    file_id: Uuid,
    action: AdjustAction,
    now: DateTime<Utc>,
) -> Result<TrackedFile, ServiceError> {
    let file = campaign
        .file_by_id_mut(file_id)
        .ok_or_else(|| ServiceError::not_found(format!("file not found: {}", file_id)))?;

    match action {
        AdjustAction::Increment => {
            file.visit_count += 1;
            file.last_visited = Some(now);
        }
        AdjustAction::Decrement => {
            file.visit_count = file.visit_count.saturating_sub(1);
            if file.visit_count == 0 {
                file.last_visited = None;
            }
        }
    }

    campaign.visits.push(Visit {
        id: Uuid::new_v4(),
        file_id,
        timestamp: now,
        context: Some(action.context().to_string()),
        agent: None,
        conversation_id: None,
        findings: Map::new(),
    });

    staleness::refresh(campaign, now);
    campaign
        .file_by_id(file_id)
        .cloned()
        .ok_or_else(|| ServiceError::not_found(format!("file not found: {}", file_id)))
}

/// Clears the visit log and every file's counter.
pub fn reset(campaign: &mut Campaign, now: DateTime<Utc>) {
    campaign.visits.clear();
    for file in &mut campaign.tracked_files {
        file.visit_count = 0;
        file.last_visited = None;
    }
    staleness::refresh(campaign, now);
}
