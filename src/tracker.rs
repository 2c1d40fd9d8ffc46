//! Campaign operations: load, mutate in memory, save.
//!
//! Each mutating call is a whole-document replacement. Concurrent callers
//! mutating the same campaign are not serialised against each other; the
//! last `save` wins, appended visits and snapshots included.
//!
//! Operations that can introduce a campaign name (create, import,
//! find-or-create) hold `names` from the uniqueness check until the save.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::error::ServiceError;
use crate::models::{Campaign, CampaignView, TrackedFile, DEFAULT_EXCLUDES};
use crate::patterns;
use crate::queries::{self, Coverage, MostStale};
use crate::staleness;
use crate::store::CampaignStore;
use crate::sync::{self, SyncOutcome};
use crate::visits::{self, AdjustAction, VisitRequest};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCampaign {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Option<Vec<String>>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub from_agent: Option<String>,
    #[serde(default)]
    pub max_files: Option<usize>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CampaignPatch {
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BulkExclude {
    pub updated: usize,
    pub not_found: Vec<String>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub struct Tracker {
    store: CampaignStore,
    clock: SharedClock,
    default_max_files: usize,
    names: Mutex<()>,
}

impl Tracker {
    pub fn new(dir: impl Into<PathBuf>, clock: SharedClock, default_max_files: usize) -> Self {
        Self {
            store: CampaignStore::new(dir, clock.clone()),
            clock,
            default_max_files,
            names: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &CampaignStore {
        &self.store
    }

    async fn load_fresh(&self, id: Uuid) -> Result<Campaign, ServiceError> {
        let mut campaign = self.store.load(id).await?;
        staleness::refresh(&mut campaign, self.clock.now());
        Ok(campaign)
    }

    /// All campaigns, newest first.
    pub async fn list(&self) -> Result<Vec<CampaignView>, ServiceError> {
        let now = self.clock.now();
        let mut campaigns = self.store.load_all().await?;
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns
            .into_iter()
            .map(|mut c| {
                staleness::refresh(&mut c, now);
                CampaignView::from(c)
            })
            .collect())
    }

    pub async fn get(&self, id: Uuid) -> Result<CampaignView, ServiceError> {
        Ok(self.load_fresh(id).await?.into())
    }

    async fn name_taken(&self, name: &str) -> Result<bool, ServiceError> {
        Ok(self.store.load_all().await?.iter().any(|c| c.name == name))
    }

    /// Creates a campaign and runs its first sync.
    ///
    /// Exceeding `max_files` fails the create. Any other sync failure is
    /// recorded in the campaign metadata and the campaign is still saved.
    pub async fn create(&self, input: NewCampaign) -> Result<CampaignView, ServiceError> {
        let _names = self.names.lock().await;
        self.create_unlocked(input).await
    }

    /// Caller must hold `names`.
    async fn create_unlocked(&self, input: NewCampaign) -> Result<CampaignView, ServiceError> {
        let name = non_blank(input.name.as_deref())
            .ok_or_else(|| ServiceError::invalid("name is required"))?
            .to_string();
        if input.patterns.iter().all(|p| p.trim().is_empty()) {
            return Err(ServiceError::invalid("patterns must not be empty"));
        }
        patterns::validate_patterns(&input.patterns)?;
        if let Some(excludes) = &input.exclude_patterns {
            patterns::validate_patterns(excludes)?;
        }
        let max_files = input.max_files.unwrap_or(self.default_max_files);
        if max_files == 0 {
            return Err(ServiceError::invalid("max_files must be positive"));
        }
        if self.name_taken(&name).await? {
            return Err(ServiceError::Conflict(format!(
                "campaign with name '{}' already exists",
                name
            )));
        }

        let now = self.clock.now();
        let mut campaign = Campaign::new(name, input.patterns, now);
        campaign.exclude_patterns = match input.exclude_patterns {
            Some(excludes) if !excludes.is_empty() => excludes,
            _ => DEFAULT_EXCLUDES.iter().map(|p| p.to_string()).collect(),
        };
        campaign.location = non_blank(input.location.as_deref()).map(str::to_string);
        campaign.tag = non_blank(input.tag.as_deref()).map(str::to_string);
        campaign.notes = input.notes.unwrap_or_default();
        campaign.description = input.description.unwrap_or_default();
        campaign.from_agent = input.from_agent.unwrap_or_default();
        campaign.max_files = max_files;
        campaign.metadata = input.metadata;

        let (mut campaign, result) = self.run_sync(campaign, None).await?;
        campaign
            .metadata
            .insert("auto_sync_attempted".into(), json!(true));
        match result {
            Ok(outcome) => {
                campaign
                    .metadata
                    .insert("auto_sync_success".into(), json!(true));
                campaign.metadata.insert(
                    "auto_sync_files_added".into(),
                    json!(outcome.added_files.len()),
                );
            }
            Err(err @ ServiceError::SizeLimit(_)) => return Err(err),
            Err(err) => {
                tracing::warn!(campaign = %campaign.name, error = %err, "initial sync failed");
                campaign
                    .metadata
                    .insert("auto_sync_error".into(), json!(err.to_string()));
                campaign
                    .metadata
                    .insert("auto_sync_files_added".into(), json!(0));
            }
        }

        self.store.save(&mut campaign).await?;
        tracing::info!(
            campaign = %campaign.id,
            name = %campaign.name,
            files = campaign.tracked_files.len(),
            "campaign created"
        );
        Ok(campaign.into())
    }

    /// Runs a sync off the async runtime and hands the campaign back.
    async fn run_sync(
        &self,
        mut campaign: Campaign,
        include: Option<Vec<String>>,
    ) -> Result<(Campaign, Result<SyncOutcome, ServiceError>), ServiceError> {
        let now = self.clock.now();
        tokio::task::spawn_blocking(move || {
            let result = sync::sync(&mut campaign, include.as_deref(), now);
            (campaign, result)
        })
        .await
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("sync task failed: {}", e)))
    }

    pub async fn update(
        &self,
        id: Uuid,
        patch: CampaignPatch,
    ) -> Result<CampaignView, ServiceError> {
        let mut campaign = self.load_fresh(id).await?;
        if let Some(notes) = patch.notes {
            campaign.notes = notes;
        }
        if let Some(description) = patch.description {
            campaign.description = description;
        }
        if let Some(tag) = patch.tag {
            campaign.tag = non_blank(Some(&tag)).map(str::to_string);
        }
        self.store.save(&mut campaign).await?;
        Ok(campaign.into())
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        self.store.delete(id).await?;
        tracing::info!(campaign = %id, "campaign deleted");
        Ok(())
    }

    pub async fn sync(
        &self,
        id: Uuid,
        include: Option<Vec<String>>,
    ) -> Result<SyncOutcome, ServiceError> {
        if let Some(include) = &include {
            patterns::validate_patterns(include)?;
        }
        let campaign = self.store.load(id).await?;
        let (mut campaign, result) = self.run_sync(campaign, include).await?;
        let outcome = result?;
        self.store.save(&mut campaign).await?;
        Ok(outcome)
    }

    pub async fn record_visits(
        &self,
        id: Uuid,
        request: VisitRequest,
    ) -> Result<usize, ServiceError> {
        let mut campaign = self.store.load(id).await?;
        let recorded = visits::record(&mut campaign, &request, self.clock.now())?;
        self.store.save(&mut campaign).await?;
        Ok(recorded)
    }

    pub async fn adjust_visit(
        &self,
        id: Uuid,
        file_id: Uuid,
        action: AdjustAction,
    ) -> Result<TrackedFile, ServiceError> {
        let mut campaign = self.store.load(id).await?;
        let file = visits::adjust(&mut campaign, file_id, action, self.clock.now())?;
        self.store.save(&mut campaign).await?;
        Ok(file)
    }

    pub async fn reset(&self, id: Uuid) -> Result<CampaignView, ServiceError> {
        let mut campaign = self.store.load(id).await?;
        visits::reset(&mut campaign, self.clock.now());
        self.store.save(&mut campaign).await?;
        Ok(campaign.into())
    }

    pub async fn least_visited(
        &self,
        id: Uuid,
        limit: usize,
    ) -> Result<Vec<TrackedFile>, ServiceError> {
        Ok(queries::least_visited(&self.load_fresh(id).await?, limit))
    }

    pub async fn most_stale(
        &self,
        id: Uuid,
        limit: usize,
        threshold: f64,
    ) -> Result<MostStale, ServiceError> {
        Ok(queries::most_stale(&self.load_fresh(id).await?, limit, threshold))
    }

    pub async fn coverage(&self, id: Uuid) -> Result<Coverage, ServiceError> {
        Ok(queries::coverage(&self.load_fresh(id).await?))
    }

    pub async fn export(
        &self,
        id: Uuid,
        patterns: Option<&str>,
    ) -> Result<CampaignView, ServiceError> {
        let campaign = self.load_fresh(id).await?;
        let campaign = match patterns {
            Some(p) => queries::filter_export(campaign, p),
            None => campaign,
        };
        Ok(campaign.into())
    }

    /// Imports an exported campaign. Returns the stored campaign and whether
    /// it was newly created.
    pub async fn import(
        &self,
        imported: Campaign,
        merge: bool,
    ) -> Result<(CampaignView, bool), ServiceError> {
        if imported.name.trim().is_empty() {
            return Err(ServiceError::invalid("name is required"));
        }
        let _names = self.names.lock().await;
        let existing = self
            .store
            .load_all()
            .await?
            .into_iter()
            .find(|c| c.name == imported.name);

        let now = self.clock.now();
        match existing {
            Some(mut target) if merge => {
                queries::merge_import(&mut target, imported);
                staleness::refresh(&mut target, now);
                self.store.save(&mut target).await?;
                tracing::info!(campaign = %target.id, "campaign merged from import");
                Ok((target.into(), false))
            }
            Some(_) => Err(ServiceError::Conflict(format!(
                "campaign with name '{}' already exists",
                imported.name
            ))),
            None => {
                if imported.patterns.iter().all(|p| p.trim().is_empty()) {
                    return Err(ServiceError::invalid("patterns must not be empty"));
                }
                let mut campaign = queries::fresh_import(imported, now);
                staleness::refresh(&mut campaign, now);
                self.store.save(&mut campaign).await?;
                tracing::info!(campaign = %campaign.id, "campaign imported");
                Ok((campaign.into(), true))
            }
        }
    }

    /// Returns a campaign matching `(location, tag)` or the name, creating
    /// one when nothing matches.
    pub async fn find_or_create(
        &self,
        mut input: NewCampaign,
    ) -> Result<(CampaignView, bool), ServiceError> {
        let location = non_blank(input.location.as_deref()).map(str::to_string);
        let tag = non_blank(input.tag.as_deref()).map(str::to_string);
        let name = match (non_blank(input.name.as_deref()), &location, &tag) {
            (Some(name), _, _) => Some(name.to_string()),
            (None, Some(location), Some(tag)) => Some(format!("{}-{}", location, tag)),
            _ => None,
        };

        let _names = self.names.lock().await;
        let now = self.clock.now();
        let campaigns = self.store.load_all().await?;
        let by_location = match (&location, &tag) {
            (Some(location), Some(tag)) => campaigns.iter().find(|c| {
                c.location.as_deref() == Some(location.as_str())
                    && c.tag.as_deref() == Some(tag.as_str())
            }),
            _ => None,
        };
        let found = by_location.or_else(|| {
            name.as_deref()
                .and_then(|n| campaigns.iter().find(|c| c.name == n))
        });
        if let Some(campaign) = found {
            let mut campaign = campaign.clone();
            staleness::refresh(&mut campaign, now);
            return Ok((campaign.into(), false));
        }

        if input.patterns.is_empty() {
            return Err(ServiceError::invalid("patterns are required to create a campaign"));
        }
        input.name = Some(name.ok_or_else(|| {
            ServiceError::invalid("name or both location and tag are required")
        })?);
        Ok((self.create_unlocked(input).await?, true))
    }

    async fn edit_file<F>(
        &self,
        id: Uuid,
        file_id: Uuid,
        edit: F,
    ) -> Result<TrackedFile, ServiceError>
    where
        F: FnOnce(&mut TrackedFile),
    {
        let mut campaign = self.store.load(id).await?;
        let file = campaign
            .file_by_id_mut(file_id)
            .ok_or_else(|| ServiceError::not_found(format!("file not found: {}", file_id)))?;
        edit(file);
        staleness::refresh(&mut campaign, self.clock.now());
        self.store.save(&mut campaign).await?;
        campaign
            .file_by_id(file_id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(format!("file not found: {}", file_id)))
    }

    pub async fn set_file_notes(
        &self,
        id: Uuid,
        file_id: Uuid,
        notes: String,
    ) -> Result<TrackedFile, ServiceError> {
        self.edit_file(id, file_id, |f| f.notes = notes).await
    }

    pub async fn set_file_priority(
        &self,
        id: Uuid,
        file_id: Uuid,
        weight: f64,
    ) -> Result<TrackedFile, ServiceError> {
        if !weight.is_finite() || weight <= 0.0 {
            return Err(ServiceError::invalid("priority_weight must be a positive number"));
        }
        self.edit_file(id, file_id, |f| f.priority_weight = weight).await
    }

    pub async fn set_file_excluded(
        &self,
        id: Uuid,
        file_id: Uuid,
        excluded: bool,
    ) -> Result<TrackedFile, ServiceError> {
        self.edit_file(id, file_id, |f| f.excluded = excluded).await
    }

    fn locate(campaign: &Campaign, path: &str) -> Option<usize> {
        let base = sync::base_dir(campaign);
        let (relative, absolute) = patterns::resolve(&base, path);
        campaign.file_index_by_absolute(&absolute).or_else(|| {
            campaign
                .tracked_files
                .iter()
                .position(|f| f.file_path == relative || f.file_path == path.trim())
        })
    }

    pub async fn file_by_path(&self, id: Uuid, path: &str) -> Result<TrackedFile, ServiceError> {
        if path.trim().is_empty() {
            return Err(ServiceError::invalid("path is required"));
        }
        let campaign = self.load_fresh(id).await?;
        Self::locate(&campaign, path)
            .map(|i| campaign.tracked_files[i].clone())
            .ok_or_else(|| ServiceError::not_found(format!("file not found: {}", path)))
    }

    pub async fn bulk_exclude(
        &self,
        id: Uuid,
        paths: &[String],
        excluded: bool,
    ) -> Result<BulkExclude, ServiceError> {
        if paths.is_empty() {
            return Err(ServiceError::invalid("paths must not be empty"));
        }
        let mut campaign = self.store.load(id).await?;
        let mut updated = 0;
        let mut not_found = Vec::new();
        for path in paths {
            match Self::locate(&campaign, path) {
                Some(index) => {
                    campaign.tracked_files[index].excluded = excluded;
                    updated += 1;
                }
                None => not_found.push(path.clone()),
            }
        }
        if updated > 0 {
            staleness::refresh(&mut campaign, self.clock.now());
            self.store.save(&mut campaign).await?;
        }
        Ok(BulkExclude { updated, not_found })
    }
}
