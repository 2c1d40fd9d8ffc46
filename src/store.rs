//! JSON-file campaign store.
//!
//! One pretty-printed JSON document per campaign at `<dir>/<id>.json`.
//! Every path has a process-local read/write lock, memoised in a map that is
//! itself locked only while looking up or inserting an entry. `save` and
//! `delete` take the write lock, `load` the read lock.
//!
//! Writes go to a sibling temp file and are renamed into place, so readers
//! only ever see a whole document. Two writers that each load, modify and
//! save the same campaign still race: the later `save` replaces the whole
//! document, appended visits and snapshots included.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::error::ServiceError;
use crate::models::Campaign;

pub struct CampaignStore {
    dir: PathBuf,
    clock: SharedClock,
    locks: Mutex<HashMap<PathBuf, Arc<RwLock<()>>>>,
}

impl CampaignStore {
    pub fn new(dir: impl Into<PathBuf>, clock: SharedClock) -> Self {
        Self {
            dir: dir.into(),
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn lock_for(&self, path: &Path) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Stamps `updated_at` and atomically replaces the campaign's file.
    pub async fn save(&self, campaign: &mut Campaign) -> Result<(), ServiceError> {
        campaign.updated_at = self.clock.now();
        if campaign.updated_at < campaign.created_at {
            campaign.updated_at = campaign.created_at;
        }

        let path = self.path_for(campaign.id);
        let json = serde_json::to_vec_pretty(campaign)?;

        let lock = self.lock_for(&path);
        let _guard = lock.write().await;

        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn load(&self, id: Uuid) -> Result<Campaign, ServiceError> {
        let path = self.path_for(id);
        let lock = self.lock_for(&path);
        let _guard = lock.read().await;

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ServiceError::not_found(format!("campaign not found: {}", id)))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Loads every readable campaign. Unreadable or corrupt files are logged
    /// and skipped; a missing directory yields an empty list.
    pub async fn load_all(&self) -> Result<Vec<Campaign>, ServiceError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut campaigns = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let lock = self.lock_for(&path);
            let _guard = lock.read().await;
            let parsed = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<Campaign>(&bytes).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match parsed {
                Ok(campaign) => campaigns.push(campaign),
                Err(error) => {
                    tracing::warn!(
                        path = %path.display(),
                        %error,
                        "skipping unreadable campaign file"
                    );
                }
            }
        }
        Ok(campaigns)
    }

    /// Removes the campaign file. Deleting a missing campaign succeeds.
    ///
    /// The path's lock entry is dropped afterwards unless another task still
    /// holds it.
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let path = self.path_for(id);
        let lock = self.lock_for(&path);
        let guard = lock.write().await;

        let removed = match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        };
        drop(guard);
        drop(lock);
        self.release_lock(&path);
        removed
    }

    // Callers clone entries only under the map lock, so a count of one means
    // the map is the sole owner.
    fn release_lock(&self, path: &Path) {
        let mut locks = self.locks.lock();
        if locks.get(path).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(path);
        }
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks.lock().len()
    }
}
