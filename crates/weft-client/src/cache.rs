//! On-disk contact cache.
//!
//! Each community keeps its own snapshot file `contacts-{community}.json`
//! under the data directory. The cache is a convenience copy of relay state:
//! a corrupt file is recovered by returning an empty list and letting the
//! next refresh rewrite it. A pre-community single-file cache
//! (`contacts.json`) is migrated once by stamping the community and renaming
//! the original to `contacts.json.migrated`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ClientError, Result};

/// Legacy single-file cache name.
const LEGACY_FILE: &str = "contacts.json";

/// A cached peer snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedContact {
    pub agent: String,
    pub public_key: String,
    pub endpoint: String,
    /// Presence flag as of the last refresh; dispatch consults it before
    /// spending a direct delivery attempt.
    #[serde(default)]
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_updated_at: Option<i64>,
}

/// The snapshot file layout.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheFile {
    community: String,
    updated_at: i64,
    contacts: Vec<CachedContact>,
}

/// Handle to one community's cache file.
#[derive(Clone, Debug)]
pub struct ContactCache {
    data_dir: PathBuf,
    community: String,
}

impl ContactCache {
    /// Open (and migrate, if needed) the cache for a community.
    pub fn open(data_dir: &Path, community: &str) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| ClientError::Cache(format!("create data dir: {e}")))?;
        let cache = Self {
            data_dir: data_dir.to_path_buf(),
            community: community.to_string(),
        };
        cache.migrate_legacy()?;
        Ok(cache)
    }

    fn path(&self) -> PathBuf {
        self.data_dir.join(format!("contacts-{}.json", self.community))
    }

    /// Load the snapshot. Absent or corrupt files yield an empty list — the
    /// caller refreshes from the relay in that case.
    pub fn load(&self) -> Vec<CachedContact> {
        let raw = match std::fs::read(self.path()) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_slice::<CacheFile>(&raw) {
            Ok(file) => file.contacts,
            Err(e) => {
                tracing::warn!(error = %e, "contact cache unreadable, starting empty");
                Vec::new()
            }
        }
    }

    /// Find one cached contact by name.
    pub fn find(&self, agent: &str) -> Option<CachedContact> {
        self.load().into_iter().find(|c| c.agent == agent)
    }

    /// Update one peer's presence flag in place.
    pub fn set_online(&self, agent: &str, online: bool, now: i64) -> Result<()> {
        let mut contacts = self.load();
        let mut changed = false;
        for contact in &mut contacts {
            if contact.agent == agent && contact.online != online {
                contact.online = online;
                changed = true;
            }
        }
        if changed {
            self.store(&contacts, now)?;
        }
        Ok(())
    }

    /// Replace the snapshot atomically (temp file + rename).
    pub fn store(&self, contacts: &[CachedContact], now: i64) -> Result<()> {
        let file = CacheFile {
            community: self.community.clone(),
            updated_at: now,
            contacts: contacts.to_vec(),
        };
        let raw = serde_json::to_vec_pretty(&file)
            .map_err(|e| ClientError::Serialization(e.to_string()))?;

        let tmp = self.path().with_extension("json.tmp");
        std::fs::write(&tmp, raw).map_err(|e| ClientError::Cache(format!("write cache: {e}")))?;
        std::fs::rename(&tmp, self.path())
            .map_err(|e| ClientError::Cache(format!("replace cache: {e}")))?;
        Ok(())
    }

    /// One-shot migration of the pre-community cache file.
    fn migrate_legacy(&self) -> Result<()> {
        let legacy = self.data_dir.join(LEGACY_FILE);
        if !legacy.exists() || self.path().exists() {
            return Ok(());
        }

        let raw = std::fs::read(&legacy)
            .map_err(|e| ClientError::Cache(format!("read legacy cache: {e}")))?;
        let parsed: serde_json::Value = match serde_json::from_slice(&raw) {
            Ok(value) => value,
            Err(e) => {
                // A corrupt legacy file is abandoned, not migrated.
                tracing::warn!(error = %e, "legacy contact cache unreadable, skipping migration");
                return Ok(());
            }
        };

        let contacts: Vec<CachedContact> = parsed
            .get("contacts")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let updated_at = parsed.get("updatedAt").and_then(|v| v.as_i64()).unwrap_or(0);

        self.store(&contacts, updated_at)?;
        std::fs::rename(&legacy, self.data_dir.join(format!("{LEGACY_FILE}.migrated")))
            .map_err(|e| ClientError::Cache(format!("retire legacy cache: {e}")))?;
        tracing::info!(community = %self.community, "migrated legacy contact cache");
        Ok(())
    }
}
