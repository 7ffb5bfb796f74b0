//! Which applications are locked.
//!
//! One [`LockedAppRecord`] per known application, keyed by package id. The
//! registry keeps no cache of its own: every query goes to the record store so
//! the monitor and any UI always see the same thing. Mutations are announced
//! on a broadcast channel after they have been persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{LockError, Result};
use crate::store::RecordStore;

const RECORD_PREFIX: &str = "app.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LockedAppRecord {
    pub package_id: String,
    pub display_name: String,
    pub locked: bool,
    pub added_at: DateTime<Utc>,
}

/// An application reported as installed by the host platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledApp {
    pub package_id: String,
    pub display_name: String,
    pub system: bool,
    pub updated_system: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryChange {
    Locked(String),
    Unlocked(String),
    Removed(String),
    Cleared,
}

pub struct LockRegistry {
    store: Arc<dyn RecordStore>,
    changes: broadcast::Sender<RegistryChange>,
}

fn record_key(package_id: &str) -> String {
    format!("{RECORD_PREFIX}{package_id}")
}

fn by_display_name(records: &mut [LockedAppRecord]) {
    records.sort_by(|a, b| {
        a.display_name
            .to_lowercase()
            .cmp(&b.display_name.to_lowercase())
            .then_with(|| a.package_id.cmp(&b.package_id))
    });
}

impl LockRegistry {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self { store, changes }
    }

    /// Receive every mutation made after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryChange> {
        self.changes.subscribe()
    }

    fn notify(&self, change: RegistryChange) {
        // no subscribers is fine
        let _ = self.changes.send(change);
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<LockedAppRecord> {
        serde_json::from_slice(bytes).map_err(|e| LockError::CorruptRecord {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    fn write(&self, record: &LockedAppRecord) -> Result<()> {
        let data = serde_json::to_vec(record)?;
        self.store.put(&record_key(&record.package_id), &data)
    }

    pub fn get(&self, package_id: &str) -> Result<Option<LockedAppRecord>> {
        let key = record_key(package_id);
        match self.store.get(&key)? {
            Some(bytes) => Ok(Some(Self::decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// `false` when no record exists. Read failures are returned, never
    /// turned into `false`.
    pub fn is_locked(&self, package_id: &str) -> Result<bool> {
        Ok(self.get(package_id)?.map(|r| r.locked).unwrap_or(false))
    }

    /// Insert or replace the record for `package_id` as locked. An existing
    /// record keeps its original `added_at`.
    pub fn lock_app(&self, package_id: &str, display_name: &str) -> Result<LockedAppRecord> {
        let added_at = self
            .get(package_id)?
            .map(|r| r.added_at)
            .unwrap_or_else(Utc::now);
        let record = LockedAppRecord {
            package_id: package_id.to_string(),
            display_name: display_name.to_string(),
            locked: true,
            added_at,
        };
        self.write(&record)?;
        info!(package = %package_id, name = %display_name, "app locked");
        self.notify(RegistryChange::Locked(package_id.to_string()));
        Ok(record)
    }

    /// Flip the flag on an existing record. A package without a record gets
    /// one, named after its id, so that locking never silently does nothing.
    pub fn set_locked(&self, package_id: &str, locked: bool) -> Result<()> {
        let record = match self.get(package_id)? {
            Some(mut record) => {
                record.locked = locked;
                record
            }
            None => LockedAppRecord {
                package_id: package_id.to_string(),
                display_name: package_id.to_string(),
                locked,
                added_at: Utc::now(),
            },
        };
        self.write(&record)?;
        debug!(package = %package_id, locked, "lock flag updated");
        self.notify(if locked {
            RegistryChange::Locked(package_id.to_string())
        } else {
            RegistryChange::Unlocked(package_id.to_string())
        });
        Ok(())
    }

    /// Invert the lock flag. Returns the new state, or `None` when the
    /// package is unknown.
    pub fn toggle(&self, package_id: &str) -> Result<Option<bool>> {
        match self.get(package_id)? {
            Some(record) => {
                let locked = !record.locked;
                self.set_locked(package_id, locked)?;
                Ok(Some(locked))
            }
            None => Ok(None),
        }
    }

    /// Every known record, ordered by display name.
    pub fn list_all(&self) -> Result<Vec<LockedAppRecord>> {
        let mut records = self
            .store
            .scan_prefix(RECORD_PREFIX)?
            .into_iter()
            .map(|(key, bytes)| Self::decode(&key, &bytes))
            .collect::<Result<Vec<_>>>()?;
        by_display_name(&mut records);
        Ok(records)
    }

    /// Locked records only, ordered by display name.
    pub fn list_locked(&self) -> Result<Vec<LockedAppRecord>> {
        let mut records = self.list_all()?;
        records.retain(|r| r.locked);
        Ok(records)
    }

    /// Case-insensitive substring match on display name.
    pub fn search(&self, query: &str) -> Result<Vec<LockedAppRecord>> {
        let needle = query.trim().to_lowercase();
        let mut records = self.list_all()?;
        if !needle.is_empty() {
            records.retain(|r| r.display_name.to_lowercase().contains(&needle));
        }
        Ok(records)
    }

    /// Installed apps that could be offered for locking: not yet known, not
    /// the locker itself, and not a stock system app.
    pub fn candidates(
        &self,
        installed: &[InstalledApp],
        own_package_id: &str,
    ) -> Result<Vec<LockedAppRecord>> {
        let known: HashSet<String> = self
            .list_all()?
            .into_iter()
            .map(|r| r.package_id)
            .collect();
        let now = Utc::now();
        let mut out: Vec<LockedAppRecord> = installed
            .iter()
            .filter(|app| app.package_id != own_package_id)
            .filter(|app| !app.system || app.updated_system)
            .filter(|app| !known.contains(&app.package_id))
            .map(|app| LockedAppRecord {
                package_id: app.package_id.clone(),
                display_name: app.display_name.clone(),
                locked: false,
                added_at: now,
            })
            .collect();
        by_display_name(&mut out);
        Ok(out)
    }

    pub fn remove(&self, package_id: &str) -> Result<bool> {
        if self.get(package_id)?.is_none() {
            return Ok(false);
        }
        self.store.delete(&record_key(package_id))?;
        info!(package = %package_id, "app removed");
        self.notify(RegistryChange::Removed(package_id.to_string()));
        Ok(true)
    }

    pub fn clear(&self) -> Result<()> {
        let keys: Vec<String> = self
            .store
            .scan_prefix(RECORD_PREFIX)?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        self.store.delete_many(&keys)?;
        info!(removed = keys.len(), "registry cleared");
        self.notify(RegistryChange::Cleared);
        Ok(())
    }
}
