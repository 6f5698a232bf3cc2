//! Registry of tracked streamers and their cached live state.
//!
//! Command handlers add and remove entries; the poll loop works from
//! [`RegistrySnapshot`]s so a concurrent mutation is seen either entirely
//! before or entirely after a cycle's snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bili_status::{LiveState, LiveStatus, StatusSource};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// One tracked streamer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorEntry {
    pub uid: String,
    /// Last known display name.
    pub display_name: String,
    /// Last known room id, 0 when unknown.
    pub room_id: u64,
    pub added_by: String,
    pub added_at: DateTime<Utc>,
    /// Destination token handed to the notification sink.
    pub notify_target: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("uid must be numeric: {0}")]
    InvalidUid(String),
    #[error("uid {0} is already tracked")]
    AlreadyTracked(String),
    #[error("tracking limit reached ({0})")]
    CapacityReached(usize),
    #[error("no streamer found for uid {0}")]
    Unresolved(String),
    #[error("lookup for uid {0} failed")]
    LookupFailed(String),
    #[error("uid {0} is not tracked")]
    NotTracked(String),
}

/// Whether `uid` is a plausible numeric identifier.
pub fn is_valid_uid(uid: &str) -> bool {
    !uid.is_empty() && uid.bytes().all(|b| b.is_ascii_digit())
}

/// Immutable, cheaply cloneable view of the registry at one point in time.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    entries: Arc<[MonitorEntry]>,
}

impl RegistrySnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MonitorEntry> {
        self.entries.iter()
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.entries.iter().any(|entry| entry.uid == uid)
    }

    pub fn uids(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.uid.clone()).collect()
    }
}

impl<'a> IntoIterator for &'a RegistrySnapshot {
    type Item = &'a MonitorEntry;
    type IntoIter = std::slice::Iter<'a, MonitorEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    entries: BTreeMap<String, MonitorEntry>,
    status_cache: HashMap<String, LiveState>,
}

/// The set of tracked streamers plus the last observed state of each.
#[derive(Debug)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
    max_monitors: usize,
}

impl Registry {
    pub fn new(max_monitors: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            max_monitors,
        }
    }

    pub fn max_monitors(&self) -> usize {
        self.max_monitors
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.inner.read().entries.contains_key(uid)
    }

    pub fn get(&self, uid: &str) -> Option<MonitorEntry> {
        self.inner.read().entries.get(uid).cloned()
    }

    /// Validate `uid` against upstream and start tracking it.
    ///
    /// Costs one lookup. The initial cached state is the looked-up state, so
    /// adding a streamer that is already live does not fire a live event.
    pub async fn add(
        &self,
        source: &dyn StatusSource,
        uid: &str,
        added_by: &str,
        notify_target: Option<String>,
    ) -> Result<MonitorEntry, RegistryError> {
        if !is_valid_uid(uid) {
            return Err(RegistryError::InvalidUid(uid.to_string()));
        }
        self.check_insertable(uid)?;

        let batch = source.fetch_batch(&[uid.to_string()]).await;
        if let Some(failure) = &batch.failure {
            warn!(uid = %uid, error = %failure, "Lookup failed while adding streamer");
            return Err(RegistryError::LookupFailed(uid.to_string()));
        }
        let status = batch.get(uid);
        if status.display_name.trim().is_empty() {
            return Err(RegistryError::Unresolved(uid.to_string()));
        }

        let entry = MonitorEntry {
            uid: uid.to_string(),
            display_name: status.display_name.clone(),
            room_id: status.room_id,
            added_by: added_by.to_string(),
            added_at: Utc::now(),
            notify_target,
        };

        // Re-checked under the write lock: the lookup above was a suspension point.
        let mut inner = self.inner.write();
        if inner.entries.contains_key(uid) {
            return Err(RegistryError::AlreadyTracked(uid.to_string()));
        }
        if inner.entries.len() >= self.max_monitors {
            return Err(RegistryError::CapacityReached(self.max_monitors));
        }
        inner.entries.insert(uid.to_string(), entry.clone());
        inner.status_cache.insert(uid.to_string(), status.state);

        info!(uid = %uid, name = %entry.display_name, "Streamer added to registry");
        Ok(entry)
    }

    fn check_insertable(&self, uid: &str) -> Result<(), RegistryError> {
        let inner = self.inner.read();
        if inner.entries.contains_key(uid) {
            return Err(RegistryError::AlreadyTracked(uid.to_string()));
        }
        if inner.entries.len() >= self.max_monitors {
            return Err(RegistryError::CapacityReached(self.max_monitors));
        }
        Ok(())
    }

    /// Stop tracking `uid` and drop its cached state.
    pub fn remove(&self, uid: &str) -> Result<MonitorEntry, RegistryError> {
        let mut inner = self.inner.write();
        let entry = inner
            .entries
            .remove(uid)
            .ok_or_else(|| RegistryError::NotTracked(uid.to_string()))?;
        inner.status_cache.remove(uid);
        info!(uid = %uid, "Streamer removed from registry");
        Ok(entry)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.read();
        RegistrySnapshot {
            entries: inner.entries.values().cloned().collect(),
        }
    }

    /// Last observed state for `uid`, offline when never observed.
    pub fn cached_state(&self, uid: &str) -> LiveState {
        self.inner
            .read()
            .status_cache
            .get(uid)
            .copied()
            .unwrap_or_default()
    }

    /// Store this cycle's observation for `uid`.
    ///
    /// Updates the cached state and, for non-degenerate statuses, the entry's
    /// name and room. Returns false when `uid` was removed in the meantime,
    /// in which case nothing is written.
    pub fn record_observation(&self, uid: &str, status: &LiveStatus) -> bool {
        let mut inner = self.inner.write();
        let RegistryInner {
            entries,
            status_cache,
        } = &mut *inner;

        let Some(entry) = entries.get_mut(uid) else {
            debug!(uid = %uid, "Observation for untracked uid dropped");
            return false;
        };

        if !status.is_empty() {
            if !status.display_name.trim().is_empty() {
                entry.display_name.clone_from(&status.display_name);
            }
            if status.room_id != 0 {
                entry.room_id = status.room_id;
            }
        }
        status_cache.insert(uid.to_string(), status.state);
        true
    }

    /// Replace the contents with persisted entries and cache.
    pub fn restore(&self, entries: Vec<MonitorEntry>, status_cache: HashMap<String, LiveState>) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.status_cache.clear();

        for entry in entries {
            if !is_valid_uid(&entry.uid) {
                warn!(uid = %entry.uid, "Skipping persisted entry with invalid uid");
                continue;
            }
            inner.entries.insert(entry.uid.clone(), entry);
        }
        for (uid, state) in status_cache {
            if inner.entries.contains_key(&uid) {
                inner.status_cache.insert(uid, state);
            }
        }

        if inner.entries.len() > self.max_monitors {
            warn!(
                count = inner.entries.len(),
                max = self.max_monitors,
                "Restored registry exceeds the tracking limit; no new streamers can be added"
            );
        }
    }

    /// Entries and cache in a form suitable for persisting.
    pub fn export(&self) -> (Vec<MonitorEntry>, HashMap<String, LiveState>) {
        let inner = self.inner.read();
        (
            inner.entries.values().cloned().collect(),
            inner.status_cache.clone(),
        )
    }
}
