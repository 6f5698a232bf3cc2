//! Load-on-start / save-on-mutate persistence of monitor state.

mod json;

pub use json::JsonStateStore;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bili_status::LiveState;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Result;
use crate::monitor::{MonitorEntry, Registry};
use crate::notification::NotificationFlags;

/// Everything that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub monitors: Vec<MonitorEntry>,
    #[serde(default)]
    pub status_cache: HashMap<String, LiveState>,
    #[serde(default = "default_true")]
    pub enable_notifications: bool,
    #[serde(default = "default_true")]
    pub enable_end_notifications: bool,
}

fn default_true() -> bool {
    true
}

/// Storage backend for [`PersistedState`].
#[async_trait]
pub trait StateStore: Send + Sync {
    /// `None` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<PersistedState>>;

    async fn save(&self, state: &PersistedState) -> Result<()>;

    /// Whether a saved record currently exists.
    fn exists(&self) -> bool;
}

/// In-memory store, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<PersistedState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }

    pub fn current(&self) -> Option<PersistedState> {
        self.state.lock().clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<PersistedState>> {
        Ok(self.current())
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        *self.state.lock() = Some(state.clone());
        Ok(())
    }

    fn exists(&self) -> bool {
        self.state.lock().is_some()
    }
}

/// Moves state between the live registry/flags and a [`StateStore`].
///
/// Saves are serialized: each one captures and writes under the same lock,
/// so a later snapshot is never overwritten by an earlier one.
pub struct Persister {
    store: Arc<dyn StateStore>,
    registry: Arc<Registry>,
    flags: Arc<NotificationFlags>,
    save_lock: tokio::sync::Mutex<()>,
}

impl Persister {
    pub fn new(
        store: Arc<dyn StateStore>,
        registry: Arc<Registry>,
        flags: Arc<NotificationFlags>,
    ) -> Self {
        Self {
            store,
            registry,
            flags,
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn capture(&self) -> PersistedState {
        let (monitors, status_cache) = self.registry.export();
        PersistedState {
            monitors,
            status_cache,
            enable_notifications: self.flags.notifications_enabled(),
            enable_end_notifications: self.flags.end_notifications_enabled(),
        }
    }

    pub async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let state = self.capture();
        self.store.save(&state).await?;
        debug!(monitors = state.monitors.len(), "Monitor state saved");
        Ok(())
    }

    /// Load into the registry and flags. Returns false when nothing was stored.
    pub async fn load(&self) -> Result<bool> {
        let Some(state) = self.store.load().await? else {
            info!("No saved monitor state, starting empty");
            return Ok(false);
        };

        self.flags.set_notifications(state.enable_notifications);
        self.flags.set_end_notifications(state.enable_end_notifications);
        self.registry.restore(state.monitors, state.status_cache);
        info!(monitors = self.registry.len(), "Loaded monitor state");
        Ok(true)
    }

    pub fn state_exists(&self) -> bool {
        self.store.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;

    fn entry(uid: &str) -> MonitorEntry {
        MonitorEntry {
            uid: uid.to_string(),
            display_name: format!("name-{uid}"),
            room_id: 1,
            added_by: "t".to_string(),
            added_at: Utc::now(),
            notify_target: Some("g".to_string()),
        }
    }

    #[tokio::test]
    async fn test_round_trip_through_persister() {
        let store = Arc::new(MemoryStateStore::new());
        let registry = Arc::new(Registry::new(10));
        let flags = Arc::new(NotificationFlags::new(true, true));
        let persister = Persister::new(store.clone(), registry.clone(), flags.clone());

        assert!(!persister.load().await.unwrap());
        assert!(!persister.state_exists());

        registry.restore(
            vec![entry("1"), entry("2")],
            HashMap::from([("1".to_string(), LiveState::Live)]),
        );
        flags.set_end_notifications(false);
        persister.save().await.unwrap();
        assert!(persister.state_exists());

        let registry2 = Arc::new(Registry::new(10));
        let flags2 = Arc::new(NotificationFlags::default());
        let persister2 = Persister::new(store, registry2.clone(), flags2.clone());
        assert!(persister2.load().await.unwrap());

        assert_eq!(registry2.len(), 2);
        assert_eq!(registry2.cached_state("1"), LiveState::Live);
        assert!(flags2.notifications_enabled());
        assert!(!flags2.end_notifications_enabled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_to_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonStateStore::in_dir(dir.path()));
        let registry = Arc::new(Registry::new(10));
        let flags = Arc::new(NotificationFlags::default());
        registry.restore(vec![entry("1")], HashMap::new());
        let persister = Arc::new(Persister::new(store.clone(), registry.clone(), flags));

        let saves: Vec<_> = (2..18)
            .map(|i| {
                let persister = persister.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    let status = bili_status::LiveStatus {
                        state: LiveState::Other(i),
                        ..Default::default()
                    };
                    registry.record_observation("1", &status);
                    persister.save().await
                })
            })
            .collect();
        for save in saves {
            save.await.unwrap().unwrap();
        }

        // The file on disk reflects the registry as of the last save.
        persister.save().await.unwrap();
        let state = store.load().await.unwrap().unwrap();
        assert_eq!(state.monitors.len(), 1);
        assert_eq!(state.status_cache.get("1"), Some(&registry.cached_state("1")));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let state: PersistedState = serde_json::from_str("{}").unwrap();
        assert!(state.monitors.is_empty());
        assert!(state.enable_notifications);
        assert!(state.enable_end_notifications);
    }

    #[test]
    fn test_cache_serializes_raw_state() {
        let state = PersistedState {
            status_cache: HashMap::from([("1".to_string(), LiveState::Other(2))]),
            ..Default::default()
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status_cache"]["1"], 2);
    }
}
