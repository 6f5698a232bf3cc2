//! JSON file backed [`StateStore`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};

use super::{PersistedState, StateStore};
use crate::Result;
use crate::utils::fs::{io_error, write_atomic};

pub const STATE_FILE_NAME: &str = "monitor_state.json";

/// Stores state as pretty-printed JSON in a single file.
///
/// When the primary file does not exist but a legacy file does, the legacy
/// file is loaded and immediately re-saved to the primary path.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
    legacy_path: Option<PathBuf>,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            legacy_path: None,
        }
    }

    /// Store at `<dir>/monitor_state.json`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STATE_FILE_NAME))
    }

    pub fn with_legacy_path(mut self, legacy_path: Option<PathBuf>) -> Self {
        self.legacy_path = legacy_path;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(path: &Path) -> Result<Option<PersistedState>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("reading", path, e)),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&self) -> Result<Option<PersistedState>> {
        if let Some(state) = Self::read(&self.path).await? {
            return Ok(Some(state));
        }

        let Some(legacy) = self.legacy_path.as_deref() else {
            return Ok(None);
        };
        let Some(state) = Self::read(legacy).await? else {
            return Ok(None);
        };

        info!(
            from = %legacy.display(),
            to = %self.path.display(),
            monitors = state.monitors.len(),
            "Migrating monitor state from legacy location"
        );
        if let Err(e) = self.save(&state).await {
            warn!(error = %e, "Failed to write migrated state, will retry on next save");
        }
        Ok(Some(state))
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path, &json).await
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }
}
