//! Application configuration loaded from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bili_status::ClientConfig;
use bili_status::client::DEFAULT_UA;
use bili_status::fetcher::STATUS_URL;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::monitor::{DEFAULT_FAILURE_THRESHOLD, MAX_INTERVAL, MonitorConfig};
use crate::notification::WebhookConfig;
use crate::{Error, Result};

/// Directory under the home directory used when `data_dir` is unset.
pub const DEFAULT_DATA_DIR_NAME: &str = ".live-notice";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub status_url: String,
    pub request_timeout_secs: u64,
    pub max_idle_per_host: usize,
    /// Upper bound on requests in flight at once.
    pub max_concurrent_requests: usize,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            status_url: STATUS_URL.to_string(),
            request_timeout_secs: 10,
            max_idle_per_host: 5,
            max_concurrent_requests: 5,
            user_agent: DEFAULT_UA.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base delay between poll cycles, in seconds.
    pub check_interval_secs: u64,
    pub max_monitors: usize,
    /// Initial flag values; persisted flags win once state exists.
    pub enable_notifications: bool,
    pub enable_end_notifications: bool,
    /// Consecutive failed cycles before the loop backs off.
    pub failure_threshold: u32,
    /// Where `monitor_state.json` lives. Defaults to `~/.live-notice`.
    pub data_dir: Option<PathBuf>,
    /// State file from an older install, migrated on first load.
    pub legacy_state_file: Option<PathBuf>,
    /// Rolling log file directory; console only when unset.
    pub log_dir: Option<PathBuf>,
    pub api: ApiConfig,
    /// Deliver notifications to a webhook instead of the log.
    pub webhook: Option<WebhookConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            max_monitors: 50,
            enable_notifications: true,
            enable_end_notifications: true,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            data_dir: None,
            legacy_state_file: None,
            log_dir: None,
            api: ApiConfig::default(),
            webhook: None,
        }
    }
}

impl AppConfig {
    /// Load from `path`, or use defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| Error::io_path("reading config", path, e))?;
                debug!(path = %path.display(), "Loaded config file");
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<()> {
        let max = MAX_INTERVAL.as_secs();
        if !(1..=max).contains(&self.check_interval_secs) {
            return Err(Error::config(format!(
                "check_interval_secs must be between 1 and {max}, got {}",
                self.check_interval_secs
            )));
        }
        if self.max_monitors == 0 {
            return Err(Error::config("max_monitors must be at least 1"));
        }
        if self.api.max_concurrent_requests == 0 {
            return Err(Error::config("api.max_concurrent_requests must be at least 1"));
        }
        if self.failure_threshold == 0 {
            return Err(Error::config("failure_threshold must be at least 1"));
        }
        if let Some(webhook) = &self.webhook
            && webhook.url.trim().is_empty()
        {
            return Err(Error::config("webhook.url must not be empty"));
        }
        Ok(())
    }

    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_DATA_DIR_NAME)
        })
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            base_interval: self.check_interval(),
            failure_threshold: self.failure_threshold,
            max_monitors: self.max_monitors,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout: Duration::from_secs(self.api.request_timeout_secs),
            max_idle_per_host: self.api.max_idle_per_host,
            max_concurrent_requests: self.api.max_concurrent_requests,
            user_agent: self.api.user_agent.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.check_interval(), Duration::from_secs(60));
        assert_eq!(config.max_monitors, 50);
        assert_eq!(config.failure_threshold, 5);
        assert!(config.enable_notifications && config.enable_end_notifications);
        assert!(config.state_dir().ends_with(DEFAULT_DATA_DIR_NAME));
        assert_eq!(config.client_config().request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            check_interval_secs = 30
            data_dir = "/var/lib/live-notice"

            [api]
            request_timeout_secs = 3

            [webhook]
            url = "http://localhost:9000/hook"
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.monitor_config().base_interval, Duration::from_secs(30));
        assert_eq!(config.max_monitors, 50);
        assert_eq!(config.state_dir(), PathBuf::from("/var/lib/live-notice"));
        assert_eq!(config.api.request_timeout_secs, 3);
        assert_eq!(config.api.status_url, STATUS_URL);
        assert_eq!(config.webhook.unwrap().timeout_secs, 30);
    }

    #[test]
    fn test_validation_bounds() {
        for interval in [0, 301] {
            let config = AppConfig {
                check_interval_secs: interval,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(Error::Configuration(_))));
        }
        for interval in [1, 300] {
            let config = AppConfig {
                check_interval_secs: interval,
                ..Default::default()
            };
            assert!(config.validate().is_ok());
        }

        let config = AppConfig {
            max_monitors: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AppConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_concurrency_bound_reaches_client_config() {
        let config = AppConfig::from_toml("[api]\nmax_concurrent_requests = 2\n").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.client_config().max_concurrent_requests, 2);
        assert_eq!(AppConfig::default().client_config().max_concurrent_requests, 5);

        let mut config = AppConfig::default();
        config.api.max_concurrent_requests = 0;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_monitors = 3\n").unwrap();
        assert_eq!(AppConfig::load(Some(&path)).unwrap().max_monitors, 3);

        std::fs::write(&path, "max_monitors = \"many\"\n").unwrap();
        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(Error::ConfigParse(_))
        ));

        assert!(matches!(
            AppConfig::load(Some(&dir.path().join("missing.toml"))),
            Err(Error::IoPath { .. })
        ));
    }
}
