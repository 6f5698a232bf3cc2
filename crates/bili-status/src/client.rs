//! Shared, lazily (re)created HTTP client.

use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info};

use crate::error::StatusError;

pub const DEFAULT_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko)";

/// Settings for the pooled HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Total per-request timeout.
    pub request_timeout: Duration,
    /// Idle connections kept per host. This does not limit concurrency.
    pub max_idle_per_host: usize,
    /// Requests allowed in flight at once through this slot.
    pub max_concurrent_requests: usize,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_idle_per_host: 5,
            max_concurrent_requests: 5,
            user_agent: DEFAULT_UA.to_string(),
        }
    }
}

/// Holds at most one pooled [`Client`].
///
/// The client is built on first use and rebuilt after [`ClientSlot::close`].
/// Clones of the returned client share one connection pool.
#[derive(Debug)]
pub struct ClientSlot {
    config: ClientConfig,
    client: Mutex<Option<Client>>,
    in_flight: Semaphore,
}

impl ClientSlot {
    pub fn new(config: ClientConfig) -> Self {
        let in_flight = Semaphore::new(config.max_concurrent_requests.max(1));
        Self {
            config,
            client: Mutex::new(None),
            in_flight,
        }
    }

    /// Return the live client, creating it if absent or previously closed.
    pub fn get(&self) -> Result<Client, StatusError> {
        let mut slot = self.client.lock();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let client = Client::builder()
            .timeout(self.config.request_timeout)
            .pool_max_idle_per_host(self.config.max_idle_per_host)
            .user_agent(self.config.user_agent.as_str())
            .build()?;
        info!("HTTP client created");
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Wait for a free request slot; hold the permit for the whole exchange.
    pub async fn permit(&self) -> Result<SemaphorePermit<'_>, StatusError> {
        self.in_flight
            .acquire()
            .await
            .map_err(|_| StatusError::ClientClosed)
    }

    pub fn available_permits(&self) -> usize {
        self.in_flight.available_permits()
    }

    /// Drop the pooled client. In-flight clones finish on their own.
    pub fn close(&self) {
        if self.client.lock().take().is_some() {
            debug!("HTTP client released");
        }
    }

    pub fn is_active(&self) -> bool {
        self.client.lock().is_some()
    }
}

impl Default for ClientSlot {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_create_and_recreate() {
        let slot = ClientSlot::default();
        assert!(!slot.is_active());

        slot.get().unwrap();
        assert!(slot.is_active());

        slot.close();
        assert!(!slot.is_active());

        slot.get().unwrap();
        assert!(slot.is_active());
    }

    #[tokio::test]
    async fn test_permits_bound_concurrent_requests() {
        let slot = ClientSlot::new(ClientConfig {
            max_concurrent_requests: 2,
            ..Default::default()
        });

        let first = slot.permit().await.unwrap();
        let _second = slot.permit().await.unwrap();
        assert_eq!(slot.available_permits(), 0);

        let third = tokio::time::timeout(std::time::Duration::from_millis(50), slot.permit()).await;
        assert!(third.is_err());

        drop(first);
        assert!(slot.permit().await.is_ok());
    }
}
