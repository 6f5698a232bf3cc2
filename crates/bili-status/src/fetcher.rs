//! Batch status fetching.
//!
//! [`StatusFetcher`] issues one POST per batch and never fails outward:
//! transport errors, non-200 replies, malformed bodies and upstream error
//! codes all degrade to a zero-value status for every requested uid, with
//! the cause kept in [`BatchStatus::failure`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::client::ClientSlot;
use crate::error::StatusError;
use crate::models::{LiveStatus, StatusResponse, normalize};

pub const STATUS_URL: &str =
    "https://api.live.bilibili.com/room/v1/Room/get_status_info_by_uids";

/// Outcome of one batch lookup.
#[derive(Debug, Default)]
pub struct BatchStatus {
    /// One entry per requested uid, no more and no less.
    pub statuses: HashMap<String, LiveStatus>,
    /// Upstream answered with HTTP 429 on this call.
    pub rate_limited: bool,
    /// Why the whole batch degraded to zero values, if it did.
    pub failure: Option<StatusError>,
}

impl BatchStatus {
    /// Every uid mapped to a zero-value status.
    pub fn fallback(uids: &[String], failure: StatusError) -> Self {
        Self {
            statuses: uids
                .iter()
                .map(|uid| (uid.clone(), LiveStatus::zero()))
                .collect(),
            rate_limited: failure.is_rate_limited(),
            failure: Some(failure),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.failure.is_some()
    }

    /// Status for `uid`, zero-value if it was not part of the batch.
    pub fn get(&self, uid: &str) -> LiveStatus {
        self.statuses.get(uid).cloned().unwrap_or_default()
    }
}

/// Anything that can resolve a batch of uids to statuses.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_batch(&self, uids: &[String]) -> BatchStatus;

    /// Acquire the underlying network resource ahead of the first lookup.
    fn connect(&self) -> Result<(), StatusError> {
        Ok(())
    }

    /// Whether the underlying network resource is currently held.
    fn is_connected(&self) -> bool {
        true
    }

    /// Release the underlying network resource.
    fn close(&self) {}
}

#[async_trait]
impl<T: StatusSource + ?Sized> StatusSource for Arc<T> {
    async fn fetch_batch(&self, uids: &[String]) -> BatchStatus {
        (**self).fetch_batch(uids).await
    }

    fn connect(&self) -> Result<(), StatusError> {
        (**self).connect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn close(&self) {
        (**self).close()
    }
}

#[derive(Serialize)]
struct StatusRequest {
    uids: Vec<u64>,
}

/// HTTP implementation of [`StatusSource`].
pub struct StatusFetcher {
    client: ClientSlot,
    url: String,
}

impl StatusFetcher {
    pub fn new(client: ClientSlot) -> Self {
        Self::with_url(client, STATUS_URL)
    }

    pub fn with_url(client: ClientSlot, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn client(&self) -> &ClientSlot {
        &self.client
    }

    async fn request(&self, uids: &[String]) -> Result<HashMap<String, LiveStatus>, StatusError> {
        let numeric = uids
            .iter()
            .filter_map(|uid| match uid.parse::<u64>() {
                Ok(n) => Some(n),
                Err(_) => {
                    warn!(uid = %uid, "Skipping non-numeric uid");
                    None
                }
            })
            .collect::<Vec<_>>();

        if numeric.is_empty() {
            return Err(StatusError::InvalidUid(uids.join(",")));
        }

        let _permit = self.client.permit().await?;
        let client = self.client.get()?;
        let response = client
            .post(&self.url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .json(&StatusRequest { uids: numeric })
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::TOO_MANY_REQUESTS => return Err(StatusError::RateLimited),
            other => return Err(StatusError::UnexpectedStatus(other.as_u16())),
        }

        let body = response.bytes().await?;
        let parsed: StatusResponse = serde_json::from_slice(&body)?;
        if parsed.code != 0 {
            return Err(StatusError::ApiError {
                code: parsed.code,
                message: parsed.message,
            });
        }

        Ok(normalize(uids, parsed.data))
    }
}

#[async_trait]
impl StatusSource for StatusFetcher {
    async fn fetch_batch(&self, uids: &[String]) -> BatchStatus {
        if uids.is_empty() {
            return BatchStatus::default();
        }

        debug!(count = uids.len(), "Fetching live status batch");

        match self.request(uids).await {
            Ok(statuses) => BatchStatus {
                statuses,
                rate_limited: false,
                failure: None,
            },
            Err(e) => {
                match &e {
                    StatusError::RateLimited => warn!("Status API rate limited the request"),
                    StatusError::UnexpectedStatus(code) => {
                        warn!(status = code, "Status API request failed")
                    }
                    StatusError::ApiError { code, message } => {
                        warn!(code = code, message = %message, "Status API returned an error code")
                    }
                    _ => error!(error = %e, "Batch status lookup failed"),
                }
                BatchStatus::fallback(uids, e)
            }
        }
    }

    fn connect(&self) -> Result<(), StatusError> {
        self.client.get().map(|_| ())
    }

    fn is_connected(&self) -> bool {
        self.client.is_active()
    }

    fn close(&self) {
        self.client.close();
    }
}
