//! Batched live status lookups against the Bilibili live room API.
//!
//! One request resolves the live state of many broadcaster uids at once.
//! Every lookup result is total: each requested uid appears in the returned
//! map, filled with a zero-value [`LiveStatus`] when the upstream response is
//! missing it or the request failed as a whole.

pub mod client;
pub mod error;
pub mod fetcher;
pub mod models;

pub use client::{ClientConfig, ClientSlot};
pub use error::StatusError;
pub use fetcher::{BatchStatus, StatusFetcher, StatusSource};
pub use models::{LiveState, LiveStatus};
