//! Streamer monitoring.
//!
//! This module tracks streamers, polls their live status in batches and turns
//! state changes into [`TransitionEvent`]s.
//!
//! # Components
//!
//! - [`Registry`]: tracked streamers plus the last observed state of each
//! - [`BackoffTracker`]: per-uid skip window for empty responses
//! - [`IntervalController`]: whole-cycle delay under rate limiting
//! - [`detect`]: edge detection between two observations
//! - [`PollLoop`]: the cycle orchestrator

mod backoff;
mod detector;
mod interval;
mod registry;
mod service;
mod timer;

pub use backoff::{BackoffRecord, BackoffTracker};
pub use detector::{Transition, TransitionEvent, detect};
pub use interval::{IntervalController, MAX_INTERVAL};
pub use registry::{MonitorEntry, Registry, RegistryError, RegistrySnapshot, is_valid_uid};
pub use service::{
    CycleOutcome, CycleState, DEFAULT_FAILURE_THRESHOLD, LoopPhase, MonitorConfig, PollLoop,
};
pub use timer::CancellableTimer;
