//! The poll loop.
//!
//! Each cycle snapshots the registry, filters uids through the backoff
//! tracker, fetches one batch, applies per-uid detection, cache and backoff
//! updates, folds the rate-limit signal into the interval and then
//! dispatches notifications. All state for a uid is written before the
//! next suspension point, so cancellation never leaves a cycle half-applied.

use std::sync::Arc;
use std::time::Duration;

use bili_status::{BatchStatus, StatusSource};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::BackoffTracker;
use super::detector::{TransitionEvent, detect};
use super::interval::{IntervalController, MAX_INTERVAL};
use super::registry::Registry;
use super::timer::CancellableTimer;
use crate::Result;
use crate::notification::NotificationDispatcher;
use crate::persistence::Persister;

/// Default number of consecutive failed cycles before backing off.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Delay added per consecutive failed cycle once backing off.
pub const FAILURE_BACKOFF_STEP: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Base delay between cycles.
    pub base_interval: Duration,
    /// Consecutive failed cycles that switch the loop to backing off.
    pub failure_threshold: u32,
    /// Registry size cap.
    pub max_monitors: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(60),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            max_monitors: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LoopPhase {
    /// Nothing tracked.
    #[default]
    Idle,
    Polling,
    /// Too many consecutive failed cycles.
    BackingOff,
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopPhase::Idle => write!(f, "idle"),
            LoopPhase::Polling => write!(f, "polling"),
            LoopPhase::BackingOff => write!(f, "backing off"),
        }
    }
}

/// Process-wide loop state, readable through [`PollLoop::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleState {
    pub phase: LoopPhase,
    pub current_interval: Duration,
    pub last_cycle_rate_limited: bool,
    pub consecutive_failures: u32,
}

/// What a completed cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Idle,
    Polled {
        fetched: usize,
        skipped: usize,
        transitions: usize,
    },
    Cancelled,
}

pub struct PollLoop {
    registry: Arc<Registry>,
    source: Arc<dyn StatusSource>,
    dispatcher: Arc<NotificationDispatcher>,
    persister: Arc<Persister>,
    backoff: BackoffTracker,
    interval: IntervalController,
    failure_threshold: u32,
    state: CycleState,
    state_tx: watch::Sender<CycleState>,
}

impl PollLoop {
    pub fn new(
        config: &MonitorConfig,
        registry: Arc<Registry>,
        source: Arc<dyn StatusSource>,
        dispatcher: Arc<NotificationDispatcher>,
        persister: Arc<Persister>,
    ) -> Self {
        let interval = IntervalController::new(config.base_interval);
        let state = CycleState {
            phase: LoopPhase::Idle,
            current_interval: interval.current(),
            last_cycle_rate_limited: false,
            consecutive_failures: 0,
        };
        let (state_tx, _) = watch::channel(state.clone());

        Self {
            registry,
            source,
            dispatcher,
            persister,
            backoff: BackoffTracker::new(),
            interval,
            failure_threshold: config.failure_threshold.max(1),
            state,
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<CycleState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> &CycleState {
        &self.state
    }

    pub fn backoff(&self) -> &BackoffTracker {
        &self.backoff
    }

    /// Run until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let timer = CancellableTimer::new(cancel);
        info!(interval = ?self.interval.base(), "Monitor loop started");

        loop {
            let delay = match self.poll_once(&timer).await {
                Ok(CycleOutcome::Cancelled) => break,
                Ok(outcome) => self.complete(&outcome),
                Err(e) => self.on_failure(&e),
            };
            self.state_tx.send_replace(self.state.clone());

            if !timer.sleep(delay).await {
                break;
            }
        }

        info!("Monitor loop stopped");
    }

    /// One cycle, without the trailing sleep.
    pub async fn poll_once(&mut self, timer: &CancellableTimer) -> Result<CycleOutcome> {
        let snapshot = self.registry.snapshot();
        if snapshot.is_empty() {
            self.backoff.clear();
            return Ok(CycleOutcome::Idle);
        }
        self.backoff.retain_tracked(|uid| snapshot.contains(uid));

        let now = Instant::now();
        let eligible: Vec<_> = snapshot
            .iter()
            .filter(|entry| self.backoff.should_poll(&entry.uid, now))
            .collect();
        let skipped = snapshot.len() - eligible.len();
        if skipped > 0 {
            debug!(skipped, "Uids in backoff left out of this batch");
        }

        let uids: Vec<String> = eligible.iter().map(|entry| entry.uid.clone()).collect();
        let batch = if uids.is_empty() {
            BatchStatus::default()
        } else {
            match timer.run(self.source.fetch_batch(&uids)).await {
                Some(batch) => batch,
                None => return Ok(CycleOutcome::Cancelled),
            }
        };

        let mut events = Vec::new();
        let mut cache_changed = false;

        if let Some(failure) = &batch.failure {
            // A failed batch carries no observations; keep the cache as is
            // instead of reading the zero values as "offline".
            warn!(error = %failure, uids = uids.len(), "Batch lookup degraded, skipping detection");
        } else {
            for entry in eligible {
                let status = batch.get(&entry.uid);
                let previous = self.registry.cached_state(&entry.uid);
                let transition = detect(previous, &status);

                if !self.registry.record_observation(&entry.uid, &status) {
                    continue;
                }
                cache_changed |= previous != status.state;
                self.backoff.record(&entry.uid, &status, now);

                if transition.is_edge() {
                    info!(uid = %entry.uid, ?transition, "Live state changed");
                    events.push(TransitionEvent::new(entry.clone(), status, transition));
                }
            }
        }

        let interval = self.interval.on_cycle(batch.rate_limited);
        self.state.current_interval = interval;
        self.state.last_cycle_rate_limited = batch.rate_limited;

        for event in &events {
            // Refresh the entry so the message uses this cycle's metadata.
            let event = match self.registry.get(&event.entry.uid) {
                Some(entry) => TransitionEvent { entry, ..event.clone() },
                None => event.clone(),
            };
            self.dispatcher.dispatch(&event).await;
        }

        if cache_changed {
            self.persister.save().await?;
        }

        Ok(CycleOutcome::Polled {
            fetched: uids.len(),
            skipped,
            transitions: events.len(),
        })
    }

    /// Record a successful cycle and pick the delay before the next one.
    pub fn complete(&mut self, outcome: &CycleOutcome) -> Duration {
        if self.state.consecutive_failures > 0 {
            info!(
                failures = self.state.consecutive_failures,
                "Monitor cycle recovered"
            );
        }
        self.state.consecutive_failures = 0;

        match outcome {
            CycleOutcome::Idle => {
                self.state.phase = LoopPhase::Idle;
                self.interval.base()
            }
            _ => {
                self.state.phase = LoopPhase::Polling;
                self.interval.current()
            }
        }
    }

    /// Count a failed cycle and pick the delay before retrying.
    pub fn on_failure(&mut self, e: &crate::Error) -> Duration {
        self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
        let failures = self.state.consecutive_failures;
        error!(error = %e, failures, "Monitor cycle failed");

        if failures >= self.failure_threshold {
            self.state.phase = LoopPhase::BackingOff;
            let wait = FAILURE_BACKOFF_STEP.saturating_mul(failures).min(MAX_INTERVAL);
            warn!(failures, wait = ?wait, "Too many consecutive failures, backing off");
            wait
        } else {
            self.interval.current()
        }
    }
}
