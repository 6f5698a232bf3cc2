//! Whole-cycle cadence under upstream rate limiting.
//!
//! The delay between cycles doubles after a rate-limited cycle and decays
//! by a quarter after a clean one, always staying within `[base, max]`.

use std::time::Duration;

use tracing::{debug, info};

/// Hard ceiling for the cycle delay.
pub const MAX_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct IntervalController {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl IntervalController {
    /// `base` is clamped to the ceiling.
    pub fn new(base: Duration) -> Self {
        Self::with_max(base, MAX_INTERVAL)
    }

    pub fn with_max(base: Duration, max: Duration) -> Self {
        let base = base.min(max);
        Self {
            base,
            max,
            current: base,
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Fold one completed cycle into the delay and return the new delay.
    pub fn on_cycle(&mut self, rate_limited: bool) -> Duration {
        let previous = self.current;
        self.current = if rate_limited {
            self.current.saturating_mul(2).max(self.base).min(self.max)
        } else {
            (self.current * 3 / 4).max(self.base)
        };

        if rate_limited {
            info!(from = ?previous, to = ?self.current, "Rate limited, slowing down polling");
        } else if previous != self.current {
            debug!(from = ?previous, to = ?self.current, "Polling interval decaying");
        }
        self.current
    }
}
