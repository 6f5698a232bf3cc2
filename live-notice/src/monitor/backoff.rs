//! Per-uid backoff for degenerate responses.
//!
//! A uid whose lookups keep coming back empty (no name, no room) is polled
//! less often: after the n-th consecutive empty result it is skipped for
//! `min(cap, step * n)`. One non-empty result clears the record.

use std::collections::HashMap;
use std::time::Duration;

use bili_status::LiveStatus;
use tokio::time::Instant;
use tracing::debug;

/// Default delay added per consecutive empty result.
pub const DEFAULT_STEP: Duration = Duration::from_secs(30);

/// Default upper bound for a single skip.
pub const DEFAULT_MAX_SKIP: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffRecord {
    pub consecutive_empty: u32,
    pub skip_until: Instant,
}

#[derive(Debug)]
pub struct BackoffTracker {
    records: HashMap<String, BackoffRecord>,
    step: Duration,
    max_skip: Duration,
}

impl BackoffTracker {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_STEP, DEFAULT_MAX_SKIP)
    }

    pub fn with_limits(step: Duration, max_skip: Duration) -> Self {
        Self {
            records: HashMap::new(),
            step,
            max_skip,
        }
    }

    /// Whether `uid` should be part of the batch at `now`.
    pub fn should_poll(&self, uid: &str, now: Instant) -> bool {
        self.records
            .get(uid)
            .is_none_or(|record| now >= record.skip_until)
    }

    /// Account for one observed status.
    pub fn record(&mut self, uid: &str, status: &LiveStatus, now: Instant) {
        if !status.is_empty() {
            if self.records.remove(uid).is_some() {
                debug!(uid = %uid, "Backoff cleared after a resolved response");
            }
            return;
        }

        let (step, max_skip) = (self.step, self.max_skip);
        let record = self
            .records
            .entry(uid.to_string())
            .or_insert(BackoffRecord {
                consecutive_empty: 0,
                skip_until: now,
            });
        record.consecutive_empty = record.consecutive_empty.saturating_add(1);
        let skip = skip_for(step, max_skip, record.consecutive_empty);
        record.skip_until = now + skip;

        debug!(
            uid = %uid,
            consecutive_empty = record.consecutive_empty,
            skip = ?skip,
            "Empty response, backing off"
        );
    }

    pub fn get(&self, uid: &str) -> Option<&BackoffRecord> {
        self.records.get(uid)
    }

    /// Drop records for uids no longer tracked.
    pub fn retain_tracked(&mut self, is_tracked: impl Fn(&str) -> bool) {
        self.records.retain(|uid, _| is_tracked(uid));
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn skip_for(step: Duration, max_skip: Duration, consecutive_empty: u32) -> Duration {
    step.saturating_mul(consecutive_empty).min(max_skip)
}

impl Default for BackoffTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bili_status::LiveState;

    fn resolved() -> LiveStatus {
        LiveStatus {
            state: LiveState::Offline,
            room_id: 1,
            title: String::new(),
            display_name: "Alice".to_string(),
        }
    }

    #[test]
    fn test_linear_ramp_capped() {
        let mut tracker = BackoffTracker::new();
        let now = Instant::now();

        let skips: Vec<u64> = (0..12)
            .map(|_| {
                tracker.record("1", &LiveStatus::zero(), now);
                (tracker.get("1").unwrap().skip_until - now).as_secs()
            })
            .collect();

        assert_eq!(
            skips,
            vec![30, 60, 90, 120, 150, 180, 210, 240, 270, 300, 300, 300]
        );
        assert_eq!(tracker.get("1").unwrap().consecutive_empty, 12);
    }

    #[test]
    fn test_custom_limits_ramp_per_uid() {
        let mut tracker =
            BackoffTracker::with_limits(Duration::from_secs(10), Duration::from_secs(25));
        let now = Instant::now();

        for expected in [10, 20, 25, 25] {
            tracker.record("1", &LiveStatus::zero(), now);
            assert_eq!(
                tracker.get("1").unwrap().skip_until - now,
                Duration::from_secs(expected)
            );
        }
        tracker.record("2", &LiveStatus::zero(), now);
        assert_eq!(tracker.get("2").unwrap().consecutive_empty, 1);
        assert_eq!(tracker.get("1").unwrap().consecutive_empty, 4);
    }

    #[test]
    fn test_skip_until_strictly_increases_over_time() {
        let mut tracker = BackoffTracker::new();
        let mut now = Instant::now();
        let mut last = None;

        for _ in 0..10 {
            tracker.record("1", &LiveStatus::zero(), now);
            let record = *tracker.get("1").unwrap();
            if let Some(previous) = last {
                assert!(record.skip_until > previous);
            }
            last = Some(record.skip_until);
            now = record.skip_until;
        }
    }

    #[test]
    fn test_should_poll_respects_deadline() {
        let mut tracker = BackoffTracker::new();
        let now = Instant::now();
        assert!(tracker.should_poll("1", now));

        tracker.record("1", &LiveStatus::zero(), now);
        assert!(!tracker.should_poll("1", now));
        assert!(!tracker.should_poll("1", now + Duration::from_secs(29)));
        assert!(tracker.should_poll("1", now + Duration::from_secs(30)));
        assert!(tracker.should_poll("2", now));
    }

    #[test]
    fn test_recovery_clears_record() {
        let mut tracker = BackoffTracker::new();
        let now = Instant::now();
        for _ in 0..4 {
            tracker.record("1", &LiveStatus::zero(), now);
        }
        tracker.record("1", &resolved(), now);
        assert!(tracker.get("1").is_none());
        assert!(tracker.should_poll("1", now));

        // Counting restarts from one.
        tracker.record("1", &LiveStatus::zero(), now);
        assert_eq!(tracker.get("1").unwrap().consecutive_empty, 1);
    }

    #[test]
    fn test_retain_tracked() {
        let mut tracker = BackoffTracker::new();
        let now = Instant::now();
        tracker.record("1", &LiveStatus::zero(), now);
        tracker.record("2", &LiveStatus::zero(), now);

        tracker.retain_tracked(|uid| uid == "2");
        assert_eq!(tracker.len(), 1);
        assert!(tracker.get("2").is_some());
    }
}
