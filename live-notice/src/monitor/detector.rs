//! Edge detection between consecutive observations.

use bili_status::{LiveState, LiveStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::registry::MonitorEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Transition {
    WentLive,
    WentOffline,
    None,
}

impl Transition {
    pub fn is_edge(self) -> bool {
        self != Transition::None
    }
}

/// Compare the cached state with a fresh status.
///
/// Both edges are checked independently; a sustained state never yields an
/// edge.
pub fn detect(previous: LiveState, current: &LiveStatus) -> Transition {
    let went_live = current.is_live() && !previous.is_live();
    let went_offline = previous.is_live() && !current.is_live();

    if went_live {
        Transition::WentLive
    } else if went_offline {
        Transition::WentOffline
    } else {
        Transition::None
    }
}

/// An edge observed for one streamer, ready for dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionEvent {
    pub entry: MonitorEntry,
    pub status: LiveStatus,
    pub transition: Transition,
    pub observed_at: DateTime<Utc>,
}

impl TransitionEvent {
    pub fn new(entry: MonitorEntry, status: LiveStatus, transition: Transition) -> Self {
        Self {
            entry,
            status,
            transition,
            observed_at: Utc::now(),
        }
    }
}
