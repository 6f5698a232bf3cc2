//! Turns transition edges into outbound messages.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bili_status::LiveStatus;
use bili_status::models::room_url;
use tracing::{debug, error, info, warn};

use super::sinks::NotificationSink;
use crate::monitor::{MonitorEntry, Transition, TransitionEvent};

/// The two persisted feature flags gating notifications.
#[derive(Debug)]
pub struct NotificationFlags {
    notifications: AtomicBool,
    end_notifications: AtomicBool,
}

impl NotificationFlags {
    pub fn new(notifications: bool, end_notifications: bool) -> Self {
        Self {
            notifications: AtomicBool::new(notifications),
            end_notifications: AtomicBool::new(end_notifications),
        }
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications.load(Ordering::Relaxed)
    }

    pub fn end_notifications_enabled(&self) -> bool {
        self.end_notifications.load(Ordering::Relaxed)
    }

    pub fn set_notifications(&self, enabled: bool) {
        self.notifications.store(enabled, Ordering::Relaxed);
    }

    pub fn set_end_notifications(&self, enabled: bool) {
        self.end_notifications.store(enabled, Ordering::Relaxed);
    }
}

impl Default for NotificationFlags {
    fn default() -> Self {
        Self::new(true, true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// Gated off by a feature flag.
    Disabled,
    /// The entry has no destination token.
    NoTarget,
    /// The sink reported an error; already logged.
    Failed,
}

pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    flags: Arc<NotificationFlags>,
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>, flags: Arc<NotificationFlags>) -> Self {
        Self { sink, flags }
    }

    pub fn flags(&self) -> &Arc<NotificationFlags> {
        &self.flags
    }

    pub async fn dispatch(&self, event: &TransitionEvent) -> DispatchOutcome {
        match event.transition {
            Transition::WentLive => self.notify_live(&event.entry, &event.status).await,
            Transition::WentOffline => self.notify_offline(&event.entry, &event.status).await,
            Transition::None => DispatchOutcome::Disabled,
        }
    }

    pub async fn notify_live(&self, entry: &MonitorEntry, status: &LiveStatus) -> DispatchOutcome {
        if !self.flags.notifications_enabled() {
            debug!(uid = %entry.uid, "Notifications disabled, skipping live notice");
            return DispatchOutcome::Disabled;
        }
        let message = live_message(entry, status);
        self.deliver(entry, &message, "live").await
    }

    pub async fn notify_offline(
        &self,
        entry: &MonitorEntry,
        status: &LiveStatus,
    ) -> DispatchOutcome {
        if !self.flags.notifications_enabled() || !self.flags.end_notifications_enabled() {
            debug!(uid = %entry.uid, "End notifications disabled, skipping offline notice");
            return DispatchOutcome::Disabled;
        }
        let message = offline_message(entry, status);
        self.deliver(entry, &message, "offline").await
    }

    async fn deliver(&self, entry: &MonitorEntry, message: &str, kind: &str) -> DispatchOutcome {
        let Some(target) = entry.notify_target.as_deref().filter(|t| !t.is_empty()) else {
            warn!(uid = %entry.uid, kind, "No notification target, cannot deliver");
            return DispatchOutcome::NoTarget;
        };

        match self.sink.send(target, message).await {
            Ok(()) => {
                info!(uid = %entry.uid, kind, sink = self.sink.sink_type(), "Notification sent");
                DispatchOutcome::Sent
            }
            Err(e) => {
                error!(uid = %entry.uid, kind, error = %e, "Failed to deliver notification");
                DispatchOutcome::Failed
            }
        }
    }
}

fn display_name<'a>(entry: &'a MonitorEntry, status: &'a LiveStatus) -> &'a str {
    [status.display_name.as_str(), entry.display_name.as_str()]
        .into_iter()
        .find(|name| !name.trim().is_empty())
        .unwrap_or("unknown streamer")
}

pub(crate) fn live_message(entry: &MonitorEntry, status: &LiveStatus) -> String {
    let title = if status.title.trim().is_empty() {
        "untitled"
    } else {
        status.title.as_str()
    };
    let room_id = if status.room_id != 0 {
        status.room_id
    } else {
        entry.room_id
    };
    format!(
        "{} is live!\nTitle: {}\nRoom: {}",
        display_name(entry, status),
        title,
        room_url(room_id)
    )
}

pub(crate) fn offline_message(entry: &MonitorEntry, status: &LiveStatus) -> String {
    format!("{} has ended the stream", display_name(entry, status))
}
