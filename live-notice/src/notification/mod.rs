//! Notification delivery for live/offline edges.
//!
//! The [`NotificationDispatcher`] decides whether an edge produces a message
//! and composes it; a [`NotificationSink`] delivers it.

mod dispatcher;
mod sinks;

pub use dispatcher::{DispatchOutcome, NotificationDispatcher, NotificationFlags};
pub use sinks::{LogSink, NotificationSink, WebhookConfig, WebhookSink};
