//! live-notice library crate.
//!
//! Tracks Bilibili streamers and sends a notification when one goes live or
//! ends a stream. The binary wraps [`LiveNotice`] with a stdin console.

pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod notification;
pub mod persistence;
pub mod service;
pub mod utils;

pub use commands::{CommandReply, ConsoleCommand};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use service::{Components, LiveNotice, RuntimeStatus, StartOutcome};
