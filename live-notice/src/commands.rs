//! Command entry points.
//!
//! Every command answers with a [`CommandReply`]; bad input is a
//! [`CommandReply::Rejected`] value, never an error.

use std::fmt;

use tracing::warn;

use crate::monitor::{RegistryError, is_valid_uid};
use crate::service::LiveNotice;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Ok(String),
    Rejected(String),
}

impl CommandReply {
    pub fn is_ok(&self) -> bool {
        matches!(self, CommandReply::Ok(_))
    }

    pub fn text(&self) -> &str {
        match self {
            CommandReply::Ok(text) | CommandReply::Rejected(text) => text,
        }
    }
}

impl fmt::Display for CommandReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

impl From<RegistryError> for CommandReply {
    fn from(e: RegistryError) -> Self {
        let text = match e {
            RegistryError::InvalidUid(uid) => format!("Invalid uid '{uid}': digits only"),
            RegistryError::AlreadyTracked(uid) => format!("Uid {uid} is already being monitored"),
            RegistryError::CapacityReached(max) => {
                format!("Monitoring limit reached ({max}), remove a streamer first")
            }
            RegistryError::Unresolved(uid) => format!("No streamer found for uid {uid}"),
            RegistryError::LookupFailed(uid) => {
                format!("Lookup for uid {uid} failed, try again later")
            }
            RegistryError::NotTracked(uid) => format!("Uid {uid} is not being monitored"),
        };
        CommandReply::Rejected(text)
    }
}

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Add { uid: String, target: Option<String> },
    Remove { uid: String },
    List,
    Check { uid: String },
    Status,
    Notify(bool),
    EndNotify(bool),
    Help,
    Quit,
}

pub const CONSOLE_HELP: &str = "\
commands:
  add <uid> [target]    start monitoring a streamer (target defaults to you)
  remove <uid>          stop monitoring a streamer
  list                  show monitored streamers and their state
  check <uid>           look up a streamer once
  status                show service status
  notify on|off         toggle all notifications
  end-notify on|off     toggle stream-end notifications
  quit                  exit";

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Err("empty command".to_string());
        };
        let args: Vec<&str> = words.collect();

        let uid_arg = |args: &[&str]| -> Result<String, String> {
            match args {
                [uid] => Ok(uid.to_string()),
                _ => Err(format!("usage: {name} <uid>")),
            }
        };
        let switch_arg = |args: &[&str]| -> Result<bool, String> {
            match args {
                ["on"] => Ok(true),
                ["off"] => Ok(false),
                _ => Err(format!("usage: {name} on|off")),
            }
        };

        match name.to_ascii_lowercase().as_str() {
            "add" => match args.as_slice() {
                [uid] => Ok(Self::Add {
                    uid: uid.to_string(),
                    target: None,
                }),
                [uid, target] => Ok(Self::Add {
                    uid: uid.to_string(),
                    target: Some(target.to_string()),
                }),
                _ => Err("usage: add <uid> [target]".to_string()),
            },
            "remove" | "rm" => uid_arg(&args).map(|uid| Self::Remove { uid }),
            "check" => uid_arg(&args).map(|uid| Self::Check { uid }),
            "list" | "ls" => Ok(Self::List),
            "status" => Ok(Self::Status),
            "notify" => switch_arg(&args).map(Self::Notify),
            "end-notify" => switch_arg(&args).map(Self::EndNotify),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(format!("unknown command '{other}', try 'help'")),
        }
    }
}

impl LiveNotice {
    /// Start monitoring `uid`, notifying `notify_target` on changes.
    pub async fn add(
        &self,
        uid: &str,
        added_by: &str,
        notify_target: Option<String>,
    ) -> CommandReply {
        let entry = match self
            .registry
            .add(self.source.as_ref(), uid, added_by, notify_target)
            .await
        {
            Ok(entry) => entry,
            Err(e) => return e.into(),
        };
        self.persist().await;

        let state = if self.registry.cached_state(uid).is_live() {
            "live"
        } else {
            "offline"
        };
        CommandReply::Ok(format!(
            "Now monitoring {} (uid {}, currently {state})",
            entry.display_name, entry.uid
        ))
    }

    pub async fn remove(&self, uid: &str) -> CommandReply {
        if !is_valid_uid(uid) {
            return RegistryError::InvalidUid(uid.to_string()).into();
        }
        let entry = match self.registry.remove(uid) {
            Ok(entry) => entry,
            Err(e) => return e.into(),
        };
        self.persist().await;
        CommandReply::Ok(format!(
            "Stopped monitoring {} (uid {})",
            entry.display_name, entry.uid
        ))
    }

    /// One line per tracked streamer, with a fresh lookup of all of them.
    pub async fn list(&self) -> CommandReply {
        let snapshot = self.registry.snapshot();
        if snapshot.is_empty() {
            return CommandReply::Ok("No streamers are being monitored".to_string());
        }

        let batch = self.source.fetch_batch(&snapshot.uids()).await;
        let mut lines = vec![format!(
            "Monitoring {}/{} streamers:",
            snapshot.len(),
            self.registry.max_monitors()
        )];
        for entry in &snapshot {
            let status = batch.get(&entry.uid);
            let state = if batch.is_degraded() {
                "unknown"
            } else if status.is_live() {
                "live"
            } else {
                "offline"
            };
            lines.push(format!("- {} (uid {}): {state}", entry.display_name, entry.uid));
        }
        CommandReply::Ok(lines.join("\n"))
    }

    /// Look a uid up once without tracking it.
    pub async fn check(&self, uid: &str) -> CommandReply {
        if !is_valid_uid(uid) {
            return RegistryError::InvalidUid(uid.to_string()).into();
        }
        let batch = self.source.fetch_batch(&[uid.to_string()]).await;
        if let Some(failure) = &batch.failure {
            warn!(uid = %uid, error = %failure, "Lookup failed during check");
            return RegistryError::LookupFailed(uid.to_string()).into();
        }
        let status = batch.get(uid);
        if status.display_name.trim().is_empty() {
            return RegistryError::Unresolved(uid.to_string()).into();
        }

        let text = if status.is_live() {
            let title = if status.title.trim().is_empty() {
                "untitled"
            } else {
                status.title.as_str()
            };
            format!(
                "{} is live: {title}\n{}",
                status.display_name,
                status.room_url()
            )
        } else {
            format!("{} is offline", status.display_name)
        };
        CommandReply::Ok(text)
    }

    pub async fn status(&self) -> CommandReply {
        CommandReply::Ok(self.runtime_status().await.to_string())
    }

    pub async fn set_notifications(&self, enabled: bool) -> CommandReply {
        self.flags().set_notifications(enabled);
        self.persist().await;
        CommandReply::Ok(format!(
            "Notifications {}",
            if enabled { "enabled" } else { "disabled" }
        ))
    }

    pub async fn set_end_notifications(&self, enabled: bool) -> CommandReply {
        self.flags().set_end_notifications(enabled);
        self.persist().await;
        CommandReply::Ok(format!(
            "End notifications {}",
            if enabled { "enabled" } else { "disabled" }
        ))
    }

    /// Run a parsed console command. `Quit` is left to the caller.
    ///
    /// An `add` without an explicit target notifies `issued_by`.
    pub async fn execute(&self, command: ConsoleCommand, issued_by: &str) -> CommandReply {
        match command {
            ConsoleCommand::Add { uid, target } => {
                let target = target.unwrap_or_else(|| issued_by.to_string());
                self.add(&uid, issued_by, Some(target)).await
            }
            ConsoleCommand::Remove { uid } => self.remove(&uid).await,
            ConsoleCommand::List => self.list().await,
            ConsoleCommand::Check { uid } => self.check(&uid).await,
            ConsoleCommand::Status => self.status().await,
            ConsoleCommand::Notify(enabled) => self.set_notifications(enabled).await,
            ConsoleCommand::EndNotify(enabled) => self.set_end_notifications(enabled).await,
            ConsoleCommand::Help | ConsoleCommand::Quit => CommandReply::Ok(CONSOLE_HELP.to_string()),
        }
    }

    async fn persist(&self) {
        if let Err(e) = self.persister.save().await {
            warn!(error = %e, "Failed to save monitor state");
        }
    }
}
