//! Status types and upstream wire models.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Raw live state reported by upstream.
///
/// Only `Live` is semantically distinguished; every other value counts as
/// not live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum LiveState {
    #[default]
    Offline,
    Live,
    /// Any other raw value (e.g. 2 for a replay carousel).
    Other(i64),
}

impl LiveState {
    pub fn is_live(self) -> bool {
        self == LiveState::Live
    }
}

impl From<i64> for LiveState {
    fn from(raw: i64) -> Self {
        match raw {
            0 => LiveState::Offline,
            1 => LiveState::Live,
            other => LiveState::Other(other),
        }
    }
}

impl From<LiveState> for i64 {
    fn from(state: LiveState) -> Self {
        match state {
            LiveState::Offline => 0,
            LiveState::Live => 1,
            LiveState::Other(raw) => raw,
        }
    }
}

/// Result of a single status lookup.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LiveStatus {
    pub state: LiveState,
    pub room_id: u64,
    pub title: String,
    pub display_name: String,
}

impl LiveStatus {
    /// Zero-value status used for uids upstream did not resolve.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    /// A degenerate record: no name and no room.
    pub fn is_empty(&self) -> bool {
        self.display_name.trim().is_empty() && self.room_id == 0
    }

    /// Canonical viewing link for the room.
    pub fn room_url(&self) -> String {
        room_url(self.room_id)
    }
}

pub fn room_url(room_id: u64) -> String {
    format!("https://live.bilibili.com/{room_id}")
}

/// Envelope returned by `get_status_info_by_uids`.
#[derive(Debug, Deserialize)]
pub(crate) struct StatusResponse {
    pub code: i64,
    #[serde(default, alias = "msg")]
    pub message: String,
    #[serde(default)]
    pub data: Option<StatusData>,
}

/// Upstream returns either a uid-keyed object or a list of records.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum StatusData {
    Keyed(HashMap<String, Option<RoomStatusRecord>>),
    List(Vec<Option<RoomStatusRecord>>),
}

/// Treat an explicit `null` like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RoomStatusRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub live_status: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub room_id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub uname: String,
    #[serde(default)]
    pub uid: Option<Value>,
    #[serde(default)]
    pub mid: Option<Value>,
}

impl RoomStatusRecord {
    /// The id-like field identifying a list entry, `uid` first then `mid`.
    fn record_id(&self) -> Option<String> {
        [self.uid.as_ref(), self.mid.as_ref()]
            .into_iter()
            .flatten()
            .find_map(id_from_value)
    }

    fn into_status(self) -> LiveStatus {
        LiveStatus {
            state: LiveState::from(self.live_status),
            room_id: self.room_id,
            title: self.title,
            display_name: self.uname,
        }
    }
}

fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => n.as_u64().filter(|n| *n != 0).map(|n| n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Map the payload onto exactly the requested uids.
///
/// Uids absent from the payload get a zero-value status; entries for uids
/// that were not requested are dropped.
pub(crate) fn normalize(uids: &[String], data: Option<StatusData>) -> HashMap<String, LiveStatus> {
    let mut by_uid: HashMap<String, RoomStatusRecord> = match data {
        Some(StatusData::Keyed(map)) => map
            .into_iter()
            .filter_map(|(uid, record)| record.map(|record| (uid, record)))
            .collect(),
        Some(StatusData::List(records)) => records
            .into_iter()
            .flatten()
            .filter_map(|record| record.record_id().map(|id| (id, record)))
            .collect(),
        None => HashMap::new(),
    };

    uids.iter()
        .map(|uid| {
            let status = by_uid
                .remove(uid)
                .map(RoomStatusRecord::into_status)
                .unwrap_or_default();
            (uid.clone(), status)
        })
        .collect()
}
