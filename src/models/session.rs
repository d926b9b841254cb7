//! Session records and the ledger that holds them.
//!
//! Both types serialize to the on-disk cache format: camelCase keys with
//! instants stored as epoch milliseconds.

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

use super::PauseReason;

const ID_SUFFIX_LEN: usize = 9;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub app_name: String,
    #[serde(default)]
    pub task_id: Option<i64>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub end_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Milliseconds excluded from the duration because of pauses.
    #[serde(default)]
    pub total_paused_time: u64,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<PauseReason>,
    /// Wall-clock duration minus paused time; set when the session ends.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub synced: bool,
}

impl SessionRecord {
    pub fn new(app_name: String, task_id: Option<i64>, now: DateTime<Utc>) -> Self {
        Self {
            id: generate_session_id(now),
            app_name,
            task_id,
            start_time: now,
            end_time: None,
            is_active: true,
            total_paused_time: 0,
            paused_at: None,
            pause_reason: None,
            duration_ms: None,
            synced: false,
        }
    }

    /// Open sessions have no end time, whether running or paused.
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Ended and not yet accepted by the remote store.
    pub fn is_pending_sync(&self) -> bool {
        self.end_time.is_some() && !self.synced
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Ledger {
    pub sessions: Vec<SessionRecord>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_sync: Option<DateTime<Utc>>,
    pub unsynced_changes: bool,
}

/// `<epoch-ms>-<random suffix>`; the suffix keeps ids unique when two
/// sessions start within the same millisecond.
pub fn generate_session_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{}-{}", now.timestamp_millis(), suffix.to_lowercase())
}

/// Trims whitespace and drops platform bundle suffixes ("Code.app" -> "Code").
pub fn normalize_app_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let lowered = trimmed.to_ascii_lowercase();
    let name = [".app", ".exe"]
        .iter()
        .find(|suffix| lowered.ends_with(*suffix))
        .map(|suffix| trimmed[..trimmed.len() - suffix.len()].trim_end())
        .unwrap_or(trimmed);

    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
