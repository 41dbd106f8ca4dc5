//! Side-channel status reported by agents running inside panes.
//!
//! Agents drop a small JSON file per pane (`<dir>/<pane_id>.json`) holding
//! their own view of the pane state. Files older than the configured TTL are
//! ignored so a crashed agent cannot pin a pane to "running" forever.

use chrono::{DateTime, TimeZone, Utc};
use hive_core::PaneStatus;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub trait AgentStateSource: Send + Sync {
    /// Fresh agent-reported status for the pane, if any.
    fn lookup(&self, pane_id: &str, now: DateTime<Utc>) -> Option<PaneStatus>;
}

pub struct NoAgentStates;

impl AgentStateSource for NoAgentStates {
    fn lookup(&self, _pane_id: &str, _now: DateTime<Utc>) -> Option<PaneStatus> {
        None
    }
}

#[derive(Deserialize)]
struct AgentStateFile {
    state: String,
    #[serde(default)]
    updated_at_ms: Option<i64>,
}

pub struct FileAgentStates {
    dir: PathBuf,
    ttl: Duration,
}

impl FileAgentStates {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn path_for(&self, pane_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_component(pane_id)))
    }
}

impl AgentStateSource for FileAgentStates {
    fn lookup(&self, pane_id: &str, now: DateTime<Utc>) -> Option<PaneStatus> {
        let path = self.path_for(pane_id);
        let contents = std::fs::read_to_string(&path).ok()?;
        let parsed: AgentStateFile = serde_json::from_str(&contents).ok()?;
        let updated_at = parsed
            .updated_at_ms
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .or_else(|| modified_at(&path))?;
        let age = now.signed_duration_since(updated_at).to_std().unwrap_or_default();
        if age > self.ttl {
            return None;
        }
        match parsed.state.parse::<PaneStatus>().ok()? {
            PaneStatus::Disconnected => None,
            status => Some(status),
        }
    }
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(SystemTime::UNIX_EPOCH).ok()?;
    Utc.timestamp_millis_opt(since_epoch.as_millis() as i64).single()
}

fn sanitize_component(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
