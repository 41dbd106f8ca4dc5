use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Live pane as reported by the session daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PaneSnapshot {
    pub id: String,
    pub index: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub width: u16,
    #[serde(default)]
    pub height: u16,
    #[serde(default)]
    pub dead: bool,
    #[serde(default)]
    pub dead_status: i32,
    #[serde(default)]
    pub restore_failed: bool,
    #[serde(default)]
    pub disconnected: bool,
    #[serde(default)]
    pub last_active_ms: Option<i64>,
    #[serde(default)]
    pub preview: Vec<String>,
}

/// Live session as reported by the session daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub layout: String,
    #[serde(default)]
    pub panes: Vec<PaneSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateSnapshot {
    pub seq: u64,
    #[serde(default)]
    pub sessions: Vec<SessionSnapshot>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaneStatus {
    Idle,
    Running,
    Done,
    Error,
    Disconnected,
}

impl PaneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaneStatus::Idle => "idle",
            PaneStatus::Running => "running",
            PaneStatus::Done => "done",
            PaneStatus::Error => "error",
            PaneStatus::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for PaneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaneStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(PaneStatus::Idle),
            "running" | "busy" | "working" => Ok(PaneStatus::Running),
            "done" | "finished" => Ok(PaneStatus::Done),
            "error" | "failed" => Ok(PaneStatus::Error),
            "disconnected" | "offline" => Ok(PaneStatus::Disconnected),
            other => Err(format!("Unknown pane status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Stopped,
    Running,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Stopped => "stopped",
            SessionStatus::Running => "running",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaneItem {
    pub id: String,
    pub index: String,
    pub title: String,
    pub command: String,
    pub active: bool,
    pub width: u16,
    pub height: u16,
    pub dead: bool,
    pub dead_status: i32,
    pub restore_failed: bool,
    pub disconnected: bool,
    pub last_active: Option<DateTime<Utc>>,
    pub preview: Vec<String>,
    pub status: PaneStatus,
}

impl PaneItem {
    /// Builds a pane item from its snapshot, keeping only the last `preview_lines`
    /// lines of output. The status is filled in by the classifier afterwards.
    pub fn from_snapshot(snapshot: &PaneSnapshot, preview_lines: usize) -> Self {
        let skip = snapshot.preview.len().saturating_sub(preview_lines);
        Self {
            id: snapshot.id.clone(),
            index: snapshot.index.clone(),
            title: snapshot.title.clone(),
            command: snapshot.command.clone(),
            active: snapshot.active,
            width: snapshot.width,
            height: snapshot.height,
            dead: snapshot.dead,
            dead_status: snapshot.dead_status,
            restore_failed: snapshot.restore_failed,
            disconnected: snapshot.disconnected,
            last_active: snapshot
                .last_active_ms
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            preview: snapshot.preview[skip..].to_vec(),
            status: PaneStatus::Running,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionItem {
    pub name: String,
    pub path: String,
    pub layout_name: String,
    pub status: SessionStatus,
    pub pane_count: usize,
    pub active_pane: String,
    pub panes: Vec<PaneItem>,
    pub thumbnail: Option<String>,
}

impl SessionItem {
    pub fn stopped(name: &str, path: &str, layout_name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            layout_name: layout_name.to_string(),
            status: SessionStatus::Stopped,
            pane_count: 0,
            active_pane: String::new(),
            panes: Vec::new(),
            thumbnail: None,
        }
    }

    pub fn pane(&self, index: &str) -> Option<&PaneItem> {
        self.panes.iter().find(|pane| pane.index == index)
    }

    pub fn is_running(&self) -> bool {
        self.status != SessionStatus::Stopped
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProjectGroup {
    pub id: String,
    pub name: String,
    pub path: String,
    pub from_config: bool,
    pub sessions: Vec<SessionItem>,
}

impl ProjectGroup {
    pub fn session(&self, name: &str) -> Option<&SessionItem> {
        self.sessions.iter().find(|session| session.name == name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    Ansi,
    Interactive,
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ColorProfile {
    #[default]
    TrueColor,
    Ansi256,
    Ansi16,
    Mono,
}

impl ColorProfile {
    pub const NAMES: &'static [&'static str] = &["truecolor", "ansi256", "ansi16", "mono"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColorProfile::TrueColor => "truecolor",
            ColorProfile::Ansi256 => "ansi256",
            ColorProfile::Ansi16 => "ansi16",
            ColorProfile::Mono => "mono",
        }
    }
}

impl FromStr for ColorProfile {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "truecolor" | "24bit" => Ok(ColorProfile::TrueColor),
            "ansi256" | "256" => Ok(ColorProfile::Ansi256),
            "ansi16" | "ansi" | "16" => Ok(ColorProfile::Ansi16),
            "mono" | "none" => Ok(ColorProfile::Mono),
            other => Err(format!("Unknown color profile: {other}")),
        }
    }
}

/// Exact identity of a rendered pane view. Any differing field is a distinct view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaneViewKey {
    pub pane_id: String,
    pub cols: u16,
    pub rows: u16,
    pub mode: ViewMode,
    pub show_cursor: bool,
    pub color_profile: ColorProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaneViewRequest {
    #[serde(flatten)]
    pub key: PaneViewKey,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaneViewResponse {
    #[serde(flatten)]
    pub key: PaneViewKey,
    #[serde(default)]
    pub view: String,
    #[serde(default)]
    pub allow_motion: bool,
    #[serde(default)]
    pub update_seq: u64,
}
