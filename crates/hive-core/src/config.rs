use crate::model::ColorProfile;
use crate::paths::{expand_home, normalize_path};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SUCCESS_PATTERN: &str = r"done|finished|success|completed|✔";
pub const DEFAULT_ERROR_PATTERN: &str = r"error|failed|panic|exception|fatal|✗";
pub const DEFAULT_RUNNING_PATTERN: &str =
    r"running|working|thinking|building|compiling|in progress";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid regex for {field} ({pattern:?}): {source}")]
    InvalidRegex {
        field: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid value {value:?} for {field}; expected one of: {expected}")]
    InvalidOption {
        field: &'static str,
        value: String,
        expected: String,
    },
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub layout: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct StatusRegexConfig {
    #[serde(default)]
    pub success: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub running: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DashboardConfig {
    pub preview_lines: usize,
    pub idle_seconds: u64,
    pub show_thumbnails: bool,
    pub hidden_projects: Vec<String>,
    pub status_regex: StatusRegexConfig,
    pub agent_state_dir: Option<String>,
    pub agent_state_ttl_seconds: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            preview_lines: 12,
            idle_seconds: 20,
            show_thumbnails: true,
            hidden_projects: Vec::new(),
            status_regex: StatusRegexConfig::default(),
            agent_state_dir: None,
            agent_state_ttl_seconds: 30,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket: Option<String>,
    pub refresh_ms: u64,
    pub pane_view_workers: usize,
    pub pane_view_timeout_ms: u64,
    pub pane_view_min_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket: None,
            refresh_ms: 2_000,
            pane_view_workers: 4,
            pane_view_timeout_ms: 2_000,
            pane_view_min_interval_ms: 50,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct UiConfig {
    pub color_profile: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            color_profile: ColorProfile::TrueColor.as_str().to_string(),
        }
    }
}

/// Raw file contents. Call [`Config::resolve`] to validate.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub projects: Vec<ProjectConfig>,
    pub dashboard: DashboardConfig,
    pub daemon: DaemonConfig,
    pub ui: UiConfig,
}

#[derive(Clone, Debug)]
pub struct StatusPatterns {
    pub success: Regex,
    pub error: Regex,
    pub running: Regex,
}

impl StatusPatterns {
    pub fn compile(config: &StatusRegexConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            success: compile_pattern(
                "dashboard.status_regex.success",
                config.success.as_deref(),
                DEFAULT_SUCCESS_PATTERN,
            )?,
            error: compile_pattern(
                "dashboard.status_regex.error",
                config.error.as_deref(),
                DEFAULT_ERROR_PATTERN,
            )?,
            running: compile_pattern(
                "dashboard.status_regex.running",
                config.running.as_deref(),
                DEFAULT_RUNNING_PATTERN,
            )?,
        })
    }
}

impl Default for StatusPatterns {
    fn default() -> Self {
        Self::compile(&StatusRegexConfig::default()).expect("valid regex")
    }
}

fn compile_pattern(
    field: &'static str,
    configured: Option<&str>,
    fallback: &str,
) -> Result<Regex, ConfigError> {
    let pattern = configured
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(fallback);
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ConfigError::InvalidRegex {
            field,
            pattern: pattern.to_string(),
            source,
        })
}

/// Projects hidden from the dashboard, matched by normalized path or by
/// lower-cased name.
#[derive(Clone, Debug, Default)]
pub struct HiddenProjects {
    paths: HashSet<String>,
    names: HashSet<String>,
}

impl HiddenProjects {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut hidden = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            hidden.names.insert(entry.to_lowercase());
            if entry.starts_with('/') || entry.starts_with('~') {
                hidden.paths.insert(normalize_path(entry));
            }
        }
        hidden
    }

    pub fn is_hidden(&self, normalized_path: &str, name: &str) -> bool {
        (!normalized_path.is_empty() && self.paths.contains(normalized_path))
            || (!name.trim().is_empty() && self.names.contains(&name.trim().to_lowercase()))
    }
}

#[derive(Clone, Debug)]
pub struct DashboardSettings {
    pub preview_lines: usize,
    pub idle_threshold: Duration,
    pub show_thumbnails: bool,
    pub hidden: HiddenProjects,
    pub patterns: StatusPatterns,
    pub agent_state_dir: Option<PathBuf>,
    pub agent_state_ttl: Duration,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        let raw = DashboardConfig::default();
        Self {
            preview_lines: raw.preview_lines,
            idle_threshold: Duration::from_secs(raw.idle_seconds),
            show_thumbnails: raw.show_thumbnails,
            hidden: HiddenProjects::default(),
            patterns: StatusPatterns::default(),
            agent_state_dir: None,
            agent_state_ttl: Duration::from_secs(raw.agent_state_ttl_seconds),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DaemonSettings {
    pub socket: PathBuf,
    pub refresh_interval: Duration,
    pub pane_view_workers: usize,
    pub pane_view_timeout: Duration,
    pub pane_view_min_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub projects: Vec<ProjectConfig>,
    pub dashboard: DashboardSettings,
    pub daemon: DaemonSettings,
    pub color_profile: ColorProfile,
}

impl Config {
    /// Loads the file at `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&contents, path)
    }

    pub fn parse(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|err| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: err.to_string(),
        })
    }

    pub fn resolve(self) -> Result<Settings, ConfigError> {
        let patterns = StatusPatterns::compile(&self.dashboard.status_regex)?;
        let color_profile = self
            .ui
            .color_profile
            .parse::<ColorProfile>()
            .map_err(|_| ConfigError::InvalidOption {
                field: "ui.color_profile",
                value: self.ui.color_profile.clone(),
                expected: ColorProfile::NAMES.join(", "),
            })?;

        let dashboard = DashboardSettings {
            preview_lines: self.dashboard.preview_lines,
            idle_threshold: Duration::from_secs(self.dashboard.idle_seconds),
            show_thumbnails: self.dashboard.show_thumbnails,
            hidden: HiddenProjects::new(&self.dashboard.hidden_projects),
            patterns,
            agent_state_dir: self
                .dashboard
                .agent_state_dir
                .as_deref()
                .filter(|value| !value.trim().is_empty())
                .map(expand_home),
            agent_state_ttl: Duration::from_secs(self.dashboard.agent_state_ttl_seconds),
        };

        let socket = std::env::var("HIVE_DAEMON_SOCK")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or(self.daemon.socket.clone())
            .map(|value| expand_home(&value))
            .unwrap_or_else(default_socket_path);
        let daemon = DaemonSettings {
            socket,
            refresh_interval: Duration::from_millis(self.daemon.refresh_ms.max(100)),
            pane_view_workers: self.daemon.pane_view_workers.max(1),
            pane_view_timeout: Duration::from_millis(self.daemon.pane_view_timeout_ms.max(1)),
            pane_view_min_interval: Duration::from_millis(self.daemon.pane_view_min_interval_ms),
        };

        Ok(Settings {
            projects: self.projects,
            dashboard,
            daemon,
            color_profile,
        })
    }
}

pub fn default_config_path() -> PathBuf {
    if let Ok(value) = std::env::var("HIVE_CONFIG") {
        if !value.trim().is_empty() {
            return expand_home(&value);
        }
    }
    if let Ok(value) = std::env::var("XDG_CONFIG_HOME") {
        if !value.trim().is_empty() {
            return PathBuf::from(value).join("hive").join("config.toml");
        }
    }
    crate::paths::home_dir()
        .map(|home| home.join(".config").join("hive").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("hive.toml"))
}

fn default_socket_path() -> PathBuf {
    let runtime_dir = match std::env::var("XDG_RUNTIME_DIR") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => match std::env::var("UID") {
            Ok(uid) => PathBuf::from(format!("/run/user/{uid}")),
            Err(_) => PathBuf::from("/tmp"),
        },
    };
    runtime_dir.join("hive").join("daemon.sock")
}
