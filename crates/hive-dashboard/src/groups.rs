//! Merges configured projects with live daemon sessions into the
//! project → session → pane tree the dashboard renders.

use crate::agent_state::AgentStateSource;
use crate::status::classify;
use chrono::{DateTime, Utc};
use hive_core::ansi::last_nonblank_line;
use hive_core::config::{DashboardSettings, ProjectConfig};
use hive_core::paths::{base_name, normalize_path, project_key};
use hive_core::{PaneItem, ProjectGroup, SessionItem, SessionSnapshot, SessionStatus};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

const FALLBACK_PROJECT_NAME: &str = "project";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardData {
    pub projects: Vec<ProjectGroup>,
}

impl DashboardData {
    pub fn project(&self, id: &str) -> Option<&ProjectGroup> {
        self.projects.iter().find(|project| project.id == id)
    }

    pub fn pane_ids(&self) -> HashSet<String> {
        self.projects
            .iter()
            .flat_map(|project| project.sessions.iter())
            .flat_map(|session| session.panes.iter())
            .map(|pane| pane.id.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

struct GroupIndex {
    groups: Vec<ProjectGroup>,
    by_key: HashMap<String, usize>,
    by_session: HashMap<String, usize>,
    config_order: HashMap<String, usize>,
    /// Sessions seeded from configuration per group; the rest arrived live.
    seeded: Vec<usize>,
}

impl GroupIndex {
    fn new() -> Self {
        Self {
            groups: Vec::new(),
            by_key: HashMap::new(),
            by_session: HashMap::new(),
            config_order: HashMap::new(),
            seeded: Vec::new(),
        }
    }

    fn insert_group(&mut self, key: String, name: String, path: String, from_config: bool) -> usize {
        let position = self.groups.len();
        self.groups.push(ProjectGroup {
            id: key.clone(),
            name,
            path,
            from_config,
            sessions: Vec::new(),
        });
        self.seeded.push(0);
        self.by_key.insert(key, position);
        position
    }
}

pub fn build_groups(
    projects: &[ProjectConfig],
    sessions: &[SessionSnapshot],
    settings: &DashboardSettings,
    agents: &dyn AgentStateSource,
    now: DateTime<Utc>,
) -> DashboardData {
    let mut index = GroupIndex::new();
    seed_from_config(&mut index, projects, settings);
    for snapshot in sessions {
        merge_live_session(&mut index, snapshot, settings, agents, now);
    }

    let GroupIndex {
        mut groups,
        config_order,
        seeded,
        ..
    } = index;

    for (group, seeded) in groups.iter_mut().zip(seeded) {
        // Live-only sessions come after configured ones, by name, so arrival
        // order never reshuffles a project.
        let seeded = seeded.min(group.sessions.len());
        group.sessions[seeded..].sort_by(|left, right| left.name.cmp(&right.name));
        if settings.show_thumbnails {
            for session in group.sessions.iter_mut().filter(|s| s.is_running()) {
                session.thumbnail = session
                    .pane(&session.active_pane)
                    .and_then(|pane| last_nonblank_line(&pane.preview));
            }
        }
    }

    groups.sort_by(|left, right| compare_groups(left, right, &config_order));
    DashboardData { projects: groups }
}

fn seed_from_config(index: &mut GroupIndex, projects: &[ProjectConfig], settings: &DashboardSettings) {
    for (order, project) in projects.iter().enumerate() {
        let path = normalize_path(&project.path);
        let name = display_name(project.name.trim(), &path, "");
        if settings.hidden.is_hidden(&path, &name) {
            continue;
        }
        let key = project_key(&path, &name);
        let position = match index.by_key.get(&key) {
            Some(position) => *position,
            None => {
                index.config_order.insert(key.clone(), order);
                index.insert_group(key, name.clone(), path.clone(), true)
            }
        };

        let session_name = if project.session.trim().is_empty() {
            session_name_for(&name)
        } else {
            project.session.trim().to_string()
        };
        let group = &mut index.groups[position];
        if group.session(&session_name).is_none() {
            group
                .sessions
                .push(SessionItem::stopped(&session_name, &path, project.layout.trim()));
            index.seeded[position] += 1;
        }
        index.by_session.entry(session_name).or_insert(position);
    }
}

fn merge_live_session(
    index: &mut GroupIndex,
    snapshot: &SessionSnapshot,
    settings: &DashboardSettings,
    agents: &dyn AgentStateSource,
    now: DateTime<Utc>,
) {
    let path = normalize_path(&snapshot.path);
    let name = display_name("", &path, &snapshot.name);
    let key = project_key(&path, &name);

    let position = match index
        .by_session
        .get(&snapshot.name)
        .or_else(|| index.by_key.get(&key))
    {
        Some(&position) => {
            // Path-less groups are keyed by lower-cased name; the smallest
            // session name labels the group.
            let group = &mut index.groups[position];
            if !group.from_config && group.path.is_empty() && name < group.name {
                group.name = name;
            }
            position
        }
        None => {
            if settings.hidden.is_hidden(&path, &name) {
                return;
            }
            index.insert_group(key, name, path.clone(), false)
        }
    };

    let panes = build_panes(snapshot, settings, agents, now);
    let active_pane = panes
        .iter()
        .find(|pane| pane.active)
        .or_else(|| panes.first())
        .map(|pane| pane.index.clone())
        .unwrap_or_default();

    let group = &mut index.groups[position];
    match group
        .sessions
        .iter_mut()
        .find(|session| session.name == snapshot.name)
    {
        Some(existing) => {
            existing.status = SessionStatus::Running;
            existing.pane_count = panes.len();
            existing.active_pane = active_pane;
            existing.panes = panes;
            if !path.is_empty() {
                existing.path = path;
            }
            if !snapshot.layout.trim().is_empty() {
                existing.layout_name = snapshot.layout.trim().to_string();
            }
        }
        None => group.sessions.push(SessionItem {
            name: snapshot.name.clone(),
            path,
            layout_name: snapshot.layout.trim().to_string(),
            status: SessionStatus::Running,
            pane_count: panes.len(),
            active_pane,
            panes,
            thumbnail: None,
        }),
    }
}

fn build_panes(
    snapshot: &SessionSnapshot,
    settings: &DashboardSettings,
    agents: &dyn AgentStateSource,
    now: DateTime<Utc>,
) -> Vec<PaneItem> {
    let mut panes: Vec<PaneItem> = snapshot
        .panes
        .iter()
        .map(|raw| {
            let mut pane = PaneItem::from_snapshot(raw, settings.preview_lines);
            pane.status = classify(&pane, &pane.preview, settings, agents, now);
            pane
        })
        .collect();
    panes.sort_by(|left, right| compare_pane_index(&left.index, &right.index));
    panes
}

fn compare_pane_index(left: &str, right: &str) -> Ordering {
    let left_num = left.trim().parse::<u64>().ok();
    let right_num = right.trim().parse::<u64>().ok();
    left_num
        .is_none()
        .cmp(&right_num.is_none())
        .then_with(|| left_num.unwrap_or(u64::MAX).cmp(&right_num.unwrap_or(u64::MAX)))
        .then_with(|| left.cmp(right))
}

fn compare_groups(
    left: &ProjectGroup,
    right: &ProjectGroup,
    config_order: &HashMap<String, usize>,
) -> Ordering {
    match (config_order.get(&left.id), config_order.get(&right.id)) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => left
            .name
            .to_lowercase()
            .cmp(&right.name.to_lowercase())
            .then_with(|| left.path.cmp(&right.path))
            .then_with(|| left.id.cmp(&right.id)),
    }
}

fn display_name(explicit: &str, path: &str, fallback: &str) -> String {
    if !explicit.is_empty() {
        return explicit.to_string();
    }
    if let Some(base) = base_name(path) {
        return base;
    }
    let fallback = fallback.trim();
    if fallback.is_empty() {
        FALLBACK_PROJECT_NAME.to_string()
    } else {
        fallback.to_string()
    }
}

fn session_name_for(project_name: &str) -> String {
    let mut slug = String::with_capacity(project_name.len());
    for ch in project_name.trim().chars() {
        if ch.is_alphanumeric() || ch == '-' || ch == '_' {
            slug.extend(ch.to_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        FALLBACK_PROJECT_NAME.to_string()
    } else {
        slug.to_string()
    }
}
