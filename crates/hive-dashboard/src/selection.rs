use hive_core::{PaneItem, ProjectGroup, SessionItem, SessionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    Dashboard,
    Projects,
}

impl Tab {
    pub fn toggle(self) -> Self {
        match self {
            Tab::Dashboard => Tab::Projects,
            Tab::Projects => Tab::Dashboard,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Tab::Dashboard => "Dashboard",
            Tab::Projects => "Projects",
        }
    }
}

/// Highlighted project/session/pane. Empty strings mean "nothing selected".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectionState {
    pub project_id: String,
    pub session: String,
    pub pane: String,
}

impl SelectionState {
    pub fn new(project_id: &str, session: &str, pane: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            session: session.to_string(),
            pane: pane.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.project_id.is_empty() && self.session.is_empty() && self.pane.is_empty()
    }
}

/// A pane in the dashboard grid together with the session that owns it.
#[derive(Debug, Clone, Copy)]
pub struct DashboardPane<'a> {
    pub session: &'a SessionItem,
    pub pane: &'a PaneItem,
}

/// One project column of the dashboard: the panes of every live session.
#[derive(Debug, Clone)]
pub struct DashboardColumn<'a> {
    pub project: &'a ProjectGroup,
    pub panes: Vec<DashboardPane<'a>>,
}

impl<'a> DashboardColumn<'a> {
    pub fn selection_for(&self, pane: Option<&DashboardPane<'a>>) -> SelectionState {
        match pane {
            Some(entry) => {
                SelectionState::new(&self.project.id, &entry.session.name, &entry.pane.index)
            }
            None => SelectionState::new(&self.project.id, "", ""),
        }
    }

    pub fn position_of(&self, selection: &SelectionState) -> Option<usize> {
        self.panes.iter().position(|entry| {
            entry.session.name == selection.session && entry.pane.index == selection.pane
        })
    }
}

/// One column per project with at least one live session, even when those
/// sessions report no panes yet.
pub fn dashboard_columns(projects: &[ProjectGroup]) -> Vec<DashboardColumn<'_>> {
    projects
        .iter()
        .filter_map(|project| {
            let mut live = project
                .sessions
                .iter()
                .filter(|session| session.status != SessionStatus::Stopped)
                .peekable();
            live.peek()?;
            let panes = live
                .flat_map(|session| {
                    session
                        .panes
                        .iter()
                        .map(move |pane| DashboardPane { session, pane })
                })
                .collect();
            Some(DashboardColumn { project, panes })
        })
        .collect()
}

pub fn resolve_selection(
    projects: &[ProjectGroup],
    desired: &SelectionState,
    tab: Tab,
) -> SelectionState {
    match tab {
        Tab::Projects => resolve_project_selection(projects, desired),
        Tab::Dashboard => resolve_dashboard_selection(projects, desired),
    }
}

/// Project and session are validated; the pane passes through untouched for
/// [`resolve_pane_selection`].
fn resolve_project_selection(projects: &[ProjectGroup], desired: &SelectionState) -> SelectionState {
    let Some(project) = projects
        .iter()
        .find(|project| project.id == desired.project_id)
        .or_else(|| projects.first())
    else {
        return SelectionState::default();
    };
    let session = project
        .session(&desired.session)
        .or_else(|| project.sessions.first())
        .map(|session| session.name.as_str())
        .unwrap_or_default();
    SelectionState::new(&project.id, session, &desired.pane)
}

fn resolve_dashboard_selection(
    projects: &[ProjectGroup],
    desired: &SelectionState,
) -> SelectionState {
    let columns = dashboard_columns(projects);

    if !desired.session.is_empty() {
        let exact = columns.iter().find_map(|column| {
            column
                .panes
                .iter()
                .find(|entry| {
                    entry.session.name == desired.session && entry.pane.index == desired.pane
                })
                .map(|entry| column.selection_for(Some(entry)))
        });
        if let Some(found) = exact {
            return found;
        }
        let same_session = columns.iter().find_map(|column| {
            column
                .panes
                .iter()
                .find(|entry| entry.session.name == desired.session)
                .map(|entry| column.selection_for(Some(entry)))
        });
        if let Some(found) = same_session {
            return found;
        }
    }

    if !desired.project_id.is_empty() {
        if let Some(column) = columns
            .iter()
            .find(|column| column.project.id == desired.project_id)
        {
            return column.selection_for(column.panes.first());
        }
    }

    columns
        .first()
        .map(|column| column.selection_for(column.panes.first()))
        .unwrap_or_default()
}

/// Desired pane if it still exists, else the session's active pane, else the
/// first pane, else empty.
pub fn resolve_pane_selection(session: &SessionItem, desired: &str) -> String {
    if !desired.is_empty() && session.pane(desired).is_some() {
        return desired.to_string();
    }
    if let Some(active) = session.pane(&session.active_pane) {
        return active.index.clone();
    }
    session
        .panes
        .first()
        .map(|pane| pane.index.clone())
        .unwrap_or_default()
}

/// Resolves project and session for the tab, then settles the pane inside the
/// chosen session.
pub fn resolve_full_selection(
    projects: &[ProjectGroup],
    desired: &SelectionState,
    tab: Tab,
) -> SelectionState {
    let mut resolved = resolve_selection(projects, desired, tab);
    if tab == Tab::Projects {
        resolved.pane = projects
            .iter()
            .find(|project| project.id == resolved.project_id)
            .and_then(|project| project.session(&resolved.session))
            .map(|session| resolve_pane_selection(session, &resolved.pane))
            .unwrap_or_default();
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::{PaneSnapshot, PaneStatus};

    fn pane(index: &str, active: bool) -> PaneItem {
        let mut item = PaneItem::from_snapshot(
            &PaneSnapshot {
                id: format!("p-{index}"),
                index: index.to_string(),
                active,
                ..PaneSnapshot::default()
            },
            5,
        );
        item.status = PaneStatus::Idle;
        item
    }

    fn running(name: &str, panes: Vec<PaneItem>) -> SessionItem {
        let active_pane = panes
            .iter()
            .find(|pane| pane.active)
            .map(|pane| pane.index.clone())
            .unwrap_or_default();
        SessionItem {
            name: name.to_string(),
            path: String::new(),
            layout_name: String::new(),
            status: SessionStatus::Running,
            pane_count: panes.len(),
            active_pane,
            panes,
            thumbnail: None,
        }
    }

    fn group(id: &str, name: &str, sessions: Vec<SessionItem>) -> ProjectGroup {
        ProjectGroup {
            id: id.to_string(),
            name: name.to_string(),
            path: id.to_string(),
            from_config: true,
            sessions,
        }
    }

    fn tree() -> Vec<ProjectGroup> {
        vec![
            group("/a/api", "api", vec![SessionItem::stopped("idle-api", "/a/api", "")]),
            group(
                "/b/api",
                "api",
                vec![running("api-2", vec![pane("0", false), pane("1", true)])],
            ),
            group("/c/web", "web", vec![running("web-1", vec![pane("3", true)])]),
        ]
    }

    #[test]
    fn empty_tree_yields_empty_selection() {
        let desired = SelectionState::new("/x", "s", "1");
        assert!(resolve_selection(&[], &desired, Tab::Dashboard).is_empty());
        assert!(resolve_selection(&[], &desired, Tab::Projects).is_empty());
    }

    #[test]
    fn project_tab_falls_back_and_passes_pane_through() {
        let projects = tree();
        let resolved = resolve_selection(
            &projects,
            &SelectionState::new("/b/api", "gone", "9"),
            Tab::Projects,
        );
        assert_eq!(resolved, SelectionState::new("/b/api", "api-2", "9"));

        let resolved = resolve_selection(
            &projects,
            &SelectionState::new("/missing", "", ""),
            Tab::Projects,
        );
        assert_eq!(resolved, SelectionState::new("/a/api", "idle-api", ""));
    }

    #[test]
    fn project_ids_not_names_identify_projects() {
        let projects = tree();
        let resolved = resolve_selection(
            &projects,
            &SelectionState::new("/b/api", "", ""),
            Tab::Projects,
        );
        assert_eq!(resolved.project_id, "/b/api");
        let resolved = resolve_selection(
            &projects,
            &SelectionState::new("/b/api", "", ""),
            Tab::Dashboard,
        );
        assert_eq!(resolved, SelectionState::new("/b/api", "api-2", "0"));
    }

    #[test]
    fn dashboard_prefers_exact_pane_then_session() {
        let projects = tree();
        let exact = resolve_selection(
            &projects,
            &SelectionState::new("", "api-2", "1"),
            Tab::Dashboard,
        );
        assert_eq!(exact, SelectionState::new("/b/api", "api-2", "1"));
        let same_session = resolve_selection(
            &projects,
            &SelectionState::new("/c/web", "api-2", "7"),
            Tab::Dashboard,
        );
        assert_eq!(same_session, SelectionState::new("/b/api", "api-2", "0"));
    }

    #[test]
    fn dashboard_skips_stopped_sessions() {
        let projects = tree();
        let resolved = resolve_selection(
            &projects,
            &SelectionState::new("/a/api", "idle-api", ""),
            Tab::Dashboard,
        );
        assert_eq!(resolved, SelectionState::new("/b/api", "api-2", "0"));
        assert_eq!(dashboard_columns(&projects).len(), 2);
    }

    #[test]
    fn running_session_without_panes_keeps_its_column() {
        let projects = vec![
            group("/e", "empty", vec![running("e-1", vec![])]),
            group("/o", "other", vec![running("o-1", vec![pane("0", true)])]),
        ];
        let columns = dashboard_columns(&projects);
        assert_eq!(columns.len(), 2);
        assert!(columns[0].panes.is_empty());

        let resolved = resolve_selection(
            &projects,
            &SelectionState::new("/e", "", ""),
            Tab::Dashboard,
        );
        assert_eq!(resolved, SelectionState::new("/e", "", ""));
        let first = resolve_selection(&projects, &SelectionState::default(), Tab::Dashboard);
        assert_eq!(first, SelectionState::new("/e", "", ""));
    }

    #[test]
    fn resolved_entities_always_exist() {
        let projects = tree();
        let candidates = [
            SelectionState::default(),
            SelectionState::new("/c/web", "", ""),
            SelectionState::new("nope", "nope", "nope"),
            SelectionState::new("/b/api", "web-1", "3"),
        ];
        for tab in [Tab::Dashboard, Tab::Projects] {
            for desired in &candidates {
                let resolved = resolve_full_selection(&projects, desired, tab);
                let project = projects
                    .iter()
                    .find(|project| project.id == resolved.project_id)
                    .expect("project exists");
                let session = project.session(&resolved.session).expect("session exists");
                if !resolved.pane.is_empty() {
                    assert!(session.pane(&resolved.pane).is_some());
                }
            }
        }
    }

    #[test]
    fn pane_resolution_prefers_desired_then_active_then_first() {
        let session = running("s", vec![pane("0", false), pane("1", true)]);
        assert_eq!(resolve_pane_selection(&session, "0"), "0");
        assert_eq!(resolve_pane_selection(&session, "5"), "1");
        let mut no_active = running("s", vec![pane("2", false), pane("4", false)]);
        no_active.active_pane = String::new();
        assert_eq!(resolve_pane_selection(&no_active, ""), "2");
        assert_eq!(resolve_pane_selection(&running("s", vec![]), "1"), "");
    }
}
