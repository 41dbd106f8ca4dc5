use crate::agent_state::AgentStateSource;
use crate::daemon::{DaemonClient, DaemonEvent};
use crate::groups::{build_groups, DashboardData};
use crate::pane_view::{plan, run_wave, PaneViewFetcher, TerminalFocus, Wave, WaveOutcome};
use crate::refresh::RefreshSequencer;
use crate::selection::{dashboard_columns, resolve_full_selection, SelectionState, Tab};
use crate::ui;
use chrono::{DateTime, Utc};
use hive_core::config::Settings;
use hive_core::{PaneItem, PaneViewKey, PaneViewResponse, ProjectGroup, SessionItem};
use ratatui::layout::Rect;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Result of one snapshot refresh, built off the UI loop.
#[derive(Debug, Clone)]
pub struct RefreshResult {
    pub data: DashboardData,
    /// Selection the refresh was resolved against.
    pub desired: SelectionState,
    pub selection: SelectionState,
    pub connected: bool,
    pub error: Option<String>,
}

#[derive(Debug)]
pub enum AppEvent {
    SnapshotLoaded {
        seq: u64,
        result: Result<RefreshResult, String>,
    },
    PaneViewsFetched(WaveOutcome),
    Daemon(DaemonEvent),
}

/// Fetches a snapshot and turns it into a resolved dashboard. Daemon failures
/// degrade to the configured projects alone.
pub fn load_dashboard(
    client: &dyn DaemonClient,
    settings: &Settings,
    agents: &dyn AgentStateSource,
    desired: &SelectionState,
    tab: Tab,
    now: DateTime<Utc>,
) -> RefreshResult {
    let (sessions, connected, error) = match client.snapshot_state(0) {
        Ok(snapshot) => (snapshot.sessions, true, None),
        Err(err) if err.is_unavailable() => {
            debug!(event = "snapshot_unavailable", error = %err);
            (Vec::new(), false, None)
        }
        Err(err) => {
            warn!(event = "snapshot_failed", error = %err);
            (Vec::new(), false, Some(err.to_string()))
        }
    };
    let data = build_groups(&settings.projects, &sessions, &settings.dashboard, agents, now);
    let selection = resolve_full_selection(&data.projects, desired, tab);
    RefreshResult {
        data,
        desired: desired.clone(),
        selection,
        connected,
        error,
    }
}

pub struct App {
    settings: Arc<Settings>,
    client: Arc<dyn DaemonClient>,
    agents: Arc<dyn AgentStateSource>,
    tx: mpsc::Sender<AppEvent>,
    sequencer: RefreshSequencer,
    fetcher: PaneViewFetcher,
    pub data: DashboardData,
    pub selection: SelectionState,
    pub tab: Tab,
    pub focus: TerminalFocus,
    pub viewport: Rect,
    pub connected: bool,
    pub status_note: Option<String>,
    pub toast: Option<String>,
}

impl App {
    pub fn new(
        settings: Arc<Settings>,
        client: Arc<dyn DaemonClient>,
        agents: Arc<dyn AgentStateSource>,
        tx: mpsc::Sender<AppEvent>,
    ) -> Self {
        let fetcher = PaneViewFetcher::new(
            settings.daemon.pane_view_min_interval,
            settings.daemon.pane_view_timeout,
        );
        Self {
            settings,
            client,
            agents,
            tx,
            sequencer: RefreshSequencer::new(),
            fetcher,
            data: DashboardData::default(),
            selection: SelectionState::default(),
            tab: Tab::default(),
            focus: TerminalFocus::default(),
            viewport: Rect::default(),
            connected: false,
            status_note: None,
            toast: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn fetcher(&self) -> &PaneViewFetcher {
        &self.fetcher
    }

    pub fn sequencer(&self) -> &RefreshSequencer {
        &self.sequencer
    }

    pub fn request_refresh(&mut self) {
        let seq = self.sequencer.begin();
        let client = Arc::clone(&self.client);
        let settings = Arc::clone(&self.settings);
        let agents = Arc::clone(&self.agents);
        let desired = self.selection.clone();
        let tab = self.tab;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || {
                load_dashboard(
                    client.as_ref(),
                    &settings,
                    agents.as_ref(),
                    &desired,
                    tab,
                    Utc::now(),
                )
            })
            .await
            .map_err(|err| format!("refresh worker failed: {err}"));
            let _ = tx.send(AppEvent::SnapshotLoaded { seq, result }).await;
        });
    }

    pub fn apply_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::SnapshotLoaded { seq, result } => self.apply_snapshot(seq, result),
            AppEvent::PaneViewsFetched(outcome) => self.apply_pane_views(outcome),
            AppEvent::Daemon(event) => self.handle_daemon_event(event),
        }
    }

    fn apply_snapshot(&mut self, seq: u64, result: Result<RefreshResult, String>) {
        if !self.sequencer.complete(seq) {
            debug!(event = "snapshot_dropped_stale", seq, last_applied = self.sequencer.last_applied());
            return;
        }
        let result = match result {
            Ok(result) => result,
            Err(err) => {
                warn!(event = "snapshot_worker_failed", seq, error = %err);
                self.toast = Some(err);
                return;
            }
        };

        self.selection = if self.selection == result.desired {
            result.selection
        } else {
            resolve_full_selection(&result.data.projects, &self.selection, self.tab)
        };
        self.data = result.data;
        self.connected = result.connected;
        self.status_note = if self.connected {
            None
        } else {
            Some("daemon offline; showing configured projects".to_string())
        };
        if let Some(error) = result.error {
            self.toast = Some(error);
        }

        let live = self.data.pane_ids();
        self.fetcher.retain_panes(&live);
        if let Some(pane_id) = self.focus.pane_id.as_deref() {
            if !live.contains(pane_id) {
                self.focus = TerminalFocus::default();
            }
        }
        info!(
            event = "snapshot_applied",
            seq,
            projects = self.data.projects.len(),
            panes = live.len()
        );
        self.refresh_pane_views();
    }

    fn apply_pane_views(&mut self, outcome: WaveOutcome) {
        let plan = self.current_plan();
        let completion = self.fetcher.finish_wave(outcome, &plan, Instant::now());
        if let Some(err) = completion.report.error {
            warn!(event = "pane_view_wave_failed", error = %err);
            self.toast = Some(format!("pane views unavailable: {err}"));
        } else if completion.report.succeeded > 0 {
            self.toast = None;
        }
        if let Some(wave) = completion.next {
            self.spawn_wave(wave);
        }
    }

    pub fn handle_daemon_event(&mut self, event: DaemonEvent) {
        match event {
            DaemonEvent::Connected => {
                self.connected = true;
                self.request_refresh();
            }
            DaemonEvent::Disconnected => {
                self.connected = false;
                self.status_note = Some("daemon offline; showing cached views".to_string());
            }
            DaemonEvent::PaneUpdated { pane_id } => self.refresh_pane(&pane_id),
            DaemonEvent::SessionChanged { session } => {
                if self.sequencer.in_flight() {
                    debug!(event = "session_change_coalesced", session = ?session);
                } else {
                    self.request_refresh();
                }
            }
        }
    }

    /// Render requests for what is currently on screen.
    pub fn current_plan(&self) -> Vec<PaneViewKey> {
        let hits = ui::pane_hits(self.viewport, self);
        plan(&hits, &self.focus, self.settings.color_profile)
    }

    pub fn refresh_pane_views(&mut self) {
        if !self.connected {
            return;
        }
        let plan = self.current_plan();
        if let Some(wave) = self.fetcher.refresh(&plan, Instant::now()) {
            self.spawn_wave(wave);
        }
    }

    pub fn refresh_pane(&mut self, pane_id: &str) {
        if !self.connected {
            return;
        }
        let plan = self.current_plan();
        if let Some(wave) = self.fetcher.refresh_for(pane_id, &plan, Instant::now()) {
            self.spawn_wave(wave);
        }
    }

    fn spawn_wave(&self, wave: Wave) {
        debug!(event = "pane_view_wave_started", wave_id = wave.id, requests = wave.requests.len());
        let client = Arc::clone(&self.client);
        let workers = self.settings.daemon.pane_view_workers;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let outcome = run_wave(client, wave, workers).await;
            let _ = tx.send(AppEvent::PaneViewsFetched(outcome)).await;
        });
    }

    pub fn set_viewport(&mut self, area: Rect) {
        if self.viewport != area {
            self.viewport = area;
            self.refresh_pane_views();
        }
    }

    /// Exact view for the key, else the newest view of the pane at any size.
    pub fn view_for(&self, key: &PaneViewKey) -> Option<&PaneViewResponse> {
        let cache = self.fetcher.cache();
        cache.get(key).or_else(|| cache.latest_for_pane(&key.pane_id))
    }

    pub fn allow_motion(&self, pane_id: &str) -> bool {
        self.fetcher.allow_motion(pane_id)
    }

    pub fn selected_project(&self) -> Option<&ProjectGroup> {
        self.data.project(&self.selection.project_id)
    }

    pub fn selected_session(&self) -> Option<&SessionItem> {
        self.selected_project()?.session(&self.selection.session)
    }

    pub fn selected_pane(&self) -> Option<&PaneItem> {
        self.selected_session()?.pane(&self.selection.pane)
    }

    pub fn toggle_tab(&mut self) {
        self.tab = self.tab.toggle();
        self.selection = resolve_full_selection(&self.data.projects, &self.selection, self.tab);
        self.after_selection_change();
    }

    /// Left/right: project columns on the dashboard, panes on the project tab.
    pub fn move_horizontal(&mut self, delta: isize) {
        let next = match self.tab {
            Tab::Dashboard => {
                let columns = dashboard_columns(&self.data.projects);
                let current = columns
                    .iter()
                    .position(|column| column.project.id == self.selection.project_id)
                    .unwrap_or(0);
                let moved = step(current, delta, columns.len())
                    .map(|index| columns[index].selection_for(columns[index].panes.first()));
                moved
            }
            Tab::Projects => self.selected_session().and_then(|session| {
                let current = session
                    .panes
                    .iter()
                    .position(|pane| pane.index == self.selection.pane)
                    .unwrap_or(0);
                step(current, delta, session.panes.len()).map(|index| {
                    SelectionState::new(
                        &self.selection.project_id,
                        &session.name,
                        &session.panes[index].index,
                    )
                })
            }),
        };
        if let Some(next) = next {
            self.selection = next;
            self.after_selection_change();
        }
    }

    /// Up/down: panes within a dashboard column, sessions on the project tab.
    pub fn move_vertical(&mut self, delta: isize) {
        let next = match self.tab {
            Tab::Dashboard => {
                let columns = dashboard_columns(&self.data.projects);
                let moved = columns
                    .iter()
                    .find(|column| column.project.id == self.selection.project_id)
                    .and_then(|column| {
                        let current = column.position_of(&self.selection).unwrap_or(0);
                        step(current, delta, column.panes.len())
                            .map(|index| column.selection_for(column.panes.get(index)))
                    });
                moved
            }
            Tab::Projects => {
                let entries: Vec<(&str, &str)> = self
                    .data
                    .projects
                    .iter()
                    .flat_map(|project| {
                        project
                            .sessions
                            .iter()
                            .map(move |session| (project.id.as_str(), session.name.as_str()))
                    })
                    .collect();
                let current = entries
                    .iter()
                    .position(|(project_id, session)| {
                        *project_id == self.selection.project_id
                            && *session == self.selection.session
                    })
                    .unwrap_or(0);
                step(current, delta, entries.len()).map(|index| {
                    let (project_id, session) = entries[index];
                    resolve_full_selection(
                        &self.data.projects,
                        &SelectionState::new(project_id, session, ""),
                        Tab::Projects,
                    )
                })
            }
        };
        if let Some(next) = next {
            self.selection = next;
            self.after_selection_change();
        }
    }

    /// Gives keyboard focus to the selected pane, or takes it back.
    pub fn toggle_focus(&mut self) {
        self.focus = if self.focus.pane_id.is_some() {
            TerminalFocus::default()
        } else {
            TerminalFocus {
                pane_id: self.selected_pane().map(|pane| pane.id.clone()),
            }
        };
        self.refresh_pane_views();
    }

    pub fn clear_focus(&mut self) {
        if self.focus.pane_id.take().is_some() {
            self.refresh_pane_views();
        }
    }

    /// Asks the daemon to bring the selection forward. Failures are logged only.
    pub fn activate_selection(&mut self) {
        let client = Arc::clone(&self.client);
        match self.tab {
            Tab::Dashboard => {
                let Some(pane_id) = self.selected_pane().map(|pane| pane.id.clone()) else {
                    return;
                };
                self.status_note = Some(format!("focus pane {pane_id}"));
                tokio::task::spawn_blocking(move || {
                    if let Err(err) = client.focus_pane(&pane_id) {
                        warn!(event = "focus_pane_failed", pane_id = %pane_id, error = %err);
                    }
                });
            }
            Tab::Projects => {
                let Some(name) = self.selected_session().map(|session| session.name.clone()) else {
                    return;
                };
                self.status_note = Some(format!("focus session {name}"));
                tokio::task::spawn_blocking(move || {
                    if let Err(err) = client.focus_session(&name) {
                        warn!(event = "focus_session_failed", session = %name, error = %err);
                    }
                });
            }
        }
    }

    fn after_selection_change(&mut self) {
        let focused = self.focus.pane_id.as_deref();
        if focused.is_some() && focused != self.selected_pane().map(|pane| pane.id.as_str()) {
            self.focus = TerminalFocus::default();
        }
        self.refresh_pane_views();
    }
}

fn step(current: usize, delta: isize, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let last = (len - 1) as isize;
    Some((current as isize + delta).clamp(0, last) as usize)
}
