use chrono::Utc;
use hive_core::config::{DashboardSettings, ProjectConfig};
use hive_core::paths::project_key;
use hive_core::{
    ColorProfile, PaneSnapshot, PaneStatus, PaneViewRequest, PaneViewResponse, SessionSnapshot,
    SessionStatus, StateSnapshot, ViewMode,
};
use hive_dashboard::agent_state::NoAgentStates;
use hive_dashboard::daemon::{DaemonClient, DaemonError};
use hive_dashboard::groups::{build_groups, DashboardData};
use hive_dashboard::pane_view::{plan, run_wave, PaneHit, PaneViewFetcher, TerminalFocus};
use hive_dashboard::refresh::RefreshSequencer;
use hive_dashboard::selection::{resolve_pane_selection, resolve_selection, SelectionState, Tab};
use ratatui::layout::Rect;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct FakeDaemon {
    sessions: Vec<SessionSnapshot>,
    failing: HashSet<String>,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    requested: Mutex<Vec<PaneViewRequest>>,
}

impl FakeDaemon {
    fn new(sessions: Vec<SessionSnapshot>) -> Self {
        Self {
            sessions,
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
        }
    }
}

impl DaemonClient for FakeDaemon {
    fn snapshot_state(&self, _since_seq: u64) -> Result<StateSnapshot, DaemonError> {
        Ok(StateSnapshot {
            seq: 1,
            sessions: self.sessions.clone(),
        })
    }

    fn get_pane_view(&self, request: &PaneViewRequest) -> Result<PaneViewResponse, DaemonError> {
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested
            .lock()
            .expect("requested")
            .push(request.clone());
        std::thread::sleep(Duration::from_millis(15));
        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.failing.contains(&request.key.pane_id) {
            return Err(DaemonError::Remote {
                code: "render_failed".to_string(),
                message: request.key.pane_id.clone(),
            });
        }
        Ok(PaneViewResponse {
            key: request.key.clone(),
            view: format!("{} @ {}x{}", request.key.pane_id, request.key.cols, request.key.rows),
            allow_motion: request.key.mode == ViewMode::Interactive,
            update_seq: 1,
        })
    }

    fn focus_pane(&self, _pane_id: &str) -> Result<(), DaemonError> {
        Ok(())
    }

    fn focus_session(&self, _name: &str) -> Result<(), DaemonError> {
        Ok(())
    }
}

fn alpha_config() -> Vec<ProjectConfig> {
    vec![ProjectConfig {
        name: "Alpha".to_string(),
        session: "alpha-1".to_string(),
        path: "/alpha".to_string(),
        layout: String::new(),
    }]
}

fn alpha_snapshot() -> SessionSnapshot {
    SessionSnapshot {
        name: "alpha-1".to_string(),
        path: "/alpha".to_string(),
        layout: String::new(),
        panes: vec![PaneSnapshot {
            id: "p-1".to_string(),
            index: "1".to_string(),
            active: true,
            width: 10,
            height: 5,
            ..PaneSnapshot::default()
        }],
    }
}

fn many_panes(count: usize) -> SessionSnapshot {
    SessionSnapshot {
        name: "wide".to_string(),
        path: "/wide".to_string(),
        layout: String::new(),
        panes: (0..count)
            .map(|index| PaneSnapshot {
                id: format!("w-{index}"),
                index: index.to_string(),
                width: 20,
                height: 6,
                ..PaneSnapshot::default()
            })
            .collect(),
    }
}

fn build(projects: &[ProjectConfig], sessions: &[SessionSnapshot]) -> DashboardData {
    build_groups(
        projects,
        sessions,
        &DashboardSettings::default(),
        &NoAgentStates,
        Utc::now(),
    )
}

#[test]
fn configured_project_with_live_session_resolves_end_to_end() {
    let data = build(&alpha_config(), &[alpha_snapshot()]);
    assert_eq!(data.projects.len(), 1);
    let alpha = &data.projects[0];
    assert_eq!(alpha.name, "Alpha");
    assert_eq!(alpha.sessions.len(), 1);
    let session = &alpha.sessions[0];
    assert_eq!(session.status, SessionStatus::Running);
    assert_eq!(session.pane_count, 1);
    assert_eq!(session.active_pane, "1");
    assert_eq!(session.panes[0].status, PaneStatus::Running);

    let resolved = resolve_selection(&data.projects, &SelectionState::default(), Tab::Projects);
    assert_eq!(
        resolved,
        SelectionState::new(&project_key("/alpha", "Alpha"), "alpha-1", "")
    );
    assert_eq!(resolve_pane_selection(session, &resolved.pane), "1");
}

#[test]
fn sequencer_only_applies_current_results() {
    let mut sequencer = RefreshSequencer::new();
    let mut visible = build(&alpha_config(), &[]);
    let mut results = Vec::new();
    for _ in 0..5 {
        results.push((sequencer.begin(), build(&alpha_config(), &[alpha_snapshot()])));
    }

    let (late_seq, late_data) = results.remove(3);
    let (last_seq, last_data) = results.pop().expect("last result");
    assert_eq!(last_seq, 5);
    if sequencer.complete(last_seq) {
        visible = last_data;
    }
    assert_eq!(sequencer.last_applied(), 5);

    let before = visible.clone();
    assert_eq!(late_seq, 4);
    if sequencer.complete(late_seq) {
        visible = late_data;
    }
    assert_eq!(visible, before);
    assert!(sequencer.should_apply(5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn waves_are_bounded_and_tolerate_partial_failure() {
    let mut daemon = FakeDaemon::new(vec![many_panes(10)]);
    daemon.failing.insert("w-4".to_string());
    let daemon = Arc::new(daemon);

    let data = build(&[], &daemon.snapshot_state(0).expect("snapshot").sessions);
    let hits: Vec<PaneHit> = data.projects[0].sessions[0]
        .panes
        .iter()
        .map(|pane| PaneHit {
            pane_id: pane.id.clone(),
            content: Rect::new(0, 0, pane.width, pane.height),
        })
        .collect();
    let keys = plan(&hits, &TerminalFocus::default(), ColorProfile::Ansi256);
    assert_eq!(keys.len(), 10);

    let mut fetcher = PaneViewFetcher::new(Duration::from_millis(50), Duration::from_secs(2));
    let wave = fetcher.refresh(&keys, Instant::now()).expect("wave");
    let client: Arc<dyn DaemonClient> = daemon.clone();
    let outcome = run_wave(client, wave, 4).await;

    assert_eq!(daemon.calls.load(Ordering::SeqCst), 10);
    let peak = daemon.peak.load(Ordering::SeqCst);
    assert!((1..=4).contains(&peak), "peak concurrency {peak}");
    assert!(daemon
        .requested
        .lock()
        .expect("requested")
        .iter()
        .all(|request| request.timeout_ms == 2000));

    let done = fetcher.finish_wave(outcome, &keys, Instant::now());
    assert_eq!(done.report.succeeded, 9);
    assert_eq!(done.report.failed, 1);
    assert!(done.report.error.is_none());
    assert!(done.next.is_none());
    for key in &keys {
        assert_eq!(fetcher.cache().get(key).is_some(), key.pane_id != "w-4");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn focus_change_is_a_cache_miss_until_refetched() {
    let daemon = Arc::new(FakeDaemon::new(vec![alpha_snapshot()]));
    let hits = vec![PaneHit {
        pane_id: "p-1".to_string(),
        content: Rect::new(1, 1, 10, 5),
    }];
    let unfocused = plan(&hits, &TerminalFocus::default(), ColorProfile::TrueColor);
    let mut fetcher = PaneViewFetcher::new(Duration::ZERO, Duration::from_secs(1));
    let wave = fetcher.refresh(&unfocused, Instant::now()).expect("wave");
    let outcome = run_wave(daemon.clone(), wave, 4).await;
    fetcher.finish_wave(outcome, &unfocused, Instant::now());
    assert!(fetcher.cache().get(&unfocused[0]).is_some());
    assert!(!fetcher.allow_motion("p-1"));

    let focus = TerminalFocus {
        pane_id: Some("p-1".to_string()),
    };
    let focused = plan(&hits, &focus, ColorProfile::TrueColor);
    assert!(fetcher.cache().get(&focused[0]).is_none());
    assert_eq!(
        fetcher
            .cache()
            .latest_for_pane("p-1")
            .map(|view| view.key.mode),
        Some(ViewMode::Ansi)
    );

    let wave = fetcher
        .refresh_for("p-1", &focused, Instant::now())
        .expect("focused wave");
    let outcome = run_wave(daemon.clone(), wave, 4).await;
    fetcher.finish_wave(outcome, &focused, Instant::now());
    assert!(fetcher.cache().get(&focused[0]).is_some());
    assert!(fetcher.allow_motion("p-1"));
}
