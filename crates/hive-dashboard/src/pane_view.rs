//! Rendered pane views: which views the screen needs, how they are fetched
//! from the daemon, and where the results are kept.

use crate::daemon::{DaemonClient, DaemonError};
use hive_core::{ColorProfile, PaneViewKey, PaneViewRequest, PaneViewResponse, ViewMode};
use ratatui::layout::Rect;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// A pane that will be drawn this frame and the cells its content occupies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneHit {
    pub pane_id: String,
    pub content: Rect,
}

/// Pane currently receiving keyboard input, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminalFocus {
    pub pane_id: Option<String>,
}

impl TerminalFocus {
    pub fn is_focused(&self, pane_id: &str) -> bool {
        self.pane_id.as_deref() == Some(pane_id)
    }
}

/// Turns visible pane hits into render requests. Only the focused pane is
/// requested interactively with a cursor; duplicates collapse to one request.
pub fn plan(hits: &[PaneHit], focus: &TerminalFocus, color_profile: ColorProfile) -> Vec<PaneViewKey> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for hit in hits {
        if hit.pane_id.is_empty() || hit.content.width == 0 || hit.content.height == 0 {
            continue;
        }
        let focused = focus.is_focused(&hit.pane_id);
        let key = PaneViewKey {
            pane_id: hit.pane_id.clone(),
            cols: hit.content.width,
            rows: hit.content.height,
            mode: if focused {
                ViewMode::Interactive
            } else {
                ViewMode::Ansi
            },
            show_cursor: focused,
            color_profile,
        };
        if seen.insert(key.clone()) {
            keys.push(key);
        }
    }
    keys
}

#[derive(Debug)]
struct CachedView {
    stored: u64,
    response: PaneViewResponse,
}

#[derive(Debug, Default)]
pub struct PaneViewCache {
    views: HashMap<PaneViewKey, CachedView>,
    next_stored: u64,
}

impl PaneViewCache {
    pub fn get(&self, key: &PaneViewKey) -> Option<&PaneViewResponse> {
        self.views.get(key).map(|cached| &cached.response)
    }

    pub fn insert(&mut self, key: PaneViewKey, response: PaneViewResponse) {
        if let Some(existing) = self.views.get(&key) {
            if existing.response.update_seq > response.update_seq {
                return;
            }
        }
        self.next_stored += 1;
        self.views.insert(
            key,
            CachedView {
                stored: self.next_stored,
                response,
            },
        );
    }

    /// Newest view of the pane under any render parameters. Equal update
    /// sequences go to the most recently stored view.
    pub fn latest_for_pane(&self, pane_id: &str) -> Option<&PaneViewResponse> {
        self.newest_entry(pane_id).map(|(_, cached)| &cached.response)
    }

    fn newest_entry(&self, pane_id: &str) -> Option<(&PaneViewKey, &CachedView)> {
        self.views
            .iter()
            .filter(|(key, _)| key.pane_id == pane_id)
            .max_by_key(|(_, cached)| (cached.response.update_seq, cached.stored))
    }

    pub fn retain_panes(&mut self, live: &HashSet<String>) {
        self.views.retain(|key, _| live.contains(&key.pane_id));
    }

    /// Keeps the views the plan asks for plus the newest view of each pane.
    pub fn retain_planned(&mut self, plan: &[PaneViewKey]) {
        let pane_ids: HashSet<String> = self.views.keys().map(|key| key.pane_id.clone()).collect();
        let mut keep: HashSet<PaneViewKey> = plan.iter().cloned().collect();
        for pane_id in &pane_ids {
            if let Some((key, _)) = self.newest_entry(pane_id) {
                keep.insert(key.clone());
            }
        }
        self.views.retain(|key, _| keep.contains(key));
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replay {
    Full,
    Panes(BTreeSet<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FetchState {
    #[default]
    Idle,
    Running,
    RunningWithReplay(Replay),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave {
    pub id: u64,
    pub requests: Vec<PaneViewRequest>,
}

#[derive(Debug)]
pub struct WaveOutcome {
    pub wave_id: u64,
    pub requested: usize,
    pub results: Vec<(PaneViewKey, Result<PaneViewResponse, DaemonError>)>,
}

#[derive(Debug, Default)]
pub struct WaveReport {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// First failure, set only when nothing succeeded and the daemon was
    /// reachable.
    pub error: Option<DaemonError>,
}

#[derive(Debug)]
pub struct WaveCompletion {
    pub report: WaveReport,
    pub next: Option<Wave>,
}

/// Owns the pane-view cache and decides when fetch waves start. Waves
/// themselves run elsewhere via [`run_wave`]; results come back through
/// [`PaneViewFetcher::finish_wave`].
#[derive(Debug)]
pub struct PaneViewFetcher {
    state: FetchState,
    cache: PaneViewCache,
    allow_motion: HashMap<String, bool>,
    last_request: HashMap<String, Instant>,
    min_interval: Duration,
    request_timeout: Duration,
    next_wave_id: u64,
}

impl PaneViewFetcher {
    pub fn new(min_interval: Duration, request_timeout: Duration) -> Self {
        Self {
            state: FetchState::Idle,
            cache: PaneViewCache::default(),
            allow_motion: HashMap::new(),
            last_request: HashMap::new(),
            min_interval,
            request_timeout,
            next_wave_id: 0,
        }
    }

    pub fn state(&self) -> &FetchState {
        &self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state != FetchState::Idle
    }

    pub fn cache(&self) -> &PaneViewCache {
        &self.cache
    }

    pub fn allow_motion(&self, pane_id: &str) -> bool {
        self.allow_motion.get(pane_id).copied().unwrap_or(false)
    }

    /// Drops cached views and bookkeeping for panes that no longer exist.
    pub fn retain_panes(&mut self, live: &HashSet<String>) {
        self.cache.retain_panes(live);
        self.allow_motion.retain(|pane_id, _| live.contains(pane_id));
        self.last_request.retain(|pane_id, _| live.contains(pane_id));
    }

    /// Starts a wave for the whole plan, or queues a full replay if a wave is
    /// already running.
    pub fn refresh(&mut self, plan: &[PaneViewKey], now: Instant) -> Option<Wave> {
        if self.is_busy() {
            self.state = FetchState::RunningWithReplay(Replay::Full);
            return None;
        }
        self.start_wave(plan.to_vec(), now)
    }

    /// Fetches the views of a single pane, queueing it while busy. Outside a
    /// wave, requests for the same pane closer than the minimum interval are
    /// skipped.
    pub fn refresh_for(&mut self, pane_id: &str, plan: &[PaneViewKey], now: Instant) -> Option<Wave> {
        match std::mem::take(&mut self.state) {
            FetchState::Idle => {}
            FetchState::Running => {
                let panes = BTreeSet::from([pane_id.to_string()]);
                self.state = FetchState::RunningWithReplay(Replay::Panes(panes));
                return None;
            }
            FetchState::RunningWithReplay(Replay::Full) => {
                self.state = FetchState::RunningWithReplay(Replay::Full);
                return None;
            }
            FetchState::RunningWithReplay(Replay::Panes(mut panes)) => {
                panes.insert(pane_id.to_string());
                self.state = FetchState::RunningWithReplay(Replay::Panes(panes));
                return None;
            }
        }

        if let Some(last) = self.last_request.get(pane_id) {
            if now.saturating_duration_since(*last) < self.min_interval {
                debug!(event = "pane_view_rate_limited", pane_id = %pane_id);
                return None;
            }
        }
        let keys = plan
            .iter()
            .filter(|key| key.pane_id == pane_id)
            .cloned()
            .collect();
        self.start_wave(keys, now)
    }

    /// Merges a finished wave into the cache and starts the queued replay, if
    /// any. Replays are not rate limited.
    pub fn finish_wave(&mut self, outcome: WaveOutcome, plan: &[PaneViewKey], now: Instant) -> WaveCompletion {
        let received = outcome.results.len();
        let mut report = WaveReport {
            requested: outcome.requested.max(received),
            ..WaveReport::default()
        };
        let mut first_error = None;
        let mut all_unavailable = true;
        for (key, result) in outcome.results {
            match result {
                Ok(response) => {
                    report.succeeded += 1;
                    self.allow_motion
                        .insert(key.pane_id.clone(), response.allow_motion);
                    self.cache.insert(key, response);
                }
                Err(err) => {
                    report.failed += 1;
                    debug!(
                        event = "pane_view_fetch_failed",
                        pane_id = %key.pane_id,
                        error = %err
                    );
                    all_unavailable &= err.is_unavailable();
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        let missing = report.requested - received;
        if missing > 0 {
            report.failed += missing;
            all_unavailable = false;
        }
        if report.succeeded == 0 && !all_unavailable {
            report.error = first_error.or_else(|| {
                Some(DaemonError::Worker(format!("{missing} requests produced no result")))
            });
        }
        self.cache.retain_planned(plan);
        info!(
            event = "pane_view_wave_finished",
            wave_id = outcome.wave_id,
            requested = report.requested,
            succeeded = report.succeeded,
            failed = report.failed
        );

        let replay = std::mem::take(&mut self.state);
        let keys: Vec<PaneViewKey> = match replay {
            FetchState::RunningWithReplay(Replay::Full) => plan.to_vec(),
            FetchState::RunningWithReplay(Replay::Panes(panes)) => plan
                .iter()
                .filter(|key| panes.contains(&key.pane_id))
                .cloned()
                .collect(),
            FetchState::Idle | FetchState::Running => Vec::new(),
        };
        let next = self.start_wave(keys, now);
        WaveCompletion { report, next }
    }

    fn start_wave(&mut self, keys: Vec<PaneViewKey>, now: Instant) -> Option<Wave> {
        if keys.is_empty() {
            return None;
        }
        self.next_wave_id += 1;
        let timeout_ms = u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX);
        for key in &keys {
            self.last_request.insert(key.pane_id.clone(), now);
        }
        self.state = FetchState::Running;
        let requests = keys
            .into_iter()
            .map(|key| PaneViewRequest { key, timeout_ms })
            .collect();
        Some(Wave {
            id: self.next_wave_id,
            requests,
        })
    }
}

/// Runs one wave on at most `workers` blocking workers. Every request is
/// attempted; the wave completes once all workers have drained the queue.
/// Requests lost to a failed worker come back as [`DaemonError::Worker`].
pub async fn run_wave(client: Arc<dyn DaemonClient>, wave: Wave, workers: usize) -> WaveOutcome {
    let total = wave.requests.len();
    let worker_count = workers.max(1).min(total);
    let keys: Vec<PaneViewKey> = wave.requests.iter().map(|request| request.key.clone()).collect();
    let queue = Arc::new(Mutex::new(VecDeque::from(wave.requests)));
    let finished = Arc::new(Mutex::new(Vec::with_capacity(total)));
    let mut join_set = JoinSet::new();
    for _ in 0..worker_count {
        let queue = Arc::clone(&queue);
        let finished = Arc::clone(&finished);
        let client = Arc::clone(&client);
        join_set.spawn_blocking(move || loop {
            let next = match queue.lock() {
                Ok(mut pending) => pending.pop_front(),
                Err(poisoned) => poisoned.into_inner().pop_front(),
            };
            let Some(request) = next else {
                break;
            };
            let result = client.get_pane_view(&request);
            match finished.lock() {
                Ok(mut done) => done.push((request.key, result)),
                Err(poisoned) => poisoned.into_inner().push((request.key, result)),
            }
        });
    }

    let mut worker_error = None;
    while let Some(joined) = join_set.join_next().await {
        if let Err(err) = joined {
            warn!(event = "pane_view_worker_failed", wave_id = wave.id, error = %err);
            worker_error.get_or_insert_with(|| err.to_string());
        }
    }

    let mut results = match Arc::try_unwrap(finished) {
        Ok(done) => done.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()),
        Err(shared) => match shared.lock() {
            Ok(mut done) => std::mem::take(&mut *done),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        },
    };
    if results.len() < total {
        let answered: HashSet<PaneViewKey> = results.iter().map(|(key, _)| key.clone()).collect();
        let reason = worker_error.unwrap_or_else(|| "worker exited early".to_string());
        for key in keys {
            if !answered.contains(&key) {
                results.push((key, Err(DaemonError::Worker(reason.clone()))));
            }
        }
    }
    WaveOutcome {
        wave_id: wave.id,
        requested: total,
        results,
    }
}
