use anyhow::Context;
use clap::Parser;
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use hive_core::config::{default_config_path, Config, Settings};
use hive_dashboard::agent_state::{AgentStateSource, FileAgentStates, NoAgentStates};
use hive_dashboard::app::{App, AppEvent, EVENT_QUEUE_CAPACITY};
use hive_dashboard::daemon::{event_loop, DaemonClient, SocketClient};
use hive_dashboard::ui::render_ui;
use ratatui::{backend::CrosstermBackend, layout::Rect, Terminal};
use std::{io, path::PathBuf, sync::Arc};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hive-dashboard", about = "Live dashboard of hive projects, sessions and panes")]
struct Args {
    /// Configuration file (defaults to HIVE_CONFIG or ~/.config/hive/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write logs to this file instead of discarding them.
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let settings = Config::load(&config_path)
        .and_then(Config::resolve)
        .with_context(|| format!("invalid configuration in {}", config_path.display()))?;
    init_logging(&args)?;
    info!(event = "dashboard_start", config = %config_path.display(), socket = %settings.daemon.socket.display());

    run(Arc::new(settings)).await
}

async fn run(settings: Arc<Settings>) -> anyhow::Result<()> {
    let client_id = format!("hive-dashboard-{}", std::process::id());
    let client: Arc<dyn DaemonClient> = Arc::new(SocketClient::new(
        settings.daemon.socket.clone(),
        client_id.clone(),
        settings.daemon.pane_view_timeout,
    ));
    let agents: Arc<dyn AgentStateSource> = match settings.dashboard.agent_state_dir.clone() {
        Some(dir) => Arc::new(FileAgentStates::new(dir, settings.dashboard.agent_state_ttl)),
        None => Arc::new(NoAgentStates),
    };

    let (app_tx, mut app_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (daemon_tx, mut daemon_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    tokio::spawn(event_loop(settings.daemon.socket.clone(), client_id, daemon_tx));

    let mut app = App::new(Arc::clone(&settings), client, agents, app_tx);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut events = EventStream::new();
    let mut refresh_ticker = tokio::time::interval(settings.daemon.refresh_interval);

    let result: anyhow::Result<()> = async {
        loop {
            let size = terminal.size()?;
            app.set_viewport(Rect::new(0, 0, size.width, size.height));
            terminal.draw(|frame| render_ui(frame, &app))?;
            tokio::select! {
                _ = refresh_ticker.tick() => {
                    if !app.sequencer().in_flight() {
                        app.request_refresh();
                    }
                }
                Some(event) = app_rx.recv() => {
                    app.apply_event(event);
                }
                Some(event) = daemon_rx.recv() => {
                    app.apply_event(AppEvent::Daemon(event));
                }
                maybe_event = events.next() => {
                    match maybe_event {
                        Some(Ok(Event::Key(key))) => {
                            if handle_key(key, &mut app) {
                                break;
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return Err(err.into()),
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }
    .await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn handle_key(key: KeyEvent, app: &mut App) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }
    match key.code {
        KeyCode::Char('q') => true,
        KeyCode::Tab => {
            app.toggle_tab();
            false
        }
        KeyCode::Left | KeyCode::Char('h') => {
            app.move_horizontal(-1);
            false
        }
        KeyCode::Right | KeyCode::Char('l') => {
            app.move_horizontal(1);
            false
        }
        KeyCode::Up | KeyCode::Char('k') => {
            app.move_vertical(-1);
            false
        }
        KeyCode::Down | KeyCode::Char('j') => {
            app.move_vertical(1);
            false
        }
        KeyCode::Char('i') => {
            app.toggle_focus();
            false
        }
        KeyCode::Esc => {
            app.clear_focus();
            false
        }
        KeyCode::Enter => {
            app.activate_selection();
            false
        }
        KeyCode::Char('r') => {
            app.request_refresh();
            false
        }
        _ => false,
    }
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stdout_enabled = matches!(
        std::env::var("HIVE_LOG_STDOUT").ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
    );
    if let Some(path) = args.log_file.as_ref() {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open log file {}", path.display()))?;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .try_init();
    } else if stdout_enabled {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
    Ok(())
}
