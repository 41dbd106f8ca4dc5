use crate::app::App;
use crate::pane_view::{plan, PaneHit};
use crate::selection::{dashboard_columns, DashboardColumn, Tab};
use hive_core::ansi::strip_ansi;
use hive_core::{PaneItem, PaneStatus, ProjectGroup, SessionItem};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame,
};

const HEADER_HEIGHT: u16 = 4;
const FOOTER_HEIGHT: u16 = 1;
const MIN_COLUMN_WIDTH: u16 = 36;
const MIN_TILE_HEIGHT: u16 = 6;
const SIDEBAR_WIDTH: u16 = 34;

#[derive(Clone, Copy)]
struct Theme {
    bg: Color,
    text: Color,
    muted: Color,
    border: Color,
    selected: Color,
    focused: Color,
    title: Color,
}

fn theme() -> Theme {
    Theme {
        bg: Color::Reset,
        text: Color::White,
        muted: Color::DarkGray,
        border: Color::Gray,
        selected: Color::Cyan,
        focused: Color::Yellow,
        title: Color::LightBlue,
    }
}

fn status_color(status: PaneStatus) -> Color {
    match status {
        PaneStatus::Idle => Color::Gray,
        PaneStatus::Running => Color::Cyan,
        PaneStatus::Done => Color::Green,
        PaneStatus::Error => Color::Red,
        PaneStatus::Disconnected => Color::DarkGray,
    }
}

struct Screen {
    header: Rect,
    body: Rect,
    footer: Rect,
}

fn screen(area: Rect) -> Screen {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(HEADER_HEIGHT),
            Constraint::Min(0),
            Constraint::Length(FOOTER_HEIGHT),
        ])
        .split(area);
    Screen {
        header: rows[0],
        body: rows[1],
        footer: rows[2],
    }
}

fn bordered(area: Rect) -> Rect {
    Block::default().borders(Borders::ALL).inner(area)
}

/// First index of a `visible`-wide window over `len` items that keeps
/// `selected` in view.
fn window_start(selected: usize, visible: usize, len: usize) -> usize {
    if visible == 0 || selected < visible {
        return 0;
    }
    (selected + 1 - visible).min(len.saturating_sub(visible))
}

struct Tile<'a> {
    session: &'a SessionItem,
    pane: &'a PaneItem,
    area: Rect,
    content: Rect,
    selected: bool,
}

struct ColumnView<'a> {
    project: &'a ProjectGroup,
    area: Rect,
    tiles: Vec<Tile<'a>>,
    hidden_above: usize,
    hidden_below: usize,
    selected: bool,
}

fn dashboard_layout<'a>(body: Rect, app: &'a App) -> Vec<ColumnView<'a>> {
    let columns = dashboard_columns(&app.data.projects);
    if columns.is_empty() || body.width == 0 || body.height == 0 {
        return Vec::new();
    }
    let capacity = usize::from((body.width / MIN_COLUMN_WIDTH).max(1));
    let visible = capacity.min(columns.len());
    let selected = columns
        .iter()
        .position(|column| column.project.id == app.selection.project_id)
        .unwrap_or(0);
    let start = window_start(selected, visible, columns.len());
    let rects = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(vec![Constraint::Ratio(1, visible as u32); visible])
        .split(body);

    columns[start..start + visible]
        .iter()
        .zip(rects.iter())
        .enumerate()
        .map(|(offset, (column, rect))| {
            column_view(column, *rect, start + offset == selected, app)
        })
        .collect()
}

fn column_view<'a>(column: &DashboardColumn<'a>, area: Rect, selected: bool, app: &App) -> ColumnView<'a> {
    let inner = bordered(area);
    let capacity = usize::from((inner.height / MIN_TILE_HEIGHT).max(1));
    let shown = capacity.min(column.panes.len());
    let selected_pane = if selected {
        column.position_of(&app.selection)
    } else {
        None
    };
    let start = window_start(selected_pane.unwrap_or(0), shown, column.panes.len());
    if shown == 0 {
        return ColumnView {
            project: column.project,
            area,
            tiles: Vec::new(),
            hidden_above: 0,
            hidden_below: 0,
            selected,
        };
    }
    let rects = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Ratio(1, shown.max(1) as u32); shown])
        .split(inner);
    let tiles = column.panes[start..start + shown]
        .iter()
        .zip(rects.iter())
        .enumerate()
        .map(|(offset, (entry, rect))| Tile {
            session: entry.session,
            pane: entry.pane,
            area: *rect,
            content: bordered(*rect),
            selected: selected_pane == Some(start + offset),
        })
        .collect();
    ColumnView {
        project: column.project,
        area,
        tiles,
        hidden_above: start,
        hidden_below: column.panes.len() - start - shown,
        selected,
    }
}

fn projects_layout(body: Rect) -> (Rect, Rect) {
    let parts = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(SIDEBAR_WIDTH), Constraint::Min(0)])
        .split(body);
    (parts[0], parts[1])
}

fn project_tile<'a>(main: Rect, app: &'a App) -> Option<Tile<'a>> {
    let session = app.selected_session()?;
    if !session.is_running() {
        return None;
    }
    let pane = session.pane(&app.selection.pane)?;
    Some(Tile {
        session,
        pane,
        area: main,
        content: bordered(main),
        selected: true,
    })
}

/// Panes drawn on a screen of size `area`, with the cells each one's content
/// will occupy. Panes scrolled out of view produce no hit.
pub fn pane_hits(area: Rect, app: &App) -> Vec<PaneHit> {
    let body = screen(area).body;
    let hit = |tile: &Tile<'_>| PaneHit {
        pane_id: tile.pane.id.clone(),
        content: tile.content,
    };
    match app.tab {
        Tab::Dashboard => dashboard_layout(body, app)
            .iter()
            .flat_map(|column| column.tiles.iter().map(hit))
            .collect(),
        Tab::Projects => {
            let (_, main) = projects_layout(body);
            project_tile(main, app).iter().map(hit).collect()
        }
    }
}

pub fn render_ui(frame: &mut Frame, app: &App) {
    let theme = theme();
    let layout = screen(frame.size());
    frame.render_widget(render_header(app, theme), layout.header);
    match app.tab {
        Tab::Dashboard => render_dashboard(frame, app, theme, layout.body),
        Tab::Projects => render_projects(frame, app, theme, layout.body),
    }
    frame.render_widget(render_footer(app, theme), layout.footer);
}

fn render_header(app: &App, theme: Theme) -> Paragraph<'static> {
    let panes = app.data.pane_ids().len();
    let daemon = if app.connected { "connected" } else { "offline" };
    let status_line = Line::from(vec![
        Span::styled(
            format!("Tab: {}", app.tab.title()),
            Style::default().fg(theme.text),
        ),
        Span::styled("  |  ", Style::default().fg(theme.muted)),
        Span::styled(
            format!("Daemon: {daemon}"),
            Style::default().fg(if app.connected {
                Color::Green
            } else {
                Color::Red
            }),
        ),
        Span::styled("  |  ", Style::default().fg(theme.muted)),
        Span::styled(
            format!("Projects: {}  Panes: {panes}", app.data.projects.len()),
            Style::default().fg(theme.text),
        ),
    ]);
    let (note, color) = match (app.toast.as_deref(), app.status_note.as_deref()) {
        (Some(toast), _) => (toast.to_string(), Color::Red),
        (None, Some(note)) => (note.to_string(), theme.muted),
        (None, None) => ("ready".to_string(), theme.muted),
    };
    Paragraph::new(Text::from(vec![
        status_line,
        Line::from(Span::styled(note, Style::default().fg(color))),
    ]))
    .style(Style::default().fg(theme.text).bg(theme.bg))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.border))
            .title(Span::styled(
                "hive",
                Style::default()
                    .fg(theme.title)
                    .add_modifier(Modifier::BOLD),
            )),
    )
}

fn render_footer(app: &App, theme: Theme) -> Paragraph<'static> {
    let hints = match app.tab {
        Tab::Dashboard => "tab projects  ←→ column  ↑↓ pane  i focus  enter jump  r refresh  q quit",
        Tab::Projects => "tab dashboard  ↑↓ session  ←→ pane  i focus  enter attach  r refresh  q quit",
    };
    Paragraph::new(Line::from(Span::styled(
        hints,
        Style::default().fg(theme.muted),
    )))
}

fn render_dashboard(frame: &mut Frame, app: &App, theme: Theme, body: Rect) {
    let columns = dashboard_layout(body, app);
    if columns.is_empty() {
        let message = if app.data.is_empty() {
            "No projects configured and no live sessions"
        } else {
            "No running sessions"
        };
        frame.render_widget(
            Paragraph::new(Line::from(Span::styled(
                message,
                Style::default().fg(theme.muted),
            )))
            .block(Block::default().borders(Borders::ALL)),
            body,
        );
        return;
    }

    for column in &columns {
        let mut title = vec![Span::styled(
            column.project.name.clone(),
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        )];
        if column.hidden_above > 0 {
            title.push(Span::raw(format!(" ↑{}", column.hidden_above)));
        }
        if column.hidden_below > 0 {
            title.push(Span::raw(format!(" ↓{}", column.hidden_below)));
        }
        frame.render_widget(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(if column.selected {
                    theme.selected
                } else {
                    theme.border
                }))
                .title(Line::from(title)),
            column.area,
        );
        if column.tiles.is_empty() {
            frame.render_widget(
                Paragraph::new(Line::from(Span::styled(
                    "no panes",
                    Style::default().fg(theme.muted),
                ))),
                bordered(column.area),
            );
        }
        for tile in &column.tiles {
            render_tile(frame, app, theme, tile);
        }
    }
}

fn render_projects(frame: &mut Frame, app: &App, theme: Theme, body: Rect) {
    let (sidebar, main) = projects_layout(body);

    let mut items = Vec::new();
    let mut selected_row = None;
    for project in &app.data.projects {
        items.push(ListItem::new(Line::from(Span::styled(
            project.name.clone(),
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        ))));
        for session in &project.sessions {
            if project.id == app.selection.project_id && session.name == app.selection.session {
                selected_row = Some(items.len());
            }
            let (marker, detail) = if session.is_running() {
                ("●", format!("{} panes", session.pane_count))
            } else {
                ("○", "stopped".to_string())
            };
            let mut lines = vec![Line::from(vec![
                Span::raw(format!("  {marker} {}", session.name)),
                Span::styled(format!(" ({detail})"), Style::default().fg(theme.muted)),
            ])];
            if let Some(thumbnail) = session.thumbnail.as_deref() {
                lines.push(Line::from(Span::styled(
                    format!("    {}", strip_ansi(thumbnail)),
                    Style::default().fg(theme.muted),
                )));
            }
            items.push(ListItem::new(Text::from(lines)));
        }
    }
    let mut state = ListState::default();
    state.select(selected_row);
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme.border))
                .title("Projects"),
        )
        .highlight_style(
            Style::default()
                .fg(theme.selected)
                .add_modifier(Modifier::BOLD),
        );
    frame.render_stateful_widget(list, sidebar, &mut state);

    if let Some(tile) = project_tile(main, app) {
        render_tile(frame, app, theme, &tile);
        return;
    }
    let message = match app.selected_session() {
        Some(session) if !session.is_running() => {
            format!("{} is stopped (layout: {})", session.name, session.layout_name)
        }
        Some(session) => format!("{} has no panes", session.name),
        None => "Nothing selected".to_string(),
    };
    frame.render_widget(
        Paragraph::new(Line::from(Span::styled(
            message,
            Style::default().fg(theme.muted),
        )))
        .block(Block::default().borders(Borders::ALL)),
        main,
    );
}

fn render_tile(frame: &mut Frame, app: &App, theme: Theme, tile: &Tile<'_>) {
    let focused = app.focus.is_focused(&tile.pane.id);
    let border = if focused {
        theme.focused
    } else if tile.selected {
        theme.selected
    } else {
        theme.border
    };
    let label = if tile.pane.title.is_empty() {
        &tile.pane.command
    } else {
        &tile.pane.title
    };
    let title = Line::from(vec![
        Span::raw(format!("{}:{} ", tile.session.name, tile.pane.index)),
        Span::styled(
            tile.pane.status.as_str(),
            Style::default().fg(status_color(tile.pane.status)),
        ),
        Span::styled(format!(" {label}"), Style::default().fg(theme.muted)),
    ]);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .title(title);
    let content = pane_lines(app, tile);
    frame.render_widget(Paragraph::new(Text::from(content)).block(block), tile.area);
}

/// Cached view for the tile's exact size when present, else the newest view
/// of the pane, else the snapshot preview.
fn pane_lines(app: &App, tile: &Tile<'_>) -> Vec<Line<'static>> {
    let hit = PaneHit {
        pane_id: tile.pane.id.clone(),
        content: tile.content,
    };
    let view = plan(&[hit], &app.focus, app.settings().color_profile)
        .first()
        .and_then(|key| app.view_for(key))
        .map(|response| response.view.lines().map(str::to_string).collect::<Vec<_>>());
    let raw = view.unwrap_or_else(|| tile.pane.preview.clone());
    let rows = usize::from(tile.content.height);
    let skip = raw.len().saturating_sub(rows);
    raw[skip..]
        .iter()
        .map(|line| Line::from(strip_ansi(line)))
        .collect()
}
