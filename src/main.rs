mod app;
mod config;
mod listing;

use std::{
    io::{self, stdout},
    thread,
};

use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, List, ListItem, Paragraph, Wrap},
};
use tokio::{
    runtime::Runtime,
    sync::mpsc::{UnboundedReceiver, unbounded_channel},
};
use tracing::{error, info};

use pathwright::scheduler::{TaskScheduler, WorkerEvent};

use crate::{
    app::{App, InputMode},
    config::{Config, init_logging, load_config},
    listing::{FsDispatcher, FsEvent},
};

type Tui = Terminal<CrosstermBackend<io::Stdout>>;

fn main() -> Result<()> {
    let config = load_config();
    init_logging(&config).context("failed to init logging")?;
    info!("pathwright starting");

    let mut terminal = init_terminal().context("failed to init terminal")?;
    let app_result = run_app(&mut terminal, config);
    cleanup_terminal(&mut terminal).context("failed to restore terminal")?;
    if let Err(err) = &app_result {
        error!("{err:#}");
    }
    app_result
}

fn init_terminal() -> Result<Tui> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen).context("switch to alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).context("spawn terminal backend")
}

fn cleanup_terminal(terminal: &mut Tui) -> Result<()> {
    disable_raw_mode().context("disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen).context("leave alternate screen")?;
    terminal.show_cursor().context("show cursor")
}

enum UiEvent {
    Terminal(io::Result<Event>),
    Fs(FsEvent),
    Worker(WorkerEvent<App>),
}

/// The one UI loop. Worker prompts do not get a loop of their own: they sit
/// on the app's dialog stack and are answered from here, so drawing and
/// scans keep going while a worker waits.
fn run_app(terminal: &mut Tui, config: Config) -> Result<()> {
    let runtime = Runtime::new().context("start async runtime")?;
    let (fs_dispatcher, mut fs_rx) = FsDispatcher::new(runtime.handle().clone());
    let (scheduler, mut worker_rx) =
        TaskScheduler::new(runtime.handle().clone(), config.redraw_interval);
    let mut input_rx = spawn_input_reader();
    let mut app = App::new(fs_dispatcher, scheduler, config).context("construct app")?;

    loop {
        terminal
            .draw(|frame| render(frame, &app))
            .context("draw frame")?;
        let next = runtime.block_on(async {
            tokio::select! {
                Some(event) = input_rx.recv() => Some(UiEvent::Terminal(event)),
                Some(event) = fs_rx.recv() => Some(UiEvent::Fs(event)),
                Some(event) = worker_rx.recv() => Some(UiEvent::Worker(event)),
                else => None,
            }
        });
        match next {
            Some(UiEvent::Terminal(event)) => {
                if handle_terminal_event(&mut app, event.context("read event")?) {
                    break;
                }
            }
            Some(UiEvent::Fs(event)) => app.handle_fs_event(event),
            Some(UiEvent::Worker(event)) => app.handle_worker_event(event),
            None => break,
        }
    }
    info!("pathwright exiting");
    Ok(())
}

// crossterm's reader blocks, so it gets a thread of its own.
fn spawn_input_reader() -> UnboundedReceiver<io::Result<Event>> {
    let (tx, rx) = unbounded_channel();
    thread::spawn(move || {
        loop {
            let event = event::read();
            let failed = event.is_err();
            if tx.send(event).is_err() || failed {
                break;
            }
        }
    });
    rx
}

fn handle_terminal_event(app: &mut App, event: Event) -> bool {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => handle_key_event(app, key),
        _ => false,
    }
}

fn handle_key_event(app: &mut App, key: KeyEvent) -> bool {
    if app.has_dialog() {
        handle_dialog_mode(app, key);
        return false;
    }
    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Search { .. } | InputMode::Command { .. } => {
            handle_line_mode(app, key);
            false
        }
    }
}

fn handle_dialog_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.dismiss_dialog(),
        KeyCode::Enter => app.submit_dialog(),
        KeyCode::Backspace => app.dialog_backspace(),
        KeyCode::Char(ch) if !ch.is_control() => app.dialog_input(ch),
        _ => {}
    }
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('q') => return app.request_quit(),
        KeyCode::Char('j') | KeyCode::Down => app.move_selection(1),
        KeyCode::Char('k') | KeyCode::Up => app.move_selection(-1),
        KeyCode::Char('g') | KeyCode::Home => app.jump_to_start(),
        KeyCode::Char('G') | KeyCode::End => app.jump_to_end(),
        KeyCode::Char('h') | KeyCode::Left => app.open_parent(),
        KeyCode::Char('l') | KeyCode::Right | KeyCode::Enter => app.enter_selection(),
        KeyCode::Char(' ') => app.toggle_mark(),
        KeyCode::Char('*') => app.invert_marks(),
        KeyCode::Char('c') => app.start_command("copy "),
        KeyCode::Char('m') => app.start_command("move "),
        KeyCode::Char('D') => app.run_command("delete"),
        KeyCode::Char('r') => app.refresh_async(false),
        KeyCode::Char('n') => app.search_next(),
        KeyCode::Char('N') => app.search_prev(),
        KeyCode::Char('/') => app.start_search(),
        KeyCode::Char(':') => app.start_command(""),
        _ => {}
    }
    false
}

// Search and command lines share their editing keys.
fn handle_line_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.cancel_overlay(),
        KeyCode::Enter => app.submit_overlay(),
        KeyCode::Backspace => {
            if let Some(buffer) = app.overlay_buffer_mut() {
                buffer.pop();
            }
            app.clear_overlay_feedback();
        }
        KeyCode::Char(ch) if !ch.is_control() => {
            if let Some(buffer) = app.overlay_buffer_mut() {
                buffer.push(ch);
            }
            app.clear_overlay_feedback();
        }
        _ => {}
    }
}

fn render(frame: &mut Frame, app: &App) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(app.progress_rows()),
            Constraint::Length(3),
        ])
        .split(frame.size());

    draw_header(frame, layout[0], app);
    draw_body(frame, layout[1], app);
    draw_progress(frame, layout[2], app);
    draw_footer(frame, layout[3], app);
    draw_overlay(frame, app);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let title = Span::styled(
        "Pathwright",
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    );
    let path = Span::styled(
        app.current_dir.display().to_string(),
        Style::default().fg(Color::Cyan),
    );
    let mut spans = vec![title, Span::raw(" - "), path];
    if app.is_busy() {
        spans.push(Span::styled("  [busy]", Style::default().fg(Color::LightRed)));
    }
    let widget = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Current Directory"),
    );
    frame.render_widget(widget, area);
}

fn draw_body(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(70), Constraint::Percentage(30)])
        .split(area);

    let list_items: Vec<ListItem> = app
        .entries
        .iter()
        .map(|entry| {
            let mark = if entry.marked { "*" } else { " " };
            let name_style = if entry.marked {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(vec![
                Span::styled(mark, Style::default().fg(Color::Yellow)),
                Span::styled(entry.kind_marker(), Style::default().fg(Color::LightBlue)),
                Span::raw(" "),
                Span::styled(entry.name.as_str(), name_style),
            ]))
        })
        .collect();

    let list = List::new(list_items)
        .block(Block::default().borders(Borders::ALL).title("Files"))
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::LightGreen)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    let mut list_state = app.list_state();
    frame.render_stateful_widget(list, chunks[0], &mut list_state);

    let detail = Paragraph::new(app.describe_selection())
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Details"));
    frame.render_widget(detail, chunks[1]);
}

fn draw_progress(frame: &mut Frame, area: Rect, app: &App) {
    if area.height == 0 {
        return;
    }
    let Some(snapshot) = app.progress_snapshot() else {
        return;
    };
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Length(1)])
        .split(area);

    let task = snapshot
        .task_line()
        .unwrap_or_else(|| format!("Progress {}/{}", snapshot.done_files, snapshot.total_files));
    frame.render_widget(
        Paragraph::new(task).style(Style::default().fg(Color::Gray)),
        rows[0],
    );
    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(Color::LightGreen).bg(Color::DarkGray))
        .ratio(snapshot.ratio())
        .label(snapshot.gauge_label());
    frame.render_widget(gauge, rows[1]);
}

fn draw_footer(frame: &mut Frame, area: Rect, app: &App) {
    let footer = Paragraph::new(app.footer_text())
        .style(Style::default().fg(Color::Gray))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(footer, area);
}

fn draw_overlay(frame: &mut Frame, app: &App) {
    if let Some((title, content)) = app.overlay_prompt() {
        let area = overlay_area(frame.size());
        frame.render_widget(Clear, area);
        let widget = Paragraph::new(content)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title(title));
        frame.render_widget(widget, area);
    }
}

fn overlay_area(area: Rect) -> Rect {
    let height = 4u16.min(area.height);
    Rect {
        x: area.x + 1,
        y: area.y + area.height.saturating_sub(height + 1),
        width: area.width.saturating_sub(2),
        height,
    }
}
