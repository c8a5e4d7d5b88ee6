mod help;
mod state;

use crate::cli::Cli;
use crate::model::{GrabConfig, GrabEvent, GrabTarget};
use crate::orchestrator::{self, GrabController, UiCommand};
use crate::portal::PortalClient;
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use help::draw_help;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Sparkline, Tabs},
    Terminal,
};
use state::{push_wrapped_status_kv, state_color, UiState};
use std::sync::Arc;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

const PAGE: usize = 10;

pub async fn run(
    args: Cli,
    client: PortalClient,
    target: GrabTarget,
    config: GrabConfig,
) -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<GrabEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let interval = config.poll_interval()?;

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_target = target.clone();
    let ui_handle =
        std::thread::spawn(move || run_threaded(ui_target, interval, event_rx, cmd_tx));

    let mut controller = GrabController::new(Arc::new(client), event_tx.clone());
    let res = orchestrator::run_controller(
        &mut controller,
        target,
        config,
        args.start_on_launch,
        event_tx,
        cmd_rx,
    )
    .await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    target: GrabTarget,
    interval: Duration,
    mut event_rx: UnboundedReceiver<GrabEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let mut state = UiState::new(target, interval);

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        while let Ok(ev) = event_rx.try_recv() {
            state.apply(ev);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match (k.modifiers, k.code) {
                    (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    (_, KeyCode::Char('s')) => {
                        let _ = cmd_tx.send(UiCommand::Start);
                    }
                    (_, KeyCode::Char('x')) => {
                        let _ = cmd_tx.send(UiCommand::Stop);
                    }
                    (_, KeyCode::Tab) => {
                        state.tab = (state.tab + 1) % 2;
                    }
                    (_, KeyCode::Char('?')) => {
                        state.tab = 1;
                    }
                    (_, KeyCode::Up) | (_, KeyCode::Char('k')) => state.scroll_up(1),
                    (_, KeyCode::Down) | (_, KeyCode::Char('j')) => state.scroll_down(1),
                    (_, KeyCode::PageUp) => state.scroll_up(PAGE),
                    (_, KeyCode::PageDown) => state.scroll_down(PAGE),
                    (_, KeyCode::End) | (_, KeyCode::Char('G')) => state.log_scroll = 0,
                    _ => {}
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![Line::from("Dashboard"), Line::from("Help")])
        .select(state.tab)
        .block(Block::default().borders(Borders::ALL).title("course-grab"))
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_dashboard(chunks[1], f, state),
        _ => draw_help(chunks[1], f),
    }
}

fn draw_dashboard(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let content = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(10), Constraint::Min(3), Constraint::Length(3)].as_ref())
        .split(area);

    let top_row = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(content[0]);

    draw_status(top_row[0], f, state);
    draw_seats(top_row[1], f, state);
    draw_log(content[1], f, state);

    let footer = Paragraph::new(Line::from(vec![
        Span::styled("s", Style::default().fg(Color::Magenta)),
        Span::raw(" start  "),
        Span::styled("x", Style::default().fg(Color::Magenta)),
        Span::raw(" stop  "),
        Span::styled("q", Style::default().fg(Color::Magenta)),
        Span::raw(" quit  "),
        Span::styled("?", Style::default().fg(Color::Magenta)),
        Span::raw(" help   "),
        Span::styled(state.info.clone(), Style::default().fg(Color::Yellow)),
    ]))
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, content[2]);
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut lines: Vec<Line<'static>> = vec![Line::from(vec![
        Span::styled("State:", Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::styled(
            state.run_state.as_str(),
            Style::default().fg(state_color(state.run_state)),
        ),
    ])];
    push_wrapped_status_kv(&mut lines, "Course", state.target.label(), area.width);
    push_wrapped_status_kv(&mut lines, "Section", &state.target.section_id, area.width);
    push_wrapped_status_kv(&mut lines, "Execution", &state.target.execution_id, area.width);
    push_wrapped_status_kv(
        &mut lines,
        "Interval",
        &format!("{:.1}s", state.interval.as_secs_f64()),
        area.width,
    );
    if state.runs > 0 {
        push_wrapped_status_kv(&mut lines, "Runs", &state.runs.to_string(), area.width);
    }
    if let Some(outcome) = state.outcome.as_deref() {
        push_wrapped_status_kv(&mut lines, "Outcome", outcome, area.width);
    }
    if let Some(st) = state.last_stats {
        push_wrapped_status_kv(
            &mut lines,
            "Queries",
            &format!(
                "{} ({} failed), {} enroll attempt(s)",
                st.queries, st.failed_queries, st.enroll_attempts
            ),
            area.width,
        );
    }

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(p, area);
}

fn draw_seats(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let title = match state.seats {
        Some(s) => {
            let color = if s.has_open_seat() {
                Color::Green
            } else {
                Color::Red
            };
            Line::from(vec![
                Span::raw(format!("Seats ({} / {}, ", s.enrolled_count, s.capacity)),
                Span::styled(
                    format!("{} left", s.remaining().max(0)),
                    Style::default().fg(color),
                ),
                Span::raw(")"),
            ])
        }
        None => Line::from("Seats (waiting for first query)"),
    };
    f.render_widget(
        Sparkline::default()
            .block(Block::default().borders(Borders::ALL).title(title))
            .data(&state.remaining_series)
            .style(Style::default().fg(Color::Green)),
        area,
    );
}

fn draw_log(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let height = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = state
        .visible_logs(height)
        .iter()
        .map(|l| Line::from(l.to_line()))
        .collect();
    let title = if state.log_scroll > 0 {
        format!("Log ({} lines, scrolled {})", state.logs.len(), state.log_scroll)
    } else {
        format!("Log ({} lines)", state.logs.len())
    };
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}
