use crate::model::{GrabEvent, GrabTarget, LogEvent, RunState, RunStats, SeatStatus};
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};
use std::time::Duration;

pub struct UiState {
    pub tab: usize,
    pub run_state: RunState,
    pub target: GrabTarget,
    pub interval: Duration,
    pub info: String,

    pub seats: Option<SeatStatus>,
    // Remaining seats per poll, for the sparkline
    pub remaining_series: Vec<u64>,

    // Full log of the session; display windows over it, never trims it.
    pub logs: Vec<LogEvent>,
    pub log_scroll: usize, // lines scrolled up from the bottom

    pub runs: usize,
    pub last_stats: Option<RunStats>,
    pub outcome: Option<String>,
}

impl UiState {
    pub fn new(target: GrabTarget, interval: Duration) -> Self {
        Self {
            tab: 0,
            run_state: RunState::Idle,
            target,
            interval,
            info: String::new(),
            seats: None,
            remaining_series: Vec::new(),
            logs: Vec::new(),
            log_scroll: 0,
            runs: 0,
            last_stats: None,
            outcome: None,
        }
    }

    pub fn push_series(series: &mut Vec<u64>, v: u64) {
        const MAX: usize = 120;
        series.push(v);
        if series.len() > MAX {
            let _ = series.drain(0..(series.len() - MAX));
        }
    }

    pub fn apply(&mut self, ev: GrabEvent) {
        if ev.is_terminal() {
            // Show how the run ended.
            self.log_scroll = 0;
        }
        match ev {
            GrabEvent::Log(l) => {
                self.logs.push(l);
                // Keep the viewport pinned when scrolled up.
                if self.log_scroll > 0 {
                    self.log_scroll += 1;
                }
            }
            GrabEvent::Seats { status } => {
                self.seats = Some(status);
                UiState::push_series(&mut self.remaining_series, status.remaining().max(0) as u64);
            }
            GrabEvent::Succeeded { target, stats } => {
                self.last_stats = Some(stats);
                self.outcome = Some(format!("Enrolled in {}", target.label()));
                self.info = "Enrollment succeeded".into();
            }
            GrabEvent::Cancelled { stats } => {
                self.last_stats = Some(stats);
                self.outcome = Some("Stopped".into());
            }
            GrabEvent::Error { message } => {
                self.outcome = Some("Failed".into());
                self.info = message;
            }
            GrabEvent::StateChanged(s) => {
                if s == RunState::Running {
                    self.runs += 1;
                    self.seats = None;
                    self.remaining_series.clear();
                    self.outcome = None;
                }
                if s.is_terminal() {
                    self.info = format!("Run {}", s.as_str());
                }
                self.run_state = s;
            }
            GrabEvent::Info(msg) => self.info = msg,
        }
    }

    pub fn scroll_up(&mut self, n: usize) {
        self.log_scroll = (self.log_scroll + n).min(self.logs.len().saturating_sub(1));
    }

    pub fn scroll_down(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(n);
    }

    /// Log lines visible in a pane of `height` rows.
    pub fn visible_logs(&self, height: usize) -> &[LogEvent] {
        let end = self.logs.len().saturating_sub(self.log_scroll);
        let start = end.saturating_sub(height);
        &self.logs[start..end]
    }
}

pub fn state_color(s: RunState) -> Color {
    match s {
        RunState::Idle => Color::White,
        RunState::Running => Color::Green,
        RunState::Stopping => Color::Yellow,
        RunState::Succeeded => Color::Cyan,
        RunState::Failed => Color::Red,
        RunState::Cancelled => Color::Gray,
    }
}

pub fn push_wrapped_status_kv(
    out: &mut Vec<Line<'static>>,
    label: &str,
    value: &str,
    status_area_width: u16,
) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    // Account for borders (2 chars on each side)
    let usable_width = status_area_width.saturating_sub(4).max(1);
    let label_text = format!("{label}:");
    let label_width = label_text.chars().count() as u16;

    let value_chars: Vec<char> = value.chars().collect();
    let mut remaining = value_chars.as_slice();
    let mut first = true;

    while !remaining.is_empty() {
        let line_width = if first {
            usable_width.saturating_sub(label_width + 1).max(1)
        } else {
            usable_width.saturating_sub(2).max(1)
        };

        let chars_to_take = (remaining.len() as u16).min(line_width) as usize;
        let (line_chars, rest) = remaining.split_at(chars_to_take);
        let line_text: String = line_chars.iter().collect();

        if first {
            out.push(Line::from(vec![
                Span::styled(label_text.clone(), Style::default().fg(Color::Gray)),
                Span::raw(" "),
                Span::raw(line_text),
            ]));
            first = false;
        } else {
            out.push(Line::from(vec![Span::raw("  "), Span::raw(line_text)]));
        }

        remaining = rest;
    }
}
