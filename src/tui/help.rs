use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key_line(key: &str, pad: usize, what: &str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key.to_string(), Style::default().fg(Color::Magenta)),
        Span::raw(format!("{:pad$}{what}", "")),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit (stops a running grab first)"),
        ]),
        key_line("s", 11, "Start grabbing"),
        key_line("x", 11, "Stop grabbing"),
        key_line("tab", 9, "Switch tabs"),
        key_line("?", 11, "Show this help"),
        Line::from(""),
        Line::from("Log pane:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("↑/↓", Style::default().fg(Color::Magenta)),
            Span::raw(" or "),
            Span::styled("k/j", Style::default().fg(Color::Magenta)),
            Span::raw("  Scroll"),
        ]),
        key_line("PgUp/PgDn", 3, "Scroll a page"),
        key_line("G / End", 5, "Follow the newest line"),
        Line::from(""),
        Line::from("Diagnostics:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled(
                crate::logging::log_file_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(no cache dir)".into()),
                Style::default().fg(Color::Cyan),
            ),
        ]),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
