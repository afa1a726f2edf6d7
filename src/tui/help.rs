use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key_line(key: &'static str, pad: usize, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(what),
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
            Span::raw("  Quit"),
        ]),
        key_line("c", 11, "Cancel the run (pending or running only)"),
        key_line("r", 11, "Refresh now"),
        key_line("tab", 9, "Switch between run and help"),
        key_line("?", 11, "Show this help"),
        Line::from(""),
        Line::from("Updates:"),
        Line::from("  Changes arrive as they happen; while a run is executing it is"),
        Line::from("  also re-fetched on the poll interval (--poll-interval)."),
        Line::from("  Cancel takes effect once the orchestrator reports the new status."),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
