mod help;
mod state;

use crate::orchestrator::{self, UiCommand, WatchEvent, WatchOptions, WatchTarget};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph, Tabs, Wrap},
    Terminal,
};
use state::{phase_status_color, run_status_color, UiState};
use std::path::PathBuf;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(
    target: WatchTarget,
    nudge_pending: bool,
    export_json: Option<PathBuf>,
) -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<WatchEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let run_id = target.run_id.clone();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_run_id = run_id.clone();
    let has_feed = !nudge_pending;
    let ui_handle =
        std::thread::spawn(move || run_threaded(ui_run_id, has_feed, event_rx, cmd_tx));

    // The interactive view stays up after the run finishes; the user quits.
    let opts = WatchOptions {
        exit_on_terminal: false,
        fail_on_initial_fetch: false,
        nudge_pending,
    };
    let res = orchestrator::run_controller(target, opts, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    // Terminal is restored by now.
    let last = res?;
    for msg in orchestrator::process_watch_completion(export_json.as_deref(), last.as_ref()) {
        eprintln!("{msg}");
    }
    match last {
        Some(snapshot) => {
            println!("{}", crate::text_summary::run_status_line(&snapshot));
            Ok(())
        }
        None => Err(anyhow::anyhow!("run {run_id} was never loaded")),
    }
}

/// Run the TUI loop on a dedicated thread.
pub fn run_threaded(
    run_id: String,
    has_feed: bool,
    mut event_rx: UnboundedReceiver<WatchEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState::new(run_id, has_feed);

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive; unbounded channel avoids backpressure.
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(ev);
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
                    (_, KeyCode::Char('c')) => {
                        if state.can_cancel() {
                            // Disabled locally right away; the controller confirms with CancelPending.
                            state.cancel_outstanding = true;
                            state.info = "Cancelling…".into();
                            let _ = cmd_tx.send(UiCommand::Cancel);
                        } else if state.cancel_outstanding {
                            state.info = "Cancel already requested".into();
                        } else if let Some(status) = state.status() {
                            state.info = format!(
                                "Run is {} and cannot be cancelled",
                                status.label().to_lowercase()
                            );
                        }
                    }
                    (_, KeyCode::Char('r')) => {
                        state.info = "Refreshing…".into();
                        let _ = cmd_tx.send(UiCommand::Refresh);
                    }
                    (_, KeyCode::Tab) => {
                        state.tab = (state.tab + 1) % 2;
                    }
                    (_, KeyCode::Char('?')) => {
                        state.tab = 1;
                    }
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

    let tabs = Tabs::new(vec![Line::from("Run"), Line::from("Help")])
        .select(state.tab)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("phase-orchestrator"),
        )
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_run(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }
}

fn draw_run(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let error_message = state
        .snapshot
        .as_ref()
        .and_then(|s| s.run.error_message.as_deref());

    let error_height = if error_message.is_some() { 4 } else { 0 };
    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3), // Plan + status
                Constraint::Length(3), // Progress gauge
                Constraint::Min(3),    // Phases
                Constraint::Length(error_height),
                Constraint::Length(4), // Status row
            ]
            .as_ref(),
        )
        .split(area);

    draw_header(main[0], f, state);

    let progress = state.snapshot.as_ref().map(|s| s.progress());
    let (ratio, label) = match progress {
        Some(p) => (
            f64::from(p.percent) / 100.0,
            format!("{} - {}%", p.phase_label(), p.percent),
        ),
        None => (0.0, "Waiting for run…".into()),
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio.clamp(0.0, 1.0))
        .label(label);
    f.render_widget(gauge, main[1]);

    draw_phases(main[2], f, state);

    if let Some(msg) = error_message {
        let p = Paragraph::new(msg.to_string())
            .style(Style::default().fg(Color::Red))
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Error"));
        f.render_widget(p, main[3]);
    }

    draw_status(main[4], f, state);
}

fn draw_header(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut spans = Vec::new();
    match state.snapshot.as_ref() {
        Some(s) => {
            let status = s.status();
            spans.push(Span::styled(
                format!(" {} ", status.label()),
                Style::default()
                    .fg(Color::Black)
                    .bg(run_status_color(status))
                    .add_modifier(Modifier::BOLD),
            ));
            spans.push(Span::raw("  "));
            spans.push(Span::raw(
                s.plan_name().unwrap_or(s.run.plan_id.as_str()).to_string(),
            ));
            let now = time::OffsetDateTime::now_utc();
            if let Some(d) = crate::metrics::elapsed(
                s.run.started_at.as_deref(),
                s.run.completed_at.as_deref(),
                now,
            ) {
                spans.push(Span::styled(
                    format!("  ({})", crate::metrics::format_elapsed(d)),
                    Style::default().fg(Color::Gray),
                ));
            }
        }
        None => spans.push(Span::styled("Loading…", Style::default().fg(Color::Gray))),
    }
    let p = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("Run {}", state.run_id)),
    );
    f.render_widget(p, area);
}

fn draw_phases(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let now = time::OffsetDateTime::now_utc();
    let current = state.snapshot.as_ref().map(|s| s.run.current_phase);
    let items: Vec<ListItem> = state
        .snapshot
        .as_ref()
        .map(|s| s.phase_executions.as_slice())
        .unwrap_or_default()
        .iter()
        .map(|p| {
            let took = crate::metrics::elapsed(
                p.started_at.as_deref(),
                p.completed_at.as_deref(),
                now,
            )
            .map(crate::metrics::format_elapsed)
            .unwrap_or_default();
            let marker = if Some(p.phase_number) == current { "▶" } else { " " };
            ListItem::new(Line::from(vec![
                Span::raw(format!("{marker} {:>2}. ", p.phase_number)),
                Span::raw(format!("{:<32}", p.phase_name)),
                Span::styled(
                    format!("{:<10}", p.status.label()),
                    Style::default().fg(phase_status_color(p.status)),
                ),
                Span::styled(took, Style::default().fg(Color::Gray)),
            ]))
        })
        .collect();

    let title = if items.is_empty() {
        "Phases (none yet)"
    } else {
        "Phases"
    };
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(list, area);
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut lines = vec![Line::from(state.info.clone())];
    if let Some(err) = state.fetch_error.as_deref() {
        lines.push(Line::from(Span::styled(
            format!("Refresh failed: {err}"),
            Style::default().fg(Color::Red),
        )));
    }

    let mut hints = vec![
        Span::styled("q", Style::default().fg(Color::Magenta)),
        Span::raw(" quit  "),
        Span::styled("r", Style::default().fg(Color::Magenta)),
        Span::raw(" refresh  "),
    ];
    if state.can_cancel() {
        hints.push(Span::styled("c", Style::default().fg(Color::Magenta)));
        hints.push(Span::raw(" cancel  "));
    }
    hints.push(Span::styled("?", Style::default().fg(Color::Magenta)));
    hints.push(Span::raw(" help"));
    let sync = match (state.feed_connected, state.polling) {
        (true, true) => "feed + polling",
        (true, false) => "feed",
        (false, true) => "polling",
        (false, false) => "idle",
    };
    hints.push(Span::styled(
        format!("   [{sync}]"),
        Style::default().fg(Color::Gray),
    ));
    lines.push(Line::from(hints));

    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(p, area);
}
