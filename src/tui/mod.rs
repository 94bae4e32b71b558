mod clipboard;
mod help;
mod state;

use crate::cli::Cli;
use crate::engine::WinsatEngine;
use crate::model::{RunState, ViewerEvent};
use crate::orchestrator::{self, UiCommand};
use crate::text_summary::{fmt_assessed, fmt_score, fmt_state, score_rows};
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
    widgets::{Block, Borders, Paragraph, Tabs, Wrap},
    Terminal,
};
use state::{fmt_elapsed, UiState, TAB_COUNT, TAB_HELP, TAB_RAW, TAB_SCORES};
use std::sync::Arc;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Highest score WinSAT hands out; bars are scaled against it.
const MAX_SCORE: f64 = 9.9;
const BAR_WIDTH: usize = 30;
const RAW_PAGE: u16 = 10;

pub async fn run(args: Cli) -> Result<()> {
    let cfg = crate::cli::build_config(&args);
    let engine = Arc::new(WinsatEngine::new(&cfg));

    let (event_tx, event_rx) = mpsc::unbounded_channel::<ViewerEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_handle = std::thread::spawn(move || run_threaded(event_rx, cmd_tx));

    let res =
        orchestrator::run_controller(engine, cfg.refresh_on_launch, event_tx, cmd_rx).await;

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
    mut event_rx: UnboundedReceiver<ViewerEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let mut state = UiState::default();

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep the UI responsive.
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
                    (_, KeyCode::Char('r')) => {
                        let _ = cmd_tx.send(UiCommand::Refresh);
                    }
                    (_, KeyCode::Char('a')) => {
                        state.info = "Starting winsat formal…".into();
                        let _ = cmd_tx.send(UiCommand::RunAssessment);
                    }
                    (_, KeyCode::Char('l')) => {
                        state.info = "Locating PowerShell…".into();
                        let _ = cmd_tx.send(UiCommand::ReResolve);
                    }
                    (_, KeyCode::Char('y')) => copy_raw_json(&mut state),
                    (_, KeyCode::Tab) => {
                        state.tab = (state.tab + 1) % TAB_COUNT;
                    }
                    (_, KeyCode::Char('?')) => {
                        state.tab = TAB_HELP;
                    }
                    (_, KeyCode::Up) | (_, KeyCode::Char('k')) if state.tab == TAB_RAW => {
                        state.raw_scroll = state.raw_scroll.saturating_sub(1);
                    }
                    (_, KeyCode::Down) | (_, KeyCode::Char('j')) if state.tab == TAB_RAW => {
                        state.raw_scroll = state.raw_scroll.saturating_add(1);
                    }
                    (_, KeyCode::PageUp) if state.tab == TAB_RAW => {
                        state.raw_scroll = state.raw_scroll.saturating_sub(RAW_PAGE);
                    }
                    (_, KeyCode::PageDown) if state.tab == TAB_RAW => {
                        state.raw_scroll = state.raw_scroll.saturating_add(RAW_PAGE);
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

fn copy_raw_json(state: &mut UiState) {
    let Some(raw) = state.raw_json().map(str::to_string) else {
        state.info = "No scores yet. Press 'r' to query first".into();
        return;
    };
    match clipboard::copy_to_clipboard(&raw) {
        Ok(()) => state.push_log(format!("✓ Copied raw JSON to clipboard ({} bytes)", raw.len())),
        Err(e) => state.push_log(format!("Clipboard copy failed: {e:#}")),
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![
        Line::from("Scores"),
        Line::from("Raw JSON"),
        Line::from("Help"),
    ])
    .select(state.tab)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("winsat-viewer"),
    )
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        TAB_SCORES => draw_scores_tab(chunks[1], f, state),
        TAB_RAW => draw_raw(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }

    draw_info_row(chunks[2], f, state);
}

fn score_color(v: f64) -> Color {
    if v >= 8.0 {
        Color::Green
    } else if v >= 6.0 {
        Color::Cyan
    } else if v >= 4.0 {
        Color::Yellow
    } else {
        Color::Red
    }
}

fn score_line(label: &str, value: Option<f64>, emphasize: bool) -> Line<'static> {
    let label_style = if emphasize {
        Style::default().add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    };
    let mut spans = vec![Span::styled(format!("{label:<28}"), label_style)];
    match value {
        Some(v) => {
            let filled = ((v / MAX_SCORE).clamp(0.0, 1.0) * BAR_WIDTH as f64).round() as usize;
            let color = score_color(v);
            spans.push(Span::styled("█".repeat(filled), Style::default().fg(color)));
            spans.push(Span::styled(
                "░".repeat(BAR_WIDTH - filled),
                Style::default().fg(Color::DarkGray),
            ));
            spans.push(Span::styled(
                format!(" {}", fmt_score(value)),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ));
        }
        None => {
            spans.push(Span::styled(
                format!("{:<width$} -", "not measured", width = BAR_WIDTH),
                Style::default().fg(Color::DarkGray),
            ));
        }
    }
    Line::from(spans)
}

fn draw_scores_tab(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(10), // Score bars
                Constraint::Length(8),  // Status
                Constraint::Min(0),     // Activity log
            ]
            .as_ref(),
        )
        .split(area);

    let mut lines: Vec<Line> = Vec::new();
    match state.record.as_ref() {
        Some(record) => {
            lines.push(score_line("Base score (WinSPRLevel)", record.base_score, true));
            if let Some(note) = crate::text_summary::base_score_note(record) {
                lines.push(Line::from(Span::styled(
                    format!("  {note}"),
                    Style::default().fg(Color::Yellow),
                )));
            } else {
                lines.push(Line::from(""));
            }
            for (label, value) in score_rows(record) {
                lines.push(score_line(label, value, false));
            }
        }
        None if state.querying => lines.push(Line::from("Querying Win32_WinSAT…")),
        None => lines.push(Line::from("No scores yet. Press 'r' to query.")),
    }
    let scores = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Win32_WinSAT Scores"),
    );
    f.render_widget(scores, main[0]);

    draw_status(main[1], f, state);
    draw_log(main[2], f, state);
}

fn kv(label: &str, value: String, color: Color) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{label:<14}"), Style::default().fg(Color::Gray)),
        Span::styled(value, Style::default().fg(color)),
    ])
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut lines = Vec::new();

    match (&state.interpreter, &state.interpreter_error) {
        (Some(p), _) => lines.push(kv(
            "PowerShell:",
            format!("{} ({})", p.path.display(), p.method.label()),
            Color::White,
        )),
        (None, Some(e)) => lines.push(kv("PowerShell:", e.clone(), Color::Red)),
        (None, None) => lines.push(kv("PowerShell:", "locating…".into(), Color::DarkGray)),
    }

    if let Some(record) = state.record.as_ref() {
        lines.push(kv("State:", fmt_state(record), Color::White));
        lines.push(kv("Assessed:", fmt_assessed(record), Color::White));
    }

    let query = if state.querying {
        ("querying…".to_string(), Color::Yellow)
    } else if let Some(e) = state.query_error.as_ref() {
        (format!("failed: {e}"), Color::Red)
    } else if let Some(at) = state.last_query_at {
        (format!("ok at {}", state.clock(at)), Color::Green)
    } else {
        ("-".to_string(), Color::DarkGray)
    };
    lines.push(kv("Last query:", query.0, query.1));

    let run = &state.run;
    let (text, color) = match &run.state {
        RunState::Idle => ("not started this session".to_string(), Color::DarkGray),
        RunState::Running => (format!("running ({})", fmt_elapsed(run)), Color::Yellow),
        RunState::Succeeded => (format!("succeeded in {}", fmt_elapsed(run)), Color::Green),
        RunState::Failed(reason) => (format!("failed: {}", reason.to_message()), Color::Red),
    };
    lines.push(kv("Assessment:", text, color));

    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(p, area);
}

fn draw_log(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    // Newest entries at the bottom; show as many as fit inside the borders.
    let visible = area.height.saturating_sub(2) as usize;
    let skip = state.log.len().saturating_sub(visible);
    let lines: Vec<Line> = state
        .log
        .iter()
        .skip(skip)
        .map(|l| Line::from(l.as_str()))
        .collect();
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Log"));
    f.render_widget(p, area);
}

/// Indented form of the payload when it is valid JSON, else the text as received.
fn pretty_json(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| raw.to_string())
}

fn draw_raw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let text = match state.raw_json() {
        Some(raw) => pretty_json(raw),
        None => "No raw output yet. Press 'r' to query Win32_WinSAT.".to_string(),
    };
    let p = Paragraph::new(text)
        .scroll((state.raw_scroll, 0))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Raw JSON (y: copy, ↑/↓: scroll)"),
        );
    f.render_widget(p, area);
}

fn draw_info_row(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let keys = Line::from(vec![
        Span::styled(&*state.info, Style::default().fg(Color::White)),
        Span::raw("   "),
        Span::styled(
            "r refresh · a assess · l locate · y copy · tab · ? help · q quit",
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    let p = Paragraph::new(keys).block(Block::default().borders(Borders::ALL));
    f.render_widget(p, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_json_indents_valid_payloads() {
        assert_eq!(pretty_json(r#"{"CPUScore":8.9}"#), "{\n  \"CPUScore\": 8.9\n}");
        assert_eq!(pretty_json("not json"), "not json");
    }

    #[test]
    fn score_bar_spans_full_width() {
        let line = score_line("CPU", Some(9.9), false);
        let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text.matches('█').count(), BAR_WIDTH);
        assert!(text.ends_with(" 9.9"));

        let line = score_line("D3D", None, false);
        let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert!(text.contains("not measured"));
    }
}
