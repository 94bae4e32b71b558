use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

const KEYBINDS: [(&str, &str); 9] = [
    ("q / Ctrl-C", "Quit (a running assessment finishes on its own)"),
    ("r", "Refresh scores (query Win32_WinSAT)"),
    ("a", "Run WinSAT assessment (winsat formal)"),
    ("l", "Locate PowerShell again"),
    ("y", "Copy raw JSON to clipboard"),
    ("tab", "Switch tabs"),
    ("?", "Show this help"),
    ("↑/↓ j/k", "Scroll raw JSON"),
    ("PgUp/PgDn", "Scroll raw JSON by a page"),
];

fn key_line(key: &'static str, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(format!("{key:<12}"), Style::default().fg(Color::Magenta)),
        Span::raw(what),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let mut lines = vec![Line::from("Keybinds:")];
    lines.extend(KEYBINDS.iter().map(|&(k, what)| key_line(k, what)));
    lines.extend([
        Line::from(""),
        Line::from("Notes:"),
        Line::from(
            "  winsat formal needs an elevated (Administrator) terminal and usually takes a few minutes.",
        ),
        Line::from("  Scores are re-queried automatically when it finishes."),
        Line::from(
            "  A base score that differs from the lowest component means Windows has not recomputed it yet.",
        ),
    ]);

    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
