use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;

use crate::app::{App, InputMode, Pane};
use crate::report::Status;

fn ansi_to_color(code: u8) -> Color {
    match code {
        30 => Color::Black,
        31 => Color::Red,
        32 => Color::Green,
        33 => Color::Yellow,
        34 => Color::Blue,
        35 => Color::Magenta,
        36 => Color::Cyan,
        37 => Color::White,
        90 => Color::DarkGray,
        91 => Color::LightRed,
        92 => Color::LightGreen,
        93 => Color::LightYellow,
        94 => Color::LightBlue,
        95 => Color::LightMagenta,
        96 => Color::LightCyan,
        _ => Color::White,
    }
}

fn status_color(status: Status) -> Color {
    match status {
        Status::Ok => Color::Green,
        Status::Note => Color::DarkGray,
        Status::Fault => Color::LightRed,
    }
}

pub fn draw(f: &mut Frame, app: &mut App) {
    let show_input = app.mode != InputMode::Normal;

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(if show_input {
            vec![
                Constraint::Length(3), // header
                Constraint::Min(1),    // rows
                Constraint::Length(3), // input
            ]
        } else {
            vec![Constraint::Length(3), Constraint::Min(1)]
        })
        .split(f.area());

    // --- Header ---
    let verdict_color = if app.report.verdict.is_ok() {
        Color::Green
    } else {
        Color::LightRed
    };
    let filter_text = match (app.pane, app.filter) {
        (Pane::Log, _) => "Loader log".to_string(),
        (Pane::Image, Some(group)) => format!("Group: {}", group.title()),
        (Pane::Image, None) => "Group: (all)".to_string(),
    };
    let search_matches = app.search_match_indices();
    let search_text = match &app.search {
        Some(s) => {
            let total = search_matches.len();
            let cur = if total > 0 {
                app.search_match_index + 1
            } else {
                0
            };
            format!("Search: /{s}  Matches: {cur}/{total}")
        }
        None => "Search: (none)".into(),
    };

    let mut header_spans = vec![
        Span::styled(format!(" {} ", app.report.summary()), Style::default().fg(verdict_color)),
        Span::styled(" [", Style::default().fg(Color::DarkGray)),
        Span::styled(filter_text, Style::default().fg(Color::Cyan)),
        Span::styled("]  [", Style::default().fg(Color::DarkGray)),
        Span::styled(search_text, Style::default().fg(Color::Yellow)),
        Span::styled("]", Style::default().fg(Color::DarkGray)),
    ];
    if let Some(notice) = &app.notice {
        header_spans.push(Span::styled(format!("  {notice}"), Style::default().fg(Color::LightRed)));
    }
    let header = Paragraph::new(Line::from(header_spans)).block(
        Block::default()
            .title(" Network Binary Inspector ")
            .borders(Borders::ALL),
    );
    f.render_widget(header, chunks[0]);

    // --- Rows ---
    let area = chunks[1];
    let viewport_height = area.height.saturating_sub(2) as usize;
    let visible = app.visible_indices();

    let current_match = if search_matches.is_empty() {
        None
    } else {
        Some(search_matches[app.search_match_index % search_matches.len()])
    };
    if let Some(vis_pos) = current_match.and_then(|idx| visible.iter().position(|&i| i == idx)) {
        if vis_pos < app.scroll_offset {
            app.scroll_offset = vis_pos;
        } else if vis_pos >= app.scroll_offset + viewport_height {
            app.scroll_offset = vis_pos + 1 - viewport_height;
        }
    }

    let lines: Vec<Line> = visible
        .iter()
        .skip(app.scroll_offset)
        .take(viewport_height)
        .map(|&idx| {
            let highlight = if current_match == Some(idx) {
                Style::default().bg(Color::Yellow).fg(Color::Black)
            } else if search_matches.contains(&idx) {
                Style::default().bg(Color::DarkGray)
            } else {
                Style::default()
            };
            match app.pane {
                Pane::Image => {
                    let row = &app.report.rows[idx];
                    Line::from(vec![
                        Span::styled(
                            format!("{:<12}", row.group.title()),
                            Style::default().fg(Color::DarkGray),
                        ),
                        Span::styled(
                            format!("{:<20}", row.label),
                            Style::default().fg(status_color(row.status)),
                        ),
                        Span::styled(row.value.as_str(), highlight),
                    ])
                }
                Pane::Log => {
                    let entry = &app.report.log[idx];
                    let tag_color = if entry.color > 0 {
                        ansi_to_color(entry.color)
                    } else {
                        Color::White
                    };
                    Line::from(vec![
                        Span::styled(format!("{:<8}", entry.tag), Style::default().fg(tag_color)),
                        Span::styled(": ", Style::default().fg(Color::DarkGray)),
                        Span::styled(entry.message.as_str(), highlight),
                    ])
                }
            }
        })
        .collect();

    let title = match app.pane {
        Pane::Image => " image (tab: log) ",
        Pane::Log => " loader log (tab: image) ",
    };
    let body = Paragraph::new(lines).block(Block::default().title(title).borders(Borders::ALL));
    f.render_widget(body, area);

    // --- Input bar ---
    if show_input {
        let (prompt, color) = match app.mode {
            InputMode::FilterInput => ("Group: ", Color::Cyan),
            _ => ("/", Color::Yellow),
        };
        let input = Paragraph::new(Line::from(vec![
            Span::styled(prompt, Style::default().fg(color)),
            Span::raw(&app.input_buf),
            Span::styled("_", Style::default().add_modifier(Modifier::SLOW_BLINK)),
        ]))
        .block(Block::default().borders(Borders::ALL));
        f.render_widget(input, chunks[2]);
    }
}
