use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

use allowclick_core::logger::{COLOR_BLUE, COLOR_GRAY, COLOR_GREEN};
use allowclick_core::platform::hotkey::HOTKEY_LABEL;
use crate::App;
use crate::confirm::centered_rect;

const HELP: [(&str, &str); 10] = [
    ("s", "start/stop"),
    ("esc", "stop"),
    ("a/x", "add/remove"),
    ("t", "probe"),
    ("i", "ignore window"),
    ("d/n", "step mode/step"),
    ("w", "save debug"),
    ("m/c", "mode/metric"),
    ("+/- [/]", "confidence/interval"),
    ("p", "save settings"),
];

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = if app.log_visible {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(f.area())
    } else {
        Layout::default()
            .constraints([Constraint::Percentage(100)])
            .split(f.area())
    };

    let (banner_label, banner_bg) = if !app.detection.is_running() {
        ("STOPPED (press S to start)", Color::Red)
    } else if app.detection.awaiting_step() {
        ("PAUSED (press N to click)", Color::Yellow)
    } else {
        ("RUNNING (press S to stop)", Color::Green)
    };

    let cfg = app.detection.config().snapshot();
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));
    let label = |l: &'static str| Span::styled(l, Style::default().fg(Color::DarkGray));
    let value = |v: String| Span::styled(v, Style::default().fg(Color::White));

    let mut lines: Vec<Line> = Vec::new();
    for pair in HELP.chunks(4) {
        let mut spans = vec![Span::raw(" ")];
        for &(k, what) in pair {
            spans.push(key(k));
            spans.push(Span::raw(format!(" {}  ", what)));
        }
        lines.push(Line::from(spans));
    }
    lines.push(Line::from(vec![Span::raw(" "), label("panic stop: "), key(HOTKEY_LABEL)]));
    lines.push(Line::from(""));

    let status = app.detection.status();
    lines.push(Line::from(vec![
        label(" window   "),
        value(cfg.window.title.clone()),
        Span::raw("  "),
        Span::styled(
            if status.is_empty() { "not checked yet".to_string() } else { status },
            Style::default().fg(Color::Cyan),
        ),
    ]));
    lines.push(Line::from(vec![
        label(" match    "),
        value(format!("{}  confidence {:.2}  every {:.1}s", cfg.detection.metric, cfg.detection.threshold, cfg.detection.interval)),
    ]));
    lines.push(Line::from(vec![
        label(" click    "),
        value(format!(
            "{} x{} @{:.2}s  offset ({}, {}){}",
            cfg.click.mode.label(),
            cfg.click.count,
            cfg.click.interval,
            cfg.click.offset_x,
            cfg.click.offset_y,
            if cfg.click.extra_click { "  +extra" } else { "" }
        )),
    ]));
    let flag = |on: bool| if on { Color::Green } else { Color::DarkGray };
    lines.push(Line::from(vec![
        label(" flags    "),
        Span::styled("ignore-window ", Style::default().fg(flag(cfg.window.ignore_window_state))),
        Span::styled("step ", Style::default().fg(flag(app.detection.step_mode()))),
        Span::styled("save-screenshots", Style::default().fg(flag(cfg.app.save_screenshots))),
    ]));
    lines.push(Line::from(""));

    lines.push(Line::from(Span::styled(
        " Templates",
        Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
    )));
    app.detection.with_templates(|templates| {
        if templates.is_empty() {
            lines.push(Line::from(Span::styled("   (none, press a to add)", Style::default().fg(Color::DarkGray))));
        }
        for (i, t) in templates.iter().enumerate() {
            let prefix = if i == app.selected { " > " } else { "   " };
            let location = t
                .path
                .as_ref()
                .map(|p| format!("  {}", p.display()))
                .unwrap_or_default();
            lines.push(Line::from(vec![
                Span::raw(prefix),
                Span::styled(t.name.clone(), Style::default().fg(Color::White)),
                Span::styled(format!("  {}x{}", t.width(), t.height()), Style::default().fg(Color::Cyan)),
                Span::styled(location, Style::default().fg(Color::DarkGray)),
            ]));
        }
    });

    if let Some(notice) = &app.notice {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(format!(" {}", notice), Style::default().fg(Color::Yellow))));
    }

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0)])
        .split(chunks[0]);

    let width = left[0].width as usize;
    let pad = width.saturating_sub(banner_label.len());
    let centered = format!("{}{}{}", " ".repeat(pad / 2), banner_label, " ".repeat(pad - pad / 2));
    let banner = Paragraph::new(Line::from(Span::styled(
        centered,
        Style::default().fg(Color::Black).bg(banner_bg).add_modifier(Modifier::BOLD),
    )));
    f.render_widget(banner, left[0]);

    let body = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::LEFT | Borders::RIGHT | Borders::BOTTOM)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(body, left[1]);

    if app.log_visible && chunks.len() > 1 {
        let visible_height = chunks[1].height.saturating_sub(2) as usize;
        let total = app.log_messages.len();
        let scroll = app.log_scroll.min(total.saturating_sub(visible_height));
        let start = total.saturating_sub(visible_height + scroll);
        let end = total.saturating_sub(scroll);
        let log_lines: Vec<Line> = app.log_messages[start..end]
            .iter()
            .map(|m| parse_log_line(m))
            .collect();

        let log_panel = Paragraph::new(log_lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Logs ")
                    .border_style(Style::default().fg(Color::Yellow)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(log_panel, chunks[1]);
    }

    if let Some(input) = &app.input {
        let area = centered_rect(60, 3, f.area());
        f.render_widget(Clear, area);
        let prompt = Paragraph::new(Line::from(vec![
            Span::raw(input.clone()),
            Span::styled("_", Style::default().fg(Color::Yellow)),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Template image path (enter to add, esc to cancel) ")
                .border_style(Style::default().fg(Color::Yellow)),
        );
        f.render_widget(prompt, area);
    }

    if let Some(dialog) = &app.confirm {
        dialog.render(f);
    }
}

/// Turn a structured log record (level\x1fprefix\x1fcolor\x1ftimestamp\x1fmessage)
/// into a colored line.
pub fn parse_log_line(raw: &str) -> Line<'_> {
    let parts: Vec<&str> = raw.splitn(5, '\x1f').collect();
    if parts.len() < 5 {
        return Line::from(raw);
    }
    let (level, prefix, timestamp, message) = (parts[0], parts[1], parts[3], parts[4]);

    let color = match parts[2].parse::<u8>().unwrap_or(0) {
        COLOR_GRAY => Color::DarkGray,
        COLOR_BLUE => Color::LightBlue,
        COLOR_GREEN => Color::LightGreen,
        _ => Color::White,
    };

    let mut spans = vec![
        Span::styled(timestamp, Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
    ];
    match level {
        "ERROR" => spans.push(Span::styled("error ", Style::default().fg(Color::Red))),
        "WARN" => spans.push(Span::styled("warn ", Style::default().fg(Color::Yellow))),
        _ => {}
    }
    if !prefix.is_empty() {
        spans.push(Span::styled(prefix, Style::default().fg(color).add_modifier(Modifier::BOLD)));
        spans.push(Span::raw(" "));
    }
    spans.push(Span::styled(message, Style::default().fg(color)));
    Line::from(spans)
}
