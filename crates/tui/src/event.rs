use std::io;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use allowclick_core::platform::hotkey;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, MouseEventKind};
use ratatui::{Terminal, backend::CrosstermBackend};

use crate::App;
use crate::ui;

pub fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    hotkey_flag: &AtomicBool,
) -> anyhow::Result<()> {
    loop {
        if app.should_quit {
            return Ok(());
        }

        if hotkey::take_pressed(hotkey_flag) {
            app.force_stop("hotkey");
        }

        app.drain_logs();
        terminal.draw(|f| ui::draw(f, app))?;

        // 100ms poll keeps the hotkey and log panel responsive
        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if app.input.is_some() {
                    handle_input_key(app, key);
                } else if app.confirm.is_some() {
                    handle_confirm_key(app, key);
                } else {
                    handle_key(app, key);
                }
            }
            Event::Mouse(mouse) => match mouse.kind {
                MouseEventKind::ScrollUp => app.scroll_log_up(3),
                MouseEventKind::ScrollDown => app.scroll_log_down(3),
                _ => {}
            },
            _ => {}
        }
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') | KeyCode::Char('Q') => app.quit(),
        KeyCode::Char('s') | KeyCode::Char('S') => app.start_stop(),
        KeyCode::Esc => app.force_stop("escape"),
        KeyCode::Up | KeyCode::Char('k') => app.move_up(),
        KeyCode::Down | KeyCode::Char('j') => app.move_down(),
        KeyCode::Char('a') => app.open_add_prompt(),
        KeyCode::Char('x') => app.request_remove(),
        KeyCode::Char('t') => app.probe_selected(),
        KeyCode::Char('i') => app.toggle_ignore_window_state(),
        KeyCode::Char('d') => app.toggle_step_mode(),
        KeyCode::Char('n') => app.step(),
        KeyCode::Char('w') => app.save_debug(),
        KeyCode::Char('m') => app.cycle_click_mode(),
        KeyCode::Char('c') => app.cycle_metric(),
        KeyCode::Char('+') | KeyCode::Char('=') => app.adjust_threshold(0.05),
        KeyCode::Char('-') => app.adjust_threshold(-0.05),
        KeyCode::Char(']') => app.adjust_interval(0.1),
        KeyCode::Char('[') => app.adjust_interval(-0.1),
        KeyCode::Char('p') => app.persist(),
        KeyCode::Char('l') | KeyCode::Char('L') => app.toggle_log(),
        KeyCode::PageUp => app.scroll_log_up(10),
        KeyCode::PageDown => app.scroll_log_down(10),
        _ => {}
    }
}

fn handle_confirm_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Left | KeyCode::Right | KeyCode::Tab => {
            if let Some(dialog) = app.confirm.as_mut() {
                dialog.toggle();
            }
        }
        KeyCode::Enter => {
            let yes = app.confirm.as_ref().is_some_and(|d| d.selected);
            app.answer_confirm(yes);
        }
        KeyCode::Char('y') | KeyCode::Char('Y') => app.answer_confirm(true),
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => app.answer_confirm(false),
        _ => {}
    }
}

fn handle_input_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Enter => app.submit_add_prompt(),
        KeyCode::Esc => app.input = None,
        KeyCode::Backspace => {
            if let Some(text) = app.input.as_mut() {
                text.pop();
            }
        }
        KeyCode::Char(c) => {
            if let Some(text) = app.input.as_mut() {
                text.push(c);
            }
        }
        _ => {}
    }
}
