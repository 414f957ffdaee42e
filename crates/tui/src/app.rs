use std::path::{Path, PathBuf};
use std::sync::mpsc;

use allowclick_core::logger;
use allowclick_core::orchestrator::DetectionLoop;
use allowclick_core::settings::{INTERVAL_RANGE, THRESHOLD_RANGE};
use allowclick_core::types::LoopState;

use crate::confirm::{ConfirmDialog, PendingAction};

pub struct App {
    pub detection: DetectionLoop,
    pub settings_path: PathBuf,
    pub selected: usize,
    pub log_visible: bool,
    pub log_messages: Vec<String>,
    pub log_scroll: usize, // offset from bottom, 0 = latest
    pub log_rx: mpsc::Receiver<String>,
    pub confirm: Option<ConfirmDialog>,
    /// Template path being typed, while the add prompt is open.
    pub input: Option<String>,
    /// Last message for the operator, shown under the config panel.
    pub notice: Option<String>,
    pub should_quit: bool,
}

impl App {
    pub fn new(detection: DetectionLoop, log_rx: mpsc::Receiver<String>, settings_path: PathBuf) -> Self {
        Self {
            detection,
            settings_path,
            selected: 0,
            log_visible: true,
            log_messages: Vec::new(),
            log_scroll: 0,
            log_rx,
            confirm: None,
            input: None,
            notice: None,
            should_quit: false,
        }
    }

    pub fn drain_logs(&mut self) {
        while let Ok(msg) = self.log_rx.try_recv() {
            self.log_messages.push(msg);
        }
    }

    pub fn scroll_log_up(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_add(n);
    }

    pub fn scroll_log_down(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(n);
    }

    fn template_count(&self) -> usize {
        self.detection.with_templates(|t| t.len())
    }

    pub fn move_up(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
        }
    }

    pub fn move_down(&mut self) {
        if self.selected + 1 < self.template_count() {
            self.selected += 1;
        }
    }

    pub fn start_stop(&mut self) {
        match self.detection.toggle() {
            Ok(LoopState::Running) => self.notice = None,
            Ok(LoopState::Idle) => {}
            Err(rejection) => self.notice = Some(rejection.to_string()),
        }
    }

    /// Esc and the global hotkey.
    pub fn force_stop(&mut self, reason: &str) {
        self.detection.stop(reason);
    }

    pub fn toggle_ignore_window_state(&mut self) {
        let on = self.detection.config().update(|c| {
            c.window.ignore_window_state = !c.window.ignore_window_state;
            c.window.ignore_window_state
        });
        logger::info(&format!("ignore window state: {}", on));
    }

    pub fn toggle_step_mode(&mut self) {
        let on = !self.detection.step_mode();
        self.detection.set_step_mode(on);
    }

    pub fn step(&mut self) {
        if self.detection.awaiting_step() {
            self.detection.step();
        } else {
            self.notice = Some("nothing is waiting for a step".to_string());
        }
    }

    pub fn save_debug(&mut self) {
        match self.detection.save_debug() {
            Ok(files) if files.is_empty() => self.notice = Some("no snapshot to save yet".to_string()),
            Ok(files) => self.notice = Some(format!("saved {} debug files", files.len())),
            Err(e) => {
                logger::error_p("debug", &format!("save failed: {:#}", e));
                self.notice = Some(format!("save failed: {:#}", e));
            }
        }
    }

    pub fn probe_selected(&mut self) {
        self.notice = Some(match self.detection.probe(self.selected) {
            Ok(Some(report)) => format!(
                "{}: score {:.3} at ({}, {}) {}",
                report.result.template,
                report.result.score,
                report.result.location.x,
                report.result.location.y,
                if report.passes { "passes" } else { "below threshold" }
            ),
            Ok(None) => "no template selected".to_string(),
            Err(e) => {
                logger::error_p("match", &format!("probe failed: {:#}", e));
                format!("probe failed: {:#}", e)
            }
        });
    }

    pub fn request_remove(&mut self) {
        let Some(name) = self.detection.with_templates(|t| t.get(self.selected).map(|t| t.name.clone())) else {
            return;
        };
        self.confirm = Some(ConfirmDialog::new(
            format!("Remove template {}?", name),
            PendingAction::RemoveTemplate(self.selected),
        ));
    }

    /// Close the dialog, running its action on Yes.
    pub fn answer_confirm(&mut self, yes: bool) {
        let Some(dialog) = self.confirm.take() else { return };
        if !yes {
            return;
        }
        match dialog.action {
            PendingAction::RemoveTemplate(idx) => {
                self.detection.remove_template(idx);
                let len = self.template_count();
                if self.selected >= len {
                    self.selected = len.saturating_sub(1);
                }
            }
        }
    }

    pub fn open_add_prompt(&mut self) {
        self.input = Some(String::new());
    }

    pub fn submit_add_prompt(&mut self) {
        let Some(text) = self.input.take() else { return };
        let text = text.trim().trim_matches('"');
        if text.is_empty() {
            return;
        }
        match self.detection.add_template(Path::new(text)) {
            Ok(idx) => {
                self.selected = idx;
                self.notice = None;
            }
            Err(e) => {
                logger::warn_p("match", &e.to_string());
                self.notice = Some(e.to_string());
            }
        }
    }

    pub fn cycle_click_mode(&mut self) {
        let mode = self.detection.config().update(|c| {
            c.click.mode = c.click.mode.next();
            c.click.mode
        });
        logger::info(&format!("click mode: {}", mode.label()));
    }

    pub fn cycle_metric(&mut self) {
        let metric = self.detection.config().update(|c| {
            c.detection.metric = c.detection.metric.next();
            c.detection.metric
        });
        logger::info(&format!("match metric: {}", metric));
    }

    pub fn adjust_threshold(&mut self, delta: f64) {
        self.detection.config().update(|c| {
            let v = round2(c.detection.threshold + delta);
            c.detection.threshold = v.clamp(*THRESHOLD_RANGE.start(), *THRESHOLD_RANGE.end());
        });
    }

    pub fn adjust_interval(&mut self, delta: f64) {
        self.detection.config().update(|c| {
            let v = round2(c.detection.interval + delta);
            c.detection.interval = v.clamp(*INTERVAL_RANGE.start(), *INTERVAL_RANGE.end());
        });
    }

    pub fn persist(&mut self) {
        let cfg = self.detection.config().snapshot();
        match cfg.save(&self.settings_path) {
            Ok(()) => {
                logger::info(&format!("settings saved to {}", self.settings_path.display()));
                self.notice = Some("settings saved".to_string());
            }
            Err(e) => {
                logger::error(&format!("saving settings failed: {:#}", e));
                self.notice = Some(format!("saving settings failed: {:#}", e));
            }
        }
    }

    pub fn toggle_log(&mut self) {
        self.log_visible = !self.log_visible;
    }

    pub fn quit(&mut self) {
        self.detection.stop("quit");
        self.should_quit = true;
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
