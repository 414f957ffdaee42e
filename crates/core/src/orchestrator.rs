use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::capture::ScreenCapture;
use crate::clicker::ClickDispatcher;
use crate::debug::{annotate, DebugRecorder, ReportContext};
use crate::lock;
use crate::logger;
use crate::matcher::{self, MatchResult, TemplateError, TemplateSet};
use crate::platform::Platform;
use crate::settings::{Config, ConfigHandle, StartRejection};
use crate::sleep::RunSignal;
use crate::types::*;
use crate::window::{WindowLocator, WindowStatus};

/// Wait after a tick gated on window state.
pub const WINDOW_BACKOFF: Duration = Duration::from_millis(500);
/// Wait after a click so the target can dismiss the button.
pub const CLICK_COOLDOWN: Duration = Duration::from_millis(500);
/// Wait after a tick that failed.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Window not usable and window state is not ignored.
    Gated(WindowStatus),
    NoMatch,
    Clicked { plan: ClickPlan, delivered: bool },
    /// Stopped while paused for a step.
    Cancelled,
    Failed(String),
}

impl TickOutcome {
    /// How long the worker sleeps before the next tick.
    pub fn delay(&self, config: &Config) -> Duration {
        match self {
            TickOutcome::Gated(_) => WINDOW_BACKOFF,
            TickOutcome::NoMatch => config.poll_interval(),
            TickOutcome::Clicked { .. } => CLICK_COOLDOWN,
            TickOutcome::Cancelled => Duration::ZERO,
            TickOutcome::Failed(_) => ERROR_BACKOFF,
        }
    }
}

/// Result of matching one template against the live screen, threshold aside.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub result: MatchResult,
    pub passes: bool,
    pub threshold: f64,
}

struct Shared {
    platform: Arc<dyn Platform>,
    config: ConfigHandle,
    templates: Mutex<TemplateSet>,
    recorder: Mutex<DebugRecorder>,
    status: Mutex<String>,
    /// Signal of the current run; None while idle.
    run: Mutex<Option<Arc<RunSignal>>>,
    step_mode: AtomicBool,
    awaiting_step: AtomicBool,
}

/// Handle to the detection loop. Cheap to clone; every clone drives the same worker.
#[derive(Clone)]
pub struct DetectionLoop {
    shared: Arc<Shared>,
}

impl DetectionLoop {
    pub fn new(platform: Arc<dyn Platform>, config: ConfigHandle, templates: TemplateSet) -> Self {
        let paths = templates.paths();
        config.update(|c| c.detection.templates = paths);
        Self {
            shared: Arc::new(Shared {
                platform,
                config,
                templates: Mutex::new(templates),
                recorder: Mutex::new(DebugRecorder::new()),
                status: Mutex::new(String::new()),
                run: Mutex::new(None),
                step_mode: AtomicBool::new(false),
                awaiting_step: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.shared.config
    }

    pub fn state(&self) -> LoopState {
        if lock(&self.shared.run).is_some() {
            LoopState::Running
        } else {
            LoopState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    /// Idle -> Running. Refused, with the state unchanged, when the config is
    /// out of range or no template is loaded.
    pub fn start(&self) -> Result<(), StartRejection> {
        let mut run = lock(&self.shared.run);
        if run.is_some() {
            return Err(StartRejection::AlreadyRunning);
        }
        let checked = self.shared.config.snapshot().validate_for_start().and_then(|()| {
            if lock(&self.shared.templates).is_empty() {
                Err(StartRejection::NoTemplates)
            } else {
                Ok(())
            }
        });
        if let Err(rejection) = checked {
            logger::warn_p("loop", &format!("start rejected: {}", rejection));
            return Err(rejection);
        }

        lock(&self.shared.recorder).clear();
        let signal = Arc::new(RunSignal::new());
        let worker = self.clone();
        let worker_signal = Arc::clone(&signal);
        thread::Builder::new()
            .name("detection-loop".to_string())
            .spawn(move || worker.run(worker_signal))
            .map_err(|e| {
                logger::error_p("loop", &format!("cannot spawn worker: {}", e));
                StartRejection::WorkerUnavailable(e.to_string())
            })?;
        *run = Some(signal);
        logger::info_p("loop", "detection started");
        Ok(())
    }

    /// Running -> Idle. Returns false when already idle.
    pub fn stop(&self, reason: &str) -> bool {
        let Some(signal) = lock(&self.shared.run).take() else {
            return false;
        };
        signal.cancel();
        self.shared.awaiting_step.store(false, Ordering::Release);
        logger::info_p("loop", &format!("detection stopped ({})", reason));
        true
    }

    pub fn toggle(&self) -> Result<LoopState, StartRejection> {
        if self.stop("toggle") {
            Ok(LoopState::Idle)
        } else {
            self.start().map(|()| LoopState::Running)
        }
    }

    pub fn set_step_mode(&self, on: bool) {
        self.shared.step_mode.store(on, Ordering::Release);
        logger::info_p("loop", if on { "single-step mode on" } else { "single-step mode off" });
        if !on {
            self.step();
        }
    }

    pub fn step_mode(&self) -> bool {
        self.shared.step_mode.load(Ordering::Acquire)
    }

    /// True while a matched tick waits for `step`.
    pub fn awaiting_step(&self) -> bool {
        self.shared.awaiting_step.load(Ordering::Acquire)
    }

    /// Release a tick paused before its click. Ignored when nothing is paused.
    pub fn step(&self) {
        if !self.awaiting_step() {
            return;
        }
        if let Some(signal) = lock(&self.shared.run).as_ref() {
            signal.step();
        }
    }

    /// Last window status message.
    pub fn status(&self) -> String {
        lock(&self.shared.status).clone()
    }

    pub fn with_templates<R>(&self, f: impl FnOnce(&TemplateSet) -> R) -> R {
        f(&lock(&self.shared.templates))
    }

    pub fn add_template(&self, path: &Path) -> Result<usize, TemplateError> {
        let mut templates = lock(&self.shared.templates);
        let idx = templates.add_path(path)?;
        let paths = templates.paths();
        self.shared.config.update(|c| c.detection.templates = paths);
        logger::info_p("match", &format!("added template {}", path.display()));
        Ok(idx)
    }

    pub fn remove_template(&self, index: usize) -> Option<String> {
        let mut templates = lock(&self.shared.templates);
        let removed = templates.remove(index)?;
        let paths = templates.paths();
        self.shared.config.update(|c| c.detection.templates = paths);
        logger::info_p("match", &format!("removed template {}", removed.name));
        Some(removed.name.clone())
    }

    /// Write the last recorded decision point to the debug directory.
    pub fn save_debug(&self) -> Result<Vec<PathBuf>> {
        let dir = self.shared.config.snapshot().app.debug_dir;
        lock(&self.shared.recorder).save(&dir)
    }

    /// Match template `index` against a fresh capture, ignoring the threshold.
    /// The annotated frame is kept for `save_debug`.
    pub fn probe(&self, index: usize) -> Result<Option<ProbeReport>> {
        let cfg = self.shared.config.snapshot();
        let Some(template) = lock(&self.shared.templates).shared(index) else {
            return Ok(None);
        };
        let snapshot = ScreenCapture::new(self.shared.platform.as_ref()).capture()?;
        let result = matcher::best_match(&snapshot.image, &template, cfg.detection.metric).ok_or_else(|| {
            anyhow!("template {} is larger than the {}x{} screen", template.name, snapshot.width(), snapshot.height())
        })?;

        let click = result.center().offset(cfg.click.offset_x, cfg.click.offset_y);
        let annotated = annotate(&snapshot.image, &result, click);
        let passes = result.score >= cfg.detection.threshold;
        logger::info_p(
            "match",
            &format!(
                "probe {}: score {:.3} at ({}, {}), {} threshold {:.2}",
                template.name,
                result.score,
                result.location.x,
                result.location.y,
                if passes { "passes" } else { "below" },
                cfg.detection.threshold
            ),
        );
        lock(&self.shared.recorder).record(snapshot, Some(annotated), Some(result.clone()), report_context(&cfg));
        Ok(Some(ProbeReport { result, passes, threshold: cfg.detection.threshold }))
    }

    fn run(&self, signal: Arc<RunSignal>) {
        let mut last_status = String::new();
        while !signal.is_cancelled() {
            let cfg = self.shared.config.snapshot();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.tick(&cfg, &signal, &mut last_status)))
                .unwrap_or_else(|payload| {
                    let msg = panic_message(&*payload);
                    logger::error_p("loop", &format!("tick panicked: {}", msg));
                    self.shared.awaiting_step.store(false, Ordering::Release);
                    TickOutcome::Failed(msg)
                });
            if outcome == TickOutcome::Cancelled || !signal.sleep(outcome.delay(&cfg)) {
                break;
            }
        }
        let mut run = lock(&self.shared.run);
        if run.as_ref().is_some_and(|current| Arc::ptr_eq(current, &signal)) {
            *run = None;
            logger::warn_p("loop", "worker left without a stop request");
        }
        logger::info_p("loop", "worker exited");
    }

    /// One pass of gate, capture, match and click. Never fails: errors come
    /// back as `TickOutcome::Failed` after being logged.
    pub fn tick(&self, cfg: &Config, signal: &RunSignal, last_status: &mut String) -> TickOutcome {
        match self.try_tick(cfg, signal, last_status) {
            Ok(outcome) => outcome,
            Err(e) => {
                let msg = format!("{:#}", e);
                logger::error_p("loop", &format!("tick failed: {}", msg));
                TickOutcome::Failed(msg)
            }
        }
    }

    fn try_tick(&self, cfg: &Config, signal: &RunSignal, last_status: &mut String) -> Result<TickOutcome> {
        let platform = self.shared.platform.as_ref();
        let locator = WindowLocator::new(platform);
        let title = &cfg.window.title;

        let status = locator.status(title);
        if status.message != *last_status {
            logger::info_p("window", &status.message);
            last_status.clone_from(&status.message);
            *lock(&self.shared.status) = status.message.clone();
        }
        if !status.is_active() && !cfg.window.ignore_window_state {
            return Ok(TickOutcome::Gated(status));
        }

        let snapshot = ScreenCapture::new(platform).capture()?;
        let templates = lock(&self.shared.templates).clone();
        let found = matcher::match_all(&snapshot.image, &templates, cfg.detection.metric, cfg.detection.threshold);
        let Some(found) = found else {
            lock(&self.shared.recorder).record(snapshot, None, None, report_context(cfg));
            return Ok(TickOutcome::NoMatch);
        };

        let local = found.center().offset(cfg.click.offset_x, cfg.click.offset_y);
        let point = snapshot.to_screen(local);
        logger::info_p(
            "match",
            &format!(
                "{} matched with score {:.3} at ({}, {})",
                found.template, found.score, found.location.x, found.location.y
            ),
        );

        let annotated = annotate(&snapshot.image, &found, local);
        {
            let mut recorder = lock(&self.shared.recorder);
            recorder.record(snapshot, Some(annotated), Some(found), report_context(cfg));
            if cfg.app.save_screenshots {
                if let Err(e) = recorder.save(&cfg.app.debug_dir) {
                    logger::warn_p("debug", &format!("saving screenshots failed: {:#}", e));
                }
            }
        }

        if self.step_mode() {
            logger::info_p("loop", &format!("paused before clicking ({}, {}); waiting for step", point.x, point.y));
            signal.clear_step();
            self.shared.awaiting_step.store(true, Ordering::Release);
            let stepped = signal.wait_step();
            self.shared.awaiting_step.store(false, Ordering::Release);
            if !stepped {
                return Ok(TickOutcome::Cancelled);
            }
        }

        let plan = ClickPlan {
            point,
            mode: cfg.click.mode,
            repeat: cfg.click.count,
            interval: cfg.click.interval(),
            extra_click: cfg.click.extra_click,
        };
        let delivered = ClickDispatcher::new(platform).click(&plan, locator.find(title));
        Ok(TickOutcome::Clicked { plan, delivered })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn report_context(cfg: &Config) -> ReportContext {
    ReportContext {
        window_title: cfg.window.title.clone(),
        threshold: cfg.detection.threshold,
        metric: cfg.detection.metric,
        click_mode: cfg.click.mode,
        offset: (cfg.click.offset_x, cfg.click.offset_y),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::tests::{decoded, noise};
    use crate::platform::stub::{StubEvent, StubPlatform};
    use crate::window::WindowState;
    use image::imageops;

    struct Fixture {
        stub: Arc<StubPlatform>,
        id: WindowId,
        detection: DetectionLoop,
    }

    /// 160x120 textured screen, target window over all of it, one template
    /// cut from (40, 30).
    fn fixture() -> Fixture {
        let stub = Arc::new(StubPlatform::new(160, 120));
        let screen = noise(160, 120, 11);
        let tpl = imageops::crop_imm(&screen, 40, 30, 20, 10).to_image();
        stub.set_screen(screen);
        let id = stub.add_window("Claude", Region::from_ltrb(0, 0, 160, 120));
        stub.focus(Some(id));

        let mut templates = TemplateSet::new();
        templates.add(decoded("allow", tpl)).unwrap();
        let mut cfg = Config::default();
        cfg.detection.threshold = 0.7;
        cfg.click.mode = ClickMode::Background;
        cfg.click.count = 1;
        cfg.click.extra_click = false;
        let detection = DetectionLoop::new(stub.clone(), ConfigHandle::new(cfg), templates);
        Fixture { stub, id, detection }
    }

    fn wait_for(limit: Duration, cond: impl Fn() -> bool) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < limit {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    fn sent_downs(f: &Fixture) -> usize {
        f.stub.count(|e| matches!(e, StubEvent::Sent(_, _, ButtonAction::Down)))
    }

    #[test]
    fn start_needs_templates() {
        let stub = Arc::new(StubPlatform::new(10, 10));
        let detection = DetectionLoop::new(stub, ConfigHandle::default(), TemplateSet::new());
        assert_eq!(detection.start(), Err(StartRejection::NoTemplates));
        assert_eq!(detection.state(), LoopState::Idle);
    }

    #[test]
    fn start_rejects_out_of_range_interval() {
        let f = fixture();
        for bad in [0.05, 61.0] {
            f.detection.config().update(|c| c.detection.interval = bad);
            assert_eq!(f.detection.start(), Err(StartRejection::IntervalOutOfRange(bad)));
            assert_eq!(f.detection.state(), LoopState::Idle);
        }
    }

    #[test]
    fn start_and_stop_toggle_state() {
        let f = fixture();
        f.stub.focus(None);
        assert!(f.detection.start().is_ok());
        assert!(f.detection.is_running());
        assert_eq!(f.detection.start(), Err(StartRejection::AlreadyRunning));
        assert!(f.detection.stop("test"));
        assert!(!f.detection.stop("test"));
        assert_eq!(f.detection.toggle(), Ok(LoopState::Running));
        assert_eq!(f.detection.toggle(), Ok(LoopState::Idle));
    }

    #[test]
    fn gated_tick_does_not_capture() {
        let f = fixture();
        f.stub.focus(None);
        let cfg = f.detection.config().snapshot();
        let mut last = String::new();
        let outcome = f.detection.tick(&cfg, &RunSignal::new(), &mut last);

        let TickOutcome::Gated(status) = &outcome else { panic!("expected gate, got {:?}", outcome) };
        assert_eq!(status.state, WindowState::NotForeground);
        assert_eq!(outcome.delay(&cfg), WINDOW_BACKOFF);
        assert_eq!(f.stub.count(|e| *e == StubEvent::Capture), 0);
        assert_eq!(f.detection.status(), "Claude window is not in the foreground");
    }

    #[test]
    fn ignoring_window_state_still_scans() {
        let f = fixture();
        f.stub.focus(None);
        f.detection.config().update(|c| c.window.ignore_window_state = true);
        let cfg = f.detection.config().snapshot();
        let outcome = f.detection.tick(&cfg, &RunSignal::new(), &mut String::new());
        assert!(matches!(outcome, TickOutcome::Clicked { delivered: true, .. }));
    }

    #[test]
    fn matched_tick_clicks_template_center_plus_offset() {
        let f = fixture();
        f.detection.config().update(|c| {
            c.click.offset_x = 3;
            c.click.offset_y = -2;
        });
        let cfg = f.detection.config().snapshot();
        let outcome = f.detection.tick(&cfg, &RunSignal::new(), &mut String::new());

        let TickOutcome::Clicked { plan, delivered } = &outcome else { panic!("expected click, got {:?}", outcome) };
        assert!(delivered);
        assert_eq!(plan.point, Point::new(53, 33));
        assert_eq!(outcome.delay(&cfg), CLICK_COOLDOWN);
        assert_eq!(f.stub.count(|e| *e == StubEvent::Sent(f.id, Point::new(53, 33), ButtonAction::Down)), 1);
    }

    #[test]
    fn no_match_waits_poll_interval() {
        let f = fixture();
        f.stub.set_screen(noise(160, 120, 12));
        let cfg = f.detection.config().snapshot();
        let outcome = f.detection.tick(&cfg, &RunSignal::new(), &mut String::new());
        assert_eq!(outcome, TickOutcome::NoMatch);
        assert_eq!(outcome.delay(&cfg), cfg.poll_interval());
        assert_eq!(f.stub.count(|e| matches!(e, StubEvent::Sent(..))), 0);
    }

    #[test]
    fn capture_error_becomes_failed_tick() {
        let f = fixture();
        f.stub.fail_capture(true);
        let cfg = f.detection.config().snapshot();
        let outcome = f.detection.tick(&cfg, &RunSignal::new(), &mut String::new());
        assert!(matches!(outcome, TickOutcome::Failed(_)));
        assert_eq!(outcome.delay(&cfg), ERROR_BACKOFF);
    }

    #[test]
    fn cancelled_step_skips_click() {
        let f = fixture();
        f.detection.set_step_mode(true);
        let signal = RunSignal::new();
        signal.cancel();
        let cfg = f.detection.config().snapshot();
        assert_eq!(f.detection.tick(&cfg, &signal, &mut String::new()), TickOutcome::Cancelled);
        assert_eq!(f.stub.count(|e| matches!(e, StubEvent::Sent(..))), 0);
        assert!(!f.detection.awaiting_step());
    }

    #[test]
    fn step_mode_toggled_off_and_on_still_waits_for_step() {
        let f = fixture();
        f.stub.focus(None);
        f.detection.start().unwrap();
        f.detection.set_step_mode(true);
        f.detection.set_step_mode(false);
        f.detection.step();
        f.detection.set_step_mode(true);
        f.stub.focus(Some(f.id));

        assert!(wait_for(Duration::from_secs(5), || f.detection.awaiting_step()));
        thread::sleep(Duration::from_millis(200));
        assert_eq!(sent_downs(&f), 0);

        f.detection.step();
        assert!(wait_for(Duration::from_secs(5), || sent_downs(&f) == 1));
        f.detection.stop("test");
    }

    #[test]
    fn turning_step_mode_off_releases_a_paused_tick() {
        let f = fixture();
        f.detection.set_step_mode(true);
        f.detection.start().unwrap();
        assert!(wait_for(Duration::from_secs(5), || f.detection.awaiting_step()));
        f.detection.set_step_mode(false);
        assert!(wait_for(Duration::from_secs(5), || sent_downs(&f) >= 1));
        f.detection.stop("test");
    }

    #[test]
    fn worker_survives_a_panicking_tick() {
        let f = fixture();
        f.stub.crash_capture(true);
        f.detection.start().unwrap();
        assert!(wait_for(Duration::from_secs(5), || f.stub.count(|e| *e == StubEvent::Capture) >= 2));
        assert!(f.detection.is_running());

        f.stub.crash_capture(false);
        assert!(wait_for(Duration::from_secs(5), || sent_downs(&f) >= 1));
        assert!(f.detection.stop("test"));
    }

    #[test]
    fn infinite_click_interval_is_refused_at_start() {
        let f = fixture();
        f.detection.config().update(|c| {
            c.click.interval = f64::INFINITY;
            c.click.count = 2;
        });
        assert_eq!(f.detection.start(), Err(StartRejection::ClickIntervalOutOfRange(f64::INFINITY)));
        assert_eq!(f.detection.state(), LoopState::Idle);
    }

    #[test]
    fn template_edits_sync_config() {
        let f = fixture();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extra.png");
        noise(8, 8, 1).save(&path).unwrap();

        assert_eq!(f.detection.add_template(&path).unwrap(), 1);
        assert_eq!(f.detection.config().snapshot().detection.templates, vec![path.clone()]);
        assert!(f.detection.add_template(&path).is_err());
        assert_eq!(f.detection.remove_template(1).as_deref(), Some("extra.png"));
        assert!(f.detection.config().snapshot().detection.templates.is_empty());
    }

    #[test]
    fn probe_reports_and_records() {
        let f = fixture();
        let dir = tempfile::tempdir().unwrap();
        f.detection.config().update(|c| c.app.debug_dir = dir.path().to_path_buf());

        let report = f.detection.probe(0).unwrap().unwrap();
        assert!(report.passes);
        assert_eq!(report.result.location, Point::new(40, 30));
        assert!(f.detection.probe(7).unwrap().is_none());
        assert_eq!(f.detection.save_debug().unwrap().len(), 3);
        assert_eq!(f.stub.count(|e| matches!(e, StubEvent::Sent(..))), 0);
    }
}
