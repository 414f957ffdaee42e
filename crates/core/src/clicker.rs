use std::time::Duration;

use anyhow::{Context, Result};

use crate::logger;
use crate::platform::Platform;
use crate::sleep::sleep_secs;
use crate::types::*;

/// Pause after window activation and cursor moves so the target can react.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Synthesizes clicks inside the target window, either with the real cursor
/// or by messaging the window directly.
pub struct ClickDispatcher<'a> {
    platform: &'a dyn Platform,
    settle: Duration,
}

impl<'a> ClickDispatcher<'a> {
    pub fn new(platform: &'a dyn Platform) -> Self {
        Self { platform, settle: SETTLE_DELAY }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Resolve `Auto` against the current foreground window.
    pub fn resolve_mode(&self, mode: ClickMode, window: WindowId) -> ClickMode {
        match mode {
            ClickMode::Auto => match self.platform.foreground_window() {
                Ok(Some(fg)) if fg == window => ClickMode::Foreground,
                _ => ClickMode::Background,
            },
            other => other,
        }
    }

    /// Deliver `plan` to `window`. Returns false, after logging the reason,
    /// when the handle is invalid or any OS call fails.
    pub fn click(&self, plan: &ClickPlan, window: Option<WindowId>) -> bool {
        let Some(id) = window.filter(|&id| id != 0) else {
            logger::error_p("click", "no target window handle");
            return false;
        };
        if let Err(e) = self.platform.window_rect(id) {
            logger::error_p("click", &format!("target window {:#x} is not usable: {:#}", id, e));
            return false;
        }

        let mode = self.resolve_mode(plan.mode, id);
        let result = match mode {
            ClickMode::Background => self.background(plan, id),
            _ => self.foreground(plan, id),
        };
        match result {
            Ok(()) => {
                logger::info_p(
                    "click",
                    &format!("{} click x{} at ({}, {})", mode.label(), plan.repeat, plan.point.x, plan.point.y),
                );
                true
            }
            Err(e) => {
                logger::error_p("click", &format!("{} click failed: {:#}", mode.label(), e));
                false
            }
        }
    }

    fn foreground(&self, plan: &ClickPlan, id: WindowId) -> Result<()> {
        let saved = self.platform.cursor_pos().context("read cursor")?;
        let result = self.foreground_sequence(plan, id);
        // restore even after a partial failure
        if let Err(e) = self.platform.set_cursor_pos(saved) {
            logger::warn_p("click", &format!("cursor not restored to ({}, {}): {:#}", saved.x, saved.y, e));
        }
        result
    }

    fn foreground_sequence(&self, plan: &ClickPlan, id: WindowId) -> Result<()> {
        let p = self.platform;
        if !p.is_visible(id)? || p.is_minimized(id)? {
            p.restore_window(id).context("restore window")?;
            std::thread::sleep(self.settle);
        }
        if p.foreground_window()? != Some(id) {
            match p.set_foreground(id) {
                Ok(()) => std::thread::sleep(self.settle),
                Err(e) => logger::warn_p("click", &format!("could not activate window: {:#}", e)),
            }
        }

        p.set_cursor_pos(plan.point).context("move cursor")?;
        std::thread::sleep(self.settle);

        for i in 0..plan.repeat {
            p.mouse_button(ButtonAction::Down)?;
            p.mouse_button(ButtonAction::Up)?;
            if i + 1 < plan.repeat {
                sleep_secs(plan.interval.as_secs_f64());
            }
        }
        if plan.extra_click {
            p.mouse_button(ButtonAction::Down)?;
            p.mouse_button(ButtonAction::Up)?;
        }
        Ok(())
    }

    fn background(&self, plan: &ClickPlan, id: WindowId) -> Result<()> {
        let p = self.platform;
        let client = p.screen_to_client(id, plan.point).context("screen to client")?;
        for i in 0..plan.repeat {
            p.send_button(id, client, ButtonAction::Down)?;
            p.send_button(id, client, ButtonAction::Up)?;
            if i + 1 < plan.repeat {
                sleep_secs(plan.interval.as_secs_f64());
            }
        }
        if plan.extra_click {
            p.post_button(id, client, ButtonAction::Down)?;
            p.post_button(id, client, ButtonAction::Up)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::stub::{StubEvent, StubPlatform};

    fn plan(mode: ClickMode, repeat: u32, extra_click: bool) -> ClickPlan {
        ClickPlan {
            point: Point::new(150, 90),
            mode,
            repeat,
            interval: Duration::from_millis(1),
            extra_click,
        }
    }

    fn desktop() -> (StubPlatform, WindowId) {
        let stub = StubPlatform::new(400, 300);
        let id = stub.add_window("Target", Region::from_ltrb(100, 50, 300, 250));
        stub.focus(Some(id));
        stub.set_cursor(Point::new(5, 6));
        (stub, id)
    }

    fn buttons(stub: &StubPlatform) -> usize {
        stub.count(|e| matches!(e, StubEvent::Button(_)))
    }

    #[test]
    fn foreground_click_restores_cursor() {
        let (stub, id) = desktop();
        let d = ClickDispatcher::new(&stub).with_settle(Duration::ZERO);
        assert!(d.click(&plan(ClickMode::Foreground, 2, true), Some(id)));
        assert_eq!(buttons(&stub), 6);
        assert!(stub.events().contains(&StubEvent::CursorMove(Point::new(150, 90))));
        assert_eq!(stub.cursor(), Point::new(5, 6));
    }

    #[test]
    fn foreground_failure_still_restores_cursor() {
        let (stub, id) = desktop();
        stub.fail_buttons_after(3);
        let d = ClickDispatcher::new(&stub).with_settle(Duration::ZERO);
        assert!(!d.click(&plan(ClickMode::Foreground, 2, false), Some(id)));
        assert_eq!(buttons(&stub), 3);
        assert_eq!(stub.cursor(), Point::new(5, 6));
        assert_eq!(stub.events().last(), Some(&StubEvent::CursorMove(Point::new(5, 6))));
    }

    #[test]
    fn foreground_restores_and_activates_window() {
        let (stub, id) = desktop();
        stub.set_minimized(id, true);
        stub.focus(None);
        let d = ClickDispatcher::new(&stub).with_settle(Duration::ZERO);
        assert!(d.click(&plan(ClickMode::Foreground, 1, false), Some(id)));
        let events = stub.events();
        assert_eq!(events[0], StubEvent::Restore(id));
        assert_eq!(events[1], StubEvent::Focus(id));
    }

    #[test]
    fn background_click_never_moves_cursor() {
        let (stub, id) = desktop();
        let d = ClickDispatcher::new(&stub);
        assert!(d.click(&plan(ClickMode::Background, 2, true), Some(id)));
        assert_eq!(stub.count(|e| matches!(e, StubEvent::CursorMove(_))), 0);
        let client = Point::new(50, 40);
        assert_eq!(stub.count(|e| *e == StubEvent::Sent(id, client, ButtonAction::Down)), 2);
        assert_eq!(stub.count(|e| *e == StubEvent::Sent(id, client, ButtonAction::Up)), 2);
        assert_eq!(stub.count(|e| matches!(e, StubEvent::Posted(..))), 2);
        assert_eq!(stub.cursor(), Point::new(5, 6));
    }

    #[test]
    fn background_without_extra_click_posts_nothing() {
        let (stub, id) = desktop();
        assert!(ClickDispatcher::new(&stub).click(&plan(ClickMode::Background, 1, false), Some(id)));
        assert_eq!(stub.count(|e| matches!(e, StubEvent::Posted(..))), 0);
    }

    #[test]
    fn auto_follows_foreground() {
        let (stub, id) = desktop();
        let d = ClickDispatcher::new(&stub);
        assert_eq!(d.resolve_mode(ClickMode::Auto, id), ClickMode::Foreground);
        stub.focus(None);
        assert_eq!(d.resolve_mode(ClickMode::Auto, id), ClickMode::Background);
        assert_eq!(d.resolve_mode(ClickMode::Foreground, id), ClickMode::Foreground);

        assert!(d.click(&plan(ClickMode::Auto, 1, false), Some(id)));
        assert_eq!(buttons(&stub), 0);
        assert_eq!(stub.count(|e| matches!(e, StubEvent::Sent(..))), 2);
    }

    #[test]
    fn invalid_handle_returns_false() {
        let (stub, id) = desktop();
        let d = ClickDispatcher::new(&stub);
        assert!(!d.click(&plan(ClickMode::Foreground, 1, false), None));
        assert!(!d.click(&plan(ClickMode::Background, 1, false), Some(0)));
        stub.close_window(id);
        assert!(!d.click(&plan(ClickMode::Background, 1, false), Some(id)));
        assert!(stub.events().is_empty());
    }
}
