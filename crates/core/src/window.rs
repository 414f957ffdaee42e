use std::fmt;

use crate::logger;
use crate::platform::Platform;
use crate::types::*;

/// Windows parks minimized and hidden-away windows at -32000.
/// Anything further left or up is not on any display.
pub const OFFSCREEN_SENTINEL: i32 = -32000;

/// Outcome of the composite window check, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    NotFound,
    NotVisible,
    Minimized,
    NotForeground,
    OffScreen,
    Active,
}

/// Derived window status. Recomputed on every poll, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowStatus {
    pub state: WindowState,
    pub message: String,
}

impl WindowStatus {
    fn new(state: WindowState, message: String) -> Self {
        Self { state, message }
    }

    pub fn is_active(&self) -> bool {
        self.state == WindowState::Active
    }
}

impl fmt::Display for WindowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Title-based window queries. Never surfaces OS errors: a failed query
/// reads as "not found".
pub struct WindowLocator<'a> {
    platform: &'a dyn Platform,
}

impl<'a> WindowLocator<'a> {
    pub fn new(platform: &'a dyn Platform) -> Self {
        Self { platform }
    }

    /// Exact-title lookup.
    pub fn find(&self, title: &str) -> Option<WindowId> {
        match self.platform.find_window(title) {
            Ok(id) => id.filter(|&id| id != 0),
            Err(e) => {
                logger::warn_p("window", &format!("lookup of \"{}\" failed: {:#}", title, e));
                None
            }
        }
    }

    /// Short-circuiting check: found, visible, not minimized, foreground, on screen.
    pub fn status(&self, title: &str) -> WindowStatus {
        let Some(id) = self.find(title) else {
            return WindowStatus::new(WindowState::NotFound, format!("waiting for {} window", title));
        };
        match self.check(id, title) {
            Ok(status) => status,
            Err(e) => WindowStatus::new(
                WindowState::NotFound,
                format!("cannot query {} window: {:#}", title, e),
            ),
        }
    }

    fn check(&self, id: WindowId, title: &str) -> anyhow::Result<WindowStatus> {
        use WindowState::*;

        if !self.platform.is_visible(id)? {
            return Ok(WindowStatus::new(NotVisible, format!("{} window is hidden", title)));
        }
        if self.platform.is_minimized(id)? {
            return Ok(WindowStatus::new(Minimized, format!("{} window is minimized", title)));
        }
        if self.platform.foreground_window()? != Some(id) {
            return Ok(WindowStatus::new(
                NotForeground,
                format!("{} window is not in the foreground", title),
            ));
        }
        let rect = self.platform.window_rect(id)?;
        if rect.l < OFFSCREEN_SENTINEL || rect.t < OFFSCREEN_SENTINEL {
            return Ok(WindowStatus::new(OffScreen, format!("{} window is off-screen", title)));
        }
        Ok(WindowStatus::new(Active, format!("{} window is active", title)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::stub::StubPlatform;

    fn desktop() -> (StubPlatform, WindowId) {
        let stub = StubPlatform::new(200, 100);
        let id = stub.add_window("Target", Region::from_ltrb(10, 10, 110, 60));
        stub.focus(Some(id));
        (stub, id)
    }

    #[test]
    fn find_is_exact_match() {
        let (stub, id) = desktop();
        let locator = WindowLocator::new(&stub);
        assert_eq!(locator.find("Target"), Some(id));
        assert_eq!(locator.find("Targ"), None);
        assert_eq!(locator.find("target"), None);
    }

    #[test]
    fn status_checks_in_order() {
        let (stub, id) = desktop();
        let locator = WindowLocator::new(&stub);
        assert_eq!(locator.status("Target").state, WindowState::Active);

        // minimized and unfocused: minimized wins because it is checked first
        stub.set_minimized(id, true);
        stub.focus(None);
        assert_eq!(locator.status("Target").state, WindowState::Minimized);

        // hidden beats minimized
        stub.set_visible(id, false);
        assert_eq!(locator.status("Target").state, WindowState::NotVisible);

        stub.set_visible(id, true);
        stub.set_minimized(id, false);
        assert_eq!(locator.status("Target").state, WindowState::NotForeground);

        stub.focus(Some(id));
        stub.move_window(id, Region::from_ltrb(-32001, 0, -31900, 50));
        let status = locator.status("Target");
        assert_eq!(status.state, WindowState::OffScreen);
        assert!(!status.is_active());
    }

    #[test]
    fn sentinel_itself_is_still_on_screen() {
        let (stub, id) = desktop();
        stub.move_window(id, Region::from_ltrb(OFFSCREEN_SENTINEL, 0, -31900, 50));
        assert!(WindowLocator::new(&stub).status("Target").is_active());
    }

    #[test]
    fn missing_window_reports_not_found() {
        let (stub, _) = desktop();
        let status = WindowLocator::new(&stub).status("Other");
        assert_eq!(status.state, WindowState::NotFound);
        assert_eq!(status.message, "waiting for Other window");
    }

    #[test]
    fn query_failure_reads_as_not_found() {
        let (stub, _) = desktop();
        stub.fail_queries(true);
        let locator = WindowLocator::new(&stub);
        assert_eq!(locator.find("Target"), None);
        assert_eq!(locator.status("Target").state, WindowState::NotFound);
    }

    #[test]
    fn status_is_idempotent() {
        let (stub, id) = desktop();
        let locator = WindowLocator::new(&stub);
        for focused in [Some(id), None] {
            stub.focus(focused);
            let a = locator.status("Target");
            let b = locator.status("Target");
            assert_eq!((a.is_active(), a.message), (b.is_active(), b.message));
        }
    }
}
