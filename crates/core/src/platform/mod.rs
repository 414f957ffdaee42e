pub mod hotkey;
pub mod stub;

#[cfg(target_os = "windows")]
pub mod win32;

use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;

use crate::logger;
use crate::types::*;

/// OS primitives the locator, capture and click components are built on.
///
/// Every call is blocking. Implementations return `Err` for rejected OS calls;
/// the components above decide whether that is fatal for them.
pub trait Platform: Send + Sync {
    /// Exact-title lookup of a top-level window.
    fn find_window(&self, title: &str) -> Result<Option<WindowId>>;
    fn is_visible(&self, id: WindowId) -> Result<bool>;
    fn is_minimized(&self, id: WindowId) -> Result<bool>;
    fn foreground_window(&self) -> Result<Option<WindowId>>;
    fn window_rect(&self, id: WindowId) -> Result<Region>;
    fn restore_window(&self, id: WindowId) -> Result<()>;
    fn set_foreground(&self, id: WindowId) -> Result<()>;
    fn screen_to_client(&self, id: WindowId, p: Point) -> Result<Point>;

    fn cursor_pos(&self) -> Result<Point>;
    fn set_cursor_pos(&self, p: Point) -> Result<()>;
    /// Hardware-level left button event at the current cursor position.
    fn mouse_button(&self, action: ButtonAction) -> Result<()>;
    /// Deliver a left button message and wait until the window handled it.
    fn send_button(&self, id: WindowId, client: Point, action: ButtonAction) -> Result<()>;
    /// Queue a left button message without waiting.
    fn post_button(&self, id: WindowId, client: Point, action: ButtonAction) -> Result<()>;

    /// Full primary-screen capture in RGB order.
    fn capture_screen(&self) -> Result<RgbImage>;
}

/// Create the platform appropriate for the current OS.
pub fn create_platform(force_stub: bool) -> Arc<dyn Platform> {
    if force_stub {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        return Arc::new(stub::StubPlatform::demo());
    }
    #[cfg(target_os = "windows")]
    {
        logger::register_prefix("win32", logger::COLOR_GRAY);
        Arc::new(win32::Win32Platform::new())
    }
    #[cfg(not(target_os = "windows"))]
    {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        logger::warn("no native window backend for this OS, using the simulated desktop");
        Arc::new(stub::StubPlatform::demo())
    }
}
