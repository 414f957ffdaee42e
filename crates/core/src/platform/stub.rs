use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use image::{Rgb, RgbImage};

use crate::lock;
use crate::logger;
use crate::types::*;
use super::Platform;

/// Something the simulated desktop was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubEvent {
    Capture,
    Restore(WindowId),
    Focus(WindowId),
    CursorMove(Point),
    /// Hardware button event at the cursor.
    Button(ButtonAction),
    Sent(WindowId, Point, ButtonAction),
    Posted(WindowId, Point, ButtonAction),
}

/// Oldest journal entries are dropped past this many.
pub const JOURNAL_LIMIT: usize = 4096;

struct StubWindow {
    id: WindowId,
    title: String,
    visible: bool,
    minimized: bool,
    region: Region,
}

struct Desktop {
    windows: Vec<StubWindow>,
    foreground: Option<WindowId>,
    cursor: Point,
    screen: RgbImage,
    events: VecDeque<StubEvent>,
    next_id: WindowId,
    buttons_left: Option<usize>,
    fail_queries: bool,
    fail_capture: bool,
    crash_capture: bool,
}

impl Desktop {
    fn record(&mut self, event: StubEvent) {
        if self.events.len() == JOURNAL_LIMIT {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn window(&self, id: WindowId) -> Result<&StubWindow> {
        if self.fail_queries {
            bail!("simulated window query failure");
        }
        self.windows
            .iter()
            .find(|w| w.id == id)
            .ok_or_else(|| anyhow!("invalid window handle {}", id))
    }

    fn window_mut(&mut self, id: WindowId) -> Result<&mut StubWindow> {
        self.windows
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| anyhow!("invalid window handle {}", id))
    }

    /// Consume one unit of the button budget; errors once it is exhausted.
    fn spend_button(&mut self) -> Result<()> {
        match self.buttons_left {
            Some(0) => bail!("simulated input failure"),
            Some(ref mut n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// In-memory desktop: a window table, one cursor, a screen raster and a journal
/// of every input it received. Backs `--stub` runs and the test suites.
pub struct StubPlatform {
    desktop: Mutex<Desktop>,
}

impl StubPlatform {
    /// Empty desktop with a black screen of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            desktop: Mutex::new(Desktop {
                windows: Vec::new(),
                foreground: None,
                cursor: Point::new(0, 0),
                screen: RgbImage::from_pixel(width, height, Rgb([0, 0, 0])),
                events: VecDeque::new(),
                next_id: 0x1000,
                buttons_left: None,
                fail_queries: false,
                fail_capture: false,
                crash_capture: false,
            }),
        }
    }

    /// Desktop with a focused "Claude" window, used by `--stub`.
    pub fn demo() -> Self {
        let stub = Self::new(1280, 720);
        let id = stub.add_window("Claude", Region::from_ltrb(100, 80, 1180, 680));
        stub.focus(Some(id));
        stub
    }

    pub fn add_window(&self, title: &str, region: Region) -> WindowId {
        let mut d = lock(&self.desktop);
        let id = d.next_id;
        d.next_id += 1;
        d.windows.push(StubWindow {
            id,
            title: title.to_string(),
            visible: true,
            minimized: false,
            region,
        });
        id
    }

    pub fn close_window(&self, id: WindowId) {
        let mut d = lock(&self.desktop);
        d.windows.retain(|w| w.id != id);
        if d.foreground == Some(id) {
            d.foreground = None;
        }
    }

    pub fn focus(&self, id: Option<WindowId>) {
        lock(&self.desktop).foreground = id;
    }

    pub fn set_visible(&self, id: WindowId, visible: bool) {
        if let Ok(w) = lock(&self.desktop).window_mut(id) {
            w.visible = visible;
        }
    }

    pub fn set_minimized(&self, id: WindowId, minimized: bool) {
        if let Ok(w) = lock(&self.desktop).window_mut(id) {
            w.minimized = minimized;
        }
    }

    pub fn move_window(&self, id: WindowId, region: Region) {
        if let Ok(w) = lock(&self.desktop).window_mut(id) {
            w.region = region;
        }
    }

    pub fn set_screen(&self, screen: RgbImage) {
        lock(&self.desktop).screen = screen;
    }

    pub fn set_cursor(&self, p: Point) {
        lock(&self.desktop).cursor = p;
    }

    pub fn cursor(&self) -> Point {
        lock(&self.desktop).cursor
    }

    /// Allow `n` more button events (hardware, sent or posted), then fail every one after.
    pub fn fail_buttons_after(&self, n: usize) {
        lock(&self.desktop).buttons_left = Some(n);
    }

    pub fn fail_queries(&self, fail: bool) {
        lock(&self.desktop).fail_queries = fail;
    }

    pub fn fail_capture(&self, fail: bool) {
        lock(&self.desktop).fail_capture = fail;
    }

    /// Make `capture_screen` panic, standing in for a fault inside a platform call.
    pub fn crash_capture(&self, crash: bool) {
        lock(&self.desktop).crash_capture = crash;
    }

    /// The most recent `JOURNAL_LIMIT` events, oldest first.
    pub fn events(&self) -> Vec<StubEvent> {
        lock(&self.desktop).events.iter().cloned().collect()
    }

    pub fn clear_events(&self) {
        lock(&self.desktop).events.clear();
    }

    pub fn count(&self, pred: impl Fn(&StubEvent) -> bool) -> usize {
        lock(&self.desktop).events.iter().filter(|e| pred(e)).count()
    }
}

impl Platform for StubPlatform {
    fn find_window(&self, title: &str) -> Result<Option<WindowId>> {
        let d = lock(&self.desktop);
        if d.fail_queries {
            bail!("simulated window query failure");
        }
        Ok(d.windows.iter().find(|w| w.title == title).map(|w| w.id))
    }

    fn is_visible(&self, id: WindowId) -> Result<bool> {
        Ok(lock(&self.desktop).window(id)?.visible)
    }

    fn is_minimized(&self, id: WindowId) -> Result<bool> {
        Ok(lock(&self.desktop).window(id)?.minimized)
    }

    fn foreground_window(&self) -> Result<Option<WindowId>> {
        let d = lock(&self.desktop);
        if d.fail_queries {
            bail!("simulated window query failure");
        }
        Ok(d.foreground)
    }

    fn window_rect(&self, id: WindowId) -> Result<Region> {
        Ok(lock(&self.desktop).window(id)?.region)
    }

    fn restore_window(&self, id: WindowId) -> Result<()> {
        logger::info_p("stub", &format!("win({}).restore()", id));
        let mut d = lock(&self.desktop);
        let w = d.window_mut(id)?;
        w.minimized = false;
        w.visible = true;
        d.record(StubEvent::Restore(id));
        Ok(())
    }

    fn set_foreground(&self, id: WindowId) -> Result<()> {
        logger::info_p("stub", &format!("win({}).activate()", id));
        let mut d = lock(&self.desktop);
        d.window(id)?;
        d.foreground = Some(id);
        d.record(StubEvent::Focus(id));
        Ok(())
    }

    fn screen_to_client(&self, id: WindowId, p: Point) -> Result<Point> {
        let region = lock(&self.desktop).window(id)?.region;
        Ok(Point::new(p.x - region.l, p.y - region.t))
    }

    fn cursor_pos(&self) -> Result<Point> {
        Ok(lock(&self.desktop).cursor)
    }

    fn set_cursor_pos(&self, p: Point) -> Result<()> {
        let mut d = lock(&self.desktop);
        d.cursor = p;
        d.record(StubEvent::CursorMove(p));
        Ok(())
    }

    fn mouse_button(&self, action: ButtonAction) -> Result<()> {
        let mut d = lock(&self.desktop);
        d.spend_button()?;
        logger::info_p("stub", &format!("mouse {:?} at ({}, {})", action, d.cursor.x, d.cursor.y));
        d.record(StubEvent::Button(action));
        Ok(())
    }

    fn send_button(&self, id: WindowId, client: Point, action: ButtonAction) -> Result<()> {
        let mut d = lock(&self.desktop);
        d.window(id)?;
        d.spend_button()?;
        logger::info_p("stub", &format!("win({}).send({:?}, {}, {})", id, action, client.x, client.y));
        d.record(StubEvent::Sent(id, client, action));
        Ok(())
    }

    fn post_button(&self, id: WindowId, client: Point, action: ButtonAction) -> Result<()> {
        let mut d = lock(&self.desktop);
        d.window(id)?;
        d.spend_button()?;
        logger::info_p("stub", &format!("win({}).post({:?}, {}, {})", id, action, client.x, client.y));
        d.record(StubEvent::Posted(id, client, action));
        Ok(())
    }

    fn capture_screen(&self) -> Result<RgbImage> {
        let mut d = lock(&self.desktop);
        d.record(StubEvent::Capture);
        if d.crash_capture {
            drop(d);
            panic!("simulated capture crash");
        }
        if d.fail_capture {
            bail!("simulated capture failure");
        }
        Ok(d.screen.clone())
    }
}
