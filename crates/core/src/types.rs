use std::time::Duration;

use chrono::{DateTime, Local};
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Native window identifier (HWND on Windows). Zero never names a window.
pub type WindowId = u64;

/// Screen or client-space pixel coordinate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self { x: self.x.saturating_add(dx), y: self.y.saturating_add(dy) }
    }
}

/// Screen-coordinate bounding box of a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Region {
    pub l: i32,
    pub t: i32,
    pub r: i32,
    pub b: i32,
    pub w: i32,
    pub h: i32,
    pub cx: i32,
    pub cy: i32,
}

impl Region {
    pub fn from_ltrb(l: i32, t: i32, r: i32, b: i32) -> Self {
        let w = r - l;
        let h = b - t;
        Self { l, t, r, b, w, h, cx: l + w / 2, cy: t + h / 2 }
    }
}

/// One captured frame: RGB, row-major, tagged with where and when it was taken.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub image: RgbImage,
    /// Screen position of the image's top-left pixel.
    pub origin: Point,
    pub taken_at: DateTime<Local>,
}

impl Snapshot {
    pub fn new(image: RgbImage, origin: Point) -> Self {
        Self { image, origin, taken_at: Local::now() }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Translate a pixel position inside the image to screen coordinates.
    pub fn to_screen(&self, p: Point) -> Point {
        p.offset(self.origin.x, self.origin.y)
    }
}

/// How a click is delivered to the target window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClickMode {
    /// Foreground when the target already owns the foreground, else background.
    #[default]
    Auto,
    /// Move the real cursor and inject hardware button events.
    Foreground,
    /// Send button messages straight to the window; the cursor stays put.
    Background,
}

impl ClickMode {
    pub fn label(self) -> &'static str {
        match self {
            ClickMode::Auto => "auto",
            ClickMode::Foreground => "foreground",
            ClickMode::Background => "background",
        }
    }

    pub fn next(self) -> Self {
        match self {
            ClickMode::Auto => ClickMode::Foreground,
            ClickMode::Foreground => ClickMode::Background,
            ClickMode::Background => ClickMode::Auto,
        }
    }
}

/// Mouse button transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Down,
    Up,
}

/// A single click request, built per successful match and consumed at once.
#[derive(Debug, Clone, PartialEq)]
pub struct ClickPlan {
    pub point: Point,
    pub mode: ClickMode,
    pub repeat: u32,
    pub interval: Duration,
    /// Append one more press/release pair after `repeat`.
    pub extra_click: bool,
}

/// Detection loop run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
}
