use anyhow::{bail, Context, Result};
use image::imageops;

use crate::platform::Platform;
use crate::types::*;

/// Produces RGB snapshots of the screen.
pub struct ScreenCapture<'a> {
    platform: &'a dyn Platform,
}

impl<'a> ScreenCapture<'a> {
    pub fn new(platform: &'a dyn Platform) -> Self {
        Self { platform }
    }

    /// Full primary screen, origin (0, 0).
    pub fn capture(&self) -> Result<Snapshot> {
        let image = self.platform.capture_screen().context("screen capture")?;
        Ok(Snapshot::new(image, Point::new(0, 0)))
    }

    /// Screen area covered by `region`, clipped to the screen bounds.
    pub fn capture_region(&self, region: Region) -> Result<Snapshot> {
        let full = self.capture()?;
        let l = region.l.clamp(0, full.width() as i32);
        let t = region.t.clamp(0, full.height() as i32);
        let r = region.r.clamp(0, full.width() as i32);
        let b = region.b.clamp(0, full.height() as i32);
        if r <= l || b <= t {
            bail!(
                "region ({}, {})-({}, {}) lies outside the {}x{} screen",
                region.l, region.t, region.r, region.b, full.width(), full.height()
            );
        }
        let image = imageops::crop_imm(&full.image, l as u32, t as u32, (r - l) as u32, (b - t) as u32)
            .to_image();
        Ok(Snapshot { image, origin: Point::new(l, t), taken_at: full.taken_at })
    }

    /// Area of the window `id`, clipped to the screen.
    pub fn capture_window(&self, id: WindowId) -> Result<Snapshot> {
        let region = self.platform.window_rect(id).context("window bounds")?;
        self.capture_region(region)
    }
}
