use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::logger;
use crate::matcher::{MatchMetric, MatchResult};
use crate::types::*;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const CROSS_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const CROSS_SIZE: f32 = 20.0;

/// Settings in effect when a record was taken, echoed into the report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportContext {
    pub window_title: String,
    pub threshold: f64,
    pub metric: MatchMetric,
    pub click_mode: ClickMode,
    pub offset: (i32, i32),
}

struct DebugRecord {
    snapshot: Snapshot,
    annotated: Option<RgbImage>,
    matched: Option<MatchResult>,
    ctx: ReportContext,
}

/// Keeps the most recent decision point so the operator can dump it to disk.
#[derive(Default)]
pub struct DebugRecorder {
    last: Option<DebugRecord>,
}

impl DebugRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the retained state.
    pub fn record(
        &mut self,
        snapshot: Snapshot,
        annotated: Option<RgbImage>,
        matched: Option<MatchResult>,
        ctx: ReportContext,
    ) {
        self.last = Some(DebugRecord { snapshot, annotated, matched, ctx });
    }

    pub fn clear(&mut self) {
        self.last = None;
    }

    pub fn has_snapshot(&self) -> bool {
        self.last.is_some()
    }

    pub fn last_match(&self) -> Option<&MatchResult> {
        self.last.as_ref().and_then(|r| r.matched.as_ref())
    }

    /// Text report for the retained record.
    pub fn report(&self) -> Option<String> {
        self.last.as_ref().map(render_report)
    }

    /// Write `screen_<ts>.png`, `result_<ts>.png` (when annotated) and
    /// `info_<ts>.txt` into `dir`. Returns the written paths.
    pub fn save(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let Some(record) = &self.last else {
            logger::warn_p("debug", "nothing to save: no snapshot recorded yet");
            return Ok(Vec::new());
        };
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

        let ts = record.snapshot.taken_at.format("%Y%m%d_%H%M%S_%3f");
        let mut written = Vec::new();

        let screen = dir.join(format!("screen_{}.png", ts));
        record
            .snapshot
            .image
            .save(&screen)
            .with_context(|| format!("write {}", screen.display()))?;
        written.push(screen);

        if let Some(annotated) = &record.annotated {
            let result = dir.join(format!("result_{}.png", ts));
            annotated.save(&result).with_context(|| format!("write {}", result.display()))?;
            written.push(result);
        }

        let info = dir.join(format!("info_{}.txt", ts));
        fs::write(&info, render_report(record)).with_context(|| format!("write {}", info.display()))?;
        written.push(info);

        logger::info_p("debug", &format!("saved {} files to {}", written.len(), dir.display()));
        Ok(written)
    }
}

fn render_report(record: &DebugRecord) -> String {
    let ctx = &record.ctx;
    let mut out = String::new();
    out.push_str(&format!("time: {}\n", record.snapshot.taken_at.format("%Y-%m-%d %H:%M:%S%.3f")));
    out.push_str(&format!("window: {}\n", ctx.window_title));
    out.push_str(&format!("threshold: {:.2}\n", ctx.threshold));
    out.push_str(&format!("metric: {}\n", ctx.metric));
    match &record.matched {
        Some(m) => {
            out.push_str(&format!("template: {}\n", m.template));
            out.push_str(&format!("location: ({}, {})\n", m.location.x, m.location.y));
            out.push_str(&format!("score: {:.4}\n", m.score));
        }
        None => out.push_str("match: none\n"),
    }
    out.push_str(&format!("click mode: {}\n", ctx.click_mode.label()));
    out.push_str(&format!("offset: ({}, {})\n", ctx.offset.0, ctx.offset.1));
    out
}

/// Copy of `image` with the match boxed and the click point crossed.
/// `click` is in image coordinates.
pub fn annotate(image: &RgbImage, m: &MatchResult, click: Point) -> RgbImage {
    let mut out = image.clone();
    // two nested 1px outlines give a 2px border
    draw_hollow_rect_mut(&mut out, Rect::at(m.location.x, m.location.y).of_size(m.width, m.height), BOX_COLOR);
    if m.width > 2 && m.height > 2 {
        draw_hollow_rect_mut(
            &mut out,
            Rect::at(m.location.x + 1, m.location.y + 1).of_size(m.width - 2, m.height - 2),
            BOX_COLOR,
        );
    }

    let (cx, cy) = (click.x as f32, click.y as f32);
    let half = CROSS_SIZE / 2.0;
    draw_line_segment_mut(&mut out, (cx - half, cy), (cx + half, cy), CROSS_COLOR);
    draw_line_segment_mut(&mut out, (cx, cy - half), (cx, cy + half), CROSS_COLOR);
    out
}
