use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{Rgb, RgbImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::logger;
use crate::types::Point;

/// Template-matching similarity measure. Names follow the OpenCV constants
/// operators already know from other tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMetric {
    /// Normalized correlation coefficient; higher is better.
    #[default]
    #[serde(rename = "TM_CCOEFF_NORMED")]
    CcoeffNormed,
    /// Normalized cross-correlation; higher is better.
    #[serde(rename = "TM_CCORR_NORMED")]
    CcorrNormed,
    /// Normalized squared difference; lower is better.
    #[serde(rename = "TM_SQDIFF_NORMED")]
    SqdiffNormed,
}

impl MatchMetric {
    pub fn label(self) -> &'static str {
        match self {
            MatchMetric::CcoeffNormed => "TM_CCOEFF_NORMED",
            MatchMetric::CcorrNormed => "TM_CCORR_NORMED",
            MatchMetric::SqdiffNormed => "TM_SQDIFF_NORMED",
        }
    }

    pub fn next(self) -> Self {
        match self {
            MatchMetric::CcoeffNormed => MatchMetric::CcorrNormed,
            MatchMetric::CcorrNormed => MatchMetric::SqdiffNormed,
            MatchMetric::SqdiffNormed => MatchMetric::CcoeffNormed,
        }
    }

    pub fn lower_is_better(self) -> bool {
        self == MatchMetric::SqdiffNormed
    }

    /// Map a raw surface value onto the shared higher-is-better scale.
    pub fn uniform_score(self, raw: f64) -> f64 {
        if self.lower_is_better() {
            1.0 - raw
        } else {
            raw
        }
    }
}

impl fmt::Display for MatchMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug)]
pub enum TemplateError {
    Duplicate(String),
    Unreadable { path: PathBuf, reason: String },
    Empty(String),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::Duplicate(name) => write!(f, "template {} is already loaded", name),
            TemplateError::Unreadable { path, reason } => {
                write!(f, "cannot read template {}: {}", path.display(), reason)
            }
            TemplateError::Empty(name) => write!(f, "template {} has no pixels", name),
        }
    }
}

impl std::error::Error for TemplateError {}

/// Where a template comes from. Resolved once into a decoded `Template`.
pub enum TemplateSource {
    FilePath(PathBuf),
    Decoded { name: String, image: RgbImage },
}

/// A decoded reference raster, immutable once loaded.
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub path: Option<PathBuf>,
    pub image: RgbImage,
}

impl Template {
    pub fn load(source: TemplateSource) -> Result<Self, TemplateError> {
        let template = match source {
            TemplateSource::FilePath(path) => {
                let image = image::open(&path)
                    .map_err(|e| TemplateError::Unreadable { path: path.clone(), reason: e.to_string() })?
                    .to_rgb8();
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                Template { name, path: Some(path), image }
            }
            TemplateSource::Decoded { name, image } => Template { name, path: None, image },
        };
        if template.image.width() == 0 || template.image.height() == 0 {
            return Err(TemplateError::Empty(template.name));
        }
        Ok(template)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    fn same_source(&self, path: Option<&Path>, name: &str) -> bool {
        match (&self.path, path) {
            (Some(a), Some(b)) => same_file(a, b),
            (None, None) => self.name == name,
            _ => false,
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Operator-managed templates: insertion ordered, no duplicate sources.
/// Cloning shares the decoded images, so a matcher can work on a copy
/// without holding the owner's lock.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    items: Vec<Arc<Template>>,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every path, logging and skipping the ones that fail.
    pub fn load_paths(paths: &[PathBuf]) -> Self {
        let mut set = Self::new();
        for path in paths {
            if let Err(e) = set.add_path(path) {
                logger::warn_p("match", &e.to_string());
            }
        }
        set
    }

    /// Decode and append. Returns the new template's index.
    pub fn add(&mut self, source: TemplateSource) -> Result<usize, TemplateError> {
        let (path, name) = match &source {
            TemplateSource::FilePath(p) => (Some(p.as_path()), p.display().to_string()),
            TemplateSource::Decoded { name, .. } => (None, name.clone()),
        };
        if self.items.iter().any(|t| t.same_source(path, &name)) {
            return Err(TemplateError::Duplicate(name));
        }
        let template = Template::load(source)?;
        self.items.push(Arc::new(template));
        Ok(self.items.len() - 1)
    }

    pub fn add_path(&mut self, path: impl AsRef<Path>) -> Result<usize, TemplateError> {
        self.add(TemplateSource::FilePath(path.as_ref().to_path_buf()))
    }

    pub fn remove(&mut self, index: usize) -> Option<Arc<Template>> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    pub fn get(&self, index: usize) -> Option<&Template> {
        self.items.get(index).map(Arc::as_ref)
    }

    /// Shared handle to one template, usable after the set is unlocked.
    pub fn shared(&self, index: usize) -> Option<Arc<Template>> {
        self.items.get(index).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.items.iter().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// File paths in insertion order, for persisting the set.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.items.iter().filter_map(|t| t.path.clone()).collect()
    }
}

/// Conventional file names picked up at startup when present.
pub const DEFAULT_TEMPLATE_NAMES: [&str; 5] = ["1.png", "2.png", "3.png", "4.png", "allow_button.png"];

pub fn discover_defaults(dir: &Path) -> Vec<PathBuf> {
    DEFAULT_TEMPLATE_NAMES
        .iter()
        .map(|n| dir.join(n))
        .filter(|p| p.is_file())
        .collect()
}

/// Best location of one template on one screen.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Uniform higher-is-better score.
    pub score: f64,
    /// Top-left corner of the match, in snapshot pixels.
    pub location: Point,
    pub template: String,
    pub width: u32,
    pub height: u32,
}

impl MatchResult {
    pub fn center(&self) -> Point {
        self.location.offset((self.width / 2) as i32, (self.height / 2) as i32)
    }
}

/// Raw per-position metric values, (W - w + 1) x (H - h + 1).
pub struct MatchSurface {
    pub width: u32,
    pub height: u32,
    values: Vec<f64>,
}

impl MatchSurface {
    pub fn get(&self, x: u32, y: u32) -> f64 {
        self.values[(y * self.width + x) as usize]
    }

    /// Global optimum for `metric`. The first position in row-major order wins ties.
    pub fn optimum(&self, metric: MatchMetric) -> (Point, f64) {
        let mut best_idx = 0;
        let mut best = self.values[0];
        for (i, &v) in self.values.iter().enumerate().skip(1) {
            let better = if metric.lower_is_better() { v < best } else { v > best };
            if better {
                best = v;
                best_idx = i;
            }
        }
        let x = (best_idx % self.width as usize) as i32;
        let y = (best_idx / self.width as usize) as i32;
        (Point::new(x, y), best)
    }
}

/// Summed-area tables of the screen: one per channel plus the sum of squares.
struct Integrals {
    stride: usize,
    sum: [Vec<f64>; 3],
    sq: Vec<f64>,
}

impl Integrals {
    fn new(img: &RgbImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sum = [vec![0.0; stride * (h + 1)], vec![0.0; stride * (h + 1)], vec![0.0; stride * (h + 1)]];
        let mut sq = vec![0.0; stride * (h + 1)];
        let raw = img.as_raw();
        for y in 0..h {
            let mut row = [0.0f64; 3];
            let mut row_sq = 0.0f64;
            for x in 0..w {
                let px = &raw[(y * w + x) * 3..(y * w + x) * 3 + 3];
                for c in 0..3 {
                    let v = px[c] as f64;
                    row[c] += v;
                    row_sq += v * v;
                }
                let at = (y + 1) * stride + x + 1;
                let above = y * stride + x + 1;
                for c in 0..3 {
                    sum[c][at] = sum[c][above] + row[c];
                }
                sq[at] = sq[above] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    fn rect(table: &[f64], stride: usize, x: usize, y: usize, w: usize, h: usize) -> f64 {
        table[(y + h) * stride + x + w] - table[y * stride + x + w] - table[(y + h) * stride + x]
            + table[y * stride + x]
    }

    /// Per-channel sums and the sum of squares over a w x h window.
    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> ([f64; 3], f64) {
        let s = [
            Self::rect(&self.sum[0], self.stride, x, y, w, h),
            Self::rect(&self.sum[1], self.stride, x, y, w, h),
            Self::rect(&self.sum[2], self.stride, x, y, w, h),
        ];
        (s, Self::rect(&self.sq, self.stride, x, y, w, h))
    }
}

/// Searches visiting more template pixels than this run coarse to fine.
const EXHAUSTIVE_BUDGET: usize = 1 << 24;
/// Halving stops before the template's short side drops below this.
const MIN_PYRAMID_SIDE: usize = 6;
const MAX_PYRAMID_LEVELS: usize = 4;
/// Coarse peaks carried down to full resolution.
const COARSE_PEAKS: usize = 8;
/// Positions searched on each side of a candidate after doubling.
const REFINE_RADIUS: usize = 2;

/// Mirrors OpenCV's handling of near-zero denominators so scores stay in range.
fn normalize(num: f64, denom: f64, metric: MatchMetric) -> f64 {
    if num.abs() < denom {
        num / denom
    } else if num.abs() < denom * 1.125 {
        if num > 0.0 { 1.0 } else { -1.0 }
    } else if metric.lower_is_better() {
        1.0
    } else {
        0.0
    }
}

/// Raw value on the higher-is-better scale, with NaN ranked last.
fn rank(metric: MatchMetric, raw: f64) -> f64 {
    let score = metric.uniform_score(raw);
    if score.is_nan() { f64::NEG_INFINITY } else { score }
}

/// Per-position scoring of one template against one screen, all three channels summed.
struct Scorer<'a> {
    metric: MatchMetric,
    screen: &'a RgbImage,
    tw: usize,
    th: usize,
    n: f64,
    /// Template samples, zero-mean per channel for the correlation coefficient.
    tpl: Vec<f64>,
    t_sq: f64,
    t_norm: f64,
    /// Window sums come from here when set, else straight from the pixels.
    integrals: Option<Integrals>,
}

impl<'a> Scorer<'a> {
    fn new(screen: &'a RgbImage, template: &RgbImage, metric: MatchMetric, dense: bool) -> Self {
        let (tw, th) = (template.width() as usize, template.height() as usize);
        let n = (tw * th) as f64;
        let mut tpl: Vec<f64> = template.as_raw().iter().map(|&v| v as f64).collect();
        let t_sq: f64 = tpl.iter().map(|v| v * v).sum();
        if metric == MatchMetric::CcoeffNormed {
            // zero-mean template: the cross term then needs no screen mean
            let mut mean = [0.0f64; 3];
            for px in tpl.chunks_exact(3) {
                for c in 0..3 {
                    mean[c] += px[c];
                }
            }
            for m in mean.iter_mut() {
                *m /= n;
            }
            for px in tpl.chunks_exact_mut(3) {
                for c in 0..3 {
                    px[c] -= mean[c];
                }
            }
        }
        let t_norm = if metric == MatchMetric::CcoeffNormed {
            tpl.iter().map(|v| v * v).sum::<f64>().sqrt()
        } else {
            t_sq.sqrt()
        };
        Self {
            metric,
            screen,
            tw,
            th,
            n,
            tpl,
            t_sq,
            t_norm,
            integrals: dense.then(|| Integrals::new(screen)),
        }
    }

    fn window(&self, x: usize, y: usize) -> ([f64; 3], f64) {
        if let Some(integrals) = &self.integrals {
            return integrals.window(x, y, self.tw, self.th);
        }
        let sw = self.screen.width() as usize;
        let raw = self.screen.as_raw();
        let mut sums = [0.0f64; 3];
        let mut sq = 0.0f64;
        for j in 0..self.th {
            let start = ((y + j) * sw + x) * 3;
            for px in raw[start..start + self.tw * 3].chunks_exact(3) {
                for c in 0..3 {
                    let v = px[c] as f64;
                    sums[c] += v;
                    sq += v * v;
                }
            }
        }
        (sums, sq)
    }

    fn score(&self, x: usize, y: usize) -> f64 {
        let sw = self.screen.width() as usize;
        let raw = self.screen.as_raw();
        let row_len = self.tw * 3;
        let mut cross = 0.0f64;
        for j in 0..self.th {
            let start = ((y + j) * sw + x) * 3;
            let srow = &raw[start..start + row_len];
            let trow = &self.tpl[j * row_len..(j + 1) * row_len];
            cross += trow.iter().zip(srow).map(|(t, &s)| t * s as f64).sum::<f64>();
        }
        let (sums, wnd_sq) = self.window(x, y);
        match self.metric {
            MatchMetric::CcoeffNormed => {
                let wnd_mean_sq: f64 = sums.iter().map(|s| s * s / self.n).sum();
                let denom = (wnd_sq - wnd_mean_sq).max(0.0).sqrt() * self.t_norm;
                normalize(cross, denom, self.metric)
            }
            MatchMetric::CcorrNormed => normalize(cross, wnd_sq.sqrt() * self.t_norm, self.metric),
            MatchMetric::SqdiffNormed => {
                let num = (wnd_sq - 2.0 * cross + self.t_sq).max(0.0);
                normalize(num, wnd_sq.sqrt() * self.t_norm, self.metric)
            }
        }
    }
}

fn fits(screen: &RgbImage, template: &RgbImage) -> bool {
    let (tw, th) = template.dimensions();
    tw > 0 && th > 0 && tw <= screen.width() && th <= screen.height()
}

/// Compute the match surface of `template` over `screen`, summing all three
/// channels. Returns None when the template does not fit inside the screen.
pub fn match_surface(screen: &RgbImage, template: &RgbImage, metric: MatchMetric) -> Option<MatchSurface> {
    if !fits(screen, template) {
        return None;
    }
    let rw = (screen.width() - template.width() + 1) as usize;
    let rh = (screen.height() - template.height() + 1) as usize;
    let scorer = Scorer::new(screen, template, metric, true);

    let mut values = vec![0.0f64; rw * rh];
    values.par_chunks_mut(rw).enumerate().for_each(|(y, row)| {
        for (x, out) in row.iter_mut().enumerate() {
            *out = scorer.score(x, y);
        }
    });
    Some(MatchSurface { width: rw as u32, height: rh as u32, values })
}

/// Template pixels visited by an exhaustive search.
fn search_cost(sw: usize, sh: usize, tw: usize, th: usize) -> usize {
    (sw - tw + 1) * (sh - th + 1) * tw * th
}

/// Number of halvings applied before the coarse pass. Zero means the search
/// is cheap enough to run exhaustively at full resolution.
fn pyramid_depth(sw: u32, sh: u32, tw: u32, th: u32) -> usize {
    let (mut sw, mut sh, mut tw, mut th) = (sw as usize, sh as usize, tw as usize, th as usize);
    let mut depth = 0;
    while depth < MAX_PYRAMID_LEVELS
        && search_cost(sw, sh, tw, th) > EXHAUSTIVE_BUDGET
        && tw.min(th) / 2 >= MIN_PYRAMID_SIDE
    {
        (sw, sh, tw, th) = (sw / 2, sh / 2, tw / 2, th / 2);
        depth += 1;
    }
    depth
}

/// 2x2 box downsample; an odd last row or column is dropped.
fn half(img: &RgbImage) -> RgbImage {
    RgbImage::from_fn(img.width() / 2, img.height() / 2, |x, y| {
        let mut acc = [0u32; 3];
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let p = img.get_pixel(2 * x + dx, 2 * y + dy);
            for c in 0..3 {
                acc[c] += p[c] as u32;
            }
        }
        Rgb(acc.map(|v| ((v + 2) / 4) as u8))
    })
}

/// Levels 1..=depth of a halving pyramid. Level 0 is the image itself.
fn pyramid(img: &RgbImage, depth: usize) -> Vec<RgbImage> {
    let mut levels: Vec<RgbImage> = Vec::with_capacity(depth);
    for _ in 0..depth {
        let next = half(levels.last().unwrap_or(img));
        levels.push(next);
    }
    levels
}

fn level<'a>(levels: &'a [RgbImage], original: &'a RgbImage, l: usize) -> &'a RgbImage {
    if l == 0 { original } else { &levels[l - 1] }
}

/// Best `count` positions of a surface, at least one template half-size apart.
fn peaks(surface: &MatchSurface, metric: MatchMetric, count: usize, spread: (i32, i32)) -> Vec<Point> {
    let w = surface.width as usize;
    let mut order: Vec<usize> = (0..surface.values.len()).collect();
    order.par_sort_unstable_by(|&a, &b| {
        rank(metric, surface.values[b])
            .total_cmp(&rank(metric, surface.values[a]))
            .then(a.cmp(&b))
    });
    let mut picked: Vec<Point> = Vec::with_capacity(count);
    for idx in order {
        let p = Point::new((idx % w) as i32, (idx / w) as i32);
        if picked.iter().all(|q| (q.x - p.x).abs() > spread.0 || (q.y - p.y).abs() > spread.1) {
            picked.push(p);
            if picked.len() == count {
                break;
            }
        }
    }
    picked
}

/// Best raw value in a small neighbourhood of `center`. Row-major first wins ties.
fn refine(scorer: &Scorer, center: Point, rw: usize, rh: usize) -> (Point, f64) {
    let cx = (center.x.max(0) as usize).min(rw - 1);
    let cy = (center.y.max(0) as usize).min(rh - 1);
    let mut best = (Point::new(cx as i32, cy as i32), f64::NAN);
    for y in cy.saturating_sub(REFINE_RADIUS)..=(cy + REFINE_RADIUS).min(rh - 1) {
        for x in cx.saturating_sub(REFINE_RADIUS)..=(cx + REFINE_RADIUS).min(rw - 1) {
            let v = scorer.score(x, y);
            if best.1.is_nan() || rank(scorer.metric, v) > rank(scorer.metric, best.1) {
                best = (Point::new(x as i32, y as i32), v);
            }
        }
    }
    best
}

/// Optimum position and raw value of `template` on `screen`.
///
/// Small searches score every position. Large ones score a halved pyramid
/// level exhaustively, then follow the strongest coarse peaks back down,
/// rescoring a few positions around each at every finer level.
pub fn locate(screen: &RgbImage, template: &RgbImage, metric: MatchMetric) -> Option<(Point, f64)> {
    if !fits(screen, template) {
        return None;
    }
    let depth = pyramid_depth(screen.width(), screen.height(), template.width(), template.height());
    if depth == 0 {
        return match_surface(screen, template, metric).map(|s| s.optimum(metric));
    }

    let screens = pyramid(screen, depth);
    let templates = pyramid(template, depth);
    let (coarse_screen, coarse_tpl) = (&screens[depth - 1], &templates[depth - 1]);

    let surface = match_surface(coarse_screen, coarse_tpl, metric)?;
    let spread = ((coarse_tpl.width() / 2) as i32, (coarse_tpl.height() / 2) as i32);
    let mut candidates: Vec<(Point, f64)> = peaks(&surface, metric, COARSE_PEAKS, spread)
        .into_iter()
        .map(|p| (p, surface.get(p.x as u32, p.y as u32)))
        .collect();

    for l in (0..depth).rev() {
        let s = level(&screens, screen, l);
        let t = level(&templates, template, l);
        let rw = (s.width() - t.width() + 1) as usize;
        let rh = (s.height() - t.height() + 1) as usize;
        let scorer = Scorer::new(s, t, metric, false);
        candidates = candidates
            .par_iter()
            .map(|(p, _)| refine(&scorer, Point::new(p.x * 2, p.y * 2), rw, rh))
            .collect();
    }

    candidates.into_iter().reduce(|best, c| {
        let (rb, rc) = (rank(metric, best.1), rank(metric, c.1));
        let earlier = (c.0.y, c.0.x) < (best.0.y, best.0.x);
        if rc > rb || (rc == rb && earlier) { c } else { best }
    })
}

/// Best position and uniform score of a single template.
pub fn best_match(screen: &RgbImage, template: &Template, metric: MatchMetric) -> Option<MatchResult> {
    let (location, raw) = locate(screen, &template.image, metric)?;
    Some(MatchResult {
        score: metric.uniform_score(raw),
        location,
        template: template.name.clone(),
        width: template.width(),
        height: template.height(),
    })
}

/// Highest-scoring template regardless of threshold. Equal scores keep the
/// earlier template. Templates that cannot be matched are logged and skipped.
pub fn best_candidate(screen: &RgbImage, templates: &TemplateSet, metric: MatchMetric) -> Option<MatchResult> {
    let mut best: Option<MatchResult> = None;
    for template in templates.iter() {
        let Some(candidate) = best_match(screen, template, metric) else {
            logger::warn_p(
                "match",
                &format!(
                    "skipping {}: {}x{} template does not fit the {}x{} screen",
                    template.name,
                    template.width(),
                    template.height(),
                    screen.width(),
                    screen.height()
                ),
            );
            continue;
        };
        if !candidate.score.is_finite() {
            continue;
        }
        if best.as_ref().map_or(true, |b| candidate.score > b.score) {
            best = Some(candidate);
        }
    }
    best
}

/// Best match across all templates, reported only when it reaches `threshold`.
pub fn match_all(
    screen: &RgbImage,
    templates: &TemplateSet,
    metric: MatchMetric,
    threshold: f64,
) -> Option<MatchResult> {
    best_candidate(screen, templates, metric).filter(|m| m.score >= threshold)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::imageops;
    use std::time::{Duration, Instant};

    /// Deterministic textured image.
    pub(crate) fn noise(width: u32, height: u32, seed: u32) -> RgbImage {
        let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
        RgbImage::from_fn(width, height, |_, _| {
            let mut next = || {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state & 0xff) as u8
            };
            Rgb([next(), next(), next()])
        })
    }

    pub(crate) fn decoded(name: &str, image: RgbImage) -> TemplateSource {
        TemplateSource::Decoded { name: name.to_string(), image }
    }

    fn crop(img: &RgbImage, x: u32, y: u32, w: u32, h: u32) -> RgbImage {
        imageops::crop_imm(img, x, y, w, h).to_image()
    }

    const METRICS: [MatchMetric; 3] =
        [MatchMetric::CcoeffNormed, MatchMetric::CcorrNormed, MatchMetric::SqdiffNormed];

    #[test]
    fn exact_copy_is_found_at_its_location() {
        let screen = noise(96, 64, 7);
        let tpl = crop(&screen, 41, 23, 16, 12);
        let mut set = TemplateSet::new();
        set.add(decoded("button", tpl)).unwrap();

        for metric in METRICS {
            let best = best_candidate(&screen, &set, metric).unwrap();
            assert_eq!(best.location, Point::new(41, 23), "{}", metric);
            assert!(best.score > 0.999, "{}: {}", metric, best.score);

            let mut t = 0.1;
            while t <= best.score.min(1.0) {
                let m = match_all(&screen, &set, metric, t).unwrap();
                assert_eq!(m.location, Point::new(41, 23));
                t += 0.05;
            }
        }
    }

    #[test]
    fn nothing_reported_below_threshold() {
        let screen = noise(80, 60, 1);
        let mut set = TemplateSet::new();
        set.add(decoded("absent", noise(12, 10, 99))).unwrap();

        let best = best_candidate(&screen, &set, MatchMetric::CcoeffNormed).unwrap();
        assert!(best.score < 0.9);
        for step in 0..=18 {
            let t = 0.1 + step as f64 * 0.05;
            let found = match_all(&screen, &set, MatchMetric::CcoeffNormed, t);
            assert_eq!(found.is_some(), best.score >= t, "threshold {}", t);
        }
    }

    #[test]
    fn higher_score_wins_regardless_of_order() {
        let screen = noise(90, 70, 3);
        let exact = crop(&screen, 10, 12, 14, 10);
        let mut damaged = crop(&screen, 60, 40, 14, 10);
        for x in 0..7 {
            damaged.put_pixel(x, 4, Rgb([255, 0, 255]));
        }

        for order in [["exact", "damaged"], ["damaged", "exact"]] {
            let mut set = TemplateSet::new();
            for name in order {
                let img = if name == "exact" { exact.clone() } else { damaged.clone() };
                set.add(decoded(name, img)).unwrap();
            }
            let best = match_all(&screen, &set, MatchMetric::CcoeffNormed, 0.5).unwrap();
            assert_eq!(best.template, "exact");
            assert_eq!(best.location, Point::new(10, 12));
        }
    }

    #[test]
    fn equal_scores_keep_first_inserted() {
        let screen = noise(70, 50, 5);
        let tpl = crop(&screen, 30, 20, 12, 9);
        for (first, second) in [("a", "b"), ("b", "a")] {
            let mut set = TemplateSet::new();
            set.add(decoded(first, tpl.clone())).unwrap();
            set.add(decoded(second, tpl.clone())).unwrap();
            let best = match_all(&screen, &set, MatchMetric::SqdiffNormed, 0.5).unwrap();
            assert_eq!(best.template, first);
        }
    }

    /// Noise upscaled so features span several pixels, like rendered UI.
    fn smooth(width: u32, height: u32, seed: u32) -> RgbImage {
        imageops::resize(&noise(width / 8, height / 8, seed), width, height, imageops::FilterType::Triangle)
    }

    #[test]
    fn large_screens_are_searched_coarse_to_fine() {
        assert_eq!(pyramid_depth(96, 64, 16, 12), 0);
        assert_eq!(pyramid_depth(1920, 1080, 90, 30), 2);

        let screen = smooth(1280, 720, 21);
        let mut set = TemplateSet::new();
        set.add(decoded("button", crop(&screen, 613, 347, 96, 32))).unwrap();
        assert!(pyramid_depth(1280, 720, 96, 32) > 0);

        for metric in [MatchMetric::CcoeffNormed, MatchMetric::SqdiffNormed] {
            let started = Instant::now();
            let best = match_all(&screen, &set, metric, 0.9).unwrap();
            assert!(started.elapsed() < Duration::from_secs(10), "{} took {:?}", metric, started.elapsed());
            assert_eq!(best.location, Point::new(613, 347), "{}", metric);
            assert!(best.score > 0.999, "{}: {}", metric, best.score);
        }
    }

    #[test]
    fn coarse_search_agrees_with_full_surface_on_aligned_copy() {
        let screen = noise(300, 200, 8);
        let tpl = crop(&screen, 150, 100, 48, 24);
        assert_eq!(pyramid_depth(300, 200, 48, 24), 1);
        let full = match_surface(&screen, &tpl, MatchMetric::CcoeffNormed).unwrap().optimum(MatchMetric::CcoeffNormed);
        let fast = locate(&screen, &tpl, MatchMetric::CcoeffNormed).unwrap();
        assert_eq!(fast.0, full.0);
        assert!((fast.1 - full.1).abs() < 1e-9);
    }

    #[test]
    fn halving_averages_blocks() {
        let img = RgbImage::from_fn(5, 3, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 7]));
        let h = half(&img);
        assert_eq!(h.dimensions(), (2, 1));
        assert_eq!(h.get_pixel(0, 0), &Rgb([5, 5, 7]));
        assert_eq!(h.get_pixel(1, 0), &Rgb([25, 5, 7]));
    }

    #[test]
    fn cloned_set_shares_images() {
        let mut set = TemplateSet::new();
        set.add(decoded("a", noise(4, 4, 1))).unwrap();
        let copy = set.clone();
        assert!(Arc::ptr_eq(&set.shared(0).unwrap(), &copy.shared(0).unwrap()));
        set.remove(0);
        assert_eq!(copy.len(), 1);
    }

    #[test]
    fn squared_difference_is_inverted() {
        let m = MatchMetric::SqdiffNormed;
        assert_eq!(m.uniform_score(0.0), 1.0);
        assert_eq!(m.uniform_score(1.0), 0.0);
        assert_eq!(MatchMetric::CcoeffNormed.uniform_score(0.25), 0.25);
    }

    #[test]
    fn flat_window_scores_zero_for_correlation_coefficient() {
        let screen = RgbImage::from_pixel(40, 30, Rgb([120, 120, 120]));
        let surface = match_surface(&screen, &noise(8, 8, 2), MatchMetric::CcoeffNormed).unwrap();
        assert_eq!(surface.get(0, 0), 0.0);
        assert_eq!((surface.width, surface.height), (33, 23));
    }

    #[test]
    fn oversized_template_is_skipped() {
        let screen = noise(20, 20, 4);
        let mut set = TemplateSet::new();
        set.add(decoded("huge", noise(30, 10, 1))).unwrap();
        set.add(decoded("fits", crop(&screen, 2, 3, 6, 6))).unwrap();
        let best = match_all(&screen, &set, MatchMetric::CcorrNormed, 0.9).unwrap();
        assert_eq!(best.template, "fits");
    }

    #[test]
    fn duplicate_sources_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allow.png");
        noise(6, 4, 1).save(&path).unwrap();

        let mut set = TemplateSet::new();
        assert_eq!(set.add_path(&path).unwrap(), 0);
        assert!(matches!(set.add_path(&path), Err(TemplateError::Duplicate(_))));
        set.add(decoded("allow.png", noise(6, 4, 2))).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.paths(), vec![path]);
        assert_eq!(set.get(0).unwrap().name, "allow.png");
    }

    #[test]
    fn unreadable_paths_are_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        noise(5, 5, 3).save(&good).unwrap();
        let bad = dir.path().join("bad.png");
        fs::write(&bad, b"not an image").unwrap();
        let missing = dir.path().join("missing.png");

        let set = TemplateSet::load_paths(&[bad, good.clone(), missing]);
        assert_eq!(set.paths(), vec![good]);
    }

    #[test]
    fn remove_keeps_order() {
        let mut set = TemplateSet::new();
        for name in ["a", "b", "c"] {
            set.add(decoded(name, noise(3, 3, 1))).unwrap();
        }
        assert_eq!(set.remove(1).unwrap().name, "b");
        assert!(set.remove(5).is_none());
        let names: Vec<_> = set.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["a", "c"]);
    }

    #[test]
    fn defaults_are_discovered_by_name() {
        let dir = tempfile::tempdir().unwrap();
        noise(2, 2, 1).save(dir.path().join("2.png")).unwrap();
        noise(2, 2, 1).save(dir.path().join("allow_button.png")).unwrap();
        noise(2, 2, 1).save(dir.path().join("other.png")).unwrap();
        let found = discover_defaults(dir.path());
        assert_eq!(found, vec![dir.path().join("2.png"), dir.path().join("allow_button.png")]);
    }

    #[test]
    fn center_uses_integer_halves() {
        let m = MatchResult { score: 1.0, location: Point::new(10, 20), template: "t".into(), width: 15, height: 8 };
        assert_eq!(m.center(), Point::new(17, 24));
    }
}
