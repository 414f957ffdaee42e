use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::lock;
use crate::logger;
use crate::matcher::MatchMetric;
use crate::types::ClickMode;

pub const THRESHOLD_RANGE: RangeInclusive<f64> = 0.1..=1.0;
pub const INTERVAL_RANGE: RangeInclusive<f64> = 0.1..=60.0;
/// Seconds between press/release pairs.
pub const CLICK_INTERVAL_RANGE: RangeInclusive<f64> = 0.0..=10.0;
/// Largest click offset, in pixels, on either axis.
pub const OFFSET_LIMIT: i32 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub title: String,
    /// Scan and click even when the target window is not active.
    pub ignore_window_state: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self { title: "Claude".to_string(), ignore_window_state: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub threshold: f64,
    pub metric: MatchMetric,
    /// Seconds between polls when nothing matched.
    pub interval: f64,
    pub templates: Vec<PathBuf>,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            metric: MatchMetric::CcoeffNormed,
            interval: 0.2,
            templates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickSettings {
    pub mode: ClickMode,
    pub count: u32,
    /// Seconds between press/release pairs.
    pub interval: f64,
    pub offset_x: i32,
    pub offset_y: i32,
    pub extra_click: bool,
}

impl Default for ClickSettings {
    fn default() -> Self {
        Self {
            mode: ClickMode::Auto,
            count: 2,
            interval: 0.05,
            offset_x: 0,
            offset_y: 0,
            extra_click: true,
        }
    }
}

impl ClickSettings {
    /// Pair spacing clamped into `CLICK_INTERVAL_RANGE`; NaN gives zero.
    pub fn interval(&self) -> Duration {
        clamped_secs(self.interval, &CLICK_INTERVAL_RANGE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub auto_start: bool,
    /// Save debug artifacts after every match.
    pub save_screenshots: bool,
    pub debug_dir: PathBuf,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            auto_start: false,
            save_screenshots: false,
            debug_dir: PathBuf::from("debug"),
        }
    }
}

/// Operator settings, persisted as TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub window: WindowSettings,
    pub detection: DetectionSettings,
    pub click: ClickSettings,
    pub app: AppSettings,
}

impl Config {
    /// Read `path`; a missing file gives defaults, a malformed one gives
    /// defaults and a warning.
    pub fn load(path: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                logger::warn(&format!("ignoring malformed settings {}: {}", path.display(), e));
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).context("serialize settings")?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        std::fs::write(path, text).with_context(|| format!("write {}", path.display()))
    }

    pub fn poll_interval(&self) -> Duration {
        clamped_secs(self.detection.interval, &INTERVAL_RANGE)
    }

    /// Range checks that gate Idle -> Running.
    pub fn validate_for_start(&self) -> Result<(), StartRejection> {
        if !THRESHOLD_RANGE.contains(&self.detection.threshold) {
            return Err(StartRejection::ThresholdOutOfRange(self.detection.threshold));
        }
        if !INTERVAL_RANGE.contains(&self.detection.interval) {
            return Err(StartRejection::IntervalOutOfRange(self.detection.interval));
        }
        if !CLICK_INTERVAL_RANGE.contains(&self.click.interval) {
            return Err(StartRejection::ClickIntervalOutOfRange(self.click.interval));
        }
        let (dx, dy) = (self.click.offset_x, self.click.offset_y);
        if dx.unsigned_abs() > OFFSET_LIMIT.unsigned_abs() || dy.unsigned_abs() > OFFSET_LIMIT.unsigned_abs() {
            return Err(StartRejection::OffsetOutOfRange(dx, dy));
        }
        Ok(())
    }
}

fn clamped_secs(secs: f64, range: &RangeInclusive<f64>) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(*range.start(), *range.end())).unwrap_or_default()
}

/// Why a start request was refused. Shown to the operator as is.
#[derive(Debug, Clone, PartialEq)]
pub enum StartRejection {
    ThresholdOutOfRange(f64),
    IntervalOutOfRange(f64),
    ClickIntervalOutOfRange(f64),
    OffsetOutOfRange(i32, i32),
    NoTemplates,
    AlreadyRunning,
    WorkerUnavailable(String),
}

impl fmt::Display for StartRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartRejection::ThresholdOutOfRange(v) => write!(
                f,
                "confidence {:.2} must be between {} and {}",
                v,
                THRESHOLD_RANGE.start(),
                THRESHOLD_RANGE.end()
            ),
            StartRejection::IntervalOutOfRange(v) => write!(
                f,
                "scan interval {:.2}s must be between {} and {} seconds",
                v,
                INTERVAL_RANGE.start(),
                INTERVAL_RANGE.end()
            ),
            StartRejection::ClickIntervalOutOfRange(v) => write!(
                f,
                "click interval {:.2}s must be between {} and {} seconds",
                v,
                CLICK_INTERVAL_RANGE.start(),
                CLICK_INTERVAL_RANGE.end()
            ),
            StartRejection::OffsetOutOfRange(dx, dy) => {
                write!(f, "click offset ({}, {}) must stay within {} pixels", dx, dy, OFFSET_LIMIT)
            }
            StartRejection::NoTemplates => f.write_str("add at least one template image first"),
            StartRejection::AlreadyRunning => f.write_str("detection is already running"),
            StartRejection::WorkerUnavailable(e) => write!(f, "cannot start the detection worker: {}", e),
        }
    }
}

impl std::error::Error for StartRejection {}

/// Shared, mutex-guarded config. Readers take a copy per use.
#[derive(Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<Mutex<Config>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self { inner: Arc::new(Mutex::new(config)) }
    }

    pub fn snapshot(&self) -> Config {
        lock(&self.inner).clone()
    }

    /// Apply `f` under the lock and return its result.
    pub fn update<R>(&self, f: impl FnOnce(&mut Config) -> R) -> R {
        f(&mut lock(&self.inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.window.title, "Claude");
        assert_eq!(c.detection.threshold, 0.6);
        assert_eq!(c.detection.interval, 0.2);
        assert_eq!(c.click.count, 2);
        assert_eq!(c.click.interval(), Duration::from_millis(50));
        assert!(c.click.extra_click);
        assert!(!c.app.auto_start);
        assert!(c.validate_for_start().is_ok());
    }

    #[test]
    fn round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let mut c = Config::default();
        c.window.title = "Other App".into();
        c.detection.metric = MatchMetric::SqdiffNormed;
        c.detection.templates = vec![PathBuf::from("/tmp/a.png")];
        c.click.mode = ClickMode::Background;
        c.click.offset_x = -4;
        c.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("[detection]"));
        assert!(text.contains("TM_SQDIFF_NORMED"));
        assert!(text.contains("mode = \"background\""));
        assert_eq!(Config::load(&path), c);
    }

    #[test]
    fn unknown_and_missing_keys_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[window]\ntitle = \"X\"\nfuture = 1\n\n[extra]\nkey = \"v\"\n").unwrap();
        let c = Config::load(&path);
        assert_eq!(c.window.title, "X");
        assert_eq!(c.detection, DetectionSettings::default());
    }

    #[test]
    fn missing_or_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Config::load(&dir.path().join("absent.toml")), Config::default());
        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[window\ntitle = ").unwrap();
        assert_eq!(Config::load(&bad), Config::default());
    }

    #[test]
    fn start_validation_bounds() {
        let mut c = Config::default();
        for bad in [0.05, 61.0] {
            c.detection.interval = bad;
            assert_eq!(c.validate_for_start(), Err(StartRejection::IntervalOutOfRange(bad)));
        }
        c.detection.interval = 60.0;
        assert!(c.validate_for_start().is_ok());
        c.detection.threshold = 0.09;
        assert!(matches!(c.validate_for_start(), Err(StartRejection::ThresholdOutOfRange(_))));
        c.detection.threshold = 1.0;
        assert!(c.validate_for_start().is_ok());
    }

    #[test]
    fn click_settings_are_range_checked() {
        let mut c = Config::default();
        c.click.interval = f64::INFINITY;
        assert_eq!(c.validate_for_start(), Err(StartRejection::ClickIntervalOutOfRange(f64::INFINITY)));
        assert_eq!(c.click.interval(), Duration::from_secs(10));
        c.click.interval = f64::NAN;
        assert_eq!(c.click.interval(), Duration::ZERO);
        c.click.interval = -3.0;
        assert_eq!(c.click.interval(), Duration::ZERO);

        c.click.interval = 0.05;
        c.click.offset_y = i32::MIN;
        assert_eq!(c.validate_for_start(), Err(StartRejection::OffsetOutOfRange(0, i32::MIN)));
        c.click.offset_y = -OFFSET_LIMIT;
        assert!(c.validate_for_start().is_ok());
    }

    #[test]
    fn infinite_click_interval_loads_but_cannot_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[click]\ninterval = inf\n").unwrap();
        let c = Config::load(&path);
        assert!(c.click.interval.is_infinite());
        assert!(matches!(c.validate_for_start(), Err(StartRejection::ClickIntervalOutOfRange(_))));
    }

    #[test]
    fn handle_updates_are_seen_by_snapshots() {
        let h = ConfigHandle::new(Config::default());
        let before = h.snapshot();
        h.update(|c| c.detection.threshold = 0.8);
        assert_eq!(before.detection.threshold, 0.6);
        assert_eq!(h.snapshot().detection.threshold, 0.8);
    }
}
