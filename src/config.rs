//! Render constants and scheduler settings.
//!
//! Everything here is plain data with serde derives so front-ends can load an
//! optional `config.json`; missing fields fall back to the defaults below.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::Point;
use crate::registry::Stage;
use crate::surface::{Color, Font, Outline};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config i/o: {0}")]
    Io(#[from] io::Error),
    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Horizontal center of each stage column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageColumns {
    pub input: f32,
    pub conv: f32,
    pub relu_pool: f32,
    pub flatten: f32,
    pub fc: f32,
    pub softmax: f32,
}

impl Default for StageColumns {
    fn default() -> Self {
        Self {
            input: 160.0,
            conv: 420.0,
            relu_pool: 600.0,
            flatten: 760.0,
            fc: 940.0,
            softmax: 1300.0,
        }
    }
}

impl StageColumns {
    pub fn x(&self, stage: Stage) -> f32 {
        match stage {
            Stage::Input => self.input,
            Stage::Conv => self.conv,
            Stage::ReluPool => self.relu_pool,
            Stage::Flatten => self.flatten,
            Stage::Fc => self.fc,
            Stage::Softmax => self.softmax,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Palette {
    pub background: Color,
    pub title: Color,
    pub text: Color,
    pub input_box: Color,
    pub conv_box: Color,
    pub relu_pool_box: Color,
    pub flatten_circle: Color,
    pub neuron_fill: Color,
    pub neuron_outline: Color,
    pub edge: Color,
    pub arrow: Color,
    pub affirmative: Color,
    pub negative: Color,
    pub ground_truth: Color,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            background: Color::WHITE,
            title: Color::gray(0x33),
            text: Color::BLACK,
            input_box: Color::rgb(0xa9, 0xa9, 0xa9),
            conv_box: Color::rgb(0x87, 0xce, 0xeb),
            relu_pool_box: Color::rgb(0xc0, 0xc0, 0xc0),
            flatten_circle: Color::rgb(0xff, 0xa5, 0x00),
            neuron_fill: Color::WHITE,
            neuron_outline: Color::BLACK,
            edge: Color::gray(0x55),
            arrow: Color::gray(0x33),
            affirmative: Color::GREEN,
            negative: Color::RED,
            ground_truth: Color::BLUE,
        }
    }
}

/// Fixed layout configuration, computed once per process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConstants {
    pub columns: StageColumns,
    pub y_center: f32,
    pub title_y: f32,

    pub box_scale: f32,
    pub box_density: f32,
    pub min_box_size: f32,

    /// `C x H x W` of one input sample.
    pub input_dims: [usize; 3],
    pub input_display: usize,

    pub filter_count: usize,
    pub filter_display: usize,
    pub filter_spacing: f32,

    /// `C x H x W` after activation and pooling.
    pub pooled_dims: [usize; 3],

    pub flatten_base_radius: f32,
    pub flatten_radius_eps: f32,
    pub flatten_gap: f32,

    pub neuron_count: usize,
    pub neuron_radius: f32,
    pub neuron_spacing: f32,

    /// Gap between a stage's edge and the start of a connecting arrow.
    pub edge_margin: f32,

    /// Offset of the prediction text below `y_center`.
    pub output_text_offset: f32,
    pub text_line: f32,
    pub topk_line: f32,
    pub top_k: usize,

    pub legend_origin: Point,
    pub placeholder_seed: u64,

    pub title_font: Font,
    pub label_font: Font,
    pub small_font: Font,

    pub default_outline_width: f32,
    pub highlight_width: f32,

    pub palette: Palette,
}

impl Default for RenderConstants {
    fn default() -> Self {
        Self {
            columns: StageColumns::default(),
            y_center: 300.0,
            title_y: 50.0,
            box_scale: 4.0,
            box_density: 0.1,
            min_box_size: 100.0,
            input_dims: [1, 28, 28],
            input_display: 280,
            filter_count: 8,
            filter_display: 140,
            filter_spacing: 20.0,
            pooled_dims: [8, 14, 14],
            flatten_base_radius: 20.0,
            flatten_radius_eps: 0.05,
            flatten_gap: 30.0,
            neuron_count: 10,
            neuron_radius: 15.0,
            neuron_spacing: 10.0,
            edge_margin: 20.0,
            output_text_offset: 240.0,
            text_line: 30.0,
            topk_line: 20.0,
            top_k: 3,
            legend_origin: Point::new(100.0, 960.0),
            placeholder_seed: 0x5eed,
            title_font: Font::bold(14.0),
            label_font: Font::plain(12.0),
            small_font: Font::plain(10.0),
            default_outline_width: 1.0,
            highlight_width: 2.0,
            palette: Palette::default(),
        }
    }
}

impl RenderConstants {
    pub fn default_outline(&self) -> Outline {
        Outline::new(self.palette.neuron_outline, self.default_outline_width)
    }

    pub fn flattened_len(&self) -> usize {
        self.pooled_dims.iter().product()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.neuron_count == 0 {
            return Err(ConfigError::Invalid("neuron_count must be > 0".into()));
        }
        if self.top_k > self.neuron_count {
            return Err(ConfigError::Invalid(format!(
                "top_k ({}) exceeds neuron_count ({})",
                self.top_k, self.neuron_count
            )));
        }
        if self.input_display == 0 || self.filter_display == 0 {
            return Err(ConfigError::Invalid("display sizes must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_ms: u64,
    pub initial_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            initial_delay_ms: 0,
        }
    }
}

impl SchedulerConfig {
    /// Longest interval or initial delay honored; larger values are clamped.
    pub const MAX_DELAY_MS: u64 = 24 * 60 * 60 * 1000;

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.min(Self::MAX_DELAY_MS))
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms.min(Self::MAX_DELAY_MS))
    }
}

/// Everything a front-end needs to start a visualization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub render: RenderConstants,
    pub scheduler: SchedulerConfig,
    /// Seed for the reference model weights and synthetic samples.
    pub seed: u64,
    /// Upper bound on samples loaded from disk.
    pub sample_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            render: RenderConstants::default(),
            scheduler: SchedulerConfig::default(),
            seed: 7,
            sample_limit: 1000,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let cfg: AppConfig = serde_json::from_str(&text)?;
        cfg.render.validate()?;
        Ok(cfg)
    }

    /// Loads `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(Self::load(path)?.with_fallbacks())
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    fn with_fallbacks(mut self) -> Self {
        if self.sample_limit == 0 {
            self.sample_limit = Self::default().sample_limit;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_survive_json_round_trip() {
        let cfg = AppConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
        assert!(json.contains("\"#87ceeb\""), "colors serialize as hex");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{ "scheduler": { "interval_ms": 500 }, "render": { "top_k": 2 } }"#)
                .unwrap();
        assert_eq!(cfg.scheduler.interval(), Duration::from_millis(500));
        assert_eq!(cfg.scheduler.initial_delay(), Duration::ZERO);
        assert_eq!(cfg.render.top_k, 2);
        assert_eq!(cfg.render.filter_count, 8);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("convis-config-{}", std::process::id()));
        let path = dir.join("config.json");
        let mut cfg = AppConfig::default();
        cfg.scheduler.interval_ms = 250;
        cfg.sample_limit = 0;
        cfg.save(&path).unwrap();

        let back = AppConfig::load_or_default(&path).unwrap();
        assert_eq!(back.scheduler.interval_ms, 250);
        assert_eq!(back.sample_limit, 1000, "zero limit falls back");
        let _ = fs::remove_dir_all(&dir);

        let missing = AppConfig::load_or_default(&dir.join("nope.json")).unwrap();
        assert_eq!(missing, AppConfig::default());
    }

    #[test]
    fn huge_intervals_are_clamped() {
        let cfg = SchedulerConfig {
            interval_ms: u64::MAX,
            initial_delay_ms: u64::MAX,
        };
        let day = Duration::from_millis(SchedulerConfig::MAX_DELAY_MS);
        assert_eq!(cfg.interval(), day);
        assert_eq!(cfg.initial_delay(), day);
        assert_eq!(SchedulerConfig::default().interval(), Duration::from_millis(2000));
    }

    #[test]
    fn bad_color_is_rejected() {
        let res: Result<Palette, _> = serde_json::from_str(r#"{ "negative": "red" }"#);
        assert!(res.is_err());
    }

    #[test]
    fn validate_catches_oversized_top_k() {
        let mut c = RenderConstants::default();
        assert!(c.validate().is_ok());
        c.top_k = 11;
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));
        assert_eq!(c.flattened_len(), 8 * 14 * 14);
    }
}
