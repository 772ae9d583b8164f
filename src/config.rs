use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::gate::{self, GateConfig};
use crate::metrics::{self, ScoreConfig};
use crate::predict;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACESHAPE_CONFIG_PATH").unwrap_or("/usr/local/etc/faceshape/config.toml"))
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: String,
    pub api_url: String,
    pub model_dir: PathBuf,
    pub detection_interval_ms: u64,
    pub detector_score_threshold: f32,
    pub quality: QualityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "/dev/video0".to_string(),
            api_url: predict::DEFAULT_API_URL.to_string(),
            model_dir: PathBuf::from("/usr/local/share/faceshape/models"),
            detection_interval_ms: 80,
            detector_score_threshold: faceshape_vision::detect::DEFAULT_SCORE_THRESHOLD,
            quality: QualityConfig::default(),
        }
    }
}

/// Capture quality thresholds. Defaults match the scan UI's tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub min_detection_score: f32,
    pub min_overall_score: f32,
    pub max_metric_age_ms: u64,
    pub min_size_ratio: f32,
    pub optimal_size_ratio: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_detection_score: gate::MIN_DETECTION_SCORE,
            min_overall_score: gate::MIN_OVERALL_SCORE,
            max_metric_age_ms: gate::MAX_METRIC_AGE_MS,
            min_size_ratio: metrics::MIN_SIZE_RATIO,
            optimal_size_ratio: metrics::OPTIMAL_SIZE_RATIO,
        }
    }
}

impl QualityConfig {
    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            min_detection_score: self.min_detection_score,
            min_overall_score: self.min_overall_score,
            max_metric_age: Duration::from_millis(self.max_metric_age_ms),
        }
    }

    pub fn score_config(&self) -> ScoreConfig {
        ScoreConfig {
            min_size_ratio: self.min_size_ratio,
            optimal_size_ratio: self.optimal_size_ratio,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
