use std::time::{Duration, Instant};

use crate::metrics::FaceMetrics;

pub const MIN_DETECTION_SCORE: f32 = 0.6;
pub const MIN_OVERALL_SCORE: f32 = 0.65;
pub const MAX_METRIC_AGE_MS: u64 = 800;

/// Moment-to-moment capture eligibility, derived purely from the latest
/// frame's metrics, their age, and the score floors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveStatus {
    /// No face in the most recent processed frame.
    NoFace,
    /// A face was seen, but the reading has aged past the freshness window.
    Stabilizing,
    /// Fresh reading above both score floors.
    Ready,
    /// Fresh reading, but framing or confidence is still short of the floors.
    Adjust,
}

impl LiveStatus {
    pub fn message(self) -> &'static str {
        match self {
            LiveStatus::NoFace => "no face detected; move into the frame",
            LiveStatus::Stabilizing => "stabilizing detection, hold still",
            LiveStatus::Ready => "ready to capture",
            LiveStatus::Adjust => "adjust position: center your face and move closer",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    pub min_detection_score: f32,
    pub min_overall_score: f32,
    pub max_metric_age: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_detection_score: MIN_DETECTION_SCORE,
            min_overall_score: MIN_OVERALL_SCORE,
            max_metric_age: Duration::from_millis(MAX_METRIC_AGE_MS),
        }
    }
}

/// Holds the single most recent frame's metrics and answers "is it safe to
/// capture right now". Each update replaces the previous value wholesale;
/// there is deliberately no smoothing, so readiness timing tracks the live
/// detector exactly.
#[derive(Debug, Default)]
pub struct StabilityGate {
    config: GateConfig,
    current: Option<FaceMetrics>,
}

impl StabilityGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            current: None,
        }
    }

    pub fn update(&mut self, metrics: FaceMetrics) {
        self.current = Some(metrics);
    }

    /// Called when a processed frame had no detection at all.
    pub fn clear(&mut self) {
        self.current = None;
    }

    pub fn current(&self) -> Option<&FaceMetrics> {
        self.current.as_ref()
    }

    pub fn is_fresh(&self, metrics: &FaceMetrics) -> bool {
        self.fresh_at(metrics, Instant::now())
    }

    pub fn meets_thresholds(&self, metrics: &FaceMetrics) -> bool {
        metrics.overall_score >= self.config.min_overall_score
            && metrics.detection_score >= self.config.min_detection_score
    }

    pub fn is_capture_ready(&self) -> bool {
        self.status_at(Instant::now()) == LiveStatus::Ready
    }

    pub fn status(&self) -> LiveStatus {
        self.status_at(Instant::now())
    }

    fn fresh_at(&self, metrics: &FaceMetrics, now: Instant) -> bool {
        now.saturating_duration_since(metrics.timestamp) <= self.config.max_metric_age
    }

    fn status_at(&self, now: Instant) -> LiveStatus {
        match &self.current {
            None => LiveStatus::NoFace,
            Some(m) if !self.fresh_at(m, now) => LiveStatus::Stabilizing,
            Some(m) if self.meets_thresholds(m) => LiveStatus::Ready,
            Some(_) => LiveStatus::Adjust,
        }
    }
}
