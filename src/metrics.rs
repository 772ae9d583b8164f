use std::time::Instant;

use faceshape_vision::Detection;

/// Head pose required for one capture step, in capture order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Front,
    Left,
    Right,
}

impl Orientation {
    pub const ALL: [Orientation; 3] = [Orientation::Front, Orientation::Left, Orientation::Right];

    pub fn label(self) -> &'static str {
        match self {
            Orientation::Front => "front view",
            Orientation::Left => "left profile",
            Orientation::Right => "right profile",
        }
    }
}

/// Position in the capture sequence: the orientation being captured, or done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStep {
    Capture(Orientation),
    Finished,
}

/// Quality scores for a single processed frame. Produced fresh per frame;
/// the next frame's value supersedes this one wholesale, no smoothing.
#[derive(Debug, Clone, Copy)]
pub struct FaceMetrics {
    pub detection_score: f32,
    pub center_score: f32,
    pub size_score: f32,
    pub overall_score: f32,
    pub timestamp: Instant,
}

pub const MIN_SIZE_RATIO: f32 = 0.18;
pub const OPTIMAL_SIZE_RATIO: f32 = 0.45;

const DETECTION_WEIGHT: f32 = 0.6;
const CENTER_WEIGHT: f32 = 0.25;
const SIZE_WEIGHT: f32 = 0.15;

#[derive(Debug, Clone, Copy)]
pub struct ScoreConfig {
    pub min_size_ratio: f32,
    pub optimal_size_ratio: f32,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            min_size_ratio: MIN_SIZE_RATIO,
            optimal_size_ratio: OPTIMAL_SIZE_RATIO,
        }
    }
}

/// The single detection the scorer should see: highest confidence wins,
/// ties broken by encounter order.
pub fn best_detection(detections: &[Detection]) -> Option<&Detection> {
    let mut best: Option<&Detection> = None;
    for det in detections {
        match best {
            Some(current) if det.score <= current.score => {}
            _ => best = Some(det),
        }
    }
    best
}

/// Score one detection against its frame.
///
/// Centering is the Euclidean norm of the box-center offset from the frame
/// center, normalized by the half-frame extents and saturating at one unit.
/// Size is a linear ramp on box-width/frame-width between the minimum and
/// optimal ratios. The overall score weights raw detector confidence over
/// framing.
pub fn score_frame(
    detection: &Detection,
    frame_width: u32,
    frame_height: u32,
    cfg: &ScoreConfig,
) -> FaceMetrics {
    let [x, y, w, h] = detection.bbox;
    let detection_score = detection.score.clamp(0.0, 1.0);

    let half_w = frame_width as f32 / 2.0;
    let half_h = frame_height as f32 / 2.0;
    let dx = (x + w / 2.0 - half_w) / half_w;
    let dy = (y + h / 2.0 - half_h) / half_h;
    let center_penalty = (dx * dx + dy * dy).sqrt();
    let center_score = (1.0 - center_penalty.min(1.0)).clamp(0.0, 1.0);

    let size_ratio = w / frame_width as f32;
    let ramp = (cfg.optimal_size_ratio - cfg.min_size_ratio).max(1e-4);
    let size_score = ((size_ratio - cfg.min_size_ratio) / ramp).clamp(0.0, 1.0);

    let overall_score = (detection_score * DETECTION_WEIGHT
        + center_score * CENTER_WEIGHT
        + size_score * SIZE_WEIGHT)
        .clamp(0.0, 1.0);

    FaceMetrics {
        detection_score,
        center_score,
        size_score,
        overall_score,
        timestamp: Instant::now(),
    }
}
