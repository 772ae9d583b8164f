use image::RgbImage;
use thiserror::Error;

use crate::gate::StabilityGate;
use crate::metrics::{FaceMetrics, Orientation, ScanStep};

/// At most one slot per orientation, filled strictly in capture order.
#[derive(Debug)]
pub struct OrientationMap<T> {
    slots: [Option<T>; 3],
}

impl<T> Default for OrientationMap<T> {
    fn default() -> Self {
        Self {
            slots: [None, None, None],
        }
    }
}

impl<T> OrientationMap<T> {
    pub fn get(&self, orientation: Orientation) -> Option<&T> {
        self.slots[orientation as usize].as_ref()
    }

    pub fn insert(&mut self, orientation: Orientation, value: T) {
        self.slots[orientation as usize] = Some(value);
    }

    pub fn clear(&mut self) {
        self.slots = [None, None, None];
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }
}

/// Why a capture attempt was refused. None of these change the step.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("face not stably detected")]
    NotStable,
    #[error("face position not ideal")]
    PoorQuality,
    #[error("could not capture frame")]
    FrameUnavailable,
    /// Front image or metrics missing at finalization. Unreachable as long
    /// as the step invariants hold; the whole sequence is reset when it
    /// fires.
    #[error("front capture data went missing; the sequence was reset")]
    MissingFrontData,
}

/// The front image and its quality snapshot, ready for the prediction call.
#[derive(Debug)]
pub struct AnalysisRequest {
    pub image: RgbImage,
    pub metrics: FaceMetrics,
}

#[derive(Debug)]
pub enum CaptureOutcome {
    /// Step advanced to the next orientation.
    Advanced(ScanStep),
    /// All three orientations captured; analysis should start.
    Finished(AnalysisRequest),
    /// Sequence already finished; the attempt was ignored.
    AlreadyFinished,
}

/// Walks front -> left -> right -> finished, recording one accepted image
/// per orientation. Capture attempts are gated by the stability gate; reset
/// returns to the front step from anywhere.
#[derive(Debug)]
pub struct CaptureSequencer {
    step: ScanStep,
    images: OrientationMap<RgbImage>,
    metrics: OrientationMap<FaceMetrics>,
}

impl Default for CaptureSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSequencer {
    pub fn new() -> Self {
        Self {
            step: ScanStep::Capture(Orientation::Front),
            images: OrientationMap::default(),
            metrics: OrientationMap::default(),
        }
    }

    pub fn step(&self) -> ScanStep {
        self.step
    }

    pub fn captured(&self, orientation: Orientation) -> bool {
        self.images.get(orientation).is_some()
    }

    pub fn captured_count(&self) -> usize {
        self.images.len()
    }

    /// One explicit capture attempt.
    ///
    /// Validates the gate's current metrics first (freshness, then the
    /// score floors), only then asks `grab` for a still image, so a frame
    /// is never pulled for an attempt that cannot succeed. On the final
    /// step the front image and metrics are re-validated before the
    /// analysis request is handed out.
    pub fn capture<F>(
        &mut self,
        gate: &StabilityGate,
        grab: F,
    ) -> Result<CaptureOutcome, CaptureError>
    where
        F: FnOnce() -> Option<RgbImage>,
    {
        let orientation = match self.step {
            ScanStep::Capture(orientation) => orientation,
            ScanStep::Finished => return Ok(CaptureOutcome::AlreadyFinished),
        };

        let current = match gate.current() {
            Some(m) if gate.is_fresh(m) => *m,
            _ => return Err(CaptureError::NotStable),
        };
        if !gate.meets_thresholds(&current) {
            return Err(CaptureError::PoorQuality);
        }

        let image = grab().ok_or(CaptureError::FrameUnavailable)?;

        self.metrics.insert(orientation, current);
        self.images.insert(orientation, image);
        self.step = next_step(orientation);

        if self.step != ScanStep::Finished {
            return Ok(CaptureOutcome::Advanced(self.step));
        }

        let front_image = self.images.get(Orientation::Front).cloned();
        let front_metrics = self.metrics.get(Orientation::Front).copied();
        match (front_image, front_metrics) {
            (Some(image), Some(metrics)) => {
                Ok(CaptureOutcome::Finished(AnalysisRequest { image, metrics }))
            }
            _ => {
                self.reset();
                Err(CaptureError::MissingFrontData)
            }
        }
    }

    /// Back to the front step, dropping every capture and metrics snapshot.
    pub fn reset(&mut self) {
        self.step = ScanStep::Capture(Orientation::Front);
        self.images.clear();
        self.metrics.clear();
    }
}

fn next_step(after: Orientation) -> ScanStep {
    match after {
        Orientation::Front => ScanStep::Capture(Orientation::Left),
        Orientation::Left => ScanStep::Capture(Orientation::Right),
        Orientation::Right => ScanStep::Finished,
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn ready_gate() -> StabilityGate {
        gate_with(0.8, 0.7, 0)
    }

    fn gate_with(detection: f32, overall: f32, age_ms: u64) -> StabilityGate {
        let mut gate = StabilityGate::default();
        gate.update(FaceMetrics {
            detection_score: detection,
            center_score: 0.9,
            size_score: 0.5,
            overall_score: overall,
            timestamp: Instant::now() - Duration::from_millis(age_ms),
        });
        gate
    }

    fn frame() -> Option<RgbImage> {
        Some(RgbImage::new(4, 4))
    }

    #[test]
    fn successful_capture_advances_front_to_left() {
        let mut seq = CaptureSequencer::new();
        let outcome = seq.capture(&ready_gate(), frame).unwrap();

        assert!(matches!(
            outcome,
            CaptureOutcome::Advanced(ScanStep::Capture(Orientation::Left))
        ));
        assert!(seq.captured(Orientation::Front));
        assert!(!seq.captured(Orientation::Left));
    }

    #[test]
    fn stale_metrics_fail_without_state_change() {
        let mut seq = CaptureSequencer::new();
        let err = seq.capture(&gate_with(0.8, 0.7, 900), frame).unwrap_err();

        assert_eq!(err, CaptureError::NotStable);
        assert_eq!(seq.step(), ScanStep::Capture(Orientation::Front));
        assert_eq!(seq.captured_count(), 0);
    }

    #[test]
    fn absent_metrics_fail_as_not_stable() {
        let mut seq = CaptureSequencer::new();
        let err = seq.capture(&StabilityGate::default(), frame).unwrap_err();
        assert_eq!(err, CaptureError::NotStable);
    }

    #[test]
    fn low_scores_fail_as_poor_quality() {
        let mut seq = CaptureSequencer::new();

        let err = seq.capture(&gate_with(0.5, 0.9, 0), frame).unwrap_err();
        assert_eq!(err, CaptureError::PoorQuality);

        let err = seq.capture(&gate_with(0.9, 0.5, 0), frame).unwrap_err();
        assert_eq!(err, CaptureError::PoorQuality);
        assert_eq!(seq.step(), ScanStep::Capture(Orientation::Front));
    }

    #[test]
    fn missing_frame_fails_without_state_change() {
        let mut seq = CaptureSequencer::new();
        let err = seq.capture(&ready_gate(), || None).unwrap_err();

        assert_eq!(err, CaptureError::FrameUnavailable);
        assert_eq!(seq.step(), ScanStep::Capture(Orientation::Front));
        assert_eq!(seq.captured_count(), 0);
    }

    #[test]
    fn three_captures_finish_with_front_analysis_request() {
        let mut seq = CaptureSequencer::new();
        let gate = ready_gate();

        seq.capture(&gate, frame).unwrap();
        seq.capture(&gate, frame).unwrap();
        let outcome = seq.capture(&gate, frame).unwrap();

        let CaptureOutcome::Finished(request) = outcome else {
            panic!("expected finished outcome");
        };
        assert_eq!(seq.step(), ScanStep::Finished);
        assert_eq!(seq.captured_count(), 3);
        assert!((request.metrics.detection_score - 0.8).abs() < 1e-6);
        assert_eq!(request.image.dimensions(), (4, 4));
    }

    #[test]
    fn captures_fill_orientations_in_order_without_skips() {
        let mut seq = CaptureSequencer::new();
        let gate = ready_gate();

        for (done, orientation) in Orientation::ALL.iter().enumerate() {
            assert_eq!(seq.step(), ScanStep::Capture(*orientation));
            assert_eq!(seq.captured_count(), done);
            seq.capture(&gate, frame).unwrap();
            assert!(seq.captured(*orientation));
        }
    }

    #[test]
    fn finished_sequence_ignores_further_attempts() {
        let mut seq = CaptureSequencer::new();
        let gate = ready_gate();
        for _ in 0..3 {
            seq.capture(&gate, frame).unwrap();
        }

        let outcome = seq.capture(&gate, frame).unwrap();
        assert!(matches!(outcome, CaptureOutcome::AlreadyFinished));
        assert_eq!(seq.captured_count(), 3);
    }

    #[test]
    fn reset_returns_to_front_and_clears_everything() {
        let mut seq = CaptureSequencer::new();
        let gate = ready_gate();
        seq.capture(&gate, frame).unwrap();
        seq.capture(&gate, frame).unwrap();

        seq.reset();
        assert_eq!(seq.step(), ScanStep::Capture(Orientation::Front));
        assert_eq!(seq.captured_count(), 0);
        assert!(seq.metrics.is_empty());
    }

    #[test]
    fn missing_front_data_at_finalization_resets_the_sequence() {
        let mut seq = CaptureSequencer::new();
        let gate = ready_gate();
        seq.capture(&gate, frame).unwrap();
        seq.capture(&gate, frame).unwrap();

        // Corrupt the state the way the defensive branch guards against.
        seq.images.slots[Orientation::Front as usize] = None;

        let err = seq.capture(&gate, frame).unwrap_err();
        assert_eq!(err, CaptureError::MissingFrontData);
        assert_eq!(seq.step(), ScanStep::Capture(Orientation::Front));
        assert_eq!(seq.captured_count(), 0);
    }
}
