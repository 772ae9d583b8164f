use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::RgbImage;
use log::{debug, error, info, warn};

use faceshape_vision::{Camera, Detector, ModelBundle};

use crate::config::Config;
use crate::gate::{LiveStatus, StabilityGate};
use crate::metrics::{best_detection, score_frame, Orientation, ScanStep};
use crate::predict::{PredictClient, Prediction};
use crate::sequencer::{AnalysisRequest, CaptureOutcome, CaptureSequencer};

/// Fixed-interval scheduler that drops missed deadlines instead of queueing
/// them: when a pass overruns, the ticks that fired during it are skipped
/// entirely, so a slow detector never builds a backlog.
pub struct Ticker {
    interval: Duration,
    next: Instant,
}

impl Ticker {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now() + interval)
    }

    pub fn starting_at(interval: Duration, first_deadline: Instant) -> Self {
        Self {
            interval,
            next: first_deadline,
        }
    }

    /// Sleep until the next deadline. Returns how many ticks were dropped
    /// because the previous pass was still running when they fired.
    pub fn wait(&mut self) -> u32 {
        let dropped = self.catch_up(Instant::now());
        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
        }
        self.next += self.interval;
        dropped
    }

    /// Advance past every deadline that already elapsed.
    fn catch_up(&mut self, now: Instant) -> u32 {
        let mut dropped = 0;
        while self.next <= now {
            self.next += self.interval;
            dropped += 1;
        }
        dropped
    }
}

enum Command {
    Capture,
    Reset,
    Quit,
}

/// Everything the loop thread owns across ticks: the capture sequence and
/// the last analysis result. Reset drops both, so a stale prediction can
/// never outlive the captures it was computed from.
#[derive(Default)]
struct ScanState {
    sequencer: CaptureSequencer,
    result: Option<Prediction>,
}

impl ScanState {
    fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.sequencer.reset();
        self.result = None;
    }
}

/// Reads capture/reset/quit commands off stdin so the detection loop stays
/// the only place that touches scan state.
fn spawn_command_reader() -> Receiver<Command> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let command = match line.trim() {
                "" | "c" => Command::Capture,
                "r" => Command::Reset,
                "q" => Command::Quit,
                other => {
                    eprintln!("unknown command {other:?}; Enter=capture, r=reset, q=quit");
                    continue;
                }
            };
            if tx.send(command).is_err() {
                break;
            }
        }
    });
    rx
}

/// Run the guided three-step camera scan.
pub fn run(cfg: &Config) -> Result<()> {
    info!(
        "loading face detection models from {}",
        cfg.model_dir.display()
    );
    let models =
        ModelBundle::load(&cfg.model_dir).context("face detection models failed to load")?;
    let mut detector = Detector::new(models).with_score_threshold(cfg.detector_score_threshold);

    info!("opening camera: {}", cfg.camera);
    let mut camera = Camera::open(&cfg.camera).context("failed to open camera")?;

    let mut gate = StabilityGate::new(cfg.quality.gate_config());
    let mut state = ScanState::new();
    let client = PredictClient::new(cfg.api_url.clone());
    let score_cfg = cfg.quality.score_config();

    let commands = spawn_command_reader();
    let mut ticker = Ticker::new(Duration::from_millis(cfg.detection_interval_ms));

    announce_step(state.sequencer.step());
    info!("press Enter to capture, 'r' to reset, 'q' to quit");

    let mut last_frame: Option<RgbImage> = None;
    let mut last_status: Option<LiveStatus> = None;

    loop {
        let dropped = ticker.wait();
        if dropped > 0 {
            debug!("detection pass overran; dropped {dropped} tick(s)");
        }

        // Detection pass for this tick.
        match camera.frame() {
            Ok(frame) => {
                let (width, height) = frame.dimensions();
                let img = image::DynamicImage::ImageRgb8(frame);
                match detector.detect(&img) {
                    Ok(detections) => match best_detection(&detections) {
                        Some(det) => gate.update(score_frame(det, width, height, &score_cfg)),
                        None => gate.clear(),
                    },
                    Err(e) => {
                        warn!("detection failed: {e:#}");
                        gate.clear();
                    }
                }
                last_frame = Some(img.into_rgb8());
            }
            Err(e) => {
                // keep the old metrics; freshness ages them out
                warn!("camera frame unavailable: {e:#}");
                last_frame = None;
            }
        }

        let status = gate.status();
        if last_status != Some(status) {
            info!("{}", status.message());
            last_status = Some(status);
        }
        if let Some(m) = gate.current() {
            debug!(
                "scores: detection {:.3} center {:.3} size {:.3} overall {:.3}",
                m.detection_score, m.center_score, m.size_score, m.overall_score
            );
        }

        // Drain user commands issued since the last tick.
        loop {
            match commands.try_recv() {
                Ok(Command::Capture) => {
                    let capturing = state.sequencer.step();
                    match state.sequencer.capture(&gate, || last_frame.clone()) {
                        Ok(CaptureOutcome::Advanced(step)) => {
                            if let ScanStep::Capture(orientation) = capturing {
                                info!(
                                    "captured {} ({}/3)",
                                    orientation.label(),
                                    state.sequencer.captured_count()
                                );
                            }
                            announce_step(step);
                        }
                        Ok(CaptureOutcome::Finished(request)) => {
                            announce_step(ScanStep::Finished);
                            match send_analysis(&client, request) {
                                Ok(prediction) => {
                                    info!(
                                        "face shape: {} ({:.1}% confidence)",
                                        prediction.shape,
                                        prediction.confidence_percent()
                                    );
                                    state.result = Some(prediction);
                                }
                                Err(e) => error!("{e}"),
                            }
                        }
                        Ok(CaptureOutcome::AlreadyFinished) => {
                            info!("all steps already captured; press 'r' to start over");
                        }
                        Err(e) => warn!("{e}"),
                    }
                }
                Ok(Command::Reset) => {
                    state.reset();
                    info!("sequence reset");
                    announce_step(state.sequencer.step());
                }
                Ok(Command::Quit) => {
                    if let Some(prediction) = &state.result {
                        info!(
                            "last result: {} ({:.1}% confidence)",
                            prediction.shape,
                            prediction.confidence_percent()
                        );
                    }
                    return Ok(());
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }
}

fn send_analysis(client: &PredictClient, request: AnalysisRequest) -> Result<Prediction> {
    let jpeg = encode_jpeg(&request.image)?;
    Ok(client.predict(jpeg, "front.jpg", "image/jpeg", Some(&request.metrics))?)
}

fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    image
        .write_to(
            &mut std::io::Cursor::new(&mut buf),
            image::ImageFormat::Jpeg,
        )
        .context("encoding captured frame")?;
    Ok(buf)
}

fn announce_step(step: ScanStep) {
    match step {
        ScanStep::Capture(orientation) => {
            let (badge, title, hint) = step_guidance(orientation);
            info!("[{badge}] {title}");
            info!("{hint}");
        }
        ScanStep::Finished => {
            info!("[all steps complete] analyzing the front view image");
        }
    }
}

/// Per-step guidance shown when the flow enters each orientation.
pub fn step_guidance(orientation: Orientation) -> (&'static str, &'static str, &'static str) {
    match orientation {
        Orientation::Front => (
            "step 1 of 3",
            "capture the front view",
            "Face the camera directly and keep your whole face in view.",
        ),
        Orientation::Left => (
            "step 2 of 3",
            "capture the left profile",
            "Turn your head slowly to the left until your side profile shows.",
        ),
        Orientation::Right => (
            "step 3 of 3",
            "capture the right profile",
            "Turn your head to the right and stay inside the frame.",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_on_time_drops_nothing() {
        let t0 = Instant::now();
        let mut ticker = Ticker::starting_at(Duration::from_millis(100), t0);
        assert_eq!(ticker.catch_up(t0 - Duration::from_millis(1)), 0);
    }

    #[test]
    fn ticker_drops_every_deadline_the_pass_covered() {
        let t0 = Instant::now();
        let mut ticker = Ticker::starting_at(Duration::from_millis(100), t0);

        // pass ran 250ms past the first deadline: t0, t0+100, t0+200 all fired
        let dropped = ticker.catch_up(t0 + Duration::from_millis(250));
        assert_eq!(dropped, 3);

        // next deadline is in the future, nothing queued behind it
        assert_eq!(ticker.catch_up(t0 + Duration::from_millis(250)), 0);
    }

    #[test]
    fn ticker_deadline_boundary_counts_as_fired() {
        let t0 = Instant::now();
        let mut ticker = Ticker::starting_at(Duration::from_millis(100), t0);
        assert_eq!(ticker.catch_up(t0), 1);
    }

    #[test]
    fn reset_discards_the_prediction_result_with_the_captures() {
        use crate::metrics::FaceMetrics;

        let mut gate = StabilityGate::default();
        gate.update(FaceMetrics {
            detection_score: 0.8,
            center_score: 0.9,
            size_score: 0.5,
            overall_score: 0.7,
            timestamp: Instant::now(),
        });

        let mut state = ScanState::new();
        for _ in 0..3 {
            state
                .sequencer
                .capture(&gate, || Some(RgbImage::new(4, 4)))
                .unwrap();
        }
        state.result = Some(Prediction {
            shape: "oval".to_string(),
            confidence: 0.87,
        });

        state.reset();
        assert!(state.result.is_none());
        assert_eq!(state.sequencer.step(), ScanStep::Capture(Orientation::Front));
        assert_eq!(state.sequencer.captured_count(), 0);
    }

    #[test]
    fn guidance_exists_for_every_orientation() {
        for orientation in Orientation::ALL {
            let (badge, title, hint) = step_guidance(orientation);
            assert!(!badge.is_empty());
            assert!(!title.is_empty());
            assert!(!hint.is_empty());
        }
    }
}
