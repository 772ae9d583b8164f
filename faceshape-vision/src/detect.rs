use anyhow::{bail, Result};
use image::{DynamicImage, GenericImageView};
use ndarray::Array4;
use ort::value::Value;

use crate::model::ModelBundle;

/// One detected face in frame pixel coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
}

/// Default classification threshold for the tiny detector.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.45;

const NMS_IOU_THRESHOLD: f32 = 0.3;
const INPUT_WIDTH: u32 = 320;
const INPUT_HEIGHT: u32 = 240;

/// Runs the tiny face detector over single frames. The landmark and
/// recognition sub-models stay resident in the bundle so that a broken
/// model directory fails at startup rather than mid-scan.
pub struct Detector {
    models: ModelBundle,
    score_threshold: f32,
}

impl Detector {
    pub fn new(models: ModelBundle) -> Self {
        Self {
            models,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }

    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    /// Detect faces in one frame. Returns every face above the score
    /// threshold after NMS, boxes in frame pixel coordinates.
    pub fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        let (frame_w, frame_h) = img.dimensions();
        let (frame_w, frame_h) = (frame_w as f32, frame_h as f32);

        let input = preprocess(img)?;
        let tensor = Value::from_array(input)?;
        let outputs = self.models.detector.run(ort::inputs![tensor])?;

        let mut scores: Option<Vec<f32>> = None;
        let mut boxes: Option<Vec<f32>> = None;
        for (name, output) in outputs.iter() {
            let name: &str = name.as_ref();
            let (_shape, data) = output.try_extract_tensor::<f32>()?;
            match name {
                "scores" => scores = Some(data.to_vec()),
                "boxes" => boxes = Some(data.to_vec()),
                _ => {}
            }
        }
        let (Some(scores), Some(boxes)) = (scores, boxes) else {
            bail!("detector output missing scores/boxes tensors");
        };

        let raw = decode(&scores, &boxes, self.score_threshold, frame_w, frame_h);
        Ok(nms(raw, NMS_IOU_THRESHOLD))
    }
}

/// Stretch-resize to the net input and normalize to roughly [-1, 1] in
/// planar RGB order.
fn preprocess(img: &DynamicImage) -> Result<Array4<f32>> {
    let resized = img
        .resize_exact(INPUT_WIDTH, INPUT_HEIGHT, image::imageops::FilterType::Triangle)
        .to_rgb8();

    let pixel_count = (INPUT_WIDTH * INPUT_HEIGHT) as usize;
    let mut data = vec![0f32; 3 * pixel_count];
    let (r_plane, rest) = data.split_at_mut(pixel_count);
    let (g_plane, b_plane) = rest.split_at_mut(pixel_count);

    for (i, px) in resized.pixels().enumerate() {
        r_plane[i] = (px[0] as f32 - 127.0) / 128.0;
        g_plane[i] = (px[1] as f32 - 127.0) / 128.0;
        b_plane[i] = (px[2] as f32 - 127.0) / 128.0;
    }

    Ok(Array4::from_shape_vec(
        (1, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize),
        data,
    )?)
}

/// Decode per-anchor (background, face) scores and normalized corner boxes
/// into pixel-space detections. Scores are clamped to [0, 1] on the way out.
fn decode(scores: &[f32], boxes: &[f32], threshold: f32, frame_w: f32, frame_h: f32) -> Vec<Detection> {
    let count = (scores.len() / 2).min(boxes.len() / 4);
    let mut out = Vec::new();

    for i in 0..count {
        let score = scores[i * 2 + 1].clamp(0.0, 1.0);
        if score < threshold {
            continue;
        }

        let x1 = (boxes[i * 4] * frame_w).clamp(0.0, frame_w);
        let y1 = (boxes[i * 4 + 1] * frame_h).clamp(0.0, frame_h);
        let x2 = (boxes[i * 4 + 2] * frame_w).clamp(0.0, frame_w);
        let y2 = (boxes[i * 4 + 3] * frame_h).clamp(0.0, frame_h);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        out.push(Detection {
            bbox: [x1, y1, x2 - x1, y2 - y1],
            score,
        });
    }

    out
}

fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    'candidates: for det in detections {
        for kept in &keep {
            if iou(&kept.bbox, &det.bbox) > iou_threshold {
                continue 'candidates;
            }
        }
        keep.push(det);
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let left = a[0].max(b[0]);
    let top = a[1].max(b[1]);
    let right = (a[0] + a[2]).min(b[0] + b[2]);
    let bottom = (a[1] + a[3]).min(b[1] + b[3]);

    if right <= left || bottom <= top {
        return 0.0;
    }

    let inter = (right - left) * (bottom - top);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_keeps_only_faces_above_threshold() {
        // two anchors: one confident face, one background
        let scores = [0.1, 0.9, 0.95, 0.05];
        let boxes = [0.25, 0.25, 0.75, 0.75, 0.0, 0.0, 0.5, 0.5];

        let out = decode(&scores, &boxes, 0.45, 640.0, 480.0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox, [160.0, 120.0, 320.0, 240.0]);
        assert!((out[0].score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn decode_clamps_boxes_to_frame() {
        let scores = [0.0, 1.5];
        let boxes = [-0.2, -0.2, 1.4, 1.4];

        let out = decode(&scores, &boxes, 0.45, 640.0, 480.0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox, [0.0, 0.0, 640.0, 480.0]);
        assert_eq!(out[0].score, 1.0);
    }

    #[test]
    fn decode_drops_degenerate_boxes() {
        let scores = [0.0, 0.9];
        let boxes = [0.5, 0.5, 0.5, 0.8]; // zero width

        assert!(decode(&scores, &boxes, 0.45, 640.0, 480.0).is_empty());
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [100.0, 100.0, 10.0, 10.0];
        assert_eq!(iou(&a, &b), 0.0);
        assert!(iou(&a, &[15.0, 15.0, 20.0, 20.0]) > 0.0);
    }

    #[test]
    fn nms_suppresses_overlapping_detections() {
        let detections = vec![
            Detection { bbox: [10.0, 10.0, 20.0, 20.0], score: 0.9 },
            Detection { bbox: [12.0, 12.0, 20.0, 20.0], score: 0.8 },
            Detection { bbox: [100.0, 100.0, 20.0, 20.0], score: 0.85 },
        ];

        let kept = nms(detections, 0.3);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].score - 0.9).abs() < 1e-6);
        assert!((kept[1].score - 0.85).abs() < 1e-6);
    }
}
