//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the luma capture into the 640×640 network input, decodes the
//! three anchor-free stride heads (score, box distances, five keypoints) and
//! keeps the survivors of greedy non-maximum suppression.

use crate::types::{BoundingBox, Landmarks};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const NMS_IOU: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("detector output malformed: {0}")]
    Malformed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Placement of the resized capture inside the square network input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    width: u32,
    height: u32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        Self {
            scale,
            width: new_w,
            height: new_h,
            pad_x: (INPUT_SIZE - new_w) as f32 / 2.0,
            pad_y: (INPUT_SIZE - new_h) as f32 / 2.0,
        }
    }

    /// Network-input coordinates back to capture coordinates.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output slots of one stride head: (scores, boxes, keypoints).
type HeadSlots = (usize, usize, usize);

/// Raw tensors of one stride head.
struct StrideHead<'a> {
    stride: usize,
    scores: &'a [f32],
    boxes: &'a [f32],
    keypoints: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    heads: [HeadSlots; 3],
    min_confidence: f32,
}

impl FaceDetector {
    /// Load the SCRFD model. Detections scoring at or below `min_confidence` are dropped.
    pub fn load(model_path: &Path, min_confidence: f32) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::Malformed(format!(
                "SCRFD needs 9 outputs (3 strides x score/bbox/kps), got {}",
                names.len()
            )));
        }
        let heads = map_output_heads(&names);

        tracing::info!(path = %model_path.display(), outputs = ?names, ?heads, "SCRFD detector loaded");

        Ok(Self {
            session,
            heads,
            min_confidence,
        })
    }

    /// Detect faces, highest confidence first.
    pub fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = letterbox_tensor(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, box_idx, kps_idx) = self.heads[slot];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::Malformed(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[box_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::Malformed(format!("boxes stride {stride}: {e}")))?;
            let (_, keypoints) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::Malformed(format!("keypoints stride {stride}: {e}")))?;

            let head = StrideHead { stride, scores, boxes, keypoints };
            candidates.extend(decode_head(&head, &letterbox, self.min_confidence));
        }

        Ok(suppress_overlaps(candidates, NMS_IOU))
    }
}

/// Resize into the letterbox and normalize into a 1×3×640×640 tensor.
///
/// Padding stays at zero, which is where the mean pixel normalizes to.
fn letterbox_tensor(image: &GrayImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height());
    let resized = imageops::resize(image, letterbox.width, letterbox.height, FilterType::Triangle);

    let side = INPUT_SIZE as usize;
    let off_x = letterbox.pad_x.floor() as usize;
    let off_y = letterbox.pad_y.floor() as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let value = (pixel.0[0] as f32 - PIXEL_MEAN) / PIXEL_STD;
        let (tx, ty) = (x as usize + off_x, y as usize + off_y);
        for channel in 0..3 {
            tensor[[0, channel, ty, tx]] = value;
        }
    }

    (tensor, letterbox)
}

/// Map output tensors to stride heads by name ("score_8", "bbox_16", "kps_32"),
/// falling back to the standard positional layout for numerically named exports.
fn map_output_heads(names: &[String]) -> [HeadSlots; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<HeadSlots>> = STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named.as_deref() {
        Some(&[s8, s16, s32]) => [s8, s16, s32],
        _ => {
            tracing::debug!(?names, "SCRFD output names not recognized, using positional layout");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode the detections of one stride head above `min_confidence`.
fn decode_head(head: &StrideHead<'_>, letterbox: &Letterbox, min_confidence: f32) -> Vec<BoundingBox> {
    let grid = INPUT_SIZE as usize / head.stride;
    let step = head.stride as f32;
    let anchors = grid * grid * ANCHORS_PER_CELL;

    let mut found = Vec::new();
    for idx in 0..anchors {
        let score = head.scores.get(idx).copied().unwrap_or(0.0);
        if score <= min_confidence {
            continue;
        }

        let cell = idx / ANCHORS_PER_CELL;
        let anchor_x = (cell % grid) as f32 * step;
        let anchor_y = (cell / grid) as f32 * step;

        let Some(dist) = head.boxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let (x1, y1) = letterbox.unmap(anchor_x - dist[0] * step, anchor_y - dist[1] * step);
        let (x2, y2) = letterbox.unmap(anchor_x + dist[2] * step, anchor_y + dist[3] * step);

        let landmarks = head.keypoints.get(idx * 10..idx * 10 + 10).map(|kps| {
            let mut points: Landmarks = [(0.0, 0.0); 5];
            for (point, pair) in points.iter_mut().zip(kps.chunks_exact(2)) {
                *point = letterbox.unmap(anchor_x + pair[0] * step, anchor_y + pair[1] * step);
            }
            points
        });

        found.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    found
}

/// Greedy non-maximum suppression; output is sorted by descending confidence.
fn suppress_overlaps(mut candidates: Vec<BoundingBox>, iou_limit: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_limit) {
            kept.push(candidate);
        }
    }
    kept
}
