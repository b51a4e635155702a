//! SCRFD face detection via ONNX Runtime.
//!
//! Expects the InsightFace `det_10g` export: a single `1×3×640×640` input and
//! nine outputs ordered as scores, boxes and keypoints for strides 8, 16 and
//! 32, with two anchors per grid cell.

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_IOU: f32 = 0.4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("failed to load detection model {path}: {message}")]
    Load { path: String, message: String },
    #[error("detection inference failed: {0}")]
    Inference(String),
    #[error("unexpected detector output: {0}")]
    Output(String),
}

/// A detected face in source image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// `[x1, y1, x2, y2]`.
    pub bbox: [f32; 4],
    pub confidence: f32,
    /// Left eye, right eye, nose, left mouth corner, right mouth corner.
    pub landmarks: [(f32, f32); 5],
}

impl Detection {
    pub fn area(&self) -> f32 {
        (self.bbox[2] - self.bbox[0]).max(0.0) * (self.bbox[3] - self.bbox[1]).max(0.0)
    }
}

pub struct FaceDetector {
    session: Session,
    pub score_threshold: f32,
    pub nms_iou: f32,
}

impl FaceDetector {
    pub fn load(path: &str) -> Result<Self, DetectorError> {
        let load_error = |e: &dyn std::fmt::Display| DetectorError::Load {
            path: path.to_string(),
            message: e.to_string(),
        };
        let session = Session::builder()
            .map_err(|e| load_error(&e))?
            .commit_from_file(path)
            .map_err(|e| load_error(&e))?;

        Ok(Self {
            session,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            nms_iou: DEFAULT_NMS_IOU,
        })
    }

    /// Detect faces, highest confidence first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let (input, scale) = letterbox(image);
        let tensor =
            Tensor::from_array(input).map_err(|e| DetectorError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let extract = |index: usize| -> Result<Vec<f32>, DetectorError> {
            let view = outputs[index]
                .try_extract_array::<f32>()
                .map_err(|e| DetectorError::Output(format!("output {index}: {e}")))?;
            Ok(view.iter().copied().collect())
        };

        let mut candidates = Vec::new();
        for (i, stride) in STRIDES.into_iter().enumerate() {
            let scores = extract(i)?;
            let boxes = extract(i + STRIDES.len())?;
            let kps = extract(i + 2 * STRIDES.len())?;
            decode_stride(
                &scores,
                &boxes,
                &kps,
                stride,
                self.score_threshold,
                scale,
                &mut candidates,
            )?;
        }

        Ok(nms(candidates, self.nms_iou))
    }
}

/// Resize into the top-left of a 640×640 canvas, keeping aspect ratio, and
/// normalise to NCHW `(v − 127.5) / 128`. Returns the tensor and the scale
/// applied to source coordinates.
fn letterbox(image: &RgbImage) -> (Array4<f32>, f32) {
    let (width, height) = image.dimensions();
    let size = INPUT_SIZE as f32;
    let scale = (size / width as f32).min(size / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let side = INPUT_SIZE as usize;
    let mut input = Array4::<f32>::from_elem((1, 3, side, side), -127.5 / 128.0);
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            input[[0, c, y as usize, x as usize]] = (f32::from(pixel.0[c]) - 127.5) / 128.0;
        }
    }
    (input, scale)
}

/// Decode one stride level into detections in source coordinates.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: u32,
    threshold: f32,
    scale: f32,
    out: &mut Vec<Detection>,
) -> Result<(), DetectorError> {
    let cells = (INPUT_SIZE / stride) as usize;
    let anchors = cells * cells * ANCHORS_PER_CELL;
    if scores.len() < anchors || boxes.len() < anchors * 4 || kps.len() < anchors * 10 {
        return Err(DetectorError::Output(format!(
            "stride {stride}: expected {anchors} anchors, got {} scores, {} boxes, {} keypoints",
            scores.len(),
            boxes.len() / 4,
            kps.len() / 10
        )));
    }

    let s = stride as f32;
    for anchor in 0..anchors {
        let confidence = scores[anchor];
        if confidence < threshold {
            continue;
        }

        let cell = anchor / ANCHORS_PER_CELL;
        let cx = (cell % cells) as f32 * s;
        let cy = (cell / cells) as f32 * s;

        let b = &boxes[anchor * 4..anchor * 4 + 4];
        let bbox = [
            (cx - b[0] * s) / scale,
            (cy - b[1] * s) / scale,
            (cx + b[2] * s) / scale,
            (cy + b[3] * s) / scale,
        ];

        let k = &kps[anchor * 10..anchor * 10 + 10];
        let mut landmarks = [(0.0f32, 0.0f32); 5];
        for (i, point) in landmarks.iter_mut().enumerate() {
            *point = ((cx + k[2 * i] * s) / scale, (cy + k[2 * i + 1] * s) / scale);
        }

        out.push(Detection {
            bbox,
            confidence,
            landmarks,
        });
    }
    Ok(())
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let x1 = a.bbox[0].max(b.bbox[0]);
    let y1 = a.bbox[1].max(b.bbox[1]);
    let x2 = a.bbox[2].min(b.bbox[2]);
    let y2 = a.bbox[3].min(b.bbox[3]);
    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy non-maximum suppression. Output is sorted by confidence.
fn nms(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
