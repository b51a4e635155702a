//! ArcFace recognition via ONNX Runtime.

use std::path::Path;

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;
use thiserror::Error;

use crate::align::ALIGNED_SIZE;
use crate::types::Embedding;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("failed to load recognition model {path}: {message}")]
    Load { path: String, message: String },
    #[error("aligned face must be {expected}x{expected}, got {width}x{height}")]
    InputSize {
        expected: u32,
        width: u32,
        height: u32,
    },
    #[error("recognition inference failed: {0}")]
    Inference(String),
    #[error("model returned an empty or zero-norm embedding")]
    EmptyEmbedding,
}

pub struct FaceRecognizer {
    session: Session,
    model_version: String,
}

impl FaceRecognizer {
    pub fn load(path: &str) -> Result<Self, RecognizerError> {
        let load_error = |e: &dyn std::fmt::Display| RecognizerError::Load {
            path: path.to_string(),
            message: e.to_string(),
        };
        let session = Session::builder()
            .map_err(|e| load_error(&e))?
            .commit_from_file(path)
            .map_err(|e| load_error(&e))?;

        let model_version = Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Self {
            session,
            model_version,
        })
    }

    /// Extract an L2-normalised embedding from an aligned 112×112 RGB crop.
    pub fn extract(&mut self, aligned: &RgbImage) -> Result<Embedding, RecognizerError> {
        let (width, height) = aligned.dimensions();
        if width != ALIGNED_SIZE || height != ALIGNED_SIZE {
            return Err(RecognizerError::InputSize {
                expected: ALIGNED_SIZE,
                width,
                height,
            });
        }

        let tensor = Tensor::from_array(preprocess(aligned))
            .map_err(|e| RecognizerError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| RecognizerError::Inference(e.to_string()))?;
        let mut values: Vec<f32> = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| RecognizerError::Inference(e.to_string()))?
            .iter()
            .copied()
            .collect();

        if !l2_normalize(&mut values) {
            return Err(RecognizerError::EmptyEmbedding);
        }

        Ok(Embedding {
            values,
            model_version: Some(self.model_version.clone()),
        })
    }
}

/// NCHW, RGB, `(v − 127.5) / 127.5`.
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let side = ALIGNED_SIZE as usize;
    let mut input = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            input[[0, c, y as usize, x as usize]] = (f32::from(pixel.0[c]) - 127.5) / 127.5;
        }
    }
    input
}

/// Scale to unit length in place. Returns false for empty or zero vectors.
fn l2_normalize(values: &mut [f32]) -> bool {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if values.is_empty() || norm <= f32::EPSILON || !norm.is_finite() {
        return false;
    }
    for v in values.iter_mut() {
        *v /= norm;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        assert!(l2_normalize(&mut v));
        assert_eq!(v, vec![0.6, 0.8]);
    }

    #[test]
    fn test_l2_normalize_rejects_zero_and_empty() {
        assert!(!l2_normalize(&mut [0.0, 0.0]));
        assert!(!l2_normalize(&mut []));
        assert!(!l2_normalize(&mut [f32::NAN, 1.0]));
    }

    #[test]
    fn test_preprocess_layout() {
        let mut img = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
        img.put_pixel(3, 7, image::Rgb([255, 0, 127]));
        let input = preprocess(&img);
        assert_eq!(input.shape(), &[1, 3, 112, 112]);
        assert_eq!(input[[0, 0, 7, 3]], 1.0);
        assert_eq!(input[[0, 1, 7, 3]], -1.0);
        assert!((input[[0, 2, 7, 3]] + 0.5 / 127.5).abs() < 1e-6);
    }
}
