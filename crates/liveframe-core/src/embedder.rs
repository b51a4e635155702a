use image::DynamicImage;

use crate::align::align_face;
use crate::detector::FaceDetector;
use crate::provider::{EmbeddingProvider, ProviderError};
use crate::recognizer::FaceRecognizer;
use crate::types::Embedding;

/// SCRFD + ArcFace embedding provider.
///
/// Embeds the highest-confidence face of each frame. Frames without a face
/// fail with [`ProviderError::NoFace`].
pub struct FaceEmbedder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FaceEmbedder {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self {
            detector,
            recognizer,
        }
    }

    pub fn load(detector_path: &str, recognizer_path: &str) -> Result<Self, ProviderError> {
        let detector = FaceDetector::load(detector_path)?;
        tracing::info!(path = detector_path, "SCRFD detector loaded");
        let recognizer = FaceRecognizer::load(recognizer_path)?;
        tracing::info!(path = recognizer_path, "ArcFace recognizer loaded");
        Ok(Self::new(detector, recognizer))
    }
}

impl EmbeddingProvider for FaceEmbedder {
    fn embed(&mut self, image: &DynamicImage) -> Result<Embedding, ProviderError> {
        let rgb = image.to_rgb8();
        let faces = self.detector.detect(&rgb)?;
        let face = faces.first().ok_or(ProviderError::NoFace)?;
        tracing::trace!(
            confidence = face.confidence,
            faces = faces.len(),
            "face selected"
        );

        let aligned = align_face(&rgb, &face.landmarks).ok_or(ProviderError::DegenerateLandmarks)?;
        Ok(self.recognizer.extract(&aligned)?)
    }
}
