use image::DynamicImage;
use thiserror::Error;

use crate::detector::DetectorError;
use crate::recognizer::RecognizerError;
use crate::types::Embedding;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("no face detected")]
    NoFace,
    #[error("face landmarks are degenerate")]
    DegenerateLandmarks,
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Turns one decoded frame into a face embedding.
///
/// Detection must be strict: a frame without a detectable face yields
/// [`ProviderError::NoFace`], never a best-effort embedding of the whole
/// image. Implementations may keep inference sessions and scratch buffers,
/// hence `&mut self`.
pub trait EmbeddingProvider {
    fn embed(&mut self, image: &DynamicImage) -> Result<Embedding, ProviderError>;
}
