//! Transport frame decoding: base64 (optionally inside a data URI) to raster.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use image::DynamicImage;
use thiserror::Error;

/// Standard alphabet, padding optional. Capture devices are inconsistent
/// about trailing `=`.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("frame payload is empty")]
    Empty,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unsupported or corrupt image: {0}")]
    Image(#[from] image::ImageError),
}

/// Strip a data-URI header (`data:image/jpeg;base64,`) if present.
///
/// Everything up to and including the first comma is removed.
pub fn strip_data_uri(frame: &str) -> &str {
    match frame.split_once(',') {
        Some((_, payload)) => payload,
        None => frame,
    }
}

/// Decode the base64 payload of a frame into raw image bytes.
pub fn decode_payload(frame: &str) -> Result<Vec<u8>, DecodeError> {
    let payload = strip_data_uri(frame);
    let compact: Vec<u8> = payload
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(LENIENT.decode(compact)?)
}

/// Decode one transport-encoded frame into a raster image.
pub fn decode_frame(frame: &str) -> Result<DynamicImage, DecodeError> {
    let bytes = decode_payload(frame)?;
    Ok(image::load_from_memory(&bytes)?)
}
