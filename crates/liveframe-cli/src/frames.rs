use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine;

/// Read an image file and wrap it the way a browser client would send it.
pub fn encode_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    };
    Ok(format!(
        "data:{mime};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    ))
}

pub fn encode_files(paths: &[PathBuf]) -> Result<Vec<String>> {
    paths.iter().map(|p| encode_file(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn test_encoded_file_decodes() {
        let path = std::env::temp_dir().join(format!("liveframe-cli-{}.png", std::process::id()));
        GrayImage::from_pixel(8, 6, Luma([90])).save(&path).unwrap();

        let frame = encode_file(&path).unwrap();
        fs::remove_file(&path).ok();

        assert!(frame.starts_with("data:image/png;base64,"));
        let img = liveframe_core::decode_frame(&frame).unwrap();
        assert_eq!((img.width(), img.height()), (8, 6));
    }

    #[test]
    fn test_missing_file() {
        let err = encode_file(Path::new("/nonexistent/liveframe.png")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
