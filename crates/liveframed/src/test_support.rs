use std::io::Cursor;
use std::time::Duration;

use base64::Engine;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use liveframe_core::{Embedding, EmbeddingProvider, ProviderError};

/// Provider whose n-th embedding is `[0.05 * n, 0.5]`, so consecutive
/// frames sit 0.05 apart.
#[derive(Default)]
pub struct CountingProvider {
    pub calls: usize,
    pub delay: Duration,
}

impl EmbeddingProvider for CountingProvider {
    fn embed(&mut self, _image: &DynamicImage) -> Result<Embedding, ProviderError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let n = self.calls as f32;
        self.calls += 1;
        Ok(Embedding::new(vec![0.05 * n, 0.5]))
    }
}

/// PNG data URI with enough texture to pass the spoof heuristic.
pub fn textured_frame() -> String {
    let img = GrayImage::from_fn(64, 64, |x, _| Luma([if (x / 4) % 2 == 0 { 100 } else { 140 }]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(buf.into_inner())
    )
}
