//! In-process provider for tests: the "faces" in an image are looked up by
//! the image's width.

use facefind_core::{BoundingBox, DetectedFace, Embedding, EmbeddingProvider, ProviderError};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;

pub(crate) struct StubProvider {
    faces: HashMap<u32, Vec<Vec<f32>>>,
    fail: bool,
}

impl StubProvider {
    pub(crate) fn new() -> Self {
        Self {
            faces: HashMap::new(),
            fail: false,
        }
    }

    /// Images `width` pixels wide contain one face per vector.
    pub(crate) fn with_faces(mut self, width: u32, vectors: Vec<Vec<f32>>) -> Self {
        self.faces.insert(width, vectors);
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl EmbeddingProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn embed_faces(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, ProviderError> {
        if self.fail {
            return Err(ProviderError::InferenceFailed("stub failure".into()));
        }
        let vectors = self.faces.get(&image.width()).cloned().unwrap_or_default();
        Ok(vectors
            .into_iter()
            .enumerate()
            .map(|(i, values)| DetectedFace {
                region: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 4.0,
                    height: 4.0,
                    confidence: 1.0 - i as f32 * 0.1,
                    landmarks: None,
                },
                embedding: Embedding::new(values),
            })
            .collect())
    }
}

/// PNG-encoded gray image `width` pixels wide.
pub(crate) fn png(width: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, 8, image::Rgb([120, 120, 120])))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}
