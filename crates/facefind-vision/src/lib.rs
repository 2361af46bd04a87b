//! facefind-vision — ONNX-backed face embedding provider.
//!
//! Uses SCRFD (`det_10g.onnx`) for detection and ArcFace (`w600k_r50.onnx`)
//! for embeddings, both from the insightface model zoo.

pub mod detector;
pub mod recognizer;

pub use detector::{DetectorError, FaceDetector};
pub use recognizer::{FaceRecognizer, RecognizerError};

use facefind_core::{DetectedFace, EmbeddingProvider, Metric, ProviderError};
use image::DynamicImage;
use std::path::Path;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// ArcFace embeddings are compared by angle, not by Euclidean distance.
pub const ARCFACE_METRIC: Metric = Metric::Cosine;

impl From<DetectorError> for ProviderError {
    fn from(e: DetectorError) -> Self {
        match e {
            DetectorError::ModelNotFound(_) => ProviderError::Unavailable(e.to_string()),
            other => ProviderError::InferenceFailed(format!("detector: {other}")),
        }
    }
}

impl From<RecognizerError> for ProviderError {
    fn from(e: RecognizerError) -> Self {
        match e {
            RecognizerError::ModelNotFound(_) => ProviderError::Unavailable(e.to_string()),
            other => ProviderError::InferenceFailed(format!("recognizer: {other}")),
        }
    }
}

/// SCRFD + ArcFace provider.
pub struct OnnxProvider {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxProvider {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, ProviderError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl EmbeddingProvider for OnnxProvider {
    fn name(&self) -> &str {
        "scrfd-arcface"
    }

    fn embed_faces(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, ProviderError> {
        let rgb = image.to_rgb8();
        let regions = self.detector.detect(&rgb)?;

        let mut faces = Vec::with_capacity(regions.len());
        for region in regions {
            if region.landmarks.is_none() {
                tracing::debug!(confidence = region.confidence, "face without landmarks skipped");
                continue;
            }
            let embedding = self.recognizer.extract(&rgb, &region)?;
            faces.push(DetectedFace { region, embedding });
        }
        Ok(faces)
    }

    fn metric(&self) -> Metric {
        ARCFACE_METRIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facefind_core::{Embedding, EmbeddingRecord, Matcher, ToleranceMatcher};
    use facefind_core::matcher::{DEFAULT_MIN_CONFIDENCE, DEFAULT_TOLERANCE};

    /// Unit vector at cosine similarity `cos` to `[1, 0, 0, ...]`.
    fn at_cosine(cos: f32, dim: usize) -> Embedding {
        let mut values = vec![0.0; dim];
        values[0] = cos;
        values[1] = (1.0 - cos * cos).sqrt();
        Embedding::new(values)
    }

    #[test]
    fn test_same_person_arcface_similarity_matches() {
        let probe = at_cosine(1.0, 512);
        let gallery = vec![EmbeddingRecord {
            record_id: 1,
            identity_id: 7,
            image_path: "asha.jpg".into(),
            embedding: at_cosine(0.6, 512),
        }];

        let arcface = ToleranceMatcher::new(DEFAULT_TOLERANCE, DEFAULT_MIN_CONFIDENCE, ARCFACE_METRIC);
        let matches = arcface.find_matches(&probe, &gallery);
        assert_eq!(matches.len(), 1);
        assert!((matches[0].confidence - 0.6).abs() < 1e-6);

        // The same pair is ~0.89 apart in Euclidean terms and would be missed.
        let euclidean =
            ToleranceMatcher::new(DEFAULT_TOLERANCE, DEFAULT_MIN_CONFIDENCE, Metric::Euclidean);
        assert!(euclidean.find_matches(&probe, &gallery).is_empty());
    }

    #[test]
    fn test_unrelated_faces_do_not_match() {
        let probe = at_cosine(1.0, 512);
        let gallery = vec![EmbeddingRecord {
            record_id: 1,
            identity_id: 7,
            image_path: "ravi.jpg".into(),
            embedding: at_cosine(0.2, 512),
        }];
        let arcface = ToleranceMatcher::new(DEFAULT_TOLERANCE, DEFAULT_MIN_CONFIDENCE, ARCFACE_METRIC);
        assert!(arcface.find_matches(&probe, &gallery).is_empty());
    }
}
