use crate::matcher::Metric;
use crate::types::DetectedFace;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// Face detection and embedding extraction.
///
/// Implementations may hold inference sessions that need exclusive access,
/// hence `&mut self`. The engine runs a provider on a dedicated thread.
pub trait EmbeddingProvider: Send {
    /// Short identifier reported by status endpoints.
    fn name(&self) -> &str;

    /// Detect faces in `image` and return one embedding per face, ordered by
    /// detector confidence (best first). No faces is `Ok(vec![])`.
    fn embed_faces(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, ProviderError>;

    /// Distance function matching the embedding space this provider produces.
    fn metric(&self) -> Metric {
        Metric::Euclidean
    }
}
