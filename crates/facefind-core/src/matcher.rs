//! Tolerance matching of a probe embedding against the stored gallery.

use crate::types::{Embedding, EmbeddingRecord, IdentityId};
use serde::{Deserialize, Serialize};

/// Maximum distance for two embeddings to count as the same face.
pub const DEFAULT_TOLERANCE: f32 = 0.6;
/// Minimum rounded confidence for a match to be reported.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

/// Distance function between two embeddings. Lower = more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// L2 distance.
    #[default]
    Euclidean,
    /// `1 - cosine similarity`, in [0, 2].
    Cosine,
}

impl Metric {
    pub fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        match self {
            Metric::Euclidean => a.euclidean_distance(b),
            Metric::Cosine => 1.0 - a.similarity(b),
        }
    }
}

/// `1 - distance`, rounded to two decimals.
pub fn confidence(distance: f32) -> f32 {
    ((1.0 - distance) * 100.0).round() / 100.0
}

/// One stored embedding that matched a probe.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub identity_id: IdentityId,
    pub image_path: String,
    pub distance: f32,
    pub confidence: f32,
}

/// Strategy for comparing a probe embedding against a gallery of stored faces.
pub trait Matcher {
    fn find_matches(&self, probe: &Embedding, gallery: &[EmbeddingRecord]) -> Vec<FaceMatch>;
}

/// Reports every gallery entry within `tolerance` of the probe whose
/// confidence also reaches `min_confidence`.
///
/// Entries are scored independently: several embeddings of the same identity
/// each produce their own match. Results keep gallery order.
#[derive(Debug, Clone)]
pub struct ToleranceMatcher {
    pub tolerance: f32,
    pub min_confidence: f32,
    pub metric: Metric,
}

impl Default for ToleranceMatcher {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            metric: Metric::Euclidean,
        }
    }
}

impl ToleranceMatcher {
    pub fn new(tolerance: f32, min_confidence: f32, metric: Metric) -> Self {
        Self {
            tolerance,
            min_confidence,
            metric,
        }
    }
}

impl Matcher for ToleranceMatcher {
    fn find_matches(&self, probe: &Embedding, gallery: &[EmbeddingRecord]) -> Vec<FaceMatch> {
        let mut matches = Vec::new();

        for record in gallery {
            if record.embedding.dim() != probe.dim() {
                tracing::warn!(
                    record_id = record.record_id,
                    identity_id = record.identity_id,
                    stored_dim = record.embedding.dim(),
                    probe_dim = probe.dim(),
                    "skipping embedding with mismatched dimensionality"
                );
                continue;
            }

            let distance = self.metric.distance(probe, &record.embedding);
            if distance > self.tolerance {
                continue;
            }

            let confidence = confidence(distance);
            if confidence < self.min_confidence {
                continue;
            }

            matches.push(FaceMatch {
                identity_id: record.identity_id,
                image_path: record.image_path.clone(),
                distance,
                confidence,
            });
        }

        matches
    }
}
