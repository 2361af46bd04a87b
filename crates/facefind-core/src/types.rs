use crate::metadata::PersonMetadata;
use serde::{Deserialize, Serialize};

/// Registry-assigned identity key (SQLite rowid of the `persons` table).
pub type IdentityId = i64;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector.
///
/// Serializes as a bare JSON array of numbers, which is also the on-disk
/// encoding used by the embedding store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Dimensionality of the vector.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// True when the vector is non-empty and every component is finite.
    pub fn is_well_formed(&self) -> bool {
        !self.values.is_empty() && self.values.iter().all(|v| v.is_finite())
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face found by an [`EmbeddingProvider`](crate::EmbeddingProvider).
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub region: BoundingBox,
    pub embedding: Embedding,
}

/// A registered person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    #[serde(flatten)]
    pub metadata: PersonMetadata,
}

/// A stored embedding together with the identity that owns it.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    /// Row id in the embedding store; also the scan order.
    pub record_id: i64,
    pub identity_id: IdentityId,
    /// Path of the face image the embedding was extracted from.
    pub image_path: String,
    pub embedding: Embedding,
}

/// Registry listing entry: an identity plus the image of its first
/// embedding record, if it has one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredPerson {
    #[serde(flatten)]
    pub identity: Identity,
    pub image: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert_eq!(b.euclidean_distance(&b), 0.0);
    }

    #[test]
    fn test_well_formed() {
        assert!(Embedding::new(vec![0.1, 0.2]).is_well_formed());
        assert!(!Embedding::new(vec![]).is_well_formed());
        assert!(!Embedding::new(vec![0.1, f32::NAN]).is_well_formed());
    }

    #[test]
    fn test_embedding_serializes_as_array() {
        let e = Embedding::new(vec![0.5, -0.25]);
        assert_eq!(serde_json::to_string(&e).unwrap(), "[0.5,-0.25]");
        let back: Embedding = serde_json::from_str("[0.5,-0.25]").unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_registered_person_flattens_identity() {
        let mut metadata = PersonMetadata::default();
        metadata.name = Some("asha".into());
        let person = RegisteredPerson {
            identity: Identity { id: 7, metadata },
            image: None,
        };
        let json = serde_json::to_value(&person).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["name"], "asha");
        assert!(json["image"].is_null());
        assert!(json["district"].is_null());
    }
}
