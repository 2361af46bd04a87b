//! facefind-core — Identity matching primitives.
//!
//! Defines the records shared by every facefind crate, the distance metrics
//! used to compare face embeddings, the tolerance matcher, and the
//! [`EmbeddingProvider`] seam behind which face detection and embedding
//! extraction live.

pub mod matcher;
pub mod metadata;
pub mod provider;
pub mod types;

pub use matcher::{confidence, FaceMatch, Matcher, Metric, ToleranceMatcher};
pub use metadata::PersonMetadata;
pub use provider::{EmbeddingProvider, ProviderError};
pub use types::{BoundingBox, DetectedFace, Embedding, EmbeddingRecord, Identity, IdentityId, RegisteredPerson};
