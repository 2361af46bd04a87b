//! Faces loaded from the image directory once at startup.
//!
//! The cache is a snapshot: enrollments made after [`BootstrapCache::load`]
//! are not reflected in it, and matching never reads it. The database is the
//! only source of truth; the cache exists for status reporting and offline
//! inspection of what the image directory held at process start.

use crate::engine::{EngineError, EngineHandle};
use chrono::{DateTime, Utc};
use facefind_core::Embedding;
use facefind_store::ImageDir;

/// One face image found in the image directory.
#[derive(Debug, Clone)]
pub struct BootstrapFace {
    /// File name without extension.
    pub name: String,
    /// File name as found on disk.
    pub file: String,
    /// Embedding of the first face detected in the file.
    pub embedding: Embedding,
}

#[derive(Debug, Clone)]
pub struct BootstrapCache {
    faces: Vec<BootstrapFace>,
    loaded_at: DateTime<Utc>,
}

impl BootstrapCache {
    pub fn empty() -> Self {
        Self {
            faces: Vec::new(),
            loaded_at: Utc::now(),
        }
    }

    /// Embed every image in `images`. Files that fail to decode, that the
    /// provider cannot embed, or that contain no face are skipped with a
    /// warning.
    pub async fn load(images: &ImageDir, engine: &EngineHandle) -> Result<Self, EngineError> {
        let dir = images.clone();
        let paths = tokio::task::spawn_blocking(move || dir.face_images())
            .await
            .map_err(|e| EngineError::TaskFailed(e.to_string()))??;

        let mut faces = Vec::new();
        for path in paths {
            let file = path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();

            let decode_path = path.clone();
            let decoded = tokio::task::spawn_blocking(move || image::open(decode_path))
                .await
                .map_err(|e| EngineError::TaskFailed(e.to_string()))?;
            let image = match decoded {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(file = %file, error = %e, "bootstrap: unreadable image skipped");
                    continue;
                }
            };

            let detected = match engine.embed_faces(image).await {
                Ok(detected) => detected,
                Err(EngineError::Provider(e)) => {
                    tracing::warn!(file = %file, error = %e, "bootstrap: embedding failed, skipped");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let Some(face) = detected.into_iter().next() else {
                tracing::warn!(file = %file, "bootstrap: no face found");
                continue;
            };

            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.clone());
            faces.push(BootstrapFace {
                name,
                file,
                embedding: face.embedding,
            });
        }

        tracing::info!(
            dir = %images.root().display(),
            faces = faces.len(),
            "bootstrap cache loaded"
        );
        Ok(Self {
            faces,
            loaded_at: Utc::now(),
        })
    }

    pub fn faces(&self) -> &[BootstrapFace] {
        &self.faces
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// When the snapshot was taken.
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}
