//! Enrollment, identification, and registry lookups.

use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};
use chrono::Utc;
use facefind_core::{
    Identity, IdentityId, Matcher, PersonMetadata, RegisteredPerson, ToleranceMatcher,
};
use facefind_store::{Database, EmbeddingStore, IdentityRegistry, ImageDir, StoreError};
use image::DynamicImage;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Result of a successful enrollment.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub identity_id: IdentityId,
    /// Trimmed, lowercased name as reported back to the caller.
    pub display_name: String,
    /// Normalized name used in the saved image's file name.
    pub name_key: String,
    pub image_path: PathBuf,
}

/// One reported match: the registered person, the stored image whose
/// embedding matched, and the confidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchReport {
    #[serde(flatten)]
    pub identity: Identity,
    pub file: String,
    pub confidence: f32,
}

#[derive(Clone)]
pub struct FacefindService {
    engine: EngineHandle,
    db: Database,
    registry: IdentityRegistry,
    embeddings: EmbeddingStore,
    images: ImageDir,
    matcher: ToleranceMatcher,
}

impl FacefindService {
    /// Open the database and image directory named in `config`.
    pub fn open(config: &Config, engine: EngineHandle) -> Result<Self, EngineError> {
        let db = Database::open(&config.db_path)?;
        let images = ImageDir::open(&config.image_dir)?;
        let matcher = config.matcher(engine.metric());
        tracing::info!(
            tolerance = matcher.tolerance,
            min_confidence = matcher.min_confidence,
            metric = ?matcher.metric,
            "service ready"
        );

        Ok(Self {
            engine,
            registry: IdentityRegistry::new(db.clone()),
            embeddings: EmbeddingStore::new(db.clone()),
            db,
            images,
            matcher,
        })
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn images(&self) -> &ImageDir {
        &self.images
    }

    pub fn matcher(&self) -> &ToleranceMatcher {
        &self.matcher
    }

    /// Register a new person from a photo and their metadata.
    ///
    /// The photo must show at least one face; when it shows several, only the
    /// most confident detection is stored. The face image is saved first,
    /// then the person and their embedding are committed together. A failed
    /// commit removes the saved image again.
    pub async fn enroll(
        &self,
        image_bytes: Vec<u8>,
        metadata: PersonMetadata,
    ) -> Result<Enrollment, EngineError> {
        let metadata = metadata.normalized();
        let name_key = metadata.name_key().ok_or(EngineError::MissingField("name"))?;
        let display_name = metadata.name.as_deref().unwrap_or_default().to_lowercase();

        let image = decode(image_bytes).await?;
        let faces = self.engine.embed_faces(image.clone()).await?;
        if faces.len() > 1 {
            tracing::info!(
                faces = faces.len(),
                "enroll: several faces detected, keeping the most confident"
            );
        }
        let face = faces.into_iter().next().ok_or(EngineError::NoFaceDetected)?;

        let images = self.images.clone();
        let key = name_key.clone();
        let image_path =
            blocking(move || images.save_jpeg(&key, &image, Utc::now())).await?;

        let db = self.db.clone();
        let stored_path = image_path.to_string_lossy().into_owned();
        let embedding = face.embedding;
        let committed = blocking(move || db.enroll(&metadata, &stored_path, &embedding)).await;

        let identity_id = match committed {
            Ok(id) => id,
            Err(e) => {
                if let Err(remove_err) = self.images.remove(&image_path) {
                    tracing::warn!(
                        path = %image_path.display(),
                        error = %remove_err,
                        "enroll: could not remove image after failed commit"
                    );
                }
                return Err(e);
            }
        };

        tracing::info!(
            identity_id,
            name = %name_key,
            image_path = %image_path.display(),
            "person enrolled"
        );
        Ok(Enrollment {
            identity_id,
            display_name,
            name_key,
            image_path,
        })
    }

    /// Match every face in the photo against all stored embeddings.
    ///
    /// Results are grouped by detected face (detector order) and, within a
    /// face, follow the store's insertion order. One person may appear more
    /// than once when several of their embeddings match.
    pub async fn identify(&self, image_bytes: Vec<u8>) -> Result<Vec<MatchReport>, EngineError> {
        let image = decode(image_bytes).await?;
        let faces = self.engine.embed_faces(image).await?;
        if faces.is_empty() {
            return Err(EngineError::NoFaceDetected);
        }

        let embeddings = self.embeddings.clone();
        let gallery = blocking(move || embeddings.all_embeddings()).await?;

        let matches: Vec<_> = faces
            .iter()
            .flat_map(|face| self.matcher.find_matches(&face.embedding, &gallery))
            .collect();
        tracing::debug!(
            faces = faces.len(),
            gallery = gallery.len(),
            matches = matches.len(),
            "identify: scan finished"
        );
        if matches.is_empty() {
            return Ok(Vec::new());
        }

        let registry = self.registry.clone();
        let mut ids: Vec<IdentityId> = matches.iter().map(|m| m.identity_id).collect();
        ids.sort_unstable();
        ids.dedup();
        let people = blocking(move || {
            let mut people = HashMap::with_capacity(ids.len());
            for id in ids {
                if let Some(identity) = registry.get_by_id(id)? {
                    people.insert(id, identity);
                }
            }
            Ok(people)
        })
        .await?;

        let reports = matches
            .into_iter()
            .filter_map(|m| {
                let identity = people.get(&m.identity_id)?.clone();
                Some(MatchReport {
                    identity,
                    file: m.image_path,
                    confidence: m.confidence,
                })
            })
            .collect();
        Ok(reports)
    }

    pub async fn person_by_id(&self, id: IdentityId) -> Result<Option<Identity>, EngineError> {
        let registry = self.registry.clone();
        blocking(move || registry.get_by_id(id)).await
    }

    /// Persons whose name equals `name`, ignoring case.
    pub async fn persons_by_name(&self, name: &str) -> Result<Vec<Identity>, EngineError> {
        let registry = self.registry.clone();
        let name = name.to_string();
        blocking(move || registry.get_by_name(&name)).await
    }

    pub async fn all_registered(&self) -> Result<Vec<RegisteredPerson>, EngineError> {
        let registry = self.registry.clone();
        blocking(move || registry.list_all()).await
    }
}

async fn decode(bytes: Vec<u8>) -> Result<DynamicImage, EngineError> {
    tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .map_err(|e| EngineError::TaskFailed(e.to_string()))?
        .map_err(|e| EngineError::InvalidImage(e.to_string()))
}

/// Run a storage operation on the blocking pool.
async fn blocking<T, F>(op: F) -> Result<T, EngineError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| EngineError::TaskFailed(e.to_string()))?;
    Ok(result?)
}
