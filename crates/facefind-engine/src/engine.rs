use facefind_core::{DetectedFace, EmbeddingProvider, Metric, ProviderError};
use facefind_store::StoreError;
use image::DynamicImage;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("No face found")]
    NoFaceDetected,
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("blocking task failed: {0}")]
    TaskFailed(String),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl EngineError {
    /// True for errors caused by the caller's input rather than the service.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::MissingField(_) | EngineError::InvalidImage(_) | EngineError::NoFaceDetected
        )
    }
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Embed {
        image: DynamicImage,
        reply: oneshot::Sender<Result<Vec<DetectedFace>, ProviderError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    provider: Arc<str>,
    metric: Metric,
}

impl EngineHandle {
    /// Detect faces in `image` and extract one embedding per face.
    pub async fn embed_faces(&self, image: DynamicImage) -> Result<Vec<DetectedFace>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Embed {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        let faces = reply_rx.await.map_err(|_| EngineError::ChannelClosed)??;
        Ok(faces)
    }

    /// Name of the provider running on the engine thread.
    pub fn provider_name(&self) -> &str {
        &self.provider
    }

    /// Distance metric for embeddings produced by this provider.
    pub fn metric(&self) -> Metric {
        self.metric
    }
}

/// Move `provider` onto a dedicated OS thread and return a handle to it.
///
/// The thread exits once every handle has been dropped.
pub fn spawn_engine<P>(mut provider: P) -> Result<EngineHandle, EngineError>
where
    P: EmbeddingProvider + 'static,
{
    let name: Arc<str> = Arc::from(provider.name());
    let metric = provider.metric();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    let thread_name = name.clone();
    std::thread::Builder::new()
        .name("facefind-engine".into())
        .spawn(move || {
            tracing::info!(provider = %thread_name, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Embed { image, reply } => {
                        let result = provider.embed_faces(&image);
                        if let Ok(faces) = &result {
                            tracing::debug!(
                                width = image.width(),
                                height = image.height(),
                                faces = faces.len(),
                                "embed: faces extracted"
                            );
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        provider: name,
        metric,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{png, StubProvider};

    #[tokio::test]
    async fn test_embed_through_engine_thread() {
        let handle = spawn_engine(StubProvider::new().with_faces(40, vec![vec![0.1, 0.2]])).unwrap();
        assert_eq!(handle.provider_name(), "stub");
        assert_eq!(handle.metric(), Metric::Euclidean);

        let image = image::load_from_memory(&png(40)).unwrap();
        let faces = handle.embed_faces(image).await.unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].embedding.values, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn test_provider_error_is_forwarded() {
        let handle = spawn_engine(StubProvider::new().failing()).unwrap();
        let image = image::load_from_memory(&png(10)).unwrap();
        let err = handle.embed_faces(image).await.unwrap_err();
        assert!(matches!(err, EngineError::Provider(ProviderError::InferenceFailed(_))));
        assert!(!err.is_validation());
    }
}
