//! HTTP routes.
//!
//! Lookups that find nothing answer `200` with a `{"status": "success",
//! "message": "Not found"}` body rather than `404`; existing clients rely on
//! that shape.

use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use facefind_core::PersonMetadata;
use facefind_engine::{BootstrapCache, EngineError, FacefindService};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    service: FacefindService,
    /// Startup snapshot of the image directory. Not refreshed by enrollments.
    bootstrap: Arc<BootstrapCache>,
}

impl AppState {
    pub fn new(service: FacefindService, bootstrap: BootstrapCache) -> Self {
        Self {
            service,
            bootstrap: Arc::new(bootstrap),
        }
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/add_person", post(add_person))
        .route("/match_faces", post(match_faces))
        .route("/get_person_by_id", get(get_person_by_id))
        .route("/get_person_by_name", get(get_person_by_name))
        .route("/all_registered", get(all_registered))
        .route("/status", get(status))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        if e.is_validation() {
            ApiError::BadRequest(e.to_string())
        } else {
            tracing::error!(error = %e, "request failed");
            ApiError::Internal(e.to_string())
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        ApiError::BadRequest(format!("Invalid form data: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn not_found() -> Response {
    Json(json!({ "status": "success", "message": "Not found" })).into_response()
}

/// Multipart upload split into the image bytes and the text fields.
struct Upload {
    image: Option<Vec<u8>>,
    fields: Vec<(String, String)>,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut upload = Upload {
        image: None,
        fields: Vec::new(),
    };
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "image" {
            upload.image = Some(field.bytes().await?.to_vec());
        } else {
            let value = field.text().await?;
            upload.fields.push((name, value));
        }
    }
    Ok(upload)
}

async fn add_person(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let upload = read_upload(multipart).await?;
    let image = upload
        .image
        .ok_or_else(|| ApiError::BadRequest("Image is required".into()))?;
    let metadata =
        PersonMetadata::from_pairs(upload.fields.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let enrollment = state.service.enroll(image, metadata).await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("{} registered with ID {}", enrollment.display_name, enrollment.identity_id),
        "image_path": enrollment.image_path.to_string_lossy(),
    })))
}

async fn match_faces(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let image = read_upload(multipart)
        .await?
        .image
        .ok_or_else(|| ApiError::BadRequest("No image provided".into()))?;

    let matches = match state.service.identify(image).await {
        Ok(matches) => matches,
        Err(EngineError::NoFaceDetected) => {
            return Err(ApiError::BadRequest("No faces found in uploaded image".into()))
        }
        Err(e) => return Err(e.into()),
    };
    if matches.is_empty() {
        return Ok(Json(json!({ "matches": [], "message": "No known faces matched" })));
    }
    Ok(Json(json!({ "matches": matches })))
}

#[derive(Debug, Deserialize)]
struct IdQuery {
    id: Option<String>,
}

async fn get_person_by_id(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> Result<Response, ApiError> {
    let raw = query
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing 'id' in URL parameters".into()))?;
    let id: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid id '{raw}': expected an integer")))?;

    Ok(match state.service.person_by_id(id).await? {
        Some(identity) => Json(identity).into_response(),
        None => not_found(),
    })
}

#[derive(Debug, Deserialize)]
struct NameQuery {
    name: Option<String>,
}

async fn get_person_by_name(
    State(state): State<AppState>,
    Query(query): Query<NameQuery>,
) -> Result<Response, ApiError> {
    let name = query
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing 'name' parameter in URL".into()))?;

    let people = state.service.persons_by_name(&name).await?;
    if people.is_empty() {
        return Ok(not_found());
    }
    Ok(Json(people).into_response())
}

async fn all_registered(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let persons = state.service.all_registered().await?;
    Ok(Json(json!({ "persons": persons })))
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let matcher = state.service.matcher();
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.service.engine().provider_name(),
        "bootstrap_faces": state.bootstrap.len(),
        "bootstrap_loaded_at": state.bootstrap.loaded_at().to_rfc3339(),
        "tolerance": matcher.tolerance,
        "min_confidence": matcher.min_confidence,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use facefind_core::{BoundingBox, DetectedFace, Embedding, EmbeddingProvider, ProviderError};
    use facefind_engine::{spawn_engine, Config};
    use http_body_util::BodyExt;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "facefind-test-boundary";
    const FACE_PHOTO: u32 = 20;

    /// One face in images `FACE_PHOTO` pixels wide, none otherwise.
    struct OneFace;

    impl EmbeddingProvider for OneFace {
        fn name(&self) -> &str {
            "one-face"
        }

        fn embed_faces(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, ProviderError> {
            if image.width() != FACE_PHOTO {
                return Ok(Vec::new());
            }
            Ok(vec![DetectedFace {
                region: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 4.0,
                    height: 4.0,
                    confidence: 0.99,
                    landmarks: None,
                },
                embedding: Embedding::new(vec![0.1, 0.2, 0.3]),
            }])
        }
    }

    fn app() -> (TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        let service = FacefindService::open(&config, spawn_engine(OneFace).unwrap()).unwrap();
        let state = AppState::new(service, BootstrapCache::empty());
        (dir, router(state, config.max_upload_bytes))
    }

    fn png(width: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(width, 8))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn multipart(fields: &[(&str, &str)], image: Option<Vec<u8>>) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some(bytes) = image {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"photo.png\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(&bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn post(uri: &str, fields: &[(&str, &str)], image: Option<Vec<u8>>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(multipart(fields, image)))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_add_person_then_fetch() {
        let (_dir, app) = app();
        let (status, body) = send(
            &app,
            post("/add_person", &[("name", "Asha Rao"), ("district", " ")], Some(png(FACE_PHOTO))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["message"], "asha rao registered with ID 1");
        assert!(body["image_path"].as_str().unwrap().ends_with(".jpg"));

        let (status, person) = send(&app, get("/get_person_by_id?id=1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(person["id"], 1);
        assert_eq!(person["name"], "Asha Rao");
        assert!(person["district"].is_null());
    }

    #[tokio::test]
    async fn test_add_person_requires_image_and_name() {
        let (_dir, app) = app();
        let (status, body) = send(&app, post("/add_person", &[("name", "Asha")], None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Image is required");

        let (status, body) = send(&app, post("/add_person", &[], Some(png(FACE_PHOTO)))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "name is required");
    }

    #[tokio::test]
    async fn test_add_person_without_face() {
        let (_dir, app) = app();
        let (status, body) = send(&app, post("/add_person", &[("name", "Asha")], Some(png(5)))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No face found");

        let (_, all) = send(&app, get("/all_registered")).await;
        assert_eq!(all["persons"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_match_faces() {
        let (_dir, app) = app();
        let (_, body) = send(&app, post("/match_faces", &[], Some(png(FACE_PHOTO)))).await;
        assert_eq!(body["matches"].as_array().unwrap().len(), 0);
        assert_eq!(body["message"], "No known faces matched");

        send(&app, post("/add_person", &[("name", "Asha")], Some(png(FACE_PHOTO)))).await;
        let (status, body) = send(&app, post("/match_faces", &[], Some(png(FACE_PHOTO)))).await;
        assert_eq!(status, StatusCode::OK);
        let matches = body["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["name"], "Asha");
        assert_eq!(matches[0]["confidence"], 1.0);
        assert!(body.get("message").is_none());
    }

    #[tokio::test]
    async fn test_match_faces_bad_input() {
        let (_dir, app) = app();
        let (status, body) = send(&app, post("/match_faces", &[], None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No image provided");

        let (status, body) =
            send(&app, post("/match_faces", &[], Some(b"garbage".to_vec()))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid image"));

        let (status, body) = send(&app, post("/match_faces", &[], Some(png(5)))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No faces found in uploaded image");
    }

    #[tokio::test]
    async fn test_lookups_report_not_found_with_200() {
        let (_dir, app) = app();
        let (status, body) = send(&app, get("/get_person_by_id?id=99")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Not found");

        let (status, body) = send(&app, get("/get_person_by_name?name=nobody")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Not found");
    }

    #[tokio::test]
    async fn test_lookup_parameter_validation() {
        let (_dir, app) = app();
        let (status, _) = send(&app, get("/get_person_by_id")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, get("/get_person_by_id?id=abc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, get("/get_person_by_name")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_person_by_name_ignores_case() {
        let (_dir, app) = app();
        send(&app, post("/add_person", &[("name", "John")], Some(png(FACE_PHOTO)))).await;

        for variant in ["John", "JOHN", "john"] {
            let (status, body) = send(&app, get(&format!("/get_person_by_name?name={variant}"))).await;
            assert_eq!(status, StatusCode::OK);
            let people = body.as_array().unwrap();
            assert_eq!(people.len(), 1);
            assert_eq!(people[0]["name"], "John");
        }
    }

    #[tokio::test]
    async fn test_all_registered_and_status() {
        let (_dir, app) = app();
        send(&app, post("/add_person", &[("name", "Asha")], Some(png(FACE_PHOTO)))).await;

        let (_, body) = send(&app, get("/all_registered")).await;
        let persons = body["persons"].as_array().unwrap();
        assert_eq!(persons.len(), 1);
        assert!(persons[0]["image"].as_str().unwrap().ends_with(".jpg"));

        let (status, body) = send(&app, get("/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["provider"], "one-face");
        assert_eq!(body["bootstrap_faces"], 0);
    }
}
