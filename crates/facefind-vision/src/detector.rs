//! SCRFD face detector via ONNX Runtime.
//!
//! Photos are letterboxed into the 640×640 model input (image at the top-left,
//! padding on the right/bottom), decoded per stride level, then
//! de-duplicated with greedy non-maximum suppression.

use facefind_core::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_SCORE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("image has zero size")]
    EmptyImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// What an output tensor carries, told apart by its trailing dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputKind {
    Score,
    Bbox,
    Keypoints,
}

impl OutputKind {
    fn from_last_dim(dim: i64) -> Option<Self> {
        match dim {
            1 => Some(Self::Score),
            4 => Some(Self::Bbox),
            10 => Some(Self::Keypoints),
            _ => None,
        }
    }

    fn width(self) -> usize {
        match self {
            Self::Score => 1,
            Self::Bbox => 4,
            Self::Keypoints => 10,
        }
    }
}

/// Raw outputs for one stride level.
#[derive(Default)]
struct Level<'a> {
    scores: Option<&'a [f32]>,
    bboxes: Option<&'a [f32]>,
    kps: Option<&'a [f32]>,
}

pub struct FaceDetector {
    session: Session,
    num_outputs: usize,
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        tracing::info!(
            path = %model_path.display(),
            outputs = num_outputs,
            "loaded SCRFD model"
        );

        if num_outputs < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD with keypoints has 9 outputs, model has {num_outputs}"
            )));
        }

        Ok(Self {
            session,
            num_outputs,
        })
    }

    /// Detect faces, best confidence first. Coordinates are in `image` pixels.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, scale) = preprocess(image)?;
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut levels: [Level<'_>; 3] = Default::default();
        for i in 0..self.num_outputs {
            let (shape, data) = outputs[i]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("output {i}: {e}")))?;

            let Some(kind) = shape.last().copied().and_then(OutputKind::from_last_dim) else {
                continue;
            };
            let Some(level) = level_for(data.len() / kind.width()) else {
                continue;
            };
            let slot = &mut levels[level];
            match kind {
                OutputKind::Score => slot.scores = Some(data),
                OutputKind::Bbox => slot.bboxes = Some(data),
                OutputKind::Keypoints => slot.kps = Some(data),
            }
        }

        let mut candidates = Vec::new();
        for (level, stride) in levels.iter().zip(SCRFD_STRIDES) {
            let (Some(scores), Some(bboxes)) = (level.scores, level.bboxes) else {
                return Err(DetectorError::InferenceFailed(format!(
                    "missing score/bbox outputs for stride {stride}"
                )));
            };
            decode_level(scores, bboxes, level.kps, stride, scale, &mut candidates);
        }

        let faces = suppress_overlaps(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detection finished");
        Ok(faces)
    }
}

/// Number of anchors the model emits for each stride level.
fn anchors_at(stride: usize) -> usize {
    let grid = SCRFD_INPUT_SIZE / stride;
    grid * grid * SCRFD_ANCHORS_PER_CELL
}

/// Stride level (index into [`SCRFD_STRIDES`]) producing `anchors` rows.
fn level_for(anchors: usize) -> Option<usize> {
    SCRFD_STRIDES.iter().position(|&s| anchors_at(s) == anchors)
}

/// Letterbox `image` into a normalized NCHW tensor. Returns the tensor and the
/// scale factor applied to the image.
fn preprocess(image: &RgbImage) -> Result<(Array4<f32>, f32), DetectorError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(DetectorError::EmptyImage);
    }

    let size = SCRFD_INPUT_SIZE as f32;
    let scale = (size / width as f32).min(size / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    // Zero is the normalized value of the mean, so padding stays neutral.
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    Ok((tensor, scale))
}

fn decode_level(
    scores: &[f32],
    bboxes: &[f32],
    kps: Option<&[f32]>,
    stride: usize,
    scale: f32,
    out: &mut Vec<BoundingBox>,
) {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let s = stride as f32;

    for (idx, &score) in scores.iter().enumerate() {
        if score < SCRFD_SCORE_THRESHOLD {
            continue;
        }
        let Some(d) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let cx = ((cell % grid_w) * stride) as f32;
        let cy = ((cell / grid_w) * stride) as f32;

        let x1 = (cx - d[0] * s) / scale;
        let y1 = (cy - d[1] * s) / scale;
        let x2 = (cx + d[2] * s) / scale;
        let y2 = (cy + d[3] * s) / scale;

        let landmarks = kps
            .and_then(|k| k.get(idx * 10..idx * 10 + 10))
            .map(|k| {
                std::array::from_fn(|i| ((cx + k[2 * i] * s) / scale, (cy + k[2 * i + 1] * s) / scale))
            });

        out.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
}

/// Greedy NMS: keep the most confident box, drop any later box that overlaps
/// a kept one by more than `iou_threshold`.
fn suppress_overlaps(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in boxes {
        if kept.iter().all(|k| overlap(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection-over-union of two boxes.
fn overlap(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence, landmarks: None }
    }

    #[test]
    fn test_overlap() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        let far = bbox(50.0, 50.0, 10.0, 10.0, 1.0);
        assert!((overlap(&a, &a) - 1.0).abs() < 1e-6);
        assert!((overlap(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(overlap(&a, &far), 0.0);
    }

    #[test]
    fn test_suppress_overlaps_keeps_best() {
        let boxes = vec![
            bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            bbox(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let kept = suppress_overlaps(boxes, SCRFD_NMS_THRESHOLD);
        let conf: Vec<f32> = kept.iter().map(|b| b.confidence).collect();
        assert_eq!(conf, vec![0.9, 0.7]);
    }

    #[test]
    fn test_level_for_anchor_counts() {
        assert_eq!(level_for(12800), Some(0));
        assert_eq!(level_for(3200), Some(1));
        assert_eq!(level_for(800), Some(2));
        assert_eq!(level_for(7), None);
    }

    #[test]
    fn test_preprocess_letterbox() {
        let image = RgbImage::from_pixel(320, 160, image::Rgb([255, 255, 255]));
        let (tensor, scale) = preprocess(&image).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((scale - 2.0).abs() < 1e-6);
        let white = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 0, 10, 10]] - white).abs() < 1e-3);
        // below the resized image is padding
        assert_eq!(tensor[[0, 0, 400, 10]], 0.0);
    }

    #[test]
    fn test_preprocess_rejects_empty() {
        let image = RgbImage::new(0, 0);
        assert!(matches!(preprocess(&image), Err(DetectorError::EmptyImage)));
    }

    #[test]
    fn test_decode_level_maps_back_to_image() {
        // One confident anchor in the first cell of stride 32, image scaled by 2.
        let mut scores = vec![0.0; anchors_at(32)];
        scores[0] = 0.9;
        let mut bboxes = vec![0.0; anchors_at(32) * 4];
        bboxes[..4].copy_from_slice(&[0.0, 0.0, 1.0, 2.0]);

        let mut out = Vec::new();
        decode_level(&scores, &bboxes, None, 32, 2.0, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!((out[0].x, out[0].y), (0.0, 0.0));
        assert_eq!((out[0].width, out[0].height), (16.0, 32.0));
        assert!(out[0].landmarks.is_none());
    }
}
