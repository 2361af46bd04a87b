//! ArcFace embedding extraction via ONNX Runtime.
//!
//! Each face is warped onto the canonical 112×112 ArcFace template with a
//! least-squares similarity transform fitted to its five landmarks, then fed
//! to the w600k_r50 model. Output vectors are L2-normalized.

use facefind_core::{BoundingBox, Embedding};
use image::{Rgb, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;

/// Landmark positions of the ArcFace template, in 112×112 pixel space.
const TEMPLATE: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");
        Ok(Self { session })
    }

    /// Extract the embedding of `face`, which must carry landmarks.
    pub fn extract(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let aligned = align(image, landmarks);
        let input = to_tensor(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding output: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw.to_vec()
        };
        Ok(Embedding::new(values))
    }
}

/// Similarity transform mapping template space back into image space:
/// `p = z * (q - q_mean) + p_mean`, with `z = a + ib` as a complex factor
/// (scale and rotation).
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    q_mean: (f32, f32),
    p_mean: (f32, f32),
}

impl Similarity {
    /// Least-squares fit from template points `q` to image points `p`.
    fn fit(q: &[(f32, f32); 5], p: &[(f32, f32); 5]) -> Self {
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
            (sx / 5.0, sy / 5.0)
        };
        let q_mean = mean(q);
        let p_mean = mean(p);

        let (mut re, mut im, mut energy) = (0.0f32, 0.0f32, 0.0f32);
        for (&(qx, qy), &(px, py)) in q.iter().zip(p.iter()) {
            let (x, y) = (qx - q_mean.0, qy - q_mean.1);
            let (u, v) = (px - p_mean.0, py - p_mean.1);
            re += u * x + v * y;
            im += v * x - u * y;
            energy += x * x + y * y;
        }

        let (a, b) = if energy > 0.0 { (re / energy, im / energy) } else { (1.0, 0.0) };
        Self { a, b, q_mean, p_mean }
    }

    fn apply(&self, (qx, qy): (f32, f32)) -> (f32, f32) {
        let (dx, dy) = (qx - self.q_mean.0, qy - self.q_mean.1);
        (
            self.a * dx - self.b * dy + self.p_mean.0,
            self.b * dx + self.a * dy + self.p_mean.1,
        )
    }
}

/// Warp the face onto the 112×112 template. Pixels outside the source are black.
fn align(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = Similarity::fit(&TEMPLATE, landmarks);
    RgbImage::from_fn(ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, |x, y| {
        let (sx, sy) = transform.apply((x as f32, y as f32));
        sample_bilinear(image, sx, sy)
    })
}

fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 || x < 0.0 || y < 0.0 || x > (w - 1) as f32 || y > (h - 1) as f32 {
        return Rgb([0, 0, 0]);
    }

    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let px = |xx, yy| image.get_pixel(xx, yy).0;
    let (tl, tr, bl, br) = (px(x0, y0), px(x1, y0), px(x0, y1), px(x1, y1));

    Rgb(std::array::from_fn(|c| {
        let top = tl[c] as f32 * (1.0 - fx) + tr[c] as f32 * fx;
        let bottom = bl[c] as f32 * (1.0 - fx) + br[c] as f32 * fx;
        (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
    }))
}

/// RGB crop → normalized NCHW tensor.
fn to_tensor(aligned: &RgbImage) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}
