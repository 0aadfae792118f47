//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional face embeddings from aligned face crops,
//! using the w600k_r50 ArcFace model.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{BoundingBox, Embedding};
use image::{imageops, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use thiserror::Error;

// --- Named constants (different from SCRFD!) ---
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // not 128.0, unlike SCRFD
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

// Jitter perturbation bounds
const JITTER_SEED: u64 = 0x5eed_face;
const JITTER_MAX_SHIFT: f32 = 0.05; // fraction of inter-ocular distance
const JITTER_MAX_SCALE: f32 = 0.05;
const JITTER_MAX_ROTATION_DEG: f32 = 5.0;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; alignment needs the five detector keypoints")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Extract a face embedding from a detected face.
    ///
    /// The face must have landmarks (from the SCRFD detector). It is aligned
    /// to the canonical 112x112 position before embedding extraction.
    pub fn extract(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let aligned = alignment::align_face(image, landmarks);
        self.embed_aligned(&aligned)
    }

    /// Extract an embedding averaged over `jitters` extra perturbed crops.
    ///
    /// Each extra pass nudges the landmarks (shift, scale, rotation) and
    /// flips half of the crops horizontally. The RNG is seeded, so equal
    /// inputs give equal embeddings.
    pub fn extract_jittered(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
        jitters: usize,
    ) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;

        let mut embeddings = Vec::with_capacity(jitters + 1);
        embeddings.push(self.embed_aligned(&alignment::align_face(image, landmarks))?);

        let mut rng = StdRng::seed_from_u64(JITTER_SEED);
        for _ in 0..jitters {
            let perturbed = jitter_landmarks(landmarks, &mut rng);
            let mut aligned = alignment::align_face(image, &perturbed);
            if rng.gen_bool(0.5) {
                imageops::flip_horizontal_in_place(&mut aligned);
            }
            embeddings.push(self.embed_aligned(&aligned)?);
        }

        let mean = Embedding::mean(&embeddings).ok_or_else(|| {
            RecognizerError::InferenceFailed("jittered embeddings could not be averaged".into())
        })?;
        tracing::trace!(jitters, "averaged jittered embedding");
        Ok(mean)
    }

    /// Run ArcFace on an aligned 112x112 crop and L2-normalize the output.
    fn embed_aligned(&mut self, aligned: &RgbImage) -> Result<Embedding, RecognizerError> {
        let input = Self::preprocess(aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw_data.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw_data.len()
            )));
        }

        Ok(Embedding {
            values: raw_data.to_vec(),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        }
        .l2_normalized())
    }

    /// Preprocess a 112x112 RGB aligned crop into a NCHW float tensor.
    fn preprocess(aligned: &RgbImage) -> Array4<f32> {
        let size = ALIGNED_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in aligned.enumerate_pixels() {
            if x as usize >= size || y as usize >= size {
                continue;
            }
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }

        tensor
    }
}

/// Randomly shift, scale and rotate landmarks about their centroid.
///
/// Perturbations are bounded relative to the inter-ocular distance so the
/// result stays a plausible face layout.
fn jitter_landmarks(landmarks: &[(f32, f32); 5], rng: &mut impl Rng) -> [(f32, f32); 5] {
    let (lx, ly) = landmarks[0];
    let (rx, ry) = landmarks[1];
    let eye_dist = ((rx - lx).powi(2) + (ry - ly).powi(2)).sqrt().max(1.0);

    let (cx, cy) = landmarks
        .iter()
        .fold((0.0f32, 0.0f32), |(sx, sy), &(x, y)| (sx + x / 5.0, sy + y / 5.0));

    let shift_x: f32 = rng.gen_range(-JITTER_MAX_SHIFT..=JITTER_MAX_SHIFT) * eye_dist;
    let shift_y: f32 = rng.gen_range(-JITTER_MAX_SHIFT..=JITTER_MAX_SHIFT) * eye_dist;
    let scale: f32 = 1.0 + rng.gen_range(-JITTER_MAX_SCALE..=JITTER_MAX_SCALE);
    let angle_deg: f32 = rng.gen_range(-JITTER_MAX_ROTATION_DEG..=JITTER_MAX_ROTATION_DEG);
    let (sin, cos) = angle_deg.to_radians().sin_cos();

    landmarks.map(|(x, y)| {
        let (dx, dy) = (x - cx, y - cy);
        (
            cx + scale * (dx * cos - dy * sin) + shift_x,
            cy + scale * (dx * sin + dy * cos) + shift_y,
        )
    })
}
