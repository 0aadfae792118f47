use serde::{Deserialize, Serialize};

/// Default Euclidean distance tolerance between L2-normalized ArcFace embeddings.
///
/// For unit vectors `d² = 2 − 2·cos`, so 1.10 corresponds to a cosine
/// similarity of roughly 0.395.
pub const DEFAULT_TOLERANCE: f32 = 1.10;

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

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
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

    /// Euclidean distance between two embeddings, or `None` if their dimensions differ.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        if self.dim() != other.dim() {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(other.values.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f32>()
                .sqrt(),
        )
    }

    /// Scale to unit length. Zero vectors are returned unchanged.
    pub fn l2_normalized(mut self) -> Self {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            self.values.iter_mut().for_each(|x| *x /= norm);
        }
        self
    }

    /// Average several embeddings of the same face and re-normalize.
    ///
    /// Returns `None` for an empty slice or when dimensions disagree.
    pub fn mean(embeddings: &[Embedding]) -> Option<Embedding> {
        let first = embeddings.first()?;
        let dim = first.dim();
        if embeddings.iter().any(|e| e.dim() != dim) {
            return None;
        }

        let mut sum = vec![0.0f32; dim];
        for e in embeddings {
            for (acc, v) in sum.iter_mut().zip(e.values.iter()) {
                *acc += v;
            }
        }
        let n = embeddings.len() as f32;
        sum.iter_mut().for_each(|v| *v /= n);

        Some(
            Embedding {
                values: sum,
                model_version: first.model_version.clone(),
            }
            .l2_normalized(),
        )
    }
}

/// Result of comparing the reference embedding against every face in one photo.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Smallest distance seen across the photo's faces.
    pub distance: Option<f32>,
    /// Index of the face that produced `distance`.
    pub face_index: Option<usize>,
}

/// Strategy for deciding whether any face in a photo belongs to the reference person.
pub trait Matcher {
    fn compare(&self, reference: &Embedding, faces: &[Embedding]) -> MatchResult;

    /// Acceptance threshold, recorded in reports.
    fn tolerance(&self) -> f32;
}

/// Euclidean distance matcher: a face matches when `distance <= tolerance`.
#[derive(Debug, Clone, Copy)]
pub struct DistanceMatcher {
    tolerance: f32,
}

impl DistanceMatcher {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }
}

impl Default for DistanceMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl Matcher for DistanceMatcher {
    fn compare(&self, reference: &Embedding, faces: &[Embedding]) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;

        // Visit every face so the reported distance is the true minimum.
        for (i, face) in faces.iter().enumerate() {
            let Some(distance) = reference.euclidean_distance(face) else {
                tracing::warn!(
                    reference_dim = reference.dim(),
                    face_dim = face.dim(),
                    face = i,
                    "embedding dimension mismatch; face skipped"
                );
                continue;
            };
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }

        match best {
            Some((idx, distance)) => MatchResult {
                matched: distance <= self.tolerance,
                distance: Some(distance),
                face_index: Some(idx),
            },
            None => MatchResult {
                matched: false,
                distance: None,
                face_index: None,
            },
        }
    }

    fn tolerance(&self) -> f32 {
        self.tolerance
    }
}
