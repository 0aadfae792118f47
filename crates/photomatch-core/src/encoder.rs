//! Face encoding — photo in, one embedding per detected face out.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Turns a decoded photo into zero or more face embeddings.
pub trait FaceEncoder {
    /// Embed every detected face, most confident first.
    ///
    /// `jitters` extra perturbed passes are averaged into each embedding.
    fn encode(&mut self, image: &RgbImage, jitters: usize) -> Result<Vec<Embedding>, EncodeError>;
}

impl<T: FaceEncoder + ?Sized> FaceEncoder for &mut T {
    fn encode(&mut self, image: &RgbImage, jitters: usize) -> Result<Vec<Embedding>, EncodeError> {
        (**self).encode(image, jitters)
    }
}

/// A detected face together with its embedding.
#[derive(Debug, Clone, Serialize)]
pub struct EncodedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// SCRFD + ArcFace encoder backed by ONNX Runtime.
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEncoder {
    /// Load both models. Fails fast if either file is missing.
    pub fn load(scrfd_path: &Path, arcface_path: &Path, intra_threads: usize) -> Result<Self, EncodeError> {
        let detector = FaceDetector::load(scrfd_path, intra_threads)?;
        let recognizer = FaceRecognizer::load(arcface_path, intra_threads)?;
        Ok(Self { detector, recognizer })
    }

    /// Detect and embed every face, keeping the bounding boxes.
    pub fn encode_faces(&mut self, image: &RgbImage, jitters: usize) -> Result<Vec<EncodedFace>, EncodeError> {
        let faces = self.detector.detect(image)?;

        let mut encoded = Vec::with_capacity(faces.len());
        for (i, bbox) in faces.into_iter().enumerate() {
            if bbox.landmarks.is_none() {
                tracing::debug!(face = i, confidence = bbox.confidence, "face without landmarks skipped");
                continue;
            }
            let embedding = if jitters > 0 {
                self.recognizer.extract_jittered(image, &bbox, jitters)?
            } else {
                self.recognizer.extract(image, &bbox)?
            };
            encoded.push(EncodedFace { bbox, embedding });
        }

        Ok(encoded)
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(&mut self, image: &RgbImage, jitters: usize) -> Result<Vec<Embedding>, EncodeError> {
        Ok(self
            .encode_faces(image, jitters)?
            .into_iter()
            .map(|face| face.embedding)
            .collect())
    }
}
