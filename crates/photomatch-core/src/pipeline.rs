//! Reference matching — embed the reference once, then accept or reject
//! each candidate photo in turn.
//!
//! A candidate is accepted when any of its faces lies within the matcher's
//! tolerance of the reference embedding. Per-candidate failures are logged
//! and recorded in the report; only reference problems abort a run.

use crate::encoder::{EncodeError, FaceEncoder};
use crate::photo::{load_photo, PhotoError};
use crate::types::{Embedding, Matcher};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Default extra jitter passes for the reference face.
pub const DEFAULT_REFERENCE_JITTERS: usize = 10;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("reference photo: {0}")]
    ReferencePhoto(#[source] PhotoError),
    #[error("reference encoding failed: {0}")]
    ReferenceEncoding(#[source] EncodeError),
    #[error("no face found in reference photo {}: use a clear photo with a visible face", .0.display())]
    NoReferenceFace(PathBuf),
    #[error("cancelled after {processed} of {total} candidates")]
    Cancelled { processed: usize, total: usize },
}

#[derive(Error, Debug)]
enum CandidateError {
    #[error(transparent)]
    Photo(#[from] PhotoError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Jitter settings for the two sides of the comparison.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub reference_jitters: usize,
    pub candidate_jitters: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            reference_jitters: DEFAULT_REFERENCE_JITTERS,
            candidate_jitters: 0,
        }
    }
}

/// Outcome for a single candidate photo.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CandidateOutcome {
    /// At least one face is within tolerance.
    Matched { distance: f32, face_index: usize, faces: usize },
    /// Faces were found, none within tolerance.
    WrongFace { best_distance: Option<f32>, faces: usize },
    NoFace,
    /// The photo could not be read, decoded or encoded.
    Failed { error: String },
}

impl CandidateOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, CandidateOutcome::Matched { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateReport {
    pub path: PathBuf,
    #[serde(flatten)]
    pub outcome: CandidateOutcome,
}

/// Outcome counts for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub matched: usize,
    pub wrong_face: usize,
    pub no_face: usize,
    pub failed: usize,
}

/// Everything a run decided, in candidate order.
#[derive(Debug, Clone, Serialize)]
pub struct MatchReport {
    pub reference: PathBuf,
    pub tolerance: f32,
    /// RFC 3339 timestamp of when the run finished.
    pub generated_at: String,
    pub candidates: Vec<CandidateReport>,
}

impl MatchReport {
    /// Accepted candidates, in the order they were evaluated.
    pub fn matches(&self) -> impl Iterator<Item = &CandidateReport> {
        self.candidates.iter().filter(|c| c.outcome.is_match())
    }

    pub fn match_count(&self) -> usize {
        self.matches().count()
    }

    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary {
            total: self.candidates.len(),
            ..Default::default()
        };
        for candidate in &self.candidates {
            match candidate.outcome {
                CandidateOutcome::Matched { .. } => summary.matched += 1,
                CandidateOutcome::WrongFace { .. } => summary.wrong_face += 1,
                CandidateOutcome::NoFace => summary.no_face += 1,
                CandidateOutcome::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }
}

/// Matches candidate photos against one reference face.
pub struct MatchPipeline<E, M> {
    encoder: E,
    matcher: M,
    options: PipelineOptions,
}

impl<E: FaceEncoder, M: Matcher> MatchPipeline<E, M> {
    pub fn new(encoder: E, matcher: M, options: PipelineOptions) -> Self {
        Self {
            encoder,
            matcher,
            options,
        }
    }

    /// Embed the most confident face of the reference photo.
    pub fn encode_reference(&mut self, path: &Path) -> Result<Embedding, PipelineError> {
        let image = load_photo(path).map_err(PipelineError::ReferencePhoto)?;
        let faces = self
            .encoder
            .encode(&image, self.options.reference_jitters)
            .map_err(PipelineError::ReferenceEncoding)?;

        if faces.len() > 1 {
            tracing::warn!(
                path = %path.display(),
                faces = faces.len(),
                "reference photo contains several faces; using the most confident"
            );
        }

        faces
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::NoReferenceFace(path.to_path_buf()))
    }

    /// Decide a single candidate. Errors are folded into [`CandidateOutcome::Failed`].
    pub fn evaluate(&mut self, reference: &Embedding, path: &Path) -> CandidateOutcome {
        let outcome = match self.try_evaluate(reference, path) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "error processing candidate; skipping");
                return CandidateOutcome::Failed { error: e.to_string() };
            }
        };

        match &outcome {
            CandidateOutcome::Matched { distance, faces, .. } => {
                tracing::info!(path = %path.display(), distance, faces, "reference face found")
            }
            CandidateOutcome::WrongFace { best_distance, faces } => {
                tracing::info!(path = %path.display(), ?best_distance, faces, "no matching face")
            }
            CandidateOutcome::NoFace => tracing::info!(path = %path.display(), "no face detected"),
            CandidateOutcome::Failed { .. } => {}
        }

        outcome
    }

    fn try_evaluate(&mut self, reference: &Embedding, path: &Path) -> Result<CandidateOutcome, CandidateError> {
        let image = load_photo(path)?;
        let faces = self.encoder.encode(&image, self.options.candidate_jitters)?;

        if faces.is_empty() {
            return Ok(CandidateOutcome::NoFace);
        }

        let result = self.matcher.compare(reference, &faces);
        Ok(match (result.matched, result.distance, result.face_index) {
            (true, Some(distance), Some(face_index)) => CandidateOutcome::Matched {
                distance,
                face_index,
                faces: faces.len(),
            },
            _ => CandidateOutcome::WrongFace {
                best_distance: result.distance,
                faces: faces.len(),
            },
        })
    }

    /// Encode the reference, then evaluate every candidate in order.
    ///
    /// `cancel` is checked before each candidate.
    pub fn run(
        &mut self,
        reference_path: &Path,
        candidates: &[PathBuf],
        cancel: &AtomicBool,
    ) -> Result<MatchReport, PipelineError> {
        tracing::info!(path = %reference_path.display(), "encoding reference photo");
        let reference = self.encode_reference(reference_path)?;

        tracing::info!(candidates = candidates.len(), "scanning candidates for the reference face");
        let mut reports = Vec::with_capacity(candidates.len());
        for (processed, path) in candidates.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                return Err(PipelineError::Cancelled {
                    processed,
                    total: candidates.len(),
                });
            }
            let outcome = self.evaluate(&reference, path);
            reports.push(CandidateReport {
                path: path.clone(),
                outcome,
            });
        }

        let report = MatchReport {
            reference: reference_path.to_path_buf(),
            tolerance: self.matcher.tolerance(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            candidates: reports,
        };

        let summary = report.summary();
        tracing::info!(
            total = summary.total,
            matched = summary.matched,
            wrong_face = summary.wrong_face,
            no_face = summary.no_face,
            failed = summary.failed,
            "matching complete"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;
    use crate::types::DistanceMatcher;
    use image::{Rgb, RgbImage};
    use std::collections::HashMap;

    const ME: [u8; 3] = [200, 0, 0];
    const STRANGER: [u8; 3] = [0, 200, 0];
    const GROUP: [u8; 3] = [0, 0, 200];
    const EMPTY: [u8; 3] = [50, 50, 50];
    const BROKEN: [u8; 3] = [1, 2, 3];

    /// Maps a photo's top-left color to a fixed set of face embeddings.
    struct ColorEncoder {
        faces: HashMap<[u8; 3], Vec<Embedding>>,
        jitters_seen: Vec<usize>,
    }

    impl ColorEncoder {
        fn new() -> Self {
            let me = Embedding::new(vec![1.0, 0.0, 0.0]);
            let stranger = Embedding::new(vec![0.0, 1.0, 0.0]);
            let close_to_me = Embedding::new(vec![0.8, 0.6, 0.0]);

            let mut faces = HashMap::new();
            faces.insert(ME, vec![me]);
            faces.insert(STRANGER, vec![stranger.clone()]);
            faces.insert(GROUP, vec![stranger, close_to_me]);
            faces.insert(EMPTY, vec![]);
            Self {
                faces,
                jitters_seen: Vec::new(),
            }
        }
    }

    impl FaceEncoder for ColorEncoder {
        fn encode(&mut self, image: &RgbImage, jitters: usize) -> Result<Vec<Embedding>, EncodeError> {
            self.jitters_seen.push(jitters);
            let color = image.get_pixel(0, 0).0;
            if color == BROKEN {
                return Err(DetectorError::InferenceFailed("boom".into()).into());
            }
            Ok(self.faces.get(&color).cloned().unwrap_or_default())
        }
    }

    fn write_photo(dir: &Path, name: &str, color: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(4, 4, Rgb(color)).save(&path).unwrap();
        path
    }

    fn pipeline(encoder: &mut ColorEncoder) -> MatchPipeline<&mut ColorEncoder, DistanceMatcher> {
        MatchPipeline::new(encoder, DistanceMatcher::new(0.9), PipelineOptions::default())
    }

    #[test]
    fn test_run_sorts_candidates_into_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_photo(dir.path(), "selfie.png", ME);
        let candidates = vec![
            write_photo(dir.path(), "solo.png", ME),
            write_photo(dir.path(), "stranger.png", STRANGER),
            write_photo(dir.path(), "group.png", GROUP),
            write_photo(dir.path(), "landscape.png", EMPTY),
        ];

        let mut encoder = ColorEncoder::new();
        let report = pipeline(&mut encoder)
            .run(&reference, &candidates, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(report.candidates.len(), 4);
        assert_eq!(
            report.candidates[0].outcome,
            CandidateOutcome::Matched { distance: 0.0, face_index: 0, faces: 1 }
        );
        assert!(matches!(
            report.candidates[1].outcome,
            CandidateOutcome::WrongFace { best_distance: Some(_), faces: 1 }
        ));
        // Second face in the group photo is within tolerance (distance ≈ 0.632).
        match &report.candidates[2].outcome {
            CandidateOutcome::Matched { distance, face_index, faces } => {
                assert_eq!(*face_index, 1);
                assert_eq!(*faces, 2);
                assert!((distance - 0.4f32.sqrt()).abs() < 1e-5);
            }
            other => panic!("expected match, got {other:?}"),
        }
        assert_eq!(report.candidates[3].outcome, CandidateOutcome::NoFace);

        let matched: Vec<_> = report.matches().map(|c| c.path.clone()).collect();
        assert_eq!(matched, vec![candidates[0].clone(), candidates[2].clone()]);
        assert_eq!(
            report.summary(),
            ReportSummary { total: 4, matched: 2, wrong_face: 1, no_face: 1, failed: 0 }
        );
    }

    #[test]
    fn test_failures_are_recorded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_photo(dir.path(), "selfie.png", ME);
        let corrupt = dir.path().join("corrupt.jpg");
        std::fs::write(&corrupt, b"not an image").unwrap();
        let candidates = vec![
            corrupt,
            write_photo(dir.path(), "broken.png", BROKEN),
            dir.path().join("vanished.png"),
            write_photo(dir.path(), "solo.png", ME),
        ];

        let mut encoder = ColorEncoder::new();
        let report = pipeline(&mut encoder)
            .run(&reference, &candidates, &AtomicBool::new(false))
            .unwrap();

        let summary = report.summary();
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.matched, 1);
        match &report.candidates[1].outcome {
            CandidateOutcome::Failed { error } => assert!(error.contains("boom"), "{error}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_reference_without_face_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_photo(dir.path(), "blank.png", EMPTY);
        let candidates = vec![write_photo(dir.path(), "solo.png", ME)];

        let mut encoder = ColorEncoder::new();
        let err = pipeline(&mut encoder)
            .run(&reference, &candidates, &AtomicBool::new(false))
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoReferenceFace(p) if p == reference));
        // Candidates are never touched.
        assert_eq!(encoder.jitters_seen.len(), 1);
    }

    #[test]
    fn test_unreadable_reference_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = ColorEncoder::new();
        let err = pipeline(&mut encoder)
            .encode_reference(&dir.path().join("missing.png"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::ReferencePhoto(PhotoError::Io { .. })));
    }

    #[test]
    fn test_reference_encoding_error_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_photo(dir.path(), "selfie.png", BROKEN);
        let mut encoder = ColorEncoder::new();
        let err = pipeline(&mut encoder).encode_reference(&reference).unwrap_err();
        assert!(matches!(err, PipelineError::ReferenceEncoding(_)));
    }

    #[test]
    fn test_group_reference_uses_first_face() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_photo(dir.path(), "group.png", GROUP);
        let candidates = vec![
            write_photo(dir.path(), "stranger.png", STRANGER),
            write_photo(dir.path(), "solo.png", ME),
        ];

        let mut encoder = ColorEncoder::new();
        let report = pipeline(&mut encoder)
            .run(&reference, &candidates, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(
            report.candidates[0].outcome,
            CandidateOutcome::Matched { distance: 0.0, face_index: 0, faces: 1 }
        );
        // ME is only close to the group's second face.
        match &report.candidates[1].outcome {
            CandidateOutcome::WrongFace { best_distance: Some(d), faces: 1 } => {
                assert!((d - 2.0f32.sqrt()).abs() < 1e-5);
            }
            other => panic!("expected wrong face, got {other:?}"),
        }
    }

    #[test]
    fn test_reference_and_candidates_use_their_own_jitters() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_photo(dir.path(), "selfie.png", ME);
        let candidates = vec![
            write_photo(dir.path(), "a.png", ME),
            write_photo(dir.path(), "b.png", STRANGER),
        ];

        let mut encoder = ColorEncoder::new();
        let options = PipelineOptions { reference_jitters: 25, candidate_jitters: 2 };
        MatchPipeline::new(&mut encoder, DistanceMatcher::default(), options)
            .run(&reference, &candidates, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(encoder.jitters_seen, vec![25, 2, 2]);
    }

    #[test]
    fn test_cancel_stops_before_next_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_photo(dir.path(), "selfie.png", ME);
        let candidates = vec![write_photo(dir.path(), "a.png", ME)];

        let mut encoder = ColorEncoder::new();
        let err = pipeline(&mut encoder)
            .run(&reference, &candidates, &AtomicBool::new(true))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { processed: 0, total: 1 }));
    }

    #[test]
    fn test_report_serializes_tagged_outcomes() {
        let report = MatchReport {
            reference: PathBuf::from("me.jpg"),
            tolerance: 1.1,
            generated_at: "2026-01-01T00:00:00+00:00".into(),
            candidates: vec![
                CandidateReport {
                    path: PathBuf::from("a.jpg"),
                    outcome: CandidateOutcome::Matched { distance: 0.5, face_index: 0, faces: 1 },
                },
                CandidateReport {
                    path: PathBuf::from("b.jpg"),
                    outcome: CandidateOutcome::NoFace,
                },
            ],
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["candidates"][0]["outcome"], "matched");
        assert_eq!(json["candidates"][0]["path"], "a.jpg");
        assert_eq!(json["candidates"][0]["faces"], 1);
        assert_eq!(json["candidates"][1]["outcome"], "no_face");
    }
}
