//! Collect accepted candidates into an output directory.

use crate::pipeline::MatchReport;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("failed to create output directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to copy {} to {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write report {}: {source}", path.display())]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result of [`export_matches`].
#[derive(Debug, Default)]
pub struct ExportSummary {
    /// Destination paths of the photos that were copied.
    pub copied: Vec<PathBuf>,
    /// Matches that could not be copied.
    pub failed: Vec<ExportError>,
}

/// Copy every matched photo into `output_dir`.
///
/// The directory is created if needed. A file name that is already taken,
/// by an earlier match or a pre-existing file, gets a `-1`, `-2`, ... suffix.
/// A match that fails to copy is logged and skipped.
pub fn export_matches(report: &MatchReport, output_dir: &Path) -> Result<ExportSummary, ExportError> {
    fs::create_dir_all(output_dir).map_err(|source| ExportError::CreateDir {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let mut summary = ExportSummary {
        copied: Vec::with_capacity(report.match_count()),
        failed: Vec::new(),
    };
    for candidate in report.matches() {
        let target = unique_target(output_dir, &candidate.path);
        match fs::copy(&candidate.path, &target) {
            Ok(_) => {
                tracing::debug!(from = %candidate.path.display(), to = %target.display(), "copied match");
                summary.copied.push(target);
            }
            Err(source) => {
                let err = ExportError::Copy {
                    from: candidate.path.clone(),
                    to: target,
                    source,
                };
                tracing::warn!(error = %err, "skipping match");
                summary.failed.push(err);
            }
        }
    }

    tracing::info!(
        dir = %output_dir.display(),
        copied = summary.copied.len(),
        failed = summary.failed.len(),
        "matches exported"
    );
    Ok(summary)
}

/// Write the full report as pretty-printed JSON.
pub fn write_report(report: &MatchReport, path: &Path) -> Result<(), ExportError> {
    let file = fs::File::create(path).map_err(|source| ExportError::Report {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.flush().map_err(|source| ExportError::Report {
        path: path.to_path_buf(),
        source,
    })
}

fn unique_target(dir: &Path, source: &Path) -> PathBuf {
    let file_name = source
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "photo".into());
    let first = dir.join(&file_name);
    if !first.exists() {
        return first;
    }

    let stem = Path::new(&file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = Path::new(&file_name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|n| dir.join(format!("{stem}-{n}{ext}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{CandidateOutcome, CandidateReport};

    fn report(candidates: Vec<(PathBuf, CandidateOutcome)>) -> MatchReport {
        MatchReport {
            reference: PathBuf::from("me.jpg"),
            tolerance: 1.1,
            generated_at: "2026-01-01T00:00:00+00:00".into(),
            candidates: candidates
                .into_iter()
                .map(|(path, outcome)| CandidateReport { path, outcome })
                .collect(),
        }
    }

    fn matched() -> CandidateOutcome {
        CandidateOutcome::Matched { distance: 0.3, face_index: 0, faces: 1 }
    }

    #[test]
    fn test_export_copies_only_matches() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let yes = src.path().join("yes.jpg");
        let no = src.path().join("no.jpg");
        fs::write(&yes, b"yes").unwrap();
        fs::write(&no, b"no").unwrap();

        let report = report(vec![(yes, matched()), (no, CandidateOutcome::NoFace)]);
        let out_dir = out.path().join("matches");
        let exported = export_matches(&report, &out_dir).unwrap();

        assert_eq!(exported.copied, vec![out_dir.join("yes.jpg")]);
        assert!(exported.failed.is_empty());
        assert_eq!(fs::read(out_dir.join("yes.jpg")).unwrap(), b"yes");
        assert!(!out_dir.join("no.jpg").exists());
    }

    #[test]
    fn test_export_renames_collisions() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let first = src.path().join("a/IMG_1.jpg");
        let second = src.path().join("b/IMG_1.jpg");
        for (path, body) in [(&first, "first"), (&second, "second")] {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
        fs::write(out.path().join("IMG_1-1.jpg"), b"existing").unwrap();

        let report = report(vec![(first, matched()), (second, matched())]);
        let exported = export_matches(&report, out.path()).unwrap();

        assert_eq!(exported.copied, vec![out.path().join("IMG_1.jpg"), out.path().join("IMG_1-2.jpg")]);
        assert_eq!(fs::read(out.path().join("IMG_1-2.jpg")).unwrap(), b"second");
        assert_eq!(fs::read(out.path().join("IMG_1-1.jpg")).unwrap(), b"existing");
    }

    #[test]
    fn test_export_skips_failed_copies() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let gone = src.path().join("gone.jpg");
        let kept = src.path().join("kept.jpg");
        fs::write(&kept, b"kept").unwrap();

        let report = report(vec![(gone.clone(), matched()), (kept, matched())]);
        let exported = export_matches(&report, out.path()).unwrap();

        assert_eq!(exported.copied, vec![out.path().join("kept.jpg")]);
        assert_eq!(exported.failed.len(), 1);
        assert!(matches!(&exported.failed[0], ExportError::Copy { from, .. } if *from == gone));
        assert!(!out.path().join("gone.jpg").exists());
    }

    #[test]
    fn test_write_report_json() {
        let out = tempfile::tempdir().unwrap();
        let path = out.path().join("report.json");
        let report = report(vec![(PathBuf::from("x.jpg"), CandidateOutcome::Failed { error: "bad".into() })]);

        write_report(&report, &path).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["candidates"][0]["outcome"], "failed");
        assert_eq!(json["candidates"][0]["error"], "bad");
        assert_eq!(json["reference"], "me.jpg");
    }
}
