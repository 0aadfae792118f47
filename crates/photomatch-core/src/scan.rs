//! Candidate discovery — expands files and directories into a photo list.

use crate::photo::has_photo_extension;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("candidate path not found: {}", .0.display())]
    NotFound(PathBuf),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    /// Descend into subdirectories instead of listing only the top level.
    pub recursive: bool,
    /// Include dot-prefixed files and directories.
    pub include_hidden: bool,
}

/// Collect candidate photos from explicit files and directories.
///
/// Directory contents are visited in file-name order. Each path appears
/// once, at its first position.
pub fn collect_candidates(inputs: &[PathBuf], options: &ScanOptions) -> Result<Vec<PathBuf>, ScanError> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for input in inputs {
        if input.is_dir() {
            for path in walk_dir(input, options) {
                if seen.insert(path.clone()) {
                    candidates.push(path);
                }
            }
        } else if input.is_file() {
            if !has_photo_extension(input) {
                tracing::warn!(path = %input.display(), "not a png/jpg/jpeg file; skipping");
                continue;
            }
            if seen.insert(input.clone()) {
                candidates.push(input.clone());
            }
        } else {
            return Err(ScanError::NotFound(input.clone()));
        }
    }

    tracing::debug!(inputs = inputs.len(), candidates = candidates.len(), "candidate scan complete");
    Ok(candidates)
}

fn walk_dir(root: &Path, options: &ScanOptions) -> Vec<PathBuf> {
    let max_depth = if options.recursive { usize::MAX } else { 1 };

    WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| options.include_hidden || !is_hidden(e))
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                tracing::warn!(error = %err, "unreadable entry while scanning; skipping");
                None
            }
        })
        .filter(|e| e.file_type().is_file() && has_photo_extension(e.path()))
        .map(DirEntry::into_path)
        .collect()
}

/// Dot-prefixed entries below the walk root.
fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_flat_scan_filters_extensions_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.JPG", "a.png", "b.jpeg", "notes.txt", "clip.gif", "sub/d.jpg"] {
            touch(&dir.path().join(name));
        }

        let found = collect_candidates(&[dir.path().to_path_buf()], &ScanOptions::default()).unwrap();
        assert_eq!(names(&found), vec!["a.png", "b.jpeg", "c.JPG"]);
    }

    #[test]
    fn test_recursive_scan_descends() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.png"));
        touch(&dir.path().join("sub/deeper/b.jpg"));

        let options = ScanOptions { recursive: true, ..Default::default() };
        let found = collect_candidates(&[dir.path().to_path_buf()], &options).unwrap();
        assert_eq!(names(&found), vec!["a.png", "b.jpg"]);
    }

    #[test]
    fn test_hidden_entries_skipped_unless_requested() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join(".thumb.jpg"));
        touch(&dir.path().join(".cache/e.jpg"));
        touch(&dir.path().join("visible.jpg"));

        let options = ScanOptions { recursive: true, include_hidden: false };
        let found = collect_candidates(&[dir.path().to_path_buf()], &options).unwrap();
        assert_eq!(names(&found), vec!["visible.jpg"]);

        let options = ScanOptions { recursive: true, include_hidden: true };
        let found = collect_candidates(&[dir.path().to_path_buf()], &options).unwrap();
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn test_explicit_files_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        let readme = dir.path().join("README.md");
        touch(&a);
        touch(&b);
        touch(&readme);

        let inputs = vec![b.clone(), readme, dir.path().to_path_buf(), b.clone()];
        let found = collect_candidates(&inputs, &ScanOptions::default()).unwrap();
        assert_eq!(found, vec![b, a]);
    }

    #[test]
    fn test_missing_input_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = collect_candidates(&[missing.clone()], &ScanOptions::default()).unwrap_err();
        assert!(matches!(err, ScanError::NotFound(p) if p == missing));
    }
}
