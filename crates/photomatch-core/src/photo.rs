//! Photo loading — decodes image files into 8-bit RGB buffers.

use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions accepted as photos (compared case-insensitively).
pub const PHOTO_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum PhotoError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image has zero size: {}", path.display())]
    Empty { path: PathBuf },
}

/// Read and decode a photo, converting whatever the file holds to RGB8.
///
/// The format is guessed from the file contents, not the extension.
pub fn load_photo(path: &Path) -> Result<RgbImage, PhotoError> {
    let bytes = std::fs::read(path).map_err(|source| PhotoError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let image = image::load_from_memory(&bytes)
        .map_err(|source| PhotoError::Decode {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();

    if image.width() == 0 || image.height() == 0 {
        return Err(PhotoError::Empty {
            path: path.to_path_buf(),
        });
    }

    tracing::trace!(path = %path.display(), width = image.width(), height = image.height(), "photo decoded");
    Ok(image)
}

/// Whether the path carries one of [`PHOTO_EXTENSIONS`].
pub fn has_photo_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            PHOTO_EXTENSIONS
                .iter()
                .any(|accepted| ext.eq_ignore_ascii_case(accepted))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_photo_extensions() {
        assert!(has_photo_extension(Path::new("a.jpg")));
        assert!(has_photo_extension(Path::new("dir/b.JPEG")));
        assert!(has_photo_extension(Path::new("c.Png")));
        assert!(!has_photo_extension(Path::new("d.gif")));
        assert!(!has_photo_extension(Path::new("jpg")));
        assert!(!has_photo_extension(Path::new("notes.txt")));
    }

    #[test]
    fn test_load_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.png");
        RgbImage::from_pixel(3, 2, Rgb([255, 0, 0])).save(&path).unwrap();

        let image = load_photo(&path).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_load_guesses_format_from_contents() {
        // PNG bytes behind a .jpg name still decode.
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("a.png");
        RgbImage::from_pixel(2, 2, Rgb([1, 2, 3])).save(&png).unwrap();
        let renamed = dir.path().join("a.jpg");
        std::fs::rename(&png, &renamed).unwrap();

        assert!(load_photo(&renamed).is_ok());
    }

    #[test]
    fn test_load_garbage_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        assert!(matches!(load_photo(&path), Err(PhotoError::Decode { .. })));
    }

    #[test]
    fn test_load_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.png");
        assert!(matches!(load_photo(&path), Err(PhotoError::Io { .. })));
    }
}
