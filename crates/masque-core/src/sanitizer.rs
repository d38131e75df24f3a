//! Upload metadata sanitizer
//!
//! JPEG, PNG and WebP uploads are decoded and re-encoded so only the pixel
//! payload survives: EXIF, XMP, ICC and text chunks are not carried over.
//! Every stored file gets a random name, `hex(16 random bytes)` plus the
//! lowercased extension when it has a usable one, so the client's original
//! file name never reaches disk.
//!
//! Other file types are stored unchanged and flagged with
//! `metadata_stripping_skipped` for later audit.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use tracing::{debug, warn};

use crate::crypto;
use crate::error::MasqueError;
use crate::types::{MediaPath, MAX_EXTENSION_LEN};

/// Maximum accepted upload size: 10 MB
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

const NAME_BYTES: usize = 16;
const PARTIAL_SUFFIX: &str = "partial";

/// Result of storing one upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanitizedUpload {
    pub path: MediaPath,
    pub metadata_stripping_skipped: bool,
    pub bytes_written: u64,
}

/// Writes sanitized uploads into a single directory.
#[derive(Debug, Clone)]
pub struct MetadataSanitizer {
    upload_dir: PathBuf,
}

impl MetadataSanitizer {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Result<Self, MasqueError> {
        let upload_dir = upload_dir.into();
        fs::create_dir_all(&upload_dir)?;
        Ok(Self { upload_dir })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Strip metadata from `bytes` and store them under a random name.
    pub fn sanitize(&self, original_name: &str, bytes: &[u8]) -> Result<SanitizedUpload, MasqueError> {
        if bytes.is_empty() {
            return Err(MasqueError::Validation("upload is empty".to_string()));
        }
        if bytes.len() > MAX_UPLOAD_SIZE {
            return Err(MasqueError::Validation(format!(
                "upload exceeds {} bytes",
                MAX_UPLOAD_SIZE
            )));
        }

        let extension = Self::extension_of(original_name);
        let format = extension.as_deref().and_then(strippable_format);
        let (payload, skipped) = match format {
            Some(format) => (reencode(bytes, format)?, false),
            None => (bytes.to_vec(), true),
        };

        let stem = hex::encode(crypto::random_array::<NAME_BYTES>()?);
        let name = match &extension {
            Some(extension) => format!("{}.{}", stem, extension),
            None => stem,
        };
        let path = MediaPath::parse(&name)?;
        self.write_atomically(&path, &payload)?;

        if skipped {
            warn!(media = %path, "Stored upload without metadata stripping");
        } else {
            debug!(media = %path, bytes = payload.len(), "Stored sanitized upload");
        }

        Ok(SanitizedUpload {
            path,
            metadata_stripping_skipped: skipped,
            bytes_written: payload.len() as u64,
        })
    }

    pub fn resolve(&self, path: &MediaPath) -> PathBuf {
        self.upload_dir.join(path.as_str())
    }

    pub fn exists(&self, path: &MediaPath) -> bool {
        self.resolve(path).is_file()
    }

    /// Remove a stored file. Missing files are not an error.
    pub fn remove(&self, path: &MediaPath) -> Result<(), MasqueError> {
        match fs::remove_file(self.resolve(path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Extension kept on the stored name. Missing or unusable extensions
    /// yield `None` and the file is stored under its bare random stem.
    fn extension_of(original_name: &str) -> Option<String> {
        Path::new(original_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .filter(|ext| {
                !ext.is_empty()
                    && ext.len() <= MAX_EXTENSION_LEN
                    && ext.bytes().all(|b| b.is_ascii_alphanumeric())
            })
    }

    fn write_atomically(&self, path: &MediaPath, payload: &[u8]) -> Result<(), MasqueError> {
        let final_path = self.resolve(path);
        let partial = self
            .upload_dir
            .join(format!("{}.{}", path.as_str(), PARTIAL_SUFFIX));

        let result = fs::write(&partial, payload).and_then(|_| fs::rename(&partial, &final_path));
        if let Err(e) = result {
            let _ = fs::remove_file(&partial);
            return Err(e.into());
        }
        Ok(())
    }
}

fn strippable_format(extension: &str) -> Option<ImageFormat> {
    match ImageFormat::from_extension(extension)? {
        format @ (ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP) => Some(format),
        _ => None,
    }
}

fn reencode(bytes: &[u8], format: ImageFormat) -> Result<Vec<u8>, MasqueError> {
    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| MasqueError::Validation(format!("could not decode image: {}", e)))?;

    // The JPEG encoder has no alpha channel; WebP only takes 8-bit RGB(A)
    let pixels = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(decoded.to_rgb8()),
        ImageFormat::WebP => DynamicImage::ImageRgba8(decoded.to_rgba8()),
        _ => decoded,
    };

    let mut buffer = Vec::new();
    pixels
        .write_to(&mut Cursor::new(&mut buffer), format)
        .map_err(|e| MasqueError::Io(std::io::Error::other(e)))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    const MARKER: &[u8] = b"GPS-51.5007N-0.1246W-camera-serial-XYZ";

    fn encoded(format: ImageFormat) -> Vec<u8> {
        let img = RgbImage::from_fn(8, 6, |x, y| Rgb([(x * 20) as u8, (y * 30) as u8, 90]));
        let mut buffer = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buffer), format)
            .unwrap();
        buffer
    }

    /// A JPEG with an APP1 (EXIF) segment carrying `MARKER`.
    fn jpeg_with_exif() -> Vec<u8> {
        let jpeg = encoded(ImageFormat::Jpeg);
        let mut payload = b"Exif\0\0".to_vec();
        payload.extend_from_slice(MARKER);
        let len = (payload.len() + 2) as u16;

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn test_jpeg_exif_is_stripped() {
        let dir = tempdir().unwrap();
        let sanitizer = MetadataSanitizer::new(dir.path()).unwrap();
        let original = jpeg_with_exif();
        assert!(contains(&original, MARKER));

        let upload = sanitizer.sanitize("IMG_2041 holiday.JPG", &original).unwrap();
        assert!(!upload.metadata_stripping_skipped);
        assert_eq!(upload.path.extension(), "jpg");

        let stored = fs::read(sanitizer.resolve(&upload.path)).unwrap();
        assert!(!contains(&stored, MARKER));
        let decoded = image::load_from_memory(&stored).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }

    #[test]
    fn test_png_reencoded() {
        let dir = tempdir().unwrap();
        let sanitizer = MetadataSanitizer::new(dir.path()).unwrap();

        let upload = sanitizer.sanitize("avatar.png", &encoded(ImageFormat::Png)).unwrap();
        assert!(!upload.metadata_stripping_skipped);
        assert!(sanitizer.exists(&upload.path));
        assert_eq!(
            upload.bytes_written,
            fs::metadata(sanitizer.resolve(&upload.path)).unwrap().len()
        );
    }

    #[test]
    fn test_unknown_type_passes_through_flagged() {
        let dir = tempdir().unwrap();
        let sanitizer = MetadataSanitizer::new(dir.path()).unwrap();
        let bytes = b"%PDF-1.4 author=someone".to_vec();

        let upload = sanitizer.sanitize("cv.pdf", &bytes).unwrap();
        assert!(upload.metadata_stripping_skipped);
        assert_eq!(fs::read(sanitizer.resolve(&upload.path)).unwrap(), bytes);
    }

    #[test]
    fn test_names_are_random_and_hide_original() {
        let dir = tempdir().unwrap();
        let sanitizer = MetadataSanitizer::new(dir.path()).unwrap();
        let png = encoded(ImageFormat::Png);

        let a = sanitizer.sanitize("jane-doe-portrait.png", &png).unwrap();
        let b = sanitizer.sanitize("jane-doe-portrait.png", &png).unwrap();
        assert_ne!(a.path, b.path);
        assert!(!a.path.as_str().contains("jane"));
        assert_eq!(a.path.as_str().len(), 32 + 1 + 3);
    }

    #[test]
    fn test_undecodable_image_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let sanitizer = MetadataSanitizer::new(dir.path()).unwrap();

        let result = sanitizer.sanitize("broken.jpg", b"not really a jpeg");
        assert!(matches!(result, Err(MasqueError::Validation(_))));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_rejects_empty_upload() {
        let dir = tempdir().unwrap();
        let sanitizer = MetadataSanitizer::new(dir.path()).unwrap();
        assert!(matches!(
            sanitizer.sanitize("a.png", b""),
            Err(MasqueError::Validation(_))
        ));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_unknown_types_pass_through_flagged() {
        let dir = tempdir().unwrap();
        let sanitizer = MetadataSanitizer::new(dir.path()).unwrap();

        let bare = sanitizer.sanitize("README", b"text").unwrap();
        assert!(bare.metadata_stripping_skipped);
        assert_eq!(bare.path.as_str().len(), 32);
        assert_eq!(bare.path.extension(), "");
        assert_eq!(fs::read(sanitizer.resolve(&bare.path)).unwrap(), b"text");

        let long = sanitizer.sanitize("settings.config", b"k=v").unwrap();
        assert!(long.metadata_stripping_skipped);
        assert_eq!(long.path.extension(), "config");

        // Separators in the client name never reach the stored name
        let odd = sanitizer.sanitize("weird.ex/t", b"text").unwrap();
        assert!(odd.metadata_stripping_skipped);
        assert_eq!(odd.path.extension(), "");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let sanitizer = MetadataSanitizer::new(dir.path()).unwrap();
        let upload = sanitizer.sanitize("notes.txt", b"hello").unwrap();

        sanitizer.remove(&upload.path).unwrap();
        assert!(!sanitizer.exists(&upload.path));
        sanitizer.remove(&upload.path).unwrap();
    }
}
