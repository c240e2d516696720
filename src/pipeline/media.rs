//! Media loading: image path → base64 payload with a media type.
//!
//! VLM and OCR endpoints both take images as base64 embedded in a JSON body,
//! so the flyer is read once per run and carried as an [`EncodedImage`]. The
//! media type comes from the file extension alone; an unknown extension is
//! sent as `image/jpeg` rather than rejected, because a wrong label rarely
//! stops a model from reading the picture.

use crate::error::HsdsError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Media type used when the extension is not one of the supported four.
pub const FALLBACK_MEDIA_TYPE: &str = "image/jpeg";

/// A flyer image ready to embed in a model request.
///
/// Lives for one run only and is never written to disk.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Absolute path the bytes were read from.
    pub path: PathBuf,
    /// MIME type derived from the extension.
    pub media_type: &'static str,
    /// Standard-alphabet base64 of the file content.
    pub data: String,
    /// Size of the raw file in bytes.
    pub byte_len: usize,
}

impl std::fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedImage")
            .field("path", &self.path)
            .field("media_type", &self.media_type)
            .field("data", &format_args!("<{} base64 chars>", self.data.len()))
            .field("byte_len", &self.byte_len)
            .finish()
    }
}

impl EncodedImage {
    /// Attachment for a multimodal chat message.
    ///
    /// `detail: "high"` asks OpenAI-class models for the full tile budget;
    /// flyer fine print is lost at the low-detail single tile.
    pub fn to_image_data(&self) -> ImageData {
        ImageData::new(self.data.clone(), self.media_type).with_detail("high")
    }
}

/// Map a file extension to one of the supported media types.
///
/// Only jpeg, png, gif and webp are recognised; everything else, including a
/// missing extension, yields [`FALLBACK_MEDIA_TYPE`].
pub fn media_type_for(path: &Path) -> &'static str {
    match ImageFormat::from_path(path) {
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Gif) => "image/gif",
        Ok(ImageFormat::WebP) => "image/webp",
        _ => {
            warn!(
                "Unrecognised image extension for '{}', assuming {}",
                path.display(),
                FALLBACK_MEDIA_TYPE
            );
            FALLBACK_MEDIA_TYPE
        }
    }
}

/// Load and encode an image file.
///
/// # Errors
/// * [`HsdsError::NotFound`] if nothing exists at `path`; no read is attempted.
/// * [`HsdsError::ReadFailed`] if the file exists but cannot be read.
pub async fn load_image(path: impl AsRef<Path>) -> Result<EncodedImage, HsdsError> {
    let path = path.as_ref();
    let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

    if !path.exists() {
        return Err(HsdsError::NotFound { path });
    }

    info!("Loading image from: {}", path.display());
    let media_type = media_type_for(&path);

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => HsdsError::NotFound { path: path.clone() },
            _ => HsdsError::ReadFailed {
                path: path.clone(),
                source,
            },
        })?;

    match image::image_dimensions(&path) {
        Ok((w, h)) => debug!("Image is {}x{} px", w, h),
        Err(e) => debug!("Could not read image dimensions: {}", e),
    }

    let data = STANDARD.encode(&bytes);
    info!(
        "Encoded image as base64 ({} chars, MIME: {})",
        data.len(),
        media_type
    );

    Ok(EncodedImage {
        path,
        media_type,
        data,
        byte_len: bytes.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn extension_table() {
        let cases = [
            ("flyer.jpg", "image/jpeg"),
            ("flyer.JPEG", "image/jpeg"),
            ("flyer.png", "image/png"),
            ("flyer.gif", "image/gif"),
            ("flyer.webp", "image/webp"),
        ];
        for (name, expected) in cases {
            assert_eq!(media_type_for(Path::new(name)), expected, "{name}");
        }
    }

    #[test]
    fn unknown_extension_falls_back_to_jpeg() {
        for name in ["flyer.heic", "flyer.bmp", "flyer.tiff", "flyer"] {
            assert_eq!(media_type_for(Path::new(name)), FALLBACK_MEDIA_TYPE, "{name}");
        }
    }

    #[tokio::test]
    async fn load_encodes_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flyer.png");
        std::fs::write(&path, b"not really a png").unwrap();

        let img = load_image(&path).await.expect("load should succeed");
        assert_eq!(img.media_type, "image/png");
        assert_eq!(img.byte_len, 16);
        assert!(img.path.is_absolute());
        assert_eq!(STANDARD.decode(&img.data).unwrap(), b"not really a png");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.jpg");
        match load_image(&path).await {
            Err(HsdsError::NotFound { path: p }) => assert!(p.ends_with("nope.jpg")),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn debug_hides_payload() {
        let img = EncodedImage {
            path: PathBuf::from("/x.jpg"),
            media_type: "image/jpeg",
            data: "QUJD".into(),
            byte_len: 3,
        };
        let dbg = format!("{img:?}");
        assert!(dbg.contains("<4 base64 chars>"));
        assert!(!dbg.contains("QUJD"));
    }
}
