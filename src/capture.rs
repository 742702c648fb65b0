//! Reading a user-supplied plant photo and preparing it for the two
//! network legs: raw bytes for the drive, a base64 payload for the model.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use std::path::Path;

use crate::error::PipelineError;

/// Extensions accepted without content sniffing; the `image` crate cannot
/// decode HEIC, which phones produce by default.
const HEIF_EXTENSIONS: &[&str] = &["heic", "heif"];

/// A single photo picked by the user.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Base64 image data ready to be inlined into an inference request.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

impl CapturedImage {
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let bytes = std::fs::read(path).map_err(|e| {
            PipelineError::InvalidImage(format!("cannot read {}: {}", path.display(), e))
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "plant.jpg".to_string());
        Self::from_bytes(file_name, bytes)
    }

    /// Validate that `bytes` is a non-empty image and detect its MIME type.
    pub fn from_bytes(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, PipelineError> {
        let file_name = file_name.into();
        if bytes.is_empty() {
            return Err(PipelineError::InvalidImage(format!("{} is empty", file_name)));
        }

        let mime_type = match image::guess_format(&bytes) {
            Ok(format) => format.to_mime_type().to_string(),
            Err(_) => match heif_extension(&file_name) {
                Some(ext) => format!("image/{}", ext),
                None => {
                    return Err(PipelineError::InvalidImage(format!(
                        "{} is not a supported image",
                        file_name
                    )))
                }
            },
        };

        Ok(Self {
            file_name,
            mime_type,
            bytes,
        })
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Build the inference payload, downscaling anything whose longest edge
    /// exceeds `max_dimension` and re-encoding it as JPEG.
    ///
    /// Formats we cannot decode are passed through untouched and labelled
    /// `image/jpeg`, which the inference APIs accept for HEIC uploads.
    pub fn to_inline(&self, max_dimension: u32) -> Result<InlineImage> {
        if heif_extension(&self.file_name).is_some() && image::guess_format(&self.bytes).is_err() {
            return Ok(InlineImage {
                mime_type: "image/jpeg".to_string(),
                data: BASE64.encode(&self.bytes),
            });
        }

        let img = image::load_from_memory(&self.bytes)
            .map_err(|e| anyhow!("Failed to decode {}: {}", self.file_name, e))?;

        let (width, height) = img.dimensions();
        if width <= max_dimension && height <= max_dimension {
            return Ok(InlineImage {
                mime_type: self.mime_type.clone(),
                data: BASE64.encode(&self.bytes),
            });
        }

        let resized = img.resize(
            max_dimension,
            max_dimension,
            image::imageops::FilterType::Triangle,
        );
        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

        let mut buf = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut buf, 85);
        rgb.write_with_encoder(encoder)
            .map_err(|e| anyhow!("Failed to encode image as JPEG: {}", e))?;

        Ok(InlineImage {
            mime_type: ImageFormat::Jpeg.to_mime_type().to_string(),
            data: BASE64.encode(buf.into_inner()),
        })
    }
}

fn heif_extension(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())?
        .to_lowercase();
    HEIF_EXTENSIONS.iter().copied().find(|candidate| *candidate == ext)
}
