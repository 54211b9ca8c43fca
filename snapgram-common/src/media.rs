//! Shrinking of uploaded images that are over the size budget.
//!
//! An oversized upload is decoded, scaled down to fit a fixed pixel box (aspect ratio kept,
//! never enlarged) and re-encoded once as JPEG. The result is not checked against the
//! budget again.

use image::{DynamicImage, GenericImageView, ImageOutputFormat, imageops::FilterType};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("The uploaded file {file_name:?} is not a readable image: {source}")]
    Decode {
        file_name: String,
        source: image::ImageError,
    },
    #[error("Encoding {file_name:?} as JPEG failed: {source}")]
    Encode {
        file_name: String,
        source: image::ImageError,
    },
}

/// A file as received from a multipart form.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct NormalizerConfig {
    /// Uploads larger than this many bytes get shrunk.
    pub max_bytes: usize,
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality, 1 to 100.
    pub quality: u8,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
            max_width: 1080,
            max_height: 1080,
            quality: 85,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct ImageNormalizer {
    config: NormalizerConfig,
}

impl ImageNormalizer {
    #[must_use]
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn is_oversized(&self, upload: &Upload) -> bool {
        upload.len() > self.config.max_bytes
    }

    /// Returns `upload` untouched when it is within budget, a shrunk JPEG otherwise.
    ///
    /// CPU heavy; call from a blocking context.
    pub fn normalize(&self, upload: Upload) -> Result<Upload, NormalizeError> {
        if !self.is_oversized(&upload) {
            return Ok(upload);
        }

        let image = image::load_from_memory(&upload.bytes).map_err(|source| {
            NormalizeError::Decode {
                file_name: upload.file_name.clone(),
                source,
            }
        })?;
        let (width, height) = image.dimensions();

        let image = if width > self.config.max_width || height > self.config.max_height {
            image.resize(self.config.max_width, self.config.max_height, FilterType::Triangle)
        } else {
            image
        };

        // JPEG has no alpha channel.
        let image = DynamicImage::ImageRgb8(image.to_rgb8());

        let mut bytes = Cursor::new(Vec::new());
        image
            .write_to(&mut bytes, ImageOutputFormat::Jpeg(self.config.quality))
            .map_err(|source| NormalizeError::Encode {
                file_name: upload.file_name.clone(),
                source,
            })?;
        let bytes = bytes.into_inner();

        debug!(
            file_name = upload.file_name.as_str(),
            original_size = upload.bytes.len(),
            original_width = width,
            original_height = height,
            width = image.width(),
            height = image.height(),
            size = bytes.len(),
            "Normalized oversized image"
        );

        Ok(Upload {
            file_name: upload.file_name,
            content_type: Some(JPEG_CONTENT_TYPE.to_owned()),
            bytes,
        })
    }
}
