//! Downscaling of oversized images before they are stored.

use std::io::Cursor;

use common::config::ImageConfig;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("unsupported or corrupt image: {0}")]
    Decode(String),

    #[error("failed to re-encode image: {0}")]
    Encode(String),
}

/// Result of normalizing one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// Width was within the limit; the caller keeps its payload as is.
    Unchanged,
    /// The image was downscaled and re-encoded in its original container format.
    Resized {
        data: Vec<u8>,
        width: u32,
        height: u32,
    },
}

impl Normalized {
    /// The bytes to store: the resized image, or `original` when nothing changed.
    pub fn into_bytes(self, original: Vec<u8>) -> Vec<u8> {
        match self {
            Self::Unchanged => original,
            Self::Resized { data, .. } => data,
        }
    }
}

/// Height that keeps the aspect ratio when `width x height` is scaled to `max_width`,
/// rounded half up and never below one pixel.
pub fn scaled_height(width: u32, height: u32, max_width: u32) -> u32 {
    let (w, h, m) = (width as u64, height as u64, max_width as u64);
    (((m * h * 2) + w) / (w * 2)).max(1) as u32
}

/// Caps image width and re-encodes at a fixed quality.
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    max_width: u32,
    quality: u8,
}

impl ImageNormalizer {
    pub fn new(max_width: u32, quality: u8) -> Self {
        Self {
            max_width: max_width.max(1),
            quality: quality.clamp(1, 100),
        }
    }

    pub fn from_config(config: &ImageConfig) -> Self {
        Self::new(config.max_width, config.quality)
    }

    pub fn max_width(&self) -> u32 {
        self.max_width
    }

    /// Downscale `payload` to `max_width` if it is wider, keeping its format.
    ///
    /// CPU-bound; call it from a blocking context.
    pub fn normalize(&self, payload: &[u8]) -> Result<Normalized, NormalizeError> {
        let format =
            image::guess_format(payload).map_err(|e| NormalizeError::Decode(e.to_string()))?;
        let img = image::load_from_memory_with_format(payload, format)
            .map_err(|e| NormalizeError::Decode(e.to_string()))?;

        if img.width() <= self.max_width {
            return Ok(Normalized::Unchanged);
        }

        let height = scaled_height(img.width(), img.height(), self.max_width);
        let resized = img.resize_exact(self.max_width, height, FilterType::Lanczos3);
        let data = self.encode(&resized, format)?;

        Ok(Normalized::Resized {
            data,
            width: self.max_width,
            height,
        })
    }

    fn encode(&self, img: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, NormalizeError> {
        let mut buf = Cursor::new(Vec::new());
        match format {
            ImageFormat::Jpeg => {
                // JPEG has no alpha channel.
                let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
                let encoder = JpegEncoder::new_with_quality(&mut buf, self.quality);
                rgb.write_with_encoder(encoder)
                    .map_err(|e| NormalizeError::Encode(e.to_string()))?;
            }
            other => {
                img.write_to(&mut buf, other)
                    .map_err(|e| NormalizeError::Encode(e.to_string()))?;
            }
        }
        Ok(buf.into_inner())
    }
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::from_config(&ImageConfig::default())
    }
}
