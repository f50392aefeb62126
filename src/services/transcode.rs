//! Decode, resize and re-encode raster images.
//!
//! Everything here is CPU bound and synchronous; async callers run it on the
//! blocking pool.

use crate::models::transform::{DEFAULT_QUALITY, RasterFormat};
use image::{
    DynamicImage, ImageReader,
    codecs::{jpeg::JpegEncoder, png::PngEncoder, webp::WebPEncoder},
    imageops::FilterType,
};
use std::io::Cursor;
use thiserror::Error;

/// Sources above this many pixels are refused before decoding, and resize
/// targets above it before allocating.
pub const MAX_PIXELS: u64 = 100_000_000;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("could not decode source image: {0}")]
    Decode(String),
    #[error("image of {width}x{height} is above the pixel limit")]
    ResolutionTooLarge { width: u32, height: u32 },
    #[error("could not encode derivative: {0}")]
    Encode(String),
}

/// Produce the derivative bytes for `source`.
///
/// `width` resizes with the aspect ratio kept; `quality` falls back to
/// [`DEFAULT_QUALITY`]. Only JPEG has a lossy quality setting, PNG and WebP
/// are written losslessly.
pub fn transcode(
    source: &[u8],
    format: RasterFormat,
    width: Option<u32>,
    quality: Option<u8>,
) -> Result<Vec<u8>, TransformError> {
    let image = decode(source)?;

    let image = match width {
        Some(width) => {
            let height = scaled_height(image.width(), image.height(), width);
            check_pixels(width, height)?;
            image.resize_exact(width, height, FilterType::Lanczos3)
        }
        None => image,
    };

    encode(&image, format, quality.unwrap_or(DEFAULT_QUALITY))
}

fn decode(source: &[u8]) -> Result<DynamicImage, TransformError> {
    let reader = || {
        ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|err| TransformError::Decode(err.to_string()))
    };

    let (width, height) = reader()?
        .into_dimensions()
        .map_err(|err| TransformError::Decode(err.to_string()))?;
    check_pixels(width, height)?;

    reader()?
        .decode()
        .map_err(|err| TransformError::Decode(err.to_string()))
}

fn check_pixels(width: u32, height: u32) -> Result<(), TransformError> {
    if u64::from(width) * u64::from(height) > MAX_PIXELS {
        return Err(TransformError::ResolutionTooLarge { width, height });
    }
    Ok(())
}

fn scaled_height(src_width: u32, src_height: u32, width: u32) -> u32 {
    if src_width == 0 {
        return 1;
    }
    let height = (f64::from(src_height) * f64::from(width) / f64::from(src_width)).round();
    (height as u32).max(1)
}

fn encode(
    image: &DynamicImage,
    format: RasterFormat,
    quality: u8,
) -> Result<Vec<u8>, TransformError> {
    let mut out = Vec::new();
    let result = match format {
        RasterFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut out, quality);
            DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder)
        }
        RasterFormat::Png => image.write_with_encoder(PngEncoder::new(&mut out)),
        RasterFormat::WebP => {
            let encoder = WebPEncoder::new_lossless(&mut out);
            if image.color().has_alpha() {
                DynamicImage::ImageRgba8(image.to_rgba8()).write_with_encoder(encoder)
            } else {
                DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder)
            }
        }
    };
    result.map_err(|err| TransformError::Encode(err.to_string()))?;
    Ok(out)
}
