//! Transform parameters accepted on fetch and the raster formats they apply to.

use crate::errors::GatewayError;

/// Largest width a client may request.
pub const MAX_WIDTH: u32 = 8192;

/// Quality used when a derivative is built from a width-only request.
pub const DEFAULT_QUALITY: u8 = 80;

/// Optional resize / re-encode request attached to a fetch.
///
/// Both fields absent means "serve the original".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransformRequest {
    width: Option<u32>,
    quality: Option<u8>,
}

impl TransformRequest {
    /// Validate raw parameters: width in `1..=MAX_WIDTH`, quality in `1..=100`.
    #[cfg(test)]
    pub fn new(width: Option<u32>, quality: Option<u8>) -> Result<Self, GatewayError> {
        Self::validated(width, quality.map(u32::from))
    }

    /// Parse the `w` / `q` query values as sent by a client.
    pub fn from_query(width: Option<&str>, quality: Option<&str>) -> Result<Self, GatewayError> {
        let width = width.map(|raw| parse_param("w", raw)).transpose()?;
        let quality = quality.map(|raw| parse_param("q", raw)).transpose()?;
        Self::validated(width, quality)
    }

    fn validated(width: Option<u32>, quality: Option<u32>) -> Result<Self, GatewayError> {
        if let Some(w) = width
            && (w == 0 || w > MAX_WIDTH)
        {
            return Err(GatewayError::Validation(format!(
                "w must be 1-{MAX_WIDTH}, got {w}"
            )));
        }
        let quality = match quality {
            Some(q @ 1..=100) => Some(q as u8),
            Some(q) => {
                return Err(GatewayError::Validation(format!(
                    "q must be 1-100, got {q}"
                )));
            }
            None => None,
        };
        Ok(Self { width, quality })
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }

    pub fn quality(&self) -> Option<u8> {
        self.quality
    }

    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.quality.is_none()
    }
}

fn parse_param(name: &str, raw: &str) -> Result<u32, GatewayError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| GatewayError::Validation(format!("{name} must be a positive integer, got `{raw}`")))
}

/// Raster formats the gateway can decode and re-encode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RasterFormat {
    Jpeg,
    Png,
    WebP,
}

impl RasterFormat {
    /// Map a file extension to its codec. `jpg` and `jpeg` share one codec.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
        }
    }
}
