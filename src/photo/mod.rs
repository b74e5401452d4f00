//! Image preparation pipeline
//!
//! Turns a captured photo into an upload-ready file in place: subsampled
//! decode bounded by the target size, re-encode, orientation tag carried
//! over, rotation/mirroring baked into the pixels, watermark burned in.
//!
//! - [`codec`] - the [`ImageCodec`] capability and its `image`-based default
//! - [`orientation`] - EXIF orientation values and the transforms they imply
//! - [`watermark`] - bottom-anchored text overlay
//! - [`preprocess`] - [`ImagePreprocessor`], which sequences the steps

pub mod codec;
pub mod orientation;
pub mod preprocess;
pub mod watermark;

pub use codec::{calculate_sample_size, ImageCodec, StandardCodec};
pub use orientation::{Orientation, OrientationTransform};
pub use preprocess::ImagePreprocessor;

use crate::config::{
    DEFAULT_IMAGE_HEIGHT, DEFAULT_IMAGE_WIDTH, DEFAULT_JPEG_QUALITY, DEFAULT_MEDIA_TYPE,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Bounding box for the prepared image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Same box with the axes exchanged
    pub fn swapped(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

/// Output encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EncodingFormat {
    /// Lossy JPEG at the given quality (1-100)
    Jpeg { quality: u8 },
    /// Lossless PNG
    Png,
    /// Lossless WebP
    Webp,
}

impl EncodingFormat {
    /// Media type of files in this format
    pub fn media_type(&self) -> &'static str {
        match self {
            EncodingFormat::Jpeg { .. } => "image/jpeg",
            EncodingFormat::Png => "image/png",
            EncodingFormat::Webp => "image/webp",
        }
    }
}

impl Default for EncodingFormat {
    fn default() -> Self {
        EncodingFormat::Jpeg {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// One `label: value` watermark line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkLine {
    pub label: String,
    pub value: String,
}

impl WatermarkLine {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }

    /// Rendered text of the line
    pub fn text(&self) -> String {
        format!("{}: {}", self.label, self.value)
    }
}

/// What to produce from a captured image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSpec {
    /// File to prepare; rewritten in place
    pub source_path: PathBuf,

    /// Maximum output width (default [`DEFAULT_IMAGE_WIDTH`])
    pub target_width: Option<u32>,

    /// Maximum output height (default [`DEFAULT_IMAGE_HEIGHT`])
    pub target_height: Option<u32>,

    /// Output encoding
    #[serde(default)]
    pub format: EncodingFormat,

    /// Watermark lines, top to bottom
    #[serde(default)]
    pub watermark: Vec<WatermarkLine>,

    /// Content type sent with the upload
    pub media_type: String,
}

impl ImageSpec {
    /// Spec with default bounds, JPEG output and no watermark
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            target_width: None,
            target_height: None,
            format: EncodingFormat::default(),
            watermark: Vec::new(),
            media_type: DEFAULT_MEDIA_TYPE.to_string(),
        }
    }

    pub fn with_bounds(mut self, width: u32, height: u32) -> Self {
        self.target_width = Some(width);
        self.target_height = Some(height);
        self
    }

    /// Set the output format and the matching media type
    pub fn with_format(mut self, format: EncodingFormat) -> Self {
        self.format = format;
        self.media_type = format.media_type().to_string();
        self
    }

    pub fn with_watermark(mut self, lines: Vec<WatermarkLine>) -> Self {
        self.watermark = lines;
        self
    }

    /// Effective bounds; unset or zero dimensions fall back to the defaults
    pub fn target_size(&self) -> TargetSize {
        TargetSize::new(
            self.target_width
                .filter(|w| *w > 0)
                .unwrap_or(DEFAULT_IMAGE_WIDTH),
            self.target_height
                .filter(|h| *h > 0)
                .unwrap_or(DEFAULT_IMAGE_HEIGHT),
        )
    }
}

/// Result of a successful preparation
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedFile {
    /// Prepared file, always the source path
    pub path: PathBuf,

    /// Final path component, used for the object key
    pub file_name: String,

    /// Content type for the upload
    pub media_type: String,

    /// File size on disk
    pub size_bytes: u64,

    /// Pixel width of the prepared file
    pub width: u32,

    /// Pixel height of the prepared file
    pub height: u32,

    /// Orientation or watermark step failed; file is compressed only
    pub degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults() {
        let spec = ImageSpec::new("/tmp/photo.jpg");
        assert_eq!(
            spec.target_size(),
            TargetSize::new(DEFAULT_IMAGE_WIDTH, DEFAULT_IMAGE_HEIGHT)
        );
        assert_eq!(spec.media_type, "image/jpeg");
        assert_eq!(spec.format, EncodingFormat::Jpeg { quality: 80 });
    }

    #[test]
    fn test_zero_bounds_fall_back() {
        let spec = ImageSpec::new("p.jpg").with_bounds(0, 600);
        assert_eq!(spec.target_size(), TargetSize::new(DEFAULT_IMAGE_WIDTH, 600));
    }

    #[test]
    fn test_with_format_sets_media_type() {
        let spec = ImageSpec::new("p.png").with_format(EncodingFormat::Png);
        assert_eq!(spec.media_type, "image/png");
    }

    #[test]
    fn test_watermark_line_text() {
        let line = WatermarkLine::new("Outlet name", "Test Store");
        assert_eq!(line.text(), "Outlet name: Test Store");
    }

    #[test]
    fn test_target_swapped() {
        assert_eq!(TargetSize::new(800, 600).swapped(), TargetSize::new(600, 800));
    }
}
