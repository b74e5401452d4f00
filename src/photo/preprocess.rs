//! In-place image preparation

use super::codec::{ImageCodec, StandardCodec};
use super::orientation::Orientation;
use super::{ImageSpec, PreparedFile};
use crate::error::{Result, UplinkError};
use image::{DynamicImage, GenericImageView};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, debug_span, warn};

/// Prepares captured images for upload.
///
/// The sequence for one file is:
///
/// 1. read the EXIF orientation (unreadable metadata counts as absent)
/// 2. decode subsampled to the target bounds, axes swapped for
///    orientations that rotate by 90 or 270 degrees
/// 3. encode over the source file
/// 4. copy the original orientation tag onto the new file and read it back
/// 5. rotate or mirror the bitmap accordingly
/// 6. burn in the watermark
/// 7. encode the upright, watermarked bitmap over the file
///
/// Steps 1-3 are mandatory: a decode or encode failure fails the whole
/// preparation. A failure in steps 4-7 leaves the step-3 file (with its
/// orientation tag) in place and marks the result as degraded.
///
/// Preparation is blocking CPU and file work; async callers should run it
/// on a blocking thread.
#[derive(Clone)]
pub struct ImagePreprocessor {
    codec: Arc<dyn ImageCodec>,
}

impl ImagePreprocessor {
    /// Preprocessor backed by [`StandardCodec`]
    pub fn new() -> Self {
        Self::with_codec(Arc::new(StandardCodec))
    }

    pub fn with_codec(codec: Arc<dyn ImageCodec>) -> Self {
        Self { codec }
    }

    /// Prepare `spec.source_path` in place.
    ///
    /// On a degraded result `spec.source_path` is re-pointed at the
    /// compressed-only file (which is the same path).
    pub fn prepare(&self, spec: &mut ImageSpec) -> Result<PreparedFile> {
        if spec.source_path.as_os_str().is_empty() {
            return Err(UplinkError::Config(
                "Could not find the filepath of the selected file".to_string(),
            ));
        }

        let path = spec.source_path.clone();
        let _span = debug_span!("prepare", path = %path.display()).entered();

        let original_tag = match self.codec.read_orientation(&path) {
            Ok(tag) => tag,
            Err(e) => {
                warn!("Unreadable orientation metadata, treating as absent: {}", e);
                None
            }
        };

        let mut target = spec.target_size();
        if original_tag.map(Orientation::from_exif).is_some_and(|o| o.swaps_axes()) {
            target = target.swapped();
        }

        let decoded = self.codec.decode_subsampled(&path, target)?;
        self.codec.encode(&decoded, &path, spec.format)?;
        let compressed_dims = decoded.dimensions();
        debug!(
            width = compressed_dims.0,
            height = compressed_dims.1,
            "Compressed image written"
        );

        let (degraded, (width, height)) =
            match self.finish(&path, decoded, original_tag, spec) {
                Ok(dims) => (false, dims),
                Err(e) => {
                    warn!("Uploading compressed image without orientation/watermark: {}", e);
                    spec.source_path = path.clone();
                    (true, compressed_dims)
                }
            };

        let size_bytes = std::fs::metadata(&path)?.len();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(PreparedFile {
            path,
            file_name,
            media_type: spec.media_type.clone(),
            size_bytes,
            width,
            height,
            degraded,
        })
    }

    /// Steps 4-7; returns the final pixel dimensions
    fn finish(
        &self,
        path: &Path,
        decoded: DynamicImage,
        original_tag: Option<u32>,
        spec: &ImageSpec,
    ) -> Result<(u32, u32)> {
        let normalized = match original_tag {
            Some(tag) => {
                self.codec.write_orientation(path, tag)?;
                self.codec.read_orientation(path)?.unwrap_or(0)
            }
            None => 0,
        };

        let transform = Orientation::from_exif(normalized).transform();
        if transform.is_identity() && spec.watermark.is_empty() {
            return Ok(decoded.dimensions());
        }

        let upright = if transform.is_identity() {
            decoded
        } else {
            let rotated = self.codec.transform(&decoded, transform)?;
            drop(decoded);
            rotated
        };

        let marked = if spec.watermark.is_empty() {
            upright
        } else {
            let marked = self.codec.watermark(&upright, &spec.watermark)?;
            drop(upright);
            marked
        };

        self.codec.encode(&marked, path, spec.format)?;
        Ok(marked.dimensions())
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ImagePreprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePreprocessor").finish_non_exhaustive()
    }
}
