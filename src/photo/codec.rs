//! Image codec capability
//!
//! [`ImageCodec`] bundles every primitive the preparation pipeline needs:
//! orientation metadata read/write, bounded decode, encode, pixel transform
//! and watermark. Each method defaults to the `image`-based implementation
//! in this module, so [`StandardCodec`] is just an empty impl and test
//! doubles override only the step they want to break.

use super::orientation::OrientationTransform;
use super::watermark;
use super::{EncodingFormat, TargetSize, WatermarkLine};
use crate::error::{Result, UplinkError};
use bytes::Bytes;
use exif::{experimental::Writer as ExifWriter, Field, In, Tag, Value};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, ImageReader, RgbImage};
use img_parts::riff::RiffContent;
use img_parts::webp::CHUNK_EXIF;
use img_parts::{DynImage, ImageEXIF};
use jpeg_decoder::PixelFormat;
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Image primitives used by [`super::ImagePreprocessor`]
pub trait ImageCodec: Send + Sync {
    /// Raw EXIF orientation value of the file, `None` when absent
    fn read_orientation(&self, path: &Path) -> Result<Option<u32>> {
        read_orientation(path)
    }

    /// Decode with power-of-two subsampling, then fit within `target`
    fn decode_subsampled(&self, path: &Path, target: TargetSize) -> Result<DynamicImage> {
        decode_subsampled(path, target)
    }

    /// Encode `image` to `path`, replacing the file atomically
    fn encode(&self, image: &DynamicImage, path: &Path, format: EncodingFormat) -> Result<()> {
        encode_to_path(image, path, format)
    }

    /// Store `orientation` as the file's EXIF orientation tag
    fn write_orientation(&self, path: &Path, orientation: u32) -> Result<()> {
        write_orientation(path, orientation)
    }

    /// Apply a rotation or mirror
    fn transform(
        &self,
        image: &DynamicImage,
        transform: OrientationTransform,
    ) -> Result<DynamicImage> {
        Ok(transform.apply(image))
    }

    /// Burn watermark lines into a copy of `image`
    fn watermark(&self, image: &DynamicImage, lines: &[WatermarkLine]) -> Result<DynamicImage> {
        Ok(watermark::render(image, lines))
    }
}

/// Codec backed by `image`, `jpeg-decoder`, `kamadak-exif` and `img-parts`
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCodec;

impl ImageCodec for StandardCodec {}

/// Largest power-of-two divisor that keeps both halved dimensions at or
/// above the target.
///
/// Returns 1 when the image is already at or below the target on either
/// axis. Zero target dimensions are treated as 1.
pub fn calculate_sample_size(width: u32, height: u32, target: TargetSize) -> u32 {
    let (target_width, target_height) = (target.width.max(1), target.height.max(1));
    let mut sample = 1;
    if width > target_width || height > target_height {
        let half_width = width / 2;
        let half_height = height / 2;
        while half_width / sample >= target_width && half_height / sample >= target_height {
            sample *= 2;
        }
    }
    sample
}

/// Read the primary-image orientation tag
pub fn read_orientation(path: &Path) -> Result<Option<u32>> {
    let mut reader = BufReader::new(File::open(path)?);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(exif::Error::NotFound(_)) => return Ok(None),
        Err(e) => match read_prefixed_exif(path)? {
            Some(exif) => exif,
            None => return Err(UplinkError::Metadata(e.to_string())),
        },
    };
    Ok(exif
        .get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0)))
}

/// WebP writers disagree on whether the EXIF chunk starts with the
/// `Exif\0\0` marker; kamadak-exif only accepts bare TIFF there.
fn read_prefixed_exif(path: &Path) -> Result<Option<exif::Exif>> {
    let data = Bytes::from(std::fs::read(path)?);
    let tiff = match DynImage::from_bytes(data) {
        Ok(Some(container)) => container.exif(),
        _ => None,
    };
    Ok(tiff.and_then(|tiff| exif::Reader::new().read_raw(tiff.to_vec()).ok()))
}

/// Replace the file's EXIF block with one holding only the orientation tag
pub fn write_orientation(path: &Path, orientation: u32) -> Result<()> {
    let value = u16::try_from(orientation).map_err(|_| {
        UplinkError::Metadata(format!("Orientation value out of range: {}", orientation))
    })?;

    let field = Field {
        tag: Tag::Orientation,
        ifd_num: In::PRIMARY,
        value: Value::Short(vec![value]),
    };
    let mut writer = ExifWriter::new();
    writer.push_field(&field);
    let mut tiff = Cursor::new(Vec::new());
    writer
        .write(&mut tiff, false)
        .map_err(|e| UplinkError::Metadata(e.to_string()))?;

    let data = Bytes::from(std::fs::read(path)?);
    let mut container = DynImage::from_bytes(data)
        .map_err(|e| UplinkError::Metadata(e.to_string()))?
        .ok_or_else(|| {
            UplinkError::Metadata(format!(
                "No EXIF-capable container: {}",
                path.display()
            ))
        })?;
    let tiff = Bytes::from(tiff.into_inner());
    container.set_exif(Some(tiff.clone()));
    if let DynImage::WebP(webp) = &mut container {
        // The WebP container format stores bare TIFF in the EXIF chunk
        for chunk in webp.chunks_mut() {
            if chunk.id() == CHUNK_EXIF {
                *chunk.content_mut() = RiffContent::Data(tiff.clone());
            }
        }
    }

    replace_file(path, |out| {
        container.encoder().write_to(out)?;
        Ok(())
    })
}

/// Decode `path` no larger than needed for `target`, then fit within it
pub fn decode_subsampled(path: &Path, target: TargetSize) -> Result<DynamicImage> {
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| UplinkError::Decode(format!("{}: {}", path.display(), e)))?;
    let format = reader.format();
    let (width, height) = reader.into_dimensions().map_err(decode_error)?;

    let sample = calculate_sample_size(width, height, target);
    debug!(
        width,
        height,
        sample,
        target_width = target.width,
        target_height = target.height,
        "Decoding image"
    );

    let decoded = match format {
        Some(ImageFormat::Jpeg) => decode_jpeg_scaled(path, width, height, sample)?,
        _ => decode_and_reduce(path, width, height, sample)?,
    };

    Ok(fit_within(decoded, target))
}

/// JPEG decode using DCT scaling, so the full-size bitmap never exists
fn decode_jpeg_scaled(path: &Path, width: u32, height: u32, sample: u32) -> Result<DynamicImage> {
    let mut decoder = jpeg_decoder::Decoder::new(BufReader::new(File::open(path)?));
    decoder.read_info().map_err(decode_error)?;
    let info = decoder
        .info()
        .ok_or_else(|| UplinkError::Decode("Missing JPEG header".to_string()))?;

    if !matches!(info.pixel_format, PixelFormat::RGB24 | PixelFormat::L8) {
        return decode_and_reduce(path, width, height, sample);
    }

    let (scaled_width, scaled_height) = decoder
        .scale(
            clamp_u16(width.div_ceil(sample)),
            clamp_u16(height.div_ceil(sample)),
        )
        .map_err(decode_error)?;
    let pixels = decoder.decode().map_err(decode_error)?;
    let (w, h) = (u32::from(scaled_width), u32::from(scaled_height));

    let image = match info.pixel_format {
        PixelFormat::RGB24 => RgbImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgb8),
        PixelFormat::L8 => GrayImage::from_raw(w, h, pixels).map(DynamicImage::ImageLuma8),
        _ => None,
    };
    image.ok_or_else(|| UplinkError::Decode("Decoded buffer does not match its size".to_string()))
}

/// Full decode followed by a resize by `sample`
fn decode_and_reduce(path: &Path, width: u32, height: u32, sample: u32) -> Result<DynamicImage> {
    let image = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| UplinkError::Decode(e.to_string()))?
        .decode()
        .map_err(decode_error)?;

    if sample > 1 {
        Ok(image.resize_exact(
            (width / sample).max(1),
            (height / sample).max(1),
            FilterType::Triangle,
        ))
    } else {
        Ok(image)
    }
}

fn fit_within(image: DynamicImage, target: TargetSize) -> DynamicImage {
    if image.width() > target.width || image.height() > target.height {
        image.resize(target.width, target.height, FilterType::Triangle)
    } else {
        image
    }
}

/// Encode `image` in `format` and atomically replace `path` with it
pub fn encode_to_path(image: &DynamicImage, path: &Path, format: EncodingFormat) -> Result<()> {
    replace_file(path, |out| match format {
        EncodingFormat::Jpeg { quality } => {
            let converted;
            let pixels = match image {
                DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => image,
                _ => {
                    converted = DynamicImage::ImageRgb8(image.to_rgb8());
                    &converted
                }
            };
            let encoder = JpegEncoder::new_with_quality(out, quality.clamp(1, 100));
            pixels.write_with_encoder(encoder).map_err(encode_error)
        }
        EncodingFormat::Png => image
            .write_with_encoder(PngEncoder::new(out))
            .map_err(encode_error),
        EncodingFormat::Webp => {
            let converted;
            let pixels = match image {
                DynamicImage::ImageRgb8(_)
                | DynamicImage::ImageRgba8(_)
                | DynamicImage::ImageLuma8(_)
                | DynamicImage::ImageLumaA8(_) => image,
                _ => {
                    converted = DynamicImage::ImageRgba8(image.to_rgba8());
                    &converted
                }
            };
            pixels
                .write_with_encoder(WebPEncoder::new_lossless(out))
                .map_err(encode_error)
        }
    })
}

/// Write through a temporary file in the same directory, then rename over
/// `path`. On any failure the original file is untouched.
fn replace_file<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    {
        let mut out = BufWriter::new(temp.as_file_mut());
        write(&mut out)?;
        out.flush()?;
    }
    temp.persist(path)
        .map_err(|e| UplinkError::Io(e.error.to_string()))?;
    Ok(())
}

fn clamp_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

fn decode_error(e: impl std::fmt::Display) -> UplinkError {
    UplinkError::Decode(e.to_string())
}

fn encode_error(e: impl std::fmt::Display) -> UplinkError {
    UplinkError::Encode(e.to_string())
}


#[cfg(test)]
mod tests {
    use super::test_support::write_split_jpeg;
    use super::*;
    use tempfile::tempdir;

    const RED: [u8; 3] = [255, 0, 0];
    const BLUE: [u8; 3] = [0, 0, 255];

    #[test]
    fn test_sample_size_halves_while_both_axes_fit() {
        let target = TargetSize::new(800, 600);
        assert_eq!(calculate_sample_size(4000, 3000, target), 4);
        assert_eq!(calculate_sample_size(1600, 1200, target), 2);
        assert_eq!(calculate_sample_size(1599, 1200, target), 1);
    }

    #[test]
    fn test_sample_size_small_image() {
        let target = TargetSize::new(800, 600);
        assert_eq!(calculate_sample_size(800, 600, target), 1);
        assert_eq!(calculate_sample_size(100, 100, target), 1);
    }

    #[test]
    fn test_sample_size_zero_target_terminates() {
        assert_eq!(calculate_sample_size(4000, 3000, TargetSize::new(0, 0)), 2048);
        assert_eq!(
            calculate_sample_size(u32::MAX, u32::MAX, TargetSize::new(0, 0)),
            1u32 << 31
        );
        assert_eq!(calculate_sample_size(1600, 1200, TargetSize::new(0, 600)), 2);
    }

    #[test]
    fn test_sample_size_result_stays_above_target() {
        let target = TargetSize::new(640, 480);
        for (w, h) in [(5000, 4000), (4032, 3024), (1300, 980), (641, 481)] {
            let sample = calculate_sample_size(w, h, target);
            assert!(sample.is_power_of_two());
            assert!(w / sample >= target.width.min(w));
            assert!(h / sample >= target.height.min(h));
        }
    }

    #[test]
    fn test_orientation_absent_on_plain_jpeg() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.jpg");
        write_split_jpeg(&path, 16, 16, RED, BLUE);
        assert_eq!(read_orientation(&path).unwrap(), None);
    }

    #[test]
    fn test_orientation_write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tagged.jpg");
        write_split_jpeg(&path, 16, 16, RED, BLUE);

        write_orientation(&path, 6).unwrap();
        assert_eq!(read_orientation(&path).unwrap(), Some(6));

        write_orientation(&path, 3).unwrap();
        assert_eq!(read_orientation(&path).unwrap(), Some(3));

        // Pixel data survives the metadata rewrite
        let img = ImageReader::open(&path).unwrap().decode().unwrap();
        assert_eq!((img.width(), img.height()), (16, 16));
    }

    #[test]
    fn test_orientation_write_then_read_webp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tagged.webp");
        let img = DynamicImage::ImageRgb8(RgbImage::new(24, 12));
        encode_to_path(&img, &path, EncodingFormat::Webp).unwrap();

        write_orientation(&path, 6).unwrap();
        assert_eq!(read_orientation(&path).unwrap(), Some(6));

        let decoded = ImageReader::open(&path)
            .unwrap()
            .with_guessed_format()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!((decoded.width(), decoded.height()), (24, 12));
    }

    #[test]
    fn test_orientation_read_from_marker_prefixed_webp_chunk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefixed.webp");
        let img = DynamicImage::ImageRgb8(RgbImage::new(16, 16));
        encode_to_path(&img, &path, EncodingFormat::Webp).unwrap();

        let orientation = Field {
            tag: Tag::Orientation,
            ifd_num: In::PRIMARY,
            value: Value::Short(vec![8]),
        };
        let mut writer = ExifWriter::new();
        writer.push_field(&orientation);
        let mut tiff = Cursor::new(Vec::new());
        writer.write(&mut tiff, false).unwrap();

        // img-parts writes the chunk with the `Exif\0\0` marker
        let mut container = DynImage::from_bytes(Bytes::from(std::fs::read(&path).unwrap()))
            .unwrap()
            .unwrap();
        container.set_exif(Some(Bytes::from(tiff.into_inner())));
        let mut out = Vec::new();
        container.encoder().write_to(&mut out).unwrap();
        std::fs::write(&path, out).unwrap();

        assert_eq!(read_orientation(&path).unwrap(), Some(8));
    }

    #[test]
    fn test_orientation_out_of_range_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tagged.jpg");
        write_split_jpeg(&path, 8, 8, RED, BLUE);
        assert!(matches!(
            write_orientation(&path, 70_000),
            Err(UplinkError::Metadata(_))
        ));
    }

    #[test]
    fn test_decode_subsampled_jpeg_fits_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.jpg");
        write_split_jpeg(&path, 1600, 1200, RED, BLUE);

        let img = decode_subsampled(&path, TargetSize::new(400, 300)).unwrap();
        assert!(img.width() <= 400 && img.height() <= 300);
        assert_eq!((img.width(), img.height()), (400, 300));
    }

    #[test]
    fn test_decode_subsampled_png_fits_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.png");
        let img = DynamicImage::ImageRgb8(RgbImage::new(1000, 500));
        encode_to_path(&img, &path, EncodingFormat::Png).unwrap();

        let decoded = decode_subsampled(&path, TargetSize::new(300, 300)).unwrap();
        assert!(decoded.width() <= 300 && decoded.height() <= 300);
    }

    #[test]
    fn test_decode_small_image_not_enlarged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("small.jpg");
        write_split_jpeg(&path, 64, 48, RED, BLUE);

        let img = decode_subsampled(&path, TargetSize::new(800, 600)).unwrap();
        assert_eq!((img.width(), img.height()), (64, 48));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.jpg");
        std::fs::write(&path, b"definitely not an image").unwrap();
        assert!(matches!(
            decode_subsampled(&path, TargetSize::new(100, 100)),
            Err(UplinkError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_missing_file_fails() {
        let dir = tempdir().unwrap();
        let result = decode_subsampled(&dir.path().join("nope.jpg"), TargetSize::new(10, 10));
        assert!(matches!(result, Err(UplinkError::Decode(_))));
    }

    #[test]
    fn test_encode_formats() {
        let dir = tempdir().unwrap();
        let img = DynamicImage::ImageRgba8(image::RgbaImage::new(8, 8));
        for (format, expected) in [
            (EncodingFormat::Jpeg { quality: 80 }, ImageFormat::Jpeg),
            (EncodingFormat::Png, ImageFormat::Png),
            (EncodingFormat::Webp, ImageFormat::WebP),
        ] {
            let path = dir.path().join("out.bin");
            encode_to_path(&img, &path, format).unwrap();
            let reader = ImageReader::open(&path)
                .unwrap()
                .with_guessed_format()
                .unwrap();
            assert_eq!(reader.format(), Some(expected));
        }
    }
}
