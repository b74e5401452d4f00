//! EXIF orientation handling

use image::DynamicImage;

/// EXIF orientation tag values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Tag absent, zero or out of range
    Undefined,
    /// 1
    Normal,
    /// 2
    FlipHorizontal,
    /// 3
    Rotate180,
    /// 4
    FlipVertical,
    /// 5: mirrored across the top-left/bottom-right diagonal
    Transpose,
    /// 6: rotate 90 degrees clockwise to display
    Rotate90,
    /// 7: mirrored across the top-right/bottom-left diagonal
    Transverse,
    /// 8: rotate 270 degrees clockwise to display
    Rotate270,
}

impl Orientation {
    /// Interpret a raw tag value
    pub fn from_exif(value: u32) -> Self {
        match value {
            1 => Orientation::Normal,
            2 => Orientation::FlipHorizontal,
            3 => Orientation::Rotate180,
            4 => Orientation::FlipVertical,
            5 => Orientation::Transpose,
            6 => Orientation::Rotate90,
            7 => Orientation::Transverse,
            8 => Orientation::Rotate270,
            _ => Orientation::Undefined,
        }
    }

    /// Pixel transform that makes the image upright
    pub fn transform(&self) -> OrientationTransform {
        match self {
            Orientation::Undefined | Orientation::Normal => OrientationTransform::None,
            Orientation::Rotate90 => OrientationTransform::Rotate(90),
            Orientation::Rotate180 => OrientationTransform::Rotate(180),
            Orientation::Rotate270 => OrientationTransform::Rotate(270),
            Orientation::FlipHorizontal => OrientationTransform::FlipHorizontal,
            Orientation::FlipVertical => OrientationTransform::FlipVertical,
            Orientation::Transpose => OrientationTransform::Transpose,
            Orientation::Transverse => OrientationTransform::Transverse,
        }
    }

    /// Stored width and height are exchanged relative to the displayed image
    pub fn swaps_axes(&self) -> bool {
        matches!(
            self,
            Orientation::Rotate90
                | Orientation::Rotate270
                | Orientation::Transpose
                | Orientation::Transverse
        )
    }
}

/// Rotation or mirroring applied to the decoded bitmap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrientationTransform {
    None,
    /// Clockwise rotation by 90, 180 or 270 degrees
    Rotate(u16),
    FlipHorizontal,
    FlipVertical,
    /// Rotate 90 then mirror horizontally
    Transpose,
    /// Rotate 270 then mirror horizontally
    Transverse,
}

impl OrientationTransform {
    pub fn is_identity(&self) -> bool {
        matches!(self, OrientationTransform::None)
            || matches!(self, OrientationTransform::Rotate(deg) if deg % 360 == 0)
    }

    /// Produce a new bitmap with the transform applied
    pub fn apply(&self, image: &DynamicImage) -> DynamicImage {
        match self {
            OrientationTransform::Rotate(90) => image.rotate90(),
            OrientationTransform::Rotate(180) => image.rotate180(),
            OrientationTransform::Rotate(270) => image.rotate270(),
            OrientationTransform::FlipHorizontal => image.fliph(),
            OrientationTransform::FlipVertical => image.flipv(),
            OrientationTransform::Transpose => image.rotate90().fliph(),
            OrientationTransform::Transverse => image.rotate270().fliph(),
            OrientationTransform::None | OrientationTransform::Rotate(_) => image.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
    const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
    const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

    /// 2x2 with distinct corners:
    /// R G
    /// B W
    fn corners() -> DynamicImage {
        let mut img = RgbImage::new(2, 2);
        img.put_pixel(0, 0, RED);
        img.put_pixel(1, 0, GREEN);
        img.put_pixel(0, 1, BLUE);
        img.put_pixel(1, 1, WHITE);
        DynamicImage::ImageRgb8(img)
    }

    fn grid(image: &DynamicImage) -> [[Rgb<u8>; 2]; 2] {
        let rgb = image.to_rgb8();
        [
            [*rgb.get_pixel(0, 0), *rgb.get_pixel(1, 0)],
            [*rgb.get_pixel(0, 1), *rgb.get_pixel(1, 1)],
        ]
    }

    #[test]
    fn test_tag_table() {
        let expected = [
            (0, OrientationTransform::None),
            (1, OrientationTransform::None),
            (2, OrientationTransform::FlipHorizontal),
            (3, OrientationTransform::Rotate(180)),
            (4, OrientationTransform::FlipVertical),
            (5, OrientationTransform::Transpose),
            (6, OrientationTransform::Rotate(90)),
            (7, OrientationTransform::Transverse),
            (8, OrientationTransform::Rotate(270)),
            (9, OrientationTransform::None),
            (65535, OrientationTransform::None),
        ];
        for (tag, transform) in expected {
            assert_eq!(Orientation::from_exif(tag).transform(), transform, "tag {}", tag);
        }
    }

    #[test]
    fn test_identity_transforms() {
        assert!(Orientation::Undefined.transform().is_identity());
        assert!(Orientation::Normal.transform().is_identity());
        assert!(OrientationTransform::Rotate(360).is_identity());
        assert!(!Orientation::Rotate90.transform().is_identity());
        assert!(!Orientation::FlipVertical.transform().is_identity());
    }

    #[test]
    fn test_swaps_axes() {
        assert!(Orientation::Rotate90.swaps_axes());
        assert!(Orientation::Transverse.swaps_axes());
        assert!(!Orientation::Rotate180.swaps_axes());
        assert!(!Orientation::FlipHorizontal.swaps_axes());
        assert!(!Orientation::Undefined.swaps_axes());
    }

    #[test]
    fn test_apply_rotations() {
        let img = corners();
        assert_eq!(
            grid(&OrientationTransform::Rotate(90).apply(&img)),
            [[BLUE, RED], [WHITE, GREEN]]
        );
        assert_eq!(
            grid(&OrientationTransform::Rotate(180).apply(&img)),
            [[WHITE, BLUE], [GREEN, RED]]
        );
        assert_eq!(
            grid(&OrientationTransform::Rotate(270).apply(&img)),
            [[GREEN, WHITE], [RED, BLUE]]
        );
    }

    #[test]
    fn test_apply_mirrors() {
        let img = corners();
        assert_eq!(
            grid(&OrientationTransform::FlipHorizontal.apply(&img)),
            [[GREEN, RED], [WHITE, BLUE]]
        );
        assert_eq!(
            grid(&OrientationTransform::FlipVertical.apply(&img)),
            [[BLUE, WHITE], [RED, GREEN]]
        );
        assert_eq!(
            grid(&OrientationTransform::Transpose.apply(&img)),
            [[RED, BLUE], [GREEN, WHITE]]
        );
        assert_eq!(
            grid(&OrientationTransform::Transverse.apply(&img)),
            [[WHITE, GREEN], [BLUE, RED]]
        );
    }

    #[test]
    fn test_rotate_90_swaps_dimensions() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 2));
        let rotated = OrientationTransform::Rotate(90).apply(&img);
        assert_eq!((rotated.width(), rotated.height()), (2, 4));
    }
}
