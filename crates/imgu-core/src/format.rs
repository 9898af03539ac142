//! Node formats and processing rectangles, reduced to what buffer sizing needs.

use crate::error::ImguError;
use crate::limits::{nv12_size, validate_dimensions};

/// Multi-planar pixel format. Only the first plane is sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixFormat {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Stride of the first plane.
    pub bytes_per_line: u32,
    /// Size of the first plane in bytes.
    pub size_image: usize,
}

impl PixFormat {
    /// 12-bit-per-pixel NV12 at `width` x `height`.
    pub fn nv12(width: u32, height: u32) -> Result<Self, ImguError> {
        validate_dimensions(width, height)?;
        Ok(Self {
            width,
            height,
            bytes_per_line: width,
            size_image: nv12_size(width, height)?,
        })
    }
}

/// What a node carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeFormat {
    /// Image data.
    Pixel(PixFormat),
    /// Opaque metadata of a declared size.
    Meta { buffer_size: usize },
}

impl NodeFormat {
    /// Bytes a buffer of this format holds: the declared size for metadata,
    /// the first-plane image size for pixels.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        match self {
            Self::Pixel(pix) => pix.size_image,
            Self::Meta { buffer_size } => *buffer_size,
        }
    }

    /// The pixel format, if this is an image node.
    #[must_use]
    pub fn pixel(&self) -> Option<&PixFormat> {
        match self {
            Self::Pixel(pix) => Some(pix),
            Self::Meta { .. } => None,
        }
    }
}

/// A rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    /// Horizontal offset.
    pub left: u32,
    /// Vertical offset.
    pub top: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    /// A `width` x `height` rectangle at the origin.
    #[must_use]
    pub fn sized(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            width,
            height,
        }
    }
}

/// Rectangles pushed to the firmware with the formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rects {
    /// Effective input area.
    pub effective: Rect,
    /// Bayer down-scaler output.
    pub bds: Rect,
    /// Geometric distortion correction output.
    pub gdc: Rect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nv12_sizing() {
        let fmt = PixFormat::nv12(1920, 1080).unwrap();
        assert_eq!(fmt.size_image, 1920 * 1080 * 12 / 8);
        assert_eq!(NodeFormat::Pixel(fmt).buffer_size(), fmt.size_image);
        assert_eq!(NodeFormat::Meta { buffer_size: 64 }.buffer_size(), 64);
    }

    #[test]
    fn test_nv12_rejects_oversized() {
        assert!(PixFormat::nv12(100_000, 10).is_err());
    }
}
