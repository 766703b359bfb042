use std::path::{Path, PathBuf};

use crate::roi::BoundingBox;

/// Outcome of region detection on a single slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceClass {
    /// Foreground region large enough to hand to the codec.
    HasRegion(BoundingBox),
    /// Foreground exists but its bounding box is below the minimum region size.
    Degenerate,
    /// No pixel above the threshold.
    Empty,
}

impl SliceClass {
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        match self {
            SliceClass::HasRegion(bbox) => Some(*bbox),
            SliceClass::Degenerate | SliceClass::Empty => None,
        }
    }
}

/// Lossless raster format used when the codec fails on a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterFormat {
    /// 8-bit grayscale, lossless WebP.
    WebP,
    /// 16-bit grayscale PNG, for frames whose samples do not fit in 8 bits.
    Png16,
}

impl RasterFormat {
    pub fn extension(self) -> &'static str {
        match self {
            RasterFormat::WebP => "webp",
            RasterFormat::Png16 => "png",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("webp") {
            Some(RasterFormat::WebP)
        } else if ext.eq_ignore_ascii_case("png") {
            Some(RasterFormat::Png16)
        } else {
            None
        }
    }
}

/// Where the compressed pixels of a slice live on disk.
///
/// Resolved once per slice when an encoded series is opened for decoding, so the
/// restorer never has to guess from file names again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredPayload {
    /// Binary container holding the codec output.
    Container(PathBuf),
    /// Original frame kept as a lossless raster after a codec failure.
    FallbackRaster(PathBuf, RasterFormat),
    /// Nothing stored: the slice is empty or degenerate.
    None,
}
