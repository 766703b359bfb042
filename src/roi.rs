use ndarray::{Array2, ArrayView2, s};

use crate::enums::SliceClass;

/// Guards the rescale against a crop whose samples all share one value.
const RANGE_EPSILON: f32 = 1e-7;

/// Minimal axis-aligned box around the foreground of a slice.
///
/// `x_max` and `y_max` are the largest coordinates that are still inside the
/// region, so a box covering a single pixel has `x_min == x_max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub x_min: usize,
    pub x_max: usize,
    pub y_min: usize,
    pub y_max: usize,
}

impl BoundingBox {
    pub fn new(x_min: usize, x_max: usize, y_min: usize, y_max: usize) -> Self {
        Self {
            x_min,
            x_max,
            y_min,
            y_max,
        }
    }

    /// Number of columns covered by the box
    pub fn width(&self) -> usize {
        self.x_max - self.x_min + 1
    }

    /// Number of rows covered by the box
    pub fn height(&self) -> usize {
        self.y_max - self.y_min + 1
    }

    /// Whether either span (`max - min`) is below `min_region_size`.
    pub fn is_degenerate(&self, min_region_size: usize) -> bool {
        self.x_max - self.x_min < min_region_size || self.y_max - self.y_min < min_region_size
    }

    /// Whether the box is ordered and lies inside a `width x height` frame.
    pub fn fits_frame(&self, width: usize, height: usize) -> bool {
        self.x_min <= self.x_max
            && self.y_min <= self.y_max
            && self.x_max < width
            && self.y_max < height
    }
}

/// Find the bounding box of all samples strictly above `threshold`.
///
/// Returns `None` when no sample passes.
pub fn detect_region(pixels: ArrayView2<'_, u16>, threshold: f64) -> Option<BoundingBox> {
    let mut bbox: Option<BoundingBox> = None;

    for ((row, col), &value) in pixels.indexed_iter() {
        if f64::from(value) <= threshold {
            continue;
        }
        bbox = Some(match bbox {
            None => BoundingBox::new(col, col, row, row),
            Some(b) => BoundingBox::new(
                b.x_min.min(col),
                b.x_max.max(col),
                b.y_min.min(row),
                b.y_max.max(row),
            ),
        });
    }

    bbox
}

/// Classify a slice as empty, degenerate or carrying a region worth compressing.
pub fn classify(pixels: ArrayView2<'_, u16>, threshold: f64, min_region_size: usize) -> SliceClass {
    match detect_region(pixels, threshold) {
        None => SliceClass::Empty,
        Some(bbox) if bbox.is_degenerate(min_region_size) => SliceClass::Degenerate,
        Some(bbox) => SliceClass::HasRegion(bbox),
    }
}

#[inline]
fn normalize_to_u8(value: u16, min: u16, max: u16) -> u8 {
    let range = f32::from(max) - f32::from(min) + RANGE_EPSILON;
    ((f32::from(value) - f32::from(min)) / range * 255.0) as u8
}

/// Crop `pixels` to `bbox` (inclusive on both ends) and rescale the crop to 8 bits
/// using its own minimum and maximum.
pub fn crop_normalized(pixels: ArrayView2<'_, u16>, bbox: &BoundingBox) -> Array2<u8> {
    let crop = pixels.slice(s![bbox.y_min..=bbox.y_max, bbox.x_min..=bbox.x_max]);
    let (min, max) = crop
        .iter()
        .fold((u16::MAX, u16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    crop.mapv(|v| normalize_to_u8(v, min, max))
}

/// Zero padding added on each side of a region to reach the codec block size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding {
    pub left: usize,
    pub right: usize,
    pub top: usize,
    pub bottom: usize,
}

impl Padding {
    /// Padding that grows a `height x width` region to the next multiples of `block_size`.
    pub fn for_region(height: usize, width: usize, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self::between(
            (height, width),
            (
                height.div_ceil(block_size) * block_size,
                width.div_ceil(block_size) * block_size,
            ),
        )
        .unwrap_or_default()
    }

    /// Padding that turns a region of size `region` into one of size `padded`.
    ///
    /// An odd leftover pixel goes to the trailing side. Returns `None` when the
    /// padded size is smaller than the region in either dimension.
    pub fn between(region: (usize, usize), padded: (usize, usize)) -> Option<Self> {
        let (top, bottom) = split_evenly(padded.0.checked_sub(region.0)?);
        let (left, right) = split_evenly(padded.1.checked_sub(region.1)?);
        Some(Self {
            left,
            right,
            top,
            bottom,
        })
    }
}

fn split_evenly(total: usize) -> (usize, usize) {
    let leading = total / 2;
    (leading, total - leading)
}

/// An 8-bit region padded to the codec block size.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedRegion {
    pub data: Array2<u8>,
    pub padding: Padding,
    /// `(height, width)` before padding
    pub region_size: (usize, usize),
}

impl PaddedRegion {
    /// `(height, width)` after padding
    pub fn padded_size(&self) -> (usize, usize) {
        self.data.dim()
    }
}

/// Place `region` in a zero canvas whose sides are multiples of `block_size`.
pub fn pad_to_block(region: ArrayView2<'_, u8>, block_size: usize) -> PaddedRegion {
    let (height, width) = region.dim();
    let padding = Padding::for_region(height, width, block_size);
    let mut data = Array2::<u8>::zeros((
        padding.top + height + padding.bottom,
        padding.left + width + padding.right,
    ));
    data.slice_mut(s![
        padding.top..padding.top + height,
        padding.left..padding.left + width
    ])
    .assign(&region);

    PaddedRegion {
        data,
        padding,
        region_size: (height, width),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn frame_with_block(size: usize, rows: std::ops::Range<usize>, cols: std::ops::Range<usize>) -> Array2<u16> {
        let mut frame = Array2::<u16>::zeros((size, size));
        frame.slice_mut(s![rows, cols]).fill(200);
        frame
    }

    #[test]
    fn detects_inclusive_bounding_box() {
        let frame = frame_with_block(10, 2..8, 2..8);
        let bbox = detect_region(frame.view(), 100.0).unwrap();
        assert_eq!(bbox, BoundingBox::new(2, 7, 2, 7));
        assert_eq!((bbox.width(), bbox.height()), (6, 6));
    }

    #[test]
    fn samples_equal_to_threshold_are_background() {
        let frame = Array2::<u16>::from_elem((4, 4), 100);
        assert_eq!(detect_region(frame.view(), 100.0), None);
        assert_eq!(classify(frame.view(), 100.0, 5), SliceClass::Empty);
    }

    #[test]
    fn degenerate_boundary_is_per_axis() {
        // span of exactly 5 on both axes
        let frame = frame_with_block(20, 3..9, 4..10);
        assert!(matches!(classify(frame.view(), 100.0, 5), SliceClass::HasRegion(_)));

        // span of 4 on x only
        let frame = frame_with_block(20, 3..9, 4..9);
        assert_eq!(classify(frame.view(), 100.0, 5), SliceClass::Degenerate);

        // span of 4 on y only
        let frame = frame_with_block(20, 3..8, 4..10);
        assert_eq!(classify(frame.view(), 100.0, 5), SliceClass::Degenerate);
    }

    #[test]
    fn single_pixel_is_degenerate() {
        let mut frame = Array2::<u16>::zeros((8, 8));
        frame[[4, 4]] = 900;
        assert_eq!(classify(frame.view(), 10.0, 5), SliceClass::Degenerate);
    }

    #[test]
    fn crop_rescales_to_full_byte_range() {
        let mut frame = Array2::<u16>::zeros((6, 6));
        frame[[1, 1]] = 1000;
        frame[[1, 2]] = 3000;
        frame[[2, 1]] = 2000;
        frame[[2, 2]] = 1000;
        let crop = crop_normalized(frame.view(), &BoundingBox::new(1, 2, 1, 2));
        assert_eq!(crop.dim(), (2, 2));
        assert_eq!(crop[[0, 0]], 0);
        assert_eq!(crop[[0, 1]], 255);
        assert_eq!(crop[[1, 0]], 127);
        assert_eq!(crop[[1, 1]], 0);
    }

    #[test]
    fn flat_crop_maps_to_zero() {
        let frame = Array2::<u16>::from_elem((5, 5), 700);
        let crop = crop_normalized(frame.view(), &BoundingBox::new(0, 4, 0, 4));
        assert!(crop.iter().all(|&v| v == 0));
    }

    #[test]
    fn padding_puts_odd_pixel_on_trailing_side() {
        let padding = Padding::for_region(100, 129, 128);
        assert_eq!(
            padding,
            Padding {
                left: 63,
                right: 64,
                top: 14,
                bottom: 14,
            }
        );
    }

    #[test]
    fn aligned_region_gets_no_padding() {
        assert_eq!(Padding::for_region(256, 128, 128), Padding::default());
        assert_eq!(Padding::between((10, 10), (9, 10)), None);
    }

    #[test]
    fn padded_region_keeps_content_at_offset() {
        let region = Array2::from_shape_fn((3, 5), |(r, c)| (r * 5 + c + 1) as u8);
        let padded = pad_to_block(region.view(), 4);
        assert_eq!(padded.padded_size(), (4, 8));
        assert_eq!(padded.region_size, (3, 5));
        let p = padded.padding;
        assert_eq!((p.top, p.bottom, p.left, p.right), (0, 1, 1, 2));
        assert_eq!(
            padded.data.slice(s![p.top..p.top + 3, p.left..p.left + 5]),
            region
        );
        assert_eq!(padded.data.iter().filter(|&&v| v == 0).count(), 32 - 15);
    }
}
