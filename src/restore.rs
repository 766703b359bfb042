//! Undo the crop and pad steps: strip the block padding from a reconstruction,
//! then embed the region in a zero canvas of the full frame at its bounding box.

use ndarray::{Array2, ArrayView2, s};
use thiserror::Error;

use crate::{
    container::CodecPayload,
    roi::{BoundingBox, Padding, crop_normalized},
};

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("Container padded size {padded:?} is smaller than its region {region:?}")]
    InvalidPadding {
        padded: (u32, u32),
        region: (u32, u32),
    },

    #[error("Fallback raster is {found:?}, frame is {expected:?}")]
    RasterSizeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
}

/// Map a reconstruction in `[0, 1]` back to 8-bit samples.
pub fn to_u8_samples(reconstructed: ArrayView2<'_, f32>) -> Array2<u8> {
    reconstructed.mapv(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
}

/// Cut the region back out of a padded reconstruction.
///
/// The codec may hand back a slightly different size than it was given, so the
/// result is clamped to what the reconstruction actually holds and can be
/// smaller than `region_size`.
pub fn unpad<'a>(
    reconstructed: ArrayView2<'a, u8>,
    padding: &Padding,
    region_size: (usize, usize),
) -> ArrayView2<'a, u8> {
    let (height, width) = reconstructed.dim();
    let top = padding.top.min(height);
    let left = padding.left.min(width);
    let rows = region_size.0.min(height - top);
    let columns = region_size.1.min(width - left);
    reconstructed.slice_move(s![top..top + rows, left..left + columns])
}

/// Zero canvas of `frame_size` (`(height, width)`) with `region` written at the
/// top-left corner of `bbox`. Without a box the canvas stays blank.
pub fn place(
    region: ArrayView2<'_, u8>,
    bbox: Option<&BoundingBox>,
    frame_size: (usize, usize),
) -> Array2<u8> {
    let mut canvas = Array2::<u8>::zeros(frame_size);
    let Some(bbox) = bbox else {
        return canvas;
    };
    if bbox.y_min >= frame_size.0 || bbox.x_min >= frame_size.1 {
        return canvas;
    }

    let rows = region.nrows().min(frame_size.0 - bbox.y_min);
    let columns = region.ncols().min(frame_size.1 - bbox.x_min);
    canvas
        .slice_mut(s![
            bbox.y_min..bbox.y_min + rows,
            bbox.x_min..bbox.x_min + columns
        ])
        .assign(&region.slice(s![..rows, ..columns]));
    canvas
}

/// Restore a full frame from a codec reconstruction and its container.
pub fn restore_from_payload(
    payload: &CodecPayload,
    reconstructed: ArrayView2<'_, f32>,
    bbox: &BoundingBox,
    frame_size: (usize, usize),
) -> Result<Array2<u8>, RestoreError> {
    let padding = payload.padding().ok_or(RestoreError::InvalidPadding {
        padded: payload.padded_size,
        region: payload.original_region,
    })?;
    let region_size = (
        payload.original_region.0 as usize,
        payload.original_region.1 as usize,
    );

    let samples = to_u8_samples(reconstructed);
    let region = unpad(samples.view(), &padding, region_size);
    Ok(place(region, Some(bbox), frame_size))
}

/// Restore a full frame from the original frame kept by the fallback path.
///
/// The raster goes through the same crop and rescale as a compressed region,
/// without padding or codec.
pub fn restore_from_raster(
    raster: ArrayView2<'_, u16>,
    bbox: &BoundingBox,
    frame_size: (usize, usize),
) -> Result<Array2<u8>, RestoreError> {
    if raster.dim() != frame_size || !bbox.fits_frame(frame_size.1, frame_size.0) {
        return Err(RestoreError::RasterSizeMismatch {
            expected: frame_size,
            found: raster.dim(),
        });
    }
    let region = crop_normalized(raster, bbox);
    Ok(place(region.view(), Some(bbox), frame_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::LatentShape,
        roi::{crop_normalized, pad_to_block},
    };
    use ndarray::Array2;

    fn frame() -> Array2<u16> {
        Array2::from_shape_fn((40, 50), |(r, c)| {
            if (7..=25).contains(&r) && (11..=42).contains(&c) {
                (200 + r * 13 + c * 5) as u16
            } else {
                0
            }
        })
    }

    #[test]
    fn crop_pad_unpad_place_is_exact() {
        let frame = frame();
        let bbox = BoundingBox::new(11, 42, 7, 25);
        let crop = crop_normalized(frame.view(), &bbox);
        let padded = pad_to_block(crop.view(), 16);

        let region = unpad(padded.data.view(), &padded.padding, padded.region_size);
        let canvas = place(region, Some(&bbox), frame.dim());

        assert_eq!(canvas.dim(), (40, 50));
        assert_eq!(canvas.slice(s![7..=25, 11..=42]), crop);
        // nothing outside the box
        let inside = crop.iter().map(|&v| v as usize).sum::<usize>();
        assert_eq!(canvas.iter().map(|&v| v as usize).sum::<usize>(), inside);
    }

    #[test]
    fn payload_restoration_matches_region() {
        let frame = frame();
        let bbox = BoundingBox::new(11, 42, 7, 25);
        let crop = crop_normalized(frame.view(), &bbox);
        let padded = pad_to_block(crop.view(), 16);
        let payload = CodecPayload::new(
            LatentShape::default(),
            padded.padded_size(),
            padded.region_size,
            Vec::new(),
        )
        .unwrap();
        let reconstructed = padded.data.mapv(|v| f32::from(v) / 255.0);

        let canvas = restore_from_payload(&payload, reconstructed.view(), &bbox, frame.dim()).unwrap();
        assert_eq!(canvas.slice(s![7..=25, 11..=42]), crop);
    }

    #[test]
    fn short_reconstruction_never_indexes_out_of_bounds() {
        let padding = Padding {
            left: 3,
            right: 3,
            top: 2,
            bottom: 2,
        };
        let reconstructed = Array2::<u8>::from_elem((8, 9), 9);
        let region = unpad(reconstructed.view(), &padding, (10, 10));
        assert_eq!(region.dim(), (6, 6));

        let region = unpad(reconstructed.view(), &Padding { top: 20, ..padding }, (4, 4));
        assert_eq!(region.dim(), (0, 4));
    }

    #[test]
    fn placement_is_clipped_to_frame() {
        let region = Array2::<u8>::from_elem((5, 5), 1);
        let canvas = place(region.view(), Some(&BoundingBox::new(7, 11, 8, 12)), (10, 10));
        assert_eq!(canvas.iter().filter(|&&v| v == 1).count(), 2 * 3);
    }

    #[test]
    fn no_box_restores_blank_canvas() {
        let region = Array2::<u8>::from_elem((5, 5), 1);
        let canvas = place(region.view(), None, (6, 8));
        assert_eq!(canvas, Array2::<u8>::zeros((6, 8)));
    }

    #[test]
    fn reconstruction_values_are_rounded_and_clamped() {
        let values = ndarray::array![[-0.2f32, 0.0, 0.5, 1.0, 1.3]];
        assert_eq!(to_u8_samples(values.view()), ndarray::array![[0u8, 0, 128, 255, 255]]);
    }

    #[test]
    fn raster_restoration_rescales_inside_box() {
        let frame = frame();
        let bbox = BoundingBox::new(11, 42, 7, 25);
        let canvas = restore_from_raster(frame.view(), &bbox, frame.dim()).unwrap();
        assert_eq!(canvas.slice(s![7..=25, 11..=42]), crop_normalized(frame.view(), &bbox));

        let err = restore_from_raster(frame.view(), &bbox, (40, 40)).unwrap_err();
        assert!(matches!(err, RestoreError::RasterSizeMismatch { .. }));
    }
}
