//! Lossless copy of a slice's original frame, used when the codec fails on it.

use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use image::{ImageBuffer, ImageError, Luma, codecs::webp::WebPEncoder};
use ndarray::{Array2, ArrayView2};
use thiserror::Error;

use crate::enums::RasterFormat;

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("Frame of {height}x{width} cannot be stored as an image")]
    InvalidFrame { height: usize, width: usize },

    #[error("{0} is not a fallback raster")]
    UnknownFormat(PathBuf),

    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pick the smallest lossless format that holds every sample of `frame`.
pub fn raster_format_for(frame: ArrayView2<'_, u16>) -> RasterFormat {
    if frame.iter().all(|&v| v <= u16::from(u8::MAX)) {
        RasterFormat::WebP
    } else {
        RasterFormat::Png16
    }
}

/// Write `frame` to `dir/<stem>.<ext>` and return the path and format used.
pub fn write_raster(
    dir: impl AsRef<Path>,
    stem: &str,
    frame: ArrayView2<'_, u16>,
) -> Result<(PathBuf, RasterFormat), FallbackError> {
    let format = raster_format_for(frame);
    let path = dir
        .as_ref()
        .join(format!("{stem}.{}", format.extension()));
    let (height, width) = frame.dim();
    let invalid = || FallbackError::InvalidFrame { height, width };
    let (h, w) = (
        u32::try_from(height).map_err(|_| invalid())?,
        u32::try_from(width).map_err(|_| invalid())?,
    );

    match format {
        RasterFormat::WebP => {
            let samples: Vec<u8> = frame.iter().map(|&v| v as u8).collect();
            let image = ImageBuffer::<Luma<u8>, _>::from_raw(w, h, samples).ok_or_else(invalid)?;
            let writer = BufWriter::new(File::create(&path)?);
            image.write_with_encoder(WebPEncoder::new_lossless(writer))?;
        }
        RasterFormat::Png16 => {
            let samples: Vec<u16> = frame.iter().copied().collect();
            let image = ImageBuffer::<Luma<u16>, _>::from_raw(w, h, samples).ok_or_else(invalid)?;
            image.save(&path)?;
        }
    }

    Ok((path, format))
}

/// Read a raster written by [`write_raster`] back to its original samples.
pub fn read_raster(path: impl AsRef<Path>) -> Result<Array2<u16>, FallbackError> {
    let path = path.as_ref();
    let format =
        RasterFormat::from_path(path).ok_or_else(|| FallbackError::UnknownFormat(path.into()))?;
    let image = image::open(path)?;

    let (width, height, samples) = match format {
        // grayscale WebP decodes as RGB with equal channels
        RasterFormat::WebP => {
            let rgb = image.into_rgb8();
            let (w, h) = rgb.dimensions();
            (w, h, rgb.pixels().map(|p| u16::from(p.0[0])).collect())
        }
        RasterFormat::Png16 => {
            let luma = image.into_luma16();
            let (w, h) = luma.dimensions();
            (w, h, luma.into_raw())
        }
    };

    Array2::from_shape_vec((height as usize, width as usize), samples).map_err(|_| {
        FallbackError::InvalidFrame {
            height: height as usize,
            width: width as usize,
        }
    })
}
