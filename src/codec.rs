use std::io::{Read, Write};

use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};
use ndarray::{Array2, ArrayView2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Region of {height}x{width} is not aligned to the codec block size {block_size}")]
    Unaligned {
        height: usize,
        width: usize,
        block_size: usize,
    },

    #[error("Codec expected {expected} segments, got {actual}")]
    SegmentCount { expected: usize, actual: usize },

    #[error("Decoded {actual} samples, latent shape requires {expected}")]
    SampleCount { expected: usize, actual: usize },

    #[error("Codec failure: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shape reported by the codec for its compressed representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatentShape {
    pub height: u32,
    pub width: u32,
}

impl LatentShape {
    pub fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }
}

/// Output of [`ImageCodec::compress`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompressedRegion {
    pub shape: LatentShape,
    pub strings: Vec<Vec<u8>>,
}

/// Learned (or any other) image codec that the pipeline treats as a black box.
///
/// `compress` receives an 8-bit single channel region whose sides are multiples
/// of the codec block size. `decompress` returns the reconstruction as floats in
/// `[0, 1]`; its size may differ slightly from what was compressed.
pub trait ImageCodec {
    fn compress(&self, region: ArrayView2<'_, u8>) -> Result<CompressedRegion, CodecError>;

    fn decompress(&self, strings: &[Vec<u8>], shape: LatentShape)
    -> Result<Array2<f32>, CodecError>;
}

/// Lossless stand-in for a learned codec.
///
/// Stores the padded region as a single zlib stream; the latent shape is the
/// padded `(height, width)` itself.
#[derive(Debug, Clone, Copy)]
pub struct DeflateCodec {
    pub block_size: usize,
    pub level: u32,
}

impl Default for DeflateCodec {
    fn default() -> Self {
        Self {
            block_size: 128,
            level: 6,
        }
    }
}

impl DeflateCodec {
    pub fn new(block_size: usize, level: u32) -> Self {
        Self {
            block_size,
            level: level.min(9),
        }
    }
}

impl ImageCodec for DeflateCodec {
    fn compress(&self, region: ArrayView2<'_, u8>) -> Result<CompressedRegion, CodecError> {
        let (height, width) = region.dim();
        let block_size = self.block_size.max(1);
        if height % block_size != 0 || width % block_size != 0 {
            return Err(CodecError::Unaligned {
                height,
                width,
                block_size,
            });
        }
        let to_u32 = |v: usize| u32::try_from(v).map_err(|e| CodecError::Backend(e.to_string()));

        let samples: Vec<u8> = region.iter().copied().collect();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(self.level));
        encoder.write_all(&samples)?;

        Ok(CompressedRegion {
            shape: LatentShape::new(to_u32(height)?, to_u32(width)?),
            strings: vec![encoder.finish()?],
        })
    }

    fn decompress(
        &self,
        strings: &[Vec<u8>],
        shape: LatentShape,
    ) -> Result<Array2<f32>, CodecError> {
        let [stream] = strings else {
            return Err(CodecError::SegmentCount {
                expected: 1,
                actual: strings.len(),
            });
        };
        let (height, width) = (shape.height as usize, shape.width as usize);
        let expected = height
            .checked_mul(width)
            .ok_or_else(|| CodecError::Backend(format!("latent shape {height}x{width} overflows")))?;

        // the shape is untrusted: read at most one sample past it
        let mut samples = Vec::new();
        ZlibDecoder::new(stream.as_slice())
            .take((expected as u64).saturating_add(1))
            .read_to_end(&mut samples)?;
        if samples.len() != expected {
            return Err(CodecError::SampleCount {
                expected,
                actual: samples.len(),
            });
        }

        Array2::from_shape_vec((height, width), samples)
            .map(|a| a.mapv(|v| f32::from(v) / 255.0))
            .map_err(|e| CodecError::Backend(e.to_string()))
    }
}
