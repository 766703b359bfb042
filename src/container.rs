//! Binary container holding one slice's codec output.
//!
//! Every integer is a big-endian `u32`, written in this order:
//!
//! ```text
//! latent shape       2 x u32   (height, width reported by the codec)
//! padded size        2 x u32   (height, width fed to the codec)
//! original region    2 x u32   (height, width of the crop before padding)
//! segment count      1 x u32
//! segment            repeated: u32 length, then that many bytes
//! ```
//!
//! Every variable-length field is prefixed with its length, so a container can
//! be read front to back without knowing anything about the image it encodes.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Cursor, Read, Write},
    path::Path,
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::{codec::LatentShape, roi::Padding};

/// Size of the fixed part of a container: six dimensions plus the segment count
pub const HEADER_LEN: usize = 7 * 4;

const LENGTH_PREFIX_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Container ends inside the {field} field")]
    Truncated { field: &'static str },

    #[error("Container declares {count} segments but only {remaining} bytes remain")]
    SegmentCountOverrun { count: u32, remaining: usize },

    #[error("Segment {index} declares {length} bytes but only {remaining} remain")]
    SegmentOverrun {
        index: u32,
        length: u32,
        remaining: usize,
    },

    #[error("Container has {0} unexpected bytes after the last segment")]
    TrailingBytes(usize),

    #[error("Padded size {padded:?} is smaller than region size {region:?}")]
    InvalidPadding {
        padded: (u32, u32),
        region: (u32, u32),
    },

    #[error("Dimension {0} does not fit in 32 bits")]
    DimensionOverflow(usize),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ContainerError {
    /// Whether the error comes from malformed content rather than the filesystem.
    pub fn is_corrupt(&self) -> bool {
        !matches!(self, ContainerError::Io(_) | ContainerError::DimensionOverflow(_))
    }
}

/// Codec output plus the geometry needed to undo the block padding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodecPayload {
    pub latent_shape: LatentShape,
    /// `(height, width)` of the padded region handed to the codec
    pub padded_size: (u32, u32),
    /// `(height, width)` of the crop before padding
    pub original_region: (u32, u32),
    pub strings: Vec<Vec<u8>>,
}

impl CodecPayload {
    pub fn new(
        latent_shape: LatentShape,
        padded_size: (usize, usize),
        original_region: (usize, usize),
        strings: Vec<Vec<u8>>,
    ) -> Result<Self, ContainerError> {
        Ok(Self {
            latent_shape,
            padded_size: (to_u32(padded_size.0)?, to_u32(padded_size.1)?),
            original_region: (to_u32(original_region.0)?, to_u32(original_region.1)?),
            strings,
        })
    }

    /// Padding between the original region and the padded size, split the same
    /// way it was applied before compression.
    pub fn padding(&self) -> Option<Padding> {
        Padding::between(
            (
                self.original_region.0 as usize,
                self.original_region.1 as usize,
            ),
            (self.padded_size.0 as usize, self.padded_size.1 as usize),
        )
    }

    /// Total number of bytes [`CodecPayload::write_to`] produces.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN
            + self
                .strings
                .iter()
                .map(|s| LENGTH_PREFIX_LEN + s.len())
                .sum::<usize>()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), ContainerError> {
        for value in [
            self.latent_shape.height,
            self.latent_shape.width,
            self.padded_size.0,
            self.padded_size.1,
            self.original_region.0,
            self.original_region.1,
            to_u32(self.strings.len())?,
        ] {
            writer.write_u32::<BigEndian>(value)?;
        }

        for segment in &self.strings {
            writer.write_u32::<BigEndian>(to_u32(segment.len())?)?;
            writer.write_all(segment)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ContainerError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Parse a container from its complete byte content.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ContainerError> {
        let mut cursor = Cursor::new(bytes);

        let latent_shape = LatentShape::new(
            read_field(&mut cursor, "latent height")?,
            read_field(&mut cursor, "latent width")?,
        );
        let padded_size = (
            read_field(&mut cursor, "padded height")?,
            read_field(&mut cursor, "padded width")?,
        );
        let original_region = (
            read_field(&mut cursor, "region height")?,
            read_field(&mut cursor, "region width")?,
        );
        if padded_size.0 < original_region.0 || padded_size.1 < original_region.1 {
            return Err(ContainerError::InvalidPadding {
                padded: padded_size,
                region: original_region,
            });
        }

        let count = read_field(&mut cursor, "segment count")?;
        let remaining = bytes_left(&cursor);
        if (count as usize).saturating_mul(LENGTH_PREFIX_LEN) > remaining {
            return Err(ContainerError::SegmentCountOverrun { count, remaining });
        }

        let mut strings = Vec::with_capacity(count as usize);
        for index in 0..count {
            let length = read_field(&mut cursor, "segment length")?;
            let remaining = bytes_left(&cursor);
            if length as usize > remaining {
                return Err(ContainerError::SegmentOverrun {
                    index,
                    length,
                    remaining,
                });
            }
            let mut segment = vec![0u8; length as usize];
            cursor.read_exact(&mut segment)?;
            strings.push(segment);
        }

        match bytes_left(&cursor) {
            0 => Ok(Self {
                latent_shape,
                padded_size,
                original_region,
                strings,
            }),
            extra => Err(ContainerError::TrailingBytes(extra)),
        }
    }
}

/// Write `payload` to a new file at `path`.
pub fn write_container(path: impl AsRef<Path>, payload: &CodecPayload) -> Result<(), ContainerError> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    payload.write_to(&mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Read and parse the container at `path`.
pub fn read_container(path: impl AsRef<Path>) -> Result<CodecPayload, ContainerError> {
    CodecPayload::from_bytes(&fs::read(path.as_ref())?)
}

fn to_u32(value: usize) -> Result<u32, ContainerError> {
    u32::try_from(value).map_err(|_| ContainerError::DimensionOverflow(value))
}

fn bytes_left(cursor: &Cursor<&[u8]>) -> usize {
    cursor.get_ref().len().saturating_sub(cursor.position() as usize)
}

fn read_field(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<u32, ContainerError> {
    cursor
        .read_u32::<BigEndian>()
        .map_err(|_| ContainerError::Truncated { field })
}
