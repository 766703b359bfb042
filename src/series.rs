use std::path::Path;

use ndarray::{Array2, ArrayView2};

use crate::record::RawRecord;

/// One frame of a series together with the record it was read from.
#[derive(Debug, Clone)]
pub struct Slice {
    /// File name the slice was read from, reused for every artifact derived from it
    pub file_name: String,
    pub ordering_key: i32,
    pub pixels: Array2<u16>,
    pub record: RawRecord,
}

impl Slice {
    /// File name without its extension
    pub fn stem(&self) -> &str {
        file_stem(&self.file_name)
    }
}

/// Name under which the containers and rasters of a slice are stored.
pub(crate) fn file_stem(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
}

/// Slices sorted by ordering key, all sharing one frame size.
#[derive(Debug, Clone, Default)]
pub struct Series {
    slices: Vec<Slice>,
}

impl Series {
    pub(crate) fn new(slices: Vec<Slice>) -> Self {
        Self { slices }
    }

    /// Get the dimensions of the series (slices, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        let (height, width) = self.frame_size();
        (self.slices.len(), height, width)
    }

    /// `(height, width)` shared by every frame
    pub fn frame_size(&self) -> (usize, usize) {
        self.slices
            .first()
            .map(|slice| slice.pixels.dim())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn frames(&self) -> impl Iterator<Item = ArrayView2<'_, u16>> {
        self.slices.iter().map(|slice| slice.pixels.view())
    }

    pub fn into_slices(self) -> Vec<Slice> {
        self.slices
    }
}
