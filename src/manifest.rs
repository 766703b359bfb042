//! `bounding_boxes.txt`: slice count, frame size and one bounding box per
//! slice that carries a region.
//!
//! ```text
//! <slice count> <frame width> <frame height>
//! <slice index> <x min> <x max> <y min> <y max>
//! ...
//! ```

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::Path,
};

use thiserror::Error;

use crate::roi::BoundingBox;

pub const MANIFEST_FILE_NAME: &str = "bounding_boxes.txt";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Manifest is empty")]
    Empty,

    #[error("Malformed manifest line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Frame size and bounding boxes of an encoded series.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SeriesManifest {
    pub slice_count: usize,
    pub frame_width: usize,
    pub frame_height: usize,
    /// Smallest `max - min` span a box may have on each axis
    pub min_region_size: usize,
    boxes: BTreeMap<usize, BoundingBox>,
}

impl SeriesManifest {
    pub fn new(
        slice_count: usize,
        frame_width: usize,
        frame_height: usize,
        min_region_size: usize,
    ) -> Self {
        Self {
            slice_count,
            frame_width,
            frame_height,
            min_region_size,
            boxes: BTreeMap::new(),
        }
    }

    /// Bounding box of slice `index`, if it carried a region
    pub fn bounding_box(&self, index: usize) -> Option<&BoundingBox> {
        self.boxes.get(&index)
    }

    pub fn boxes(&self) -> impl Iterator<Item = (usize, &BoundingBox)> {
        self.boxes.iter().map(|(&index, bbox)| (index, bbox))
    }

    pub fn read(path: impl AsRef<Path>, min_region_size: usize) -> Result<Self, ManifestError> {
        Self::parse(&fs::read_to_string(path.as_ref())?, min_region_size)
    }

    /// Parse manifest text, rejecting boxes smaller than `min_region_size`.
    pub fn parse(text: &str, min_region_size: usize) -> Result<Self, ManifestError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty());

        let (line, header) = lines.next().ok_or(ManifestError::Empty)?;
        let [slice_count, frame_width, frame_height] = parse_fields::<3>(line, header)?;
        let mut manifest = Self::new(slice_count, frame_width, frame_height, min_region_size);

        for (line, content) in lines {
            let [index, x_min, x_max, y_min, y_max] = parse_fields::<5>(line, content)?;
            let bbox = BoundingBox::new(x_min, x_max, y_min, y_max);
            manifest
                .insert(index, bbox)
                .map_err(|reason| ManifestError::Malformed { line, reason })?;
        }

        Ok(manifest)
    }

    fn insert(&mut self, index: usize, bbox: BoundingBox) -> Result<(), String> {
        if index >= self.slice_count {
            return Err(format!(
                "slice index {index} outside series of {} slices",
                self.slice_count
            ));
        }
        if !bbox.fits_frame(self.frame_width, self.frame_height) {
            return Err(format!(
                "box {bbox:?} does not fit a {}x{} frame",
                self.frame_width, self.frame_height
            ));
        }
        if bbox.is_degenerate(self.min_region_size) {
            return Err(format!(
                "box {bbox:?} spans less than {} pixels",
                self.min_region_size
            ));
        }
        if self.boxes.insert(index, bbox).is_some() {
            return Err(format!("slice index {index} listed twice"));
        }
        Ok(())
    }
}

fn parse_fields<const N: usize>(line: usize, content: &str) -> Result<[usize; N], ManifestError> {
    let malformed = |reason: String| ManifestError::Malformed { line, reason };

    let values = content
        .split_whitespace()
        .map(|field| {
            field
                .parse::<usize>()
                .map_err(|e| malformed(format!("'{field}': {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let found = values.len();

    values
        .try_into()
        .map_err(|_| malformed(format!("expected {N} fields, found {found}")))
}

/// Appends manifest lines as slices are processed.
///
/// The header is written on creation; each call to [`ManifestWriter::append`]
/// adds one line and flushes it, so an interrupted run leaves a readable prefix.
pub struct ManifestWriter {
    writer: BufWriter<File>,
    manifest: SeriesManifest,
}

impl ManifestWriter {
    pub fn create(
        path: impl AsRef<Path>,
        slice_count: usize,
        frame_width: usize,
        frame_height: usize,
        min_region_size: usize,
    ) -> Result<Self, ManifestError> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        writeln!(writer, "{slice_count} {frame_width} {frame_height}")?;
        writer.flush()?;

        Ok(Self {
            writer,
            manifest: SeriesManifest::new(slice_count, frame_width, frame_height, min_region_size),
        })
    }

    pub fn append(&mut self, index: usize, bbox: &BoundingBox) -> Result<(), ManifestError> {
        self.manifest
            .insert(index, *bbox)
            .map_err(|reason| ManifestError::Malformed {
                line: self.manifest.boxes.len() + 2,
                reason,
            })?;
        writeln!(
            self.writer,
            "{index} {} {} {} {}",
            bbox.x_min, bbox.x_max, bbox.y_min, bbox.y_max
        )?;
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and return the manifest as written so far.
    pub fn finish(mut self) -> Result<SeriesManifest, ManifestError> {
        self.writer.flush()?;
        Ok(self.manifest)
    }
}
