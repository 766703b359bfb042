use crate::{
    record::{RawRecord, RecordError, instance_number},
    series::{Series, Slice, file_stem},
};

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SeriesLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions: {file} is {found:?}, expected {expected:?}")]
    InconsistentDimensions {
        file: String,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("{first} and {second} would be stored under the same name")]
    DuplicateStem { first: String, second: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("DICOM error: {0}")]
    Record(#[from] RecordError),
}

pub struct SeriesLoader;

impl SeriesLoader {
    /// Build an ordered series from already opened records.
    ///
    /// # Arguments
    ///
    /// * `records` - `(file name, record)` pairs in discovery order
    ///
    /// # Errors
    ///
    /// Returns error if `records` is empty, two file names share a stem, a
    /// frame cannot be decoded, or the frames do not all share the same
    /// dimensions
    pub fn load_from_records(records: Vec<(String, RawRecord)>) -> Result<Series, SeriesLoaderError> {
        if records.is_empty() {
            return Err(SeriesLoaderError::NoValidImages);
        }
        Self::validate_stems(records.iter().map(|(file_name, _)| file_name.as_str()))?;

        let mut slices = records
            .into_iter()
            .map(|(file_name, record)| Self::extract_slice(file_name, record))
            .collect::<Result<Vec<_>, _>>()?;

        Self::sort_slices(&mut slices);
        Self::validate_dimensions(&slices)?;

        Ok(Series::new(slices))
    }

    /// Load a series from file paths
    pub fn load_from_file_paths(paths: &[impl AsRef<Path>]) -> Result<Series, SeriesLoaderError> {
        let records = paths
            .iter()
            .map(|path| {
                let path = path.as_ref();
                RawRecord::open(path).map(|record| (file_name(path), record))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::load_from_records(records)
    }

    /// Load a series from a directory containing .dcm files
    pub fn load_from_directory(path: impl AsRef<Path>) -> Result<Series, SeriesLoaderError> {
        let paths = Self::list_dicom_files(path)?;

        if paths.is_empty() {
            return Err(SeriesLoaderError::NoValidImages);
        }

        Self::load_from_file_paths(&paths)
    }

    /// All `.dcm` files directly inside `path`, sorted by file name.
    pub fn list_dicom_files(path: impl AsRef<Path>) -> Result<Vec<PathBuf>, io::Error> {
        let mut paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|s| s.to_str())
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Stable sort by ordering key, so equal keys keep discovery order.
    pub fn sort_by_ordering_key<T>(items: &mut [(i32, T)]) {
        items.sort_by_key(|(key, _)| *key);
    }

    fn extract_slice(file_name: String, record: RawRecord) -> Result<Slice, SeriesLoaderError> {
        let ordering_key = Self::get_ordering_key(&record);
        let pixels = record.decode_frame()?;
        debug!(file = %file_name, ordering_key, dim = ?pixels.dim(), "read slice");
        Ok(Slice {
            file_name,
            ordering_key,
            pixels,
            record,
        })
    }

    fn get_ordering_key(record: &RawRecord) -> i32 {
        instance_number(record.object()).unwrap_or(0)
    }

    fn sort_slices(slices: &mut [Slice]) {
        slices.sort_by_key(|slice| slice.ordering_key);
    }

    fn validate_stems<'a>(file_names: impl Iterator<Item = &'a str>) -> Result<(), SeriesLoaderError> {
        let mut seen = HashMap::new();
        for file_name in file_names {
            if let Some(first) = seen.insert(file_stem(file_name), file_name) {
                return Err(SeriesLoaderError::DuplicateStem {
                    first: first.to_string(),
                    second: file_name.to_string(),
                });
            }
        }
        Ok(())
    }

    fn validate_dimensions(slices: &[Slice]) -> Result<(), SeriesLoaderError> {
        let expected = slices[0].pixels.dim();
        match slices.iter().find(|slice| slice.pixels.dim() != expected) {
            Some(slice) => Err(SeriesLoaderError::InconsistentDimensions {
                file: slice.file_name.clone(),
                expected,
                found: slice.pixels.dim(),
            }),
            None => Ok(()),
        }
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
