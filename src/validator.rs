//! Read-only comparison of key attributes between an original series and its
//! restored counterpart.

use std::{collections::BTreeMap, fmt, io, path::Path};

use dicom::{core::Tag, object::InMemDicomObject};
use dicom_dictionary_std::tags;
use thiserror::Error;
use tracing::warn;

use crate::{
    record::{DicomFile, RecordError, instance_number, open_header},
    series_loader::{SeriesLoader, file_name},
};

/// Attributes that must survive a round trip unchanged.
pub const COMPARED_ATTRIBUTES: [(&str, Tag); 16] = [
    ("PatientID", tags::PATIENT_ID),
    ("PatientName", tags::PATIENT_NAME),
    ("StudyInstanceUID", tags::STUDY_INSTANCE_UID),
    ("StudyDate", tags::STUDY_DATE),
    ("StudyTime", tags::STUDY_TIME),
    ("Modality", tags::MODALITY),
    ("SeriesInstanceUID", tags::SERIES_INSTANCE_UID),
    ("SeriesNumber", tags::SERIES_NUMBER),
    ("InstanceNumber", tags::INSTANCE_NUMBER),
    ("SOPInstanceUID", tags::SOP_INSTANCE_UID),
    ("SOPClassUID", tags::SOP_CLASS_UID),
    ("Manufacturer", tags::MANUFACTURER),
    ("Rows", tags::ROWS),
    ("Columns", tags::COLUMNS),
    ("SamplesPerPixel", tags::SAMPLES_PER_PIXEL),
    ("PhotometricInterpretation", tags::PHOTOMETRIC_INTERPRETATION),
];

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("DICOM error: {0}")]
    Record(#[from] RecordError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMismatch {
    pub keyword: &'static str,
    /// `None` when the attribute is absent
    pub original: Option<String>,
    pub restored: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceComparison {
    pub ordering_key: i32,
    pub original_file: String,
    pub restored_file: String,
    pub mismatches: Vec<AttributeMismatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub original_count: usize,
    pub restored_count: usize,
    pub slices: Vec<SliceComparison>,
    /// Files whose ordering key has no counterpart on the other side
    pub unpaired_original: Vec<String>,
    pub unpaired_restored: Vec<String>,
}

impl ValidationReport {
    pub fn mismatch_count(&self) -> usize {
        self.slices.iter().map(|s| s.mismatches.len()).sum()
    }

    pub fn is_consistent(&self) -> bool {
        self.original_count == self.restored_count
            && self.unpaired_original.is_empty()
            && self.unpaired_restored.is_empty()
            && self.mismatch_count() == 0
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.original_count != self.restored_count {
            writeln!(
                f,
                "slice count differs: original {}, restored {}",
                self.original_count, self.restored_count
            )?;
        }
        for name in &self.unpaired_original {
            writeln!(f, "no restored counterpart for {name}")?;
        }
        for name in &self.unpaired_restored {
            writeln!(f, "no original counterpart for {name}")?;
        }
        for slice in self.slices.iter().filter(|s| !s.mismatches.is_empty()) {
            writeln!(
                f,
                "{} <-> {} (key {}):",
                slice.original_file, slice.restored_file, slice.ordering_key
            )?;
            for m in &slice.mismatches {
                writeln!(
                    f,
                    "  {}: original {}, restored {}",
                    m.keyword,
                    m.original.as_deref().unwrap_or("<absent>"),
                    m.restored.as_deref().unwrap_or("<absent>")
                )?;
            }
        }
        if self.is_consistent() {
            write!(f, "PASS: {} slices consistent", self.slices.len())
        } else {
            write!(
                f,
                "FAIL: {} attribute mismatches over {} paired slices",
                self.mismatch_count(),
                self.slices.len()
            )
        }
    }
}

fn attribute_value(object: &InMemDicomObject, tag: Tag) -> Option<String> {
    let element = object.element(tag).ok()?;
    Some(match element.to_str() {
        Ok(value) => value.trim_end_matches('\0').trim().to_string(),
        Err(_) => "<unreadable>".to_string(),
    })
}

/// Compare every attribute of [`COMPARED_ATTRIBUTES`] between two records.
///
/// An attribute missing on both sides counts as equal.
pub fn compare_records(
    original: &InMemDicomObject,
    restored: &InMemDicomObject,
) -> Vec<AttributeMismatch> {
    COMPARED_ATTRIBUTES
        .iter()
        .filter_map(|&(keyword, tag)| {
            let original = attribute_value(original, tag);
            let restored = attribute_value(restored, tag);
            (original != restored).then_some(AttributeMismatch {
                keyword,
                original,
                restored,
            })
        })
        .collect()
}

type KeyedRecords = BTreeMap<i32, Vec<(String, DicomFile)>>;

fn read_keyed(dir: &Path) -> Result<(usize, KeyedRecords), ValidatorError> {
    let paths = SeriesLoader::list_dicom_files(dir)?;
    let mut keyed = KeyedRecords::new();
    for path in &paths {
        let object = open_header(path)?;
        let key = instance_number(&object).unwrap_or(0);
        keyed.entry(key).or_default().push((file_name(path), object));
    }
    Ok((paths.len(), keyed))
}

/// Pair the slices of two series by ordering key and compare their attributes.
pub fn validate_series(
    original_dir: impl AsRef<Path>,
    restored_dir: impl AsRef<Path>,
) -> Result<ValidationReport, ValidatorError> {
    let (original_count, original) = read_keyed(original_dir.as_ref())?;
    let (restored_count, mut restored) = read_keyed(restored_dir.as_ref())?;

    let mut report = ValidationReport {
        original_count,
        restored_count,
        ..Default::default()
    };

    for (key, originals) in original {
        let mut counterparts = restored.remove(&key).unwrap_or_default().into_iter();
        for (original_file, original_object) in originals {
            let Some((restored_file, restored_object)) = counterparts.next() else {
                report.unpaired_original.push(original_file);
                continue;
            };
            let mismatches = compare_records(&original_object, &restored_object);
            for m in &mismatches {
                warn!(
                    original = %original_file,
                    restored = %restored_file,
                    attribute = m.keyword,
                    "attribute mismatch"
                );
            }
            report.slices.push(SliceComparison {
                ordering_key: key,
                original_file,
                restored_file,
                mismatches,
            });
        }
        report
            .unpaired_restored
            .extend(counterparts.map(|(name, _)| name));
    }
    report
        .unpaired_restored
        .extend(restored.into_values().flatten().map(|(name, _)| name));

    Ok(report)
}
