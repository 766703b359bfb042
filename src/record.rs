//! DICOM records moving through the pipeline.
//!
//! A record goes through three stages, each consuming the previous one:
//! [`RawRecord`] (as read from the input series), [`MetadataOnlyRecord`]
//! (pixel data removed, persisted at encode time) and [`RestoredRecord`]
//! (restored 8-bit pixels attached, written at decode time).

use std::path::{Path, PathBuf};

use dicom::{
    core::{DataElement, PrimitiveValue, VR},
    object::{
        FileDicomObject, FileMetaTableBuilder, InMemDicomObject, OpenFileOptions, ReadError,
        WithMetaError, WriteError, open_file,
    },
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::{tags, uids};
use ndarray::{Array2, ArrayView2, s};
use thiserror::Error;

pub type DicomFile = FileDicomObject<InMemDicomObject>;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: ReadError,
    },

    #[error("Failed to decode pixel data: {0}")]
    PixelData(#[from] dicom::pixeldata::Error),

    #[error("Restored canvas of {height}x{width} does not fit in Rows/Columns")]
    CanvasTooLarge { height: usize, width: usize },

    #[error("Failed to build file meta group: {0}")]
    Meta(#[from] WithMetaError),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: WriteError,
    },
}

/// Instance number of a record, used to order slices within a series.
pub fn instance_number(object: &InMemDicomObject) -> Option<i32> {
    object
        .element(tags::INSTANCE_NUMBER)
        .ok()?
        .to_int::<i32>()
        .ok()
}

fn read(path: &Path) -> Result<DicomFile, RecordError> {
    open_file(path).map_err(|source| RecordError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn write(object: &DicomFile, path: &Path) -> Result<(), RecordError> {
    object
        .write_to_file(path)
        .map_err(|source| RecordError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// Read a record without its pixel data.
pub fn open_header(path: impl AsRef<Path>) -> Result<DicomFile, RecordError> {
    let path = path.as_ref();
    OpenFileOptions::new()
        .read_until(tags::PIXEL_DATA)
        .open_file(path)
        .map_err(|source| RecordError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// A record as found in the input series, pixel data included.
#[derive(Debug, Clone)]
pub struct RawRecord {
    object: DicomFile,
}

impl RawRecord {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        read(path.as_ref()).map(Self::from_object)
    }

    pub fn from_object(object: DicomFile) -> Self {
        Self { object }
    }

    pub fn object(&self) -> &DicomFile {
        &self.object
    }

    /// Raw stored samples of the first frame and first sample, with no LUT applied.
    pub fn decode_frame(&self) -> Result<Array2<u16>, RecordError> {
        let pixel_data = self.object.decode_pixel_data()?;
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::None)
            .with_voi_lut(VoiLutOption::Identity);
        let samples = pixel_data.to_ndarray_with_options::<u16>(&options)?;
        Ok(samples.slice_move(s![0, .., .., 0]))
    }

    /// Drop the pixel data, keeping every other attribute.
    pub fn strip_pixel_data(self) -> MetadataOnlyRecord {
        let mut object = self.object;
        object.remove_element(tags::PIXEL_DATA);
        MetadataOnlyRecord { object }
    }
}

/// A record whose pixel data has been removed.
#[derive(Debug, Clone)]
pub struct MetadataOnlyRecord {
    object: DicomFile,
}

impl MetadataOnlyRecord {
    /// Open a record previously written by [`MetadataOnlyRecord::write`].
    ///
    /// Any pixel data found in the file is discarded.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        read(path.as_ref()).map(|object| RawRecord { object }.strip_pixel_data())
    }

    pub fn object(&self) -> &DicomFile {
        &self.object
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), RecordError> {
        write(&self.object, path.as_ref())
    }

    /// Attach an 8-bit grayscale canvas as the record's pixel data.
    ///
    /// The pixel module is rewritten for unsigned 8-bit MONOCHROME2 samples
    /// stored as OB, and the file meta group is rebuilt for Explicit VR Little
    /// Endian.
    pub fn restore(self, canvas: ArrayView2<'_, u8>) -> Result<RestoredRecord, RecordError> {
        let (height, width) = canvas.dim();
        let too_large = || RecordError::CanvasTooLarge { height, width };
        let rows = u16::try_from(height).map_err(|_| too_large())?;
        let columns = u16::try_from(width).map_err(|_| too_large())?;

        let mut object = self.object.into_inner();
        let us = |tag, value: u16| DataElement::new(tag, VR::US, PrimitiveValue::from(value));
        for element in [
            us(tags::ROWS, rows),
            us(tags::COLUMNS, columns),
            us(tags::BITS_ALLOCATED, 8),
            us(tags::BITS_STORED, 8),
            us(tags::HIGH_BIT, 7),
            us(tags::SAMPLES_PER_PIXEL, 1),
            us(tags::PIXEL_REPRESENTATION, 0),
            DataElement::new(
                tags::PHOTOMETRIC_INTERPRETATION,
                VR::CS,
                PrimitiveValue::from("MONOCHROME2"),
            ),
            DataElement::new(
                tags::PIXEL_DATA,
                VR::OB,
                PrimitiveValue::from(canvas.iter().copied().collect::<Vec<u8>>()),
            ),
        ] {
            object.put(element);
        }

        let object = object.with_meta(
            FileMetaTableBuilder::new().transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN),
        )?;
        Ok(RestoredRecord { object })
    }
}

/// A record carrying restored pixel data, ready to be written.
#[derive(Debug, Clone)]
pub struct RestoredRecord {
    object: DicomFile,
}

impl RestoredRecord {
    pub fn object(&self) -> &DicomFile {
        &self.object
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), RecordError> {
        write(&self.object, path.as_ref())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::Array2;

    /// Minimal 16-bit MR slice with the given pixel samples.
    pub(crate) fn synthetic_slice(instance: Option<i32>, pixels: &Array2<u16>) -> DicomFile {
        let (rows, columns) = pixels.dim();
        let us = |tag, value: u16| DataElement::new(tag, VR::US, PrimitiveValue::from(value));
        let uid = format!("1.2.826.0.1.3680043.2.1125.{}", instance.unwrap_or(0));

        let mut object = InMemDicomObject::from_element_iter([
            DataElement::new(
                tags::SOP_CLASS_UID,
                VR::UI,
                PrimitiveValue::from(uids::MR_IMAGE_STORAGE),
            ),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(uid)),
            DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("MR")),
            DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("ANON01")),
            us(tags::SAMPLES_PER_PIXEL, 1),
            DataElement::new(
                tags::PHOTOMETRIC_INTERPRETATION,
                VR::CS,
                PrimitiveValue::from("MONOCHROME2"),
            ),
            us(tags::ROWS, rows as u16),
            us(tags::COLUMNS, columns as u16),
            us(tags::BITS_ALLOCATED, 16),
            us(tags::BITS_STORED, 16),
            us(tags::HIGH_BIT, 15),
            us(tags::PIXEL_REPRESENTATION, 0),
            DataElement::new(
                tags::PIXEL_DATA,
                VR::OW,
                PrimitiveValue::U16(pixels.iter().copied().collect()),
            ),
        ]);
        if let Some(n) = instance {
            object.put(DataElement::new(
                tags::INSTANCE_NUMBER,
                VR::IS,
                PrimitiveValue::from(n.to_string()),
            ));
        }

        object
            .with_meta(
                FileMetaTableBuilder::new().transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN),
            )
            .unwrap()
    }

    fn gradient(rows: usize, columns: usize) -> Array2<u16> {
        Array2::from_shape_fn((rows, columns), |(r, c)| (r * 1000 + c * 3) as u16)
    }

    #[test]
    fn decodes_raw_samples() {
        let pixels = gradient(6, 9);
        let record = RawRecord::from_object(synthetic_slice(Some(3), &pixels));
        assert_eq!(record.decode_frame().unwrap(), pixels);
        assert_eq!(instance_number(record.object()), Some(3));
    }

    #[test]
    fn missing_instance_number_reads_as_none() {
        let object = synthetic_slice(None, &gradient(2, 2));
        assert_eq!(instance_number(&object), None);
    }

    #[test]
    fn stripped_record_round_trips_without_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slice.dcm");

        let record = RawRecord::from_object(synthetic_slice(Some(7), &gradient(4, 4)));
        let stripped = record.strip_pixel_data();
        assert!(stripped.object().element(tags::PIXEL_DATA).is_err());
        stripped.write(&path).unwrap();

        let reopened = MetadataOnlyRecord::open(&path).unwrap();
        assert!(reopened.object().element(tags::PIXEL_DATA).is_err());
        assert_eq!(instance_number(reopened.object()), Some(7));
    }

    #[test]
    fn restore_rewrites_pixel_module() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restored.dcm");

        let canvas = Array2::from_shape_fn((5, 8), |(r, c)| (r * 8 + c) as u8);
        let restored = RawRecord::from_object(synthetic_slice(Some(1), &gradient(5, 8)))
            .strip_pixel_data()
            .restore(canvas.view())
            .unwrap();
        restored.write(&path).unwrap();

        let object = open_file(&path).unwrap();
        assert_eq!(object.meta().transfer_syntax(), uids::EXPLICIT_VR_LITTLE_ENDIAN);
        let us = |tag| object.element(tag).unwrap().to_int::<u16>().unwrap();
        assert_eq!(us(tags::ROWS), 5);
        assert_eq!(us(tags::COLUMNS), 8);
        assert_eq!(us(tags::BITS_ALLOCATED), 8);
        assert_eq!(us(tags::BITS_STORED), 8);
        assert_eq!(us(tags::HIGH_BIT), 7);
        assert_eq!(us(tags::SAMPLES_PER_PIXEL), 1);
        assert_eq!(
            object
                .element(tags::PHOTOMETRIC_INTERPRETATION)
                .unwrap()
                .to_str()
                .unwrap()
                .trim(),
            "MONOCHROME2"
        );
        let pixel_data = object.element(tags::PIXEL_DATA).unwrap();
        assert_eq!(pixel_data.vr(), VR::OB);
        assert_eq!(pixel_data.to_bytes().unwrap().as_ref(), canvas.as_slice().unwrap());
    }

    #[test]
    fn oversized_canvas_is_rejected() {
        let canvas = Array2::<u8>::zeros((1, 70_000));
        let err = RawRecord::from_object(synthetic_slice(Some(1), &gradient(2, 2)))
            .strip_pixel_data()
            .restore(canvas.view())
            .unwrap_err();
        assert!(matches!(err, RecordError::CanvasTooLarge { width: 70_000, .. }));
    }
}
