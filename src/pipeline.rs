//! Encode and decode passes over a whole series.

use std::{
    fs,
    io::ErrorKind,
    iter,
    path::{Path, PathBuf},
};

use ndarray::Array2;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    codec::{CodecError, ImageCodec},
    container::{CodecPayload, ContainerError, read_container, write_container},
    enums::{RasterFormat, SliceClass, StoredPayload},
    fallback::{FallbackError, read_raster, write_raster},
    manifest::{MANIFEST_FILE_NAME, ManifestError, ManifestWriter, SeriesManifest},
    record::{MetadataOnlyRecord, RecordError, instance_number},
    restore::{RestoreError, restore_from_payload, restore_from_raster},
    roi::{BoundingBox, classify, crop_normalized, pad_to_block},
    series::{Series, Slice, file_stem},
    series_loader::{SeriesLoader, SeriesLoaderError, file_name},
    threshold::estimate_threshold,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Series(#[from] SeriesLoaderError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("DICOM error: {0}")]
    Record(#[from] RecordError),

    #[error("Fallback raster error: {0}")]
    Fallback(#[from] FallbackError),

    #[error("Restore error: {0}")]
    Restore(#[from] RestoreError),

    #[error("Manifest lists {manifest} slices but {found} metadata records were found")]
    SliceCountMismatch { manifest: usize, found: usize },

    #[error("No container or fallback raster for slice {index} ({file})")]
    MissingPayload { index: usize, file: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tunable constants of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    /// Samples at or below this value are ignored when estimating the threshold
    pub noise_floor: u16,
    /// Threshold used when no sample clears the noise floor
    pub default_threshold: f64,
    /// Minimum `max - min` span of a bounding box on each axis
    pub min_region_size: usize,
    /// Codec block size; padded regions are multiples of it
    pub block_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            noise_floor: 10,
            default_threshold: 150.0,
            min_region_size: 5,
            block_size: 128,
        }
    }
}

const RASTER_FORMATS: [RasterFormat; 2] = [RasterFormat::WebP, RasterFormat::Png16];

/// File layout of an encoded series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedLayout {
    root: PathBuf,
}

impl EncodedLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE_NAME)
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join("meta_dicom")
    }

    pub fn container_dir(&self) -> PathBuf {
        self.root.join("containers")
    }

    pub fn fallback_dir(&self) -> PathBuf {
        self.root.join("error_images")
    }

    pub fn container_path(&self, stem: &str) -> PathBuf {
        self.container_dir().join(format!("{stem}.bin"))
    }

    pub fn create_dirs(&self) -> Result<(), std::io::Error> {
        for dir in [self.metadata_dir(), self.container_dir(), self.fallback_dir()] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn raster_path(&self, stem: &str, format: RasterFormat) -> PathBuf {
        self.fallback_dir()
            .join(format!("{stem}.{}", format.extension()))
    }

    /// Find what was stored for the slice named `stem`, preferring a container.
    pub fn resolve_payload(&self, stem: &str) -> Option<StoredPayload> {
        let container = self.container_path(stem);
        if container.is_file() {
            return Some(StoredPayload::Container(container));
        }
        RASTER_FORMATS
            .into_iter()
            .map(|format| (self.raster_path(stem, format), format))
            .find(|(path, _)| path.is_file())
            .map(|(path, format)| StoredPayload::FallbackRaster(path, format))
    }

    /// Remove any container or raster an earlier run stored for `stem`.
    pub fn clear_payload(&self, stem: &str) -> Result<(), std::io::Error> {
        let rasters = RASTER_FORMATS.map(|format| self.raster_path(stem, format));
        for path in iter::once(self.container_path(stem)).chain(rasters) {
            match fs::remove_file(&path) {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeReport {
    pub threshold: f64,
    pub slice_count: usize,
    pub compressed: usize,
    pub fallback: usize,
    pub empty: usize,
    pub degenerate: usize,
    pub container_bytes: usize,
}

/// Load the series in `input_dir` and encode it into `layout`.
pub fn encode_directory(
    input_dir: impl AsRef<Path>,
    layout: &EncodedLayout,
    codec: &impl ImageCodec,
    config: &PipelineConfig,
) -> Result<EncodeReport, PipelineError> {
    let series = SeriesLoader::load_from_directory(input_dir)?;
    encode_series(series, layout, codec, config)
}

/// Encode every slice of `series`.
///
/// A codec failure on one slice sends that slice down the fallback path and the
/// run continues; any other error aborts it.
pub fn encode_series(
    series: Series,
    layout: &EncodedLayout,
    codec: &impl ImageCodec,
    config: &PipelineConfig,
) -> Result<EncodeReport, PipelineError> {
    layout.create_dirs()?;

    let threshold = estimate_threshold(
        series.frames(),
        config.noise_floor,
        config.default_threshold,
    );
    let (slice_count, height, width) = series.dim();
    info!(slice_count, width, height, threshold, "encoding series");

    let mut manifest = ManifestWriter::create(
        layout.manifest_path(),
        slice_count,
        width,
        height,
        config.min_region_size,
    )?;
    let mut report = EncodeReport {
        threshold,
        slice_count,
        ..Default::default()
    };

    for (index, slice) in series.into_slices().into_iter().enumerate() {
        layout.clear_payload(slice.stem())?;
        match classify(slice.pixels.view(), threshold, config.min_region_size) {
            SliceClass::Empty => {
                debug!(index, file = %slice.file_name, "empty slice");
                report.empty += 1;
            }
            SliceClass::Degenerate => {
                debug!(index, file = %slice.file_name, "region too small, keeping metadata only");
                report.degenerate += 1;
            }
            SliceClass::HasRegion(bbox) => {
                match compress_region(&slice, &bbox, codec, config) {
                    Ok(payload) => {
                        let path = layout.container_path(slice.stem());
                        write_container(&path, &payload)?;
                        debug!(index, ?bbox, bytes = payload.encoded_len(), "wrote container");
                        report.compressed += 1;
                        report.container_bytes += payload.encoded_len();
                    }
                    Err(err) => {
                        let (path, _) =
                            write_raster(layout.fallback_dir(), slice.stem(), slice.pixels.view())?;
                        warn!(
                            index,
                            file = %slice.file_name,
                            error = %err,
                            fallback = %path.display(),
                            "codec failed, kept original frame"
                        );
                        report.fallback += 1;
                    }
                }
                manifest.append(index, &bbox)?;
            }
        }

        let Slice {
            file_name, record, ..
        } = slice;
        record
            .strip_pixel_data()
            .write(layout.metadata_dir().join(file_name))?;
    }

    manifest.finish()?;
    info!(
        compressed = report.compressed,
        fallback = report.fallback,
        empty = report.empty,
        degenerate = report.degenerate,
        "series encoded"
    );
    Ok(report)
}

/// Crop, rescale and pad the region of `slice`, then run it through the codec.
pub fn compress_region(
    slice: &Slice,
    bbox: &BoundingBox,
    codec: &impl ImageCodec,
    config: &PipelineConfig,
) -> Result<CodecPayload, CodecError> {
    let crop = crop_normalized(slice.pixels.view(), bbox);
    let padded = pad_to_block(crop.view(), config.block_size);
    let compressed = codec.compress(padded.data.view())?;

    CodecPayload::new(
        compressed.shape,
        padded.padded_size(),
        padded.region_size,
        compressed.strings,
    )
    .map_err(|e| CodecError::Backend(e.to_string()))
}

/// One slice to restore, with its payload already located.
#[derive(Debug, Clone)]
pub struct DecodeJob {
    pub index: usize,
    pub file_name: String,
    pub record: MetadataOnlyRecord,
    pub bbox: Option<BoundingBox>,
    pub payload: StoredPayload,
}

/// Read the manifest and metadata records of `layout` and pair every slice with
/// its stored payload.
pub fn plan_decode(
    layout: &EncodedLayout,
    config: &PipelineConfig,
) -> Result<(SeriesManifest, Vec<DecodeJob>), PipelineError> {
    let manifest = SeriesManifest::read(layout.manifest_path(), config.min_region_size)?;

    let mut records = SeriesLoader::list_dicom_files(layout.metadata_dir())?
        .into_iter()
        .map(|path| {
            let record = MetadataOnlyRecord::open(&path)?;
            let key = instance_number(record.object()).unwrap_or(0);
            Ok((key, (file_name(&path), record)))
        })
        .collect::<Result<Vec<_>, RecordError>>()?;
    SeriesLoader::sort_by_ordering_key(&mut records);

    if records.len() != manifest.slice_count {
        return Err(PipelineError::SliceCountMismatch {
            manifest: manifest.slice_count,
            found: records.len(),
        });
    }

    let jobs = records
        .into_iter()
        .enumerate()
        .map(|(index, (_, (file_name, record)))| {
            let bbox = manifest.bounding_box(index).copied();
            let payload = match bbox {
                None => StoredPayload::None,
                Some(_) => layout
                    .resolve_payload(file_stem(&file_name))
                    .ok_or_else(|| PipelineError::MissingPayload {
                        index,
                        file: file_name.clone(),
                    })?,
            };
            Ok(DecodeJob {
                index,
                file_name,
                record,
                bbox,
                payload,
            })
        })
        .collect::<Result<Vec<_>, PipelineError>>()?;

    Ok((manifest, jobs))
}

/// Rebuild the full 8-bit frame of one slice.
pub fn restore_canvas(
    job: &DecodeJob,
    frame_size: (usize, usize),
    codec: &impl ImageCodec,
) -> Result<Array2<u8>, PipelineError> {
    let canvas = match (&job.payload, &job.bbox) {
        (StoredPayload::Container(path), Some(bbox)) => {
            let payload = read_container(path)?;
            if payload.original_region != (bbox.height() as u32, bbox.width() as u32) {
                warn!(
                    index = job.index,
                    region = ?payload.original_region,
                    ?bbox,
                    "container region differs from manifest box"
                );
            }
            let reconstructed = codec.decompress(&payload.strings, payload.latent_shape)?;
            restore_from_payload(&payload, reconstructed.view(), bbox, frame_size)?
        }
        (StoredPayload::FallbackRaster(path, _), Some(bbox)) => {
            let raster = read_raster(path)?;
            restore_from_raster(raster.view(), bbox, frame_size)?
        }
        _ => Array2::zeros(frame_size),
    };
    Ok(canvas)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeReport {
    pub restored: usize,
    pub from_container: usize,
    pub from_fallback: usize,
    pub blank: usize,
}

/// Restore every slice of the encoded series in `layout` into `output_dir`.
///
/// Decoding stops at the first slice that cannot be restored.
pub fn decode_series(
    layout: &EncodedLayout,
    output_dir: impl AsRef<Path>,
    codec: &impl ImageCodec,
    config: &PipelineConfig,
) -> Result<DecodeReport, PipelineError> {
    let output_dir = output_dir.as_ref();
    fs::create_dir_all(output_dir)?;

    let (manifest, jobs) = plan_decode(layout, config)?;
    let frame_size = (manifest.frame_height, manifest.frame_width);
    info!(
        slice_count = manifest.slice_count,
        width = manifest.frame_width,
        height = manifest.frame_height,
        "decoding series"
    );

    let mut report = DecodeReport::default();
    for job in jobs {
        let canvas = restore_canvas(&job, frame_size, codec)?;
        match job.payload {
            StoredPayload::Container(_) => report.from_container += 1,
            StoredPayload::FallbackRaster(..) => report.from_fallback += 1,
            StoredPayload::None => report.blank += 1,
        }

        let path = output_dir.join(&job.file_name);
        job.record.restore(canvas.view())?.write(&path)?;
        debug!(index = job.index, path = %path.display(), "restored slice");
        report.restored += 1;
    }

    info!(restored = report.restored, "series decoded");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{CompressedRegion, DeflateCodec, LatentShape},
        record::{RawRecord, tests::synthetic_slice},
        restore::place,
    };
    use ndarray::ArrayView2;

    struct FailingCodec;

    impl ImageCodec for FailingCodec {
        fn compress(&self, _: ArrayView2<'_, u8>) -> Result<CompressedRegion, CodecError> {
            Err(CodecError::Backend("device lost".into()))
        }

        fn decompress(&self, _: &[Vec<u8>], _: LatentShape) -> Result<Array2<f32>, CodecError> {
            Err(CodecError::Backend("device lost".into()))
        }
    }

    fn checkerboard_series(low: u16, high: u16, rows: std::ops::Range<usize>) -> (Series, Array2<u16>) {
        let mut frame = Array2::<u16>::zeros((16, 16));
        for r in rows {
            for c in 3..13 {
                frame[[r, c]] = if (r + c) % 2 == 0 { low } else { high };
            }
        }
        let record = RawRecord::from_object(synthetic_slice(Some(1), &frame));
        let series = SeriesLoader::load_from_records(vec![("S0.dcm".to_string(), record)]).unwrap();
        (series, frame)
    }

    #[test]
    fn re_encoding_replaces_payloads_of_an_earlier_run() {
        let encoded = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let layout = EncodedLayout::new(encoded.path());
        let config = PipelineConfig {
            block_size: 16,
            ..Default::default()
        };
        let deflate = DeflateCodec::new(16, 6);

        let (first, _) = checkerboard_series(400, 600, 2..10);
        let report = encode_series(first, &layout, &deflate, &config).unwrap();
        assert_eq!(report.compressed, 1);
        assert!(layout.container_path("S0").is_file());

        let (second, frame) = checkerboard_series(300, 900, 5..14);
        let report = encode_series(second, &layout, &FailingCodec, &config).unwrap();
        assert_eq!(report.fallback, 1);
        assert!(!layout.container_path("S0").exists());
        assert!(layout.raster_path("S0", RasterFormat::Png16).is_file());

        let report = decode_series(&layout, output.path(), &deflate, &config).unwrap();
        assert_eq!((report.from_container, report.from_fallback), (0, 1));

        let manifest = SeriesManifest::read(layout.manifest_path(), config.min_region_size).unwrap();
        let bbox = *manifest.bounding_box(0).unwrap();
        assert_eq!((bbox.y_min, bbox.y_max), (5, 13));
        let crop = crop_normalized(frame.view(), &bbox);
        let expected = place(crop.view(), Some(&bbox), (16, 16)).mapv(u16::from);
        let restored = RawRecord::open(output.path().join("S0.dcm"))
            .unwrap()
            .decode_frame()
            .unwrap();
        assert_eq!(restored, expected);

        let (third, _) = checkerboard_series(400, 600, 2..10);
        encode_series(third, &layout, &deflate, &config).unwrap();
        assert!(layout.container_path("S0").is_file());
        assert!(!layout.raster_path("S0", RasterFormat::Png16).exists());
    }

    #[test]
    fn layout_paths() {
        let layout = EncodedLayout::new("/tmp/out");
        assert_eq!(layout.manifest_path(), Path::new("/tmp/out/bounding_boxes.txt"));
        assert_eq!(
            layout.container_path("IM0007"),
            Path::new("/tmp/out/containers/IM0007.bin")
        );
    }

    #[test]
    fn resolves_container_before_raster() {
        let dir = tempfile::tempdir().unwrap();
        let layout = EncodedLayout::new(dir.path());
        layout.create_dirs().unwrap();
        assert_eq!(layout.resolve_payload("s1"), None);

        let raster = layout.fallback_dir().join("s1.png");
        fs::write(&raster, b"").unwrap();
        assert_eq!(
            layout.resolve_payload("s1"),
            Some(StoredPayload::FallbackRaster(raster, RasterFormat::Png16))
        );

        fs::write(layout.container_path("s1"), b"").unwrap();
        assert_eq!(
            layout.resolve_payload("s1"),
            Some(StoredPayload::Container(layout.container_path("s1")))
        );
    }

    #[test]
    fn default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.noise_floor, 10);
        assert_eq!(config.default_threshold, 150.0);
        assert_eq!(config.min_region_size, 5);
        assert_eq!(config.block_size, 128);
    }
}
