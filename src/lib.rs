//! # DICOM-ROI-codec library
//!
//! This crate compresses a DICOM series by handing only the region of interest
//! of every slice to an external image codec, and restores the series back to
//! full-size DICOM files afterwards.

//!
//! The library is built on the dicom-rs ecosystem. A series is read from a
//! folder where each ".dcm" file holds one slice, ordered by Instance Number.
//! One intensity threshold is estimated for the whole series, and every slice
//! is then classified:
//!  - Has region: the bounding box of all samples above the threshold is
//!    cropped, rescaled to 8 bits, padded to the codec block size and
//!    compressed into a binary container
//!  - Degenerate: the box is smaller than the minimum region size
//!  - Empty: no sample above the threshold
//!
//!  Degenerate and empty slices keep only their metadata. Bounding boxes and
//!  the frame size go to a plain text manifest, so decoding can put every
//!  region back at its exact pixel offset. If the codec fails on a slice the
//!  original frame is kept as a lossless raster instead, and the run goes on.
//!
//!  The codec itself is not part of this crate; anything implementing
//!  [`codec::ImageCodec`] can be plugged in. [`codec::DeflateCodec`] is a
//!  lossless stand-in.
//!
//! # Examples
//!
//! ## Encoding and restoring a series
//!
//! Encode all DICOM files of the dicom/ directory into encoded/, then restore
//! them into restored/ and check that the key attributes survived.
//!
//! ```no_run
//! # use dicom_roi_codec::{DeflateCodec, EncodedLayout, PipelineConfig};
//! # use dicom_roi_codec::pipeline::{decode_series, encode_directory};
//! # use dicom_roi_codec::validator::validate_series;
//! let config = PipelineConfig::default();
//! let codec = DeflateCodec::new(config.block_size, 6);
//! let layout = EncodedLayout::new("encoded");
//!
//! let report = encode_directory("dicom", &layout, &codec, &config)
//!     .expect("should have encoded the series");
//! println!("{} slices compressed", report.compressed);
//!
//! decode_series(&layout, "restored", &codec, &config).expect("should have restored the series");
//! let validation = validate_series("dicom", "restored").expect("should have read both series");
//! println!("{validation}");
//! ```

pub mod codec;
pub mod container;
pub mod enums;
pub mod fallback;
pub mod manifest;
pub mod pipeline;
pub mod record;
pub mod restore;
pub mod roi;
pub mod series;
pub mod series_loader;
pub mod threshold;
pub mod validator;

pub use codec::{DeflateCodec, ImageCodec};
pub use pipeline::{EncodedLayout, PipelineConfig, PipelineError};
