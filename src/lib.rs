//! # Phantom BMD library
//!
//! This crate locates the cylindrical rods of a bone-mineral-density calibration
//! phantom in a CT volume and computes per-rod intensity statistics.

//!
//! DICOM series are read with the dicom-rs ecosystem into a signed volume of
//! Hounsfield units. For each configured region of interest the volume goes
//! through the following stages, each producing a new owned volume:
//!  - Crop
//!  - Median (or mean) noise filter
//!  - Histogram equalization
//!  - 8-bit quantization
//!  - Fixed or Otsu threshold
//!  - Optional erosion/dilation
//!  - Circle Hough transform per axial slice
//!
//!  Circles that line up across slices are merged into rod cylinders, and the
//!  voxels inside each cylinder are sampled from the *original* crop to compute
//!  mean, standard deviation and voxel count, optionally converted to density
//!  with a linear calibration.
//!
//!  Independent regions and rods are processed in parallel using rayon.
//!
//! # Examples
//!
//! ## Measuring the rods of the first series in a directory
//!
//! ```no_run
//! # use phantom_bmd::{Pipeline, PipelineConfig, SeriesReader};
//! let catalog = SeriesReader::scan("dicom").expect("should have found a series");
//! let uid = catalog.first_uid().expect("catalog is never empty");
//! let config = PipelineConfig::default();
//! let volume = catalog
//!     .load(uid, config.sort_by)
//!     .expect("should have loaded the series");
//! let pipeline = Pipeline::new(config).expect("default configuration is valid");
//! for report in pipeline.run(&volume).expect("should have processed every ROI") {
//!     for rod in &report.rods {
//!         println!("{} rod {}: {:.1} HU", report.name, rod.rod, rod.mean);
//!     }
//! }
//! ```

pub mod bmd;
pub mod config;
pub mod contrast;
pub mod enums;
pub mod error;
pub mod filter;
pub mod hough;
pub mod morphology;
pub mod pipeline;
pub mod quantize;
pub mod region;
pub mod rod;
pub mod threshold;
pub mod volume;
pub mod volume_loader;
pub mod writer;

pub use bmd::{BmdCalculator, BmdResult, Calibration};
pub use config::{PipelineConfig, RoiConfig};
pub use error::{Error, Result};
pub use hough::{Circle, CircleDetector};
pub use pipeline::{Pipeline, RoiReport};
pub use region::Region;
pub use volume::{Volume, Voxel};
pub use volume_loader::{SeriesCatalog, SeriesReadError, SeriesReader, VolumeLoader};
pub use writer::{NiftiWriter, SeriesWriteError, WriterOptions};
