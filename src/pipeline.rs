//! Stage orchestration: one run per configured ROI.
//!
//! ```text
//! crop -> filter -> equalize -> quantize -> threshold -> morphology
//!      -> circles per slice -> cylinders -> rod samples (from the crop) -> BMD
//! ```
//!
//! Every stage returns a new owned volume or mask. ROIs are independent and run in
//! parallel.

use crate::bmd::{BmdCalculator, BmdResult};
use crate::config::{PipelineConfig, RoiConfig};
use crate::error::{Error, Result};
use crate::morphology;
use crate::region::Region;
use crate::rod::RodSample;
use crate::threshold::BinaryMask;
use crate::volume::{Volume, Voxel};
use crate::writer::{SeriesWriteError, write_image};

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Outcome of one ROI.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoiReport {
    pub name: String,
    pub region: Region,
    /// Threshold applied to the 8-bit image
    pub threshold: u8,
    pub rods: Vec<BmdResult>,
    /// Slices on which no circle was detected
    pub incomplete_slices: Vec<usize>,
}

impl RoiReport {
    /// Every slice has a detection and no rod skips a slice of its span.
    pub fn is_complete(&self) -> bool {
        self.incomplete_slices.is_empty()
            && self.rods.iter().all(|rod| rod.missing_slices.is_empty())
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    debug_dir: Option<PathBuf>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Pipeline {
    /// # Errors
    ///
    /// Any invalid stage parameter in `config`.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            debug_dir: None,
            cancel: None,
        })
    }

    /// Write the quantized image and mask of every slice as PNG into `dir`.
    pub fn with_debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = Some(dir.into());
        self
    }

    /// Flag checked between slices of circle detection.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every configured ROI, in configuration order.
    pub fn run<T: Voxel>(&self, volume: &Volume<T>) -> Result<Vec<RoiReport>> {
        self.config
            .rois
            .par_iter()
            .map(|roi| self.run_roi(volume, roi))
            .collect()
    }

    pub fn run_roi<T: Voxel>(&self, volume: &Volume<T>, roi: &RoiConfig) -> Result<RoiReport> {
        let config = &self.config;

        let original = volume.crop(&roi.region)?;
        info!("ROI '{}': {}", roi.name, roi.region);

        let filtered = config.filter.apply(&original)?;
        let enhanced = match &config.contrast {
            Some(contrast) => contrast.apply(&filtered)?,
            None => filtered,
        };
        let quantized = config.quantizer.apply(&enhanced)?;
        let (mask, threshold) = self.binarize(&quantized)?;
        let mask = morphology::apply_steps(mask, &config.morphology)?;
        debug!(
            "ROI '{}': threshold {threshold}, {} foreground voxels",
            roi.name,
            mask.foreground_count()
        );

        if let Some(dir) = &self.debug_dir {
            Self::dump_slices(dir, &roi.name, &quantized, &mask)?;
        }

        let per_slice = config
            .detector
            .detect_volume(&mask, self.cancel.as_deref())?;
        let incomplete_slices: Vec<usize> = per_slice
            .iter()
            .enumerate()
            .filter(|(_, circles)| circles.is_empty())
            .map(|(z, _)| z)
            .collect();
        if !incomplete_slices.is_empty() {
            warn!(
                "ROI '{}': no rod found on slice(s) {:?}",
                roi.name, incomplete_slices
            );
        }

        let cylinders = config.rods.aggregate(&per_slice);
        let samples: Vec<RodSample> = cylinders
            .iter()
            .map(|cylinder| config.rods.extract(&original, cylinder))
            .collect();
        let rods = BmdCalculator::new(config.calibration).compute_all(&samples)?;
        for rod in rods.iter().filter(|rod| !rod.missing_slices.is_empty()) {
            warn!(
                "ROI '{}': rod {} not detected on slice(s) {:?}",
                roi.name, rod.rod, rod.missing_slices
            );
        }
        info!("ROI '{}': {} rod(s)", roi.name, rods.len());

        Ok(RoiReport {
            name: roi.name.clone(),
            region: roi.region,
            threshold,
            rods,
            incomplete_slices,
        })
    }

    // Automatic thresholding falls back to the fixed value on a flat histogram
    fn binarize(&self, quantized: &Volume<u8>) -> Result<(BinaryMask, u8)> {
        let thresholder = &self.config.threshold;
        match thresholder.apply(quantized) {
            Err(Error::DegenerateHistogram(value)) => {
                let t = thresholder.fallback;
                warn!("every voxel quantized to {value}, falling back to threshold {t}");
                Ok((thresholder.binarize(quantized, t), t))
            }
            result => result,
        }
    }

    fn dump_slices(dir: &Path, name: &str, quantized: &Volume<u8>, mask: &BinaryMask) -> Result<()> {
        fs::create_dir_all(dir).map_err(SeriesWriteError::from)?;
        for z in 0..mask.depth() {
            if let Some(image) = quantized.axial_image(z) {
                write_image(&image, dir.join(format!("{name}_z{z:03}_quantized.png")))?;
            }
            if let Some(image) = mask.axial_image(z) {
                write_image(&image, dir.join(format!("{name}_z{z:03}_mask.png")))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hough::CircleDetector;
    use ndarray::Array3;
    use std::sync::atomic::Ordering;

    fn rod_volume() -> Volume<i16> {
        Volume::from_data(Array3::from_shape_fn((2, 40, 40), |(_, y, x)| {
            let (dx, dy) = (x as i32 - 20, y as i32 - 20);
            if dx * dx + dy * dy <= 64 { 900 } else { -100 }
        }))
    }

    fn config_for(volume: &Volume<i16>) -> PipelineConfig {
        PipelineConfig {
            rois: vec![RoiConfig::new("all", Region::whole(volume.size_xyz()))],
            filter: crate::filter::NoiseFilter::isotropic(crate::enums::FilterMode::Median, 1),
            detector: CircleDetector::with_radius_range(5, 12),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn out_of_bounds_roi_aborts_the_run() {
        let volume = rod_volume();
        let config = PipelineConfig {
            rois: vec![RoiConfig::new("far", Region::new([30, 30, 0], [20, 20, 2]))],
            ..config_for(&volume)
        };
        let pipeline = Pipeline::new(config).expect("valid config");
        assert!(matches!(
            pipeline.run(&volume),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn flat_roi_falls_back_and_reports_incomplete_slices() {
        let volume = Volume::from_data(Array3::<i16>::from_elem((2, 20, 20), 40));
        let pipeline = Pipeline::new(config_for(&volume)).expect("valid config");
        let reports = pipeline.run(&volume).expect("flat volume is not an error");

        assert_eq!(reports[0].threshold, pipeline.config().threshold.fallback);
        assert!(reports[0].rods.is_empty());
        assert_eq!(reports[0].incomplete_slices, vec![0, 1]);
        assert!(!reports[0].is_complete());
    }

    #[test]
    fn single_rod_is_measured_from_original_intensities() {
        let volume = rod_volume();
        let pipeline = Pipeline::new(config_for(&volume)).expect("valid config");
        let reports = pipeline.run(&volume).expect("run succeeds");

        let report = &reports[0];
        assert!(report.is_complete());
        assert_eq!(report.rods.len(), 1, "{:?}", report.rods);
        let rod = &report.rods[0];
        assert_eq!(rod.mean, 900.0);
        assert_eq!(rod.std_dev, 0.0);
        assert_eq!(rod.voxel_count, 2 * 197);
    }

    #[test]
    fn rod_gap_makes_report_incomplete() {
        let volume = rod_volume();
        let pipeline = Pipeline::new(config_for(&volume)).expect("valid config");
        let mut report = pipeline.run(&volume).expect("run succeeds").remove(0);
        assert!(report.rods[0].missing_slices.is_empty());
        assert!(report.is_complete());

        report.rods[0].missing_slices = vec![1];
        assert!(report.incomplete_slices.is_empty());
        assert!(!report.is_complete());
    }

    #[test]
    fn cancelled_run_stops() {
        let volume = rod_volume();
        let cancel = Arc::new(AtomicBool::new(false));
        let pipeline = Pipeline::new(config_for(&volume))
            .expect("valid config")
            .with_cancel_flag(cancel.clone());
        cancel.store(true, Ordering::Relaxed);
        assert!(matches!(pipeline.run(&volume), Err(Error::Cancelled)));
    }

    #[test]
    fn debug_dir_receives_slice_images() {
        let volume = rod_volume();
        let dir = tempfile::tempdir().expect("temp dir");
        let pipeline = Pipeline::new(config_for(&volume))
            .expect("valid config")
            .with_debug_dir(dir.path().join("debug"));
        pipeline.run(&volume).expect("run succeeds");

        for name in ["all_z000_quantized.png", "all_z001_mask.png"] {
            assert!(dir.path().join("debug").join(name).is_file(), "{name} missing");
        }
    }
}
