use crate::bmd::Calibration;
use crate::contrast::ContrastEnhancer;
use crate::enums::SortBy;
use crate::error::{Error, Result};
use crate::filter::NoiseFilter;
use crate::hough::CircleDetector;
use crate::morphology::MorphologyStep;
use crate::quantize::Quantizer;
use crate::region::Region;
use crate::rod::RodExtractor;
use crate::threshold::Thresholder;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// A named coarse region expected to hold calibration rods.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiConfig {
    pub name: String,
    #[serde(flatten)]
    pub region: Region,
}

impl RoiConfig {
    pub fn new(name: impl Into<String>, region: Region) -> Self {
        Self {
            name: name.into(),
            region,
        }
    }
}

/// Everything a pipeline run needs besides the volume itself.
///
/// Every section may be omitted from the JSON file; missing sections keep their
/// defaults. `contrast: null` skips histogram equalization.
///
/// Equalization is on by default. On noisy scans it spreads the background over
/// most of the 8-bit range and the automatic threshold can land inside it, leaving
/// a speckled mask. For such data set `contrast` to `null` (the automatic threshold
/// then separates rods from background cleanly) or use a fixed threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub rois: Vec<RoiConfig>,
    pub sort_by: SortBy,
    pub filter: NoiseFilter,
    pub contrast: Option<ContrastEnhancer>,
    pub quantizer: Quantizer,
    pub threshold: Thresholder,
    pub morphology: Vec<MorphologyStep>,
    pub detector: CircleDetector,
    pub rods: RodExtractor,
    pub calibration: Option<Calibration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            // Rod insert of the ankle PRE-OA acquisition protocol
            rois: vec![RoiConfig::new(
                "rods",
                Region::new([265, 410, 0], [135, 50, 9]),
            )],
            sort_by: SortBy::default(),
            filter: NoiseFilter::default(),
            contrast: Some(ContrastEnhancer::default()),
            quantizer: Quantizer::default(),
            threshold: Thresholder::default(),
            morphology: Vec::new(),
            detector: CircleDetector::default(),
            rods: RodExtractor::default(),
            calibration: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check every stage's parameters up front so a run cannot fail half way on a
    /// configuration mistake.
    pub fn validate(&self) -> Result<()> {
        if self.rois.is_empty() {
            return Err(Error::Config("at least one ROI is required".into()));
        }
        let mut names = HashSet::new();
        for roi in &self.rois {
            if !names.insert(roi.name.as_str()) {
                return Err(Error::Config(format!("duplicate ROI name '{}'", roi.name)));
            }
        }

        self.filter.validate()?;
        if let Some(contrast) = &self.contrast {
            contrast.validate()?;
        }
        self.quantizer.validate()?;
        for step in &self.morphology {
            step.validate()?;
        }
        self.detector.validate()?;
        self.rods.validate()?;
        Ok(())
    }
}
