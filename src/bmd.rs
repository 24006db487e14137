use crate::error::{Error, Result};
use crate::rod::RodSample;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Linear map from raw intensity to density units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub slope: f64,
    pub intercept: f64,
}

impl Calibration {
    pub fn new(slope: f64, intercept: f64) -> Self {
        Self { slope, intercept }
    }

    pub fn apply(&self, value: f64) -> f64 {
        self.slope.mul_add(value, self.intercept)
    }
}

/// Statistics of one rod.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BmdResult {
    pub rod: usize,
    pub center: (f32, f32),
    pub radius: f32,
    pub slices: (usize, usize),
    /// Slices inside `slices` on which this rod was not detected; they are still sampled
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_slices: Vec<usize>,
    pub mean: f64,
    /// Sample standard deviation (n - 1)
    pub std_dev: f64,
    pub voxel_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub density: Option<f64>,
}

pub struct BmdCalculator {
    calibration: Option<Calibration>,
}

impl BmdCalculator {
    pub fn new(calibration: Option<Calibration>) -> Self {
        Self { calibration }
    }

    /// # Errors
    ///
    /// [`Error::EmptySample`] if the rod encloses no voxels.
    pub fn compute(&self, sample: &RodSample) -> Result<BmdResult> {
        let n = sample.voxel_count();
        if n == 0 {
            return Err(Error::EmptySample(sample.id()));
        }

        let mean = sample.values.iter().sum::<f64>() / n as f64;
        let std_dev = if n > 1 {
            let squares: f64 = sample.values.iter().map(|v| (v - mean).powi(2)).sum();
            (squares / (n - 1) as f64).sqrt()
        } else {
            0.0
        };

        let cylinder = &sample.cylinder;
        Ok(BmdResult {
            rod: cylinder.id,
            center: (cylinder.cx, cylinder.cy),
            radius: cylinder.radius,
            slices: (cylinder.first_slice, cylinder.last_slice),
            missing_slices: cylinder.missing_slices(),
            mean,
            std_dev,
            voxel_count: n,
            density: self.calibration.map(|c| c.apply(mean)),
        })
    }

    /// Compute every sample in parallel, failing on the first empty one.
    pub fn compute_all(&self, samples: &[RodSample]) -> Result<Vec<BmdResult>> {
        samples.par_iter().map(|sample| self.compute(sample)).collect()
    }
}
