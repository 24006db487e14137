use crate::error::{Error, Result};
use crate::volume::{Volume, slice_to_image};

use image::GrayImage;
use ndarray::{Array3, ArrayBase, ArrayView2, Axis, Data, Dimension};
use serde::{Deserialize, Serialize};

/// Foreground/background decision per voxel, shaped like the volume it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryMask {
    data: Array3<bool>,
}

impl BinaryMask {
    pub fn new(data: Array3<bool>) -> Self {
        Self { data }
    }

    /// Get the dimensions of the mask (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array3<bool> {
        &self.data
    }

    pub fn into_data(self) -> Array3<bool> {
        self.data
    }

    pub fn depth(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn axial_slice(&self, z: usize) -> Option<ArrayView2<'_, bool>> {
        (z < self.depth()).then(|| self.data.index_axis(Axis(0), z))
    }

    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// Foreground white, background black.
    pub fn axial_image(&self, z: usize) -> Option<GrayImage> {
        let slice = self.axial_slice(z)?;
        slice_to_image(&slice, |&v| if v { 255 } else { 0 })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThresholdMode {
    Fixed { value: u8 },
    /// Otsu's method on the 256-bin histogram.
    Auto,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholder {
    pub mode: ThresholdMode,
    /// Foreground is `v < t` instead of `v >= t`.
    #[serde(default)]
    pub inverted: bool,
    /// Threshold used when the automatic one cannot be determined.
    #[serde(default = "default_fallback")]
    pub fallback: u8,
}

fn default_fallback() -> u8 {
    128
}

impl Default for Thresholder {
    fn default() -> Self {
        Self {
            mode: ThresholdMode::Auto,
            inverted: false,
            fallback: default_fallback(),
        }
    }
}

impl Thresholder {
    pub fn fixed(value: u8) -> Self {
        Self {
            mode: ThresholdMode::Fixed { value },
            ..Self::default()
        }
    }

    /// Threshold this configuration selects for `data`.
    ///
    /// # Errors
    ///
    /// [`Error::DegenerateHistogram`] in automatic mode when every value is the same.
    pub fn threshold_for<S, D>(&self, data: &ArrayBase<S, D>) -> Result<u8>
    where
        S: Data<Elem = u8>,
        D: Dimension,
    {
        match self.mode {
            ThresholdMode::Fixed { value } => Ok(value),
            ThresholdMode::Auto => otsu_threshold(&histogram(data)),
        }
    }

    /// Binarize with an explicit threshold `t`.
    pub fn binarize(&self, volume: &Volume<u8>, t: u8) -> BinaryMask {
        let inverted = self.inverted;
        BinaryMask::new(volume.data().mapv(|v| (v >= t) != inverted))
    }

    /// Binarize `volume`, returning the mask and the threshold used.
    pub fn apply(&self, volume: &Volume<u8>) -> Result<(BinaryMask, u8)> {
        let t = self.threshold_for(volume.data())?;
        Ok((self.binarize(volume, t), t))
    }
}

pub fn histogram<S, D>(data: &ArrayBase<S, D>) -> [usize; 256]
where
    S: Data<Elem = u8>,
    D: Dimension,
{
    let mut histogram = [0usize; 256];
    for &v in data.iter() {
        histogram[v as usize] += 1;
    }
    histogram
}

/// Otsu's method.
///
/// Picks the split `k` maximising the between-class variance of `[0, k]` and
/// `[k + 1, 255]` and returns `k + 1`, the smallest foreground intensity.
pub fn otsu_threshold(histogram: &[usize; 256]) -> Result<u8> {
    let total: usize = histogram.iter().sum();
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut best: Option<(f64, usize)> = None;
    let mut background = 0usize;
    let mut background_sum = 0.0f64;
    for (k, &count) in histogram.iter().enumerate() {
        background += count;
        if background == 0 {
            continue;
        }
        let foreground = total - background;
        if foreground == 0 {
            break;
        }
        background_sum += k as f64 * count as f64;

        let mean_background = background_sum / background as f64;
        let mean_foreground = (weighted_total - background_sum) / foreground as f64;
        let between = background as f64
            * foreground as f64
            * (mean_background - mean_foreground).powi(2);
        if best.is_none_or(|(variance, _)| between > variance) {
            best = Some((between, k));
        }
    }

    match best {
        Some((_, k)) => Ok((k + 1) as u8),
        None => {
            let value = histogram.iter().position(|&c| c > 0).unwrap_or_default();
            Err(Error::DegenerateHistogram(value as u8))
        }
    }
}
