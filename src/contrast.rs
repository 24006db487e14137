use crate::error::{Error, Result};
use crate::volume::{Volume, Voxel, min_max};

use ndarray::{Array, ArrayBase, Data, Dimension};
use serde::{Deserialize, Serialize};

// Bins beyond this make the lookup table larger than the data it equalizes
const MAX_HISTOGRAM_BINS: f64 = (1 << 20) as f64;
// Floating-point intensities are binned uniformly over the observed range
const FLOAT_HISTOGRAM_BINS: usize = 4096;

/// Histogram equalization onto `[lo, hi]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContrastEnhancer {
    pub lo: i32,
    pub hi: i32,
}

impl Default for ContrastEnhancer {
    fn default() -> Self {
        Self { lo: 0, hi: 255 }
    }
}

impl ContrastEnhancer {
    pub fn validate(&self) -> Result<()> {
        if self.lo >= self.hi {
            return Err(Error::InvalidParameter(format!(
                "contrast output range [{}, {}] is empty",
                self.lo, self.hi
            )));
        }
        Ok(())
    }

    pub fn apply<T: Voxel>(&self, volume: &Volume<T>) -> Result<Volume<T>> {
        Ok(volume.derive(self.equalize(volume.data())?))
    }

    /// Equalize an array of any dimensionality (a whole volume or a single slice).
    ///
    /// Every intensity `v` is mapped to `lo + round((hi - lo) * cdf(v))`. Integer
    /// voxels get one histogram bin per value; floating-point voxels are binned into
    /// 4096 levels across the observed range. Input holding a single intensity is
    /// returned unchanged.
    pub fn equalize<T, S, D>(&self, data: &ArrayBase<S, D>) -> Result<Array<T, D>>
    where
        T: Voxel,
        S: Data<Elem = T>,
        D: Dimension,
    {
        self.validate()?;

        let Some((min, max)) = min_max(data.iter().map(|&v| intensity(v))) else {
            return Ok(data.to_owned());
        };
        if min == max {
            return Ok(data.to_owned());
        }

        let (bins, scale) = if T::INTEGRAL {
            let bins = max - min + 1.0;
            if bins > MAX_HISTOGRAM_BINS {
                return Err(Error::InvalidParameter(format!(
                    "intensity range {min}..={max} is too wide to equalize"
                )));
            }
            (bins as usize, 1.0)
        } else {
            (
                FLOAT_HISTOGRAM_BINS,
                (FLOAT_HISTOGRAM_BINS - 1) as f64 / (max - min),
            )
        };
        let bin_of = |v: T| (((intensity(v) - min) * scale).round() as usize).min(bins - 1);

        let mut histogram = vec![0usize; bins];
        for &v in data.iter() {
            histogram[bin_of(v)] += 1;
        }

        let total = data.len() as f64;
        let lo = f64::from(self.lo);
        let span = f64::from(self.hi) - lo;
        let mut cumulative = 0usize;
        let lut: Vec<T> = histogram
            .iter()
            .map(|&count| {
                cumulative += count;
                let cdf = cumulative as f64 / total;
                T::from_f64(lo + (span * cdf).round())
            })
            .collect();

        Ok(data.mapv(|v| lut[bin_of(v)]))
    }
}

#[inline]
fn intensity<T: Voxel>(value: T) -> f64 {
    value.to_f64().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2, Array3};

    #[test]
    fn single_valued_volume_is_unchanged() {
        let volume = Volume::from_data(Array3::<i16>::from_elem((2, 4, 4), -1000));
        let equalized = ContrastEnhancer::default()
            .apply(&volume)
            .expect("valid range");
        assert_eq!(equalized.data(), volume.data());
    }

    #[test]
    fn two_levels_map_by_cumulative_fraction() {
        let slice = Array2::from_shape_fn((4, 4), |(y, _)| if y == 0 { 500i16 } else { 0 });
        let equalized = ContrastEnhancer { lo: 0, hi: 255 }
            .equalize(&slice)
            .expect("valid range");
        // 12 of 16 pixels are background: round(255 * 0.75) = 191
        assert_eq!(equalized[[1, 0]], 191);
        assert_eq!(equalized[[0, 0]], 255);
    }

    #[test]
    fn output_is_monotonic_and_inside_range() {
        let data = Array3::from_shape_fn((3, 7, 5), |(z, y, x)| ((z * 35 + y * 5 + x) * 13 % 97) as i16 - 40);
        let enhancer = ContrastEnhancer { lo: 100, hi: 4095 };
        let equalized = enhancer.equalize(&data).expect("valid range");

        let mut pairs: Vec<(i16, i16)> = data.iter().copied().zip(equalized.iter().copied()).collect();
        pairs.sort_unstable();
        assert!(pairs.windows(2).all(|w| w[0].1 <= w[1].1));
        assert!(equalized.iter().all(|&v| (100..=4095).contains(&v)));
        assert_eq!(pairs.last().map(|p| p.1), Some(4095));
    }

    #[test]
    fn empty_range_is_rejected() {
        let data = Array2::<u8>::zeros((2, 2));
        let result = ContrastEnhancer { lo: 10, hi: 10 }.equalize(&data);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn fractional_intensities_keep_their_levels() {
        let ramp = Array1::from_shape_fn(10, |i| i as f32 / 10.0);
        let equalized = ContrastEnhancer::default()
            .equalize(&ramp)
            .expect("valid range");
        assert!(equalized.windows(2).into_iter().all(|w| w[0] < w[1]), "{equalized}");
        assert!((25.0..=26.0).contains(&equalized[0]));
        assert_eq!(equalized[9], 255.0);

        // Spread of less than one unit is still equalized
        let narrow = Array1::from(vec![0.1f64, 0.2, 0.3, 0.4]);
        let equalized = ContrastEnhancer::default()
            .equalize(&narrow)
            .expect("valid range");
        assert_eq!(equalized.to_vec(), vec![64.0, 128.0, 191.0, 255.0]);
    }

    #[test]
    fn full_i32_output_range_does_not_overflow() {
        let data = Array1::from(vec![0.0f64, 1.0]);
        let equalized = ContrastEnhancer {
            lo: i32::MIN,
            hi: i32::MAX,
        }
        .equalize(&data)
        .expect("valid range");
        assert_eq!(equalized.to_vec(), vec![0.0, f64::from(i32::MAX)]);
    }
}
