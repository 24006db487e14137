//! Rank and mean smoothing over a box neighbourhood.
//!
//! Neighbourhoods are clamped at the volume borders: a voxel near the edge only sees
//! its in-bounds neighbours, nothing is mirrored or padded.

use crate::enums::FilterMode;
use crate::error::{Error, Result};
use crate::volume::{Volume, Voxel};

use ndarray::{Array3, ArrayView3, Zip, s};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseFilter {
    #[serde(default)]
    pub mode: FilterMode,
    /// Half-width of the neighbourhood in voxels, `(x, y, z)` order.
    pub radius: [usize; 3],
}

impl Default for NoiseFilter {
    fn default() -> Self {
        Self::isotropic(FilterMode::Median, 2)
    }
}

impl NoiseFilter {
    pub fn isotropic(mode: FilterMode, radius: usize) -> Self {
        Self {
            mode,
            radius: [radius; 3],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.radius.iter().any(|&r| r < 1) {
            return Err(Error::InvalidParameter(format!(
                "filter radius must be at least 1 on every axis, got {:?}",
                self.radius
            )));
        }
        Ok(())
    }

    /// Smooth `volume`, returning a new volume of the same shape and geometry.
    pub fn apply<T: Voxel>(&self, volume: &Volume<T>) -> Result<Volume<T>> {
        self.validate()?;

        let source = volume.data();
        let mut output = Array3::<T>::default(source.dim());
        Zip::indexed(&mut output).par_for_each(|index, value| {
            let window = self.window(source, index);
            *value = match self.mode {
                FilterMode::Median => median(window.iter().copied()),
                FilterMode::Mean => mean(window.iter().copied()),
            };
        });

        Ok(volume.derive(output))
    }

    fn window<'a, T>(
        &self,
        source: &'a Array3<T>,
        (z, y, x): (usize, usize, usize),
    ) -> ArrayView3<'a, T> {
        let (depth, height, width) = source.dim();
        let [rx, ry, rz] = self.radius;
        source.slice(s![
            z.saturating_sub(rz)..(z + rz + 1).min(depth),
            y.saturating_sub(ry)..(y + ry + 1).min(height),
            x.saturating_sub(rx)..(x + rx + 1).min(width)
        ])
    }
}

/// Median of the values; an even count yields the mean of the two middle values.
fn median<T: Voxel>(values: impl Iterator<Item = T>) -> T {
    let mut values: Vec<T> = values.collect();
    let n = values.len();
    if n == 0 {
        return T::default();
    }
    values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if n % 2 == 1 {
        values[n / 2]
    } else {
        let lo = values[n / 2 - 1].to_f64().unwrap_or_default();
        let hi = values[n / 2].to_f64().unwrap_or_default();
        T::from_f64((lo + hi) / 2.0)
    }
}

fn mean<T: Voxel>(values: impl Iterator<Item = T>) -> T {
    let (sum, count) = values.fold((0.0f64, 0usize), |(sum, count), v| {
        (sum + v.to_f64().unwrap_or_default(), count + 1)
    });
    if count == 0 {
        T::default()
    } else {
        T::from_f64(sum / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_radius_is_rejected() {
        let volume = Volume::from_data(Array3::<i16>::zeros((3, 3, 3)));
        let filter = NoiseFilter {
            mode: FilterMode::Median,
            radius: [1, 0, 1],
        };
        assert!(matches!(
            filter.apply(&volume),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn constant_volume_is_a_fixed_point() {
        let volume = Volume::from_data(Array3::<i16>::from_elem((4, 6, 5), 317));
        for mode in [FilterMode::Median, FilterMode::Mean] {
            let filter = NoiseFilter::isotropic(mode, 2);
            let once = filter.apply(&volume).expect("valid filter");
            let twice = filter.apply(&once).expect("valid filter");
            assert_eq!(once.data(), volume.data());
            assert_eq!(twice.data(), volume.data());
        }
    }

    #[test]
    fn median_removes_isolated_spike() {
        let mut data = Array3::<i16>::from_elem((3, 5, 5), 10);
        data[[1, 2, 2]] = 1000;
        let filtered = NoiseFilter::isotropic(FilterMode::Median, 1)
            .apply(&Volume::from_data(data))
            .expect("valid filter");
        assert!(filtered.data().iter().all(|&v| v == 10));
    }

    #[test]
    fn border_voxels_use_only_in_bounds_neighbours() {
        // 1x1x3 line: the corner neighbourhood holds two voxels, [0, 4] -> mean 2
        let data = Array3::from_shape_vec((1, 1, 3), vec![0i16, 4, 8]).expect("shape");
        let volume = Volume::from_data(data);

        let mean = NoiseFilter::isotropic(FilterMode::Mean, 1)
            .apply(&volume)
            .expect("valid filter");
        assert_eq!(mean.data().as_slice(), Some(&[2i16, 4, 6][..]));

        let median = NoiseFilter::isotropic(FilterMode::Median, 1)
            .apply(&volume)
            .expect("valid filter");
        assert_eq!(median.data().as_slice(), Some(&[2i16, 4, 6][..]));
    }

    #[test]
    fn median_follows_slice_profile_with_clamped_depth() {
        let data = Array3::from_shape_fn((4, 3, 3), |(z, _, _)| z as i16 * 100);
        let filtered = NoiseFilter::isotropic(FilterMode::Median, 1)
            .apply(&Volume::from_data(data))
            .expect("valid filter");
        let column: Vec<i16> = (0..4).map(|z| filtered.data()[[z, 1, 1]]).collect();
        assert_eq!(column, vec![50, 100, 200, 250]);
    }
}
