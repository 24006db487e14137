use crate::error::{Error, Result};
use crate::volume::{Volume, Voxel};

use ndarray::s;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned box in voxel index space, `(x, y, z)` order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub start: [usize; 3],
    pub size: [usize; 3],
}

impl Region {
    pub fn new(start: [usize; 3], size: [usize; 3]) -> Self {
        Self { start, size }
    }

    /// Region covering the whole of a volume with (x, y, z) size `dim`.
    pub fn whole(dim: (usize, usize, usize)) -> Self {
        Self::new([0, 0, 0], [dim.0, dim.1, dim.2])
    }

    pub fn end(&self) -> [usize; 3] {
        [
            self.start[0] + self.size[0],
            self.start[1] + self.size[1],
            self.start[2] + self.size[2],
        ]
    }

    pub fn voxel_count(&self) -> usize {
        self.size.iter().product()
    }

    pub fn fits(&self, dim: (usize, usize, usize)) -> bool {
        let limits = [dim.0, dim.1, dim.2];
        self.size.iter().all(|&n| n > 0)
            && (0..3).all(|axis| {
                self.start[axis]
                    .checked_add(self.size[axis])
                    .is_some_and(|end| end <= limits[axis])
            })
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "start ({}, {}, {}) size ({}, {}, {})",
            self.start[0], self.start[1], self.start[2], self.size[0], self.size[1], self.size[2]
        )
    }
}

impl<T: Voxel> Volume<T> {
    /// Copy `region` out of the volume.
    ///
    /// The origin of the result is moved to the region's first voxel so physical
    /// coordinates stay consistent with the source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if the region does not fit inside the volume.
    pub fn crop(&self, region: &Region) -> Result<Volume<T>> {
        let dim = self.size_xyz();
        if !region.fits(dim) {
            return Err(Error::OutOfBounds {
                region: *region,
                dim,
            });
        }

        let [x0, y0, z0] = region.start;
        let [x1, y1, z1] = region.end();
        let data = self.data().slice(s![z0..z1, y0..y1, x0..x1]).to_owned();

        let (sx, sy, sz) = self.spacing();
        let (ox, oy, oz) = self.origin();
        let origin = (
            ox + x0 as f32 * sx,
            oy + y0 as f32 * sy,
            oz + z0 as f32 * sz,
        );

        Ok(Volume::new(data, self.spacing(), origin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn ramp() -> Volume<i16> {
        let data = Array3::from_shape_fn((4, 5, 6), |(z, y, x)| (z * 100 + y * 10 + x) as i16);
        Volume::new(data, (0.5, 0.5, 2.0), (10.0, 20.0, 30.0))
    }

    #[test]
    fn crop_has_region_extent_and_shifted_origin() {
        let volume = ramp();
        let region = Region::new([1, 2, 3], [4, 3, 1]);
        let cropped = volume.crop(&region).expect("region fits");

        assert_eq!(cropped.size_xyz(), (4, 3, 1));
        assert_eq!(cropped.data()[[0, 0, 0]], 321);
        assert_eq!(cropped.data()[[0, 2, 3]], 344);

        let (ox, oy, oz) = cropped.origin();
        assert_relative_eq!(ox, 10.5);
        assert_relative_eq!(oy, 21.0);
        assert_relative_eq!(oz, 36.0);
    }

    #[test]
    fn crop_of_whole_volume_is_a_copy() {
        let volume = ramp();
        let cropped = volume.crop(&Region::whole(volume.size_xyz())).expect("fits");
        assert_eq!(cropped.data(), volume.data());
    }

    #[test]
    fn crop_outside_volume_fails_without_clamping() {
        let volume = ramp();
        for region in [
            Region::new([3, 0, 0], [4, 1, 1]),
            Region::new([0, 0, 0], [6, 5, 5]),
            Region::new([0, 5, 0], [1, 1, 1]),
            Region::new([0, 0, 0], [0, 1, 1]),
            Region::new([usize::MAX, 0, 0], [2, 1, 1]),
        ] {
            assert!(
                matches!(volume.crop(&region), Err(Error::OutOfBounds { .. })),
                "{region} should be rejected"
            );
        }
    }
}
