use image::{GrayImage, ImageBuffer};
use ndarray::{Array3, ArrayView2, Axis};
use num_traits::ToPrimitive;

/// Scalar types a [`Volume`] can hold.
pub trait Voxel: Copy + Default + PartialOrd + Send + Sync + ToPrimitive + std::fmt::Debug + 'static {
    /// Whether the type only holds whole numbers.
    const INTEGRAL: bool;

    /// Convert from `f64`, rounding to nearest and saturating for integer types.
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_integer_voxel {
    ($($t:ty),*) => {
        $(impl Voxel for $t {
            const INTEGRAL: bool = true;

            #[inline]
            fn from_f64(value: f64) -> Self {
                value.round() as $t
            }
        })*
    };
}

macro_rules! impl_float_voxel {
    ($($t:ty),*) => {
        $(impl Voxel for $t {
            const INTEGRAL: bool = false;

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $t
            }
        })*
    };
}

impl_integer_voxel!(u8, i8, u16, i16, u32, i32);
impl_float_voxel!(f32, f64);

/// A 3-D block of voxels with its physical geometry.
///
/// Data is laid out `(depth, height, width)`, i.e. indexed `[z, y, x]`. Spacing and
/// origin are given in millimetres in `(x, y, z)` order. A volume is never modified
/// after construction; processing stages produce new volumes.
#[derive(Clone, Debug, Default)]
pub struct Volume<T> {
    data: Array3<T>,
    spacing: (f32, f32, f32),
    origin: (f32, f32, f32),
}

impl<T: Voxel> Volume<T> {
    pub fn new(data: Array3<T>, spacing: (f32, f32, f32), origin: (f32, f32, f32)) -> Self {
        Self {
            data,
            spacing,
            origin,
        }
    }

    /// Volume with unit spacing at the origin, mostly useful for synthetic data.
    pub fn from_data(data: Array3<T>) -> Self {
        Self::new(data, (1.0, 1.0, 1.0), (0.0, 0.0, 0.0))
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get the dimensions of the volume in (x, y, z) order
    pub fn size_xyz(&self) -> (usize, usize, usize) {
        let (depth, height, width) = self.data.dim();
        (width, height, depth)
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<T> {
        &self.data
    }

    pub fn into_data(self) -> Array3<T> {
        self.data
    }

    pub fn spacing(&self) -> (f32, f32, f32) {
        self.spacing
    }

    pub fn origin(&self) -> (f32, f32, f32) {
        self.origin
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Wrap `data` into a volume sharing this volume's geometry.
    pub fn derive<U: Voxel>(&self, data: Array3<U>) -> Volume<U> {
        debug_assert_eq!(data.dim(), self.data.dim());
        Volume::new(data, self.spacing, self.origin)
    }

    pub fn axial_slice(&self, z: usize) -> Option<ArrayView2<'_, T>> {
        (z < self.data.len_of(Axis(0))).then(|| self.data.index_axis(Axis(0), z))
    }

    /// Smallest and largest voxel value, `None` for an empty volume.
    pub fn min_max(&self) -> Option<(T, T)> {
        min_max(self.data.iter().copied())
    }
}

impl Volume<u8> {
    pub fn axial_image(&self, z: usize) -> Option<GrayImage> {
        let slice = self.axial_slice(z)?;
        slice_to_image(&slice, |&v| v)
    }
}

pub(crate) fn min_max<T: PartialOrd + Copy>(mut values: impl Iterator<Item = T>) -> Option<(T, T)> {
    let first = values.next()?;
    Some(values.fold((first, first), |(lo, hi), v| {
        (if v < lo { v } else { lo }, if v > hi { v } else { hi })
    }))
}

// Row-major 2-D slice to an 8-bit grayscale image
pub(crate) fn slice_to_image<T>(
    slice: &ArrayView2<'_, T>,
    to_u8: impl Fn(&T) -> u8,
) -> Option<GrayImage> {
    let (height, width) = slice.dim();
    let pixel_data: Vec<u8> = slice.iter().map(to_u8).collect();
    ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
}
