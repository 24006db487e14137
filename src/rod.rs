//! Rod cylinders from per-slice circles, and their voxel samples.

use crate::error::{Error, Result};
use crate::hough::Circle;
use crate::region::Region;
use crate::volume::{Volume, Voxel};

use serde::{Deserialize, Serialize};

/// Circles from consecutive slices that belong to the same rod.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Cylinder {
    /// 1-based rod number, assigned left to right
    pub id: usize,
    pub cx: f32,
    pub cy: f32,
    pub radius: f32,
    pub first_slice: usize,
    pub last_slice: usize,
    pub circles: Vec<Circle>,
}

impl Cylinder {
    fn from_circle(circle: Circle) -> Self {
        Self {
            id: 0,
            cx: circle.cx,
            cy: circle.cy,
            radius: circle.radius,
            first_slice: circle.slice,
            last_slice: circle.slice,
            circles: vec![circle],
        }
    }

    fn absorb(&mut self, circle: Circle) {
        self.circles.push(circle);
        self.first_slice = self.first_slice.min(circle.slice);
        self.last_slice = self.last_slice.max(circle.slice);

        // Vote-weighted center, plain mean radius
        let weight: f32 = self.circles.iter().map(|c| c.votes.max(1) as f32).sum();
        self.cx = self.circles.iter().map(|c| c.cx * c.votes.max(1) as f32).sum::<f32>() / weight;
        self.cy = self.circles.iter().map(|c| c.cy * c.votes.max(1) as f32).sum::<f32>() / weight;
        self.radius = self.circles.iter().map(|c| c.radius).sum::<f32>() / self.circles.len() as f32;
    }

    fn has_slice(&self, slice: usize) -> bool {
        self.circles.iter().any(|c| c.slice == slice)
    }

    /// Number of slices spanned, gaps included.
    pub fn slice_count(&self) -> usize {
        self.last_slice - self.first_slice + 1
    }

    /// Slices inside the span on which this rod was not detected.
    pub fn missing_slices(&self) -> Vec<usize> {
        (self.first_slice..=self.last_slice)
            .filter(|&z| !self.has_slice(z))
            .collect()
    }

    /// Pixel bounds `(x0, x1, y0, y1)`, inclusive, of a disk of radius `radius`
    /// around the center, clipped to a `width` x `height` slice.
    fn pixel_bounds(&self, radius: f32, width: usize, height: usize) -> Option<(usize, usize, usize, usize)> {
        if width == 0 || height == 0 {
            return None;
        }
        let x0 = (self.cx - radius).ceil().max(0.0) as usize;
        let y0 = (self.cy - radius).ceil().max(0.0) as usize;
        let x1 = (self.cx + radius).floor();
        let y1 = (self.cy + radius).floor();
        if x1 < 0.0 || y1 < 0.0 {
            return None;
        }
        let x1 = (x1 as usize).min(width - 1);
        let y1 = (y1 as usize).min(height - 1);
        (x0 <= x1 && y0 <= y1).then_some((x0, x1, y0, y1))
    }
}

/// A rod's cylinder and the intensities of every voxel it encloses.
#[derive(Clone, Debug, PartialEq)]
pub struct RodSample {
    pub cylinder: Cylinder,
    pub values: Vec<f64>,
}

impl RodSample {
    pub fn id(&self) -> usize {
        self.cylinder.id
    }

    pub fn voxel_count(&self) -> usize {
        self.values.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RodExtractor {
    /// Maximum center distance in pixels for circles on different slices to merge.
    pub center_tolerance: f32,
    /// Scale applied to the detected radius before sampling; below 1 keeps the
    /// sample clear of the rod wall.
    pub radius_scale: f32,
    /// Cylinders detected on fewer slices are dropped.
    pub min_slices: usize,
}

impl Default for RodExtractor {
    fn default() -> Self {
        Self {
            center_tolerance: 2.0,
            radius_scale: 1.0,
            min_slices: 1,
        }
    }
}

impl RodExtractor {
    pub fn validate(&self) -> Result<()> {
        if !(self.center_tolerance >= 0.0 && self.center_tolerance.is_finite()) {
            return Err(Error::InvalidParameter(format!(
                "center tolerance {} must be a non-negative number",
                self.center_tolerance
            )));
        }
        if !(self.radius_scale > 0.0 && self.radius_scale.is_finite()) {
            return Err(Error::InvalidParameter(format!(
                "radius scale {} must be positive",
                self.radius_scale
            )));
        }
        if self.min_slices < 1 {
            return Err(Error::InvalidParameter("min_slices must be at least 1".into()));
        }
        Ok(())
    }

    /// Merge per-slice detections into cylinders.
    ///
    /// Circles are taken strongest first; each joins the first cylinder whose center is
    /// within `center_tolerance` and that has nothing on its slice yet. Cylinders are
    /// returned ordered by center x (then y) and numbered from 1.
    pub fn aggregate(&self, per_slice: &[Vec<Circle>]) -> Vec<Cylinder> {
        let mut circles: Vec<Circle> = per_slice.iter().flatten().copied().collect();
        circles.sort_by(|a, b| b.votes.cmp(&a.votes).then(a.slice.cmp(&b.slice)));

        let mut cylinders: Vec<Cylinder> = Vec::new();
        for circle in circles {
            let joined = cylinders.iter_mut().find(|cylinder| {
                !cylinder.has_slice(circle.slice)
                    && (cylinder.cx - circle.cx).hypot(cylinder.cy - circle.cy)
                        <= self.center_tolerance
            });
            match joined {
                Some(cylinder) => cylinder.absorb(circle),
                None => cylinders.push(Cylinder::from_circle(circle)),
            }
        }

        cylinders.retain(|cylinder| cylinder.circles.len() >= self.min_slices);
        cylinders.sort_by(|a, b| a.cx.total_cmp(&b.cx).then(a.cy.total_cmp(&b.cy)));
        for (i, cylinder) in cylinders.iter_mut().enumerate() {
            cylinder.id = i + 1;
            cylinder.circles.sort_by_key(|c| c.slice);
        }
        cylinders
    }

    fn sample_radius(&self, cylinder: &Cylinder) -> f32 {
        cylinder.radius * self.radius_scale
    }

    /// Voxels of `volume` inside the cylinder: `(x - cx)² + (y - cy)² ≤ r²` on every
    /// slice of its span.
    pub fn extract<T: Voxel>(&self, volume: &Volume<T>, cylinder: &Cylinder) -> RodSample {
        let (depth, height, width) = volume.dim();
        let radius = self.sample_radius(cylinder);
        let r2 = radius * radius;
        let mut values = Vec::new();

        if let Some((x0, x1, y0, y1)) = cylinder.pixel_bounds(radius, width, height) {
            let data = volume.data();
            for z in cylinder.first_slice..=cylinder.last_slice.min(depth.saturating_sub(1)) {
                for y in y0..=y1 {
                    let dy = y as f32 - cylinder.cy;
                    for x in x0..=x1 {
                        let dx = x as f32 - cylinder.cx;
                        if dx * dx + dy * dy <= r2 {
                            values.push(data[[z, y, x]].to_f64().unwrap_or_default());
                        }
                    }
                }
            }
        }

        RodSample {
            cylinder: cylinder.clone(),
            values,
        }
    }

    /// Axis-aligned region enclosing the sampled voxels of `cylinder` in `volume`.
    pub fn bounding_region<T: Voxel>(&self, volume: &Volume<T>, cylinder: &Cylinder) -> Option<Region> {
        let (depth, height, width) = volume.dim();
        if cylinder.first_slice >= depth {
            return None;
        }
        let (x0, x1, y0, y1) = cylinder.pixel_bounds(self.sample_radius(cylinder), width, height)?;
        let last = cylinder.last_slice.min(depth - 1);
        Some(Region::new(
            [x0, y0, cylinder.first_slice],
            [x1 - x0 + 1, y1 - y0 + 1, last - cylinder.first_slice + 1],
        ))
    }
}
