//! Circle Hough transform on binary slices.
//!
//! Every edge pixel of the mask votes for all centers that would put it on a circle
//! of radius `r`. The voting locus for `r` is the ring of integer offsets with
//! `(r - 1)² < dx² + dy² ≤ r²`, which is exactly where the boundary pixels of a
//! digital disk of radius `r` lie, so a clean disk collects one vote per boundary
//! pixel at its true center and radius.
//!
//! Each radius owns its accumulator plane; planes are filled in parallel and never
//! shared between workers.

use crate::error::{Error, Result};
use crate::threshold::BinaryMask;

use log::{debug, trace};
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

/// A circle found on one axial slice.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    /// Center column in pixels
    pub cx: f32,
    /// Center row in pixels
    pub cy: f32,
    pub radius: f32,
    /// Accumulator count at the peak
    pub votes: u32,
    /// Votes divided by the size of the voting locus, in [0, 1]
    pub score: f32,
    pub slice: usize,
}

impl Circle {
    pub fn center_distance(&self, other: &Circle) -> f32 {
        (self.cx - other.cx).hypot(self.cy - other.cy)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircleDetector {
    pub min_radius: usize,
    pub max_radius: usize,
    /// Minimum fraction of the voting locus a peak must collect.
    pub min_score: f32,
    /// Peaks closer than `radius * overlap_factor` to a stronger peak are dropped.
    pub overlap_factor: f32,
    pub max_circles: Option<usize>,
}

impl Default for CircleDetector {
    fn default() -> Self {
        Self {
            min_radius: 4,
            max_radius: 20,
            min_score: 0.5,
            overlap_factor: 1.0,
            max_circles: None,
        }
    }
}

struct AccumulatorPlane {
    radius: usize,
    locus_len: usize,
    votes: Array2<u32>,
}

impl CircleDetector {
    pub fn with_radius_range(min_radius: usize, max_radius: usize) -> Self {
        Self {
            min_radius,
            max_radius,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_radius < 1 || self.min_radius > self.max_radius {
            return Err(Error::InvalidParameter(format!(
                "circle radius range [{}, {}] is invalid",
                self.min_radius, self.max_radius
            )));
        }
        if !(self.min_score > 0.0 && self.min_score <= 1.0) {
            return Err(Error::InvalidParameter(format!(
                "circle min_score {} is outside (0, 1]",
                self.min_score
            )));
        }
        if !(self.overlap_factor >= 0.0 && self.overlap_factor.is_finite()) {
            return Err(Error::InvalidParameter(format!(
                "circle overlap_factor {} must be a non-negative number",
                self.overlap_factor
            )));
        }
        Ok(())
    }

    /// Detect circles on one slice, strongest first.
    ///
    /// An empty result means no rod was found on this slice; it is not an error.
    pub fn detect(&self, slice: &ArrayView2<'_, bool>, slice_index: usize) -> Result<Vec<Circle>> {
        self.validate()?;

        let edges = edge_pixels(slice);
        if edges.is_empty() {
            return Ok(Vec::new());
        }

        let planes: Vec<AccumulatorPlane> = (self.min_radius..=self.max_radius)
            .into_par_iter()
            .map(|radius| accumulate(&edges, radius, slice.dim()))
            .collect();

        let mut peaks: Vec<Circle> = (0..planes.len())
            .into_par_iter()
            .flat_map_iter(|i| self.plane_peaks(&planes, i, slice_index))
            .collect();
        peaks.sort_by(by_strength);

        let circles = self.suppress_overlaps(peaks);
        trace!(
            "slice {slice_index}: {} edge pixels, {} circles",
            edges.len(),
            circles.len()
        );
        Ok(circles)
    }

    /// Run [`CircleDetector::detect`] on every axial slice of `mask`.
    ///
    /// `cancel` is checked before each slice.
    pub fn detect_volume(
        &self,
        mask: &BinaryMask,
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<Vec<Circle>>> {
        self.validate()?;
        let mut per_slice = Vec::with_capacity(mask.depth());
        for (z, slice) in mask.data().outer_iter().enumerate() {
            if cancel.is_some_and(|flag| flag.load(AtomicOrdering::Relaxed)) {
                return Err(Error::Cancelled);
            }
            let circles = self.detect(&slice, z)?;
            debug!("slice {z}: {} circle(s)", circles.len());
            per_slice.push(circles);
        }
        Ok(per_slice)
    }

    // Local maxima of plane `i` over the 3x3x3 (r, cy, cx) neighbourhood
    fn plane_peaks(&self, planes: &[AccumulatorPlane], i: usize, slice_index: usize) -> Vec<Circle> {
        let plane = &planes[i];
        let (height, width) = plane.votes.dim();
        let neighbours = &planes[i.saturating_sub(1)..(i + 2).min(planes.len())];
        let mut peaks = Vec::new();

        for ((y, x), &votes) in plane.votes.indexed_iter() {
            if votes == 0 {
                continue;
            }
            let score = votes as f32 / plane.locus_len as f32;
            if score < self.min_score {
                continue;
            }
            let is_peak = neighbours.iter().all(|other| {
                (y.saturating_sub(1)..(y + 2).min(height)).all(|ny| {
                    (x.saturating_sub(1)..(x + 2).min(width))
                        .all(|nx| other.votes[[ny, nx]] <= votes)
                })
            });
            if is_peak {
                peaks.push(Circle {
                    cx: x as f32,
                    cy: y as f32,
                    radius: plane.radius as f32,
                    votes,
                    score,
                    slice: slice_index,
                });
            }
        }
        peaks
    }

    fn suppress_overlaps(&self, peaks: Vec<Circle>) -> Vec<Circle> {
        let mut kept: Vec<Circle> = Vec::new();
        for peak in peaks {
            let overlaps = kept
                .iter()
                .any(|k| peak.center_distance(k) <= k.radius * self.overlap_factor);
            if !overlaps {
                kept.push(peak);
                if self.max_circles.is_some_and(|max| kept.len() >= max) {
                    break;
                }
            }
        }
        kept
    }
}

// Votes descending; ties go to the higher score, then the smaller radius, then raster order
fn by_strength(a: &Circle, b: &Circle) -> Ordering {
    b.votes
        .cmp(&a.votes)
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| a.radius.total_cmp(&b.radius))
        .then_with(|| a.cy.total_cmp(&b.cy))
        .then_with(|| a.cx.total_cmp(&b.cx))
}

/// Foreground pixels with at least one 4-neighbour that is background or off-slice.
pub fn edge_pixels(slice: &ArrayView2<'_, bool>) -> Vec<(usize, usize)> {
    let (height, width) = slice.dim();
    let is_foreground = |x: Option<usize>, y: Option<usize>| match (x, y) {
        (Some(x), Some(y)) if x < width && y < height => slice[[y, x]],
        _ => false,
    };

    slice
        .indexed_iter()
        .filter(|&(_, &v)| v)
        .filter(|&((y, x), _)| {
            !is_foreground(x.checked_sub(1), Some(y))
                || !is_foreground(Some(x + 1), Some(y))
                || !is_foreground(Some(x), y.checked_sub(1))
                || !is_foreground(Some(x), Some(y + 1))
        })
        .map(|((y, x), _)| (x, y))
        .collect()
}

/// Offsets `(dx, dy)` with `(r - 1)² < dx² + dy² ≤ r²`.
pub fn circle_offsets(radius: usize) -> Vec<(isize, isize)> {
    let r = radius as isize;
    let outer = r * r;
    let inner = (r - 1) * (r - 1);
    let mut offsets = Vec::with_capacity(8 * radius);
    for dy in -r..=r {
        for dx in -r..=r {
            let d2 = dx * dx + dy * dy;
            if d2 > inner && d2 <= outer {
                offsets.push((dx, dy));
            }
        }
    }
    offsets
}

fn accumulate(edges: &[(usize, usize)], radius: usize, (height, width): (usize, usize)) -> AccumulatorPlane {
    let offsets = circle_offsets(radius);
    let mut votes = Array2::<u32>::zeros((height, width));
    for &(ex, ey) in edges {
        for &(dx, dy) in &offsets {
            let cx = ex.checked_add_signed(dx).filter(|&cx| cx < width);
            let cy = ey.checked_add_signed(dy).filter(|&cy| cy < height);
            if let (Some(cx), Some(cy)) = (cx, cy) {
                votes[[cy, cx]] += 1;
            }
        }
    }
    AccumulatorPlane {
        radius,
        locus_len: offsets.len(),
        votes,
    }
}
