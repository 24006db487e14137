//! Binary erosion and dilation, applied in-plane on every axial slice.

use crate::enums::{MorphologyOp, StructuringElement};
use crate::error::{Error, Result};
use crate::threshold::BinaryMask;

use log::debug;
use ndarray::{Array3, Zip};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MorphologyStep {
    pub op: MorphologyOp,
    #[serde(default)]
    pub element: StructuringElement,
    pub radius: usize,
    #[serde(default = "default_iterations")]
    pub iterations: usize,
}

fn default_iterations() -> usize {
    1
}

impl MorphologyStep {
    pub fn new(op: MorphologyOp, element: StructuringElement, radius: usize, iterations: usize) -> Self {
        Self {
            op,
            element,
            radius,
            iterations,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.radius < 1 {
            return Err(Error::InvalidParameter(
                "structuring element radius must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn apply(&self, mask: &BinaryMask) -> Result<BinaryMask> {
        self.validate()?;
        if self.iterations == 0 {
            return Ok(mask.clone());
        }

        let offsets = self.offsets();
        let mut current = self.pass(mask.data(), &offsets);
        for _ in 1..self.iterations {
            current = self.pass(&current, &offsets);
        }
        Ok(BinaryMask::new(current))
    }

    /// In-plane `(dx, dy)` offsets covered by the structuring element, origin included.
    fn offsets(&self) -> Vec<(isize, isize)> {
        let r = self.radius as isize;
        let mut offsets = Vec::new();
        for dy in -r..=r {
            for dx in -r..=r {
                let inside = match self.element {
                    StructuringElement::Box => true,
                    StructuringElement::Disk => dx * dx + dy * dy <= r * r,
                };
                if inside {
                    offsets.push((dx, dy));
                }
            }
        }
        offsets
    }

    fn pass(&self, source: &Array3<bool>, offsets: &[(isize, isize)]) -> Array3<bool> {
        let (_, height, width) = source.dim();
        let mut output = Array3::from_elem(source.dim(), false);
        Zip::indexed(&mut output).par_for_each(|(z, y, x), value| {
            let mut neighbours = offsets.iter().filter_map(|&(dx, dy)| {
                let nx = x.checked_add_signed(dx).filter(|&nx| nx < width)?;
                let ny = y.checked_add_signed(dy).filter(|&ny| ny < height)?;
                Some(source[[z, ny, nx]])
            });
            *value = match self.op {
                MorphologyOp::Erode => neighbours.all(|v| v),
                MorphologyOp::Dilate => neighbours.any(|v| v),
            };
        });
        output
    }
}

/// Apply `steps` in order, e.g. an erosion followed by a dilation for an opening.
pub fn apply_steps(mask: BinaryMask, steps: &[MorphologyStep]) -> Result<BinaryMask> {
    steps.iter().try_fold(mask, |mask, step| {
        let next = step.apply(&mask)?;
        debug!(
            "{:?} x{} (r={}): {} -> {} foreground voxels",
            step.op,
            step.iterations,
            step.radius,
            mask.foreground_count(),
            next.foreground_count()
        );
        Ok(next)
    })
}
