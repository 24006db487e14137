use crate::error::{Error, Result};
use crate::volume::{Volume, Voxel, min_max};

use ndarray::{Array, ArrayBase, Data, Dimension};
use serde::{Deserialize, Serialize};

/// Linear rescale to 8-bit grayscale.
///
/// Without a window the observed minimum and maximum map to 0 and 255. With an
/// explicit `(min, max)` window values outside it are clamped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Quantizer {
    #[serde(default)]
    pub window: Option<(f64, f64)>,
}

impl Quantizer {
    pub fn with_window(min: f64, max: f64) -> Self {
        Self {
            window: Some((min, max)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.window {
            Some((min, max)) if !(min < max) => Err(Error::InvalidParameter(format!(
                "quantization window [{min}, {max}] is empty"
            ))),
            _ => Ok(()),
        }
    }

    pub fn apply<T: Voxel>(&self, volume: &Volume<T>) -> Result<Volume<u8>> {
        Ok(volume.derive(self.quantize(volume.data())?))
    }

    pub fn quantize<T, S, D>(&self, data: &ArrayBase<S, D>) -> Result<Array<u8, D>>
    where
        T: Voxel,
        S: Data<Elem = T>,
        D: Dimension,
    {
        self.validate()?;

        let window = match self.window {
            Some(window) => Some(window),
            None => min_max(data.iter().map(|v| v.to_f64().unwrap_or_default())),
        };
        let Some((min, max)) = window else {
            return Ok(data.mapv(|_| 0));
        };
        if max <= min {
            return Ok(data.mapv(|_| 0));
        }

        let scale = 255.0 / (max - min);
        Ok(data.mapv(|v| {
            let v = v.to_f64().unwrap_or_default();
            ((v - min) * scale).round().clamp(0.0, 255.0) as u8
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array3};

    #[test]
    fn observed_range_spans_full_byte() {
        let data = Array1::from(vec![-1024i16, 0, 1024, 3071]);
        let quantized = Quantizer::default().quantize(&data).expect("no window");
        assert_eq!(quantized[0], 0);
        assert_eq!(quantized[3], 255);
        assert!(quantized[1] < quantized[2]);
    }

    #[test]
    fn window_clamps_instead_of_wrapping() {
        let data = Array1::from(vec![-500i16, 0, 40, 100, 2000]);
        let quantized = Quantizer::with_window(0.0, 100.0)
            .quantize(&data)
            .expect("valid window");
        assert_eq!(quantized.to_vec(), vec![0, 0, 102, 255, 255]);
    }

    #[test]
    fn constant_volume_quantizes_to_zero() {
        let volume = Volume::from_data(Array3::<i16>::from_elem((2, 2, 2), 42));
        let quantized = Quantizer::default().apply(&volume).expect("no window");
        assert!(quantized.data().iter().all(|&v| v == 0));
    }

    #[test]
    fn inverted_window_is_rejected() {
        let data = Array1::from(vec![1u8, 2, 3]);
        let result = Quantizer::with_window(10.0, 5.0).quantize(&data);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }
}
