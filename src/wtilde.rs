//! Precomputed w-tilde kernel for imaging inversions.
//!
//! The kernel folds the PSF and the noise map into a single data-space
//! operator so the curvature matrix can be formed as `Mᵀ W̃ M` on the
//! unblurred mapping matrix, skipping the per-solve convolution. The
//! kernel is only valid for the noise map it was built under; that
//! snapshot is checked eagerly whenever the kernel is attached to a
//! linear equation.

use crate::error::InversionError;
use ndarray::{Array1, Array2};

/// Per-entry tolerance for the noise-map snapshot comparison.
const NOISE_MAP_TOL: f64 = 1e-8;

#[derive(Debug, Clone)]
pub struct WTildeImaging {
    curvature: Array2<f64>,
    noise_map_value: f64,
}

impl WTildeImaging {
    /// `curvature` is the (data_pixels, data_pixels) kernel W̃;
    /// `noise_map_value` is the (uniform) noise level it was computed for.
    pub fn new(curvature: Array2<f64>, noise_map_value: f64) -> Self {
        Self {
            curvature,
            noise_map_value,
        }
    }

    pub fn curvature(&self) -> &Array2<f64> {
        &self.curvature
    }

    pub fn noise_map_value(&self) -> f64 {
        self.noise_map_value
    }

    /// Reject reuse of the kernel under a noise map it was not built for.
    /// Every entry must match the snapshot within tolerance.
    pub fn check_noise_map(&self, noise_map: &Array1<f64>) -> Result<(), InversionError> {
        for &sigma in noise_map.iter() {
            if (sigma - self.noise_map_value).abs() > NOISE_MAP_TOL {
                return Err(InversionError::WTildeNoiseMapMismatch {
                    expected: self.noise_map_value,
                    found: sigma,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn matching_noise_map_passes() {
        let w_tilde = WTildeImaging::new(Array2::eye(3), 1.0);
        assert!(w_tilde.check_noise_map(&Array1::ones(3)).is_ok());
    }

    #[test]
    fn mismatched_noise_map_is_rejected() {
        let w_tilde = WTildeImaging::new(Array2::eye(3), 2.0);
        let result = w_tilde.check_noise_map(&Array1::ones(3));
        assert!(matches!(
            result,
            Err(InversionError::WTildeNoiseMapMismatch { .. })
        ));
    }
}
