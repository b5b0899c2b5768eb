//! Caller-supplied cache of expensive, input-invariant artifacts.
//!
//! A field that is `Some` is treated as ground truth and the matching
//! computation is skipped entirely. No consistency checking is performed
//! against the inversion's current inputs; asserting that a preloaded
//! artifact is still valid is the caller's responsibility. The engine
//! never mutates a `Preloads` value.

use ndarray::Array2;

#[derive(Debug, Clone, Default)]
pub struct Preloads {
    /// Regularization matrix H, already block-diagonal for multi-object
    /// inversions.
    pub regularization_matrix: Option<Array2<f64>>,
    /// Evidence term ln det H matching `regularization_matrix`.
    pub log_det_regularization_matrix_term: Option<f64>,
    /// Border-relocated source grid, consumed by the caller's grid layer
    /// when rebuilding mappers; the solver itself never reads it.
    pub relocated_grid: Option<Array2<f64>>,
    /// Curvature matrix F, bypassing mapping/convolution assembly.
    pub curvature_matrix: Option<Array2<f64>>,
}

impl Preloads {
    pub fn new() -> Self {
        Self::default()
    }
}
