//! Regularization schemes over the source-plane pixel graph.
//!
//! A scheme turns a mapper's adjacency into the smoothness operator H that
//! enters the normal equations as `(F + H) s = D`. The regularization
//! coefficient is baked into H here; nothing downstream reapplies it.

use crate::error::InversionError;
use crate::mapper::{GridMapper, PixelNeighbors, SplitCrossWeights};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Diagonal stabilizer guaranteeing positive-definiteness even for
/// pixels with no neighbors.
const DIAGONAL_EPS: f64 = 1e-8;

/// Closed set of supported schemes, selected once per linear object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Regularization {
    /// One coefficient smoothing every neighboring pixel pair.
    Constant { coefficient: f64 },
    /// Constant smoothing applied through each pixel's 4-point
    /// interpolation cross, which behaves better when source pixels have
    /// very unequal areas (irregular pixelizations).
    ConstantSplit { coefficient: f64 },
}

impl Regularization {
    pub fn coefficient(&self) -> f64 {
        match self {
            Regularization::Constant { coefficient } => *coefficient,
            Regularization::ConstantSplit { coefficient } => *coefficient,
        }
    }

    /// Per-pixel regularization weights; both schemes apply the single
    /// coefficient uniformly.
    pub fn regularization_weights_from(&self, mapper: &GridMapper) -> Array1<f64> {
        Array1::from_elem(mapper.pixels(), self.coefficient())
    }

    pub fn regularization_matrix_from(
        &self,
        mapper: &GridMapper,
    ) -> Result<Array2<f64>, InversionError> {
        match self {
            Regularization::Constant { coefficient } => Ok(constant_regularization_matrix_from(
                *coefficient,
                mapper.neighbors(),
            )),
            Regularization::ConstantSplit { coefficient } => {
                let cross = mapper
                    .split_cross()
                    .ok_or(InversionError::MissingSplitCross)?;
                let (mappings, sizes, weights) = reg_split_from(cross);
                let regularization_weights =
                    Array1::from_elem(cross.pixels(), *coefficient);
                Ok(pixel_splitted_regularization_matrix_from(
                    &regularization_weights,
                    &mappings,
                    &sizes,
                    &weights,
                ))
            }
        }
    }
}

/// Assemble H for constant regularization.
///
/// Each stored edge i -> j is pushed once: the squared coefficient is added
/// to the diagonal of i and subtracted from (i, j). With a symmetric
/// adjacency the assembled matrix is symmetric even though edges are only
/// walked in one direction; asymmetric adjacencies are not produced by any
/// grid layer and are pinned down by a property test rather than assumed.
pub fn constant_regularization_matrix_from(
    coefficient: f64,
    neighbors: &PixelNeighbors,
) -> Array2<f64> {
    let pixels = neighbors.pixels();
    let mut matrix = Array2::<f64>::zeros((pixels, pixels));
    let reg_coefficient = coefficient * coefficient;

    for i in 0..pixels {
        matrix[[i, i]] += DIAGONAL_EPS;
        for j in neighbors.neighbors_of(i) {
            matrix[[i, i]] += reg_coefficient;
            matrix[[i, j]] -= reg_coefficient;
        }
    }

    matrix
}

/// Turn raw cross-point interpolation weights into residual-operator rows.
///
/// Every row's weights are negated and the cross point's parent pixel gets
/// +1 in its own slot, appended in the reserved trailing column when the
/// interpolation stencil does not already contain it. Each adjusted row
/// then measures the difference between a pixel's value and the value
/// interpolated at its cross point, so the rows sum to zero.
pub fn reg_split_from(
    cross: &SplitCrossWeights,
) -> (Array2<usize>, Array1<usize>, Array2<f64>) {
    assert!(
        cross.weights.ncols() > 0,
        "split-cross rows must have at least one weight slot"
    );
    let mut mappings = cross.mappings.clone();
    let mut sizes = cross.sizes.clone();
    let mut weights = cross.weights.mapv(|w| -w);
    let spare_slot = weights.ncols() - 1;

    for i in 0..mappings.nrows() {
        let pixel_index = i / 4;
        let mut found = false;
        for j in 0..sizes[i] {
            if mappings[[i, j]] == pixel_index {
                weights[[i, j]] += 1.0;
                found = true;
            }
        }
        if !found {
            debug_assert!(
                sizes[i] <= spare_slot,
                "split-cross rows must reserve a trailing slot"
            );
            mappings[[i, spare_slot]] = pixel_index;
            weights[[i, spare_slot]] = 1.0;
            sizes[i] += 1;
        }
    }

    (mappings, sizes, weights)
}

/// Assemble H from residual-operator cross rows: the weighted sum of outer
/// products w wᵀ per cross point, scaled by the squared per-pixel
/// regularization weight, plus the diagonal stabilizer.
pub fn pixel_splitted_regularization_matrix_from(
    regularization_weights: &Array1<f64>,
    splitted_mappings: &Array2<usize>,
    splitted_sizes: &Array1<usize>,
    splitted_weights: &Array2<f64>,
) -> Array2<f64> {
    let pixels = splitted_mappings.nrows() / 4;
    let mut matrix = Array2::<f64>::zeros((pixels, pixels));

    for i in 0..pixels {
        matrix[[i, i]] += DIAGONAL_EPS;
        let reg_weight = regularization_weights[i] * regularization_weights[i];
        for j in 0..4 {
            let k = i * 4 + j;
            let size = splitted_sizes[k];
            for a in 0..size {
                let row_a = splitted_mappings[[k, a]];
                let weight_a = splitted_weights[[k, a]];
                for b in 0..size {
                    let row_b = splitted_mappings[[k, b]];
                    let weight_b = splitted_weights[[k, b]];
                    matrix[[row_a, row_b]] += weight_a * weight_b * reg_weight;
                }
            }
        }
    }

    matrix
}
