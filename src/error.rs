use crate::faer_ndarray::FaerLinalgError;
use thiserror::Error;

/// Failures surfaced by the inversion engine.
///
/// Configuration mismatches are raised eagerly at construction; numerical
/// singularities are raised lazily at first access of the affected derived
/// quantity. A failed solve never yields a partial or zero-filled
/// reconstruction.
#[derive(Debug, Error)]
pub enum InversionError {
    #[error(
        "w-tilde noise-map snapshot ({expected:.6e}) does not match the noise map supplied at \
        construction (offending entry {found:.6e}); the precomputed kernel cannot be reused"
    )]
    WTildeNoiseMapMismatch { expected: f64, found: f64 },

    #[error(
        "regularization matrix is not positive definite: both the sparse LU and the dense \
        Cholesky log-determinant paths failed"
    )]
    RegularizationMatrixNotPositiveDefinite,

    #[error(
        "factorization of the curvature-regularization matrix failed; the system \
        (F + H) s = D has no stable solution: {0}"
    )]
    CurvatureRegMatrixNotPositiveDefinite(FaerLinalgError),

    #[error("regularization scheme requires split-cross weights but the mapper supplies none")]
    MissingSplitCross,

    #[error(
        "expected one regularization scheme per pixelized linear object \
        ({linear_objs}), got {regularizations}"
    )]
    MismatchedLengths {
        linear_objs: usize,
        regularizations: usize,
    },

    #[error("data does not match the linear equation variant: {0}")]
    DataMismatch(&'static str),

    #[error("inversion has no pixelized linear objects; nothing to reconstruct")]
    EmptyLinearObjList,

    #[error("linear algebra failure: {0}")]
    Linalg(#[from] FaerLinalgError),
}
