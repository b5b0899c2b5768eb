//! faer-backed linear algebra over `ndarray` containers.
//!
//! The inversion engine stores curvature and regularization matrices as
//! `ndarray::Array2<f64>` but runs every heavy kernel (GEMM, Cholesky,
//! self-adjoint eigendecomposition) through faer. The wrappers here expose
//! zero-copy views into ndarray storage where the memory layout permits and
//! fall back to compact owned copies otherwise.

use faer::linalg::solvers::{self, Llt, Solve};
use faer::{Mat, MatMut, MatRef, Side, get_global_parallelism};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("factorization failed")]
    FactorizationFailed,
    #[error("self-adjoint eigendecomposition failed: {0:?}")]
    SelfAdjointEigen(solvers::EvdError),
    #[error("Cholesky factorization failed: {0:?}")]
    Cholesky(solvers::LltError),
    #[error("failed to assemble sparse matrix from triplets")]
    SparseConstruction,
}

#[inline]
fn should_use_faer_matmul(m: usize, n: usize, k: usize) -> bool {
    // Stay on ndarray for tiny products; switch to faer GEMM once the
    // flop count justifies the dispatch overhead. Curvature matrices for
    // realistic pixelizations land far above both thresholds.
    const MIN_DIM: usize = 32;
    const MIN_FLOP_SCALE: usize = 64 * 64;
    (m >= MIN_DIM || n >= MIN_DIM || k >= MIN_DIM)
        && m.saturating_mul(n).saturating_mul(k) >= MIN_FLOP_SCALE
}

#[inline]
pub fn array2_to_mat_mut(array: &mut Array2<f64>) -> MatMut<'_, f64> {
    let (rows, cols) = array.dim();
    let strides = array.strides();
    let s0 = strides[0];
    let s1 = strides[1];
    // SAFETY: dimensions and strides are taken verbatim from the live
    // ndarray, which owns the storage for the duration of the borrow.
    unsafe { MatMut::from_raw_parts_mut(array.as_mut_ptr(), rows, cols, s0, s1) }
}

#[inline]
pub fn array1_to_col_mat_mut(array: &mut Array1<f64>) -> MatMut<'_, f64> {
    let len = array.len();
    let stride = array.strides()[0];
    // SAFETY: as above; the column stride is irrelevant for a single column.
    unsafe { MatMut::from_raw_parts_mut(array.as_mut_ptr(), len, 1, stride, 0) }
}

pub(crate) fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((mat.nrows(), mat.ncols()));
    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            out[[i, j]] = mat[(i, j)];
        }
    }
    out
}

fn diag_to_array(diag: faer::diag::DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    let mut out = Array1::<f64>::zeros(mat.nrows());
    for i in 0..mat.nrows() {
        out[i] = mat[(i, 0)];
    }
    out
}

/// Borrowed (or, for hostile strides, owned) faer view over an ndarray matrix.
pub struct FaerArrayView<'a> {
    ptr: *const f64,
    rows: usize,
    cols: usize,
    row_stride: isize,
    col_stride: isize,
    owned: Option<Array2<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let (rows, cols) = array.dim();
        let strides = array.strides();
        // Negative or zero strides can alias or reverse memory traversal,
        // which faer kernels do not tolerate; materialize a compact copy.
        if strides[0] <= 0 || strides[1] <= 0 {
            let owned = array.to_owned();
            let owned_strides = owned.strides();
            return Self {
                ptr: owned.as_ptr(),
                rows,
                cols,
                row_stride: owned_strides[0],
                col_stride: owned_strides[1],
                owned: Some(owned),
                _marker: PhantomData,
            };
        }

        Self {
            ptr: array.as_ptr(),
            rows,
            cols,
            row_stride: strides[0],
            col_stride: strides[1],
            owned: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        let (ptr, rows, cols, row_stride, col_stride) = if let Some(owned) = &self.owned {
            let strides = owned.strides();
            (
                owned.as_ptr(),
                owned.nrows(),
                owned.ncols(),
                strides[0],
                strides[1],
            )
        } else {
            (
                self.ptr,
                self.rows,
                self.cols,
                self.row_stride,
                self.col_stride,
            )
        };
        // SAFETY: the pointer/shape/strides come from a live ndarray view
        // with positive strides, or from the owned compact copy held by
        // this wrapper for the lifetime of the returned view.
        unsafe { MatRef::from_raw_parts(ptr, rows, cols, row_stride, col_stride) }
    }
}

/// Borrowed (or owned) faer column view over an ndarray vector.
pub struct FaerColView<'a> {
    ptr: *const f64,
    len: usize,
    stride: isize,
    owned: Option<Array1<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> FaerColView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix1>) -> Self {
        let len = array.len();
        let stride = array.strides()[0];
        if stride <= 0 {
            let owned = array.to_owned();
            return Self {
                ptr: owned.as_ptr(),
                len,
                stride: 1,
                owned: Some(owned),
                _marker: PhantomData,
            };
        }
        Self {
            ptr: array.as_ptr(),
            len,
            stride,
            owned: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        let (ptr, len, stride) = if let Some(owned) = &self.owned {
            (owned.as_ptr(), owned.len(), 1)
        } else {
            (self.ptr, self.len, self.stride)
        };
        // SAFETY: analogous to FaerArrayView::as_ref.
        unsafe { MatRef::from_raw_parts(ptr, len, 1, stride, 0) }
    }
}

/// Compute A^T * A with faer's SIMD GEMM.
///
/// This is the workhorse behind every curvature-matrix assembly: for a
/// noise-whitened mapping matrix A of shape (data_pixels, pixels) it forms
/// the (pixels, pixels) quadratic form.
#[inline]
pub fn fast_ata<S: Data<Elem = f64>>(a: &ArrayBase<S, Ix2>) -> Array2<f64> {
    use faer::Accum;
    use faer::linalg::matmul::matmul;

    let (n, p) = a.dim();
    if !should_use_faer_matmul(p, p, n) {
        return a.t().dot(a);
    }

    let mut result = Mat::<f64>::zeros(p, p);
    let a_view = FaerArrayView::new(a);
    let a_ref = a_view.as_ref();
    let par = if n < 128 || p < 128 {
        faer::Par::Seq
    } else {
        get_global_parallelism()
    };
    matmul(
        result.as_mut(),
        Accum::Replace,
        a_ref.transpose(),
        a_ref,
        1.0,
        par,
    );

    mat_to_array(result.as_ref())
}

/// Compute A^T * B for A (n, p) and B (n, q).
#[inline]
pub fn fast_atb<S1: Data<Elem = f64>, S2: Data<Elem = f64>>(
    a: &ArrayBase<S1, Ix2>,
    b: &ArrayBase<S2, Ix2>,
) -> Array2<f64> {
    use faer::Accum;
    use faer::linalg::matmul::matmul;

    let (n_a, p) = a.dim();
    let (n_b, q) = b.dim();
    debug_assert_eq!(n_a, n_b, "A and B must have the same number of rows");

    if !should_use_faer_matmul(p, q, n_a) {
        return a.t().dot(b);
    }

    let mut result = Mat::<f64>::zeros(p, q);
    let a_view = FaerArrayView::new(a);
    let b_view = FaerArrayView::new(b);
    let par = if n_a < 128 || p < 128 || q < 128 {
        faer::Par::Seq
    } else {
        get_global_parallelism()
    };
    matmul(
        result.as_mut(),
        Accum::Replace,
        a_view.as_ref().transpose(),
        b_view.as_ref(),
        1.0,
        par,
    );

    mat_to_array(result.as_ref())
}

/// Compute A * B for A (n, p) and B (p, q).
#[inline]
pub fn fast_ab<S1: Data<Elem = f64>, S2: Data<Elem = f64>>(
    a: &ArrayBase<S1, Ix2>,
    b: &ArrayBase<S2, Ix2>,
) -> Array2<f64> {
    use faer::Accum;
    use faer::linalg::matmul::matmul;

    let (n, p) = a.dim();
    let (p_b, q) = b.dim();
    debug_assert_eq!(p, p_b, "A and B must have compatible inner dimensions");

    if !should_use_faer_matmul(n, q, p) {
        return a.dot(b);
    }

    let mut result = Mat::<f64>::zeros(n, q);
    let a_view = FaerArrayView::new(a);
    let b_view = FaerArrayView::new(b);
    let par = if n < 128 || p < 128 || q < 128 {
        faer::Par::Seq
    } else {
        get_global_parallelism()
    };
    matmul(
        result.as_mut(),
        Accum::Replace,
        a_view.as_ref(),
        b_view.as_ref(),
        1.0,
        par,
    );

    mat_to_array(result.as_ref())
}

/// Compute A^T * v with faer's GEMV, used for data-vector assembly.
#[inline]
pub fn fast_atv<S1: Data<Elem = f64>, S2: Data<Elem = f64>>(
    a: &ArrayBase<S1, Ix2>,
    v: &ArrayBase<S2, Ix1>,
) -> Array1<f64> {
    use faer::Accum;
    use faer::linalg::matmul::matmul;

    let (n, p) = a.dim();
    debug_assert_eq!(n, v.len(), "A rows must match v length");

    if !should_use_faer_matmul(p, 1, n) {
        return a.t().dot(v);
    }

    let mut result = Mat::<f64>::zeros(p, 1);
    let a_view = FaerArrayView::new(a);
    let v_view = FaerColView::new(v);
    let par = if n < 128 || p < 128 {
        faer::Par::Seq
    } else {
        get_global_parallelism()
    };
    matmul(
        result.as_mut(),
        Accum::Replace,
        a_view.as_ref().transpose(),
        v_view.as_ref(),
        1.0,
        par,
    );

    let mut out = Array1::<f64>::zeros(p);
    for i in 0..p {
        out[i] = result[(i, 0)];
    }
    out
}

/// A dense LLT factorization of a symmetric positive-definite matrix.
///
/// One factorization serves three consumers: the reconstruction solve, the
/// curvature-regularization log-determinant, and the covariance solve; the
/// accessors below expose exactly that surface.
pub struct FaerCholeskyFactor {
    factor: Llt<f64>,
}

impl FaerCholeskyFactor {
    pub fn solve_vec(&self, rhs: &Array1<f64>) -> Array1<f64> {
        let mut rhs = rhs.to_owned();
        let mut rhs_view = array1_to_col_mat_mut(&mut rhs);
        self.factor.solve_in_place(rhs_view.as_mut());
        rhs
    }

    pub fn solve_mat(&self, rhs: &Array2<f64>) -> Array2<f64> {
        let mut rhs = rhs.to_owned();
        let mut rhs_view = array2_to_mat_mut(&mut rhs);
        self.factor.solve_in_place(rhs_view.as_mut());
        rhs
    }

    pub fn diag(&self) -> Array1<f64> {
        diag_to_array(self.factor.L().diagonal())
    }

    /// Log-determinant of the factored matrix, 2 * sum(ln diag(L)).
    pub fn log_determinant(&self) -> f64 {
        2.0 * self.diag().mapv(f64::ln).sum()
    }
}

pub trait FaerCholesky {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerCholesky for ArrayBase<S, Ix2> {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError> {
        let faer_view = FaerArrayView::new(self);
        let factor = faer_view
            .as_ref()
            .llt(side)
            .map_err(FaerLinalgError::Cholesky)?;
        Ok(FaerCholeskyFactor { factor })
    }
}

pub trait FaerEigh {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerEigh for ArrayBase<S, Ix2> {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError> {
        let faer_view = FaerArrayView::new(self);
        let eigen = faer_view
            .as_ref()
            .self_adjoint_eigen(side)
            .map_err(FaerLinalgError::SelfAdjointEigen)?;
        let values = diag_to_array(eigen.S());
        let vectors = mat_to_array(eigen.U());
        Ok((values, vectors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn cholesky_solve_matches_direct_inverse() {
        let a = array![[4.0, 1.0], [1.0, 3.0]];
        let rhs = array![1.0, 2.0];
        let factor = a.cholesky(Side::Lower).expect("SPD matrix must factor");
        let x = factor.solve_vec(&rhs);
        // A x should reproduce the right-hand side.
        let back = a.dot(&x);
        assert!((back[0] - rhs[0]).abs() < 1e-12);
        assert!((back[1] - rhs[1]).abs() < 1e-12);
    }

    #[test]
    fn cholesky_log_determinant_matches_eigenvalues() {
        let a = array![[4.0, 1.0, 0.0], [1.0, 3.0, 0.5], [0.0, 0.5, 2.0]];
        let factor = a.cholesky(Side::Lower).expect("SPD matrix must factor");
        let (evals, _) = a.eigh(Side::Lower).expect("eigendecomposition");
        let log_det_eig: f64 = evals.iter().map(|&v| v.ln()).sum();
        assert!((factor.log_determinant() - log_det_eig).abs() < 1e-10);
    }

    #[test]
    fn fast_ata_matches_ndarray_on_small_input() {
        let a = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let fast = fast_ata(&a);
        let plain = a.t().dot(&a);
        for i in 0..2 {
            for j in 0..2 {
                assert!((fast[[i, j]] - plain[[i, j]]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn fast_atv_matches_ndarray_on_small_input() {
        let a = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let v = array![1.0, -1.0, 2.0];
        let fast = fast_atv(&a, &v);
        let plain = a.t().dot(&v);
        assert!((fast[0] - plain[0]).abs() < 1e-12);
        assert!((fast[1] - plain[1]).abs() < 1e-12);
    }
}
