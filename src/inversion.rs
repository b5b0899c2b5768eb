//! The inversion: solve `(F + H) s = D` and derive everything downstream.
//!
//! Every expensive quantity is computed at most once per instance and the
//! cached value is returned for all later accesses; two instances share
//! nothing except an explicitly passed `Preloads`. The solve strategy is a
//! trait so a caller can swap the factorization backend without touching
//! any of the derived-quantity contracts.

use crate::error::InversionError;
use crate::faer_ndarray::{FaerCholesky, FaerCholeskyFactor, FaerLinalgError};
use crate::leq::{InversionData, LinearEqn, ReconstructedData};
use crate::preloads::Preloads;
use crate::regularization::Regularization;
use crate::settings::SettingsInversion;
use crate::sparse::{dense_to_sparse_default, sparse_lu_log_determinant};
use faer::Side;
use ndarray::{Array1, Array2, ArrayView1, s};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::sync::OnceLock;

/// A factorization of the curvature-regularization matrix `F + H`.
///
/// One decomposition serves the reconstruction solve, its log-determinant
/// evidence term, and the covariance solve; recomputing it for each would
/// triple the dominant cost of an inversion.
pub trait CurvatureRegFactor {
    fn solve_vector(&self, rhs: &Array1<f64>) -> Array1<f64>;
    fn solve_matrix(&self, rhs: &Array2<f64>) -> Array2<f64>;
    fn log_determinant(&self) -> f64;
}

/// Strategy producing the `F + H` factorization. Numerical failure is
/// reported as a domain error, never a raw linear-algebra error.
pub trait ReconstructionSolver {
    fn factorize(
        &self,
        curvature_reg_matrix: &Array2<f64>,
    ) -> Result<Box<dyn CurvatureRegFactor>, InversionError>;
}

/// Default strategy: dense Cholesky, matching the positive-definite
/// structure `F + H` has for any valid noise map and regularization.
pub struct CholeskySolver;

struct CholeskyFactor {
    factor: FaerCholeskyFactor,
}

impl CurvatureRegFactor for CholeskyFactor {
    fn solve_vector(&self, rhs: &Array1<f64>) -> Array1<f64> {
        self.factor.solve_vec(rhs)
    }

    fn solve_matrix(&self, rhs: &Array2<f64>) -> Array2<f64> {
        self.factor.solve_mat(rhs)
    }

    fn log_determinant(&self) -> f64 {
        self.factor.log_determinant()
    }
}

impl ReconstructionSolver for CholeskySolver {
    fn factorize(
        &self,
        curvature_reg_matrix: &Array2<f64>,
    ) -> Result<Box<dyn CurvatureRegFactor>, InversionError> {
        let factor = curvature_reg_matrix
            .cholesky(Side::Lower)
            .map_err(InversionError::CurvatureRegMatrixNotPositiveDefinite)?;
        Ok(Box::new(CholeskyFactor { factor }))
    }
}

/// Block-diagonal concatenation, preserving block order.
pub fn block_diag_from(blocks: &[Array2<f64>]) -> Array2<f64> {
    let total: usize = blocks.iter().map(|block| block.nrows()).sum();
    let mut out = Array2::<f64>::zeros((total, total));
    let mut offset = 0;
    for block in blocks {
        out.slice_mut(s![
            offset..offset + block.nrows(),
            offset..offset + block.ncols()
        ])
        .assign(block);
        offset += block.nrows();
    }
    out
}

/// Evidence term ln |det H| through the sparse LU fast path.
pub fn log_det_via_sparse_lu(matrix: &Array2<f64>) -> Result<f64, FaerLinalgError> {
    let sparse = dense_to_sparse_default(matrix)?;
    sparse_lu_log_determinant(&sparse)
}

/// Evidence term ln det H through a dense Cholesky factorization.
pub fn log_det_via_cholesky(matrix: &Array2<f64>) -> Result<f64, FaerLinalgError> {
    Ok(matrix.cholesky(Side::Lower)?.log_determinant())
}

/// Per-source-pixel mean absolute residual over the data sub-pixels each
/// source pixel maps to.
pub fn inversion_residual_map_from(
    reconstruction: ArrayView1<'_, f64>,
    data: &Array1<f64>,
    slim_index_for_sub_slim_index: &Array1<usize>,
    sub_slim_indexes_for_pix_index: &[Vec<usize>],
) -> Array1<f64> {
    let mut residual_map = Array1::<f64>::zeros(sub_slim_indexes_for_pix_index.len());
    for (pix, sub_indexes) in sub_slim_indexes_for_pix_index.iter().enumerate() {
        for &sub in sub_indexes {
            let slim = slim_index_for_sub_slim_index[sub];
            residual_map[pix] += (data[slim] - reconstruction[pix]).abs();
        }
        if !sub_indexes.is_empty() {
            residual_map[pix] /= sub_indexes.len() as f64;
        }
    }
    residual_map
}

/// As `inversion_residual_map_from`, with each residual divided by the
/// matching noise entry.
pub fn inversion_normalized_residual_map_from(
    reconstruction: ArrayView1<'_, f64>,
    data: &Array1<f64>,
    noise_map: &Array1<f64>,
    slim_index_for_sub_slim_index: &Array1<usize>,
    sub_slim_indexes_for_pix_index: &[Vec<usize>],
) -> Array1<f64> {
    let mut residual_map = Array1::<f64>::zeros(sub_slim_indexes_for_pix_index.len());
    for (pix, sub_indexes) in sub_slim_indexes_for_pix_index.iter().enumerate() {
        for &sub in sub_indexes {
            let slim = slim_index_for_sub_slim_index[sub];
            residual_map[pix] += ((data[slim] - reconstruction[pix]) / noise_map[slim]).abs();
        }
        if !sub_indexes.is_empty() {
            residual_map[pix] /= sub_indexes.len() as f64;
        }
    }
    residual_map
}

/// As `inversion_normalized_residual_map_from`, squaring each normalized
/// residual.
pub fn inversion_chi_squared_map_from(
    reconstruction: ArrayView1<'_, f64>,
    data: &Array1<f64>,
    noise_map: &Array1<f64>,
    slim_index_for_sub_slim_index: &Array1<usize>,
    sub_slim_indexes_for_pix_index: &[Vec<usize>],
) -> Array1<f64> {
    let mut chi_squared_map = Array1::<f64>::zeros(sub_slim_indexes_for_pix_index.len());
    for (pix, sub_indexes) in sub_slim_indexes_for_pix_index.iter().enumerate() {
        for &sub in sub_indexes {
            let slim = slim_index_for_sub_slim_index[sub];
            let normalized = (data[slim] - reconstruction[pix]) / noise_map[slim];
            chi_squared_map[pix] += normalized * normalized;
        }
        if !sub_indexes.is_empty() {
            chi_squared_map[pix] /= sub_indexes.len() as f64;
        }
    }
    chi_squared_map
}

pub struct Inversion {
    data: InversionData,
    leq: LinearEqn,
    regularization_list: Vec<Regularization>,
    settings: SettingsInversion,
    preloads: Preloads,
    solver: Box<dyn ReconstructionSolver>,

    curvature_matrix: OnceLock<Array2<f64>>,
    data_vector: OnceLock<Array1<f64>>,
    regularization_matrix: OnceLock<Option<Array2<f64>>>,
    curvature_reg_matrix: OnceLock<Array2<f64>>,
    factor: OnceLock<Box<dyn CurvatureRegFactor>>,
    reconstruction: OnceLock<Array1<f64>>,
    mapped_reconstructed_data: OnceLock<ReconstructedData>,
    mapped_reconstructed_image: OnceLock<Array1<f64>>,
    regularization_term: OnceLock<f64>,
    log_det_curvature_reg: OnceLock<f64>,
    log_det_regularization: OnceLock<f64>,
    errors_with_covariance: OnceLock<Array2<f64>>,
}

impl Inversion {
    pub fn new(
        data: InversionData,
        leq: LinearEqn,
        regularization_list: Vec<Regularization>,
        settings: SettingsInversion,
        preloads: Preloads,
    ) -> Result<Self, InversionError> {
        match (&data, &leq) {
            (InversionData::Imaging(_), LinearEqn::Interferometer(_)) => {
                return Err(InversionError::DataMismatch(
                    "imaging data supplied to a visibility-space linear equation",
                ));
            }
            (InversionData::Visibilities(_), LinearEqn::ImagingMapping(_))
            | (InversionData::Visibilities(_), LinearEqn::ImagingWTilde(_)) => {
                return Err(InversionError::DataMismatch(
                    "visibilities supplied to an image-space linear equation",
                ));
            }
            _ => {}
        }

        let pixelized = leq.mapper_list().len();
        if regularization_list.len() != pixelized {
            return Err(InversionError::MismatchedLengths {
                linear_objs: pixelized,
                regularizations: regularization_list.len(),
            });
        }

        Ok(Self {
            data,
            leq,
            regularization_list,
            settings,
            preloads,
            solver: Box::new(CholeskySolver),
            curvature_matrix: OnceLock::new(),
            data_vector: OnceLock::new(),
            regularization_matrix: OnceLock::new(),
            curvature_reg_matrix: OnceLock::new(),
            factor: OnceLock::new(),
            reconstruction: OnceLock::new(),
            mapped_reconstructed_data: OnceLock::new(),
            mapped_reconstructed_image: OnceLock::new(),
            regularization_term: OnceLock::new(),
            log_det_curvature_reg: OnceLock::new(),
            log_det_regularization: OnceLock::new(),
            errors_with_covariance: OnceLock::new(),
        })
    }

    /// Swap the factorization backend. Must be called before the first
    /// solve-dependent access; the cached factorization is never rebuilt.
    pub fn with_solver(mut self, solver: Box<dyn ReconstructionSolver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn data(&self) -> &InversionData {
        &self.data
    }

    pub fn leq(&self) -> &LinearEqn {
        &self.leq
    }

    pub fn regularization_list(&self) -> &[Regularization] {
        &self.regularization_list
    }

    pub fn settings(&self) -> &SettingsInversion {
        &self.settings
    }

    pub fn preloads(&self) -> &Preloads {
        &self.preloads
    }

    pub fn total_mappers(&self) -> usize {
        self.leq.mapper_list().len()
    }

    /// Curvature matrix F: preloaded value or assembly by the linear
    /// equation.
    pub fn curvature_matrix(&self) -> &Array2<f64> {
        self.curvature_matrix.get_or_init(|| {
            if let Some(curvature) = &self.preloads.curvature_matrix {
                return curvature.clone();
            }
            self.leq.curvature_matrix()
        })
    }

    pub fn data_vector(&self) -> Result<&Array1<f64>, InversionError> {
        if self.data_vector.get().is_none() {
            let computed = self.leq.data_vector(&self.data)?;
            let _ = self.data_vector.set(computed);
        }
        Ok(self.data_vector.get().expect("cache initialized above"))
    }

    /// Regularization matrix H: preloaded value, `None` without mappers,
    /// the single object's matrix directly, or the block-diagonal
    /// concatenation across objects. The single-object bypass skips the
    /// block assembly entirely.
    pub fn regularization_matrix(&self) -> Result<Option<&Array2<f64>>, InversionError> {
        if self.regularization_matrix.get().is_none() {
            let computed = self.compute_regularization_matrix()?;
            let _ = self.regularization_matrix.set(computed);
        }
        Ok(self
            .regularization_matrix
            .get()
            .expect("cache initialized above")
            .as_ref())
    }

    fn compute_regularization_matrix(&self) -> Result<Option<Array2<f64>>, InversionError> {
        if let Some(matrix) = &self.preloads.regularization_matrix {
            return Ok(Some(matrix.clone()));
        }
        if !self.leq.has_mapper() {
            return Ok(None);
        }
        let mappers = self.leq.mapper_list();
        if self.leq.has_one_mapper() {
            return Ok(Some(
                self.regularization_list[0].regularization_matrix_from(mappers[0])?,
            ));
        }
        let regularization_list = &self.regularization_list;
        let blocks: Vec<Array2<f64>> = (0..mappers.len())
            .into_par_iter()
            .map(|index| regularization_list[index].regularization_matrix_from(mappers[index]))
            .collect::<Result<_, _>>()?;
        Ok(Some(block_diag_from(&blocks)))
    }

    /// The solved system's matrix, `F + H`.
    pub fn curvature_reg_matrix(&self) -> Result<&Array2<f64>, InversionError> {
        if self.curvature_reg_matrix.get().is_none() {
            let regularization = self
                .regularization_matrix()?
                .ok_or(InversionError::EmptyLinearObjList)?;
            let computed = self.curvature_matrix() + regularization;
            let _ = self.curvature_reg_matrix.set(computed);
        }
        Ok(self
            .curvature_reg_matrix
            .get()
            .expect("cache initialized above"))
    }

    fn curvature_reg_factor(&self) -> Result<&dyn CurvatureRegFactor, InversionError> {
        if self.factor.get().is_none() {
            let factor = self.solver.factorize(self.curvature_reg_matrix()?)?;
            let _ = self.factor.set(factor);
        }
        Ok(self
            .factor
            .get()
            .expect("cache initialized above")
            .as_ref())
    }

    /// The reconstruction vector s solving `(F + H) s = D`.
    pub fn reconstruction(&self) -> Result<&Array1<f64>, InversionError> {
        if self.reconstruction.get().is_none() {
            let factor = self.curvature_reg_factor()?;
            let solution = factor.solve_vector(self.data_vector()?);
            let _ = self.reconstruction.set(solution);
        }
        Ok(self.reconstruction.get().expect("cache initialized above"))
    }

    /// Slice of the reconstruction owned by one linear object.
    pub fn reconstruction_of(&self, index: usize) -> Result<ArrayView1<'_, f64>, InversionError> {
        Ok(self.leq.source_quantity_of(self.reconstruction()?, index))
    }

    /// Per-object model data in the space of the observations.
    pub fn mapped_reconstructed_data_list(
        &self,
    ) -> Result<Vec<ReconstructedData>, InversionError> {
        Ok(self
            .leq
            .mapped_reconstructed_data_list(self.reconstruction()?))
    }

    /// Model data summed across every linear object.
    pub fn mapped_reconstructed_data(&self) -> Result<&ReconstructedData, InversionError> {
        if self.mapped_reconstructed_data.get().is_none() {
            let list = self.mapped_reconstructed_data_list()?;
            if list.is_empty() {
                return Err(InversionError::EmptyLinearObjList);
            }
            let _ = self.mapped_reconstructed_data.set(sum_reconstructed_data(list));
        }
        Ok(self
            .mapped_reconstructed_data
            .get()
            .expect("cache initialized above"))
    }

    pub fn mapped_reconstructed_image_list(&self) -> Result<Vec<Array1<f64>>, InversionError> {
        Ok(self
            .leq
            .mapped_reconstructed_image_list(self.reconstruction()?))
    }

    /// Real-space model image summed across every linear object.
    pub fn mapped_reconstructed_image(&self) -> Result<&Array1<f64>, InversionError> {
        if self.mapped_reconstructed_image.get().is_none() {
            let images = self.mapped_reconstructed_image_list()?;
            if images.is_empty() {
                return Err(InversionError::EmptyLinearObjList);
            }
            let mut summed = images[0].clone();
            for image in &images[1..] {
                summed += image;
            }
            let _ = self.mapped_reconstructed_image.set(summed);
        }
        Ok(self
            .mapped_reconstructed_image
            .get()
            .expect("cache initialized above"))
    }

    /// The smoothness penalty already folded into the solved system,
    /// s^T H s. The regularization coefficient lives inside H; nothing is
    /// reapplied here.
    pub fn regularization_term(&self) -> Result<f64, InversionError> {
        if self.regularization_term.get().is_none() {
            let reconstruction = self.reconstruction()?;
            let regularization = self
                .regularization_matrix()?
                .ok_or(InversionError::EmptyLinearObjList)?;
            let term = reconstruction.dot(&regularization.dot(reconstruction));
            let _ = self.regularization_term.set(term);
        }
        Ok(*self
            .regularization_term
            .get()
            .expect("cache initialized above"))
    }

    /// ln det (F + H), from the same decomposition as the reconstruction.
    pub fn log_det_curvature_reg_matrix_term(&self) -> Result<f64, InversionError> {
        if self.log_det_curvature_reg.get().is_none() {
            let value = self.curvature_reg_factor()?.log_determinant();
            let _ = self.log_det_curvature_reg.set(value);
        }
        Ok(*self
            .log_det_curvature_reg
            .get()
            .expect("cache initialized above"))
    }

    /// ln det H: preloaded value, else the sparse LU fast path, else the
    /// dense Cholesky fallback. Both paths failing means H is not positive
    /// definite, which is a data or configuration error.
    pub fn log_det_regularization_matrix_term(&self) -> Result<f64, InversionError> {
        if let Some(value) = self.preloads.log_det_regularization_matrix_term {
            return Ok(value);
        }
        if self.log_det_regularization.get().is_none() {
            let regularization = self
                .regularization_matrix()?
                .ok_or(InversionError::EmptyLinearObjList)?;
            let value = match log_det_via_sparse_lu(regularization) {
                Ok(value) if value.is_finite() => value,
                _ => {
                    log::warn!(
                        "sparse LU of the regularization matrix failed; \
                        falling back to a dense Cholesky factorization"
                    );
                    log_det_via_cholesky(regularization).map_err(|_| {
                        InversionError::RegularizationMatrixNotPositiveDefinite
                    })?
                }
            };
            let _ = self.log_det_regularization.set(value);
        }
        Ok(*self
            .log_det_regularization
            .get()
            .expect("cache initialized above"))
    }

    /// Covariance of the reconstruction, (F + H)^-1, from the cached
    /// factorization.
    pub fn errors_with_covariance(&self) -> Result<&Array2<f64>, InversionError> {
        if self.errors_with_covariance.get().is_none() {
            let factor = self.curvature_reg_factor()?;
            let identity = Array2::<f64>::eye(self.leq.total_pixels());
            let _ = self.errors_with_covariance.set(factor.solve_matrix(&identity));
        }
        Ok(self
            .errors_with_covariance
            .get()
            .expect("cache initialized above"))
    }

    /// Per-pixel variance of the reconstruction, the covariance diagonal.
    pub fn errors(&self) -> Result<Array1<f64>, InversionError> {
        let covariance = self.errors_with_covariance()?;
        Ok(Array1::from_shape_fn(covariance.nrows(), |i| {
            covariance[[i, i]]
        }))
    }

    pub fn errors_of(&self, index: usize) -> Result<Array1<f64>, InversionError> {
        let errors = self.errors()?;
        let range = self.leq.pixel_range_of(index);
        Ok(errors.slice(s![range]).to_owned())
    }

    /// Per-mapper regularization weights, ordered like `mapper_list`.
    pub fn regularization_weights_list(&self) -> Vec<Array1<f64>> {
        self.leq
            .mapper_list()
            .iter()
            .zip(self.regularization_list.iter())
            .map(|(mapper, regularization)| regularization.regularization_weights_from(mapper))
            .collect()
    }

    /// Index of the brightest reconstructed pixel per mapper.
    pub fn brightest_reconstruction_pixel_list(&self) -> Result<Vec<usize>, InversionError> {
        let mut brightest = Vec::with_capacity(self.total_mappers());
        for index in 0..self.total_mappers() {
            let values = self.reconstruction_of(index)?;
            brightest.push(argmax(values));
        }
        Ok(brightest)
    }

    /// Source-plane centre of the brightest reconstructed pixel per
    /// mapper.
    pub fn brightest_reconstruction_pixel_centre_list(
        &self,
    ) -> Result<Vec<[f64; 2]>, InversionError> {
        let mappers = self.leq.mapper_list();
        let mut centres = Vec::with_capacity(mappers.len());
        for (index, mapper) in mappers.iter().enumerate() {
            let values = self.reconstruction_of(index)?;
            centres.push(mapper.source_pixel_centre(argmax(values)));
        }
        Ok(centres)
    }

    fn imaging_data(&self) -> Result<&Array1<f64>, InversionError> {
        match &self.data {
            InversionData::Imaging(image) => Ok(image),
            InversionData::Visibilities(_) => Err(InversionError::DataMismatch(
                "residual maps are defined for imaging data",
            )),
        }
    }

    /// Per-mapper mean absolute residual between the data and each source
    /// pixel's reconstructed value, over the sub-pixels mapping to it.
    pub fn residual_map_list(&self) -> Result<Vec<Array1<f64>>, InversionError> {
        let data = self.imaging_data()?;
        let mappers = self.leq.mapper_list();
        let mut maps = Vec::with_capacity(mappers.len());
        for (index, mapper) in mappers.iter().enumerate() {
            maps.push(inversion_residual_map_from(
                self.reconstruction_of(index)?,
                data,
                &mapper.slim_index_for_sub_slim_index(),
                &mapper.sub_slim_indexes_for_pix_index(),
            ));
        }
        Ok(maps)
    }

    pub fn normalized_residual_map_list(&self) -> Result<Vec<Array1<f64>>, InversionError> {
        let data = self.imaging_data()?;
        let noise_map = self
            .leq
            .imaging_noise_map()
            .ok_or(InversionError::DataMismatch(
                "residual maps are defined for imaging data",
            ))?;
        let mappers = self.leq.mapper_list();
        let mut maps = Vec::with_capacity(mappers.len());
        for (index, mapper) in mappers.iter().enumerate() {
            maps.push(inversion_normalized_residual_map_from(
                self.reconstruction_of(index)?,
                data,
                noise_map,
                &mapper.slim_index_for_sub_slim_index(),
                &mapper.sub_slim_indexes_for_pix_index(),
            ));
        }
        Ok(maps)
    }

    pub fn chi_squared_map_list(&self) -> Result<Vec<Array1<f64>>, InversionError> {
        let data = self.imaging_data()?;
        let noise_map = self
            .leq
            .imaging_noise_map()
            .ok_or(InversionError::DataMismatch(
                "residual maps are defined for imaging data",
            ))?;
        let mappers = self.leq.mapper_list();
        let mut maps = Vec::with_capacity(mappers.len());
        for (index, mapper) in mappers.iter().enumerate() {
            maps.push(inversion_chi_squared_map_from(
                self.reconstruction_of(index)?,
                data,
                noise_map,
                &mapper.slim_index_for_sub_slim_index(),
                &mapper.sub_slim_indexes_for_pix_index(),
            ));
        }
        Ok(maps)
    }
}

fn argmax(values: ArrayView1<'_, f64>) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (index, &value) in values.iter().enumerate() {
        if value > best_value {
            best = index;
            best_value = value;
        }
    }
    best
}

fn sum_reconstructed_data(list: Vec<ReconstructedData>) -> ReconstructedData {
    let mut iter = list.into_iter();
    let first = iter.next().expect("caller guarantees a non-empty list");
    iter.fold(first, |acc, next| match (acc, next) {
        (ReconstructedData::Imaging(mut sum), ReconstructedData::Imaging(values)) => {
            sum += &values;
            ReconstructedData::Imaging(sum)
        }
        (ReconstructedData::Visibilities(mut sum), ReconstructedData::Visibilities(values)) => {
            for (accumulated, value) in sum.iter_mut().zip(values.iter()) {
                *accumulated += *value;
            }
            ReconstructedData::Visibilities(sum)
        }
        _ => unreachable!("a linear equation maps every object into the same data space"),
    })
}
