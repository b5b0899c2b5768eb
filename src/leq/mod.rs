//! Linear-equation assembly: from mappers and a noise model to the
//! curvature matrix F and data vector D of the normal equations.
//!
//! The formalism is a closed set of variants selected once at
//! construction: real-space imaging through the mapping matrix, imaging
//! through a precomputed w-tilde kernel, and Fourier-space interferometry.
//! Instrument operators (PSF convolution, visibility transforms) are
//! collaborators supplied by the caller behind narrow traits.

pub mod imaging;
pub mod interferometer;

use crate::error::InversionError;
use crate::faer_ndarray::{fast_ata, fast_atv};
use crate::mapper::{GridMapper, LinearObj};
use ndarray::{Array1, Array2, ArrayView1, Axis, concatenate, s};
use num_complex::Complex64;
use std::ops::Range;

pub use imaging::{LEqImagingMapping, LEqImagingWTilde};
pub use interferometer::LEqInterferometer;

/// PSF blurring operator. Each mapping-matrix column is an image of one
/// source pixel; the convolver blurs every column with the instrument PSF.
pub trait Convolver: Send + Sync {
    fn convolve_mapping_matrix(&self, mapping_matrix: &Array2<f64>) -> Array2<f64>;
}

/// Fourier transform operator mapping a real-space mapping matrix into
/// visibility space.
pub trait Transformer: Send + Sync {
    fn transform_mapping_matrix(&self, mapping_matrix: &Array2<f64>) -> Array2<Complex64>;
}

/// Observed data fed to an inversion; the kind must match the
/// linear-equation variant.
#[derive(Debug, Clone)]
pub enum InversionData {
    Imaging(Array1<f64>),
    Visibilities(Array1<Complex64>),
}

/// Model data mapped back from a reconstruction.
#[derive(Debug, Clone)]
pub enum ReconstructedData {
    Imaging(Array1<f64>),
    Visibilities(Array1<Complex64>),
}

impl ReconstructedData {
    pub fn as_imaging(&self) -> Option<&Array1<f64>> {
        match self {
            ReconstructedData::Imaging(values) => Some(values),
            ReconstructedData::Visibilities(_) => None,
        }
    }

    pub fn as_visibilities(&self) -> Option<&Array1<Complex64>> {
        match self {
            ReconstructedData::Imaging(_) => None,
            ReconstructedData::Visibilities(values) => Some(values),
        }
    }
}

/// Borrowed view of a variant's noise model.
pub enum NoiseMap<'a> {
    Imaging(&'a Array1<f64>),
    Visibilities(&'a Array1<Complex64>),
}

/// The closed set of linear-equation formalisms.
pub enum LinearEqn {
    ImagingMapping(LEqImagingMapping),
    ImagingWTilde(LEqImagingWTilde),
    Interferometer(LEqInterferometer),
}

impl LinearEqn {
    pub fn linear_obj_list(&self) -> &[LinearObj] {
        match self {
            LinearEqn::ImagingMapping(leq) => leq.linear_obj_list(),
            LinearEqn::ImagingWTilde(leq) => leq.linear_obj_list(),
            LinearEqn::Interferometer(leq) => leq.linear_obj_list(),
        }
    }

    pub fn mapper_list(&self) -> Vec<&GridMapper> {
        self.linear_obj_list()
            .iter()
            .filter_map(LinearObj::as_mapper)
            .collect()
    }

    pub fn has_mapper(&self) -> bool {
        !self.mapper_list().is_empty()
    }

    pub fn has_one_mapper(&self) -> bool {
        self.mapper_list().len() == 1
    }

    /// Total unknowns across all linear objects.
    pub fn total_pixels(&self) -> usize {
        self.linear_obj_list().iter().map(LinearObj::pixels).sum()
    }

    /// Column/solution range owned by the linear object at `index`.
    pub fn pixel_range_of(&self, index: usize) -> Range<usize> {
        let offset: usize = self.linear_obj_list()[..index]
            .iter()
            .map(LinearObj::pixels)
            .sum();
        offset..offset + self.linear_obj_list()[index].pixels()
    }

    /// Slice of the stacked reconstruction owned by one linear object.
    pub fn source_quantity_of<'a>(
        &self,
        reconstruction: &'a Array1<f64>,
        index: usize,
    ) -> ArrayView1<'a, f64> {
        let range = self.pixel_range_of(index);
        reconstruction.slice(s![range])
    }

    pub fn noise_map(&self) -> NoiseMap<'_> {
        match self {
            LinearEqn::ImagingMapping(leq) => NoiseMap::Imaging(leq.noise_map()),
            LinearEqn::ImagingWTilde(leq) => NoiseMap::Imaging(leq.noise_map()),
            LinearEqn::Interferometer(leq) => NoiseMap::Visibilities(leq.noise_map()),
        }
    }

    pub fn imaging_noise_map(&self) -> Option<&Array1<f64>> {
        match self.noise_map() {
            NoiseMap::Imaging(noise_map) => Some(noise_map),
            NoiseMap::Visibilities(_) => None,
        }
    }

    /// Assemble the curvature matrix F for this formalism.
    pub fn curvature_matrix(&self) -> Array2<f64> {
        match self {
            LinearEqn::ImagingMapping(leq) => leq.curvature_matrix(),
            LinearEqn::ImagingWTilde(leq) => leq.curvature_matrix(),
            LinearEqn::Interferometer(leq) => leq.curvature_matrix(),
        }
    }

    /// Assemble the data vector D from the observed data.
    pub fn data_vector(&self, data: &InversionData) -> Result<Array1<f64>, InversionError> {
        match (self, data) {
            (LinearEqn::ImagingMapping(leq), InversionData::Imaging(image)) => {
                Ok(leq.data_vector(image))
            }
            (LinearEqn::ImagingWTilde(leq), InversionData::Imaging(image)) => {
                Ok(leq.data_vector(image))
            }
            (LinearEqn::Interferometer(leq), InversionData::Visibilities(visibilities)) => {
                Ok(leq.data_vector(visibilities))
            }
            (_, InversionData::Imaging(_)) => Err(InversionError::DataMismatch(
                "imaging data supplied to a visibility-space linear equation",
            )),
            (_, InversionData::Visibilities(_)) => Err(InversionError::DataMismatch(
                "visibilities supplied to an image-space linear equation",
            )),
        }
    }

    /// Per-object model data in the space of the observations.
    pub fn mapped_reconstructed_data_list(
        &self,
        reconstruction: &Array1<f64>,
    ) -> Vec<ReconstructedData> {
        match self {
            LinearEqn::ImagingMapping(leq) => (0..self.linear_obj_list().len())
                .map(|index| {
                    ReconstructedData::Imaging(leq.mapped_reconstructed_image_of(
                        self.source_quantity_of(reconstruction, index),
                        self.pixel_range_of(index),
                    ))
                })
                .collect(),
            LinearEqn::ImagingWTilde(leq) => (0..self.linear_obj_list().len())
                .map(|index| {
                    ReconstructedData::Imaging(leq.mapped_reconstructed_image_of(
                        self.source_quantity_of(reconstruction, index),
                        self.pixel_range_of(index),
                    ))
                })
                .collect(),
            LinearEqn::Interferometer(leq) => (0..self.linear_obj_list().len())
                .map(|index| {
                    ReconstructedData::Visibilities(leq.mapped_reconstructed_visibilities_of(
                        self.source_quantity_of(reconstruction, index),
                        self.pixel_range_of(index),
                    ))
                })
                .collect(),
        }
    }

    /// Per-object model images in real space. For imaging this coincides
    /// with the data-space projection; for interferometry it is the
    /// untransformed mapping applied to the reconstruction.
    pub fn mapped_reconstructed_image_list(
        &self,
        reconstruction: &Array1<f64>,
    ) -> Vec<Array1<f64>> {
        match self {
            LinearEqn::ImagingMapping(leq) => (0..self.linear_obj_list().len())
                .map(|index| {
                    leq.mapped_reconstructed_image_of(
                        self.source_quantity_of(reconstruction, index),
                        self.pixel_range_of(index),
                    )
                })
                .collect(),
            LinearEqn::ImagingWTilde(leq) => (0..self.linear_obj_list().len())
                .map(|index| {
                    leq.mapped_reconstructed_image_of(
                        self.source_quantity_of(reconstruction, index),
                        self.pixel_range_of(index),
                    )
                })
                .collect(),
            LinearEqn::Interferometer(leq) => (0..self.linear_obj_list().len())
                .map(|index| {
                    leq.mapped_reconstructed_image_of(
                        self.source_quantity_of(reconstruction, index),
                        self.pixel_range_of(index),
                    )
                })
                .collect(),
        }
    }
}

/// Column-concatenate the mapping matrices of every linear object.
pub(crate) fn stacked_mapping_matrix(linear_obj_list: &[LinearObj]) -> Array2<f64> {
    if linear_obj_list.is_empty() {
        return Array2::zeros((0, 0));
    }
    let views: Vec<_> = linear_obj_list
        .iter()
        .map(|obj| obj.mapping_matrix().view())
        .collect();
    concatenate(Axis(1), &views).expect("linear objects must share the data pixel count")
}

/// F = (A / sigma)^T (A / sigma) for a (blurred) mapping matrix A.
pub(crate) fn curvature_matrix_via_mapping_from(
    mapping_matrix: &Array2<f64>,
    noise_map: &Array1<f64>,
) -> Array2<f64> {
    let mut whitened = mapping_matrix.to_owned();
    for (i, mut row) in whitened.axis_iter_mut(Axis(0)).enumerate() {
        row /= noise_map[i];
    }
    fast_ata(&whitened)
}

/// D_j = sum_i d_i A_ij / sigma_i^2.
pub(crate) fn data_vector_via_mapping_from(
    mapping_matrix: &Array2<f64>,
    data: &Array1<f64>,
    noise_map: &Array1<f64>,
) -> Array1<f64> {
    let weighted = Array1::from_shape_fn(data.len(), |i| {
        data[i] / (noise_map[i] * noise_map[i])
    });
    fast_atv(mapping_matrix, &weighted)
}
