//! Imaging linear equations: real-space data blurred by the instrument
//! PSF.
//!
//! Two formalisms produce identical normal equations. The mapping-matrix
//! route blurs the stacked mapping matrix and whitens it by the noise map;
//! the w-tilde route consumes a precomputed data-space kernel that already
//! folds in PSF and noise, so the curvature matrix is formed on the
//! unblurred mapping matrix. The data vector and the reconstruction
//! projection go through the convolver in both cases.

use super::{
    Convolver, curvature_matrix_via_mapping_from, data_vector_via_mapping_from,
    stacked_mapping_matrix,
};
use crate::error::InversionError;
use crate::faer_ndarray::{fast_ab, fast_atb};
use crate::mapper::LinearObj;
use crate::wtilde::WTildeImaging;
use ndarray::{Array1, Array2, ArrayView1, s};
use std::ops::Range;
use std::sync::{Arc, OnceLock};

pub struct LEqImagingMapping {
    noise_map: Array1<f64>,
    convolver: Arc<dyn Convolver>,
    linear_obj_list: Vec<LinearObj>,
    mapping: OnceLock<Array2<f64>>,
    blurred: OnceLock<Array2<f64>>,
}

impl LEqImagingMapping {
    pub fn new(
        noise_map: Array1<f64>,
        convolver: Arc<dyn Convolver>,
        linear_obj_list: Vec<LinearObj>,
    ) -> Self {
        Self {
            noise_map,
            convolver,
            linear_obj_list,
            mapping: OnceLock::new(),
            blurred: OnceLock::new(),
        }
    }

    pub fn noise_map(&self) -> &Array1<f64> {
        &self.noise_map
    }

    pub fn linear_obj_list(&self) -> &[LinearObj] {
        &self.linear_obj_list
    }

    /// Column-stacked mapping matrix across all linear objects.
    pub fn mapping_matrix(&self) -> &Array2<f64> {
        self.mapping
            .get_or_init(|| stacked_mapping_matrix(&self.linear_obj_list))
    }

    /// The stacked mapping matrix blurred with the instrument PSF.
    pub fn blurred_mapping_matrix(&self) -> &Array2<f64> {
        self.blurred
            .get_or_init(|| self.convolver.convolve_mapping_matrix(self.mapping_matrix()))
    }

    pub(crate) fn curvature_matrix(&self) -> Array2<f64> {
        curvature_matrix_via_mapping_from(self.blurred_mapping_matrix(), &self.noise_map)
    }

    pub(crate) fn data_vector(&self, image: &Array1<f64>) -> Array1<f64> {
        data_vector_via_mapping_from(self.blurred_mapping_matrix(), image, &self.noise_map)
    }

    pub(crate) fn mapped_reconstructed_image_of(
        &self,
        source_quantity: ArrayView1<'_, f64>,
        columns: Range<usize>,
    ) -> Array1<f64> {
        self.blurred_mapping_matrix()
            .slice(s![.., columns])
            .dot(&source_quantity)
    }
}

pub struct LEqImagingWTilde {
    noise_map: Array1<f64>,
    convolver: Arc<dyn Convolver>,
    w_tilde: WTildeImaging,
    linear_obj_list: Vec<LinearObj>,
    mapping: OnceLock<Array2<f64>>,
    blurred: OnceLock<Array2<f64>>,
}

impl LEqImagingWTilde {
    /// Fails fast when the kernel's noise-map snapshot does not match the
    /// supplied noise map; a stale kernel must never be folded into the
    /// curvature matrix silently.
    pub fn new(
        noise_map: Array1<f64>,
        convolver: Arc<dyn Convolver>,
        w_tilde: WTildeImaging,
        linear_obj_list: Vec<LinearObj>,
    ) -> Result<Self, InversionError> {
        w_tilde.check_noise_map(&noise_map)?;
        Ok(Self {
            noise_map,
            convolver,
            w_tilde,
            linear_obj_list,
            mapping: OnceLock::new(),
            blurred: OnceLock::new(),
        })
    }

    pub fn noise_map(&self) -> &Array1<f64> {
        &self.noise_map
    }

    pub fn w_tilde(&self) -> &WTildeImaging {
        &self.w_tilde
    }

    pub fn linear_obj_list(&self) -> &[LinearObj] {
        &self.linear_obj_list
    }

    pub fn mapping_matrix(&self) -> &Array2<f64> {
        self.mapping
            .get_or_init(|| stacked_mapping_matrix(&self.linear_obj_list))
    }

    pub fn blurred_mapping_matrix(&self) -> &Array2<f64> {
        self.blurred
            .get_or_init(|| self.convolver.convolve_mapping_matrix(self.mapping_matrix()))
    }

    /// F = M^T W-tilde M on the unblurred stacked mapping matrix.
    pub(crate) fn curvature_matrix(&self) -> Array2<f64> {
        let mapping = self.mapping_matrix();
        let kernel_mapping = fast_ab(self.w_tilde.curvature(), mapping);
        fast_atb(mapping, &kernel_mapping)
    }

    pub(crate) fn data_vector(&self, image: &Array1<f64>) -> Array1<f64> {
        data_vector_via_mapping_from(self.blurred_mapping_matrix(), image, &self.noise_map)
    }

    pub(crate) fn mapped_reconstructed_image_of(
        &self,
        source_quantity: ArrayView1<'_, f64>,
        columns: Range<usize>,
    ) -> Array1<f64> {
        self.blurred_mapping_matrix()
            .slice(s![.., columns])
            .dot(&source_quantity)
    }
}
