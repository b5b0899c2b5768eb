//! Interferometer linear equations: visibility-space data with no
//! convolution.
//!
//! The transformer collaborator maps the stacked real-space mapping matrix
//! into complex visibilities. Real and imaginary parts carry independent
//! noise, so the curvature matrix and data vector are the sums of the two
//! whitened quadratic forms.

use super::{Transformer, stacked_mapping_matrix};
use crate::faer_ndarray::{fast_ata, fast_atv};
use crate::mapper::LinearObj;
use ndarray::{Array1, Array2, ArrayView1, s};
use num_complex::Complex64;
use std::ops::Range;
use std::sync::{Arc, OnceLock};

pub struct LEqInterferometer {
    noise_map: Array1<Complex64>,
    transformer: Arc<dyn Transformer>,
    linear_obj_list: Vec<LinearObj>,
    mapping: OnceLock<Array2<f64>>,
    transformed: OnceLock<Array2<Complex64>>,
}

impl LEqInterferometer {
    pub fn new(
        noise_map: Array1<Complex64>,
        transformer: Arc<dyn Transformer>,
        linear_obj_list: Vec<LinearObj>,
    ) -> Self {
        Self {
            noise_map,
            transformer,
            linear_obj_list,
            mapping: OnceLock::new(),
            transformed: OnceLock::new(),
        }
    }

    pub fn noise_map(&self) -> &Array1<Complex64> {
        &self.noise_map
    }

    pub fn linear_obj_list(&self) -> &[LinearObj] {
        &self.linear_obj_list
    }

    pub fn mapping_matrix(&self) -> &Array2<f64> {
        self.mapping
            .get_or_init(|| stacked_mapping_matrix(&self.linear_obj_list))
    }

    /// The stacked mapping matrix carried into visibility space.
    pub fn transformed_mapping_matrix(&self) -> &Array2<Complex64> {
        self.transformed.get_or_init(|| {
            self.transformer
                .transform_mapping_matrix(self.mapping_matrix())
        })
    }

    fn whitened_parts(&self) -> (Array2<f64>, Array2<f64>) {
        let transformed = self.transformed_mapping_matrix();
        let (visibilities, pixels) = transformed.dim();
        let mut real = Array2::<f64>::zeros((visibilities, pixels));
        let mut imag = Array2::<f64>::zeros((visibilities, pixels));
        for i in 0..visibilities {
            let sigma_re = self.noise_map[i].re;
            let sigma_im = self.noise_map[i].im;
            for j in 0..pixels {
                real[[i, j]] = transformed[[i, j]].re / sigma_re;
                imag[[i, j]] = transformed[[i, j]].im / sigma_im;
            }
        }
        (real, imag)
    }

    pub(crate) fn curvature_matrix(&self) -> Array2<f64> {
        let (real, imag) = self.whitened_parts();
        fast_ata(&real) + fast_ata(&imag)
    }

    pub(crate) fn data_vector(&self, visibilities: &Array1<Complex64>) -> Array1<f64> {
        let (real, imag) = self.whitened_parts();
        let whitened_re = Array1::from_shape_fn(visibilities.len(), |i| {
            visibilities[i].re / self.noise_map[i].re
        });
        let whitened_im = Array1::from_shape_fn(visibilities.len(), |i| {
            visibilities[i].im / self.noise_map[i].im
        });
        fast_atv(&real, &whitened_re) + fast_atv(&imag, &whitened_im)
    }

    pub(crate) fn mapped_reconstructed_visibilities_of(
        &self,
        source_quantity: ArrayView1<'_, f64>,
        columns: Range<usize>,
    ) -> Array1<Complex64> {
        let transformed = self.transformed_mapping_matrix();
        let visibilities = transformed.nrows();
        let mut out = Array1::<Complex64>::zeros(visibilities);
        for i in 0..visibilities {
            let mut acc = Complex64::new(0.0, 0.0);
            for (offset, j) in columns.clone().enumerate() {
                acc += transformed[[i, j]] * source_quantity[offset];
            }
            out[i] = acc;
        }
        out
    }

    pub(crate) fn mapped_reconstructed_image_of(
        &self,
        source_quantity: ArrayView1<'_, f64>,
        columns: Range<usize>,
    ) -> Array1<f64> {
        self.mapping_matrix()
            .slice(s![.., columns])
            .dot(&source_quantity)
    }
}
