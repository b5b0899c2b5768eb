use approx::{assert_abs_diff_eq, assert_relative_eq};
use ndarray::{Array1, Array2, array};
use num_complex::Complex64;
use pixinv::{
    CholeskySolver, Convolver, CurvatureRegFactor, GridMapper, Inversion, InversionData,
    InversionError, LEqImagingMapping, LEqImagingWTilde, LEqInterferometer, LinearEqn, LinearObj,
    PixelNeighbors, Preloads, ReconstructedData, ReconstructionSolver, Regularization,
    SettingsInversion, Transformer, WTildeImaging, block_diag_from, log_det_via_cholesky,
    log_det_via_sparse_lu,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct IdentityConvolver;

impl Convolver for IdentityConvolver {
    fn convolve_mapping_matrix(&self, mapping_matrix: &Array2<f64>) -> Array2<f64> {
        mapping_matrix.clone()
    }
}

struct RealTransformer;

impl Transformer for RealTransformer {
    fn transform_mapping_matrix(&self, mapping_matrix: &Array2<f64>) -> Array2<Complex64> {
        mapping_matrix.mapv(|value| Complex64::new(value, 0.0))
    }
}

/// Identity-mapping mapper over a chain of pixels: pixel i neighbors
/// i - 1 and i + 1, centre at (i, i).
fn chain_mapper(pixels: usize) -> GridMapper {
    let lists: Vec<Vec<usize>> = (0..pixels)
        .map(|i| {
            let mut neighbors = Vec::new();
            if i > 0 {
                neighbors.push(i - 1);
            }
            if i + 1 < pixels {
                neighbors.push(i + 1);
            }
            neighbors
        })
        .collect();
    let grid = Array2::from_shape_fn((pixels, 2), |(i, _)| i as f64);
    GridMapper::new(Array2::eye(pixels), PixelNeighbors::from_lists(&lists), grid)
}

/// 3x3 grid of 4-connected pixels.
fn grid_neighbors_3x3() -> PixelNeighbors {
    let lists: Vec<Vec<usize>> = (0..9)
        .map(|i| {
            let (row, col) = (i / 3, i % 3);
            let mut neighbors = Vec::new();
            if row > 0 {
                neighbors.push(i - 3);
            }
            if row < 2 {
                neighbors.push(i + 3);
            }
            if col > 0 {
                neighbors.push(i - 1);
            }
            if col < 2 {
                neighbors.push(i + 1);
            }
            neighbors
        })
        .collect();
    PixelNeighbors::from_lists(&lists)
}

fn imaging_inversion(
    data: Array1<f64>,
    mappers: Vec<GridMapper>,
    regularizations: Vec<Regularization>,
) -> Inversion {
    let pixels = data.len();
    let leq = LinearEqn::ImagingMapping(LEqImagingMapping::new(
        Array1::ones(pixels),
        Arc::new(IdentityConvolver),
        mappers.into_iter().map(LinearObj::Mapper).collect(),
    ));
    Inversion::new(
        InversionData::Imaging(data),
        leq,
        regularizations,
        SettingsInversion::default(),
        Preloads::default(),
    )
    .expect("inversion construction")
}

#[test]
fn single_mapper_regularization_matrix_bypasses_block_diagonal() {
    let mapper = chain_mapper(3);
    let regularization = Regularization::Constant { coefficient: 1.0 };
    let direct = regularization
        .regularization_matrix_from(&mapper)
        .expect("regularization matrix");

    let inversion = imaging_inversion(array![1.0, 2.0, 3.0], vec![mapper], vec![regularization]);
    let cached = inversion
        .regularization_matrix()
        .expect("regularization matrix")
        .expect("mapper present");

    assert_eq!(cached.dim(), direct.dim());
    for i in 0..3 {
        for j in 0..3 {
            assert_eq!(cached[[i, j]], direct[[i, j]]);
        }
    }
}

#[test]
fn multi_mapper_regularization_matrix_is_ordered_block_diagonal() {
    // Distinct coefficients so block order is observable.
    let mapper_a = GridMapper::new(
        array![[1.0, 0.0], [0.0, 1.0], [0.0, 0.0], [0.0, 0.0]],
        PixelNeighbors::from_lists(&[vec![1], vec![0]]),
        array![[0.0, 0.0], [1.0, 1.0]],
    );
    let mapper_b = GridMapper::new(
        array![[0.0, 0.0], [0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
        PixelNeighbors::from_lists(&[vec![1], vec![0]]),
        array![[2.0, 2.0], [3.0, 3.0]],
    );
    let reg_a = Regularization::Constant { coefficient: 1.0 };
    let reg_b = Regularization::Constant { coefficient: 2.0 };

    let block_a = reg_a.regularization_matrix_from(&mapper_a).expect("block a");
    let block_b = reg_b.regularization_matrix_from(&mapper_b).expect("block b");
    let expected = block_diag_from(&[block_a, block_b]);

    let inversion = imaging_inversion(
        array![1.0, 2.0, 3.0, 4.0],
        vec![mapper_a, mapper_b],
        vec![reg_a, reg_b],
    );
    let assembled = inversion
        .regularization_matrix()
        .expect("regularization matrix")
        .expect("mappers present");

    assert_eq!(assembled.dim(), (4, 4));
    for i in 0..4 {
        for j in 0..4 {
            assert_eq!(assembled[[i, j]], expected[[i, j]]);
        }
    }
}

#[test]
fn regularization_term_equals_quadratic_form() {
    let inversion = imaging_inversion(
        array![1.0, 2.0, 3.0],
        vec![chain_mapper(3)],
        vec![Regularization::Constant { coefficient: 0.5 }],
    );
    let term = inversion.regularization_term().expect("term");
    let reconstruction = inversion.reconstruction().expect("reconstruction").clone();
    let matrix = inversion
        .regularization_matrix()
        .expect("regularization matrix")
        .expect("mapper present")
        .clone();
    let expected = reconstruction.dot(&matrix.dot(&reconstruction));
    assert_eq!(term, expected);
}

#[test]
fn sparse_and_dense_log_det_paths_agree() {
    let matrix =
        pixinv::constant_regularization_matrix_from(1.0, &grid_neighbors_3x3());
    let via_lu = log_det_via_sparse_lu(&matrix).expect("sparse LU path");
    let via_cholesky = log_det_via_cholesky(&matrix).expect("dense Cholesky path");
    assert_relative_eq!(via_lu, via_cholesky, max_relative = 1e-4);
}

#[test]
fn w_tilde_noise_map_mismatch_raises_at_construction() {
    let mapper = chain_mapper(3);
    let w_tilde = WTildeImaging::new(Array2::eye(3), 2.0);
    let result = LEqImagingWTilde::new(
        Array1::ones(3),
        Arc::new(IdentityConvolver),
        w_tilde,
        vec![LinearObj::Mapper(mapper)],
    );
    assert!(matches!(
        result,
        Err(InversionError::WTildeNoiseMapMismatch { .. })
    ));
}

#[test]
fn isolated_pixel_regularization_is_epsilon_and_does_not_raise() {
    let matrix =
        pixinv::constant_regularization_matrix_from(1.0, &PixelNeighbors::from_lists(&[vec![]]));
    assert_eq!(matrix.dim(), (1, 1));
    assert_abs_diff_eq!(matrix[[0, 0]], 1e-8, epsilon = 1e-20);
    // Both evidence paths factor it, so the matrix is invertible.
    let via_lu = log_det_via_sparse_lu(&matrix).expect("sparse LU path");
    let via_cholesky = log_det_via_cholesky(&matrix).expect("dense Cholesky path");
    assert_relative_eq!(via_lu, via_cholesky, max_relative = 1e-10);
}

#[test]
fn identity_mapping_round_trips_reconstruction_exactly() {
    let leq = LinearEqn::ImagingMapping(LEqImagingMapping::new(
        Array1::ones(3),
        Arc::new(IdentityConvolver),
        vec![LinearObj::Mapper(chain_mapper(3))],
    ));
    let reconstruction = array![1.0, 2.0, 3.0];
    let mapped = leq.mapped_reconstructed_data_list(&reconstruction);
    assert_eq!(mapped.len(), 1);
    let image = mapped[0].as_imaging().expect("imaging data");
    assert_eq!(image[0], 1.0);
    assert_eq!(image[1], 2.0);
    assert_eq!(image[2], 3.0);
}

#[test]
fn cached_properties_are_idempotent() {
    let inversion = imaging_inversion(
        array![1.0, 2.0, 3.0],
        vec![chain_mapper(3)],
        vec![Regularization::Constant { coefficient: 1.0 }],
    );

    let matrix_first = inversion
        .regularization_matrix()
        .expect("regularization matrix")
        .expect("mapper present");
    let matrix_second = inversion
        .regularization_matrix()
        .expect("regularization matrix")
        .expect("mapper present");
    assert!(std::ptr::eq(matrix_first, matrix_second));

    let reconstruction_first = inversion.reconstruction().expect("reconstruction");
    let reconstruction_second = inversion.reconstruction().expect("reconstruction");
    assert!(std::ptr::eq(reconstruction_first, reconstruction_second));

    let log_det_first = inversion
        .log_det_regularization_matrix_term()
        .expect("log det");
    let log_det_second = inversion
        .log_det_regularization_matrix_term()
        .expect("log det");
    assert_eq!(log_det_first.to_bits(), log_det_second.to_bits());

    let curvature_first = inversion
        .log_det_curvature_reg_matrix_term()
        .expect("log det");
    let curvature_second = inversion
        .log_det_curvature_reg_matrix_term()
        .expect("log det");
    assert_eq!(curvature_first.to_bits(), curvature_second.to_bits());
}

#[test]
fn weakly_regularized_identity_solve_recovers_the_data() {
    let data = array![1.0, 2.0, 3.0];
    let inversion = imaging_inversion(
        data.clone(),
        vec![chain_mapper(3)],
        vec![Regularization::Constant { coefficient: 1e-4 }],
    );
    let reconstruction = inversion.reconstruction().expect("reconstruction");
    for i in 0..3 {
        assert_abs_diff_eq!(reconstruction[i], data[i], epsilon = 1e-5);
    }

    let mapped = inversion
        .mapped_reconstructed_data()
        .expect("mapped data");
    let image = match mapped {
        ReconstructedData::Imaging(image) => image,
        ReconstructedData::Visibilities(_) => panic!("imaging inversion"),
    };
    for i in 0..3 {
        assert_abs_diff_eq!(image[i], data[i], epsilon = 1e-5);
    }

    // A near-perfect fit leaves near-zero residual maps; unit noise makes
    // the raw and normalized residuals coincide.
    let residual_maps = inversion.residual_map_list().expect("residual maps");
    let normalized_maps = inversion
        .normalized_residual_map_list()
        .expect("normalized residual maps");
    let chi_squared_maps = inversion.chi_squared_map_list().expect("chi squared maps");
    for pix in 0..3 {
        assert_abs_diff_eq!(residual_maps[0][pix], 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(normalized_maps[0][pix], residual_maps[0][pix], epsilon = 1e-12);
        assert_abs_diff_eq!(chi_squared_maps[0][pix], 0.0, epsilon = 1e-8);
    }

    let weights = inversion.regularization_weights_list();
    assert_eq!(weights.len(), 1);
    for pix in 0..3 {
        assert_abs_diff_eq!(weights[0][pix], 1e-4, epsilon = 1e-18);
    }
}

#[test]
fn w_tilde_and_mapping_formalisms_agree_for_identity_psf() {
    let objs = vec![LinearObj::Mapper(chain_mapper(3))];
    let mapping_leq = LinearEqn::ImagingMapping(LEqImagingMapping::new(
        Array1::ones(3),
        Arc::new(IdentityConvolver),
        objs.clone(),
    ));
    // With an identity PSF and unit noise the w-tilde kernel is the
    // identity, so both curvature matrices must coincide.
    let w_tilde_leq = LinearEqn::ImagingWTilde(
        LEqImagingWTilde::new(
            Array1::ones(3),
            Arc::new(IdentityConvolver),
            WTildeImaging::new(Array2::eye(3), 1.0),
            objs,
        )
        .expect("matching noise map"),
    );

    let f_mapping = mapping_leq.curvature_matrix();
    let f_w_tilde = w_tilde_leq.curvature_matrix();
    for i in 0..3 {
        for j in 0..3 {
            assert_abs_diff_eq!(f_mapping[[i, j]], f_w_tilde[[i, j]], epsilon = 1e-12);
        }
    }

    let data = InversionData::Imaging(array![0.5, -1.0, 2.0]);
    let d_mapping = mapping_leq.data_vector(&data).expect("data vector");
    let d_w_tilde = w_tilde_leq.data_vector(&data).expect("data vector");
    for j in 0..3 {
        assert_abs_diff_eq!(d_mapping[j], d_w_tilde[j], epsilon = 1e-12);
    }
}

#[test]
fn interferometer_matches_imaging_under_identity_transform() {
    let data = array![1.0, 2.0, 3.0];
    let imaging = imaging_inversion(
        data.clone(),
        vec![chain_mapper(3)],
        vec![Regularization::Constant { coefficient: 1.0 }],
    );

    let visibilities = data.mapv(|value| Complex64::new(value, 0.0));
    let noise = Array1::from_elem(3, Complex64::new(1.0, 1.0));
    let leq = LinearEqn::Interferometer(LEqInterferometer::new(
        noise,
        Arc::new(RealTransformer),
        vec![LinearObj::Mapper(chain_mapper(3))],
    ));
    let interferometer = Inversion::new(
        InversionData::Visibilities(visibilities),
        leq,
        vec![Regularization::Constant { coefficient: 1.0 }],
        SettingsInversion::default(),
        Preloads::default(),
    )
    .expect("inversion construction");

    // Identity transform with zero imaginary data reduces the visibility
    // normal equations to the imaging ones.
    let s_imaging = imaging.reconstruction().expect("reconstruction");
    let s_interferometer = interferometer.reconstruction().expect("reconstruction");
    for i in 0..3 {
        assert_abs_diff_eq!(s_imaging[i], s_interferometer[i], epsilon = 1e-10);
    }

    let image = interferometer
        .mapped_reconstructed_image()
        .expect("mapped image");
    for i in 0..3 {
        assert_abs_diff_eq!(image[i], s_interferometer[i], epsilon = 1e-12);
    }

    // The data-space projection is complex; its real part is the image and
    // the identity transform leaves no imaginary component.
    let mapped = interferometer
        .mapped_reconstructed_data()
        .expect("mapped visibilities");
    let visibilities = mapped.as_visibilities().expect("visibility data");
    for i in 0..3 {
        assert_abs_diff_eq!(visibilities[i].re, image[i], epsilon = 1e-12);
        assert_abs_diff_eq!(visibilities[i].im, 0.0, epsilon = 1e-15);
    }
}

#[test]
fn covariance_errors_match_direct_inverse() {
    let inversion = imaging_inversion(
        array![1.0, 2.0],
        vec![chain_mapper(2)],
        vec![Regularization::Constant { coefficient: 1.0 }],
    );
    let covariance = inversion
        .errors_with_covariance()
        .expect("covariance")
        .clone();
    let curvature_reg = inversion.curvature_reg_matrix().expect("F + H").clone();

    // (F + H) * covariance should be the identity.
    let product = curvature_reg.dot(&covariance);
    for i in 0..2 {
        for j in 0..2 {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_abs_diff_eq!(product[[i, j]], expected, epsilon = 1e-10);
        }
    }

    let errors = inversion.errors().expect("errors");
    for i in 0..2 {
        assert_abs_diff_eq!(errors[i], covariance[[i, i]], epsilon = 1e-15);
    }
}

#[test]
fn brightest_pixel_diagnostics_follow_the_reconstruction() {
    let inversion = imaging_inversion(
        array![1.0, 5.0, 3.0],
        vec![chain_mapper(3)],
        vec![Regularization::Constant { coefficient: 1e-4 }],
    );
    let brightest = inversion
        .brightest_reconstruction_pixel_list()
        .expect("brightest pixels");
    assert_eq!(brightest, vec![1]);

    let centres = inversion
        .brightest_reconstruction_pixel_centre_list()
        .expect("brightest centres");
    assert_eq!(centres.len(), 1);
    assert_abs_diff_eq!(centres[0][0], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(centres[0][1], 1.0, epsilon = 1e-12);
}

#[test]
fn preloaded_artifacts_bypass_recomputation() {
    let preloaded_matrix = Array2::<f64>::eye(3) * 2.0;
    let leq = LinearEqn::ImagingMapping(LEqImagingMapping::new(
        Array1::ones(3),
        Arc::new(IdentityConvolver),
        vec![LinearObj::Mapper(chain_mapper(3))],
    ));
    let inversion = Inversion::new(
        InversionData::Imaging(array![1.0, 2.0, 3.0]),
        leq,
        vec![Regularization::Constant { coefficient: 1.0 }],
        SettingsInversion::default(),
        Preloads {
            regularization_matrix: Some(preloaded_matrix.clone()),
            log_det_regularization_matrix_term: Some(12.34),
            ..Preloads::default()
        },
    )
    .expect("inversion construction");

    let matrix = inversion
        .regularization_matrix()
        .expect("regularization matrix")
        .expect("preloaded");
    for i in 0..3 {
        for j in 0..3 {
            assert_eq!(matrix[[i, j]], preloaded_matrix[[i, j]]);
        }
    }
    assert_eq!(
        inversion
            .log_det_regularization_matrix_term()
            .expect("log det"),
        12.34
    );
}

#[test]
fn swapped_solver_backend_is_used_and_factorizes_once() {
    struct CountingSolver {
        inner: CholeskySolver,
        factorizations: Arc<AtomicUsize>,
    }

    impl ReconstructionSolver for CountingSolver {
        fn factorize(
            &self,
            curvature_reg_matrix: &Array2<f64>,
        ) -> Result<Box<dyn CurvatureRegFactor>, InversionError> {
            self.factorizations.fetch_add(1, Ordering::SeqCst);
            self.inner.factorize(curvature_reg_matrix)
        }
    }

    let factorizations = Arc::new(AtomicUsize::new(0));
    let inversion = imaging_inversion(
        array![1.0, 2.0, 3.0],
        vec![chain_mapper(3)],
        vec![Regularization::Constant { coefficient: 1.0 }],
    )
    .with_solver(Box::new(CountingSolver {
        inner: CholeskySolver,
        factorizations: Arc::clone(&factorizations),
    }));

    // Reconstruction, evidence term and covariance all reuse one
    // factorization.
    inversion.reconstruction().expect("reconstruction");
    inversion
        .log_det_curvature_reg_matrix_term()
        .expect("log det");
    inversion.errors_with_covariance().expect("covariance");
    assert_eq!(factorizations.load(Ordering::SeqCst), 1);
}

#[test]
fn mismatched_regularization_list_is_rejected_at_construction() {
    let leq = LinearEqn::ImagingMapping(LEqImagingMapping::new(
        Array1::ones(3),
        Arc::new(IdentityConvolver),
        vec![LinearObj::Mapper(chain_mapper(3))],
    ));
    let result = Inversion::new(
        InversionData::Imaging(array![1.0, 2.0, 3.0]),
        leq,
        vec![],
        SettingsInversion::default(),
        Preloads::default(),
    );
    assert!(matches!(
        result,
        Err(InversionError::MismatchedLengths { .. })
    ));
}

#[test]
fn data_kind_must_match_linear_equation_variant() {
    let leq = LinearEqn::ImagingMapping(LEqImagingMapping::new(
        Array1::ones(3),
        Arc::new(IdentityConvolver),
        vec![LinearObj::Mapper(chain_mapper(3))],
    ));
    let result = Inversion::new(
        InversionData::Visibilities(Array1::from_elem(3, Complex64::new(1.0, 0.0))),
        leq,
        vec![Regularization::Constant { coefficient: 1.0 }],
        SettingsInversion::default(),
        Preloads::default(),
    );
    assert!(matches!(result, Err(InversionError::DataMismatch(_))));
}
