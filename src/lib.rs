#![deny(dead_code)]
#![deny(unused_imports)]

pub mod error;
pub mod faer_ndarray;
pub mod inversion;
pub mod leq;
pub mod mapper;
pub mod preloads;
pub mod regularization;
pub mod settings;
pub mod sparse;
pub mod wtilde;

pub use error::InversionError;
pub use faer_ndarray::{
    FaerCholesky, FaerCholeskyFactor, FaerEigh, FaerLinalgError, fast_ab, fast_ata, fast_atb,
    fast_atv,
};
pub use inversion::{
    CholeskySolver, CurvatureRegFactor, Inversion, ReconstructionSolver, block_diag_from,
    inversion_chi_squared_map_from, inversion_normalized_residual_map_from,
    inversion_residual_map_from, log_det_via_cholesky, log_det_via_sparse_lu,
};
pub use leq::{
    Convolver, InversionData, LEqImagingMapping, LEqImagingWTilde, LEqInterferometer, LinearEqn,
    NoiseMap, ReconstructedData, Transformer,
};
pub use mapper::{GridMapper, LinearObj, PixelNeighbors, SplitCrossWeights};
pub use preloads::Preloads;
pub use regularization::{
    Regularization, constant_regularization_matrix_from,
    pixel_splitted_regularization_matrix_from, reg_split_from,
};
pub use settings::{SettingsInversion, SettingsPixelization};
pub use sparse::{dense_to_sparse, dense_to_sparse_default, sparse_lu_log_determinant};
pub use wtilde::WTildeImaging;
