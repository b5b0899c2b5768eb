//! Configuration for inversions and the pixelizations feeding them.
//!
//! These are pure data: constructed explicitly per call, never shared
//! mutably, with no behavior of their own.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsInversion {
    /// Prefer the precomputed w-tilde formalism when an imaging kernel is
    /// available. Callers consult this when choosing the linear-equation
    /// variant; the solve itself is identical either way.
    pub use_w_tilde: bool,
}

impl Default for SettingsInversion {
    fn default() -> Self {
        Self { use_w_tilde: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPixelization {
    /// Relocate source-plane pixels that fall outside the masked border
    /// before building the mapper.
    pub use_border: bool,
    /// Sub-pixel gridding factor used when the geometry layer builds the
    /// mapping matrix.
    pub sub_size: usize,
}

impl Default for SettingsPixelization {
    fn default() -> Self {
        Self {
            use_border: true,
            sub_size: 1,
        }
    }
}
