//! Mapper artifacts consumed by the inversion engine.
//!
//! The geometry layer (masking, gridding, sub-pixel bookkeeping, pixel
//! relocation) lives outside this crate. What arrives here are its finished
//! numerical products: a mapping matrix relating source pixels to data
//! pixels, the source-plane adjacency, pixel centres, and optionally the
//! split-cross interpolation weights used by area-aware regularization.
//! Nothing in this module is mutated by the engine.

use ndarray::{Array1, Array2};

/// Padded per-pixel adjacency. Row `i` of `indexes` holds the neighbor
/// indices of pixel `i`; only the first `sizes[i]` entries are meaningful.
/// A pixel with `sizes[i] == 0` is isolated, which is legal: its
/// regularization row reduces to the diagonal epsilon.
#[derive(Debug, Clone)]
pub struct PixelNeighbors {
    indexes: Array2<usize>,
    sizes: Array1<usize>,
}

impl PixelNeighbors {
    pub fn new(indexes: Array2<usize>, sizes: Array1<usize>) -> Self {
        assert_eq!(
            indexes.nrows(),
            sizes.len(),
            "adjacency rows must match the size vector"
        );
        Self { indexes, sizes }
    }

    /// Build the padded form from per-pixel neighbor lists.
    pub fn from_lists(lists: &[Vec<usize>]) -> Self {
        let pixels = lists.len();
        let max_size = lists.iter().map(Vec::len).max().unwrap_or(0);
        let mut indexes = Array2::<usize>::zeros((pixels, max_size));
        let mut sizes = Array1::<usize>::zeros(pixels);
        for (i, neighbors) in lists.iter().enumerate() {
            sizes[i] = neighbors.len();
            for (j, &neighbor) in neighbors.iter().enumerate() {
                indexes[[i, j]] = neighbor;
            }
        }
        Self { indexes, sizes }
    }

    pub fn pixels(&self) -> usize {
        self.sizes.len()
    }

    pub fn size_of(&self, pixel: usize) -> usize {
        self.sizes[pixel]
    }

    pub fn neighbors_of(&self, pixel: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.sizes[pixel]).map(move |j| self.indexes[[pixel, j]])
    }
}

/// Interpolation data for the 4-point regularization cross.
///
/// Each source pixel contributes four cross points (rows `4*i .. 4*i+4`),
/// placed by the geometry layer at half the pixel's effective size along
/// each axis. `mappings`/`weights` give the enclosing source pixels of each
/// cross point and their interpolation weights; `sizes` counts the
/// meaningful entries per row. The trailing column must be left free so the
/// residual-operator adjustment can append the pixel's own index when the
/// interpolation stencil does not already contain it.
#[derive(Debug, Clone)]
pub struct SplitCrossWeights {
    pub mappings: Array2<usize>,
    pub sizes: Array1<usize>,
    pub weights: Array2<f64>,
}

impl SplitCrossWeights {
    /// Number of source pixels the cross points were generated from.
    pub fn pixels(&self) -> usize {
        self.mappings.nrows() / 4
    }
}

/// A pixelized mapper: the linear operator from source-plane pixels to
/// data pixels plus the source-plane structure the engine needs for
/// regularization and diagnostics.
#[derive(Debug, Clone)]
pub struct GridMapper {
    mapping_matrix: Array2<f64>,
    neighbors: PixelNeighbors,
    source_grid: Array2<f64>,
    split_cross: Option<SplitCrossWeights>,
    slim_index_for_sub_slim_index: Option<Array1<usize>>,
    sub_slim_indexes_for_pix_index: Option<Vec<Vec<usize>>>,
}

impl GridMapper {
    /// `mapping_matrix` has shape (data_pixels, pixels); `source_grid` has
    /// shape (pixels, 2) and holds the source-pixel centres.
    pub fn new(
        mapping_matrix: Array2<f64>,
        neighbors: PixelNeighbors,
        source_grid: Array2<f64>,
    ) -> Self {
        assert_eq!(
            mapping_matrix.ncols(),
            neighbors.pixels(),
            "mapping matrix columns must match the adjacency"
        );
        assert_eq!(
            source_grid.nrows(),
            neighbors.pixels(),
            "source grid rows must match the adjacency"
        );
        Self {
            mapping_matrix,
            neighbors,
            source_grid,
            split_cross: None,
            slim_index_for_sub_slim_index: None,
            sub_slim_indexes_for_pix_index: None,
        }
    }

    pub fn with_split_cross(mut self, split_cross: SplitCrossWeights) -> Self {
        self.split_cross = Some(split_cross);
        self
    }

    /// Attach explicit sub-pixel index structures from the geometry layer.
    /// Without them, diagnostics fall back to the identity slim mapping and
    /// the mapping-matrix nonzero pattern.
    pub fn with_sub_pixel_indexes(
        mut self,
        slim_index_for_sub_slim_index: Array1<usize>,
        sub_slim_indexes_for_pix_index: Vec<Vec<usize>>,
    ) -> Self {
        self.slim_index_for_sub_slim_index = Some(slim_index_for_sub_slim_index);
        self.sub_slim_indexes_for_pix_index = Some(sub_slim_indexes_for_pix_index);
        self
    }

    pub fn pixels(&self) -> usize {
        self.mapping_matrix.ncols()
    }

    pub fn data_pixels(&self) -> usize {
        self.mapping_matrix.nrows()
    }

    pub fn mapping_matrix(&self) -> &Array2<f64> {
        &self.mapping_matrix
    }

    pub fn neighbors(&self) -> &PixelNeighbors {
        &self.neighbors
    }

    pub fn source_grid(&self) -> &Array2<f64> {
        &self.source_grid
    }

    pub fn split_cross(&self) -> Option<&SplitCrossWeights> {
        self.split_cross.as_ref()
    }

    pub fn source_pixel_centre(&self, pixel: usize) -> [f64; 2] {
        [self.source_grid[[pixel, 0]], self.source_grid[[pixel, 1]]]
    }

    /// Sub-pixel to slim-pixel index map; identity when the geometry layer
    /// supplied none (sub-gridding disabled).
    pub fn slim_index_for_sub_slim_index(&self) -> Array1<usize> {
        match &self.slim_index_for_sub_slim_index {
            Some(map) => map.clone(),
            None => Array1::from_iter(0..self.data_pixels()),
        }
    }

    /// For each source pixel, the data sub-pixels it maps to; derived from
    /// the mapping-matrix nonzero pattern when not supplied explicitly.
    pub fn sub_slim_indexes_for_pix_index(&self) -> Vec<Vec<usize>> {
        match &self.sub_slim_indexes_for_pix_index {
            Some(indexes) => indexes.clone(),
            None => {
                let mut indexes = vec![Vec::new(); self.pixels()];
                for sub in 0..self.data_pixels() {
                    for (pix, slot) in indexes.iter_mut().enumerate() {
                        if self.mapping_matrix[[sub, pix]] != 0.0 {
                            slot.push(sub);
                        }
                    }
                }
                indexes
            }
        }
    }
}

/// One independent set of linear unknowns in an inversion. Pixelized
/// mappers are the only variant the engine currently solves for; the enum
/// keeps the dispatch closed so new component kinds are added here rather
/// than through an open trait hierarchy.
#[derive(Debug, Clone)]
pub enum LinearObj {
    Mapper(GridMapper),
}

impl LinearObj {
    pub fn pixels(&self) -> usize {
        match self {
            LinearObj::Mapper(mapper) => mapper.pixels(),
        }
    }

    pub fn mapping_matrix(&self) -> &Array2<f64> {
        match self {
            LinearObj::Mapper(mapper) => mapper.mapping_matrix(),
        }
    }

    pub fn as_mapper(&self) -> Option<&GridMapper> {
        match self {
            LinearObj::Mapper(mapper) => Some(mapper),
        }
    }
}
