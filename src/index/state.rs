//! The fixed-arity internal state of a spatial tree.

use crate::metric::DistanceMetric;
use crate::record::RecordArray;
use crate::types::{Array3, Matrix};

/// Everything that determines a tree's queryable structure.
///
/// The field order is the positional contract listed in
/// [`TreeState::FIELD_NAMES`]; those names are also the payload keys.
#[derive(Debug, Clone)]
pub struct TreeState {
    /// Copy of the training points.
    pub data_arr: Matrix,
    /// Tree order to original row index.
    pub idx_array: Vec<usize>,
    /// Per-node metadata with a runtime-described layout.
    pub node_data: RecordArray,
    /// Per-node bounding volumes.
    pub node_bounds: Array3,
    pub leaf_size: usize,
    pub n_levels: usize,
    pub n_nodes: usize,
    pub n_trims: u64,
    pub n_leaves: u64,
    pub n_splits: u64,
    pub n_calls: u64,
    pub dist_metric: Box<dyn DistanceMetric>,
    pub sample_weight: Option<Vec<f64>>,
}

impl TreeState {
    pub const FIELD_COUNT: usize = 13;

    pub const FIELD_NAMES: [&'static str; Self::FIELD_COUNT] = [
        "data_arr",
        "idx_data_arr",
        "node_data_arr",
        "node_bounds_arr",
        "leaf_size",
        "n_levels",
        "n_nodes",
        "n_trims",
        "n_leaves",
        "n_splits",
        "n_calls",
        "dist_metric",
        "sample_weight_arr",
    ];
}

/// Metrics compare by identity; they carry no state beyond it.
impl PartialEq for TreeState {
    fn eq(&self, other: &Self) -> bool {
        self.data_arr == other.data_arr
            && self.idx_array == other.idx_array
            && self.node_data == other.node_data
            && self.node_bounds == other.node_bounds
            && self.leaf_size == other.leaf_size
            && self.n_levels == other.n_levels
            && self.n_nodes == other.n_nodes
            && self.n_trims == other.n_trims
            && self.n_leaves == other.n_leaves
            && self.n_splits == other.n_splits
            && self.n_calls == other.n_calls
            && self.dist_metric.identity() == other.dist_metric.identity()
            && self.sample_weight == other.sample_weight
    }
}
