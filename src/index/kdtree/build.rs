//! Construction phase for the KD-tree.
//!
//! 1. Size the implicit tree from the point count and leaf size.
//! 2. Recursively bound each node's slice of the permutation, then split it
//!    at the median of its widest dimension until the slice fits a leaf or
//!    the tree runs out of levels.

use tracing::warn;

use crate::error::{CodecError, Result};
use crate::metric::DistanceMetric;
use crate::types::{Array3, Matrix};

use super::NodeData;

/// Arrays produced by a build, before they are moved into a `KdTree`.
pub(super) struct BuiltTree {
    pub idx_array: Vec<usize>,
    pub nodes: Vec<NodeData>,
    pub node_bounds: Array3,
    pub n_levels: usize,
}

/// Number of levels for `n` points, so that leaves hold about `leaf_size`
/// points: `floor(log2(max(1, (n - 1) / leaf_size))) + 1`.
pub fn level_count(n: usize, leaf_size: usize) -> usize {
    let ratio = (n.saturating_sub(1) as f64 / leaf_size as f64).max(1.0);
    ratio.log2().floor() as usize + 1
}

pub(super) fn build_tree(
    data: &Matrix,
    leaf_size: usize,
    metric: &dyn DistanceMetric,
) -> Result<BuiltTree> {
    let (n, d) = data.shape();
    if n == 0 || d == 0 {
        return Err(CodecError::Index(format!(
            "cannot build a kd-tree over a {n}x{d} matrix"
        )));
    }
    if leaf_size == 0 {
        return Err(CodecError::Index("leaf_size must be at least 1".into()));
    }
    if let Some(v) = data.as_slice().iter().find(|v| !v.is_finite()) {
        return Err(CodecError::Index(format!(
            "cannot build a kd-tree over non-finite value {v}"
        )));
    }

    let n_levels = level_count(n, leaf_size);
    let n_nodes = (1usize << n_levels) - 1;

    let mut builder = Builder {
        data,
        metric,
        idx_array: (0..n).collect(),
        nodes: vec![
            NodeData {
                is_leaf: true,
                ..NodeData::default()
            };
            n_nodes
        ],
        node_bounds: Array3::zeros([2, n_nodes, d]),
    };
    builder.recursive_build(0, 0, n);

    Ok(BuiltTree {
        idx_array: builder.idx_array,
        nodes: builder.nodes,
        node_bounds: builder.node_bounds,
        n_levels,
    })
}

struct Builder<'a> {
    data: &'a Matrix,
    metric: &'a dyn DistanceMetric,
    idx_array: Vec<usize>,
    nodes: Vec<NodeData>,
    node_bounds: Array3,
}

impl Builder<'_> {
    fn recursive_build(&mut self, i_node: usize, idx_start: usize, idx_end: usize) {
        self.init_node(i_node, idx_start, idx_end);
        let n_nodes = self.nodes.len();
        let node = &mut self.nodes[i_node];

        if 2 * i_node + 1 >= n_nodes {
            node.is_leaf = true;
            return;
        }
        if idx_end - idx_start < 2 {
            warn!(node = i_node, "internal node has fewer than two points");
            node.is_leaf = true;
            return;
        }

        node.is_leaf = false;
        let idx_mid = idx_start + (idx_end - idx_start) / 2;
        let dim = self.widest_dimension(idx_start, idx_end);
        self.partition(idx_start, idx_end, idx_mid, dim);
        self.recursive_build(2 * i_node + 1, idx_start, idx_mid);
        self.recursive_build(2 * i_node + 2, idx_mid, idx_end);
    }

    /// Bounding box and radius of the points in `idx_array[idx_start..idx_end]`.
    fn init_node(&mut self, i_node: usize, idx_start: usize, idx_end: usize) {
        let d = self.data.ncols();
        let mut lower = vec![f64::INFINITY; d];
        let mut upper = vec![f64::NEG_INFINITY; d];
        for &i in &self.idx_array[idx_start..idx_end] {
            for (j, &v) in self.data.row(i).iter().enumerate() {
                lower[j] = lower[j].min(v);
                upper[j] = upper[j].max(v);
            }
        }

        let mut half_widths = lower.iter().zip(&upper).map(|(lo, hi)| 0.5 * (hi - lo).abs());
        let radius = self
            .metric
            .rdist_to_dist(self.metric.reduce(&mut half_widths));

        self.node_bounds.lane_mut(0, i_node).copy_from_slice(&lower);
        self.node_bounds.lane_mut(1, i_node).copy_from_slice(&upper);
        self.nodes[i_node] = NodeData {
            idx_start,
            idx_end,
            is_leaf: false,
            radius,
        };
    }

    fn widest_dimension(&self, idx_start: usize, idx_end: usize) -> usize {
        let rows = &self.idx_array[idx_start..idx_end];
        (0..self.data.ncols())
            .map(|j| {
                let (lo, hi) = rows
                    .iter()
                    .map(|&i| self.data.row(i)[j])
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                        (lo.min(v), hi.max(v))
                    });
                (j, hi - lo)
            })
            .fold((0, f64::NEG_INFINITY), |best, (j, spread)| {
                if spread > best.1 {
                    (j, spread)
                } else {
                    best
                }
            })
            .0
    }

    /// Reorder the slice so the element at `idx_mid` is the median along
    /// `dim`, with smaller values before it. Ties break on row index so the
    /// layout is deterministic.
    fn partition(&mut self, idx_start: usize, idx_end: usize, idx_mid: usize, dim: usize) {
        let data = self.data;
        self.idx_array[idx_start..idx_end].select_nth_unstable_by(idx_mid - idx_start, |&a, &b| {
            data.row(a)[dim]
                .total_cmp(&data.row(b)[dim])
                .then(a.cmp(&b))
        });
    }
}
