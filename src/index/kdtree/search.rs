//! Search phase for the KD-tree.
//!
//! Depth-first descent that visits the nearer child first and trims any node
//! whose bounding box lies farther than the current k-th best candidate.
//! All comparisons happen in reduced distance; results are converted to true
//! distances once at the end.

use std::sync::atomic::Ordering;

use tracing::trace;

use crate::error::{CodecError, Result};
use crate::types::Neighbor;

use super::KdTree;

/// Sorted buffer of the best `k` candidates seen so far.
struct NeighborHeap {
    k: usize,
    rdists: Vec<f64>,
    indices: Vec<usize>,
}

impl NeighborHeap {
    fn new(k: usize) -> Self {
        Self {
            k,
            rdists: Vec::with_capacity(k + 1),
            indices: Vec::with_capacity(k + 1),
        }
    }

    fn largest(&self) -> f64 {
        if self.rdists.len() < self.k {
            f64::INFINITY
        } else {
            self.rdists[self.k - 1]
        }
    }

    /// Insert after any equal candidates so earlier finds win ties.
    fn push(&mut self, rdist: f64, index: usize) {
        if rdist >= self.largest() {
            return;
        }
        let pos = self.rdists.partition_point(|&d| d <= rdist);
        self.rdists.insert(pos, rdist);
        self.indices.insert(pos, index);
        self.rdists.truncate(self.k);
        self.indices.truncate(self.k);
    }
}

/// Execute a k-nearest-neighbor query for a single point.
pub fn query(tree: &KdTree, point: &[f64], k: usize) -> Result<Vec<Neighbor>> {
    let d = tree.data.ncols();
    if point.len() != d {
        return Err(CodecError::DimensionMismatch {
            expected: d,
            actual: point.len(),
        });
    }
    if k == 0 {
        return Ok(Vec::new());
    }
    if k > tree.data.nrows() {
        return Err(CodecError::Index(format!(
            "k={k} exceeds the number of indexed points ({})",
            tree.data.nrows()
        )));
    }

    let mut heap = NeighborHeap::new(k);
    let root_rdist = min_rdist(tree, 0, point);
    query_depth_first(tree, 0, point, &mut heap, root_rdist);

    trace!(k, found = heap.indices.len(), "kd-tree query complete");

    Ok(heap
        .indices
        .iter()
        .zip(&heap.rdists)
        .map(|(&index, &rdist)| Neighbor {
            index,
            distance: tree.metric.rdist_to_dist(rdist),
        })
        .collect())
}

fn query_depth_first(
    tree: &KdTree,
    i_node: usize,
    point: &[f64],
    heap: &mut NeighborHeap,
    rdist_lower_bound: f64,
) {
    let node = tree.nodes[i_node];

    if rdist_lower_bound > heap.largest() {
        tree.counters.trims.fetch_add(1, Ordering::Relaxed);
        return;
    }

    if node.is_leaf {
        tree.counters.leaves.fetch_add(1, Ordering::Relaxed);
        for &row in &tree.idx_array[node.idx_start..node.idx_end] {
            let rdist = tree.metric.rdist(point, tree.data.row(row));
            tree.counters.calls.fetch_add(1, Ordering::Relaxed);
            heap.push(rdist, row);
        }
        return;
    }

    tree.counters.splits.fetch_add(1, Ordering::Relaxed);
    let left = 2 * i_node + 1;
    let right = left + 1;
    let left_rdist = min_rdist(tree, left, point);
    let right_rdist = min_rdist(tree, right, point);

    if left_rdist <= right_rdist {
        query_depth_first(tree, left, point, heap, left_rdist);
        query_depth_first(tree, right, point, heap, right_rdist);
    } else {
        query_depth_first(tree, right, point, heap, right_rdist);
        query_depth_first(tree, left, point, heap, left_rdist);
    }
}

/// Reduced distance from `point` to the nearest corner/face of a node's box.
fn min_rdist(tree: &KdTree, i_node: usize, point: &[f64]) -> f64 {
    let lower = tree.node_bounds.lane(0, i_node);
    let upper = tree.node_bounds.lane(1, i_node);
    let mut gaps = point
        .iter()
        .zip(lower.iter().zip(upper))
        .map(|(&p, (&lo, &hi))| (lo - p).max(p - hi).max(0.0));
    tree.metric.reduce(&mut gaps)
}
