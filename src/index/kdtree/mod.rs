//! KD-tree over a fixed point set.
//!
//! The tree is stored as flat arrays in the classic implicit binary layout:
//! node `i` has children `2i + 1` and `2i + 2`, every node owns the slice
//! `idx_array[idx_start..idx_end]` of a permutation of the training rows, and
//! `node_bounds[0, i]` / `node_bounds[1, i]` hold the node's lower and upper
//! corners. Construction splits at the median of the widest dimension.

pub mod build;
pub mod search;

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::error::{CodecError, Result};
use crate::index::state::TreeState;
use crate::index::traits::StatefulTree;
use crate::metric::{DistanceMetric, EuclideanDistance};
use crate::record::{FieldType, RecordArray, RecordField, RecordLayout, Scalar, ScalarKind};
use crate::types::{Array3, Matrix, Neighbor};

/// Metadata of one tree node.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NodeData {
    pub idx_start: usize,
    pub idx_end: usize,
    pub is_leaf: bool,
    pub radius: f64,
}

impl NodeData {
    /// Record layout the KD-tree writes its nodes with.
    pub fn layout() -> RecordLayout {
        RecordLayout::new(vec![
            RecordField::new("idx_start", FieldType::I64),
            RecordField::new("idx_end", FieldType::I64),
            RecordField::new("is_leaf", FieldType::I64),
            RecordField::new("radius", FieldType::F64),
        ])
        .expect("node layout is valid")
    }

    fn to_record(self) -> Vec<Scalar> {
        vec![
            Scalar::Int(self.idx_start as i64),
            Scalar::Int(self.idx_end as i64),
            Scalar::Int(i64::from(self.is_leaf)),
            Scalar::Float(self.radius),
        ]
    }

    /// Write nodes into a record buffer with the native layout.
    pub fn to_records(nodes: &[NodeData]) -> RecordArray {
        let mut records = RecordArray::with_capacity(Self::layout(), nodes.len());
        for node in nodes {
            records
                .push(node.to_record())
                .expect("node records match their layout");
        }
        records
    }

    /// Read nodes from a record buffer of any layout that carries the four
    /// node fields with compatible kinds. Extra fields are ignored.
    pub fn from_records(records: &RecordArray) -> Result<Vec<NodeData>> {
        let layout = records.layout();
        let index_of = |name: &str, numeric_ok: bool| -> Result<usize> {
            let pos = layout.position(name).ok_or_else(|| {
                CodecError::schema(
                    "node_data_arr",
                    format!("record layout `{layout}` has no `{name}` field"),
                )
            })?;
            let kind = layout.fields()[pos].ty.kind();
            if kind == ScalarKind::Float && !numeric_ok {
                return Err(CodecError::schema(
                    "node_data_arr",
                    format!("field `{name}` must be an integer, layout is `{layout}`"),
                ));
            }
            Ok(pos)
        };
        let start_pos = index_of("idx_start", false)?;
        let end_pos = index_of("idx_end", false)?;
        let leaf_pos = index_of("is_leaf", false)?;
        let radius_pos = index_of("radius", true)?;

        records
            .records()
            .enumerate()
            .map(|(i, record)| {
                let offset = |pos: usize, name: &str| -> Result<usize> {
                    record[pos]
                        .as_i64()
                        .and_then(|v| usize::try_from(v).ok())
                        .ok_or_else(|| {
                            CodecError::schema(
                                "node_data_arr",
                                format!("node {i}: `{name}` must be a non-negative integer"),
                            )
                        })
                };
                Ok(NodeData {
                    idx_start: offset(start_pos, "idx_start")?,
                    idx_end: offset(end_pos, "idx_end")?,
                    is_leaf: record[leaf_pos].as_bool().unwrap_or(false),
                    radius: record[radius_pos].as_f64(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct Counters {
    trims: AtomicU64,
    leaves: AtomicU64,
    splits: AtomicU64,
    calls: AtomicU64,
}

impl Counters {
    fn from_values(trims: u64, leaves: u64, splits: u64, calls: u64) -> Self {
        Self {
            trims: AtomicU64::new(trims),
            leaves: AtomicU64::new(leaves),
            splits: AtomicU64::new(splits),
            calls: AtomicU64::new(calls),
        }
    }
}

/// Snapshot of the diagnostic counters a tree updates while querying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryCounters {
    pub n_trims: u64,
    pub n_leaves: u64,
    pub n_splits: u64,
    pub n_calls: u64,
}

/// A built KD-tree.
#[derive(Debug)]
pub struct KdTree {
    data: Matrix,
    idx_array: Vec<usize>,
    nodes: Vec<NodeData>,
    /// The node records as stored, in whatever layout they arrived with.
    node_records: RecordArray,
    node_bounds: Array3,
    leaf_size: usize,
    n_levels: usize,
    counters: Counters,
    metric: Box<dyn DistanceMetric>,
    sample_weight: Option<Vec<f64>>,
}

impl KdTree {
    /// Build a Euclidean KD-tree.
    pub fn new(points: Matrix, leaf_size: usize) -> Result<Self> {
        Self::with_metric(points, leaf_size, Box::new(EuclideanDistance))
    }

    pub fn with_metric(
        points: Matrix,
        leaf_size: usize,
        metric: Box<dyn DistanceMetric>,
    ) -> Result<Self> {
        let built = build::build_tree(&points, leaf_size, metric.as_ref())?;
        debug!(
            points = points.nrows(),
            dims = points.ncols(),
            leaf_size,
            n_levels = built.n_levels,
            n_nodes = built.nodes.len(),
            "built kd-tree"
        );
        Ok(Self {
            data: points,
            idx_array: built.idx_array,
            node_records: NodeData::to_records(&built.nodes),
            nodes: built.nodes,
            node_bounds: built.node_bounds,
            leaf_size,
            n_levels: built.n_levels,
            counters: Counters::default(),
            metric,
            sample_weight: None,
        })
    }

    /// Attach per-point sample weights; one weight per training row.
    pub fn with_sample_weight(mut self, weights: Vec<f64>) -> Result<Self> {
        if weights.len() != self.data.nrows() {
            return Err(CodecError::DimensionMismatch {
                expected: self.data.nrows(),
                actual: weights.len(),
            });
        }
        self.sample_weight = Some(weights);
        Ok(self)
    }

    pub fn data(&self) -> &Matrix {
        &self.data
    }

    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    pub fn n_levels(&self) -> usize {
        self.n_levels
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[NodeData] {
        &self.nodes
    }

    pub fn metric(&self) -> &dyn DistanceMetric {
        self.metric.as_ref()
    }

    pub fn sample_weight(&self) -> Option<&[f64]> {
        self.sample_weight.as_deref()
    }

    pub fn counters(&self) -> QueryCounters {
        QueryCounters {
            n_trims: self.counters.trims.load(Ordering::Relaxed),
            n_leaves: self.counters.leaves.load(Ordering::Relaxed),
            n_splits: self.counters.splits.load(Ordering::Relaxed),
            n_calls: self.counters.calls.load(Ordering::Relaxed),
        }
    }

    pub fn reset_counters(&self) {
        self.counters.trims.store(0, Ordering::Relaxed);
        self.counters.leaves.store(0, Ordering::Relaxed);
        self.counters.splits.store(0, Ordering::Relaxed);
        self.counters.calls.store(0, Ordering::Relaxed);
    }

    /// Query every row of `points`.
    pub fn query_many(&self, points: &Matrix, k: usize) -> Result<Vec<Vec<Neighbor>>> {
        points.rows().map(|p| self.query(p, k)).collect()
    }

    fn validate_state(state: &TreeState) -> Result<Vec<NodeData>> {
        let (n, d) = state.data_arr.shape();
        if n == 0 || d == 0 {
            return Err(CodecError::schema(
                "data_arr",
                format!("expected a non-empty matrix, got shape {n}x{d}"),
            ));
        }

        if state.idx_array.len() != n {
            return Err(CodecError::schema(
                "idx_data_arr",
                format!("expected {n} indices, got {}", state.idx_array.len()),
            ));
        }
        let mut seen = vec![false; n];
        for &i in &state.idx_array {
            if i >= n || std::mem::replace(&mut seen[i], true) {
                return Err(CodecError::schema(
                    "idx_data_arr",
                    format!("not a permutation of 0..{n} (offending index {i})"),
                ));
            }
        }

        if state.leaf_size == 0 {
            return Err(CodecError::schema("leaf_size", "must be at least 1"));
        }

        let expected_nodes = u32::try_from(state.n_levels)
            .ok()
            .and_then(|levels| 1usize.checked_shl(levels))
            .map(|n| n - 1);
        if state.n_levels == 0 || expected_nodes != Some(state.n_nodes) {
            return Err(CodecError::schema(
                "n_nodes",
                format!(
                    "{} nodes is inconsistent with {} levels",
                    state.n_nodes, state.n_levels
                ),
            ));
        }

        if state.node_data.len() != state.n_nodes {
            return Err(CodecError::schema(
                "node_data_arr",
                format!(
                    "expected {} node records, got {}",
                    state.n_nodes,
                    state.node_data.len()
                ),
            ));
        }
        let nodes = NodeData::from_records(&state.node_data)?;
        if let Some((i, node)) = nodes
            .iter()
            .enumerate()
            .find(|(_, node)| node.idx_start > node.idx_end || node.idx_end > n)
        {
            return Err(CodecError::schema(
                "node_data_arr",
                format!(
                    "node {i} covers {}..{}, outside 0..{n}",
                    node.idx_start, node.idx_end
                ),
            ));
        }
        if let Some(i) = (0..nodes.len()).find(|&i| !nodes[i].is_leaf && 2 * i + 2 >= nodes.len()) {
            return Err(CodecError::schema(
                "node_data_arr",
                format!("node {i} is marked internal but has no children"),
            ));
        }

        if state.node_bounds.shape() != [2, state.n_nodes, d] {
            return Err(CodecError::schema(
                "node_bounds_arr",
                format!(
                    "expected shape [2, {}, {d}], got {:?}",
                    state.n_nodes,
                    state.node_bounds.shape()
                ),
            ));
        }

        if let Some(weights) = &state.sample_weight {
            if weights.len() != n {
                return Err(CodecError::schema(
                    "sample_weight_arr",
                    format!("expected {n} weights, got {}", weights.len()),
                ));
            }
        }

        Ok(nodes)
    }
}

impl StatefulTree for KdTree {
    const META: &'static str = "kdtree";

    fn build(points: Matrix, leaf_size: usize, metric: Box<dyn DistanceMetric>) -> Result<Self> {
        Self::with_metric(points, leaf_size, metric)
    }

    fn points(&self) -> &Matrix {
        &self.data
    }

    fn state(&self) -> TreeState {
        let counters = self.counters();
        TreeState {
            data_arr: self.data.clone(),
            idx_array: self.idx_array.clone(),
            node_data: self.node_records.clone(),
            node_bounds: self.node_bounds.clone(),
            leaf_size: self.leaf_size,
            n_levels: self.n_levels,
            n_nodes: self.nodes.len(),
            n_trims: counters.n_trims,
            n_leaves: counters.n_leaves,
            n_splits: counters.n_splits,
            n_calls: counters.n_calls,
            dist_metric: self.metric.clone(),
            sample_weight: self.sample_weight.clone(),
        }
    }

    fn set_state(&mut self, state: TreeState) -> Result<()> {
        let nodes = Self::validate_state(&state)?;
        *self = KdTree {
            data: state.data_arr,
            idx_array: state.idx_array,
            nodes,
            node_records: state.node_data,
            node_bounds: state.node_bounds,
            leaf_size: state.leaf_size,
            n_levels: state.n_levels,
            counters: Counters::from_values(
                state.n_trims,
                state.n_leaves,
                state.n_splits,
                state.n_calls,
            ),
            metric: state.dist_metric,
            sample_weight: state.sample_weight,
        };
        Ok(())
    }

    fn query(&self, point: &[f64], k: usize) -> Result<Vec<Neighbor>> {
        search::query(self, point, k)
    }
}
