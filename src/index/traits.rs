//! Core trait for spatial trees whose internal state can be captured and
//! reinstalled wholesale.
//!
//! The tree codec is written against `StatefulTree` so it never reaches into
//! a concrete tree's fields: it reads a `TreeState` snapshot on encode, and on
//! decode builds a shell over the stored points and overwrites its state.

use crate::error::Result;
use crate::index::state::TreeState;
use crate::metric::DistanceMetric;
use crate::types::{Matrix, Neighbor};

/// A spatial partitioning tree with an exportable, reinstallable state.
pub trait StatefulTree: Sized {
    /// Discriminator written under the payload's `meta` key.
    const META: &'static str;

    /// Build a tree over `points`.
    ///
    /// # Errors
    /// Returns `CodecError::Index` if the points are empty, ragged, or
    /// contain non-finite values, or if `leaf_size` is zero.
    fn build(points: Matrix, leaf_size: usize, metric: Box<dyn DistanceMetric>) -> Result<Self>;

    /// The training points the tree indexes, in original row order.
    fn points(&self) -> &Matrix;

    /// Snapshot of the full internal state.
    fn state(&self) -> TreeState;

    /// Replace the full internal state.
    ///
    /// Either every field is installed or, on error, the tree is left as it
    /// was.
    ///
    /// # Errors
    /// Returns `CodecError::Schema` naming the first field whose shape is
    /// inconsistent with the rest of the state.
    fn set_state(&mut self, state: TreeState) -> Result<()>;

    /// The `k` nearest training points to `point`, closest first.
    fn query(&self, point: &[f64], k: usize) -> Result<Vec<Neighbor>>;
}
