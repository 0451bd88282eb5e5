//! Index collaborators for the codec.
//!
//! Provides the `StatefulTree` trait and its `TreeState` snapshot, the
//! `KdTree` implementation, and the flat `NearestNeighbors` wrapper.

pub mod kdtree;
pub mod neighbors;
pub mod state;
pub mod traits;

// Re-export the core types so callers can write
// `use crate::index::{KdTree, StatefulTree}`.
pub use kdtree::KdTree;
pub use neighbors::{Algorithm, FitState, NearestNeighbors, NeighborsParams};
pub use state::TreeState;
pub use traits::StatefulTree;
