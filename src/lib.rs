//! neighbors-json: JSON persistence for nearest-neighbor indexes.
//!
//! Round-trips a flat `NearestNeighbors` index and its optional KD-tree,
//! including the tree's complete internal state, through
//! `serde_json::Value`.

pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod io;
pub mod logging;
pub mod metric;
pub mod metrics;
pub mod record;
pub mod types;

pub use codec::{
    decode_index, decode_model, decode_tree, encode_index, encode_model, encode_tree, Codec,
    Model,
};
pub use error::{CodecError, Result};
