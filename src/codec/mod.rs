//! JSON codec for nearest-neighbor indexes and their spatial trees.
//!
//! The free functions use the process-wide [`default_registry`]. A [`Codec`]
//! carries its own registry and the codec section of [`Config`], which lets
//! callers accept extra metric module paths on decode.

mod fields;
pub mod model;
pub mod neighbors;
pub mod tree;

use std::path::Path;

use serde_json::Value;
use tracing::info;

use crate::config::{CodecConfig, Config};
use crate::error::Result;
use crate::index::kdtree::KdTree;
use crate::index::neighbors::NearestNeighbors;
use crate::io;
use crate::metric::{default_registry, MetricRegistry};
use crate::metrics::observe;

pub use model::Model;
pub use tree::FORMAT_VERSION;

/// Encode a KD-tree and its full internal state.
pub fn encode_tree(tree: &KdTree) -> Result<Value> {
    observe("tree", "encode", || tree::encode(tree))
}

/// Rebuild a KD-tree from [`encode_tree`] output.
///
/// # Errors
/// `CodecError::Schema` naming the first missing or malformed field,
/// `CodecError::DtypeParse` for an unreadable node layout, and
/// `CodecError::MetricResolution` for an unknown distance metric.
pub fn decode_tree(value: &Value) -> Result<KdTree> {
    observe("tree", "decode", || tree::decode(value, default_registry()))
}

/// Encode a fitted index, nesting its tree when it has one.
pub fn encode_index(index: &NearestNeighbors) -> Result<Value> {
    observe("index", "encode", || neighbors::encode(index))
}

pub fn decode_index(value: &Value) -> Result<NearestNeighbors> {
    observe("index", "decode", || neighbors::decode(value, default_registry()))
}

pub fn encode_model(model: &Model) -> Result<Value> {
    observe(model.meta(), "encode", || model::encode(model))
}

pub fn decode_model(value: &Value) -> Result<Model> {
    observe("model", "decode", || model::decode(value, default_registry()))
}

/// A codec with its own metric registry and output settings.
#[derive(Debug)]
pub struct Codec {
    registry: MetricRegistry,
    config: CodecConfig,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(MetricRegistry::with_defaults(), CodecConfig::default())
    }
}

impl Codec {
    pub fn new(registry: MetricRegistry, config: CodecConfig) -> Self {
        Self { registry, config }
    }

    /// Default registry extended with the configured module aliases.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = MetricRegistry::with_defaults();
        for (alias, target) in &config.codec.metric_module_aliases {
            registry.alias_module(alias, target);
        }
        Self::new(registry, config.codec.clone())
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut MetricRegistry {
        &mut self.registry
    }

    pub fn encode_tree(&self, tree: &KdTree) -> Result<Value> {
        encode_tree(tree)
    }

    pub fn decode_tree(&self, value: &Value) -> Result<KdTree> {
        observe("tree", "decode", || tree::decode(value, &self.registry))
    }

    pub fn encode_index(&self, index: &NearestNeighbors) -> Result<Value> {
        encode_index(index)
    }

    pub fn decode_index(&self, value: &Value) -> Result<NearestNeighbors> {
        observe("index", "decode", || neighbors::decode(value, &self.registry))
    }

    pub fn encode_model(&self, model: &Model) -> Result<Value> {
        encode_model(model)
    }

    pub fn decode_model(&self, value: &Value) -> Result<Model> {
        observe("model", "decode", || model::decode(value, &self.registry))
    }

    /// Encode `model` and write it to `path` as JSON.
    pub fn save_model(&self, model: &Model, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let value = self.encode_model(model)?;
        io::write_json(path, &value, self.config.pretty)?;
        info!(path = %path.display(), meta = model.meta(), "saved model");
        Ok(())
    }

    pub fn load_model(&self, path: impl AsRef<Path>) -> Result<Model> {
        let path = path.as_ref();
        let model = self.decode_model(&io::read_json(path)?)?;
        info!(path = %path.display(), meta = model.meta(), "loaded model");
        Ok(model)
    }
}
