//! Dispatch on the payload's `meta` tag.

use serde_json::Value;

use crate::codec::{fields, neighbors, tree};
use crate::error::{CodecError, Result};
use crate::index::kdtree::KdTree;
use crate::index::neighbors::NearestNeighbors;
use crate::index::traits::StatefulTree;
use crate::metric::MetricRegistry;

/// Any object the codec can persist.
#[derive(Debug)]
pub enum Model {
    NearestNeighbors(NearestNeighbors),
    KdTree(KdTree),
}

impl Model {
    pub fn meta(&self) -> &'static str {
        match self {
            Model::NearestNeighbors(_) => neighbors::META,
            Model::KdTree(_) => KdTree::META,
        }
    }
}

impl From<NearestNeighbors> for Model {
    fn from(index: NearestNeighbors) -> Self {
        Model::NearestNeighbors(index)
    }
}

impl From<KdTree> for Model {
    fn from(tree: KdTree) -> Self {
        Model::KdTree(tree)
    }
}

pub fn encode(model: &Model) -> Result<Value> {
    match model {
        Model::NearestNeighbors(index) => neighbors::encode(index),
        Model::KdTree(t) => tree::encode(t),
    }
}

pub fn decode(value: &Value, registry: &MetricRegistry) -> Result<Model> {
    let payload = fields::object(value, "meta")?;
    match fields::string(payload, "meta")? {
        neighbors::META => neighbors::decode(value, registry).map(Model::NearestNeighbors),
        meta if meta == KdTree::META => tree::decode::<KdTree>(value, registry).map(Model::KdTree),
        other => Err(CodecError::schema(
            "meta",
            format!("unknown model type `{other}`"),
        )),
    }
}
