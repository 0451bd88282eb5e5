//! Encode and decode a fitted `NearestNeighbors` index.
//!
//! The payload keeps the constructor parameters under `params` and the fitted
//! attributes under their trailing-underscore names. An attached KD-tree is
//! nested under `_tree` in the tree payload format; a brute-force index writes
//! `null` there.

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::codec::fields;
use crate::codec::tree;
use crate::error::{CodecError, Result};
use crate::index::kdtree::KdTree;
use crate::index::neighbors::{FitState, NearestNeighbors};
use crate::metric::{DistanceMetric, MetricParams, MetricRegistry};
use crate::types::{FitMethod, Matrix};

pub const META: &str = "nearest-neighbors";

pub fn encode(index: &NearestNeighbors) -> Result<Value> {
    let fit = index
        .fit_state()
        .ok_or_else(|| CodecError::Index("cannot encode an unfitted index".into()))?;

    let mut out = Map::new();
    out.insert("meta".into(), json!(META));
    out.insert(
        "effective_metric_params_".into(),
        Value::Object(fit.effective_metric_params.clone()),
    );
    out.insert("_fit_method".into(), serde_json::to_value(fit.fit_method)?);
    out.insert(
        "_fit_X".into(),
        fields::finite("_fit_X", fit.fit_x.as_slice(), &fit.fit_x)?,
    );
    out.insert("n_samples_fit_".into(), json!(fit.n_samples_fit));
    out.insert("effective_metric_".into(), json!(fit.effective_metric));
    out.insert("n_features_in_".into(), json!(fit.n_features_in));
    out.insert("params".into(), Value::Object(index.params().clone()));
    if let Some(names) = &fit.feature_names_in {
        out.insert("feature_names_in".into(), json!(names));
    }
    out.insert(
        "_tree".into(),
        match &fit.tree {
            Some(t) => tree::encode(t)?,
            None => Value::Null,
        },
    );

    debug!(
        method = %fit.fit_method,
        samples = fit.n_samples_fit,
        has_tree = fit.tree.is_some(),
        "encoded nearest-neighbors index"
    );
    Ok(Value::Object(out))
}

pub fn decode(value: &Value, registry: &MetricRegistry) -> Result<NearestNeighbors> {
    let payload = fields::object(value, "meta")?;
    let meta = fields::string(payload, "meta")?;
    if meta != META {
        return Err(CodecError::schema(
            "meta",
            format!("expected `{META}`, got `{meta}`"),
        ));
    }

    let params = match payload.get("params") {
        Some(Value::Object(params)) => params.clone(),
        Some(other) => {
            return Err(CodecError::schema(
                "params",
                format!("expected an object, got {}", fields::type_name(other)),
            ))
        }
        None => return Err(CodecError::schema("params", "missing")),
    };
    let mut index = NearestNeighbors::from_params(params)?;

    let fit_x = fields::matrix(payload, "_fit_X")?;
    let n_samples_fit = fields::usize(payload, "n_samples_fit_")?;
    if n_samples_fit != fit_x.nrows() {
        return Err(CodecError::schema(
            "n_samples_fit_",
            format!("{n_samples_fit} disagrees with {} rows in _fit_X", fit_x.nrows()),
        ));
    }
    let n_features_in = fields::usize(payload, "n_features_in_")?;
    if n_features_in != fit_x.ncols() {
        return Err(CodecError::schema(
            "n_features_in_",
            format!("{n_features_in} disagrees with {} columns in _fit_X", fit_x.ncols()),
        ));
    }

    let effective_metric = fields::string(payload, "effective_metric_")?.to_string();
    let effective_metric_params: MetricParams =
        fields::parse(payload, "effective_metric_params_")?;
    let metric = registry
        .by_short_name(&effective_metric, &effective_metric_params)
        .map_err(|e| CodecError::schema("effective_metric_", e.to_string()))?;
    let fit_method: FitMethod = fields::parse(payload, "_fit_method")?;

    let feature_names_in = match payload.get("feature_names_in") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let names: Vec<String> = fields::parse_value(v, "feature_names_in")?;
            if names.len() != n_features_in {
                return Err(CodecError::schema(
                    "feature_names_in",
                    format!("{} names for {n_features_in} features", names.len()),
                ));
            }
            Some(names)
        }
    };

    let tree = match fields::required(payload, "_tree")? {
        Value::Null => None,
        v => Some(tree::decode::<KdTree>(v, registry)?),
    };
    if fit_method == FitMethod::KdTree && tree.is_none() {
        return Err(CodecError::schema(
            "_tree",
            "a kd_tree index must carry a tree",
        ));
    }
    if let Some(t) = &tree {
        for field in tree_mismatches(t, &fit_x, metric.as_ref()) {
            warn!(field, "nested `_tree` disagrees with `{field}`; tree queries follow the tree");
        }
    }

    debug!(
        method = %fit_method,
        samples = n_samples_fit,
        has_tree = tree.is_some(),
        "decoded nearest-neighbors index"
    );

    index.set_fit_state(FitState {
        fit_x,
        n_samples_fit,
        n_features_in,
        effective_metric,
        effective_metric_params,
        fit_method,
        feature_names_in,
        tree,
        metric,
    });
    Ok(index)
}

/// Wrapper attributes the nested tree does not agree with.
fn tree_mismatches(tree: &KdTree, fit_x: &Matrix, metric: &dyn DistanceMetric) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if tree.data() != fit_x {
        fields.push("_fit_X");
    }
    if tree.metric().identity() != metric.identity() {
        fields.push("effective_metric_");
    }
    fields
}
