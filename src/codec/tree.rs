//! Encode and decode the full internal state of a spatial tree.
//!
//! A tree payload carries `meta`, `format_version`, the training points under
//! `data`, the thirteen [`TreeState`] fields under their
//! [`TreeState::FIELD_NAMES`] keys, and `node_data_arr_dtype`, the layout
//! descriptor of the node records.
//!
//! Decoding goes in phases:
//! 1. Check the `meta` tag and format version.
//! 2. Check that every state field is present.
//! 3. Convert each field to its native type, parsing the record layout and
//!    resolving the distance metric.
//! 4. Build a shell tree over `data` and install the state in one step.

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::codec::fields::{self, Payload};
use crate::error::{CodecError, Result};
use crate::index::state::TreeState;
use crate::index::traits::StatefulTree;
use crate::metric::{MetricIdentity, MetricParams, MetricRegistry};
use crate::record::{RecordArray, RecordLayout};

/// Version written under `format_version`.
pub const FORMAT_VERSION: u64 = 1;

/// Key of the node record layout descriptor.
pub const DTYPE_KEY: &str = "node_data_arr_dtype";

pub fn encode<T: StatefulTree>(tree: &T) -> Result<Value> {
    let state = tree.state();
    let points = tree.points();

    let mut out = Map::new();
    out.insert("meta".into(), json!(T::META));
    out.insert("format_version".into(), json!(FORMAT_VERSION));
    out.insert("data".into(), fields::finite("data", points.as_slice(), points)?);
    out.insert(
        "data_arr".into(),
        fields::finite("data_arr", state.data_arr.as_slice(), &state.data_arr)?,
    );
    out.insert("idx_data_arr".into(), json!(state.idx_array));
    out.insert(
        "node_data_arr".into(),
        state
            .node_data
            .to_json()
            .map_err(|e| CodecError::schema("node_data_arr", e.to_string()))?,
    );
    out.insert(DTYPE_KEY.into(), json!(state.node_data.layout().descriptor()));
    out.insert(
        "node_bounds_arr".into(),
        fields::finite(
            "node_bounds_arr",
            state.node_bounds.as_slice(),
            &state.node_bounds,
        )?,
    );
    out.insert("leaf_size".into(), json!(state.leaf_size));
    out.insert("n_levels".into(), json!(state.n_levels));
    out.insert("n_nodes".into(), json!(state.n_nodes));
    out.insert("n_trims".into(), json!(state.n_trims));
    out.insert("n_leaves".into(), json!(state.n_leaves));
    out.insert("n_splits".into(), json!(state.n_splits));
    out.insert("n_calls".into(), json!(state.n_calls));
    out.insert(
        "dist_metric".into(),
        identity_to_json(&state.dist_metric.identity()),
    );
    out.insert(
        "sample_weight_arr".into(),
        match &state.sample_weight {
            Some(weights) => fields::finite("sample_weight_arr", weights, weights)?,
            None => Value::Null,
        },
    );

    debug!(
        meta = T::META,
        n_nodes = state.n_nodes,
        points = points.nrows(),
        metric = %state.dist_metric.identity(),
        "encoded tree state"
    );
    Ok(Value::Object(out))
}

pub fn decode<T: StatefulTree>(value: &Value, registry: &MetricRegistry) -> Result<T> {
    let payload = fields::object(value, "meta")?;
    check_header(payload, T::META)?;
    check_arity(payload)?;

    let data = fields::matrix(payload, "data")?;
    let state = decode_state(payload, registry)?;
    if data != state.data_arr {
        warn!("tree payload `data` differs from `data_arr`; the stored state wins");
    }

    // set_state reports an invalid leaf size against its own field.
    let mut tree = T::build(data, state.leaf_size.max(1), state.dist_metric.clone())
        .map_err(|e| CodecError::schema("data", e.to_string()))?;
    let n_nodes = state.n_nodes;
    tree.set_state(state)?;

    debug!(meta = T::META, n_nodes, "decoded tree state");
    Ok(tree)
}

fn check_header(payload: &Payload, meta: &str) -> Result<()> {
    let found = fields::string(payload, "meta")?;
    if found != meta {
        return Err(CodecError::schema(
            "meta",
            format!("expected `{meta}`, got `{found}`"),
        ));
    }
    match payload.get("format_version") {
        None => warn!("tree payload has no format_version, assuming {FORMAT_VERSION}"),
        Some(_) => {
            let version = fields::u64(payload, "format_version")?;
            if version != FORMAT_VERSION {
                return Err(CodecError::schema(
                    "format_version",
                    format!("unsupported version {version}, expected {FORMAT_VERSION}"),
                ));
            }
        }
    }
    Ok(())
}

fn check_arity(payload: &Payload) -> Result<()> {
    let found = TreeState::FIELD_NAMES
        .iter()
        .filter(|name| payload.contains_key(**name))
        .count();
    if let Some(missing) = TreeState::FIELD_NAMES
        .iter()
        .find(|name| !payload.contains_key(**name))
    {
        return Err(CodecError::schema(
            *missing,
            format!(
                "tree state needs {} fields, found {found}",
                TreeState::FIELD_COUNT
            ),
        ));
    }
    Ok(())
}

fn decode_state(payload: &Payload, registry: &MetricRegistry) -> Result<TreeState> {
    let idx_array = fields::parse::<Vec<u64>>(payload, "idx_data_arr")?
        .into_iter()
        .map(|i| {
            usize::try_from(i)
                .map_err(|_| CodecError::schema("idx_data_arr", format!("{i} does not fit in usize")))
        })
        .collect::<Result<Vec<_>>>()?;

    let descriptor = fields::string(payload, DTYPE_KEY)?;
    let layout = RecordLayout::parse(descriptor).map_err(|e| CodecError::DtypeParse {
        field: DTYPE_KEY.into(),
        descriptor: descriptor.to_string(),
        reason: e.to_string(),
    })?;
    let node_data = RecordArray::from_json(layout, fields::required(payload, "node_data_arr")?)
        .map_err(|e| CodecError::schema("node_data_arr", e.to_string()))?;

    let identity = identity_from_json(fields::required(payload, "dist_metric")?)?;
    let dist_metric = registry.resolve(&identity)?;

    let sample_weight = match fields::required(payload, "sample_weight_arr")? {
        Value::Null => None,
        value => Some(fields::parse_value::<Vec<f64>>(value, "sample_weight_arr")?),
    };

    Ok(TreeState {
        data_arr: fields::matrix(payload, "data_arr")?,
        idx_array,
        node_data,
        node_bounds: fields::parse(payload, "node_bounds_arr")?,
        leaf_size: fields::usize(payload, "leaf_size")?,
        n_levels: fields::usize(payload, "n_levels")?,
        n_nodes: fields::usize(payload, "n_nodes")?,
        n_trims: fields::u64(payload, "n_trims")?,
        n_leaves: fields::u64(payload, "n_leaves")?,
        n_splits: fields::u64(payload, "n_splits")?,
        n_calls: fields::u64(payload, "n_calls")?,
        dist_metric,
        sample_weight,
    })
}

/// `[module, name]`, or `[module, name, {params}]` for parameterized metrics.
pub fn identity_to_json(identity: &MetricIdentity) -> Value {
    if identity.params.is_empty() {
        json!([identity.module, identity.name])
    } else {
        json!([identity.module, identity.name, identity.params])
    }
}

pub fn identity_from_json(value: &Value) -> Result<MetricIdentity> {
    let malformed = || {
        CodecError::schema(
            "dist_metric",
            format!("expected [module, name] or [module, name, {{params}}], got {value}"),
        )
    };
    let items = value.as_array().ok_or_else(malformed)?;
    let (module, name, params) = match items.as_slice() {
        [module, name] => (module, name, MetricParams::new()),
        [module, name, Value::Object(params)] => (module, name, params.clone()),
        _ => return Err(malformed()),
    };
    match (module.as_str(), name.as_str()) {
        (Some(module), Some(name)) => Ok(MetricIdentity {
            module: module.to_string(),
            name: name.to_string(),
            params,
        }),
        _ => Err(malformed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::KdTree;
    use crate::metric::{default_registry, DistanceMetric, MinkowskiDistance};
    use crate::types::Matrix;

    fn square_tree() -> KdTree {
        let points = Matrix::from_rows(vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 1.0],
        ])
        .unwrap();
        KdTree::new(points, 2).unwrap()
    }

    #[test]
    fn test_payload_keys() {
        let value = encode(&square_tree()).unwrap();
        let payload = value.as_object().unwrap();
        assert_eq!(payload["meta"], "kdtree");
        assert_eq!(payload["format_version"], 1);
        assert_eq!(
            payload[DTYPE_KEY],
            "idx_start:i64,idx_end:i64,is_leaf:i64,radius:f64"
        );
        for name in TreeState::FIELD_NAMES {
            assert!(payload.contains_key(name), "missing {name}");
        }
        assert_eq!(payload["sample_weight_arr"], Value::Null);
        assert_eq!(
            payload["dist_metric"],
            json!(["neighbors_json::metric", "EuclideanDistance"])
        );
    }

    #[test]
    fn test_identity_json_forms() {
        let id = MinkowskiDistance::new(3.0).unwrap().identity();
        let value = identity_to_json(&id);
        assert_eq!(
            value,
            json!(["neighbors_json::metric", "MinkowskiDistance", {"p": 3.0}])
        );
        assert_eq!(identity_from_json(&value).unwrap(), id);

        for bad in [json!("euclidean"), json!(["a"]), json!(["a", 1]), json!(["a", "b", 3])] {
            let err = identity_from_json(&bad).unwrap_err();
            assert_eq!(err.field(), Some("dist_metric"));
        }
    }

    #[test]
    fn test_missing_format_version_is_accepted() {
        let mut value = encode(&square_tree()).unwrap();
        value.as_object_mut().unwrap().remove("format_version");
        assert!(decode::<KdTree>(&value, default_registry()).is_ok());
    }

    #[test]
    fn test_future_format_version_is_rejected() {
        let mut value = encode(&square_tree()).unwrap();
        value["format_version"] = json!(2);
        let err = decode::<KdTree>(&value, default_registry()).unwrap_err();
        assert_eq!(err.field(), Some("format_version"));
    }

    #[test]
    fn test_wrong_meta_is_rejected() {
        let mut value = encode(&square_tree()).unwrap();
        value["meta"] = json!("balltree");
        let err = decode::<KdTree>(&value, default_registry()).unwrap_err();
        assert_eq!(err.field(), Some("meta"));
    }

    #[test]
    fn test_negative_index_is_rejected() {
        let mut value = encode(&square_tree()).unwrap();
        value["idx_data_arr"] = json!([0, -1, 2, 3]);
        let err = decode::<KdTree>(&value, default_registry()).unwrap_err();
        assert_eq!(err.field(), Some("idx_data_arr"));
    }

    #[test]
    fn test_non_finite_weights_are_rejected_on_encode() {
        let tree = square_tree()
            .with_sample_weight(vec![1.0, f64::INFINITY, 1.0, 1.0])
            .unwrap();
        let err = encode(&tree).unwrap_err();
        assert_eq!(err.field(), Some("sample_weight_arr"));
    }
}
