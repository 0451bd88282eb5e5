mod common;

use common::assertions::{
    assert_dtype_parse_error, assert_metric_resolution_error, assert_same_batches,
    assert_same_neighbors, assert_schema_error,
};
use common::points::{clustered_points, grid_points, random_points, unit_square};

use neighbors_json::index::{KdTree, StatefulTree, TreeState};
use neighbors_json::metric::{DistanceMetric, ManhattanDistance, MinkowskiDistance};
use neighbors_json::types::Matrix;
use neighbors_json::{decode_tree, encode_tree, io, CodecError};

use proptest::prelude::*;
use serde_json::{json, Value};

fn round_trip(tree: &KdTree) -> KdTree {
    decode_tree(&encode_tree(tree).unwrap()).unwrap()
}

// ─── Round trips ───

#[test]
fn test_four_point_scenario() {
    let tree = KdTree::new(unit_square(), 2).unwrap();
    let decoded = round_trip(&tree);

    let before = tree.query(&[0.1, 0.1], 1).unwrap();
    let after = decoded.query(&[0.1, 0.1], 1).unwrap();
    assert_eq!(before[0].index, 0);
    assert_same_neighbors(&before, &after);
}

#[test]
fn test_round_trip_preserves_state() {
    let tree = KdTree::new(clustered_points(4, 25, 3, 0.5), 8).unwrap();
    let decoded = round_trip(&tree);
    assert_eq!(decoded.state(), tree.state());
    assert_eq!(decoded.points(), tree.points());
}

#[test]
fn test_round_trip_query_identity() {
    let tree = KdTree::new(random_points(500, 4, 42), 16).unwrap();
    let decoded = round_trip(&tree);
    let queries = random_points(25, 4, 7);
    assert_same_batches(
        &tree.query_many(&queries, 10).unwrap(),
        &decoded.query_many(&queries, 10).unwrap(),
    );
}

#[test]
fn test_tie_order_survives() {
    let tree = KdTree::new(grid_points(8), 3).unwrap();
    let decoded = round_trip(&tree);
    for point in [[3.5, 3.5], [0.0, 0.0], [7.0, 3.0]] {
        assert_same_neighbors(
            &tree.query(&point, 6).unwrap(),
            &decoded.query(&point, 6).unwrap(),
        );
    }
}

#[test]
fn test_counters_survive() {
    let tree = KdTree::new(random_points(200, 2, 3), 10).unwrap();
    for point in random_points(5, 2, 4).rows() {
        tree.query(point, 3).unwrap();
    }
    let counters = tree.counters();
    assert!(counters.n_calls > 0);

    let value = encode_tree(&tree).unwrap();
    assert_eq!(value["n_calls"], json!(counters.n_calls));
    assert_eq!(value["n_trims"], json!(counters.n_trims));

    let decoded = decode_tree(&value).unwrap();
    assert_eq!(decoded.counters(), counters);
}

#[test]
fn test_sample_weights_survive() {
    let weights: Vec<f64> = (0..4).map(|i| 0.5 + i as f64).collect();
    let tree = KdTree::new(unit_square(), 2)
        .unwrap()
        .with_sample_weight(weights.clone())
        .unwrap();
    let value = encode_tree(&tree).unwrap();
    assert_eq!(value["sample_weight_arr"], json!(weights));
    assert_eq!(decode_tree(&value).unwrap().sample_weight(), Some(&weights[..]));
}

#[test]
fn test_minkowski_p_survives() {
    let metric = Box::new(MinkowskiDistance::new(3.0).unwrap());
    let tree = KdTree::with_metric(random_points(100, 3, 11), 5, metric).unwrap();
    let value = encode_tree(&tree).unwrap();
    assert_eq!(value["dist_metric"][2], json!({"p": 3.0}));

    let decoded = decode_tree(&value).unwrap();
    assert_eq!(decoded.metric().identity(), tree.metric().identity());
    let query = [0.2, -0.4, 0.9];
    assert_same_neighbors(
        &tree.query(&query, 7).unwrap(),
        &decoded.query(&query, 7).unwrap(),
    );
}

#[test]
fn test_parameterless_metric_uses_two_element_identity() {
    let tree = KdTree::with_metric(unit_square(), 2, Box::new(ManhattanDistance)).unwrap();
    let value = encode_tree(&tree).unwrap();
    assert_eq!(
        value["dist_metric"],
        json!(["neighbors_json::metric", "ManhattanDistance"])
    );
    assert_eq!(round_trip(&tree).metric().identity(), ManhattanDistance.identity());
}

#[test]
fn test_round_trip_through_bytes() {
    let tree = KdTree::new(random_points(300, 5, 99), 20).unwrap();
    let bytes = io::to_bytes(&encode_tree(&tree).unwrap(), false).unwrap();
    let decoded = decode_tree(&io::from_bytes(&bytes).unwrap()).unwrap();
    assert_eq!(decoded.state(), tree.state());
}

// ─── Schema errors ───

#[test]
fn test_missing_state_field_is_named() {
    let tree = KdTree::new(unit_square(), 2).unwrap();
    for name in TreeState::FIELD_NAMES {
        let mut value = encode_tree(&tree).unwrap();
        value.as_object_mut().unwrap().remove(name);
        let result = decode_tree(&value);
        assert_schema_error(&result, name);
        let message = result.unwrap_err().to_string();
        assert!(message.contains("found 12"), "{message}");
    }
}

#[test]
fn test_null_sample_weight_counts_as_present() {
    let value = encode_tree(&KdTree::new(unit_square(), 2).unwrap()).unwrap();
    assert_eq!(value["sample_weight_arr"], Value::Null);
    assert!(decode_tree(&value).unwrap().sample_weight().is_none());
}

#[test]
fn test_missing_data_or_descriptor() {
    let tree = KdTree::new(unit_square(), 2).unwrap();
    for name in ["data", "node_data_arr_dtype", "meta"] {
        let mut value = encode_tree(&tree).unwrap();
        value.as_object_mut().unwrap().remove(name);
        assert_schema_error(&decode_tree(&value), name);
    }
}

#[test]
fn test_non_object_payload() {
    assert_schema_error(&decode_tree(&json!([1, 2, 3])), "meta");
}

#[test]
fn test_inconsistent_node_count() {
    let mut value = encode_tree(&KdTree::new(random_points(50, 2, 1), 5).unwrap()).unwrap();
    let n_nodes = value["n_nodes"].as_u64().unwrap();
    value["n_nodes"] = json!(n_nodes + 2);
    assert_schema_error(&decode_tree(&value), "n_nodes");
}

#[test]
fn test_index_array_must_be_a_permutation() {
    let mut value = encode_tree(&KdTree::new(unit_square(), 2).unwrap()).unwrap();
    value["idx_data_arr"] = json!([0, 0, 1, 2]);
    assert_schema_error(&decode_tree(&value), "idx_data_arr");
}

#[test]
fn test_bounds_shape_is_checked() {
    let mut value = encode_tree(&KdTree::new(unit_square(), 2).unwrap()).unwrap();
    value["node_bounds_arr"] = json!([[[0.0, 0.0]]]);
    assert_schema_error(&decode_tree(&value), "node_bounds_arr");
}

#[test]
fn test_record_arity_mismatch() {
    let mut value = encode_tree(&KdTree::new(random_points(40, 2, 5), 4).unwrap()).unwrap();
    value["node_data_arr"][0] = json!([0, 40, 0]);
    assert_schema_error(&decode_tree(&value), "node_data_arr");
}

#[test]
fn test_record_value_type_mismatch() {
    let mut value = encode_tree(&KdTree::new(unit_square(), 2).unwrap()).unwrap();
    value["node_data_arr"][0][0] = json!("zero");
    assert_schema_error(&decode_tree(&value), "node_data_arr");
}

#[test]
fn test_negative_counter_is_rejected() {
    let mut value = encode_tree(&KdTree::new(unit_square(), 2).unwrap()).unwrap();
    value["n_calls"] = json!(-3);
    assert_schema_error(&decode_tree(&value), "n_calls");
}

// ─── Metric resolution ───

#[test]
fn test_unknown_metric_module() {
    let mut value = encode_tree(&KdTree::new(unit_square(), 2).unwrap()).unwrap();
    value["dist_metric"] = json!(["mypackage.metrics", "EuclideanDistance"]);
    assert_metric_resolution_error(&decode_tree(&value));
}

#[test]
fn test_unknown_metric_name() {
    let mut value = encode_tree(&KdTree::new(unit_square(), 2).unwrap()).unwrap();
    value["dist_metric"] = json!(["neighbors_json::metric", "HaversineDistance"]);
    assert_metric_resolution_error(&decode_tree(&value));
}

#[test]
fn test_invalid_metric_params() {
    let mut value = encode_tree(&KdTree::new(unit_square(), 2).unwrap()).unwrap();
    value["dist_metric"] = json!(["neighbors_json::metric", "MinkowskiDistance", {"p": 0.5}]);
    assert_metric_resolution_error(&decode_tree(&value));
}

#[test]
fn test_sklearn_module_path_resolves() {
    let tree = KdTree::new(random_points(30, 2, 8), 4).unwrap();
    let mut value = encode_tree(&tree).unwrap();
    value["dist_metric"] = json!(["sklearn.metrics._dist_metrics", "EuclideanDistance"]);
    let decoded = decode_tree(&value).unwrap();
    assert_same_neighbors(
        &tree.query(&[0.0, 0.0], 4).unwrap(),
        &decoded.query(&[0.0, 0.0], 4).unwrap(),
    );
}

// ─── Record layout descriptors ───

#[test]
fn test_legacy_numpy_descriptors() {
    let tree = KdTree::new(random_points(80, 3, 21), 6).unwrap();
    let expected = tree.query(&[0.1, 0.2, 0.3], 5).unwrap();
    for descriptor in [
        "np.dtype([('idx_start', '<i8'), ('idx_end', '<i8'), ('is_leaf', '<i8'), ('radius', '<f8')])",
        "[('idx_start', '<i8'), ('idx_end', '<i8'), ('is_leaf', '<i8'), ('radius', '<f8')]",
        "{'names': ['idx_start', 'idx_end', 'is_leaf', 'radius'], \
         'formats': ['<i8', '<i8', '<i8', '<f8'], \
         'offsets': [0, 8, 16, 24], 'itemsize': 32, 'aligned': True}",
    ] {
        let mut value = encode_tree(&tree).unwrap();
        value["node_data_arr_dtype"] = json!(descriptor);
        let decoded = decode_tree(&value).unwrap();
        assert_same_neighbors(&expected, &decoded.query(&[0.1, 0.2, 0.3], 5).unwrap());
    }
}

#[test]
fn test_narrower_node_layout_is_accepted() {
    let tree = KdTree::new(random_points(60, 2, 13), 4).unwrap();
    let mut value = encode_tree(&tree).unwrap();
    value["node_data_arr_dtype"] = json!("idx_start:u32,idx_end:u32,is_leaf:bool,radius:f64");
    for record in value["node_data_arr"].as_array_mut().unwrap() {
        record[2] = json!(record[2] == json!(1));
    }
    let decoded = decode_tree(&value).unwrap();
    assert_eq!(decoded.nodes(), tree.nodes());
    let reencoded = encode_tree(&decoded).unwrap();
    assert_eq!(
        reencoded["node_data_arr_dtype"],
        "idx_start:u32,idx_end:u32,is_leaf:bool,radius:f64"
    );
}

#[test]
fn test_unparsable_descriptor() {
    let mut value = encode_tree(&KdTree::new(unit_square(), 2).unwrap()).unwrap();
    for descriptor in ["idx_start", "[('idx_start', '<c16')]", "a:i64,a:i64", ""] {
        value["node_data_arr_dtype"] = json!(descriptor);
        assert_dtype_parse_error(&decode_tree(&value));
    }
}

#[test]
fn test_layout_missing_node_field() {
    let mut value = encode_tree(&KdTree::new(unit_square(), 2).unwrap()).unwrap();
    value["node_data_arr_dtype"] = json!("idx_start:i64,idx_end:i64,leaf:i64,radius:f64");
    assert_schema_error(&decode_tree(&value), "node_data_arr");
}

// ─── Encode ───

#[test]
fn test_encode_does_not_mutate() {
    let tree = KdTree::new(random_points(64, 2, 17), 4).unwrap();
    let before = tree.state();
    let first = encode_tree(&tree).unwrap();
    let second = encode_tree(&tree).unwrap();
    assert_eq!(first, second);
    assert_eq!(tree.state(), before);
}

#[test]
fn test_data_matches_data_arr() {
    let points = random_points(20, 2, 2);
    let value = encode_tree(&KdTree::new(points.clone(), 4).unwrap()).unwrap();
    assert_eq!(value["data"], value["data_arr"]);
    let data: Matrix = serde_json::from_value(value["data"].clone()).unwrap();
    assert_eq!(data, points);
}

#[test]
fn test_shell_build_errors_are_reported() {
    let mut value = encode_tree(&KdTree::new(unit_square(), 2).unwrap()).unwrap();
    value["data"] = json!([]);
    let err = decode_tree(&value).unwrap_err();
    assert!(matches!(err, CodecError::Schema { .. }), "{err:?}");
}

// ─── Properties ───

fn point_sets() -> impl Strategy<Value = (Vec<Vec<f64>>, usize, Vec<f64>)> {
    (1usize..5).prop_flat_map(|dims| {
        (
            prop::collection::vec(prop::collection::vec(-100.0f64..100.0, dims), 1..80),
            1usize..10,
            prop::collection::vec(-120.0f64..120.0, dims),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_tree_round_trip_answers_identically((rows, leaf_size, query) in point_sets()) {
        let n = rows.len();
        let tree = KdTree::new(Matrix::from_rows(rows).unwrap(), leaf_size).unwrap();
        let decoded = round_trip(&tree);
        let k = n.min(4);

        let expected = tree.query(&query, k).unwrap();
        let actual = decoded.query(&query, k).unwrap();
        prop_assert_eq!(expected.len(), actual.len());
        for (e, a) in expected.iter().zip(&actual) {
            prop_assert_eq!(e.index, a.index);
            prop_assert_eq!(e.distance.to_bits(), a.distance.to_bits());
        }
    }

    #[test]
    fn prop_tree_matches_brute_force(rows in prop::collection::vec(prop::collection::vec(-10.0f64..10.0, 2), 1..60)) {
        let points = Matrix::from_rows(rows).unwrap();
        let tree = KdTree::new(points.clone(), 3).unwrap();
        let query = [0.5, -0.5];
        let k = points.nrows().min(5);

        let mut brute: Vec<f64> = points.rows().map(|r| tree.metric().dist(&query, r)).collect();
        brute.sort_by(f64::total_cmp);
        let found = tree.query(&query, k).unwrap();
        for (hit, want) in found.iter().zip(&brute) {
            prop_assert!((hit.distance - want).abs() < 1e-9);
        }
    }
}
