use neighbors_json::error::CodecError;
use neighbors_json::types::Neighbor;

/// Assert two query results are identical: same indices, same order, same
/// distances bit for bit.
pub fn assert_same_neighbors(expected: &[Neighbor], actual: &[Neighbor]) {
    assert_eq!(
        expected.len(),
        actual.len(),
        "result lengths differ: {expected:?} vs {actual:?}"
    );
    for (i, (e, a)) in expected.iter().zip(actual).enumerate() {
        assert_eq!(e.index, a.index, "rank {i}: index differs. {expected:?} vs {actual:?}");
        assert_eq!(
            e.distance.to_bits(),
            a.distance.to_bits(),
            "rank {i}: distance differs ({} vs {})",
            e.distance,
            a.distance
        );
    }
}

/// Assert that every batch of results is identical.
pub fn assert_same_batches(expected: &[Vec<Neighbor>], actual: &[Vec<Neighbor>]) {
    assert_eq!(expected.len(), actual.len());
    for (e, a) in expected.iter().zip(actual) {
        assert_same_neighbors(e, a);
    }
}

/// Assert that a result is a schema error on `field`.
pub fn assert_schema_error<T: std::fmt::Debug>(result: &Result<T, CodecError>, field: &str) {
    match result {
        Err(CodecError::Schema { field: f, .. }) if f == field => {}
        other => panic!("expected schema error on `{field}`, got: {other:?}"),
    }
}

pub fn assert_metric_resolution_error<T: std::fmt::Debug>(result: &Result<T, CodecError>) {
    match result {
        Err(CodecError::MetricResolution { .. }) => {}
        other => panic!("expected MetricResolution error, got: {other:?}"),
    }
}

pub fn assert_dtype_parse_error<T: std::fmt::Debug>(result: &Result<T, CodecError>) {
    match result {
        Err(CodecError::DtypeParse { .. }) => {}
        other => panic!("expected DtypeParse error, got: {other:?}"),
    }
}
