use std::time::Instant;

use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

use crate::error::Result;

lazy_static::lazy_static! {
    pub static ref CODEC_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "neighbors_json_codec_operations_total", "Codec operations",
        &["payload", "direction", "status"]
    ).unwrap();
    pub static ref CODEC_DURATION: HistogramVec = register_histogram_vec!(
        "neighbors_json_codec_duration_seconds", "Codec operation duration",
        &["payload", "direction"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();
}

pub fn init() {
    lazy_static::initialize(&CODEC_OPERATIONS_TOTAL);
    lazy_static::initialize(&CODEC_DURATION);
}

/// Text exposition of every metric in the default registry.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buf) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Run one codec operation, counting its outcome and timing it.
pub(crate) fn observe<T>(
    payload: &str,
    direction: &str,
    op: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let start = Instant::now();
    let result = op();
    CODEC_DURATION
        .with_label_values(&[payload, direction])
        .observe(start.elapsed().as_secs_f64());
    let status = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    CODEC_OPERATIONS_TOTAL
        .with_label_values(&[payload, direction, status])
        .inc();
    result
}
