use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    // Payload shape errors
    #[error("schema error in field `{field}`: {reason}")]
    Schema { field: String, reason: String },

    #[error("cannot resolve distance metric {module}::{name}: {reason}")]
    MetricResolution {
        module: String,
        name: String,
        reason: String,
    },

    #[error("cannot parse record layout in field `{field}` ({descriptor:?}): {reason}")]
    DtypeParse {
        field: String,
        descriptor: String,
        reason: String,
    },

    #[error("shape error: {0}")]
    Shape(#[from] crate::types::ShapeError),

    // Index errors
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index error: {0}")]
    Index(String),

    // Serialization errors
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),

    // Config errors
    #[error("config error: {0}")]
    Config(String),

    // IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;

impl CodecError {
    pub fn schema(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CodecError::Schema {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Short label used for the `status` dimension of codec metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CodecError::Schema { .. } | CodecError::Shape(_) => "schema",
            CodecError::MetricResolution { .. } => "metric_resolution",
            CodecError::DtypeParse { .. } => "dtype_parse",
            CodecError::DimensionMismatch { .. } | CodecError::Index(_) => "index",
            CodecError::Json(_) | CodecError::Toml(_) => "serialization",
            CodecError::Config(_) => "config",
            CodecError::Io(_) => "io",
        }
    }

    /// The payload field that triggered the error, when there is one.
    pub fn field(&self) -> Option<&str> {
        match self {
            CodecError::Schema { field, .. } | CodecError::DtypeParse { field, .. } => {
                Some(field)
            }
            CodecError::MetricResolution { .. } => Some("dist_metric"),
            _ => None,
        }
    }
}
