//! JSON byte and file helpers for encoded payloads.
//!
//! The codec functions themselves never touch the filesystem; these helpers
//! sit on either side of them.

use std::path::Path;

use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

/// Serialize a payload to JSON bytes.
pub fn to_bytes(value: &Value, pretty: bool) -> Result<Bytes> {
    let json = if pretty {
        serde_json::to_vec_pretty(value)?
    } else {
        serde_json::to_vec(value)?
    };
    Ok(Bytes::from(json))
}

/// Deserialize a payload from JSON bytes.
pub fn from_bytes(data: &[u8]) -> Result<Value> {
    Ok(serde_json::from_slice(data)?)
}

pub fn write_json(path: impl AsRef<Path>, value: &Value, pretty: bool) -> Result<()> {
    let path = path.as_ref();
    let data = to_bytes(value, pretty)?;
    std::fs::write(path, &data)?;
    debug!(path = %path.display(), bytes = data.len(), "wrote payload");
    Ok(())
}

pub fn read_json(path: impl AsRef<Path>) -> Result<Value> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    debug!(path = %path.display(), bytes = data.len(), "read payload");
    from_bytes(&data)
}
