//! Typed access to payload fields. Every error names the field it came from.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{CodecError, Result};
use crate::types::Matrix;

pub(crate) type Payload = Map<String, Value>;

pub(crate) fn object<'a>(value: &'a Value, what: &str) -> Result<&'a Payload> {
    value.as_object().ok_or_else(|| {
        CodecError::schema(what, format!("expected a JSON object, got {}", type_name(value)))
    })
}

pub(crate) fn required<'a>(payload: &'a Payload, field: &str) -> Result<&'a Value> {
    payload
        .get(field)
        .ok_or_else(|| CodecError::schema(field, "missing"))
}

pub(crate) fn string<'a>(payload: &'a Payload, field: &str) -> Result<&'a str> {
    let value = required(payload, field)?;
    value.as_str().ok_or_else(|| {
        CodecError::schema(field, format!("expected a string, got {}", type_name(value)))
    })
}

pub(crate) fn u64(payload: &Payload, field: &str) -> Result<u64> {
    let value = required(payload, field)?;
    value.as_u64().ok_or_else(|| {
        CodecError::schema(
            field,
            format!("expected a non-negative integer, got {value}"),
        )
    })
}

pub(crate) fn usize(payload: &Payload, field: &str) -> Result<usize> {
    let v = u64(payload, field)?;
    usize::try_from(v).map_err(|_| CodecError::schema(field, format!("{v} does not fit in usize")))
}

/// Deserialize a field with serde, attributing failures to the field.
pub(crate) fn parse<T: DeserializeOwned>(payload: &Payload, field: &str) -> Result<T> {
    parse_value(required(payload, field)?, field)
}

pub(crate) fn parse_value<T: DeserializeOwned>(value: &Value, field: &str) -> Result<T> {
    T::deserialize(value).map_err(|e| CodecError::schema(field, e.to_string()))
}

pub(crate) fn matrix(payload: &Payload, field: &str) -> Result<Matrix> {
    parse(payload, field)
}

/// Serialize a float container, refusing values JSON cannot carry.
pub(crate) fn finite<T: Serialize>(field: &str, values: &[f64], container: &T) -> Result<Value> {
    if let Some(v) = values.iter().find(|v| !v.is_finite()) {
        return Err(CodecError::schema(
            field,
            format!("non-finite value {v} cannot be written as JSON"),
        ));
    }
    Ok(serde_json::to_value(container)?)
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
