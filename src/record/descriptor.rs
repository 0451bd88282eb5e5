//! Record layout descriptor strings.
//!
//! The native form is a comma-separated list of `name:type` entries in field
//! order, e.g. `idx_start:i64,idx_end:i64,is_leaf:i64,radius:f64`, where
//! `type` is one of `i8 i16 i32 i64 u8 u16 u32 u64 f16 f32 f64 bool`.
//!
//! Payloads written by older Python tooling carry NumPy structured-dtype
//! text instead, either as a tuple list
//! (`np.dtype([('idx_start', '<i8'), ('radius', '<f8')])`) or as the
//! aligned dict form (`{'names': [...], 'formats': [...], ...}`). Both are
//! accepted when parsing; formatting always emits the native form.

use lazy_static::lazy_static;
use regex::Regex;

use super::{FieldType, RecordError, RecordField, RecordLayout, ScalarKind};

lazy_static! {
    static ref TUPLE_FIELD: Regex =
        Regex::new(r#"\(\s*['"]([^'"]*)['"]\s*,\s*['"]([^'"]*)['"]\s*\)"#).unwrap();
    static ref DICT_NAMES: Regex = Regex::new(r#"['"]names['"]\s*:\s*\[([^\]]*)\]"#).unwrap();
    static ref DICT_FORMATS: Regex =
        Regex::new(r#"['"]formats['"]\s*:\s*\[([^\]]*)\]"#).unwrap();
    static ref QUOTED: Regex = Regex::new(r#"['"]([^'"]*)['"]"#).unwrap();
    static ref TYPE_CODE: Regex = Regex::new(r"^[<>|=]?([iufb])(\d+)$").unwrap();
}

/// Parse a descriptor in either the native or the legacy NumPy form.
pub fn parse(descriptor: &str) -> Result<RecordLayout, RecordError> {
    let text = descriptor.trim();
    if text.is_empty() {
        return Err(RecordError::Descriptor("descriptor is empty".into()));
    }

    let inner = text
        .strip_prefix("np.dtype(")
        .and_then(|rest| rest.strip_suffix(')'))
        .map(str::trim)
        .unwrap_or(text);

    if inner.starts_with('[') {
        parse_tuple_list(inner)
    } else if inner.starts_with('{') {
        parse_dict(inner)
    } else {
        parse_native(inner)
    }
}

fn parse_native(text: &str) -> Result<RecordLayout, RecordError> {
    let fields = text
        .split(',')
        .map(|entry| {
            let entry = entry.trim();
            let (name, ty) = entry.split_once(':').ok_or_else(|| {
                RecordError::Descriptor(format!("entry {entry:?} is not of the form name:type"))
            })?;
            let ty = ty.trim().parse::<FieldType>().map_err(RecordError::Descriptor)?;
            Ok(RecordField::new(name.trim(), ty))
        })
        .collect::<Result<Vec<_>, RecordError>>()?;
    RecordLayout::new(fields).map_err(as_descriptor_error)
}

fn parse_tuple_list(text: &str) -> Result<RecordLayout, RecordError> {
    let mut fields = Vec::new();
    for caps in TUPLE_FIELD.captures_iter(text) {
        fields.push(RecordField::new(&caps[1], numpy_type(&caps[2])?));
    }

    // Anything besides the matched tuples and list punctuation means a field
    // form we do not understand (sub-arrays, nested records, titles).
    let leftover = TUPLE_FIELD.replace_all(text, "");
    if let Some(c) = leftover
        .chars()
        .find(|c| !matches!(c, '[' | ']' | ',') && !c.is_whitespace())
    {
        return Err(RecordError::Descriptor(format!(
            "unsupported dtype syntax near {c:?} in {text:?}"
        )));
    }

    RecordLayout::new(fields).map_err(as_descriptor_error)
}

fn parse_dict(text: &str) -> Result<RecordLayout, RecordError> {
    let names = quoted_list(&DICT_NAMES, text, "names")?;
    let formats = quoted_list(&DICT_FORMATS, text, "formats")?;
    if names.len() != formats.len() {
        return Err(RecordError::Descriptor(format!(
            "dtype dict has {} names but {} formats",
            names.len(),
            formats.len()
        )));
    }
    let fields = names
        .into_iter()
        .zip(formats)
        .map(|(name, code)| Ok(RecordField::new(name, numpy_type(&code)?)))
        .collect::<Result<Vec<_>, RecordError>>()?;
    RecordLayout::new(fields).map_err(as_descriptor_error)
}

fn quoted_list(key: &Regex, text: &str, label: &str) -> Result<Vec<String>, RecordError> {
    let caps = key
        .captures(text)
        .ok_or_else(|| RecordError::Descriptor(format!("dtype dict has no '{label}' list")))?;
    Ok(QUOTED
        .captures_iter(&caps[1])
        .map(|c| c[1].to_string())
        .collect())
}

/// Map a NumPy type code (`<i8`, `|b1`, `<f2`, ...) to a field type.
/// NumPy widths are in bytes.
fn numpy_type(code: &str) -> Result<FieldType, RecordError> {
    let caps = TYPE_CODE
        .captures(code.trim())
        .ok_or_else(|| RecordError::Descriptor(format!("unsupported dtype code {code:?}")))?;
    let bytes: u16 = caps[2]
        .parse()
        .map_err(|_| RecordError::Descriptor(format!("bad width in dtype code {code:?}")))?;
    let kind = match &caps[1] {
        "i" => ScalarKind::Int,
        "u" => ScalarKind::UInt,
        "f" => ScalarKind::Float,
        _ => ScalarKind::Bool,
    };
    bytes
        .checked_mul(8)
        .and_then(|bits| FieldType::new(kind, bits))
        .ok_or_else(|| RecordError::Descriptor(format!("unsupported dtype code {code:?}")))
}

fn as_descriptor_error(e: RecordError) -> RecordError {
    match e {
        RecordError::InvalidLayout(reason) => RecordError::Descriptor(reason),
        other => other,
    }
}
