//! Structured record buffers.
//!
//! A `RecordArray` is a homogeneous array of fixed-layout records whose field
//! names and primitive types are only known at runtime, described by a
//! `RecordLayout`. Layouts travel as a descriptor string
//! (`idx_start:i64,idx_end:i64,is_leaf:i64,radius:f64`), see [`descriptor`].

pub mod descriptor;

use std::fmt;
use std::str::FromStr;

use serde_json::{Number, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("invalid record layout: {0}")]
    InvalidLayout(String),

    #[error("invalid layout descriptor: {0}")]
    Descriptor(String),

    #[error("record {index} has {actual} values, layout has {expected} fields")]
    Arity {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("record {index}, field `{field}`: {reason}")]
    Value {
        index: usize,
        field: String,
        reason: String,
    },
}

/// Primitive kind of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Int,
    UInt,
    Float,
    Bool,
}

/// A primitive field type: kind plus bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldType {
    kind: ScalarKind,
    bits: u16,
}

impl FieldType {
    pub const I8: FieldType = FieldType::raw(ScalarKind::Int, 8);
    pub const I16: FieldType = FieldType::raw(ScalarKind::Int, 16);
    pub const I32: FieldType = FieldType::raw(ScalarKind::Int, 32);
    pub const I64: FieldType = FieldType::raw(ScalarKind::Int, 64);
    pub const U8: FieldType = FieldType::raw(ScalarKind::UInt, 8);
    pub const U16: FieldType = FieldType::raw(ScalarKind::UInt, 16);
    pub const U32: FieldType = FieldType::raw(ScalarKind::UInt, 32);
    pub const U64: FieldType = FieldType::raw(ScalarKind::UInt, 64);
    pub const F16: FieldType = FieldType::raw(ScalarKind::Float, 16);
    pub const F32: FieldType = FieldType::raw(ScalarKind::Float, 32);
    pub const F64: FieldType = FieldType::raw(ScalarKind::Float, 64);
    pub const BOOL: FieldType = FieldType::raw(ScalarKind::Bool, 8);

    const fn raw(kind: ScalarKind, bits: u16) -> Self {
        Self { kind, bits }
    }

    /// Validated constructor; `None` for widths the kind does not support.
    pub fn new(kind: ScalarKind, bits: u16) -> Option<Self> {
        let ok = match kind {
            ScalarKind::Int | ScalarKind::UInt => matches!(bits, 8 | 16 | 32 | 64),
            ScalarKind::Float => matches!(bits, 16 | 32 | 64),
            ScalarKind::Bool => bits == 8,
        };
        ok.then_some(Self { kind, bits })
    }

    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    pub fn bits(&self) -> u16 {
        self.bits
    }

    pub fn byte_width(&self) -> usize {
        usize::from(self.bits / 8)
    }

    /// Convert `value` into this type, rejecting anything that would not be
    /// stored exactly (out-of-range integers, fractional values in integer
    /// fields, finite floats that overflow the field's width). Floats are
    /// rounded to the field's precision.
    pub fn coerce(&self, value: Scalar) -> Result<Scalar, String> {
        match self.kind {
            ScalarKind::Int => {
                let v: i128 = match value {
                    Scalar::Int(v) => v.into(),
                    Scalar::UInt(v) => v.into(),
                    Scalar::Bool(b) => b.into(),
                    Scalar::Float(f) => return Err(format!("expected integer, got {f}")),
                };
                let max = (1i128 << (self.bits - 1)) - 1;
                let min = -(1i128 << (self.bits - 1));
                if v < min || v > max {
                    return Err(format!("{v} does not fit in {self}"));
                }
                Ok(Scalar::Int(v as i64))
            }
            ScalarKind::UInt => {
                let v: i128 = match value {
                    Scalar::Int(v) => v.into(),
                    Scalar::UInt(v) => v.into(),
                    Scalar::Bool(b) => b.into(),
                    Scalar::Float(f) => return Err(format!("expected integer, got {f}")),
                };
                let max = if self.bits == 64 {
                    i128::from(u64::MAX)
                } else {
                    (1i128 << self.bits) - 1
                };
                if v < 0 || v > max {
                    return Err(format!("{v} does not fit in {self}"));
                }
                Ok(Scalar::UInt(v as u64))
            }
            ScalarKind::Float => {
                let v = value.as_f64();
                let rounded = match self.bits {
                    16 => half::f16::from_f64(v).to_f64(),
                    32 => f64::from(v as f32),
                    _ => v,
                };
                if v.is_finite() && !rounded.is_finite() {
                    return Err(format!("{v} overflows {self}"));
                }
                Ok(Scalar::Float(rounded))
            }
            ScalarKind::Bool => match value {
                Scalar::Bool(b) => Ok(Scalar::Bool(b)),
                Scalar::Int(0) | Scalar::UInt(0) => Ok(Scalar::Bool(false)),
                Scalar::Int(1) | Scalar::UInt(1) => Ok(Scalar::Bool(true)),
                other => Err(format!("expected boolean, got {other:?}")),
            },
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ScalarKind::Int => write!(f, "i{}", self.bits),
            ScalarKind::UInt => write!(f, "u{}", self.bits),
            ScalarKind::Float => write!(f, "f{}", self.bits),
            ScalarKind::Bool => write!(f, "bool"),
        }
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "bool" {
            return Ok(FieldType::BOOL);
        }
        let (kind, width) = match s.split_at_checked(1) {
            Some(("i", w)) => (ScalarKind::Int, w),
            Some(("u", w)) => (ScalarKind::UInt, w),
            Some(("f", w)) => (ScalarKind::Float, w),
            _ => return Err(format!("unknown field type {s:?}")),
        };
        let bits: u16 = width
            .parse()
            .map_err(|_| format!("bad bit width in field type {s:?}"))?;
        FieldType::new(kind, bits).ok_or_else(|| format!("unsupported field type {s:?}"))
    }
}

/// One value of a record field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Scalar::Int(v) => v as f64,
            Scalar::UInt(v) => v as f64,
            Scalar::Float(v) => v,
            Scalar::Bool(b) => f64::from(u8::from(b)),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Scalar::Int(v) => Some(v),
            Scalar::UInt(v) => i64::try_from(v).ok(),
            Scalar::Bool(b) => Some(i64::from(b)),
            Scalar::Float(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Scalar::Bool(b) => Some(b),
            Scalar::Int(v) => Some(v != 0),
            Scalar::UInt(v) => Some(v != 0),
            Scalar::Float(_) => None,
        }
    }

    fn from_json(value: &Value) -> Result<Self, String> {
        match value {
            Value::Bool(b) => Ok(Scalar::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Scalar::Int(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(Scalar::UInt(u))
                } else {
                    n.as_f64()
                        .map(Scalar::Float)
                        .ok_or_else(|| format!("unrepresentable number {n}"))
                }
            }
            other => Err(format!("expected a number or boolean, got {other}")),
        }
    }

    fn to_json(self) -> Result<Value, String> {
        match self {
            Scalar::Int(v) => Ok(Value::from(v)),
            Scalar::UInt(v) => Ok(Value::from(v)),
            Scalar::Bool(b) => Ok(Value::Bool(b)),
            Scalar::Float(v) => Number::from_f64(v)
                .map(Value::Number)
                .ok_or_else(|| format!("non-finite value {v} cannot be written as JSON")),
        }
    }
}

/// A named, typed field of a record layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordField {
    pub name: String,
    pub ty: FieldType,
}

impl RecordField {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Ordered field list of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    fields: Vec<RecordField>,
}

impl RecordLayout {
    /// Field names must be non-empty, unique, and free of the descriptor
    /// separators (`,` `:` quotes and whitespace).
    pub fn new(fields: Vec<RecordField>) -> Result<Self, RecordError> {
        if fields.is_empty() {
            return Err(RecordError::InvalidLayout("layout has no fields".into()));
        }
        for (i, field) in fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(RecordError::InvalidLayout(format!("field {i} has an empty name")));
            }
            if field
                .name
                .chars()
                .any(|c| matches!(c, ',' | ':' | '\'' | '"') || c.is_whitespace())
            {
                return Err(RecordError::InvalidLayout(format!(
                    "field name {:?} contains a reserved character",
                    field.name
                )));
            }
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(RecordError::InvalidLayout(format!(
                    "duplicate field name {:?}",
                    field.name
                )));
            }
        }
        Ok(Self { fields })
    }

    /// Parse a descriptor string, native or legacy form.
    pub fn parse(descriptor: &str) -> Result<Self, RecordError> {
        descriptor::parse(descriptor)
    }

    pub fn fields(&self) -> &[RecordField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&RecordField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Size in bytes of one packed record.
    pub fn itemsize(&self) -> usize {
        self.fields.iter().map(|f| f.ty.byte_width()).sum()
    }

    pub fn descriptor(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RecordLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{}", field.name, field.ty)?;
        }
        Ok(())
    }
}

impl FromStr for RecordLayout {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordLayout::parse(s)
    }
}

/// Homogeneous buffer of records sharing one layout.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordArray {
    layout: RecordLayout,
    records: Vec<Vec<Scalar>>,
}

impl RecordArray {
    pub fn new(layout: RecordLayout) -> Self {
        Self {
            layout,
            records: Vec::new(),
        }
    }

    pub fn with_capacity(layout: RecordLayout, capacity: usize) -> Self {
        Self {
            layout,
            records: Vec::with_capacity(capacity),
        }
    }

    /// Append one record, coercing each value into its field type.
    pub fn push(&mut self, values: Vec<Scalar>) -> Result<(), RecordError> {
        let index = self.records.len();
        if values.len() != self.layout.len() {
            return Err(RecordError::Arity {
                index,
                expected: self.layout.len(),
                actual: values.len(),
            });
        }
        let record = values
            .into_iter()
            .zip(&self.layout.fields)
            .map(|(value, field)| {
                field.ty.coerce(value).map_err(|reason| RecordError::Value {
                    index,
                    field: field.name.clone(),
                    reason,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.records.push(record);
        Ok(())
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, index: usize) -> &[Scalar] {
        &self.records[index]
    }

    pub fn records(&self) -> impl Iterator<Item = &[Scalar]> {
        self.records.iter().map(Vec::as_slice)
    }

    /// Value of field `name` in record `index`.
    pub fn get(&self, index: usize, name: &str) -> Option<Scalar> {
        let pos = self.layout.position(name)?;
        self.records.get(index).map(|r| r[pos])
    }

    /// Structure-preserving flatten: one JSON array per record.
    pub fn to_json(&self) -> Result<Value, RecordError> {
        let rows = self
            .records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                record
                    .iter()
                    .zip(&self.layout.fields)
                    .map(|(value, field)| {
                        value.to_json().map_err(|reason| RecordError::Value {
                            index,
                            field: field.name.clone(),
                            reason,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Array(rows))
    }

    /// Map stored per-record arrays back into `layout`.
    pub fn from_json(layout: RecordLayout, value: &Value) -> Result<Self, RecordError> {
        let rows = value.as_array().ok_or_else(|| {
            RecordError::InvalidLayout(format!("expected an array of records, got {value}"))
        })?;
        let mut array = RecordArray::with_capacity(layout, rows.len());
        for (index, row) in rows.iter().enumerate() {
            let items = row.as_array().ok_or_else(|| RecordError::Value {
                index,
                field: "*".into(),
                reason: format!("expected a record array, got {row}"),
            })?;
            if items.len() != array.layout.len() {
                return Err(RecordError::Arity {
                    index,
                    expected: array.layout.len(),
                    actual: items.len(),
                });
            }
            let values = items
                .iter()
                .zip(&array.layout.fields)
                .map(|(item, field)| {
                    Scalar::from_json(item).map_err(|reason| RecordError::Value {
                        index,
                        field: field.name.clone(),
                        reason,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            array.push(values)?;
        }
        Ok(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mixed_layout() -> RecordLayout {
        RecordLayout::new(vec![
            RecordField::new("id", FieldType::U32),
            RecordField::new("offset", FieldType::I16),
            RecordField::new("score", FieldType::F32),
            RecordField::new("weight", FieldType::F16),
            RecordField::new("active", FieldType::BOOL),
        ])
        .unwrap()
    }

    #[test]
    fn test_field_type_display_and_parse() {
        for ty in [
            FieldType::I8,
            FieldType::I64,
            FieldType::U16,
            FieldType::F16,
            FieldType::F64,
            FieldType::BOOL,
        ] {
            assert_eq!(ty.to_string().parse::<FieldType>().unwrap(), ty);
        }
        assert!("i12".parse::<FieldType>().is_err());
        assert!("f8".parse::<FieldType>().is_err());
        assert!("x64".parse::<FieldType>().is_err());
    }

    #[test]
    fn test_integer_range_checks() {
        assert_eq!(FieldType::I8.coerce(Scalar::Int(-128)), Ok(Scalar::Int(-128)));
        assert!(FieldType::I8.coerce(Scalar::Int(128)).is_err());
        assert!(FieldType::U8.coerce(Scalar::Int(-1)).is_err());
        assert_eq!(
            FieldType::U64.coerce(Scalar::UInt(u64::MAX)),
            Ok(Scalar::UInt(u64::MAX))
        );
        assert!(FieldType::I64.coerce(Scalar::Float(1.5)).is_err());
    }

    #[test]
    fn test_float_rounding_matches_width() {
        let Scalar::Float(v) = FieldType::F32.coerce(Scalar::Float(0.1)).unwrap() else {
            panic!("expected float");
        };
        assert_eq!(v, f64::from(0.1f32));
        let Scalar::Float(h) = FieldType::F16.coerce(Scalar::Float(0.1)).unwrap() else {
            panic!("expected float");
        };
        assert_eq!(h, half::f16::from_f64(0.1).to_f64());
    }

    #[test]
    fn test_float_overflow_is_rejected() {
        assert!(FieldType::F16.coerce(Scalar::Float(1.0e6)).is_err());
        assert!(FieldType::F32.coerce(Scalar::Float(1.0e300)).is_err());
        assert_eq!(
            FieldType::F64.coerce(Scalar::Float(1.0e300)),
            Ok(Scalar::Float(1.0e300))
        );
        assert_eq!(
            FieldType::F16.coerce(Scalar::Float(65504.0)),
            Ok(Scalar::Float(65504.0))
        );

        let layout = RecordLayout::new(vec![RecordField::new("radius", FieldType::F16)]).unwrap();
        let err = RecordArray::from_json(layout, &json!([[1.0e6]])).unwrap_err();
        assert!(matches!(err, RecordError::Value { index: 0, .. }));
    }

    #[test]
    fn test_layout_rejects_duplicates_and_reserved_names() {
        let dup = RecordLayout::new(vec![
            RecordField::new("a", FieldType::I8),
            RecordField::new("a", FieldType::I8),
        ]);
        assert!(matches!(dup, Err(RecordError::InvalidLayout(_))));
        let bad = RecordLayout::new(vec![RecordField::new("a:b", FieldType::I8)]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_json_rows_restore_into_layout() {
        let layout = mixed_layout();
        let rows = json!([[7, -3, 0.5, 0.25, true], [8, 12, 1.0, 2.0, 0]]);
        let array = RecordArray::from_json(layout.clone(), &rows).unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array.get(0, "id"), Some(Scalar::UInt(7)));
        assert_eq!(array.get(1, "active"), Some(Scalar::Bool(false)));
        assert_eq!(array.to_json().unwrap(), json!([[7, -3, 0.5, 0.25, true], [8, 12, 1.0, 2.0, false]]));
    }

    #[test]
    fn test_record_arity_is_enforced() {
        let rows = json!([[1, 2, 3.0]]);
        let err = RecordArray::from_json(mixed_layout(), &rows).unwrap_err();
        assert!(matches!(err, RecordError::Arity { expected: 5, actual: 3, .. }));
    }
}
