//! Typed field values
//!
//! This module defines `TypedValue`, the self-describing value type for
//! heterogeneous entity fields. Every variant maps 1:1 onto a codec tag
//! (see `codec`), and the JSON bridge supports the debugging row format.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unified value type for entity fields
///
/// Integer widths are preserved through encode/decode; the JSON bridge
/// collapses them per JSON number semantics (see `from_json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedValue {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 32-bit signed integer
    Int32(i32),
    /// 64-bit signed integer
    Int64(i64),
    /// 32-bit unsigned integer
    UInt32(u32),
    /// 64-bit unsigned integer
    UInt64(u64),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Binary(Vec<u8>),
    /// Dense f32 vector (embeddings)
    VectorFloat(Vec<f32>),
    /// Array of values
    Array(Vec<TypedValue>),
    /// Map of string keys to values (ordered for deterministic encoding)
    Object(BTreeMap<String, TypedValue>),
}

impl TypedValue {
    /// Human-readable type name, used in `TypeMismatch` errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            TypedValue::Null => "null",
            TypedValue::Bool(_) => "bool",
            TypedValue::Int32(_) => "i32",
            TypedValue::Int64(_) => "i64",
            TypedValue::UInt32(_) => "u32",
            TypedValue::UInt64(_) => "u64",
            TypedValue::Float(_) => "f32",
            TypedValue::Double(_) => "f64",
            TypedValue::String(_) => "string",
            TypedValue::Binary(_) => "binary",
            TypedValue::VectorFloat(_) => "vector<f32>",
            TypedValue::Array(_) => "array",
            TypedValue::Object(_) => "object",
        }
    }

    /// Check for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }

    /// Borrow the string payload, if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view as f64, if this is any numeric variant.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Int32(v) => Some(*v as f64),
            TypedValue::Int64(v) => Some(*v as f64),
            TypedValue::UInt32(v) => Some(*v as f64),
            TypedValue::UInt64(v) => Some(*v as f64),
            TypedValue::Float(v) => Some(*v as f64),
            TypedValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Coerce into a dense f32 vector.
    ///
    /// `VectorFloat` passes through; an `Array` whose elements are all
    /// numeric is converted element-wise; anything else fails with
    /// `TypeMismatch` naming `field`.
    pub fn as_f32_vector(&self, field: &str) -> Result<Vec<f32>> {
        match self {
            TypedValue::VectorFloat(v) => Ok(v.clone()),
            TypedValue::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_f64() {
                        Some(f) => out.push(f as f32),
                        None => {
                            return Err(Error::type_mismatch(
                                field,
                                "vector<f32>",
                                item.type_name(),
                            ))
                        }
                    }
                }
                Ok(out)
            }
            other => Err(Error::type_mismatch(field, "vector<f32>", other.type_name())),
        }
    }

    /// Convert to a `serde_json::Value` for the JSON row format.
    ///
    /// Binary is wrapped as `{"$bin": "<hex>"}` so it survives the round
    /// trip; vectors become plain number arrays wrapped as
    /// `{"$vec": [..]}` to stay distinguishable from `Array`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Value as J};
        match self {
            TypedValue::Null => J::Null,
            TypedValue::Bool(b) => J::Bool(*b),
            TypedValue::Int32(v) => json!(v),
            TypedValue::Int64(v) => json!(v),
            TypedValue::UInt32(v) => json!(v),
            TypedValue::UInt64(v) => json!(v),
            TypedValue::Float(v) => json!(*v as f64),
            TypedValue::Double(v) => json!(v),
            TypedValue::String(s) => J::String(s.clone()),
            TypedValue::Binary(b) => json!({ "$bin": hex_encode(b) }),
            TypedValue::VectorFloat(v) => {
                json!({ "$vec": v.iter().map(|f| *f as f64).collect::<Vec<_>>() })
            }
            TypedValue::Array(items) => J::Array(items.iter().map(|i| i.to_json()).collect()),
            TypedValue::Object(map) => J::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Convert from a `serde_json::Value`.
    ///
    /// JSON integers land on `Int64` (or `UInt64` when out of i64 range),
    /// JSON floats on `Double`. The `$bin` / `$vec` wrappers produced by
    /// `to_json` are recognized and reversed.
    pub fn from_json(value: &serde_json::Value) -> Result<TypedValue> {
        use serde_json::Value as J;
        Ok(match value {
            J::Null => TypedValue::Null,
            J::Bool(b) => TypedValue::Bool(*b),
            J::Number(n) => {
                if let Some(i) = n.as_i64() {
                    TypedValue::Int64(i)
                } else if let Some(u) = n.as_u64() {
                    TypedValue::UInt64(u)
                } else {
                    TypedValue::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            J::String(s) => TypedValue::String(s.clone()),
            J::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(TypedValue::from_json(item)?);
                }
                TypedValue::Array(out)
            }
            J::Object(map) => {
                if map.len() == 1 {
                    if let Some(J::String(hex)) = map.get("$bin") {
                        return Ok(TypedValue::Binary(hex_decode(hex)?));
                    }
                    if let Some(J::Array(nums)) = map.get("$vec") {
                        let mut v = Vec::with_capacity(nums.len());
                        for n in nums {
                            let f = n.as_f64().ok_or_else(|| {
                                Error::DecodeError("non-numeric element in $vec".to_string())
                            })?;
                            v.push(f as f32);
                        }
                        return Ok(TypedValue::VectorFloat(v));
                    }
                }
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), TypedValue::from_json(v)?);
                }
                TypedValue::Object(out)
            }
        })
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

fn hex_decode(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(Error::DecodeError("odd-length hex in $bin".to_string()));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|_| Error::DecodeError("invalid hex in $bin".to_string()))
        })
        .collect()
}
