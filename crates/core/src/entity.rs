//! Entity: the record type stored in relational and document namespaces
//!
//! An entity is a primary key plus a field map. It can be serialized in
//! two row formats: the tagged binary codec (default) or JSON (for
//! debugging and external tooling). The encoded blob is cached and
//! invalidated on every field mutation, so repeated encodes of an
//! unchanged entity are free.

use crate::codec;
use crate::error::{Error, Result};
use crate::value::TypedValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Storage format for a row blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RowFormat {
    /// Tagged binary codec (default)
    #[default]
    Binary,
    /// JSON object, `{"pk": .., "fields": {..}}`
    Json,
}

/// Leading byte distinguishing the two row formats on disk.
/// `{` (0x7B) can never be a codec tag, so JSON rows are self-marking;
/// binary rows get an explicit marker byte outside the tag range.
const BINARY_MARKER: u8 = 0xFE;

/// A record with a primary key and a tagged field map.
#[derive(Debug, Clone)]
pub struct Entity {
    pk: String,
    fields: BTreeMap<String, TypedValue>,
    format: RowFormat,
    /// Cached encoding of the current state. Cleared by every mutation.
    cached_blob: Option<Vec<u8>>,
}

/// Equality ignores the encoding cache: an entity that has been
/// encoded equals its never-encoded twin.
impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.pk == other.pk && self.fields == other.fields && self.format == other.format
    }
}

impl Entity {
    /// Create an empty entity with the default (binary) row format.
    pub fn new(pk: impl Into<String>) -> Self {
        Entity {
            pk: pk.into(),
            fields: BTreeMap::new(),
            format: RowFormat::Binary,
            cached_blob: None,
        }
    }

    /// Create an empty entity with an explicit row format.
    pub fn with_format(pk: impl Into<String>, format: RowFormat) -> Self {
        Entity {
            pk: pk.into(),
            fields: BTreeMap::new(),
            format,
            cached_blob: None,
        }
    }

    /// Primary key.
    pub fn pk(&self) -> &str {
        &self.pk
    }

    /// Row format used by `to_bytes`.
    pub fn format(&self) -> RowFormat {
        self.format
    }

    /// All fields, ordered by name.
    pub fn fields(&self) -> &BTreeMap<String, TypedValue> {
        &self.fields
    }

    /// Set a field, invalidating the cached blob.
    pub fn set_field(&mut self, name: impl Into<String>, value: TypedValue) -> &mut Self {
        self.fields.insert(name.into(), value);
        self.invalidate_cache();
        self
    }

    /// Remove a field, invalidating the cached blob if it existed.
    pub fn remove_field(&mut self, name: &str) -> Option<TypedValue> {
        let removed = self.fields.remove(name);
        if removed.is_some() {
            self.invalidate_cache();
        }
        removed
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&TypedValue> {
        self.fields.get(name)
    }

    /// Field as `&str`, failing with `TypeMismatch` on any other type.
    pub fn field_as_str(&self, name: &str) -> Result<&str> {
        match self.fields.get(name) {
            None => Err(Error::NotFound(format!("field '{name}'"))),
            Some(TypedValue::String(s)) => Ok(s),
            Some(other) => Err(Error::type_mismatch(name, "string", other.type_name())),
        }
    }

    /// Field coerced to a dense f32 vector (see `TypedValue::as_f32_vector`).
    pub fn field_as_f32_vector(&self, name: &str) -> Result<Vec<f32>> {
        match self.fields.get(name) {
            None => Err(Error::NotFound(format!("field '{name}'"))),
            Some(v) => v.as_f32_vector(name),
        }
    }

    /// Drop the cached encoding. Called internally by every mutation;
    /// public so callers that hand out `&mut` access can force a rebuild.
    pub fn invalidate_cache(&mut self) {
        self.cached_blob = None;
    }

    /// Encode the entity in its row format, reusing the cache when the
    /// entity has not been mutated since the last encode.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        if let Some(blob) = &self.cached_blob {
            return Ok(blob.clone());
        }
        let blob = self.encode()?;
        self.cached_blob = Some(blob.clone());
        Ok(blob)
    }

    /// Encode without touching the cache (for `&self` contexts).
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self.format {
            RowFormat::Binary => {
                let mut out = vec![BINARY_MARKER];
                let mut body = BTreeMap::new();
                body.insert("pk".to_string(), TypedValue::String(self.pk.clone()));
                body.insert(
                    "fields".to_string(),
                    TypedValue::Object(self.fields.clone()),
                );
                codec::encode_into(&TypedValue::Object(body), &mut out);
                Ok(out)
            }
            RowFormat::Json => {
                let json = serde_json::json!({
                    "pk": self.pk,
                    "fields": TypedValue::Object(self.fields.clone()).to_json(),
                });
                Ok(serde_json::to_vec(&json)?)
            }
        }
    }

    /// Decode a row blob in either format (self-describing by marker).
    pub fn from_bytes(bytes: &[u8]) -> Result<Entity> {
        match bytes.first() {
            None => Err(Error::DecodeError("empty row blob".to_string())),
            Some(&BINARY_MARKER) => Self::from_binary(&bytes[1..]),
            Some(b'{') => Self::from_json_bytes(bytes),
            Some(other) => Err(Error::DecodeError(format!(
                "unknown row marker 0x{other:02X}"
            ))),
        }
    }

    fn from_binary(bytes: &[u8]) -> Result<Entity> {
        let value = codec::decode(bytes)?;
        let mut body = match value {
            TypedValue::Object(map) => map,
            other => {
                return Err(Error::DecodeError(format!(
                    "binary row must be an object, got {}",
                    other.type_name()
                )))
            }
        };
        let pk = match body.remove("pk") {
            Some(TypedValue::String(s)) => s,
            _ => return Err(Error::DecodeError("binary row missing pk".to_string())),
        };
        let fields = match body.remove("fields") {
            Some(TypedValue::Object(map)) => map,
            _ => return Err(Error::DecodeError("binary row missing fields".to_string())),
        };
        Ok(Entity {
            pk,
            fields,
            format: RowFormat::Binary,
            cached_blob: None,
        })
    }

    fn from_json_bytes(bytes: &[u8]) -> Result<Entity> {
        let json: serde_json::Value = serde_json::from_slice(bytes)?;
        let pk = json
            .get("pk")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::DecodeError("JSON row missing pk".to_string()))?
            .to_string();
        let fields_json = json
            .get("fields")
            .ok_or_else(|| Error::DecodeError("JSON row missing fields".to_string()))?;
        let fields = match TypedValue::from_json(fields_json)? {
            TypedValue::Object(map) => map,
            other => {
                return Err(Error::DecodeError(format!(
                    "JSON row fields must be an object, got {}",
                    other.type_name()
                )))
            }
        };
        Ok(Entity {
            pk,
            fields,
            format: RowFormat::Json,
            cached_blob: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Entity {
        let mut e = Entity::new("acc-1");
        e.set_field("balance", TypedValue::Int64(1000));
        e.set_field("owner", TypedValue::String("ada".into()));
        e.set_field(
            "embedding",
            TypedValue::VectorFloat(vec![0.1, 0.2, 0.3, 0.4]),
        );
        e
    }

    #[test]
    fn test_binary_round_trip() {
        let mut e = sample();
        let bytes = e.to_bytes().unwrap();
        let back = Entity::from_bytes(&bytes).unwrap();
        assert_eq!(back, sample());
        assert_eq!(back.format(), RowFormat::Binary);
    }

    #[test]
    fn test_json_round_trip() {
        let mut e = Entity::with_format("n-1", RowFormat::Json);
        e.set_field("title", TypedValue::String("hello".into()));
        e.set_field("views", TypedValue::Int64(7));
        let bytes = e.to_bytes().unwrap();
        let back = Entity::from_bytes(&bytes).unwrap();
        assert_eq!(back.pk(), "n-1");
        assert_eq!(back.format(), RowFormat::Json);
        assert_eq!(back.field_as_str("title").unwrap(), "hello");
        assert_eq!(back.field("views"), Some(&TypedValue::Int64(7)));
    }

    #[test]
    fn test_byte_equality_for_unchanged_entity() {
        let mut e = sample();
        let first = e.to_bytes().unwrap();
        let second = e.to_bytes().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_cache_invalidated_on_mutation() {
        let mut e = sample();
        let before = e.to_bytes().unwrap();
        e.set_field("balance", TypedValue::Int64(900));
        let after = e.to_bytes().unwrap();
        assert_ne!(before, after);
        let back = Entity::from_bytes(&after).unwrap();
        assert_eq!(back.field("balance"), Some(&TypedValue::Int64(900)));
    }

    #[test]
    fn test_field_as_str_mismatch() {
        let e = sample();
        let err = e.field_as_str("balance").unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_field_as_vector() {
        let e = sample();
        assert_eq!(
            e.field_as_f32_vector("embedding").unwrap(),
            vec![0.1, 0.2, 0.3, 0.4]
        );
        assert!(e.field_as_f32_vector("owner").is_err());
        assert!(matches!(
            e.field_as_f32_vector("missing").unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn test_remove_field() {
        let mut e = sample();
        assert!(e.remove_field("owner").is_some());
        assert!(e.remove_field("owner").is_none());
        assert!(e.field("owner").is_none());
    }

    #[test]
    fn test_unknown_marker_rejected() {
        assert!(Entity::from_bytes(&[0x01, 0x02]).is_err());
        assert!(Entity::from_bytes(&[]).is_err());
    }
}
