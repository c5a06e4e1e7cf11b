//! Core types for ThemisDB
//!
//! This crate defines the vocabulary shared by every layer:
//! - `Error` / `Result`: the unified error model
//! - `TypedValue`: the self-describing field value type
//! - `codec`: the tagged binary entity codec
//! - `keys`: canonical byte layouts for all logical entities
//! - `Entity`: the field-map record type stored in relational and
//!   document namespaces
//! - `Limits`: size and traversal bounds enforced by all layers

pub mod codec;
pub mod entity;
pub mod error;
pub mod keys;
pub mod limits;
pub mod value;

pub use entity::{Entity, RowFormat};
pub use error::{Error, Result};
pub use limits::Limits;
pub use value::TypedValue;

/// Current timestamp in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
