//! Canonical key layouts
//!
//! All keys are byte strings with the ASCII separator `:`; the prefix
//! determines the namespace:
//!
//! ```text
//! relational:<table>:<pk>        document:<collection>:<pk>
//! graph:node:<pk>                graph:edge:<pk>
//! graph:out:<from>:<edge>        graph:in:<to>:<edge>
//! vector:<ns>:<pk>               idx:<table>:<col>:<value>:<pk>
//! content:<id>:meta              content:<id>:blob
//! chunk:<id>                     content_chunks:<id>
//! content_hash:<sha256 hex>      changefeed:<seq u64 big-endian>
//! changefeed_sequence
//! ```
//!
//! Changefeed sequence keys embed the raw big-endian u64 so that
//! lexicographic order equals numeric order. User-supplied components
//! must be non-empty and must not contain `:` or NUL; escaping is not
//! supported.

use crate::error::{Error, Result};

/// Key under which the changefeed sequence allocator is persisted.
pub const CHANGEFEED_SEQUENCE_KEY: &[u8] = b"changefeed_sequence";

/// Which row namespace an entity lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Model {
    Relational,
    Document,
}

impl Model {
    /// Row key for this model: `relational:<t>:<pk>` / `document:<c>:<pk>`.
    pub fn row_key(&self, container: &str, pk: &str) -> Result<Vec<u8>> {
        match self {
            Model::Relational => relational(container, pk),
            Model::Document => document(container, pk),
        }
    }

    /// Prefix covering one container of this model.
    pub fn prefix(&self, container: &str) -> Result<Vec<u8>> {
        match self {
            Model::Relational => relational_prefix(container),
            Model::Document => document_prefix(container),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Model::Relational => "relational",
            Model::Document => "document",
        }
    }
}

/// Validate one user-supplied key component.
pub fn validate_component(what: &str, component: &str) -> Result<()> {
    if component.is_empty() {
        return Err(Error::InvalidArgument(format!("{what} must not be empty")));
    }
    if component.contains(':') {
        return Err(Error::InvalidArgument(format!(
            "{what} must not contain ':' (got {component:?})"
        )));
    }
    if component.contains('\0') {
        return Err(Error::InvalidArgument(format!(
            "{what} must not contain NUL bytes"
        )));
    }
    Ok(())
}

fn join(parts: &[&str]) -> Vec<u8> {
    parts.join(":").into_bytes()
}

/// `relational:<table>:<pk>`
pub fn relational(table: &str, pk: &str) -> Result<Vec<u8>> {
    validate_component("table", table)?;
    validate_component("pk", pk)?;
    Ok(join(&["relational", table, pk]))
}

/// Prefix for scanning one relational table.
pub fn relational_prefix(table: &str) -> Result<Vec<u8>> {
    validate_component("table", table)?;
    Ok(join(&["relational", table, ""]))
}

/// `document:<collection>:<pk>`
pub fn document(collection: &str, pk: &str) -> Result<Vec<u8>> {
    validate_component("collection", collection)?;
    validate_component("pk", pk)?;
    Ok(join(&["document", collection, pk]))
}

/// Prefix for scanning one document collection.
pub fn document_prefix(collection: &str) -> Result<Vec<u8>> {
    validate_component("collection", collection)?;
    Ok(join(&["document", collection, ""]))
}

/// `graph:node:<pk>`
pub fn graph_node(pk: &str) -> Result<Vec<u8>> {
    validate_component("pk", pk)?;
    Ok(join(&["graph", "node", pk]))
}

/// `graph:edge:<pk>`
pub fn graph_edge(edge_pk: &str) -> Result<Vec<u8>> {
    validate_component("edge pk", edge_pk)?;
    Ok(join(&["graph", "edge", edge_pk]))
}

/// `graph:out:<from>:<edge>`
pub fn graph_out(from_pk: &str, edge_pk: &str) -> Result<Vec<u8>> {
    validate_component("pk", from_pk)?;
    validate_component("edge pk", edge_pk)?;
    Ok(join(&["graph", "out", from_pk, edge_pk]))
}

/// `graph:in:<to>:<edge>`
pub fn graph_in(to_pk: &str, edge_pk: &str) -> Result<Vec<u8>> {
    validate_component("pk", to_pk)?;
    validate_component("edge pk", edge_pk)?;
    Ok(join(&["graph", "in", to_pk, edge_pk]))
}

/// Prefix for one node's outgoing (or incoming) adjacency list.
pub fn graph_adjacency_prefix(pk: &str, outgoing: bool) -> Result<Vec<u8>> {
    validate_component("pk", pk)?;
    let dir = if outgoing { "out" } else { "in" };
    Ok(join(&["graph", dir, pk, ""]))
}

/// `vector:<namespace>:<pk>`
pub fn vector(namespace: &str, pk: &str) -> Result<Vec<u8>> {
    validate_component("namespace", namespace)?;
    validate_component("pk", pk)?;
    Ok(join(&["vector", namespace, pk]))
}

/// Prefix for scanning one vector namespace.
pub fn vector_prefix(namespace: &str) -> Result<Vec<u8>> {
    validate_component("namespace", namespace)?;
    Ok(join(&["vector", namespace, ""]))
}

/// `idx:<table>:<column>:<value>:<pk>`
///
/// `value` is the order-preserving encoding produced by the secondary
/// index manager; it is appended raw (it may contain arbitrary bytes,
/// but never `:`; the index encoder guarantees that).
pub fn secondary_index(table: &str, column: &str, encoded_value: &[u8], pk: &str) -> Result<Vec<u8>> {
    validate_component("table", table)?;
    validate_component("column", column)?;
    validate_component("pk", pk)?;
    let mut key = join(&["idx", table, column, ""]);
    key.extend_from_slice(encoded_value);
    key.push(b':');
    key.extend_from_slice(pk.as_bytes());
    Ok(key)
}

/// Prefix covering all index entries for `(table, column)`.
pub fn secondary_index_prefix(table: &str, column: &str) -> Result<Vec<u8>> {
    validate_component("table", table)?;
    validate_component("column", column)?;
    Ok(join(&["idx", table, column, ""]))
}

/// `idxdef:<table>:<column>`: persisted index definition.
pub fn index_definition(table: &str, column: &str) -> Result<Vec<u8>> {
    validate_component("table", table)?;
    validate_component("column", column)?;
    Ok(join(&["idxdef", table, column]))
}

/// `content:<id>:meta`
pub fn content_meta(id: &str) -> Result<Vec<u8>> {
    validate_component("content id", id)?;
    Ok(join(&["content", id, "meta"]))
}

/// `content:<id>:blob`
pub fn content_blob(id: &str) -> Result<Vec<u8>> {
    validate_component("content id", id)?;
    Ok(join(&["content", id, "blob"]))
}

/// `chunk:<id>`
pub fn chunk(id: &str) -> Result<Vec<u8>> {
    validate_component("chunk id", id)?;
    Ok(join(&["chunk", id]))
}

/// `content_chunks:<id>`: ordered chunk id list for a content.
pub fn content_chunks(id: &str) -> Result<Vec<u8>> {
    validate_component("content id", id)?;
    Ok(join(&["content_chunks", id]))
}

/// `content_hash:<sha256 hex>`
pub fn content_hash(sha256_hex: &str) -> Result<Vec<u8>> {
    validate_component("content hash", sha256_hex)?;
    Ok(join(&["content_hash", sha256_hex]))
}

/// `changefeed:<seq u64 big-endian>`
pub fn changefeed(sequence: u64) -> Vec<u8> {
    let mut key = b"changefeed:".to_vec();
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

/// Prefix covering all changefeed events.
pub fn changefeed_prefix() -> Vec<u8> {
    b"changefeed:".to_vec()
}

/// Recover the sequence number from a changefeed key.
pub fn parse_changefeed(key: &[u8]) -> Result<u64> {
    let prefix = changefeed_prefix();
    let rest = key
        .strip_prefix(prefix.as_slice())
        .ok_or_else(|| Error::Corruption("not a changefeed key".to_string()))?;
    let bytes: [u8; 8] = rest
        .try_into()
        .map_err(|_| Error::Corruption("changefeed key has malformed sequence".to_string()))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Split `relational:<table>:<pk>` / `document:<collection>:<pk>` back
/// into components. Returns `(container, pk)`.
pub fn parse_row_key(key: &[u8]) -> Result<(String, String)> {
    let s = std::str::from_utf8(key)
        .map_err(|_| Error::Corruption("row key is not UTF-8".to_string()))?;
    let mut parts = s.splitn(3, ':');
    let ns = parts.next().unwrap_or_default();
    if ns != "relational" && ns != "document" {
        return Err(Error::Corruption(format!("not a row key: {s:?}")));
    }
    match (parts.next(), parts.next()) {
        (Some(container), Some(pk)) if !container.is_empty() && !pk.is_empty() => {
            Ok((container.to_string(), pk.to_string()))
        }
        _ => Err(Error::Corruption(format!("malformed row key: {s:?}"))),
    }
}

/// Split `vector:<namespace>:<pk>` into `(namespace, pk)`.
pub fn parse_vector_key(key: &[u8]) -> Result<(String, String)> {
    let s = std::str::from_utf8(key)
        .map_err(|_| Error::Corruption("vector key is not UTF-8".to_string()))?;
    let mut parts = s.splitn(3, ':');
    if parts.next() != Some("vector") {
        return Err(Error::Corruption(format!("not a vector key: {s:?}")));
    }
    match (parts.next(), parts.next()) {
        (Some(ns), Some(pk)) if !ns.is_empty() && !pk.is_empty() => {
            Ok((ns.to_string(), pk.to_string()))
        }
        _ => Err(Error::Corruption(format!("malformed vector key: {s:?}"))),
    }
}

/// Extract the edge pk from an adjacency key `graph:out:<pk>:<edge>` /
/// `graph:in:<pk>:<edge>`.
pub fn parse_adjacency_edge(key: &[u8]) -> Result<String> {
    let s = std::str::from_utf8(key)
        .map_err(|_| Error::Corruption("adjacency key is not UTF-8".to_string()))?;
    let mut parts = s.splitn(4, ':');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("graph"), Some("out" | "in"), Some(_), Some(edge)) if !edge.is_empty() => {
            Ok(edge.to_string())
        }
        _ => Err(Error::Corruption(format!("malformed adjacency key: {s:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relational_layout() {
        let key = relational("accounts", "acc-1").unwrap();
        assert_eq!(key, b"relational:accounts:acc-1");
    }

    #[test]
    fn test_component_validation() {
        assert!(relational("", "pk").is_err());
        assert!(relational("t", "").is_err());
        assert!(relational("ta:ble", "pk").is_err());
        assert!(relational("t\0", "pk").is_err());
    }

    #[test]
    fn test_adjacency_layouts() {
        assert_eq!(graph_out("a", "e1").unwrap(), b"graph:out:a:e1");
        assert_eq!(graph_in("b", "e1").unwrap(), b"graph:in:b:e1");
        assert_eq!(
            graph_adjacency_prefix("a", true).unwrap(),
            b"graph:out:a:"
        );
    }

    #[test]
    fn test_changefeed_key_order_matches_sequence_order() {
        let k1 = changefeed(1);
        let k2 = changefeed(2);
        let k256 = changefeed(256);
        assert!(k1 < k2);
        assert!(k2 < k256); // would fail with ASCII-decimal sequences
        assert_eq!(parse_changefeed(&k256).unwrap(), 256);
    }

    #[test]
    fn test_parse_row_key() {
        let key = document("notes", "n-9").unwrap();
        assert_eq!(
            parse_row_key(&key).unwrap(),
            ("notes".to_string(), "n-9".to_string())
        );
        assert!(parse_row_key(b"idx:t:c:v:pk").is_err());
    }

    #[test]
    fn test_parse_vector_key() {
        let key = vector("chunks", "c-1").unwrap();
        assert_eq!(
            parse_vector_key(&key).unwrap(),
            ("chunks".to_string(), "c-1".to_string())
        );
    }

    #[test]
    fn test_parse_adjacency_edge() {
        assert_eq!(
            parse_adjacency_edge(b"graph:out:a:e-17").unwrap(),
            "e-17".to_string()
        );
        assert!(parse_adjacency_edge(b"graph:edge:e-17").is_err());
    }

    #[test]
    fn test_secondary_index_layout() {
        let key = secondary_index("users", "age", b"\x80\x00\x00\x2a", "u1").unwrap();
        assert!(key.starts_with(b"idx:users:age:"));
        assert!(key.ends_with(b":u1"));
    }

    #[test]
    fn test_content_keys() {
        assert_eq!(content_meta("c1").unwrap(), b"content:c1:meta");
        assert_eq!(content_blob("c1").unwrap(), b"content:c1:blob");
        assert_eq!(content_chunks("c1").unwrap(), b"content_chunks:c1");
        assert_eq!(chunk("ch1").unwrap(), b"chunk:ch1");
    }
}
