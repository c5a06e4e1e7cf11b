//! Size and traversal limits
//!
//! Enforced by the storage layer (key/value sizes), the graph manager
//! (visited/frontier bounds), and the batch builder.

use serde::{Deserialize, Serialize};

/// Configurable limits with conservative defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Maximum key length in bytes.
    pub max_key_bytes: usize,
    /// Maximum value length in bytes.
    pub max_value_bytes: usize,
    /// Maximum operations in a single write batch.
    pub max_batch_ops: usize,
    /// Soft cutoff for graph traversals; exceeding it returns partial
    /// results flagged as truncated.
    pub max_traversal_visited: usize,
    /// Maximum traversal frontier size before truncation.
    pub max_frontier: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_key_bytes: 1024,
            max_value_bytes: 16 * 1024 * 1024,
            max_batch_ops: 100_000,
            max_traversal_visited: 100_000,
            max_frontier: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let limits = Limits::default();
        assert_eq!(limits.max_key_bytes, 1024);
        assert_eq!(limits.max_value_bytes, 16 * 1024 * 1024);
        assert!(limits.max_traversal_visited >= limits.max_frontier);
    }

    #[test]
    fn test_serde_round_trip() {
        let limits = Limits {
            max_key_bytes: 10,
            ..Limits::default()
        };
        let json = serde_json::to_string(&limits).unwrap();
        let back: Limits = serde_json::from_str(&json).unwrap();
        assert_eq!(back, limits);
    }
}
