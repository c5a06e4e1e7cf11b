//! Vector index configuration and result types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Distance metric for a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Cosine distance: stored vectors are normalized at insert,
    /// distances are `1 - dot` in `[0, 2]`.
    #[default]
    Cosine,
    /// Euclidean distance.
    L2,
}

/// ANN algorithm for a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnnAlgorithm {
    /// Exhaustive scan. Exact, O(n) per query.
    #[default]
    Flat,
    /// Hierarchical navigable small world graph.
    Hnsw,
}

/// Optional quantization for the flat scan path.
///
/// `Sq8` stores one byte per dimension (per-dimension min/max scaling)
/// and re-ranks the approximate top candidates with exact distances.
/// The legacy option name `pq8` is accepted as an alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quantization {
    #[default]
    None,
    #[serde(alias = "pq8")]
    Sq8,
}

/// Namespace configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Fixed dimension of every vector in the namespace.
    pub dim: usize,
    #[serde(default)]
    pub metric: DistanceMetric,
    #[serde(default)]
    pub algorithm: AnnAlgorithm,
    /// HNSW: beam width during construction.
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    /// HNSW: beam width during search.
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
    /// HNSW: maximum links per node above level 0 (level 0 gets 2·M).
    #[serde(default = "default_m")]
    pub m: usize,
    #[serde(default)]
    pub quantization: Quantization,
    /// Directory for persistence artifacts; `None` disables saving.
    #[serde(default)]
    pub auto_save_path: Option<PathBuf>,
}

fn default_ef_construction() -> usize {
    200
}

fn default_ef_search() -> usize {
    64
}

fn default_m() -> usize {
    16
}

impl VectorConfig {
    /// Flat cosine config with the given dimension.
    pub fn new(dim: usize) -> Self {
        VectorConfig {
            dim,
            metric: DistanceMetric::Cosine,
            algorithm: AnnAlgorithm::Flat,
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            m: default_m(),
            quantization: Quantization::None,
            auto_save_path: None,
        }
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_algorithm(mut self, algorithm: AnnAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_quantization(mut self, quantization: Quantization) -> Self {
        self.quantization = quantization;
        self
    }

    pub fn with_auto_save_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.auto_save_path = Some(path.into());
        self
    }
}

/// One k-NN result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub pk: String,
    pub distance: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = VectorConfig::new(384);
        assert_eq!(config.dim, 384);
        assert_eq!(config.metric, DistanceMetric::Cosine);
        assert_eq!(config.algorithm, AnnAlgorithm::Flat);
        assert_eq!(config.ef_construction, 200);
        assert_eq!(config.ef_search, 64);
        assert_eq!(config.m, 16);
        assert!(config.auto_save_path.is_none());
    }

    #[test]
    fn test_quantization_pq8_alias() {
        let q: Quantization = serde_json::from_str("\"pq8\"").unwrap();
        assert_eq!(q, Quantization::Sq8);
        let q: Quantization = serde_json::from_str("\"sq8\"").unwrap();
        assert_eq!(q, Quantization::Sq8);
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = VectorConfig::new(4)
            .with_metric(DistanceMetric::L2)
            .with_algorithm(AnnAlgorithm::Hnsw)
            .with_quantization(Quantization::Sq8);
        let json = serde_json::to_string(&config).unwrap();
        let back: VectorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_config_accepts_sparse_json() {
        let config: VectorConfig = serde_json::from_str(r#"{"dim": 8}"#).unwrap();
        assert_eq!(config.dim, 8);
        assert_eq!(config.m, 16);
    }
}
